mod availability;
mod backend;
mod conflict;
mod error;
mod mutations;
mod queries;
mod schedule;

pub use availability::{effective_duration, merge_by_start, staff_slots, unassigned_spans};
pub use backend::SlotBackend;
pub use conflict::{busy_spans, filter_candidates, Busy, Cutoff};
pub use error::{EngineError, Recovery};
pub use schedule::{generate_starts, resolve_candidates, working_ranges};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVendorState = Arc<RwLock<VendorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation store: vendor schedules, appointments and slot locks.
pub struct Engine {
    pub state: DashMap<Ulid, SharedVendorState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (staff, service, package, blocked time,
    /// appointment, lock) id → vendor id.
    pub(super) entity_to_vendor: DashMap<Ulid, Ulid>,
    /// Client → the one lock it currently holds.
    pub(super) client_locks: DashMap<String, Ulid>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
}

/// Apply an event directly to a VendorState. The caller holds the lock.
fn apply_to_vendor(
    vs: &mut VendorState,
    event: &Event,
    entity_map: &DashMap<Ulid, Ulid>,
    client_locks: &DashMap<String, Ulid>,
) {
    let vendor_id = vs.id;
    match event {
        Event::WorkingHoursSet { weekday, hours, .. } => {
            if let Some(day) = vs.working_hours.days.get_mut(*weekday as usize) {
                *day = *hours;
            }
        }
        Event::ServiceUpserted { service, .. } => {
            vs.services.insert(service.id, service.clone());
            entity_map.insert(service.id, vendor_id);
        }
        Event::PackageUpserted { package, .. } => {
            vs.packages.insert(package.id, package.clone());
            entity_map.insert(package.id, vendor_id);
        }
        Event::StaffUpserted { staff_id, name, .. } => {
            match vs.staff_member_mut(staff_id) {
                Some(member) => member.name = name.clone(),
                None => vs.staff.push(StaffMember::new(*staff_id, name.clone())),
            }
            entity_map.insert(*staff_id, vendor_id);
        }
        Event::StaffScheduleSet {
            staff_id,
            weekday,
            ranges,
            ..
        } => {
            if let Some(member) = vs.staff_member_mut(staff_id)
                && let Some(day) = member.schedule.days.get_mut(*weekday as usize)
            {
                *day = ranges.clone();
            }
        }
        Event::StaffRemoved { staff_id, .. } => {
            if let Some(pos) = vs.staff.iter().position(|s| s.id == *staff_id) {
                let member = vs.staff.remove(pos);
                for b in &member.blocked {
                    entity_map.remove(&b.id);
                }
            }
            entity_map.remove(staff_id);
        }
        Event::TimeBlocked {
            staff_id, blocked, ..
        } => {
            if let Some(member) = vs.staff_member_mut(staff_id) {
                member.blocked.push(blocked.clone());
                entity_map.insert(blocked.id, vendor_id);
            }
        }
        Event::TimeUnblocked { id, .. } => {
            for member in &mut vs.staff {
                member.blocked.retain(|b| b.id != *id);
            }
            entity_map.remove(id);
        }
        Event::AppointmentRecorded { appointment, .. } => {
            vs.appointments.retain(|a| a.id != appointment.id);
            vs.insert_appointment(appointment.clone());
            entity_map.insert(appointment.id, vendor_id);
        }
        Event::AppointmentCancelled { id, .. } => {
            if let Some(a) = vs.appointment_mut(id) {
                a.status = AppointmentStatus::Cancelled;
            }
        }
        Event::LockAcquired { lock, .. } => {
            vs.locks.push(lock.clone());
            entity_map.insert(lock.id, vendor_id);
            client_locks.insert(lock.client_id.clone(), lock.id);
        }
        Event::LockReleased { id, .. } => {
            drop_lock(vs, id, entity_map, client_locks);
        }
        Event::LockConfirmed { id, appointment, .. } => {
            drop_lock(vs, id, entity_map, client_locks);
            vs.appointments.retain(|a| a.id != appointment.id);
            vs.insert_appointment(appointment.clone());
            entity_map.insert(appointment.id, vendor_id);
        }
        // VendorCreated is handled at the DashMap level, not here
        Event::VendorCreated { .. } => {}
    }
}

fn drop_lock(
    vs: &mut VendorState,
    id: &Ulid,
    entity_map: &DashMap<Ulid, Ulid>,
    client_locks: &DashMap<String, Ulid>,
) {
    if let Some(lock) = vs.remove_lock(id) {
        client_locks.remove_if(&lock.client_id, |_, held| held == id);
    }
    entity_map.remove(id);
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, config: EngineConfig) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_vendor: DashMap::new(),
            client_locks: DashMap::new(),
            clock,
            config: config.sanitized(),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::VendorCreated { id, name } => {
                    let vs = VendorState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(vs)));
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.vendor_id()) {
                        let vs_arc = entry.clone();
                        let mut guard = vs_arc.try_write().map_err(|_| {
                            io::Error::other(format!("replay: vendor {} already locked", other.vendor_id()))
                        })?;
                        apply_to_vendor(
                            &mut guard,
                            other,
                            &engine.entity_to_vendor,
                            &engine.client_locks,
                        );
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_vendor(&self, id: &Ulid) -> Option<SharedVendorState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_vendor_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_vendor.get(entity_id).map(|e| *e.value())
    }

    /// Lock currently held by `client_id`, if any (may have expired).
    pub fn client_lock(&self, client_id: &str) -> Option<Ulid> {
        self.client_locks.get(client_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VendorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_vendor(vs, event, &self.entity_to_vendor, &self.client_locks);
        self.notify.send(vs.id, event);
        Ok(())
    }

    /// Vendor state for writing, or a resolution error if it is unknown.
    pub(super) async fn vendor_write(
        &self,
        vendor_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<VendorState>, EngineError> {
        let vs = self
            .get_vendor(vendor_id)
            .ok_or_else(|| EngineError::Resolution(format!("unknown vendor {vendor_id}")))?;
        Ok(vs.write_owned().await)
    }

    /// Lookup entity → vendor, get vendor, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<VendorState>, EngineError> {
        let vendor_id = self
            .get_vendor_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let vs = self
            .get_vendor(&vendor_id)
            .ok_or(EngineError::NotFound(vendor_id))?;
        Ok(vs.write_owned().await)
    }
}
