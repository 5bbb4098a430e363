use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    BOOKINGS_CONFIRMED_TOTAL, LOCKS_ACQUIRED_TOTAL, LOCKS_RELEASED_TOTAL, LOCK_CONFLICTS_TOTAL,
    VENDORS_ACTIVE,
};

use super::availability::{effective_duration, unassigned_spans};
use super::conflict::{busy_spans, check_no_conflict, validate_span, Cutoff};
use super::schedule::resolve_candidates;
use super::{Engine, EngineError, WalCommand};

/// Everything needed to place a lock once the request has been resolved
/// to a vendor and a span.
struct LockDraft {
    lock_id: Ulid,
    vendor_id: Ulid,
    staff: StaffSelector,
    service_id: Option<Ulid>,
    package_id: Option<Ulid>,
    date: NaiveDate,
    span: Span,
    kind: LockKind,
    client_id: String,
    amount_cents: Option<i64>,
}

fn check_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn check_weekday(weekday: usize) -> Result<u8, EngineError> {
    if weekday >= 7 {
        return Err(EngineError::Validation(format!("weekday {weekday} out of range")));
    }
    Ok(weekday as u8)
}

fn slot_gone(staff_id: Option<Ulid>, span: Span) -> EngineError {
    EngineError::Conflict {
        staff_id,
        span,
        holder: None,
    }
}

impl Engine {
    pub async fn create_vendor(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if self.state.len() >= MAX_VENDORS {
            return Err(EngineError::LimitExceeded("too many vendors"));
        }
        check_name(&name)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VendorCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(VendorState::new(id, name))));
        metrics::gauge!(VENDORS_ACTIVE).set(self.state.len() as f64);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Set (or clear, with `None`) the vendor's hours for one weekday.
    pub async fn set_working_hours(
        &self,
        vendor_id: Ulid,
        weekday: usize,
        hours: Option<DayHours>,
    ) -> Result<(), EngineError> {
        let weekday = check_weekday(weekday)?;
        if let Some(h) = &hours
            && h.range.end > MINUTES_PER_DAY
        {
            return Err(EngineError::Validation("working hours end after midnight".into()));
        }
        let mut guard = self.vendor_write(&vendor_id).await?;
        let event = Event::WorkingHoursSet { vendor_id, weekday, hours };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn upsert_service(&self, vendor_id: Ulid, service: Service) -> Result<(), EngineError> {
        if service.duration > MAX_BOOKING_DURATION {
            return Err(EngineError::LimitExceeded("service too long"));
        }
        if service.price_cents < 0 {
            return Err(EngineError::Validation("price must not be negative".into()));
        }
        if let Some(owner) = self.get_vendor_for_entity(&service.id)
            && owner != vendor_id
        {
            return Err(EngineError::AlreadyExists(service.id));
        }
        let mut guard = self.vendor_write(&vendor_id).await?;
        if !guard.services.contains_key(&service.id)
            && guard.services.len() >= MAX_SERVICES_PER_VENDOR
        {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let event = Event::ServiceUpserted { vendor_id, service };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn upsert_package(&self, vendor_id: Ulid, package: Package) -> Result<(), EngineError> {
        if package.duration == 0 {
            return Err(EngineError::Validation("package duration must be positive".into()));
        }
        if package.duration > MAX_BOOKING_DURATION {
            return Err(EngineError::LimitExceeded("package too long"));
        }
        if let Some(owner) = self.get_vendor_for_entity(&package.id)
            && owner != vendor_id
        {
            return Err(EngineError::AlreadyExists(package.id));
        }
        let mut guard = self.vendor_write(&vendor_id).await?;
        if !guard.packages.contains_key(&package.id)
            && guard.packages.len() >= MAX_SERVICES_PER_VENDOR
        {
            return Err(EngineError::LimitExceeded("too many packages"));
        }
        let event = Event::PackageUpserted { vendor_id, package };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Add a staff member to the end of the roster, or rename an existing one.
    pub async fn upsert_staff(
        &self,
        vendor_id: Ulid,
        staff_id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        check_name(&name)?;
        if let Some(owner) = self.get_vendor_for_entity(&staff_id)
            && owner != vendor_id
        {
            return Err(EngineError::AlreadyExists(staff_id));
        }
        let mut guard = self.vendor_write(&vendor_id).await?;
        if guard.staff_member(&staff_id).is_none() && guard.staff.len() >= MAX_STAFF_PER_VENDOR {
            return Err(EngineError::LimitExceeded("too many staff"));
        }
        let event = Event::StaffUpserted { vendor_id, staff_id, name };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Replace a staff member's ranges for one weekday. An empty list falls
    /// back to vendor hours. Ranges are stored as given; malformed ones
    /// simply generate no slots.
    pub async fn set_staff_schedule(
        &self,
        staff_id: Ulid,
        weekday: usize,
        ranges: Vec<TimeRange>,
    ) -> Result<Ulid, EngineError> {
        let weekday = check_weekday(weekday)?;
        if ranges.len() > MAX_RANGES_PER_DAY {
            return Err(EngineError::LimitExceeded("too many ranges in one day"));
        }
        let mut guard = self.resolve_entity_write(&staff_id).await?;
        if guard.staff_member(&staff_id).is_none() {
            return Err(EngineError::NotFound(staff_id));
        }
        let vendor_id = guard.id;
        let event = Event::StaffScheduleSet { vendor_id, staff_id, weekday, ranges };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(vendor_id)
    }

    pub async fn remove_staff(&self, staff_id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_entity_write(&staff_id).await?;
        if guard.staff_member(&staff_id).is_none() {
            return Err(EngineError::NotFound(staff_id));
        }
        let vendor_id = guard.id;
        let event = Event::StaffRemoved { vendor_id, staff_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(vendor_id)
    }

    pub async fn block_time(
        &self,
        id: Ulid,
        staff_id: Ulid,
        date: NaiveDate,
        span: Span,
    ) -> Result<Ulid, EngineError> {
        if span.start >= span.end || span.end > MINUTES_PER_DAY {
            return Err(EngineError::Validation("blocked time must lie within one day".into()));
        }
        if self.entity_to_vendor.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.resolve_entity_write(&staff_id).await?;
        let member = guard
            .staff_member(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        if member.blocked.len() >= MAX_BLOCKED_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many blocked times"));
        }
        let vendor_id = guard.id;
        let event = Event::TimeBlocked {
            vendor_id,
            staff_id,
            blocked: BlockedTime { id, date, span },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(vendor_id)
    }

    pub async fn unblock_time(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let vendor_id = guard.id;
        let event = Event::TimeUnblocked { vendor_id, id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(vendor_id)
    }

    /// Record an appointment made outside the lock flow (walk-ins, imports,
    /// status changes). Re-recording an existing id replaces it.
    ///
    /// Occupying appointments assigned to a staff member (or on a vendor
    /// without a roster) are checked for overlaps like a lock would be.
    pub async fn record_appointment(
        &self,
        vendor_id: Ulid,
        appointment: Appointment,
    ) -> Result<(), EngineError> {
        validate_span(&appointment.span)?;
        if let Some(owner) = self.get_vendor_for_entity(&appointment.id)
            && owner != vendor_id
        {
            return Err(EngineError::AlreadyExists(appointment.id));
        }
        let mut guard = self.vendor_write(&vendor_id).await?;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_VENDOR {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        if appointment.occupies() {
            let staff = match appointment.staff_id {
                Some(sid) => Some(
                    guard
                        .staff_member(&sid)
                        .ok_or_else(|| EngineError::Resolution(format!("unknown staff {sid}")))?,
                ),
                None => None,
            };
            if staff.is_some() || guard.staff.is_empty() {
                let now = self.clock.now_ms();
                let busy: Vec<_> = busy_spans(
                    staff,
                    appointment.date,
                    guard.appointments_on(appointment.date),
                    &guard.locks,
                    now,
                )
                .into_iter()
                .filter(|b| b.holder != appointment.id)
                .collect();
                check_no_conflict(&busy, appointment.staff_id, &appointment.span)?;
            }
        }

        let event = Event::AppointmentRecorded { vendor_id, appointment };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Soft delete: the appointment stays on record as cancelled and stops
    /// holding time.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let vendor_id = guard.id;
        let Some(existing) = guard.appointment_mut(&id) else {
            return Err(EngineError::NotFound(id));
        };
        if existing.status == AppointmentStatus::Cancelled {
            return Ok(vendor_id);
        }
        let event = Event::AppointmentCancelled { vendor_id, id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(vendor_id)
    }

    // ── Slot locks ────────────────────────────────────────────────

    /// Reserve a slot for one service (plus add-ons) on behalf of a client.
    ///
    /// The span must be one the vendor currently offers: a generated start,
    /// not in the past, exactly as long as the service and its add-ons, and
    /// free for the chosen staff member. With "any professional" the first
    /// free member in roster order is assigned. A client holds at most one
    /// lock; any earlier one is released first.
    pub async fn acquire_lock(&self, req: LockRequest) -> Result<LockGrant, EngineError> {
        let vs = self
            .get_vendor(&req.vendor_id)
            .ok_or_else(|| EngineError::Resolution(format!("unknown vendor {}", req.vendor_id)))?;
        {
            let guard = vs.read().await;
            let duration =
                effective_duration(&guard, &[req.service_id], &req.add_on_ids, None, false, false)?;
            if duration != req.span.duration() {
                return Err(EngineError::Validation(format!(
                    "slot is {} minutes but the selection needs {duration}",
                    req.span.duration()
                )));
            }
        }

        self.place_lock(LockDraft {
            lock_id: req.lock_id,
            vendor_id: req.vendor_id,
            staff: req.staff,
            service_id: Some(req.service_id),
            package_id: None,
            date: req.date,
            span: req.span,
            kind: LockKind::Standard,
            client_id: req.client_id,
            amount_cents: req.amount_cents,
        })
        .await
    }

    /// Reserve a package slot. The package's duration decides the end, the
    /// vendor's roster decides who; the hold lasts longer than a standard lock.
    pub async fn acquire_package_lock(
        &self,
        req: PackageLockRequest,
    ) -> Result<LockGrant, EngineError> {
        let vendor_id = self
            .get_vendor_for_entity(&req.package_id)
            .ok_or_else(|| EngineError::Resolution(format!("unknown package {}", req.package_id)))?;
        let vs = self
            .get_vendor(&vendor_id)
            .ok_or_else(|| EngineError::Resolution(format!("unknown vendor {vendor_id}")))?;
        let (duration, price) = {
            let guard = vs.read().await;
            let package = guard.packages.get(&req.package_id).ok_or_else(|| {
                EngineError::Resolution(format!("unknown package {}", req.package_id))
            })?;
            (package.duration, package.price_cents)
        };
        if req.start >= MINUTES_PER_DAY {
            return Err(EngineError::Validation("slot must start within the day".into()));
        }
        let span = req
            .start
            .checked_add(duration)
            .and_then(|end| Span::try_new(req.start, end))
            .ok_or_else(|| EngineError::Validation("package does not fit the day".into()))?;

        self.place_lock(LockDraft {
            lock_id: req.lock_id,
            vendor_id,
            staff: StaffSelector::Any,
            service_id: None,
            package_id: Some(req.package_id),
            date: req.date,
            span,
            kind: LockKind::Package,
            client_id: req.client_id,
            amount_cents: Some(price),
        })
        .await
    }

    async fn place_lock(&self, draft: LockDraft) -> Result<LockGrant, EngineError> {
        validate_span(&draft.span)?;
        if draft.client_id.is_empty() {
            return Err(EngineError::Validation("client id is required".into()));
        }
        if draft.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(EngineError::LimitExceeded("client id too long"));
        }
        if self.entity_to_vendor.contains_key(&draft.lock_id) {
            return Err(EngineError::AlreadyExists(draft.lock_id));
        }

        // One lock per client: drop whatever it held before (any vendor).
        if let Some(previous) = self.client_lock(&draft.client_id)
            && previous != draft.lock_id
        {
            self.release_lock(previous).await?;
        }

        let mut guard = self.vendor_write(&draft.vendor_id).await?;
        if guard.locks.len() >= MAX_LOCKS_PER_VENDOR {
            return Err(EngineError::LimitExceeded("too many locks on vendor"));
        }

        let now = self.clock.now_ms();
        let cutoff = Cutoff::for_date(draft.date, self.clock.today(), self.clock.minute_of_day());
        if !cutoff.admits(draft.span.start) {
            metrics::counter!(LOCK_CONFLICTS_TOTAL).increment(1);
            return Err(slot_gone(draft.staff.staff_id(), draft.span));
        }

        let staff_id = match self.assign_staff(&guard, &draft, now) {
            Ok(id) => id,
            Err(e) => {
                if e.is_conflict() {
                    metrics::counter!(LOCK_CONFLICTS_TOTAL).increment(1);
                }
                return Err(e);
            }
        };

        // Leftovers from a concurrent acquire by the same client.
        let stale: Vec<Ulid> = guard
            .locks
            .iter()
            .filter(|l| l.client_id == draft.client_id)
            .map(|l| l.id)
            .collect();
        for id in stale {
            let event = Event::LockReleased { vendor_id: draft.vendor_id, id };
            self.persist_and_apply(&mut guard, &event).await?;
        }

        let lock = SlotLock {
            id: draft.lock_id,
            client_id: draft.client_id,
            staff_id,
            service_id: draft.service_id,
            package_id: draft.package_id,
            date: draft.date,
            span: draft.span,
            kind: draft.kind,
            expires_at: now + self.config.ttl_ms(draft.kind),
            appointment_id: Ulid::new(),
            amount_cents: draft.amount_cents,
        };
        let grant = LockGrant::from_lock(draft.vendor_id, &lock);
        let event = Event::LockAcquired {
            vendor_id: draft.vendor_id,
            lock,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let kind = match draft.kind {
            LockKind::Standard => "standard",
            LockKind::Package => "package",
        };
        metrics::counter!(LOCKS_ACQUIRED_TOTAL, "kind" => kind).increment(1);
        info!(
            lock_id = %grant.lock_id,
            vendor_id = %grant.vendor_id,
            date = %grant.date,
            start = %format_hhmm(grant.span.start),
            "lock acquired"
        );
        Ok(grant)
    }

    /// Pick the staff member a lock is held against, or `None` for a
    /// vendor without a roster.
    fn assign_staff(
        &self,
        vs: &VendorState,
        draft: &LockDraft,
        now: Ms,
    ) -> Result<Option<Ulid>, EngineError> {
        let interval = self.config.slot_interval;
        let appointments = vs.appointments_on(draft.date);
        let span = draft.span;

        let free_for = |member: Option<&StaffMember>| -> Result<(), EngineError> {
            let staff_id = member.map(|m| m.id);
            let candidates = resolve_candidates(
                draft.date,
                member,
                &vs.working_hours,
                interval,
                span.duration(),
            );
            if candidates.binary_search(&span.start).is_err() {
                return Err(EngineError::Validation(format!(
                    "{} is not an offered start on {}",
                    format_hhmm(span.start),
                    draft.date
                )));
            }
            let busy = busy_spans(member, draft.date, appointments, &vs.locks, now);
            check_no_conflict(&busy, staff_id, &span)
        };

        match draft.staff {
            StaffSelector::Staff(id) => {
                let member = vs
                    .staff_member(&id)
                    .ok_or_else(|| EngineError::Resolution(format!("unknown staff {id}")))?;
                free_for(Some(member))?;
                Ok(Some(id))
            }
            StaffSelector::Any if vs.staff.is_empty() => {
                free_for(None)?;
                Ok(None)
            }
            StaffSelector::Any => {
                let mut free = Vec::new();
                let mut conflict = None;
                for member in &vs.staff {
                    match free_for(Some(member)) {
                        Ok(()) => free.push(member.id),
                        Err(EngineError::Conflict { holder, .. }) => conflict = Some(holder),
                        Err(_) => {}
                    }
                }
                let taken = unassigned_spans(vs, draft.date, now)
                    .iter()
                    .filter(|u| u.overlaps(&span))
                    .count();
                if free.len() <= taken {
                    return Err(match conflict {
                        Some(holder) => EngineError::Conflict {
                            staff_id: None,
                            span,
                            holder,
                        },
                        None if free.is_empty() => EngineError::Validation(format!(
                            "{} is not an offered start on {}",
                            format_hhmm(span.start),
                            draft.date
                        )),
                        None => slot_gone(None, span),
                    });
                }
                Ok(Some(free[0]))
            }
        }
    }

    /// Give a lock back. Unknown or already-released locks are not an
    /// error; returns whether anything was released.
    pub async fn release_lock(&self, lock_id: Ulid) -> Result<bool, EngineError> {
        let mut guard = match self.resolve_entity_write(&lock_id).await {
            Ok(guard) => guard,
            Err(EngineError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if guard.lock(&lock_id).is_none() {
            return Ok(false);
        }
        let event = Event::LockReleased { vendor_id: guard.id, id: lock_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(LOCKS_RELEASED_TOTAL).increment(1);
        debug!(%lock_id, "lock released");
        Ok(true)
    }

    /// Turn a live lock into a scheduled appointment. An expired lock is
    /// released and reported as `Expired`.
    pub async fn confirm_lock(&self, lock_id: Ulid) -> Result<Appointment, EngineError> {
        let mut guard = self.resolve_entity_write(&lock_id).await?;
        let vendor_id = guard.id;
        let lock = guard
            .lock(&lock_id)
            .cloned()
            .ok_or(EngineError::NotFound(lock_id))?;

        if lock.is_expired(self.clock.now_ms()) {
            let event = Event::LockReleased { vendor_id, id: lock_id };
            self.persist_and_apply(&mut guard, &event).await?;
            warn!(%lock_id, "confirm after expiry");
            return Err(EngineError::Expired(lock_id));
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_VENDOR {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        let appointment = Appointment {
            id: lock.appointment_id,
            staff_id: lock.staff_id,
            date: lock.date,
            span: lock.span,
            status: AppointmentStatus::Scheduled,
            client_id: Some(lock.client_id.clone()),
        };
        let event = Event::LockConfirmed {
            vendor_id,
            id: lock_id,
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(BOOKINGS_CONFIRMED_TOTAL).increment(1);
        info!(%lock_id, appointment_id = %appointment.id, "booking confirmed");
        Ok(appointment)
    }

    /// Locks whose hold has run out at `now`. Vendors busy with a writer are
    /// skipped; the next sweep picks them up.
    pub fn collect_expired_locks(&self, now: Ms) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let vs = entry.value().clone();
            if let Ok(guard) = vs.try_read() {
                expired.extend(guard.locks.iter().filter(|l| l.is_expired(now)).map(|l| l.id));
            }
        }
        expired
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// Read guards on every vendor are held until the new file is in place
    /// so no write slips in between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut vendor_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        vendor_ids.sort();

        let mut guards: Vec<OwnedRwLockReadGuard<VendorState>> = Vec::with_capacity(vendor_ids.len());
        for id in &vendor_ids {
            if let Some(vs) = self.get_vendor(id) {
                guards.push(vs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for vs in &guards {
            snapshot_vendor(vs, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn snapshot_vendor(vs: &VendorState, events: &mut Vec<Event>) {
    let vendor_id = vs.id;
    events.push(Event::VendorCreated {
        id: vendor_id,
        name: vs.name.clone(),
    });
    for (weekday, hours) in vs.working_hours.days.iter().enumerate() {
        if hours.is_some() {
            events.push(Event::WorkingHoursSet {
                vendor_id,
                weekday: weekday as u8,
                hours: *hours,
            });
        }
    }

    let mut services: Vec<&Service> = vs.services.values().collect();
    services.sort_by_key(|s| s.id);
    for service in services {
        events.push(Event::ServiceUpserted { vendor_id, service: service.clone() });
    }
    let mut packages: Vec<&Package> = vs.packages.values().collect();
    packages.sort_by_key(|p| p.id);
    for package in packages {
        events.push(Event::PackageUpserted { vendor_id, package: package.clone() });
    }

    for member in &vs.staff {
        events.push(Event::StaffUpserted {
            vendor_id,
            staff_id: member.id,
            name: member.name.clone(),
        });
        for (weekday, ranges) in member.schedule.days.iter().enumerate() {
            if !ranges.is_empty() {
                events.push(Event::StaffScheduleSet {
                    vendor_id,
                    staff_id: member.id,
                    weekday: weekday as u8,
                    ranges: ranges.clone(),
                });
            }
        }
        for blocked in &member.blocked {
            events.push(Event::TimeBlocked {
                vendor_id,
                staff_id: member.id,
                blocked: blocked.clone(),
            });
        }
    }

    for appointment in &vs.appointments {
        events.push(Event::AppointmentRecorded {
            vendor_id,
            appointment: appointment.clone(),
        });
    }
    for lock in &vs.locks {
        events.push(Event::LockAcquired { vendor_id, lock: lock.clone() });
    }
}
