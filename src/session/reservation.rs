use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::engine::{EngineError, Recovery, SlotBackend};
use crate::model::*;

use super::bounded;

/// What to hold: one service (plus add-ons) or a whole package.
#[derive(Debug, Clone, PartialEq)]
pub enum LockTarget {
    Service {
        vendor_id: Ulid,
        staff: StaffSelector,
        service_id: Ulid,
        add_on_ids: Vec<Ulid>,
        date: NaiveDate,
        span: Span,
        amount_cents: Option<i64>,
    },
    Package {
        package_id: Ulid,
        date: NaiveDate,
        start: Minute,
    },
}

/// Local mirror of the one lock a client holds in the store.
///
/// The store is authoritative; this side only remembers the grant so it can
/// release it before the next acquire, count down its TTL, and drop it once
/// it has expired without waiting for the store's reaper.
pub struct ReservationManager {
    backend: Arc<dyn SlotBackend>,
    clock: Arc<dyn Clock>,
    client_id: String,
    timeout: Duration,
    active: Option<LockGrant>,
}

impl ReservationManager {
    pub fn new(
        backend: Arc<dyn SlotBackend>,
        clock: Arc<dyn Clock>,
        client_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            client_id: client_id.into(),
            timeout,
            active: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The held lock, if it has not expired yet.
    pub fn active(&self) -> Option<&LockGrant> {
        let now = self.clock.now_ms();
        self.active.as_ref().filter(|g| now < g.expires_at)
    }

    /// True once `now >= expires_at`, or when `lock_id` is not the held lock.
    pub fn is_expired(&self, lock_id: Ulid, now: Ms) -> bool {
        match &self.active {
            Some(g) if g.lock_id == lock_id => now >= g.expires_at,
            _ => true,
        }
    }

    /// Time left on the held lock. `None` when nothing is held or it ran out.
    pub fn remaining(&self) -> Option<Duration> {
        let now = self.clock.now_ms();
        let grant = self.active.as_ref()?;
        let left = grant.expires_at - now;
        (left > 0).then(|| Duration::from_millis(left as u64))
    }

    /// Forget an expired lock. Returns its id if one was dropped.
    pub fn reconcile(&mut self) -> Option<Ulid> {
        let now = self.clock.now_ms();
        if self.active.as_ref().is_some_and(|g| now >= g.expires_at) {
            let grant = self.active.take()?;
            debug!(lock_id = %grant.lock_id, "local lock expired");
            return Some(grant.lock_id);
        }
        None
    }

    /// Release the held lock, then acquire `target`. The release completes
    /// before the acquire is sent.
    pub async fn acquire(&mut self, target: LockTarget) -> Result<LockGrant, EngineError> {
        // Already logged; the store drops a client's previous lock on acquire too.
        let _ = self.release().await;

        let lock_id = Ulid::new();
        let client_id = self.client_id.clone();
        let grant = match target {
            LockTarget::Service {
                vendor_id,
                staff,
                service_id,
                add_on_ids,
                date,
                span,
                amount_cents,
            } => {
                let req = LockRequest {
                    lock_id,
                    vendor_id,
                    staff,
                    service_id,
                    add_on_ids,
                    date,
                    span,
                    client_id,
                    amount_cents,
                };
                bounded(self.timeout, "acquire lock", self.backend.acquire_lock(req)).await?
            }
            LockTarget::Package {
                package_id,
                date,
                start,
            } => {
                let req = PackageLockRequest {
                    lock_id,
                    package_id,
                    date,
                    start,
                    client_id,
                };
                bounded(
                    self.timeout,
                    "acquire package lock",
                    self.backend.acquire_package_lock(req),
                )
                .await?
            }
        };

        info!(lock_id = %grant.lock_id, expires_at = grant.expires_at, "lock held");
        self.active = Some(grant.clone());
        Ok(grant)
    }

    /// Idempotent. The local lock is dropped even if the store call fails;
    /// the store expires it on its own.
    pub async fn release(&mut self) -> Result<(), EngineError> {
        let Some(grant) = self.active.take() else {
            return Ok(());
        };
        if self.clock.now_ms() >= grant.expires_at {
            debug!(lock_id = %grant.lock_id, "skip release: already expired");
            return Ok(());
        }
        bounded(self.timeout, "release lock", self.backend.release_lock(grant.lock_id))
            .await
            .inspect_err(|e| warn!(lock_id = %grant.lock_id, "release failed: {e}"))
    }

    /// Turn the held lock into an appointment.
    pub async fn confirm(&mut self) -> Result<Appointment, EngineError> {
        let grant = self
            .active
            .take()
            .ok_or_else(|| EngineError::Validation("no slot is reserved".into()))?;
        if self.clock.now_ms() >= grant.expires_at {
            return Err(EngineError::Expired(grant.lock_id));
        }

        match bounded(self.timeout, "confirm lock", self.backend.confirm_lock(grant.lock_id)).await {
            Ok(appointment) => {
                info!(appointment_id = %appointment.id, "booking confirmed");
                Ok(appointment)
            }
            Err(e) => {
                // Transport trouble leaves the lock in place for a retry.
                if e.recovery() == Recovery::Retry {
                    self.active = Some(grant);
                }
                Err(e)
            }
        }
    }
}
