use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// The reservation store as seen from a booking session.
///
/// `Engine` implements it in-process; a remote client would implement it over
/// the wire. Callers bound every call with a timeout.
#[async_trait]
pub trait SlotBackend: Send + Sync {
    async fn get_slots(&self, query: SlotQuery) -> Result<SlotListing, EngineError>;

    async fn acquire_lock(&self, req: LockRequest) -> Result<LockGrant, EngineError>;

    async fn acquire_package_lock(&self, req: PackageLockRequest)
    -> Result<LockGrant, EngineError>;

    /// Idempotent.
    async fn release_lock(&self, lock_id: Ulid) -> Result<(), EngineError>;

    async fn confirm_lock(&self, lock_id: Ulid) -> Result<Appointment, EngineError>;

    async fn get_appointments(
        &self,
        vendor_id: Ulid,
        staff_id: Option<Ulid>,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError>;
}

#[async_trait]
impl SlotBackend for Engine {
    async fn get_slots(&self, query: SlotQuery) -> Result<SlotListing, EngineError> {
        self.get_available_slots(&query).await
    }

    async fn acquire_lock(&self, req: LockRequest) -> Result<LockGrant, EngineError> {
        Engine::acquire_lock(self, req).await
    }

    async fn acquire_package_lock(
        &self,
        req: PackageLockRequest,
    ) -> Result<LockGrant, EngineError> {
        Engine::acquire_package_lock(self, req).await
    }

    async fn release_lock(&self, lock_id: Ulid) -> Result<(), EngineError> {
        Engine::release_lock(self, lock_id).await.map(|_| ())
    }

    async fn confirm_lock(&self, lock_id: Ulid) -> Result<Appointment, EngineError> {
        Engine::confirm_lock(self, lock_id).await
    }

    async fn get_appointments(
        &self,
        vendor_id: Ulid,
        staff_id: Option<Ulid>,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        Engine::get_appointments(self, vendor_id, staff_id, date).await
    }
}
