use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{effective_duration, merge_by_start, staff_slots, unassigned_spans};
use super::conflict::Cutoff;
use super::{Engine, EngineError};

fn validate_location(query: &SlotQuery) -> Result<(), EngineError> {
    match query.location {
        Some((lat, lng)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(EngineError::Validation("coordinates out of range".into()));
            }
            Ok(())
        }
        None if query.home_service => Err(EngineError::Validation(
            "home service needs resolved coordinates".into(),
        )),
        None => Ok(()),
    }
}

impl Engine {
    /// Bookable slots for a vendor on one date.
    ///
    /// A closed day, a past date, or a fully booked day is an empty listing.
    /// An unknown vendor, staff member or service is a `Resolution` error so
    /// callers can tell "no slots" from "could not determine slots".
    pub async fn get_available_slots(&self, query: &SlotQuery) -> Result<SlotListing, EngineError> {
        if query.service_ids.len() + query.add_on_ids.len() > MAX_IDS_PER_QUERY {
            return Err(EngineError::LimitExceeded("too many ids in query"));
        }
        validate_location(query)?;

        let vs = self.get_vendor(&query.vendor_id).ok_or_else(|| {
            EngineError::Resolution(format!("unknown vendor {}", query.vendor_id))
        })?;
        let guard = vs.read().await;

        let duration = effective_duration(
            &guard,
            &query.service_ids,
            &query.add_on_ids,
            query.package_id,
            query.home_service,
            query.wedding_service,
        )?;

        let now = self.clock.now_ms();
        let cutoff = Cutoff::for_date(query.date, self.clock.today(), self.clock.minute_of_day());
        let interval = self.config.slot_interval;

        let slots = match query.staff {
            _ if cutoff == Cutoff::Closed => Vec::new(),
            StaffSelector::Staff(id) => {
                let member = guard
                    .staff_member(&id)
                    .ok_or_else(|| EngineError::Resolution(format!("unknown staff {id}")))?;
                staff_slots(&guard, Some(member), query.date, duration, interval, cutoff, now)
            }
            StaffSelector::Any if guard.staff.is_empty() => {
                staff_slots(&guard, None, query.date, duration, interval, cutoff, now)
            }
            StaffSelector::Any => {
                let per_staff: Vec<Vec<TimeSlot>> = guard
                    .staff
                    .iter()
                    .map(|m| staff_slots(&guard, Some(m), query.date, duration, interval, cutoff, now))
                    .collect();
                merge_by_start(&per_staff, &unassigned_spans(&guard, query.date, now))
            }
        };

        debug!(
            vendor_id = %query.vendor_id,
            date = %query.date,
            duration,
            count = slots.len(),
            "slots computed"
        );
        Ok(SlotListing {
            slots,
            fetched_at: now,
        })
    }

    /// Appointments (any status) on `date`, optionally narrowed to one staff member.
    pub async fn get_appointments(
        &self,
        vendor_id: Ulid,
        staff_id: Option<Ulid>,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        let vs = self
            .get_vendor(&vendor_id)
            .ok_or_else(|| EngineError::Resolution(format!("unknown vendor {vendor_id}")))?;
        let guard = vs.read().await;
        Ok(guard
            .appointments_on(date)
            .iter()
            .filter(|a| staff_id.is_none() || a.staff_id == staff_id)
            .cloned()
            .collect())
    }

    /// A lock as currently stored, expired or not.
    pub async fn get_lock(&self, lock_id: Ulid) -> Option<SlotLock> {
        let vendor_id = self.get_vendor_for_entity(&lock_id)?;
        let vs = self.get_vendor(&vendor_id)?;
        let guard = vs.read().await;
        guard.lock(&lock_id).cloned()
    }

    /// Expiry is reconciled here rather than left to the reaper: a lock past
    /// its deadline is expired even if it is still stored. Unknown locks
    /// count as expired.
    pub async fn is_expired(&self, lock_id: Ulid, now: Ms) -> bool {
        match self.get_lock(lock_id).await {
            Some(lock) => lock.is_expired(now),
            None => true,
        }
    }

    pub async fn list_staff(&self, vendor_id: Ulid) -> Result<Vec<StaffMember>, EngineError> {
        let vs = self
            .get_vendor(&vendor_id)
            .ok_or_else(|| EngineError::Resolution(format!("unknown vendor {vendor_id}")))?;
        let guard = vs.read().await;
        Ok(guard.staff.clone())
    }
}
