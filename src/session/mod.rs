//! Client-side booking flow: the step machine, the local lock mirror, and
//! the timers that keep a slot view fresh.

mod freshness;
mod reservation;

pub use freshness::{FreshnessMonitor, RefetchReason, RefetchRequest, ViewId};
pub use reservation::{LockTarget, ReservationManager};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::engine::{EngineError, Recovery, SlotBackend};
use crate::model::*;

/// Run a store call under `limit`. Running out of time is an error, never success.
pub(crate) async fn bounded<T>(
    limit: Duration,
    op: &'static str,
    call: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| EngineError::Timeout(op))?
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ServiceSelection,
    StaffSelection,
    /// Only for home service or an off-salon venue.
    LocationSelection,
    SlotSelection,
    Confirmation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offering {
    Service { service_id: Ulid, add_on_ids: Vec<Ulid> },
    Package { package_id: Ulid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Salon,
    Home,
    /// Off-salon venue, e.g. a wedding.
    Wedding,
}

impl Venue {
    fn needs_location(self) -> bool {
        self != Venue::Salon
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub address: String,
    /// Resolved `(lat, lng)`. Geocoding happens outside the session.
    pub coordinates: Option<(f64, f64)>,
}

/// A slot fetch in flight. Completing an outdated ticket is a no-op.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    generation: u64,
    query: SlotQuery,
}

impl FetchTicket {
    pub fn query(&self) -> &SlotQuery {
        &self.query
    }
}

/// One customer's way through service → staff → location → slot → confirm.
///
/// All state changes go through the methods below. Changing the service or
/// the staff choice releases the held lock and forgets the chosen slot.
pub struct BookingSession {
    vendor_id: Ulid,
    backend: Arc<dyn SlotBackend>,
    config: SessionConfig,
    step: Step,
    offering: Option<Offering>,
    venue: Venue,
    staff: Option<StaffSelector>,
    location: Option<Location>,
    date: Option<NaiveDate>,
    listing: Option<SlotListing>,
    chosen: Option<TimeSlot>,
    reservations: ReservationManager,
    freshness: FreshnessMonitor,
    refetch_rx: mpsc::Receiver<RefetchRequest>,
    view: Option<ViewId>,
    fetch_generation: u64,
    booked: Option<Appointment>,
}

impl BookingSession {
    pub fn new(
        vendor_id: Ulid,
        client_id: impl Into<String>,
        backend: Arc<dyn SlotBackend>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let reservations = ReservationManager::new(
            backend.clone(),
            clock.clone(),
            client_id,
            config.request_timeout,
        );
        let (freshness, refetch_rx) = FreshnessMonitor::new(config, clock);
        Self {
            vendor_id,
            backend,
            config,
            step: Step::ServiceSelection,
            offering: None,
            venue: Venue::Salon,
            staff: None,
            location: None,
            date: None,
            listing: None,
            chosen: None,
            reservations,
            freshness,
            refetch_rx,
            view: None,
            fetch_generation: 0,
            booked: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn offering(&self) -> Option<&Offering> {
        self.offering.as_ref()
    }

    pub fn staff(&self) -> Option<StaffSelector> {
        self.staff
    }

    pub fn slots(&self) -> &[TimeSlot] {
        self.listing.as_ref().map(|l| l.slots.as_slice()).unwrap_or_default()
    }

    pub fn chosen_slot(&self) -> Option<&TimeSlot> {
        self.chosen.as_ref()
    }

    pub fn lock(&self) -> Option<&LockGrant> {
        self.reservations.active()
    }

    pub fn lock_remaining(&self) -> Option<Duration> {
        self.reservations.remaining()
    }

    pub fn booked(&self) -> Option<&Appointment> {
        self.booked.as_ref()
    }

    pub fn view(&self) -> Option<ViewId> {
        self.view
    }

    /// Advisory: the visible listing is older than the stale threshold.
    pub fn slots_stale(&self) -> bool {
        self.view.is_some_and(|v| self.freshness.is_stale(v))
    }

    // ── Selections ───────────────────────────────────────────

    pub async fn select_offering(&mut self, offering: Offering, venue: Venue) {
        let changed = self.offering.as_ref() != Some(&offering) || self.venue != venue;
        self.offering = Some(offering);
        self.venue = venue;
        if changed {
            self.invalidate_slot().await;
            if !venue.needs_location() {
                self.location = None;
            }
        }
    }

    pub async fn select_staff(&mut self, staff: StaffSelector) {
        if self.staff != Some(staff) {
            self.staff = Some(staff);
            self.invalidate_slot().await;
        }
    }

    pub fn set_location(&mut self, location: Location) -> Result<(), EngineError> {
        check_location(&location)?;
        self.location = Some(location);
        Ok(())
    }

    /// Release the lock and forget the slot choice and listing.
    async fn invalidate_slot(&mut self) {
        if self.chosen.take().is_some() || self.reservations.active().is_some() {
            debug!("selection changed, dropping reserved slot");
        }
        let _ = self.reservations.release().await;
        self.listing = None;
        self.fetch_generation += 1;
        if self.step == Step::Confirmation {
            self.step = Step::SlotSelection;
        }
    }

    // ── Transitions ──────────────────────────────────────────

    /// Move to the next step if the current one is complete.
    pub fn advance(&mut self) -> Result<Step, EngineError> {
        let next = match self.step {
            Step::ServiceSelection => {
                if self.offering.is_none() {
                    return Err(EngineError::Validation("choose a service or package".into()));
                }
                Step::StaffSelection
            }
            Step::StaffSelection => {
                if self.staff.is_none() {
                    return Err(EngineError::Validation("choose a professional".into()));
                }
                if self.venue.needs_location() {
                    Step::LocationSelection
                } else {
                    Step::SlotSelection
                }
            }
            Step::LocationSelection => {
                let location = self
                    .location
                    .as_ref()
                    .ok_or_else(|| EngineError::Validation("enter the service address".into()))?;
                check_location(location)?;
                Step::SlotSelection
            }
            Step::SlotSelection => {
                if self.chosen.is_none() || self.reservations.active().is_none() {
                    return Err(EngineError::Validation("reserve a slot first".into()));
                }
                Step::Confirmation
            }
            Step::Confirmation => return Ok(Step::Confirmation),
        };
        self.enter(next);
        Ok(next)
    }

    /// Go back one step. Leaving slot selection keeps the lock; changing a
    /// selection is what releases it.
    pub fn back(&mut self) -> Step {
        let prev = match self.step {
            Step::ServiceSelection | Step::StaffSelection => Step::ServiceSelection,
            Step::LocationSelection => Step::StaffSelection,
            Step::SlotSelection if self.venue.needs_location() => Step::LocationSelection,
            Step::SlotSelection => Step::StaffSelection,
            Step::Confirmation => Step::SlotSelection,
        };
        self.enter(prev);
        prev
    }

    /// The slot view stays open through confirmation so a booking can
    /// refresh it.
    fn enter(&mut self, step: Step) {
        let shows_slots = matches!(step, Step::SlotSelection | Step::Confirmation);
        if shows_slots && self.view.is_none() {
            self.view = Some(self.freshness.open_view());
        } else if !shows_slots && let Some(view) = self.view.take() {
            self.freshness.teardown_view(view);
        }
        self.step = step;
    }

    // ── Slots ────────────────────────────────────────────────

    fn slot_query(&self, date: NaiveDate) -> Result<SlotQuery, EngineError> {
        let offering = self
            .offering
            .as_ref()
            .ok_or_else(|| EngineError::Validation("choose a service or package".into()))?;
        let staff = self
            .staff
            .ok_or_else(|| EngineError::Validation("choose a professional".into()))?;
        let mut query = SlotQuery::new(self.vendor_id, date, staff);
        match offering {
            Offering::Service {
                service_id,
                add_on_ids,
            } => {
                query.service_ids = vec![*service_id];
                query.add_on_ids = add_on_ids.clone();
            }
            Offering::Package { package_id } => query.package_id = Some(*package_id),
        }
        query.home_service = self.venue == Venue::Home;
        query.wedding_service = self.venue == Venue::Wedding;
        query.location = self.location.as_ref().and_then(|l| l.coordinates);
        Ok(query)
    }

    /// Start a fetch for `date`. Any earlier ticket becomes outdated.
    pub fn begin_fetch(&mut self, date: NaiveDate) -> Result<FetchTicket, EngineError> {
        let query = self.slot_query(date)?;
        if self.date != Some(date) {
            self.chosen = None;
        }
        self.date = Some(date);
        self.fetch_generation += 1;
        Ok(FetchTicket {
            generation: self.fetch_generation,
            query,
        })
    }

    /// Apply a fetch result. Returns `Ok(false)` when the ticket is outdated
    /// and the result was discarded.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<SlotListing, EngineError>,
    ) -> Result<bool, EngineError> {
        if ticket.generation != self.fetch_generation {
            debug!(generation = ticket.generation, "discarding late slot listing");
            return Ok(false);
        }
        let listing = result?;
        if let Some(view) = self.view {
            self.freshness.record_fetch(view, listing.fetched_at);
        }
        // A chosen slot that vanished from the listing stays chosen only if we hold it.
        if let Some(chosen) = &self.chosen
            && self.reservations.active().is_none()
            && !listing.slots.iter().any(|s| s.start == chosen.start)
        {
            self.chosen = None;
        }
        self.listing = Some(listing);
        Ok(true)
    }

    pub async fn fetch_slots(&mut self, date: NaiveDate) -> Result<&[TimeSlot], EngineError> {
        let ticket = self.begin_fetch(date)?;
        let result = bounded(
            self.config.request_timeout,
            "fetch slots",
            self.backend.get_slots(ticket.query.clone()),
        )
        .await;
        self.complete_fetch(ticket, result)?;
        Ok(self.slots())
    }

    /// Reserve `slot`. On conflict or expiry the slot is dropped and the
    /// listing refreshed; another slot is never picked on the user's behalf.
    pub async fn choose_slot(&mut self, slot: TimeSlot) -> Result<LockGrant, EngineError> {
        if self.step != Step::SlotSelection {
            return Err(EngineError::Validation("not choosing a slot".into()));
        }
        let date = self
            .date
            .ok_or_else(|| EngineError::Validation("load slots for a date first".into()))?;
        let target = self.lock_target(date, &slot)?;

        self.chosen = None;
        match self.reservations.acquire(target).await {
            Ok(grant) => {
                self.chosen = Some(slot);
                Ok(grant)
            }
            Err(e) => {
                if e.recovery() == Recovery::Reselect {
                    info!(start = %format_hhmm(slot.start), "slot taken, refreshing");
                    if let Err(refetch) = self.fetch_slots(date).await {
                        warn!("refresh after conflict failed: {refetch}");
                    }
                }
                Err(e)
            }
        }
    }

    fn lock_target(&self, date: NaiveDate, slot: &TimeSlot) -> Result<LockTarget, EngineError> {
        let staff = self
            .staff
            .ok_or_else(|| EngineError::Validation("choose a professional".into()))?;
        match self.offering.as_ref() {
            Some(Offering::Service {
                service_id,
                add_on_ids,
            }) => Ok(LockTarget::Service {
                vendor_id: self.vendor_id,
                staff,
                service_id: *service_id,
                add_on_ids: add_on_ids.clone(),
                date,
                span: slot.span(),
                amount_cents: None,
            }),
            Some(Offering::Package { package_id }) => Ok(LockTarget::Package {
                package_id: *package_id,
                date,
                start: slot.start,
            }),
            None => Err(EngineError::Validation("choose a service or package".into())),
        }
    }

    // ── Confirmation ─────────────────────────────────────────

    pub async fn confirm(&mut self) -> Result<Appointment, EngineError> {
        if self.step != Step::Confirmation {
            return Err(EngineError::Validation("nothing to confirm yet".into()));
        }
        match self.reservations.confirm().await {
            Ok(appointment) => {
                self.chosen = None;
                self.booked = Some(appointment.clone());
                self.freshness.notify_booking_confirmed();
                Ok(appointment)
            }
            Err(e) if e.recovery() == Recovery::Reselect => {
                warn!("booking not confirmed: {e}");
                self.chosen = None;
                self.enter(Step::SlotSelection);
                if let Some(date) = self.date
                    && let Err(refetch) = self.fetch_slots(date).await
                {
                    warn!("refresh after failed confirm: {refetch}");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ── Freshness ────────────────────────────────────────────

    pub fn notify_foreground(&self) {
        self.freshness.notify_foreground();
    }

    /// Re-fetch the open view when a booking lands for this vendor.
    pub fn follow_events(&self, events: broadcast::Receiver<Event>) {
        if let Some(view) = self.view {
            self.freshness.follow_events(view, events);
        }
    }

    pub async fn next_refetch(&mut self) -> Option<RefetchRequest> {
        self.refetch_rx.recv().await
    }

    /// Act on a refetch request. Returns `Ok(true)` if the listing was
    /// reloaded. Interval refresh failures are logged, not returned.
    pub async fn handle_refetch(&mut self, request: RefetchRequest) -> Result<bool, EngineError> {
        if self.view != Some(request.view) || !self.freshness.is_active(request.view) {
            return Ok(false);
        }
        let Some(date) = self.date else {
            return Ok(false);
        };
        match self.fetch_slots(date).await {
            Ok(_) => Ok(true),
            Err(e) if request.reason == RefetchReason::Interval => {
                warn!("background slot refresh failed: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Release the lock and stop every timer. Safe to call more than once.
    pub async fn end(&mut self) {
        let _ = self.reservations.release().await;
        self.view = None;
        self.freshness.shutdown();
    }
}

fn check_location(location: &Location) -> Result<(), EngineError> {
    if location.address.trim().is_empty() {
        return Err(EngineError::Validation("address is incomplete".into()));
    }
    match location.coordinates {
        Some((lat, lng)) if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) => {
            Ok(())
        }
        Some(_) => Err(EngineError::Validation("coordinates out of range".into())),
        None => Err(EngineError::Validation("address could not be located".into())),
    }
}
