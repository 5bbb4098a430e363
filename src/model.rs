use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for instants: lock expiry, fetch stamps.
pub type Ms = i64;

/// Minutes since local midnight. The only time-of-day type.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open interval `[start, end)` of minutes within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` when `end <= start`.
    pub fn try_new(start: Minute, end: Minute) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A `{startTime, endTime}` pair exactly as the schedule data supplied it.
/// Nothing guarantees `start < end` here; see [`TimeRange::span`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minute,
    pub end: Minute,
}

impl TimeRange {
    pub fn new(start: Minute, end: Minute) -> Self {
        Self { start, end }
    }

    /// The range as a span, or `None` if it is empty or inverted.
    pub fn span(&self) -> Option<Span> {
        Span::try_new(self.start, self.end)
    }
}

/// Parse `HH:MM` (or `H:MM`). `24:00` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let s = s.trim();
    if s == "24:00" {
        return Some(MINUTES_PER_DAY);
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M").ok()?;
    Some(t.hour() * 60 + t.minute())
}

pub fn format_hhmm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Monday = 0 … Sunday = 6.
pub fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_monday() as usize
}

/// Parse a weekday name (`monday`, `Mon`) or index (`0` = Monday).
pub fn parse_weekday(s: &str) -> Option<usize> {
    let lower = s.trim().to_lowercase();
    if let Ok(n) = lower.parse::<usize>() {
        return (n < 7).then_some(n);
    }
    lower
        .parse::<chrono::Weekday>()
        .ok()
        .map(|w| w.num_days_from_monday() as usize)
}

// ── Schedules ─────────────────────────────────────────────────────

/// Vendor-wide hours for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub is_available: bool,
    pub range: TimeRange,
}

/// Vendor fallback schedule, indexed Monday = 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub days: [Option<DayHours>; 7],
}

impl WorkingHours {
    pub fn for_date(&self, date: NaiveDate) -> Option<&DayHours> {
        self.days[weekday_index(date)].as_ref()
    }
}

/// Per-staff weekly ranges, indexed Monday = 0. An empty day means "use vendor hours".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub days: [Vec<TimeRange>; 7],
}

/// Ad-hoc unavailability of one staff member on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTime {
    pub id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffMember {
    pub id: Ulid,
    pub name: Option<String>,
    pub schedule: WeeklySchedule,
    pub blocked: Vec<BlockedTime>,
}

impl StaffMember {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            schedule: WeeklySchedule::default(),
            blocked: Vec::new(),
        }
    }

    pub fn ranges_for(&self, date: NaiveDate) -> &[TimeRange] {
        &self.schedule.days[weekday_index(date)]
    }

    pub fn blocked_on(&self, date: NaiveDate) -> impl Iterator<Item = &Span> {
        self.blocked
            .iter()
            .filter(move |b| b.date == date)
            .map(|b| &b.span)
    }
}

// ── Catalog ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    /// Minutes.
    pub duration: Minute,
    pub price_cents: i64,
    pub home_eligible: bool,
    pub wedding_eligible: bool,
    pub is_addon: bool,
    /// For add-ons: the service they can be selected with. `None` means any service.
    pub parent_service_id: Option<Ulid>,
}

/// A bundled multi-service booking, reserved as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: Ulid,
    pub duration: Minute,
    pub price_cents: i64,
}

// ── Appointments ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" | "confirmed" | "pending" => Some(Self::Scheduled),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    /// `None` = not yet assigned to a staff member.
    pub staff_id: Option<Ulid>,
    pub date: NaiveDate,
    pub span: Span,
    pub status: AppointmentStatus,
    pub client_id: Option<String>,
}

impl Appointment {
    /// Cancelled appointments never hold time.
    pub fn occupies(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

// ── Slots and locks ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaffSelector {
    /// "Any professional": whoever is free.
    Any,
    Staff(Ulid),
}

impl StaffSelector {
    pub fn staff_id(&self) -> Option<Ulid> {
        match self {
            StaffSelector::Any => None,
            StaffSelector::Staff(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: Minute,
    pub end: Minute,
    pub duration: Minute,
    /// Only set when aggregated across the roster.
    pub available_staff_count: Option<u32>,
}

impl TimeSlot {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    /// Single service (plus add-ons).
    Standard,
    /// Bundled package; longer hold.
    Package,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLock {
    pub id: Ulid,
    pub client_id: String,
    /// Staff member the slot is held against. `None` only for vendors without a roster.
    pub staff_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub package_id: Option<Ulid>,
    pub date: NaiveDate,
    pub span: Span,
    pub kind: LockKind,
    pub expires_at: Ms,
    /// Id the appointment will carry once the lock is confirmed.
    pub appointment_id: Ulid,
    pub amount_cents: Option<i64>,
}

impl SlotLock {
    pub fn is_expired(&self, now: Ms) -> bool {
        now >= self.expires_at
    }
}

// ── Vendor state ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VendorState {
    pub id: Ulid,
    pub name: Option<String>,
    pub working_hours: WorkingHours,
    /// Roster, in the order staff were added. "Any" assignment follows this order.
    pub staff: Vec<StaffMember>,
    pub services: HashMap<Ulid, Service>,
    pub packages: HashMap<Ulid, Package>,
    /// Sorted by `(date, span.start)`.
    pub appointments: Vec<Appointment>,
    /// Granted locks. Expired ones linger until released or reaped.
    pub locks: Vec<SlotLock>,
}

impl VendorState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            working_hours: WorkingHours::default(),
            staff: Vec::new(),
            services: HashMap::new(),
            packages: HashMap::new(),
            appointments: Vec::new(),
            locks: Vec::new(),
        }
    }

    pub fn staff_member(&self, id: &Ulid) -> Option<&StaffMember> {
        self.staff.iter().find(|s| s.id == *id)
    }

    pub fn staff_member_mut(&mut self, id: &Ulid) -> Option<&mut StaffMember> {
        self.staff.iter_mut().find(|s| s.id == *id)
    }

    /// Insert appointment maintaining sort order by `(date, start)`.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let key = (appointment.date, appointment.span.start);
        let pos = self
            .appointments
            .binary_search_by_key(&key, |a| (a.date, a.span.start))
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    /// All appointments (any status) on `date`, via binary search on the sorted list.
    pub fn appointments_on(&self, date: NaiveDate) -> &[Appointment] {
        let lo = self.appointments.partition_point(|a| a.date < date);
        let hi = self.appointments.partition_point(|a| a.date <= date);
        &self.appointments[lo..hi]
    }

    pub fn lock(&self, id: &Ulid) -> Option<&SlotLock> {
        self.locks.iter().find(|l| l.id == *id)
    }

    pub fn remove_lock(&mut self, id: &Ulid) -> Option<SlotLock> {
        let pos = self.locks.iter().position(|l| l.id == *id)?;
        Some(self.locks.remove(pos))
    }

    /// Locks on `date` that have not expired at `now`.
    pub fn live_locks_on(&self, date: NaiveDate, now: Ms) -> impl Iterator<Item = &SlotLock> {
        self.locks
            .iter()
            .filter(move |l| l.date == date && !l.is_expired(now))
    }

    /// Add-ons selectable with `service_id`.
    pub fn add_ons_for(&self, service_id: &Ulid) -> Vec<&Service> {
        let mut add_ons: Vec<&Service> = self
            .services
            .values()
            .filter(|s| s.is_addon && s.parent_service_id.is_none_or(|p| p == *service_id))
            .collect();
        add_ons.sort_by_key(|s| s.id);
        add_ons
    }
}

/// The event types. Flat, no nesting; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VendorCreated {
        id: Ulid,
        name: Option<String>,
    },
    WorkingHoursSet {
        vendor_id: Ulid,
        weekday: u8,
        hours: Option<DayHours>,
    },
    ServiceUpserted {
        vendor_id: Ulid,
        service: Service,
    },
    PackageUpserted {
        vendor_id: Ulid,
        package: Package,
    },
    StaffUpserted {
        vendor_id: Ulid,
        staff_id: Ulid,
        name: Option<String>,
    },
    StaffScheduleSet {
        vendor_id: Ulid,
        staff_id: Ulid,
        weekday: u8,
        ranges: Vec<TimeRange>,
    },
    StaffRemoved {
        vendor_id: Ulid,
        staff_id: Ulid,
    },
    TimeBlocked {
        vendor_id: Ulid,
        staff_id: Ulid,
        blocked: BlockedTime,
    },
    TimeUnblocked {
        vendor_id: Ulid,
        id: Ulid,
    },
    AppointmentRecorded {
        vendor_id: Ulid,
        appointment: Appointment,
    },
    AppointmentCancelled {
        vendor_id: Ulid,
        id: Ulid,
    },
    LockAcquired {
        vendor_id: Ulid,
        lock: SlotLock,
    },
    LockReleased {
        vendor_id: Ulid,
        id: Ulid,
    },
    LockConfirmed {
        vendor_id: Ulid,
        id: Ulid,
        appointment: Appointment,
    },
}

impl Event {
    pub fn vendor_id(&self) -> Ulid {
        match self {
            Event::VendorCreated { id, .. } => *id,
            Event::WorkingHoursSet { vendor_id, .. }
            | Event::ServiceUpserted { vendor_id, .. }
            | Event::PackageUpserted { vendor_id, .. }
            | Event::StaffUpserted { vendor_id, .. }
            | Event::StaffScheduleSet { vendor_id, .. }
            | Event::StaffRemoved { vendor_id, .. }
            | Event::TimeBlocked { vendor_id, .. }
            | Event::TimeUnblocked { vendor_id, .. }
            | Event::AppointmentRecorded { vendor_id, .. }
            | Event::AppointmentCancelled { vendor_id, .. }
            | Event::LockAcquired { vendor_id, .. }
            | Event::LockReleased { vendor_id, .. }
            | Event::LockConfirmed { vendor_id, .. } => *vendor_id,
        }
    }

    /// True for events that add an occupying appointment.
    pub fn creates_appointment(&self) -> bool {
        match self {
            Event::LockConfirmed { .. } => true,
            Event::AppointmentRecorded { appointment, .. } => appointment.occupies(),
            _ => false,
        }
    }
}

// ── Request / result types ───────────────────────────────────────

/// A `GetSlots` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotQuery {
    pub vendor_id: Ulid,
    pub date: NaiveDate,
    pub staff: StaffSelector,
    pub service_ids: Vec<Ulid>,
    pub add_on_ids: Vec<Ulid>,
    pub home_service: bool,
    pub wedding_service: bool,
    pub package_id: Option<Ulid>,
    pub location: Option<(f64, f64)>,
}

impl SlotQuery {
    pub fn new(vendor_id: Ulid, date: NaiveDate, staff: StaffSelector) -> Self {
        Self {
            vendor_id,
            date,
            staff,
            service_ids: Vec::new(),
            add_on_ids: Vec::new(),
            home_service: false,
            wedding_service: false,
            package_id: None,
            location: None,
        }
    }
}

/// Slots plus the instant they were computed.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotListing {
    pub slots: Vec<TimeSlot>,
    pub fetched_at: Ms,
}

/// An `AcquireLock` request.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRequest {
    pub lock_id: Ulid,
    pub vendor_id: Ulid,
    pub staff: StaffSelector,
    pub service_id: Ulid,
    pub add_on_ids: Vec<Ulid>,
    pub date: NaiveDate,
    pub span: Span,
    pub client_id: String,
    pub amount_cents: Option<i64>,
}

/// An `AcquirePackageLock` request.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageLockRequest {
    pub lock_id: Ulid,
    pub package_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    pub lock_id: Ulid,
    pub vendor_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub date: NaiveDate,
    pub span: Span,
    pub kind: LockKind,
    pub expires_at: Ms,
    pub appointment_id: Ulid,
}

impl LockGrant {
    pub fn from_lock(vendor_id: Ulid, lock: &SlotLock) -> Self {
        Self {
            lock_id: lock.id,
            vendor_id,
            staff_id: lock.staff_id,
            date: lock.date,
            span: lock.span,
            kind: lock.kind,
            expires_at: lock.expires_at,
            appointment_id: lock.appointment_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn appointment(d: NaiveDate, start: Minute, end: Minute) -> Appointment {
        Appointment {
            id: Ulid::new(),
            staff_id: None,
            date: d,
            span: Span::new(start, end),
            status: AppointmentStatus::Scheduled,
            client_id: None,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration(), 100);
        assert_eq!(Span::try_new(200, 100), None);
        assert_eq!(Span::try_new(100, 100), None);
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(600, 630);
        let b = Span::new(615, 645);
        let c = Span::new(630, 660);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn malformed_range_has_no_span() {
        assert_eq!(TimeRange::new(600, 600).span(), None);
        assert_eq!(TimeRange::new(700, 600).span(), None);
        assert_eq!(TimeRange::new(540, 720).span(), Some(Span::new(540, 720)));
    }

    #[test]
    fn hhmm_roundtrip_and_edges() {
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("9:05"), Some(545));
        assert_eq!(parse_hhmm("24:00"), Some(MINUTES_PER_DAY));
        assert_eq!(parse_hhmm("25:00"), None);
        assert_eq!(parse_hhmm("noon"), None);
        assert_eq!(format_hhmm(570), "09:30");
        assert_eq!(format_hhmm(0), "00:00");
    }

    #[test]
    fn weekday_parsing() {
        assert_eq!(parse_weekday("monday"), Some(0));
        assert_eq!(parse_weekday("Sun"), Some(6));
        assert_eq!(parse_weekday("3"), Some(3));
        assert_eq!(parse_weekday("7"), None);
        assert_eq!(parse_weekday("someday"), None);
        // 2026-10-19 is a Monday
        assert_eq!(weekday_index(date(2026, 10, 19)), 0);
        assert_eq!(weekday_index(date(2026, 10, 25)), 6);
    }

    #[test]
    fn appointments_stay_sorted_and_are_sliced_by_date() {
        let mut vs = VendorState::new(Ulid::new(), None);
        let mon = date(2026, 10, 19);
        let tue = date(2026, 10, 20);
        vs.insert_appointment(appointment(tue, 600, 630));
        vs.insert_appointment(appointment(mon, 700, 730));
        vs.insert_appointment(appointment(mon, 540, 570));

        assert_eq!(vs.appointments[0].span.start, 540);
        assert_eq!(vs.appointments[1].span.start, 700);
        assert_eq!(vs.appointments[2].date, tue);

        assert_eq!(vs.appointments_on(mon).len(), 2);
        assert_eq!(vs.appointments_on(tue).len(), 1);
        assert!(vs.appointments_on(date(2026, 10, 21)).is_empty());
    }

    #[test]
    fn cancelled_appointment_does_not_occupy() {
        let mut a = appointment(date(2026, 10, 19), 600, 630);
        assert!(a.occupies());
        a.status = AppointmentStatus::Cancelled;
        assert!(!a.occupies());
        a.status = AppointmentStatus::Completed;
        assert!(a.occupies());
    }

    #[test]
    fn status_parsing() {
        assert_eq!(AppointmentStatus::parse("Canceled"), Some(AppointmentStatus::Cancelled));
        assert_eq!(AppointmentStatus::parse("scheduled"), Some(AppointmentStatus::Scheduled));
        assert_eq!(AppointmentStatus::parse("nope"), None);
    }

    #[test]
    fn lock_expiry_is_inclusive_at_deadline() {
        let lock = SlotLock {
            id: Ulid::new(),
            client_id: "c".into(),
            staff_id: None,
            service_id: None,
            package_id: None,
            date: date(2026, 10, 19),
            span: Span::new(600, 630),
            kind: LockKind::Standard,
            expires_at: 1_000,
            appointment_id: Ulid::new(),
            amount_cents: None,
        };
        assert!(!lock.is_expired(999));
        assert!(lock.is_expired(1_000));
    }

    #[test]
    fn add_ons_filtered_by_parent() {
        let mut vs = VendorState::new(Ulid::new(), None);
        let cut = Ulid::new();
        let other = Ulid::new();
        let mk = |parent: Option<Ulid>| Service {
            id: Ulid::new(),
            duration: 15,
            price_cents: 500,
            home_eligible: false,
            wedding_eligible: false,
            is_addon: true,
            parent_service_id: parent,
        };
        let for_cut = mk(Some(cut));
        let for_other = mk(Some(other));
        let universal = mk(None);
        for s in [for_cut.clone(), for_other, universal.clone()] {
            vs.services.insert(s.id, s);
        }
        let ids: Vec<Ulid> = vs.add_ons_for(&cut).iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&for_cut.id));
        assert!(ids.contains(&universal.id));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::LockAcquired {
            vendor_id: Ulid::new(),
            lock: SlotLock {
                id: Ulid::new(),
                client_id: "client-1".into(),
                staff_id: Some(Ulid::new()),
                service_id: Some(Ulid::new()),
                package_id: None,
                date: date(2026, 10, 19),
                span: Span::new(600, 630),
                kind: LockKind::Standard,
                expires_at: 42,
                appointment_id: Ulid::new(),
                amount_cents: Some(4500),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
