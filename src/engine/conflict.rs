use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_BOOKING_DURATION;
use crate::model::*;

use super::EngineError;

/// Something holding time on a staff member's day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy {
    pub span: Span,
    /// Blocked-time, appointment or lock id.
    pub holder: Ulid,
}

/// How "now" restricts the candidates of a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// Future date: nothing filtered.
    Open,
    /// Today: only starts strictly after this minute survive.
    After(Minute),
    /// Past date: nothing survives.
    Closed,
}

impl Cutoff {
    pub fn for_date(date: NaiveDate, today: NaiveDate, minute_now: Minute) -> Self {
        match date.cmp(&today) {
            std::cmp::Ordering::Greater => Cutoff::Open,
            std::cmp::Ordering::Equal => Cutoff::After(minute_now),
            std::cmp::Ordering::Less => Cutoff::Closed,
        }
    }

    pub fn admits(&self, start: Minute) -> bool {
        match self {
            Cutoff::Open => true,
            Cutoff::After(now) => start > *now,
            Cutoff::Closed => false,
        }
    }
}

/// Everything occupying `staff`'s time on `date`: blocked time, non-cancelled
/// appointments assigned to them, and their live locks.
///
/// With no staff (a vendor without a roster) the vendor is a single resource
/// and every non-cancelled appointment and live lock counts.
pub fn busy_spans(
    staff: Option<&StaffMember>,
    date: NaiveDate,
    appointments: &[Appointment],
    locks: &[SlotLock],
    now: Ms,
) -> Vec<Busy> {
    let staff_id = staff.map(|s| s.id);
    let mut busy = Vec::new();

    if let Some(member) = staff {
        for b in member.blocked.iter().filter(|b| b.date == date) {
            busy.push(Busy { span: b.span, holder: b.id });
        }
    }

    for a in appointments {
        if a.date != date || !a.occupies() {
            continue;
        }
        if staff_id.is_none() || a.staff_id == staff_id {
            busy.push(Busy { span: a.span, holder: a.id });
        }
    }

    for l in locks {
        if l.date != date || l.is_expired(now) {
            continue;
        }
        if staff_id.is_none() || l.staff_id == staff_id {
            busy.push(Busy { span: l.span, holder: l.id });
        }
    }

    busy.sort_by_key(|b| b.span.start);
    busy
}

/// First busy entry overlapping `span`, using the sorted order to stop early.
fn first_overlap<'a>(busy: &'a [Busy], span: &Span) -> Option<&'a Busy> {
    let right_bound = busy.partition_point(|b| b.span.start < span.end);
    busy[..right_bound].iter().find(|b| b.span.end > span.start)
}

/// Turn candidate starts into bookable slots of `duration` minutes.
///
/// A candidate survives if `[start, start + duration)` overlaps nothing in
/// `busy` (sorted by start) and the cutoff admits its start.
pub fn filter_candidates(
    candidates: &[Minute],
    duration: Minute,
    busy: &[Busy],
    cutoff: Cutoff,
) -> Vec<TimeSlot> {
    if duration == 0 || cutoff == Cutoff::Closed {
        return Vec::new();
    }
    candidates
        .iter()
        .filter(|&&start| cutoff.admits(start))
        .map(|&start| Span::new(start, start + duration))
        .filter(|span| first_overlap(busy, span).is_none())
        .map(|span| TimeSlot {
            start: span.start,
            end: span.end,
            duration,
            available_staff_count: None,
        })
        .collect()
}

pub(crate) fn validate_duration(duration: Minute) -> Result<(), EngineError> {
    if duration == 0 {
        return Err(EngineError::Validation("duration must be positive".into()));
    }
    if duration > MAX_BOOKING_DURATION {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation("slot end must be after start".into()));
    }
    if span.start >= MINUTES_PER_DAY {
        return Err(EngineError::Validation("slot must start within the day".into()));
    }
    if span.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation("slot must end by midnight".into()));
    }
    validate_duration(span.duration())
}

/// Reject `span` if anything in `busy` overlaps it.
pub(crate) fn check_no_conflict(
    busy: &[Busy],
    staff_id: Option<Ulid>,
    span: &Span,
) -> Result<(), EngineError> {
    match first_overlap(busy, span) {
        Some(b) => Err(EngineError::Conflict {
            staff_id,
            span: *span,
            holder: Some(b.holder),
        }),
        None => Ok(()),
    }
}
