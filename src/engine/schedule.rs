use chrono::NaiveDate;

use crate::model::*;

// ── Schedule resolution ───────────────────────────────────────────

/// Working ranges in force on `date`.
///
/// A staff member's own ranges for the weekday win; with none,
/// the vendor's hours for that weekday apply. A missing or unavailable vendor
/// day yields no ranges (closed, not an error).
pub fn working_ranges(
    date: NaiveDate,
    staff: Option<&StaffMember>,
    hours: &WorkingHours,
) -> Vec<TimeRange> {
    if let Some(member) = staff {
        let own = member.ranges_for(date);
        if !own.is_empty() {
            return own.to_vec();
        }
    }
    match hours.for_date(date) {
        Some(day) if day.is_available => vec![day.range],
        _ => Vec::new(),
    }
}

/// `start, start + interval, …` for every start whose `duration`-minute
/// booking ends by the range end and by midnight. Malformed ranges yield nothing.
pub fn generate_starts(range: &TimeRange, interval: Minute, duration: Minute) -> Vec<Minute> {
    if interval == 0 {
        return Vec::new();
    }
    let Some(span) = range.span() else {
        return Vec::new();
    };
    let end = span.end.min(MINUTES_PER_DAY);
    let Some(last) = end.checked_sub(duration.max(1)) else {
        return Vec::new();
    };
    (span.start..=last).step_by(interval as usize).collect()
}

/// Ordered candidate start times for `date`, before any conflict filtering.
/// Each start leaves room for `duration` minutes inside its own range.
pub fn resolve_candidates(
    date: NaiveDate,
    staff: Option<&StaffMember>,
    hours: &WorkingHours,
    interval: Minute,
    duration: Minute,
) -> Vec<Minute> {
    let mut candidates: Vec<Minute> = working_ranges(date, staff, hours)
        .iter()
        .flat_map(|range| generate_starts(range, interval, duration))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();
    candidates
}
