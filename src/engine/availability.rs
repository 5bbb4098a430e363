use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{busy_spans, filter_candidates, validate_duration, Cutoff};
use super::schedule::resolve_candidates;
use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// Bookable slots for one staff member, or for the whole vendor when it has no roster.
pub fn staff_slots(
    vendor: &VendorState,
    staff: Option<&StaffMember>,
    date: NaiveDate,
    duration: Minute,
    interval: Minute,
    cutoff: Cutoff,
    now: Ms,
) -> Vec<TimeSlot> {
    let candidates = resolve_candidates(date, staff, &vendor.working_hours, interval, duration);
    if candidates.is_empty() {
        return Vec::new();
    }
    let busy = busy_spans(staff, date, vendor.appointments_on(date), &vendor.locks, now);
    filter_candidates(&candidates, duration, &busy, cutoff)
}

/// Time held on `date` without a staff assignment: unassigned non-cancelled
/// appointments and live locks that carry no staff member.
pub fn unassigned_spans(vendor: &VendorState, date: NaiveDate, now: Ms) -> Vec<Span> {
    let mut spans: Vec<Span> = vendor
        .appointments_on(date)
        .iter()
        .filter(|a| a.staff_id.is_none() && a.occupies())
        .map(|a| a.span)
        .collect();
    spans.extend(
        vendor
            .live_locks_on(date, now)
            .filter(|l| l.staff_id.is_none())
            .map(|l| l.span),
    );
    spans.sort_by_key(|s| s.start);
    spans
}

/// "Any professional" aggregation.
///
/// A start survives if at least one staff member has it; its count is the
/// number of staff offering it, minus one for every unassigned span that
/// overlaps the slot. Starts whose count reaches zero are dropped.
pub fn merge_by_start(per_staff: &[Vec<TimeSlot>], unassigned: &[Span]) -> Vec<TimeSlot> {
    let mut merged: BTreeMap<Minute, (TimeSlot, u32)> = BTreeMap::new();
    for slots in per_staff {
        for slot in slots {
            merged
                .entry(slot.start)
                .and_modify(|(_, count)| *count += 1)
                .or_insert((*slot, 1));
        }
    }

    merged
        .into_values()
        .filter_map(|(slot, offered)| {
            let span = slot.span();
            let taken = unassigned.iter().filter(|u| u.overlaps(&span)).count() as u32;
            let remaining = offered.saturating_sub(taken);
            (remaining > 0).then_some(TimeSlot {
                available_staff_count: Some(remaining),
                ..slot
            })
        })
        .collect()
}

/// Total minutes to reserve for a query: package duration, or the selected
/// services plus their add-ons. Checks eligibility flags along the way.
pub fn effective_duration(
    vendor: &VendorState,
    service_ids: &[Ulid],
    add_on_ids: &[Ulid],
    package_id: Option<Ulid>,
    home_service: bool,
    wedding_service: bool,
) -> Result<Minute, EngineError> {
    if let Some(pid) = package_id {
        let package = vendor
            .packages
            .get(&pid)
            .ok_or_else(|| EngineError::Resolution(format!("unknown package {pid}")))?;
        validate_duration(package.duration)?;
        return Ok(package.duration);
    }

    if service_ids.is_empty() {
        return Err(EngineError::Validation("no service selected".into()));
    }

    let mut total: Minute = 0;
    for sid in service_ids {
        let service = vendor
            .services
            .get(sid)
            .ok_or_else(|| EngineError::Resolution(format!("unknown service {sid}")))?;
        if service.is_addon {
            return Err(EngineError::Validation(format!(
                "{sid} is an add-on, not a service"
            )));
        }
        if home_service && !service.home_eligible {
            return Err(EngineError::Validation(format!(
                "service {sid} is not offered at home"
            )));
        }
        if wedding_service && !service.wedding_eligible {
            return Err(EngineError::Validation(format!(
                "service {sid} is not offered for weddings"
            )));
        }
        total = total.saturating_add(service.duration);
    }

    for aid in add_on_ids {
        let add_on = vendor
            .services
            .get(aid)
            .ok_or_else(|| EngineError::Resolution(format!("unknown add-on {aid}")))?;
        if !add_on.is_addon {
            return Err(EngineError::Validation(format!("{aid} is not an add-on")));
        }
        if let Some(parent) = add_on.parent_service_id
            && !service_ids.contains(&parent)
        {
            return Err(EngineError::Validation(format!(
                "add-on {aid} does not belong to the selected services"
            )));
        }
        total = total.saturating_add(add_on.duration);
    }

    validate_duration(total)?;
    Ok(total)
}
