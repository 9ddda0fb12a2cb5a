use ulid::Ulid;

use crate::model::*;

use super::error::ValidationError;

// ── Bed status state machine ─────────────────────────────────────
//
//   {vacant, dirty, reserved} ──admit/transfer-in──▶ occupied
//   occupied ──discharge/transfer-out──▶ dirty ──housekeeping──▶ vacant
//   any ──reserve──▶ reserved ──cancel (no remaining hold)──▶ vacant
//   any ◀──manual──▶ maintenance

/// Validate a manual status request. Occupied is never reachable this way.
pub(crate) fn check_manual_transition(
    bed_id: Ulid,
    from: BedStatus,
    to: BedStatus,
) -> Result<(), ValidationError> {
    use BedStatus::*;
    if to == Occupied {
        return Err(ValidationError::OccupancyRequiresAdmission(bed_id));
    }
    let ok = match (from, to) {
        _ if from == to => true,
        (_, Maintenance) => true,
        (Maintenance, Vacant | Dirty) => true,
        (Dirty, Vacant) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidTransition { bed_id, from, to })
    }
}

/// Statuses an admission or transfer may move a bed out of.
pub(crate) fn can_take_occupant(from: BedStatus) -> bool {
    matches!(from, BedStatus::Vacant | BedStatus::Dirty | BedStatus::Reserved)
}

/// Bed status once reservation `cancelled` is no longer active. Only a
/// reserved bed with no other active hold and no occupant reverts.
pub(crate) fn status_after_cancel(bs: &BedState, cancelled: Ulid) -> BedStatus {
    let remaining = bs
        .reservations
        .iter()
        .filter(|r| r.is_active() && r.id != cancelled)
        .count();
    if bs.bed.status == BedStatus::Reserved && remaining == 0 && bs.occupant().is_none() {
        BedStatus::Vacant
    } else {
        bs.bed.status
    }
}

/// An active reservation that has not yet ended.
pub(crate) fn has_pending_reservation(bs: &BedState, now: Ms) -> bool {
    bs.reservations
        .iter()
        .any(|r| r.is_active() && r.window.until >= now)
}

/// Status a validated manual request actually lands on: a bed released to
/// vacant while it still carries a pending hold goes to reserved.
pub(crate) fn manual_target(bs: &BedState, requested: BedStatus, now: Ms) -> BedStatus {
    if requested == BedStatus::Vacant && has_pending_reservation(bs, now) {
        BedStatus::Reserved
    } else {
        requested
    }
}

/// Recompute what the stored status should be from admissions and
/// reservations. Maintenance and dirty are operational states with no
/// backing fact, so they are kept unless a patient is in the bed.
pub(crate) fn derived_status(bs: &BedState, now: Ms) -> BedStatus {
    use BedStatus::*;
    let current = bs.bed.status;
    if bs.occupant().is_some() {
        return if current == Maintenance { Maintenance } else { Occupied };
    }
    match current {
        Occupied => Dirty,
        Reserved if bs.active_reservation_count() == 0 => Vacant,
        Vacant if has_pending_reservation(bs, now) => Reserved,
        other => other,
    }
}
