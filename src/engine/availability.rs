use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Decide whether one bed can be used.
///
/// Order of checks: operational status (maintenance, dirty), then the
/// occupying admission, then reservations overlapping `[from, to]`. With no
/// `to` the reservation check is skipped entirely. `exclude` names a
/// reservation that does not count against the window (the one being
/// fulfilled).
pub fn evaluate(bs: &BedState, from: Ms, to: Option<Ms>, exclude: Option<Ulid>) -> Availability {
    let bed_id = bs.bed.id;
    match bs.bed.status {
        BedStatus::Maintenance => return Availability::blocked(bed_id, Blocker::Maintenance),
        BedStatus::Dirty => return Availability::blocked(bed_id, Blocker::Dirty),
        _ => {}
    }
    if let Some(blocker) = occupancy_blocker(bs) {
        return Availability::blocked(bed_id, blocker);
    }
    if let Some(to) = to
        && let Some(blocker) = reservation_blocker(bs, &Window::new(from, to), exclude)
    {
        return Availability::blocked(bed_id, blocker);
    }
    Availability::available(bed_id)
}

fn occupancy_blocker(bs: &BedState) -> Option<Blocker> {
    bs.occupant().map(|a| Blocker::Occupied {
        admission_id: a.id,
        patient_id: a.patient_id,
    })
}

fn reservation_blocker(bs: &BedState, window: &Window, exclude: Option<Ulid>) -> Option<Blocker> {
    bs.overlapping_reservations(window)
        .find(|r| Some(r.id) != exclude)
        .map(|r| Blocker::Reserved {
            reservation_id: r.id,
            patient_id: r.patient_id,
            window: r.window,
        })
}

fn status_blocker(bs: &BedState) -> Option<Blocker> {
    match bs.bed.status {
        BedStatus::Maintenance => Some(Blocker::Maintenance),
        BedStatus::Dirty => Some(Blocker::Dirty),
        _ => None,
    }
}

/// Resolve availability for a set of beds in two sweeps: one over
/// admissions, one over reservation windows, then merge.
///
/// `beds` holds the states that exist; every id in `ids` without a state
/// resolves to not-found. The boolean always agrees with [`evaluate`];
/// the reported blocker follows the batch precedence
/// not-found → occupied → reserved → maintenance/dirty.
pub fn resolve_batch(
    ids: &[Ulid],
    beds: &HashMap<Ulid, &BedState>,
    from: Ms,
    to: Option<Ms>,
) -> HashMap<Ulid, Availability> {
    let occupied: HashMap<Ulid, Blocker> = beds
        .iter()
        .filter_map(|(id, bs)| occupancy_blocker(bs).map(|b| (*id, b)))
        .collect();

    let reserved: HashMap<Ulid, Blocker> = match to {
        Some(to) => {
            let window = Window::new(from, to);
            beds.iter()
                .filter_map(|(id, bs)| reservation_blocker(bs, &window, None).map(|b| (*id, b)))
                .collect()
        }
        None => HashMap::new(),
    };

    let mut out = HashMap::with_capacity(ids.len());
    for &id in ids {
        let avail = match beds.get(&id) {
            None => Availability::blocked(id, Blocker::NotFound),
            Some(bs) => {
                let blocker = occupied
                    .get(&id)
                    .or_else(|| reserved.get(&id))
                    .cloned()
                    .or_else(|| status_blocker(bs));
                match blocker {
                    Some(b) => Availability::blocked(id, b),
                    None => Availability::available(id),
                }
            }
        };
        out.insert(id, avail);
    }
    out
}
