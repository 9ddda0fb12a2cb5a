use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::SharedBedState;

/// In-memory side of the facility store: bed states plus the indexes that
/// resolve admissions, reservations and bed numbers to their bed.
pub struct BedStore {
    beds: DashMap<Ulid, SharedBedState>,
    entity_to_bed: DashMap<Ulid, Ulid>,
    bed_numbers: DashMap<String, Ulid>,
    /// Every bed, admission and reservation id in use, including ones
    /// claimed by a commit still waiting on the WAL.
    ids: DashSet<Ulid>,
}

impl Default for BedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BedStore {
    pub fn new() -> Self {
        Self {
            beds: DashMap::new(),
            entity_to_bed: DashMap::new(),
            bed_numbers: DashMap::new(),
            ids: DashSet::new(),
        }
    }

    // ── Beds ─────────────────────────────────────────────────

    pub fn bed_count(&self) -> usize {
        self.beds.len()
    }

    pub fn contains_bed(&self, id: &Ulid) -> bool {
        self.beds.contains_key(id)
    }

    pub fn get_bed(&self, id: &Ulid) -> Option<SharedBedState> {
        self.beds.get(id).map(|e| e.value().clone())
    }

    pub fn insert_bed(&self, id: Ulid, state: SharedBedState) {
        self.beds.insert(id, state);
    }

    pub fn bed_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.beds.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Bed number index ─────────────────────────────────────

    /// Claim a bed number for `bed_id`. Returns false if the number is
    /// already held, even by the same id.
    pub fn claim_bed_number(&self, bed_number: &str, bed_id: Ulid) -> bool {
        match self.bed_numbers.entry(bed_number.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(bed_id);
                true
            }
        }
    }

    pub fn release_bed_number(&self, bed_number: &str) {
        self.bed_numbers.remove(bed_number);
    }

    pub fn bed_for_number(&self, bed_number: &str) -> Option<Ulid> {
        self.bed_numbers.get(bed_number).map(|e| *e.value())
    }

    // ── Id registry ──────────────────────────────────────────

    /// Reserve `id` for a record about to be written. Returns false if any
    /// bed, admission or reservation already uses it.
    pub fn claim_id(&self, id: Ulid) -> bool {
        self.ids.insert(id)
    }

    pub fn release_id(&self, id: &Ulid) {
        self.ids.remove(id);
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn get_bed_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_bed.get(entity_id).map(|e| *e.value())
    }

    pub fn contains_entity(&self, entity_id: &Ulid) -> bool {
        self.entity_to_bed.contains_key(entity_id)
    }

    fn map_entity(&self, entity_id: Ulid, bed_id: Ulid) {
        self.ids.insert(entity_id);
        self.entity_to_bed.insert(entity_id, bed_id);
    }

    /// Index a freshly created or snapshotted bed state.
    pub fn install(&self, bs: &BedState) {
        self.ids.insert(bs.bed.id);
        self.bed_numbers.insert(bs.bed.bed_number.clone(), bs.bed.id);
        for a in &bs.admissions {
            self.map_entity(a.id, bs.bed.id);
        }
        for r in &bs.reservations {
            self.map_entity(r.id, bs.bed.id);
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply a single-bed event. Caller holds the bed's write lock.
    /// `BedCreated`, `BedSnapshot` and `PatientTransferred` are handled by
    /// [`Self::install`] and [`Self::apply_transfer`].
    pub fn apply_event(&self, bs: &mut BedState, event: &Event) {
        match event {
            Event::BedStatusChanged { to, .. } => {
                bs.bed.status = *to;
            }
            Event::ReservationPlaced { reservation } => {
                bs.insert_reservation(reservation.clone());
                bs.bed.status = BedStatus::Reserved;
                self.map_entity(reservation.id, bs.bed.id);
            }
            Event::ReservationCancelled { id, bed_status, .. } => {
                if let Some(r) = bs.reservation_mut(*id) {
                    r.status = ReservationStatus::Cancelled;
                }
                bs.bed.status = *bed_status;
            }
            Event::PatientAdmitted {
                admission,
                fulfilled_reservation,
            } => {
                if let Some(rid) = fulfilled_reservation
                    && let Some(r) = bs.reservation_mut(*rid)
                {
                    r.status = ReservationStatus::Fulfilled;
                    r.admission_id = Some(admission.id);
                }
                bs.stays.push(Stay {
                    admission_id: admission.id,
                    patient_id: admission.patient_id,
                    admitted_by: admission.admitted_by,
                    from: admission.admitted_at,
                    until: None,
                    arrived_from: None,
                    departure: None,
                });
                bs.admissions.push(admission.clone());
                bs.bed.status = BedStatus::Occupied;
                self.map_entity(admission.id, bs.bed.id);
            }
            Event::PatientDischarged { admission_id, at, .. } => {
                if let Some(a) = bs.admissions.iter_mut().find(|a| a.id == *admission_id) {
                    a.discharged_at = Some(*at);
                    a.status = AdmissionStatus::Discharged;
                }
                if let Some(stay) = bs.open_stay_mut(*admission_id) {
                    stay.until = Some(*at);
                    stay.departure = Some(Departure::Discharged);
                }
                bs.bed.status = BedStatus::Dirty;
            }
            Event::BedCreated { .. } | Event::BedSnapshot { .. } | Event::PatientTransferred { .. } => {}
        }
    }

    /// Apply a transfer to both beds. Caller holds both write locks.
    pub fn apply_transfer(&self, from: &mut BedState, to: &mut BedState, transfer: &TransferRecord) {
        let Some(pos) = from
            .admissions
            .iter()
            .position(|a| a.id == transfer.admission_id)
        else {
            return;
        };
        let mut admission = from.admissions.remove(pos);
        admission.bed_id = to.bed.id;

        let admitted_by = admission.admitted_by;
        if let Some(stay) = from.open_stay_mut(transfer.admission_id) {
            stay.until = Some(transfer.at);
            stay.departure = Some(Departure::TransferredOut { to_bed: to.bed.id });
        }
        to.stays.push(Stay {
            admission_id: admission.id,
            patient_id: admission.patient_id,
            admitted_by,
            from: transfer.at,
            until: None,
            arrived_from: Some(from.bed.id),
            departure: None,
        });
        to.admissions.push(admission);

        from.transfers.push(transfer.clone());
        to.transfers.push(transfer.clone());

        to.bed.status = BedStatus::Occupied;
        from.bed.status = BedStatus::Dirty;
        self.map_entity(transfer.admission_id, to.bed.id);
    }
}
