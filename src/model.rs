use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every timestamp in the crate uses it.
pub type Ms = i64;

/// One day in ms.
pub const DAY_MS: Ms = 86_400_000;

/// Closed interval `[from, until]`. Touching endpoints overlap. Not checked
/// on construction; operations taking a window reject inverted ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub from: Ms,
    pub until: Ms,
}

impl Window {
    pub fn new(from: Ms, until: Ms) -> Self {
        Self { from, until }
    }

    pub fn duration_ms(&self) -> Ms {
        self.until - self.from
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.from <= other.until && other.from <= self.until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BedStatus {
    Vacant,
    Occupied,
    Reserved,
    Maintenance,
    Dirty,
}

impl BedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BedStatus::Vacant => "vacant",
            BedStatus::Occupied => "occupied",
            BedStatus::Reserved => "reserved",
            BedStatus::Maintenance => "maintenance",
            BedStatus::Dirty => "dirty",
        }
    }
}

impl std::fmt::Display for BedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BedCategory {
    General,
    Icu,
    HighDependency,
    Pediatric,
    Maternity,
    Isolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bed {
    pub id: Ulid,
    /// Unique within the facility.
    pub bed_number: String,
    pub category: BedCategory,
    pub ward_id: Ulid,
    pub floor: i32,
    pub status: BedStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionStatus {
    Admitted,
    Discharged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub id: Ulid,
    pub bed_id: Ulid,
    pub patient_id: Ulid,
    /// Admitting clinician.
    pub admitted_by: Ulid,
    pub admitted_at: Ms,
    pub discharged_at: Option<Ms>,
    pub status: AdmissionStatus,
}

impl Admission {
    /// Holds the bed: admitted and not yet discharged.
    pub fn is_active(&self) -> bool {
        self.status == AdmissionStatus::Admitted && self.discharged_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
    Fulfilled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub bed_id: Ulid,
    pub patient_id: Ulid,
    pub window: Window,
    pub admission_id: Option<Ulid>,
    pub status: ReservationStatus,
    pub created_by: Option<String>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

/// How a patient left a bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Departure {
    Discharged,
    TransferredOut { to_bed: Ulid },
}

/// One patient's occupancy of one bed. Admissions that transfer produce one
/// stay per bed they passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub admission_id: Ulid,
    pub patient_id: Ulid,
    pub admitted_by: Ulid,
    pub from: Ms,
    pub until: Option<Ms>,
    pub arrived_from: Option<Ulid>,
    pub departure: Option<Departure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub admission_id: Ulid,
    pub patient_id: Ulid,
    pub from_bed: Ulid,
    pub to_bed: Ulid,
    pub at: Ms,
    pub reason: Option<String>,
    pub actor: Option<String>,
}

/// Everything the engine knows about one bed. The unit of locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedState {
    pub bed: Bed,
    /// Admissions currently referencing this bed, in admission order.
    pub admissions: Vec<Admission>,
    /// All reservations ever placed on this bed, sorted by `window.from`.
    pub reservations: Vec<Reservation>,
    /// Occupancy ledger, chronological.
    pub stays: Vec<Stay>,
    /// Transfers in and out, chronological.
    pub transfers: Vec<TransferRecord>,
}

impl BedState {
    pub fn new(bed: Bed) -> Self {
        Self {
            bed,
            admissions: Vec::new(),
            reservations: Vec::new(),
            stays: Vec::new(),
            transfers: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by window.from.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.window.from, |r| r.window.from)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Active reservations whose window overlaps `query` (closed intervals).
    /// Uses binary search to skip reservations starting after `query.until`.
    pub fn overlapping_reservations(&self, query: &Window) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.window.from <= query.until);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.is_active() && r.window.until >= query.from)
    }

    pub fn active_reservation_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.is_active()).count()
    }

    /// The occupying admission. If corrupted state left several, the most
    /// recently admitted wins.
    pub fn occupant(&self) -> Option<&Admission> {
        self.admissions
            .iter()
            .filter(|a| a.is_active())
            .max_by_key(|a| a.admitted_at)
    }

    pub fn admission(&self, id: Ulid) -> Option<&Admission> {
        self.admissions.iter().find(|a| a.id == id)
    }

    /// Open stay for an admission, if it is currently on this bed.
    pub fn open_stay_mut(&mut self, admission_id: Ulid) -> Option<&mut Stay> {
        self.stays
            .iter_mut()
            .rev()
            .find(|s| s.admission_id == admission_id && s.until.is_none())
    }
}

/// Why a bed changed status. Recorded for audit; never used in decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCause {
    Manual,
    DriftRepair,
}

/// One WAL record per committed mutation, side effects included.
/// One event is one atomic write: every bed-status side effect travels in
/// the same record as the fact that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BedCreated {
        bed: Bed,
    },
    BedStatusChanged {
        bed_id: Ulid,
        from: BedStatus,
        to: BedStatus,
        cause: StatusCause,
        actor: Option<String>,
        at: Ms,
    },
    /// Inserts the reservation and sets the bed to reserved.
    ReservationPlaced {
        reservation: Reservation,
    },
    /// Cancels the reservation and leaves the bed at `bed_status`.
    ReservationCancelled {
        id: Ulid,
        bed_id: Ulid,
        bed_status: BedStatus,
    },
    /// Inserts the admission, opens a stay, optionally fulfils a reservation,
    /// and sets the bed to occupied.
    PatientAdmitted {
        admission: Admission,
        fulfilled_reservation: Option<Ulid>,
    },
    /// Closes the admission and its stay; the bed goes dirty.
    PatientDischarged {
        admission_id: Ulid,
        bed_id: Ulid,
        at: Ms,
    },
    /// Moves the admission, logs the transfer on both beds, sets the new bed
    /// occupied and the old bed dirty.
    PatientTransferred {
        transfer: TransferRecord,
    },
    /// Full state of one bed. Written by compaction.
    BedSnapshot {
        state: BedState,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    Occupied,
    Reserved,
    Maintenance,
    Dirty,
}

/// What stands in the way of using a bed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Blocker {
    NotFound,
    Maintenance,
    Dirty,
    Occupied {
        admission_id: Ulid,
        patient_id: Ulid,
    },
    Reserved {
        reservation_id: Ulid,
        patient_id: Ulid,
        window: Window,
    },
}

impl Blocker {
    pub fn conflict_type(&self) -> Option<ConflictType> {
        match self {
            Blocker::NotFound => None,
            Blocker::Maintenance => Some(ConflictType::Maintenance),
            Blocker::Dirty => Some(ConflictType::Dirty),
            Blocker::Occupied { .. } => Some(ConflictType::Occupied),
            Blocker::Reserved { .. } => Some(ConflictType::Reserved),
        }
    }
}

impl std::fmt::Display for Blocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Blocker::NotFound => write!(f, "bed not found"),
            Blocker::Maintenance => write!(f, "bed is under maintenance"),
            Blocker::Dirty => write!(f, "bed is awaiting cleaning"),
            Blocker::Occupied { patient_id, .. } => {
                write!(f, "bed is occupied by patient {patient_id}")
            }
            Blocker::Reserved {
                patient_id, window, ..
            } => write!(
                f,
                "bed is reserved for patient {patient_id} from {} to {}",
                window.from, window.until
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub bed_id: Ulid,
    pub is_available: bool,
    pub blocker: Option<Blocker>,
}

impl Availability {
    pub fn available(bed_id: Ulid) -> Self {
        Self { bed_id, is_available: true, blocker: None }
    }

    pub fn blocked(bed_id: Ulid, blocker: Blocker) -> Self {
        Self { bed_id, is_available: false, blocker: Some(blocker) }
    }

    pub fn reason(&self) -> Option<String> {
        self.blocker.as_ref().map(|b| b.to_string())
    }

    pub fn conflict_type(&self) -> Option<ConflictType> {
        self.blocker.as_ref().and_then(Blocker::conflict_type)
    }
}

/// Result of re-validating an admission's exclusive claim on a bed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BedConflict {
    None,
    Occupied { admission_id: Ulid, patient_id: Ulid },
    Maintenance,
}

impl BedConflict {
    pub fn has_conflict(&self) -> bool {
        !matches!(self, BedConflict::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub admission_id: Ulid,
    pub patient_id: Ulid,
    pub admitted_by: Ulid,
    pub from: Ms,
    pub until: Option<Ms>,
    pub arrived_from: Option<Ulid>,
    pub departure: Option<Departure>,
    /// Whole days, rounded up. `None` while the patient is still in the bed.
    pub stay_days: Option<i64>,
}

impl HistoryEntry {
    pub fn from_stay(stay: &Stay) -> Self {
        Self {
            admission_id: stay.admission_id,
            patient_id: stay.patient_id,
            admitted_by: stay.admitted_by,
            from: stay.from,
            until: stay.until,
            arrived_from: stay.arrived_from,
            departure: stay.departure,
            stay_days: stay.until.map(|until| stay_days(stay.from, until)),
        }
    }
}

/// Ceiling of elapsed time over 24h.
pub fn stay_days(from: Ms, until: Ms) -> i64 {
    let elapsed = (until - from).max(0);
    (elapsed + DAY_MS - 1) / DAY_MS
}

/// One bed whose stored status disagreed with its admissions/reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRepair {
    pub bed_id: Ulid,
    pub from: BedStatus,
    pub to: BedStatus,
}
