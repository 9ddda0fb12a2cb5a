use ulid::Ulid;

use crate::model::{BedStatus, Blocker, Ms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidWindow { from: Ms, until: Ms },
    TimestampOutOfRange(Ms),
    /// Occupancy only arises through admission or transfer, never by a
    /// direct status write.
    OccupancyRequiresAdmission(Ulid),
    InvalidTransition { bed_id: Ulid, from: BedStatus, to: BedStatus },
    DuplicateId(Ulid),
    DuplicateBedNumber(String),
    ReservationNotActive(Ulid),
    AdmissionNotActive(Ulid),
    /// The admission is not on the bed the caller named.
    WrongBed { admission_id: Ulid, bed_id: Ulid },
    SameBed(Ulid),
    /// The reservation being fulfilled was made for another patient.
    PatientMismatch { reservation_id: Ulid, patient_id: Ulid },
    LimitExceeded(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidWindow { from, until } => {
                write!(f, "invalid window [{from}, {until}]")
            }
            ValidationError::TimestampOutOfRange(t) => write!(f, "timestamp out of range: {t}"),
            ValidationError::OccupancyRequiresAdmission(id) => write!(
                f,
                "bed {id} cannot be set to occupied directly; admit or transfer a patient"
            ),
            ValidationError::InvalidTransition { bed_id, from, to } => {
                write!(f, "bed {bed_id}: invalid status transition {from} -> {to}")
            }
            ValidationError::DuplicateId(id) => write!(f, "already exists: {id}"),
            ValidationError::DuplicateBedNumber(n) => write!(f, "bed number already in use: {n}"),
            ValidationError::ReservationNotActive(id) => write!(f, "reservation {id} is not active"),
            ValidationError::AdmissionNotActive(id) => write!(f, "admission {id} is not active"),
            ValidationError::WrongBed { admission_id, bed_id } => {
                write!(f, "admission {admission_id} is not on bed {bed_id}")
            }
            ValidationError::SameBed(id) => write!(f, "admission is already on bed {id}"),
            ValidationError::PatientMismatch { reservation_id, patient_id } => write!(
                f,
                "reservation {reservation_id} is not held for patient {patient_id}"
            ),
            ValidationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

/// Boundary classification: domain failures map to client errors, storage
/// failures to server errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    Validation(ValidationError),
    Conflict { bed_id: Ulid, reason: Blocker },
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Storage
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Validation(e) => write!(f, "validation error: {e}"),
            EngineError::Conflict { bed_id, reason } => {
                write!(f, "conflict on bed {bed_id}: {reason}")
            }
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
