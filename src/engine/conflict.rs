use ulid::Ulid;

use crate::model::*;

use super::availability::evaluate;
use super::error::ValidationError;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_timestamp(t: Ms) -> Result<(), ValidationError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(ValidationError::TimestampOutOfRange(t));
    }
    Ok(())
}

/// Read-side window check: only ordering matters.
pub(crate) fn validate_query(from: Ms, to: Option<Ms>) -> Result<(), ValidationError> {
    if let Some(to) = to
        && to < from
    {
        return Err(ValidationError::InvalidWindow { from, until: to });
    }
    Ok(())
}

/// Write-side window check for reservations: strictly ordered, in range,
/// bounded length.
pub(crate) fn validate_reservation_window(window: &Window) -> Result<(), ValidationError> {
    use crate::limits::*;
    if window.until <= window.from {
        return Err(ValidationError::InvalidWindow {
            from: window.from,
            until: window.until,
        });
    }
    validate_timestamp(window.from)?;
    validate_timestamp(window.until)?;
    if window.duration_ms() > MAX_RESERVATION_MS {
        return Err(ValidationError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), ValidationError> {
    if let Some(v) = value
        && v.len() > max
    {
        return Err(ValidationError::LimitExceeded(what));
    }
    Ok(())
}

/// Fail with `Conflict` unless the bed passes the availability check.
pub(crate) fn ensure_available(
    bs: &BedState,
    from: Ms,
    to: Option<Ms>,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let avail = evaluate(bs, from, to, exclude);
    match avail.blocker {
        None => Ok(()),
        Some(reason) => Err(EngineError::Conflict {
            bed_id: bs.bed.id,
            reason,
        }),
    }
}

/// Any other active admission on the bed, else maintenance, else clear.
pub(crate) fn detect(bs: &BedState, admission_id: Ulid) -> BedConflict {
    let other = bs
        .admissions
        .iter()
        .filter(|a| a.is_active() && a.id != admission_id)
        .max_by_key(|a| a.admitted_at);
    if let Some(a) = other {
        return BedConflict::Occupied {
            admission_id: a.id,
            patient_id: a.patient_id,
        };
    }
    if bs.bed.status == BedStatus::Maintenance {
        return BedConflict::Maintenance;
    }
    BedConflict::None
}

impl BedConflict {
    /// Express a detected conflict as the error a write path returns.
    pub(crate) fn into_error(self, bed_id: Ulid) -> Result<(), EngineError> {
        let reason = match self {
            BedConflict::None => return Ok(()),
            BedConflict::Occupied { admission_id, patient_id } => Blocker::Occupied { admission_id, patient_id },
            BedConflict::Maintenance => Blocker::Maintenance,
        };
        Err(EngineError::Conflict { bed_id, reason })
    }
}
