use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{detect, ensure_available, now_ms, validate_text, validate_timestamp};
use super::error::ValidationError;
use super::status::can_take_occupant;
use super::{BedGuard, Engine, EngineError};

impl Engine {
    /// Admit a patient into a bed. The only pathway, with transfer, into
    /// occupied. When `reservation_id` is given that hold is fulfilled and
    /// does not count against the bed.
    pub async fn admit_patient(
        &self,
        id: Ulid,
        bed_id: Ulid,
        patient_id: Ulid,
        admitted_by: Ulid,
        admitted_at: Ms,
        reservation_id: Option<Ulid>,
    ) -> Result<Admission, EngineError> {
        let started = Instant::now();
        let result = self
            .admit_patient_inner(id, bed_id, patient_id, admitted_by, admitted_at, reservation_id)
            .await;
        observability::observe("admit_patient", started, &result);
        result
    }

    async fn admit_patient_inner(
        &self,
        id: Ulid,
        bed_id: Ulid,
        patient_id: Ulid,
        admitted_by: Ulid,
        admitted_at: Ms,
        reservation_id: Option<Ulid>,
    ) -> Result<Admission, EngineError> {
        validate_timestamp(admitted_at)?;
        let guard = self.lock_bed(bed_id).await?;
        if guard.stays.len() >= MAX_STAYS_PER_BED {
            return Err(ValidationError::LimitExceeded("too many stays on bed").into());
        }
        if self.store.contains_entity(&id) || self.store.contains_bed(&id) {
            return Err(ValidationError::DuplicateId(id).into());
        }
        if let Some(rid) = reservation_id {
            let r = guard
                .reservations
                .iter()
                .find(|r| r.id == rid)
                .ok_or(EngineError::NotFound(rid))?;
            if !r.is_active() {
                return Err(ValidationError::ReservationNotActive(rid).into());
            }
            if r.patient_id != patient_id {
                return Err(ValidationError::PatientMismatch {
                    reservation_id: rid,
                    patient_id,
                }
                .into());
            }
        }

        ensure_available(&guard, admitted_at, Some(admitted_at), reservation_id)?;
        if !can_take_occupant(guard.bed.status) {
            return Err(ValidationError::InvalidTransition {
                bed_id,
                from: guard.bed.status,
                to: BedStatus::Occupied,
            }
            .into());
        }

        let admission = Admission {
            id,
            bed_id,
            patient_id,
            admitted_by,
            admitted_at,
            discharged_at: None,
            status: AdmissionStatus::Admitted,
        };
        let event = Event::PatientAdmitted {
            admission: admission.clone(),
            fulfilled_reservation: reservation_id,
        };
        self.commit(vec![guard], event).await?;
        info!(admission_id = %id, bed_id = %bed_id, patient_id = %patient_id, "patient admitted");
        Ok(admission)
    }

    /// Discharge a patient. The bed goes dirty and must be cleaned before
    /// reuse.
    pub async fn discharge_patient(
        &self,
        admission_id: Ulid,
        discharged_at: Ms,
    ) -> Result<Admission, EngineError> {
        let started = Instant::now();
        let result = self.discharge_patient_inner(admission_id, discharged_at).await;
        observability::observe("discharge_patient", started, &result);
        result
    }

    async fn discharge_patient_inner(
        &self,
        admission_id: Ulid,
        discharged_at: Ms,
    ) -> Result<Admission, EngineError> {
        validate_timestamp(discharged_at)?;
        let (bed_id, guard) = self.resolve_entity_write(&admission_id).await?;
        let admission = guard
            .admission(admission_id)
            .ok_or(EngineError::NotFound(admission_id))?;
        if !admission.is_active() {
            return Err(ValidationError::AdmissionNotActive(admission_id).into());
        }
        if discharged_at < admission.admitted_at {
            return Err(ValidationError::InvalidWindow {
                from: admission.admitted_at,
                until: discharged_at,
            }
            .into());
        }

        let event = Event::PatientDischarged {
            admission_id,
            bed_id,
            at: discharged_at,
        };
        let guards = self.commit(vec![guard], event).await?;
        info!(admission_id = %admission_id, bed_id = %bed_id, "patient discharged");
        guards[0]
            .admission(admission_id)
            .cloned()
            .ok_or(EngineError::NotFound(admission_id))
    }

    /// Move an admission to `new_bed_id`.
    ///
    /// The new bed must be available now. Both beds are locked for the whole
    /// check-then-write, and the admission move, the transfer log and both
    /// status changes (new → occupied, old → dirty) commit as one record.
    /// `old_bed_id` defaults to the bed the admission is on; if given it
    /// must match.
    pub async fn transfer_bed(
        &self,
        admission_id: Ulid,
        new_bed_id: Ulid,
        old_bed_id: Option<Ulid>,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<Admission, EngineError> {
        let started = Instant::now();
        let result = self
            .transfer_bed_inner(admission_id, new_bed_id, old_bed_id, reason, actor)
            .await;
        observability::observe("transfer_bed", started, &result);
        result
    }

    async fn transfer_bed_inner(
        &self,
        admission_id: Ulid,
        new_bed_id: Ulid,
        old_bed_id: Option<Ulid>,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<Admission, EngineError> {
        validate_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        validate_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        if !self.store.contains_bed(&new_bed_id) {
            return Err(EngineError::NotFound(new_bed_id));
        }

        let (current_bed_id, guards) = self.lock_transfer_pair(admission_id, new_bed_id).await?;
        if let Some(old) = old_bed_id
            && old != current_bed_id
        {
            return Err(ValidationError::WrongBed {
                admission_id,
                bed_id: old,
            }
            .into());
        }

        let (current, new) = split_pair(&guards, current_bed_id, new_bed_id)?;
        let admission = current
            .admission(admission_id)
            .ok_or(EngineError::NotFound(admission_id))?;
        if !admission.is_active() {
            return Err(ValidationError::AdmissionNotActive(admission_id).into());
        }

        let now = now_ms();
        ensure_available(new, now, None, None)?;
        detect(new, admission_id).into_error(new_bed_id)?;
        if !can_take_occupant(new.bed.status) {
            return Err(ValidationError::InvalidTransition {
                bed_id: new_bed_id,
                from: new.bed.status,
                to: BedStatus::Occupied,
            }
            .into());
        }

        let transfer = TransferRecord {
            admission_id,
            patient_id: admission.patient_id,
            from_bed: current_bed_id,
            to_bed: new_bed_id,
            at: now,
            reason,
            actor,
        };
        let guards = self
            .commit(guards, Event::PatientTransferred { transfer })
            .await?;
        info!(
            admission_id = %admission_id,
            from_bed = %current_bed_id,
            to_bed = %new_bed_id,
            "patient transferred"
        );
        let (_, new) = split_pair(&guards, current_bed_id, new_bed_id)?;
        new.admission(admission_id)
            .cloned()
            .ok_or(EngineError::NotFound(admission_id))
    }

    /// Lock the admission's current bed and the target bed together, in id
    /// order. Retries if the admission moved while we waited.
    async fn lock_transfer_pair(
        &self,
        admission_id: Ulid,
        new_bed_id: Ulid,
    ) -> Result<(Ulid, Vec<BedGuard>), EngineError> {
        loop {
            let current = self
                .store
                .get_bed_for_entity(&admission_id)
                .ok_or(EngineError::NotFound(admission_id))?;
            if current == new_bed_id {
                return Err(ValidationError::SameBed(new_bed_id).into());
            }
            let guards = self.lock_beds(&[current, new_bed_id]).await?;
            if self.store.get_bed_for_entity(&admission_id) == Some(current) {
                return Ok((current, guards));
            }
        }
    }

    pub async fn get_admission(&self, id: Ulid) -> Result<Admission, EngineError> {
        let bed_id = self
            .store
            .get_bed_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let bs = self.store.get_bed(&bed_id).ok_or(EngineError::NotFound(bed_id))?;
        let guard = bs.read().await;
        guard.admission(id).cloned().ok_or(EngineError::NotFound(id))
    }
}

fn split_pair(guards: &[BedGuard], a: Ulid, b: Ulid) -> Result<(&BedState, &BedState), EngineError> {
    Ok((find_state(guards, a)?, find_state(guards, b)?))
}

fn find_state(guards: &[BedGuard], id: Ulid) -> Result<&BedState, EngineError> {
    guards
        .iter()
        .find(|g| g.bed.id == id)
        .map(|g| &**g)
        .ok_or(EngineError::NotFound(id))
}
