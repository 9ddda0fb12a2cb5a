use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, STATUS_REPAIRS_TOTAL};

use super::conflict::{now_ms, validate_text};
use super::error::ValidationError;
use super::status::{check_manual_transition, derived_status, manual_target};
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_bed(
        &self,
        id: Ulid,
        bed_number: String,
        category: BedCategory,
        ward_id: Ulid,
        floor: i32,
    ) -> Result<Bed, EngineError> {
        let started = Instant::now();
        let result = self.create_bed_inner(id, bed_number, category, ward_id, floor).await;
        observability::observe("create_bed", started, &result);
        result
    }

    async fn create_bed_inner(
        &self,
        id: Ulid,
        bed_number: String,
        category: BedCategory,
        ward_id: Ulid,
        floor: i32,
    ) -> Result<Bed, EngineError> {
        if self.store.bed_count() >= MAX_BEDS_PER_FACILITY {
            return Err(ValidationError::LimitExceeded("too many beds").into());
        }
        if bed_number.is_empty() {
            return Err(ValidationError::LimitExceeded("bed number is empty").into());
        }
        validate_text(Some(&bed_number), MAX_BED_NUMBER_LEN, "bed number too long")?;
        if self.store.contains_bed(&id) || self.store.contains_entity(&id) {
            return Err(ValidationError::DuplicateId(id).into());
        }
        if !self.store.claim_bed_number(&bed_number, id) {
            return Err(ValidationError::DuplicateBedNumber(bed_number).into());
        }

        let bed = Bed {
            id,
            bed_number,
            category,
            ward_id,
            floor,
            status: BedStatus::Vacant,
        };
        let event = Event::BedCreated { bed: bed.clone() };
        if let Err(e) = self.commit(Vec::new(), event).await {
            self.store.release_bed_number(&bed.bed_number);
            return Err(e);
        }
        info!(bed_id = %id, bed_number = %bed.bed_number, "bed created");
        Ok(bed)
    }

    pub async fn get_bed(&self, id: Ulid) -> Result<Bed, EngineError> {
        let bs = self.store.get_bed(&id).ok_or(EngineError::NotFound(id))?;
        let guard = bs.read().await;
        Ok(guard.bed.clone())
    }

    pub async fn get_bed_by_number(&self, bed_number: &str) -> Option<Bed> {
        let id = self.store.bed_for_number(bed_number)?;
        self.get_bed(id).await.ok()
    }

    /// All beds, ordered by bed number.
    pub async fn list_beds(&self) -> Vec<Bed> {
        let mut beds = Vec::with_capacity(self.store.bed_count());
        for id in self.store.bed_ids() {
            if let Some(bs) = self.store.get_bed(&id) {
                beds.push(bs.read().await.bed.clone());
            }
        }
        beds.sort_by(|a, b| a.bed_number.cmp(&b.bed_number));
        beds
    }

    /// Manual status change (housekeeping, maintenance). Occupied is refused
    /// outright; it only arises through admission or transfer. A bed with a
    /// patient in it can only be put into maintenance, and a bed released
    /// to vacant while a hold is still pending lands on reserved.
    pub async fn update_bed_status(
        &self,
        bed_id: Ulid,
        status: BedStatus,
        actor: Option<String>,
    ) -> Result<Bed, EngineError> {
        let started = Instant::now();
        let result = self.update_bed_status_inner(bed_id, status, actor).await;
        observability::observe("update_bed_status", started, &result);
        result
    }

    async fn update_bed_status_inner(
        &self,
        bed_id: Ulid,
        status: BedStatus,
        actor: Option<String>,
    ) -> Result<Bed, EngineError> {
        if status == BedStatus::Occupied {
            return Err(ValidationError::OccupancyRequiresAdmission(bed_id).into());
        }
        validate_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        let guard = self.lock_bed(bed_id).await?;
        let from = guard.bed.status;
        check_manual_transition(bed_id, from, status)?;
        if from == status {
            return Ok(guard.bed.clone());
        }
        if status != BedStatus::Maintenance
            && let Some(a) = guard.occupant()
        {
            return Err(EngineError::Conflict {
                bed_id,
                reason: Blocker::Occupied {
                    admission_id: a.id,
                    patient_id: a.patient_id,
                },
            });
        }

        let now = now_ms();
        let to = manual_target(&guard, status, now);
        if to == from {
            return Ok(guard.bed.clone());
        }

        let event = Event::BedStatusChanged {
            bed_id,
            from,
            to,
            cause: StatusCause::Manual,
            actor,
            at: now,
        };
        let guards = self.commit(vec![guard], event).await?;
        info!(bed_id = %bed_id, %from, %to, requested = %status, "bed status changed");
        Ok(guards[0].bed.clone())
    }

    /// Recompute every bed's status from its admissions and reservations and
    /// correct the ones that drifted. Run at startup.
    pub async fn repair_status_drift(&self) -> Result<Vec<StatusRepair>, EngineError> {
        let started = Instant::now();
        let result = self.repair_status_drift_inner().await;
        observability::observe("repair_status_drift", started, &result);
        result
    }

    async fn repair_status_drift_inner(&self) -> Result<Vec<StatusRepair>, EngineError> {
        let mut repairs = Vec::new();
        for bed_id in self.store.bed_ids() {
            let guard = self.lock_bed(bed_id).await?;
            let now = now_ms();
            let from = guard.bed.status;
            let to = derived_status(&guard, now);
            if from == to {
                continue;
            }
            let event = Event::BedStatusChanged {
                bed_id,
                from,
                to,
                cause: StatusCause::DriftRepair,
                actor: None,
                at: now,
            };
            self.commit(vec![guard], event).await?;
            tracing::warn!(bed_id = %bed_id, %from, %to, "repaired bed status drift");
            metrics::counter!(STATUS_REPAIRS_TOTAL).increment(1);
            repairs.push(StatusRepair { bed_id, from, to });
        }
        Ok(repairs)
    }
}
