use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{ensure_available, validate_reservation_window, validate_text};
use super::error::ValidationError;
use super::status::status_after_cancel;
use super::{Engine, EngineError};

impl Engine {
    /// Place a hold on `bed_id` for `window`.
    ///
    /// Availability is re-verified under the bed's write lock, so of two
    /// racing reservations for overlapping windows exactly one commits; the
    /// other gets `Conflict`. The bed is set to reserved regardless of any
    /// other holds it carries.
    pub async fn reserve_bed(
        &self,
        id: Ulid,
        bed_id: Ulid,
        patient_id: Ulid,
        window: Window,
        admission_id: Option<Ulid>,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self
            .reserve_bed_inner(id, bed_id, patient_id, window, admission_id, actor)
            .await;
        observability::observe("reserve_bed", started, &result);
        result
    }

    async fn reserve_bed_inner(
        &self,
        id: Ulid,
        bed_id: Ulid,
        patient_id: Ulid,
        window: Window,
        admission_id: Option<Ulid>,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        validate_reservation_window(&window)?;
        validate_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;

        let guard = self.lock_bed(bed_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_BED {
            return Err(ValidationError::LimitExceeded("too many reservations on bed").into());
        }
        if self.store.contains_entity(&id) || self.store.contains_bed(&id) {
            return Err(ValidationError::DuplicateId(id).into());
        }
        ensure_available(&guard, window.from, Some(window.until), None)?;

        let reservation = Reservation {
            id,
            bed_id,
            patient_id,
            window,
            admission_id,
            status: ReservationStatus::Active,
            created_by: actor,
        };
        let event = Event::ReservationPlaced {
            reservation: reservation.clone(),
        };
        self.commit(vec![guard], event).await?;
        info!(reservation_id = %id, bed_id = %bed_id, from = window.from, until = window.until, "bed reserved");
        Ok(reservation)
    }

    /// Cancel an active reservation. The bed reverts to vacant only when no
    /// other active reservation and no occupant remain.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.cancel_reservation_inner(id).await;
        observability::observe("cancel_reservation", started, &result);
        result
    }

    async fn cancel_reservation_inner(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (bed_id, guard) = self.resolve_entity_write(&id).await?;
        let reservation = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;
        if !reservation.is_active() {
            return Err(ValidationError::ReservationNotActive(id).into());
        }
        let bed_status = status_after_cancel(&guard, id);

        let event = Event::ReservationCancelled { id, bed_id, bed_status };
        let guards = self.commit(vec![guard], event).await?;
        info!(reservation_id = %id, bed_id = %bed_id, %bed_status, "reservation cancelled");
        guards[0]
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let bed_id = self
            .store
            .get_bed_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let bs = self.store.get_bed(&bed_id).ok_or(EngineError::NotFound(bed_id))?;
        let guard = bs.read().await;
        guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Every reservation on a bed (any status), ordered by window start.
    pub async fn get_reservations(&self, bed_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let bs = self.store.get_bed(&bed_id).ok_or(EngineError::NotFound(bed_id))?;
        let guard = bs.read().await;
        Ok(guard.reservations.clone())
    }
}
