use std::collections::HashMap;
use std::time::Instant;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{evaluate, resolve_batch};
use super::conflict::{detect, validate_query};
use super::error::ValidationError;
use super::{Engine, EngineError};

impl Engine {
    /// Can `bed_id` be used from `from` (until `to`, if given)? Without `to`
    /// only status and occupancy are checked.
    pub async fn check_availability(
        &self,
        bed_id: Ulid,
        from: Ms,
        to: Option<Ms>,
    ) -> Result<Availability, EngineError> {
        let started = Instant::now();
        let result = self.check_availability_inner(bed_id, from, to).await;
        observability::observe("check_availability", started, &result);
        result
    }

    async fn check_availability_inner(
        &self,
        bed_id: Ulid,
        from: Ms,
        to: Option<Ms>,
    ) -> Result<Availability, EngineError> {
        validate_query(from, to)?;
        let bs = self.store.get_bed(&bed_id).ok_or(EngineError::NotFound(bed_id))?;
        let guard = bs.read().await;
        Ok(evaluate(&guard, from, to, None))
    }

    /// Availability for many beds from a single sweep over their admissions
    /// and one over their reservations. Unknown ids come back as not-found
    /// entries rather than failing the batch.
    pub async fn check_availability_batch(
        &self,
        bed_ids: &[Ulid],
        from: Ms,
        to: Option<Ms>,
    ) -> Result<HashMap<Ulid, Availability>, EngineError> {
        let started = Instant::now();
        let result = self.check_availability_batch_inner(bed_ids, from, to).await;
        observability::observe("check_availability_batch", started, &result);
        result
    }

    async fn check_availability_batch_inner(
        &self,
        bed_ids: &[Ulid],
        from: Ms,
        to: Option<Ms>,
    ) -> Result<HashMap<Ulid, Availability>, EngineError> {
        validate_query(from, to)?;
        if bed_ids.len() > MAX_BATCH_IDS {
            return Err(ValidationError::LimitExceeded("too many bed ids").into());
        }
        let mut ids = bed_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(bs) = self.store.get_bed(id) {
                guards.push(bs.read_owned().await);
            }
        }
        let beds: HashMap<Ulid, &BedState> = guards.iter().map(|g| (g.bed.id, &**g)).collect();
        Ok(resolve_batch(&ids, &beds, from, to))
    }

    /// Beds in `ward_id` of `category` (either filter optional) that are
    /// available for the window, ordered by bed number.
    pub async fn find_available_beds(
        &self,
        ward_id: Option<Ulid>,
        category: Option<BedCategory>,
        from: Ms,
        to: Option<Ms>,
    ) -> Result<Vec<Bed>, EngineError> {
        let started = Instant::now();
        let result = self.find_available_beds_inner(ward_id, category, from, to).await;
        observability::observe("find_available_beds", started, &result);
        result
    }

    async fn find_available_beds_inner(
        &self,
        ward_id: Option<Ulid>,
        category: Option<BedCategory>,
        from: Ms,
        to: Option<Ms>,
    ) -> Result<Vec<Bed>, EngineError> {
        validate_query(from, to)?;
        let mut found = Vec::new();
        for id in self.store.bed_ids() {
            let Some(bs) = self.store.get_bed(&id) else { continue };
            let guard = bs.read().await;
            if ward_id.is_some_and(|w| guard.bed.ward_id != w)
                || category.is_some_and(|c| guard.bed.category != c)
            {
                continue;
            }
            if evaluate(&guard, from, to, None).is_available {
                found.push(guard.bed.clone());
            }
        }
        found.sort_by(|a, b| a.bed_number.cmp(&b.bed_number));
        Ok(found)
    }

    /// Report another active admission on the bed (any id but
    /// `admission_id`), else maintenance, else no conflict.
    pub async fn detect_conflicts(
        &self,
        bed_id: Ulid,
        admission_id: Ulid,
    ) -> Result<BedConflict, EngineError> {
        let started = Instant::now();
        let result = match self.store.get_bed(&bed_id) {
            Some(bs) => Ok(detect(&*bs.read().await, admission_id)),
            None => Err(EngineError::NotFound(bed_id)),
        };
        observability::observe("detect_conflicts", started, &result);
        result
    }

    /// Past and current occupants of a bed, newest first. `limit` defaults
    /// to 50.
    pub async fn get_bed_history(
        &self,
        bed_id: Ulid,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, EngineError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit > MAX_HISTORY_LIMIT {
            return Err(ValidationError::LimitExceeded("history limit too large").into());
        }
        let bs = self.store.get_bed(&bed_id).ok_or(EngineError::NotFound(bed_id))?;
        let guard = bs.read().await;
        let mut stays: Vec<&Stay> = guard.stays.iter().rev().collect();
        stays.sort_by_key(|s| std::cmp::Reverse(s.from));
        Ok(stays
            .into_iter()
            .take(limit)
            .map(HistoryEntry::from_stay)
            .collect())
    }

    /// Transfers into and out of a bed, newest first.
    pub async fn get_transfer_log(&self, bed_id: Ulid) -> Result<Vec<TransferRecord>, EngineError> {
        let bs = self.store.get_bed(&bed_id).ok_or(EngineError::NotFound(bed_id))?;
        let guard = bs.read().await;
        Ok(guard.transfers.iter().rev().cloned().collect())
    }
}
