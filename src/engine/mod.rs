mod admissions;
mod availability;
mod conflict;
mod error;
mod queries;
mod registry;
mod reservations;
mod status;
mod store;

pub use availability::{evaluate, resolve_batch};
pub use error::{EngineError, ErrorKind, ValidationError};
pub use store::BedStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedBedState = Arc<RwLock<BedState>>;
pub(crate) type BedGuard = OwnedRwLockWriteGuard<BedState>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::error!(batch = batch.len(), "WAL flush failed: {e}");
                }
                respond_batch(batch, &result);

                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mark = wal.mark()?;
    let mut appended = 0u64;
    let mut result = Ok(());
    for (event, _) in batch {
        result = wal.append_buffered(event);
        if result.is_err() {
            break;
        }
        appended += 1;
    }
    if result.is_ok() {
        result = wal.flush_sync();
    }
    // Every caller in the batch sees the error, so none of its records may
    // survive into the log.
    if result.is_err()
        && let Err(e) = wal.rollback(mark, appended)
    {
        tracing::error!(len = mark, "WAL rollback failed: {e}");
    }
    result
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Storage(e.to_string()))
}

/// One facility's bed store: in-memory state, indexes, and its WAL.
pub struct Engine {
    pub(super) store: Arc<BedStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Commits that add beds take this shared; compaction takes it exclusively
    /// so the snapshot it writes covers every bed in the log.
    pub(super) bed_set: Arc<RwLock<()>>,
}

/// Apply an event to locked bed states. `BedCreated` and `BedSnapshot`
/// install a new bed instead.
fn apply_locked(store: &BedStore, guards: &mut [BedGuard], event: &Event) {
    match event {
        Event::BedCreated { bed } => install(store, BedState::new(bed.clone())),
        Event::BedSnapshot { state } => install(store, state.clone()),
        Event::PatientTransferred { transfer } => {
            if let Some((from, to)) = pair_mut(guards, transfer.from_bed, transfer.to_bed) {
                store.apply_transfer(from, to, transfer);
            }
        }
        other => {
            if let Some(bed_id) = event_bed_id(other)
                && let Some(guard) = guards.iter_mut().find(|g| g.bed.id == bed_id)
            {
                store.apply_event(guard, other);
            }
        }
    }
}

/// Id of the record an event introduces, if any.
fn event_new_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BedCreated { bed } => Some(bed.id),
        Event::ReservationPlaced { reservation } => Some(reservation.id),
        Event::PatientAdmitted { admission, .. } => Some(admission.id),
        _ => None,
    }
}

fn install(store: &BedStore, bs: BedState) {
    store.install(&bs);
    store.insert_bed(bs.bed.id, Arc::new(RwLock::new(bs)));
}

fn pair_mut(guards: &mut [BedGuard], a: Ulid, b: Ulid) -> Option<(&mut BedState, &mut BedState)> {
    let i = guards.iter().position(|g| g.bed.id == a)?;
    let j = guards.iter().position(|g| g.bed.id == b)?;
    if i < j {
        let (left, right) = guards.split_at_mut(j);
        Some((&mut *left[i], &mut *right[0]))
    } else if j < i {
        let (left, right) = guards.split_at_mut(i);
        Some((&mut *right[0], &mut *left[j]))
    } else {
        None
    }
}

/// The bed a single-bed event applies to.
fn event_bed_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BedStatusChanged { bed_id, .. }
        | Event::ReservationCancelled { bed_id, .. }
        | Event::PatientDischarged { bed_id, .. } => Some(*bed_id),
        Event::ReservationPlaced { reservation } => Some(reservation.bed_id),
        Event::PatientAdmitted { admission, .. } => Some(admission.bed_id),
        Event::BedCreated { bed } => Some(bed.id),
        Event::BedSnapshot { state } => Some(state.bed.id),
        Event::PatientTransferred { .. } => None,
    }
}

/// Beds an event touches, for replay locking.
fn event_bed_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::PatientTransferred { transfer } => {
            let mut ids = vec![transfer.from_bed, transfer.to_bed];
            ids.sort();
            ids
        }
        Event::BedCreated { .. } | Event::BedSnapshot { .. } => Vec::new(),
        other => event_bed_id(other).into_iter().collect(),
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded > 0 {
            tracing::warn!(
                path = %wal_path.display(),
                bytes = replay.discarded,
                "dropping torn or corrupt WAL tail"
            );
        }
        let wal = Wal::open_truncated(&wal_path, &replay)?;
        let events = replay.events;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Arc::new(BedStore::new()),
            wal_tx,
            bed_set: Arc::new(RwLock::new(())),
        };

        // Sole owner of every bed Arc here, so try_write_owned cannot
        // fail. Never block: a facility may be opened from async code.
        let mut skipped = 0usize;
        for event in &events {
            let ids = event_bed_ids(event);
            let mut guards = Vec::with_capacity(ids.len());
            for id in &ids {
                match engine.store.get_bed(id).map(|bs| bs.try_write_owned()) {
                    Some(Ok(guard)) => guards.push(guard),
                    _ => break,
                }
            }
            if guards.len() != ids.len() {
                skipped += 1;
                continue;
            }
            apply_locked(&engine.store, &mut guards, event);
        }
        if skipped > 0 {
            tracing::warn!(path = %wal_path.display(), skipped, "WAL events referenced unknown beds");
        }
        tracing::debug!(path = %wal_path.display(), events = events.len(), beds = engine.store.bed_count(), "replayed WAL");

        Ok(engine)
    }

    pub fn get_bed_state(&self, id: &Ulid) -> Option<SharedBedState> {
        self.store.get_bed(id)
    }

    pub fn get_bed_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.store.get_bed_for_entity(entity_id)
    }

    /// Durably log `event`, then apply it to the locked beds.
    ///
    /// Runs in its own task: once started, a commit finishes even if the
    /// calling future is dropped, so the log and memory never disagree.
    /// The guards come back for the caller to read the post-state.
    pub(super) async fn commit(
        &self,
        mut guards: Vec<BedGuard>,
        event: Event,
    ) -> Result<Vec<BedGuard>, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        let bed_set = self.bed_set.clone();
        let task = tokio::spawn(async move {
            let _gate = match event {
                Event::BedCreated { .. } => Some(bed_set.read_owned().await),
                _ => None,
            };
            let new_id = event_new_id(&event);
            if let Some(id) = new_id
                && !store.claim_id(id)
            {
                return Err(ValidationError::DuplicateId(id).into());
            }
            if let Err(e) = wal_append(&wal_tx, &event).await {
                if let Some(id) = new_id {
                    store.release_id(&id);
                }
                return Err(e);
            }
            apply_locked(&store, &mut guards, &event);
            Ok::<_, EngineError>(guards)
        });
        task.await
            .map_err(|e| EngineError::Storage(format!("commit task failed: {e}")))?
    }

    /// Acquire a bed's write lock.
    pub(super) async fn lock_bed(&self, bed_id: Ulid) -> Result<BedGuard, EngineError> {
        let bs = self
            .store
            .get_bed(&bed_id)
            .ok_or(EngineError::NotFound(bed_id))?;
        Ok(bs.write_owned().await)
    }

    /// Acquire write locks in sorted id order to prevent deadlocks.
    pub(super) async fn lock_beds(&self, ids: &[Ulid]) -> Result<Vec<BedGuard>, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_bed(id).await?);
        }
        Ok(guards)
    }

    /// Lookup entity → bed, acquire the bed's write lock, and confirm the
    /// entity did not move (transfer) while we waited.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, BedGuard), EngineError> {
        loop {
            let bed_id = self
                .store
                .get_bed_for_entity(entity_id)
                .ok_or(EngineError::NotFound(*entity_id))?;
            let guard = self.lock_bed(bed_id).await?;
            if self.store.get_bed_for_entity(entity_id) == Some(bed_id) {
                return Ok((bed_id, guard));
            }
        }
    }

    /// Compact the WAL into one snapshot record per bed.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.bed_set.write().await;
        let mut events = Vec::with_capacity(self.store.bed_count());
        let mut guards = Vec::with_capacity(self.store.bed_count());
        for id in self.store.bed_ids() {
            if let Some(bs) = self.store.get_bed(&id) {
                guards.push(bs.read_owned().await);
            }
        }
        for guard in &guards {
            events.push(Event::BedSnapshot {
                state: (**guard).clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()));
        drop(guards);
        if let Err(e) = &result {
            tracing::error!(op = "compact_wal", "compaction failed: {e}");
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
