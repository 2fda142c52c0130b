use crate::counter::{CounterMap, TransientCounter};
use crate::store::{load_or_empty, DurableStore, StoreError};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of folding the transient tally into the durable one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Users present in the transient tally at merge time
    pub users_merged: usize,
    /// Submissions added to the history
    pub submissions_merged: u64,
    /// Users in the history after the merge
    pub durable_users: usize,
}

/// Owner of all participation state
///
/// The transient tally sits behind a single lock. Every mutation of it, and
/// the whole load/merge/save/clear sequence, runs while holding that lock,
/// so a submission is either counted before a merge or after it.
pub struct Tracker {
    transient: Mutex<TransientCounter>,
    store: Arc<dyn DurableStore>,
}

impl Tracker {
    /// Create a tracker with an empty transient tally
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            transient: Mutex::new(TransientCounter::new()),
            store,
        }
    }

    pub fn store(&self) -> &dyn DurableStore {
        self.store.as_ref()
    }

    pub(crate) fn transient(&self) -> MutexGuard<'_, TransientCounter> {
        self.transient.lock()
    }

    /// Copy of the tally accumulated since the last merge
    pub fn transient_snapshot(&self) -> CounterMap {
        self.transient.lock().snapshot()
    }

    /// Copy of the historical tally; a corrupt record reads as empty
    pub fn durable_snapshot(&self) -> Result<CounterMap, StoreError> {
        let _guard = self.transient.lock();
        load_or_empty(self.store.as_ref())
    }

    /// Add the transient tally to the durable one, persist, then clear.
    ///
    /// When saving fails the transient tally is left untouched.
    #[instrument(skip(self))]
    pub fn merge_into_durable(&self) -> Result<MergeSummary, StoreError> {
        let mut transient = self.transient.lock();

        let mut history = match self.store.load() {
            Ok(history) => history,
            Err(StoreError::Corrupt { path, reason }) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "Participation record is unreadable, merging into an empty history"
                );
                if let Some(moved) = self.store.quarantine()? {
                    warn!(moved_to = %moved.display(), "Moved corrupt participation record aside");
                }
                CounterMap::new()
            }
            Err(e) => return Err(e),
        };

        let pending = transient.snapshot();
        history.merge_from(&pending);
        self.store.save(&history)?;
        transient.clear();

        let summary = MergeSummary {
            users_merged: pending.len(),
            submissions_merged: pending.total(),
            durable_users: history.len(),
        };

        metrics::counter!("tally.merges").increment(1);
        metrics::gauge!("tally.transient.users").set(0.0);

        info!(
            users_merged = summary.users_merged,
            submissions_merged = summary.submissions_merged,
            durable_users = summary.durable_users,
            "Merged transient tally into history"
        );

        Ok(summary)
    }

    /// Discard the durable history. The transient tally is kept.
    pub fn wipe_durable(&self) -> Result<(), StoreError> {
        let _guard = self.transient.lock();
        self.store.reset()?;
        metrics::counter!("tally.resets").increment(1);
        info!("Historical tally wiped");
        Ok(())
    }
}
