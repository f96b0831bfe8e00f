use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};

use crate::{
    external::{AnalysisSource, AuthProvider},
    snapshot::MusicAnalysis,
    BeatSyncError, Result,
};

type FetchOutcome = std::result::Result<Arc<MusicAnalysis>, String>;
type FetchCell = Arc<OnceLock<FetchOutcome>>;

/// Bounded analysis cache keyed by track id.
///
/// Each id maps to a single fetch cell. Callers racing on the same id share
/// that cell, so only one of them ever reaches the analysis source and all of
/// them observe the same result. Failed fetches are dropped from the cache so
/// a later request can retry. Eviction only drops settled entries, which
/// keeps at most one fetch in flight per id.
#[derive(Debug)]
pub struct AnalysisCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, FetchCell>,
    order: VecDeque<String>,
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns a completed analysis without triggering a fetch.
    pub fn get(&self, track_id: &str) -> Result<Option<Arc<MusicAnalysis>>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .get(track_id)
            .and_then(|cell| cell.get())
            .and_then(|outcome| outcome.as_ref().ok())
            .cloned())
    }

    pub fn fetch(
        &self,
        track_id: &str,
        auth: &dyn AuthProvider,
        source: &dyn AnalysisSource,
    ) -> Result<Arc<MusicAnalysis>> {
        let cell = self.cell_for(track_id)?;

        let outcome = cell.get_or_init(|| {
            tracing::debug!(track = track_id, "fetching analysis");
            auth.token()
                .and_then(|token| source.fetch(track_id, &token.access_token))
                .map(Arc::new)
                .map_err(|err| err.to_string())
        });

        match outcome {
            Ok(analysis) => Ok(analysis.clone()),
            Err(message) => {
                tracing::warn!(track = track_id, error = %message, "analysis fetch failed");
                self.forget_failed(track_id, &cell)?;
                Err(BeatSyncError::msg(format!(
                    "analysis for `{track_id}` unavailable: {message}"
                )))
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.order.clear();
        Ok(())
    }

    fn cell_for(&self, track_id: &str) -> Result<FetchCell> {
        let mut state = self.lock()?;
        if let Some(cell) = state.entries.get(track_id) {
            return Ok(cell.clone());
        }

        let cell = FetchCell::default();
        state.entries.insert(track_id.to_string(), cell.clone());
        state.order.push_back(track_id.to_string());

        // Cells still being fetched are never evicted; the cache may run over
        // capacity until they settle.
        let CacheState { entries, order } = &mut *state;
        while entries.len() > self.capacity {
            let settled = order
                .iter()
                .position(|id| entries.get(id).is_some_and(|stored| stored.get().is_some()));
            let Some(oldest) = settled.and_then(|index| order.remove(index)) else {
                break;
            };
            entries.remove(&oldest);
            tracing::debug!(track = %oldest, "evicted cached analysis");
        }
        Ok(cell)
    }

    fn forget_failed(&self, track_id: &str, cell: &FetchCell) -> Result<()> {
        let mut state = self.lock()?;
        let same = state
            .entries
            .get(track_id)
            .is_some_and(|stored| Arc::ptr_eq(stored, cell));
        if same {
            state.entries.remove(track_id);
            state.order.retain(|id| id != track_id);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| BeatSyncError::Poisoned("analysis cache"))
    }
}
