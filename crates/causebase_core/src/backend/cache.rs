//! Time-bounded cache behind `list_for_scan`.

use crate::backend::KbResult;
use crate::model::cause::CauseRecord;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

struct Snapshot {
    loaded_at: Instant,
    records: Arc<Vec<CauseRecord>>,
}

/// Caches the full cause list for at most `ttl`.
///
/// Writers must call [`ScanCache::invalidate`] after every committed change.
/// A zero `ttl` disables caching.
pub struct ScanCache {
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl ScanCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshot: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached list, reloading through `load` when stale.
    ///
    /// A failed load leaves the previous snapshot untouched.
    pub fn get_or_load(
        &self,
        load: impl FnOnce() -> KbResult<Vec<CauseRecord>>,
    ) -> KbResult<Arc<Vec<CauseRecord>>> {
        if self.ttl.is_zero() {
            return load().map(Arc::new);
        }

        {
            let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = guard.as_ref() {
                if snapshot.loaded_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&snapshot.records));
                }
            }
        }

        let records = Arc::new(load()?);
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Snapshot {
            loaded_at: Instant::now(),
            records: Arc::clone(&records),
        });
        Ok(records)
    }

    pub fn invalidate(&self) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::ScanCache;
    use crate::backend::KbError;
    use crate::model::cause::CauseRecord;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn serves_cached_snapshot_until_invalidated() {
        let cache = ScanCache::new(Duration::from_secs(60));
        let loads = Cell::new(0);
        let load = || {
            loads.set(loads.get() + 1);
            Ok(vec![CauseRecord::new("OOM")])
        };

        cache.get_or_load(load).unwrap();
        cache.get_or_load(load).unwrap();
        assert_eq!(loads.get(), 1);

        cache.invalidate();
        cache.get_or_load(load).unwrap();
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn zero_ttl_always_reloads() {
        let cache = ScanCache::new(Duration::ZERO);
        let loads = Cell::new(0);
        for _ in 0..3 {
            cache
                .get_or_load(|| {
                    loads.set(loads.get() + 1);
                    Ok(Vec::new())
                })
                .unwrap();
        }
        assert_eq!(loads.get(), 3);
    }

    #[test]
    fn failed_load_propagates_and_next_load_recovers() {
        let cache = ScanCache::new(Duration::from_secs(60));
        cache
            .get_or_load(|| Ok(vec![CauseRecord::new("Timeout")]))
            .unwrap();

        cache.invalidate();
        let err = cache
            .get_or_load(|| Err(KbError::unavailable("test", "offline")))
            .unwrap_err();
        assert!(matches!(err, KbError::Unavailable { .. }));

        let reloaded = cache.get_or_load(|| Ok(Vec::new())).unwrap();
        assert!(reloaded.is_empty());
    }
}
