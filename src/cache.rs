//! Cache of initialised propagators shared across requests
//!
//! Entries are keyed by the exact pair of TLE lines and hold immutable
//! [`Propagator`]s, so concurrent requests never share mutable state. The
//! cache is bounded; the least recently used entries are evicted first and
//! entries idle for longer than the TTL are dropped by a periodic sweep.

use crate::propagation::{PropagationLimits, Propagator};
use crate::tle::{self, Satellite, TleError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MAX_LOADED_SATS: usize = 500;
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

type TleKey = (String, String);

struct CacheEntry {
    propagator: Arc<Propagator>,
    last_used: Instant,
}

/// Thread-safe, bounded propagator cache
#[derive(Clone)]
pub struct SatelliteCache {
    inner: Arc<DashMap<TleKey, CacheEntry>>,
    max_entries: usize,
    idle_ttl: Duration,
    limits: PropagationLimits,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl SatelliteCache {
    pub fn new(max_entries: usize, idle_ttl: Duration, limits: PropagationLimits) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            idle_ttl,
            limits,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Propagator for a satellite, parsing and initialising it on a miss
    pub fn acquire(&self, satellite: &Satellite) -> Result<Arc<Propagator>, TleError> {
        let key = (
            satellite.tle_line1.trim_end().to_string(),
            satellite.tle_line2.trim_end().to_string(),
        );

        if let Some(mut entry) = self.inner.get_mut(&key) {
            entry.last_used = Instant::now();
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Satellite cache hit for {}", satellite.norad_id);
            return Ok(Arc::clone(&entry.propagator));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let elements = tle::parse(&key.0, &key.1)?;
        let propagator = Arc::new(Propagator::new(elements, self.limits));
        debug!(
            "Satellite cache miss for {}, loaded element set",
            satellite.norad_id
        );

        self.inner.insert(
            key,
            CacheEntry {
                propagator: Arc::clone(&propagator),
                last_used: Instant::now(),
            },
        );
        self.evict_over_capacity();

        Ok(propagator)
    }

    fn evict_over_capacity(&self) {
        while self.inner.len() > self.max_entries {
            let oldest = self
                .inner
                .iter()
                .min_by_key(|entry| entry.value().last_used)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    if let Some((_, entry)) = self.inner.remove(&key) {
                        debug!(
                            "Evicted satellite {} from cache",
                            entry.propagator.elements().norad_id
                        );
                    }
                }
                None => break,
            }
        }
    }

    /// Remove entries idle for longer than the TTL; returns how many were removed
    pub fn expire_idle(&self) -> usize {
        let before = self.inner.len();
        let ttl = self.idle_ttl;
        self.inner.retain(|_, entry| entry.last_used.elapsed() < ttl);
        let removed = before.saturating_sub(self.inner.len());
        if removed > 0 {
            debug!("Expired {} idle satellites from cache", removed);
        }
        removed
    }

    /// Run [`expire_idle`](Self::expire_idle) every `interval` until `token` is cancelled
    pub fn spawn_sweeper<F>(&self, interval: Duration, token: CancellationToken, on_sweep: F) -> JoinHandle<()>
    where
        F: Fn(usize) + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.expire_idle();
                        on_sweep(cache.len());
                    }
                }
            }
            debug!("Satellite cache sweeper stopped");
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for SatelliteCache {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_LOADED_SATS,
            DEFAULT_IDLE_TTL,
            PropagationLimits::default(),
        )
    }
}
