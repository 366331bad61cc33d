use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    api_requests: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    stale_served: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub api_requests: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stale_served: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_api_request(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            api_requests: self.api_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "api_requests={} retries={} cache_hit={} cache_miss={} stale_served={}",
            self.api_requests, self.retries, self.cache_hits, self.cache_misses, self.stale_served
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = Metrics::new();
        metrics.inc_api_request();
        metrics.inc_api_request();
        metrics.inc_retry();
        metrics.inc_cache_miss();

        let snap = metrics.snapshot();
        assert_eq!(snap.api_requests, 2);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(
            snap.to_string(),
            "api_requests=2 retries=1 cache_hit=0 cache_miss=1 stale_served=0"
        );
    }
}
