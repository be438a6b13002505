//! Exact + fuzzy duplicate detection with TTL.
//!
//! Two probes per alert: SHA-256 over the canonical
//! `source:alert_type:target` tuple, then a SimHash Hamming scan over the
//! recent fingerprint cache. The in-memory backing is bounded; Redis, when
//! configured and reachable, carries both keys with native TTL and any
//! Redis error degrades transparently to the in-memory path.

use crate::alert::Alert;
use crate::simhash::{hamming_distance, simhash64};
use ransomeye_crypto::hash_bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How a duplicate was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateKind {
    Exact,
    Fuzzy,
}

/// Outcome of a dedup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Unique,
    Duplicate(DuplicateKind),
}

/// Filter tuning.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Time to live for stored hashes.
    pub ttl: Duration,
    /// Capacity of the exact-hash ring; oldest entries fall off first.
    pub max_entries: usize,
    /// SimHash cache trims to this many most-recent fingerprints.
    pub simhash_capacity: usize,
    /// Hamming distance at or under which two fingerprints are duplicates.
    pub similarity_threshold: u32,
    /// Optional Redis backend, e.g. `redis://localhost:6379`.
    pub redis_url: Option<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            simhash_capacity: 1_000,
            similarity_threshold: 3,
            redis_url: None,
        }
    }
}

/// Filter statistics for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct DedupStats {
    pub backend: &'static str,
    pub exact_entries: usize,
    pub simhash_entries: usize,
    pub exact_hits: u64,
    pub fuzzy_hits: u64,
    pub unique: u64,
    pub redis_errors: u64,
    pub ttl_seconds: u64,
    pub similarity_threshold: u32,
}

struct MemoryState {
    exact: VecDeque<(String, Instant)>,
    simhashes: VecDeque<(u64, Instant)>,
}

/// Exact + fuzzy duplicate filter. Reads and writes share one lock.
pub struct DuplicateFilter {
    config: DedupConfig,
    state: Mutex<MemoryState>,
    #[cfg(feature = "redis-backend")]
    redis: Option<redis::aio::ConnectionManager>,
    exact_hits: AtomicU64,
    fuzzy_hits: AtomicU64,
    unique: AtomicU64,
    redis_errors: AtomicU64,
}

impl DuplicateFilter {
    /// Build the filter, connecting to Redis when a URL is configured and
    /// the backend feature is compiled in. A failed connection logs and
    /// falls back to memory.
    pub async fn new(config: DedupConfig) -> Self {
        #[cfg(feature = "redis-backend")]
        let redis = match &config.redis_url {
            Some(url) => match Self::connect_redis(url).await {
                Ok(manager) => {
                    info!(url = %url, "dedup store using redis backend");
                    Some(manager)
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "redis unavailable, using in-memory dedup store");
                    None
                }
            },
            None => None,
        };
        #[cfg(not(feature = "redis-backend"))]
        if config.redis_url.is_some() {
            warn!("redis backend not compiled in, using in-memory dedup store");
        }

        Self {
            state: Mutex::new(MemoryState {
                exact: VecDeque::with_capacity(config.max_entries.min(1024)),
                simhashes: VecDeque::with_capacity(config.simhash_capacity.min(1024)),
            }),
            #[cfg(feature = "redis-backend")]
            redis,
            config,
            exact_hits: AtomicU64::new(0),
            fuzzy_hits: AtomicU64::new(0),
            unique: AtomicU64::new(0),
            redis_errors: AtomicU64::new(0),
        }
    }

    #[cfg(feature = "redis-backend")]
    async fn connect_redis(url: &str) -> redis::RedisResult<redis::aio::ConnectionManager> {
        let client = redis::Client::open(url)?;
        redis::aio::ConnectionManager::new(client).await
    }

    /// Canonical exact-dedup key.
    pub fn exact_key(source: &str, alert_type: &str, target: &str) -> String {
        hash_bytes(format!("{source}:{alert_type}:{target}").as_bytes())
    }

    /// Probe both stores; on no match, insert both keys with the configured
    /// TTL and report `Unique`.
    pub async fn check(&self, alert: &Alert) -> DedupVerdict {
        let exact = Self::exact_key(&alert.source, &alert.alert_type, &alert.target);
        let fingerprint = simhash64(&alert.dedup_text());

        if self.probe_exact(&exact).await {
            self.exact_hits.fetch_add(1, Ordering::Relaxed);
            debug!(alert_id = %alert.alert_id, "exact duplicate");
            return DedupVerdict::Duplicate(DuplicateKind::Exact);
        }

        if self.probe_fuzzy(fingerprint).await {
            self.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
            debug!(alert_id = %alert.alert_id, "fuzzy duplicate");
            return DedupVerdict::Duplicate(DuplicateKind::Fuzzy);
        }

        self.insert(exact, fingerprint).await;
        self.unique.fetch_add(1, Ordering::Relaxed);
        DedupVerdict::Unique
    }

    async fn probe_exact(&self, key: &str) -> bool {
        #[cfg(feature = "redis-backend")]
        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            match redis::cmd("EXISTS")
                .arg(format!("dedupe:exact:{key}"))
                .query_async::<_, i64>(&mut conn)
                .await
            {
                Ok(n) => return n > 0,
                Err(e) => {
                    self.redis_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "redis probe failed, falling back to memory");
                }
            }
        }

        let mut state = self.state.lock().await;
        let ttl = self.config.ttl;
        state.exact.retain(|(_, at)| at.elapsed() < ttl);
        state.exact.iter().any(|(k, _)| k == key)
    }

    async fn probe_fuzzy(&self, fingerprint: u64) -> bool {
        let mut state = self.state.lock().await;
        let ttl = self.config.ttl;
        state.simhashes.retain(|(_, at)| at.elapsed() < ttl);
        state
            .simhashes
            .iter()
            .any(|(stored, _)| hamming_distance(*stored, fingerprint) <= self.config.similarity_threshold)
    }

    async fn insert(&self, exact: String, fingerprint: u64) {
        #[cfg(feature = "redis-backend")]
        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            let ttl = self.config.ttl.as_secs().max(1);
            let outcome: redis::RedisResult<()> = redis::pipe()
                .cmd("SET")
                .arg(format!("dedupe:exact:{exact}"))
                .arg(1)
                .arg("EX")
                .arg(ttl)
                .ignore()
                .cmd("SET")
                .arg(format!("dedupe:simhash:{fingerprint}"))
                .arg(1)
                .arg("EX")
                .arg(ttl)
                .ignore()
                .query_async(&mut conn)
                .await;
            if let Err(e) = outcome {
                self.redis_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "redis insert failed, keeping in-memory copy only");
            }
        }

        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.exact.push_back((exact, now));
        while state.exact.len() > self.config.max_entries {
            state.exact.pop_front();
        }
        state.simhashes.push_back((fingerprint, now));
        while state.simhashes.len() > self.config.simhash_capacity {
            state.simhashes.pop_front();
        }
    }

    pub async fn cleanup_expired(&self) {
        let mut state = self.state.lock().await;
        let ttl = self.config.ttl;
        state.exact.retain(|(_, at)| at.elapsed() < ttl);
        state.simhashes.retain(|(_, at)| at.elapsed() < ttl);
    }

    pub async fn stats(&self) -> DedupStats {
        let state = self.state.lock().await;
        DedupStats {
            backend: self.backend_name(),
            exact_entries: state.exact.len(),
            simhash_entries: state.simhashes.len(),
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            fuzzy_hits: self.fuzzy_hits.load(Ordering::Relaxed),
            unique: self.unique.load(Ordering::Relaxed),
            redis_errors: self.redis_errors.load(Ordering::Relaxed),
            ttl_seconds: self.config.ttl.as_secs(),
            similarity_threshold: self.config.similarity_threshold,
        }
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(feature = "redis-backend")]
        if self.redis.is_some() {
            return "redis";
        }
        "memory"
    }
}
