//! ArtifactCache (§4.7): per-kind TTL snapshots over the KV artifact
//! namespace, with stale-while-revalidate and singleflight refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::artifacts::{Config, DisposableDomains, Heuristics, MarkovModel, RandomForest, TldProfiles, Whitelist};
use crate::error::{FraudError, Result};

/// Backend abstraction over the KV artifact namespace (§6.3); production
/// wires this to `fraud-db`, tests use an in-memory fake.
#[async_trait]
pub trait KvSource: Send + Sync {
    async fn fetch_raw(&self, key: &str) -> Result<(serde_json::Value, Option<String>)>;
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

struct Snapshot<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

struct Slot<T> {
    snapshot: RwLock<Option<Snapshot<T>>>,
    refresh_lock: Mutex<()>,
    ttl: Duration,
}

impl<T> Slot<T> {
    fn new(ttl: Duration) -> Self {
        Self { snapshot: RwLock::new(None), refresh_lock: Mutex::new(()), ttl }
    }

    fn current(&self) -> Option<Arc<T>> {
        self.snapshot.read().as_ref().map(|s| s.value.clone())
    }

    fn is_stale(&self) -> bool {
        match self.snapshot.read().as_ref() {
            Some(s) => s.fetched_at.elapsed() >= self.ttl,
            None => true,
        }
    }

    fn install(&self, value: T) {
        *self.snapshot.write() = Some(Snapshot { value: Arc::new(value), fetched_at: Instant::now() });
    }
}

const CONFIG_TTL: Duration = Duration::from_secs(60);
const HEURISTICS_TTL: Duration = Duration::from_secs(60);
const WHITELIST_TTL: Duration = Duration::from_secs(60);
const MODELS_TTL: Duration = Duration::from_secs(300);
const STATIC_LISTS_TTL: Duration = Duration::from_secs(600);

/// Holds one hot-swappable snapshot per artifact kind, backed by a
/// singleflight-guarded KV fetch.
pub struct ArtifactCache<S: KvSource> {
    source: Arc<S>,
    config: Slot<Config>,
    heuristics: Slot<Heuristics>,
    whitelist: Slot<Whitelist>,
    legit2: Slot<MarkovModel>,
    fraud2: Slot<MarkovModel>,
    legit3: Slot<MarkovModel>,
    fraud3: Slot<MarkovModel>,
    forest: Slot<RandomForest>,
    disposable: Slot<DisposableDomains>,
    tld_profiles: Slot<TldProfiles>,
    failed_refreshes: AtomicU64,
}

macro_rules! getter {
    ($name:ident, $slot:ident, $key:expr, $ttl:expr, $ty:ty) => {
        /// Returns the current snapshot, triggering a background-equivalent
        /// refresh when stale; stale readers still get served (§4.7).
        pub async fn $name(&self) -> Result<Arc<$ty>> {
            self.get_or_refresh(&self.$slot, $key).await
        }
    };
}

impl<S: KvSource> ArtifactCache<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            config: Slot::new(CONFIG_TTL),
            heuristics: Slot::new(HEURISTICS_TTL),
            whitelist: Slot::new(WHITELIST_TTL),
            legit2: Slot::new(MODELS_TTL),
            fraud2: Slot::new(MODELS_TTL),
            legit3: Slot::new(MODELS_TTL),
            fraud3: Slot::new(MODELS_TTL),
            forest: Slot::new(MODELS_TTL),
            disposable: Slot::new(STATIC_LISTS_TTL),
            tld_profiles: Slot::new(STATIC_LISTS_TTL),
            failed_refreshes: AtomicU64::new(0),
        }
    }

    getter!(config, config, "config.json", CONFIG_TTL, Config);
    getter!(heuristics, heuristics, "risk-heuristics.json", HEURISTICS_TTL, Heuristics);
    getter!(whitelist, whitelist, "whitelist_config.json", WHITELIST_TTL, Whitelist);
    getter!(markov_legit2, legit2, "MM_legit_2gram", MODELS_TTL, MarkovModel);
    getter!(markov_fraud2, fraud2, "MM_fraud_2gram", MODELS_TTL, MarkovModel);
    getter!(disposable_domains, disposable, "disposable_domains.json", STATIC_LISTS_TTL, DisposableDomains);
    getter!(tld_profiles, tld_profiles, "tld_profiles.json", STATIC_LISTS_TTL, TldProfiles);

    /// 3-gram models are optional; a missing KV entry is not an error.
    pub async fn markov_legit3(&self) -> Option<Arc<MarkovModel>> {
        self.get_or_refresh(&self.legit3, "MM_legit_3gram").await.ok()
    }

    pub async fn markov_fraud3(&self) -> Option<Arc<MarkovModel>> {
        self.get_or_refresh(&self.fraud3, "MM_fraud_3gram").await.ok()
    }

    pub async fn forest(&self) -> Option<Arc<RandomForest>> {
        self.get_or_refresh(&self.forest, "random_forest.json").await.ok()
    }

    /// Admin invalidation capability (`invalidate(kind | "all")`, §4.7).
    pub fn invalidate(&self, kind: &str) {
        match kind {
            "config" => *self.config.snapshot.write() = None,
            "heuristics" => *self.heuristics.snapshot.write() = None,
            "whitelist" => *self.whitelist.snapshot.write() = None,
            "models" => {
                *self.legit2.snapshot.write() = None;
                *self.fraud2.snapshot.write() = None;
                *self.legit3.snapshot.write() = None;
                *self.fraud3.snapshot.write() = None;
                *self.forest.snapshot.write() = None;
            }
            "disposable" => *self.disposable.snapshot.write() = None,
            "tld" => *self.tld_profiles.snapshot.write() = None,
            "all" => {
                *self.config.snapshot.write() = None;
                *self.heuristics.snapshot.write() = None;
                *self.whitelist.snapshot.write() = None;
                *self.legit2.snapshot.write() = None;
                *self.fraud2.snapshot.write() = None;
                *self.legit3.snapshot.write() = None;
                *self.fraud3.snapshot.write() = None;
                *self.forest.snapshot.write() = None;
                *self.disposable.snapshot.write() = None;
                *self.tld_profiles.snapshot.write() = None;
            }
            other => warn!(kind = other, "invalidate called with unknown artifact kind"),
        }
    }

    pub fn failed_refresh_count(&self) -> u64 {
        self.failed_refreshes.load(Ordering::Relaxed)
    }

    async fn get_or_refresh<T>(&self, slot: &Slot<T>, key: &str) -> Result<Arc<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        if !slot.is_stale() {
            if let Some(value) = slot.current() {
                return Ok(value);
            }
        }

        // Singleflight: the task that wins the try_lock performs the fetch.
        // Everyone else serves the stale snapshot immediately rather than
        // queueing behind the refresh — staleness must never add latency.
        // Only a reader with nothing to serve (cold start) blocks.
        match slot.refresh_lock.try_lock() {
            Ok(_guard) => self.refresh(slot, key).await,
            Err(_) => match slot.current() {
                Some(value) => Ok(value),
                None => {
                    let _guard = slot.refresh_lock.lock().await;
                    match slot.current() {
                        Some(value) => Ok(value),
                        None => self.refresh(slot, key).await,
                    }
                }
            },
        }
    }

    async fn refresh<T>(&self, slot: &Slot<T>, key: &str) -> Result<Arc<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.source.fetch_raw(key).await {
            Ok((raw, checksum)) => match self.decode_and_validate::<T>(key, &raw, checksum.as_deref()) {
                Ok(decoded) => {
                    slot.install(decoded);
                    Ok(slot.current().expect("just installed"))
                }
                Err(e) => {
                    self.failed_refreshes.fetch_add(1, Ordering::Relaxed);
                    error!(key, error = %e, "artifact refresh rejected, keeping stale snapshot");
                    slot.current().ok_or(e)
                }
            },
            Err(e) => {
                self.failed_refreshes.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "artifact refresh failed, keeping stale snapshot");
                slot.current().ok_or(e)
            }
        }
    }

    fn decode_and_validate<T>(&self, key: &str, raw: &serde_json::Value, checksum: Option<&str>) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if let Some(expected) = checksum {
            let bytes = serde_json::to_vec(raw).map_err(|e| FraudError::ModelInvalid(e.to_string()))?;
            let actual = sha256_hex(&bytes);
            if &actual != expected {
                return Err(FraudError::ChecksumMismatch {
                    artifact: key.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        serde_json::from_value(raw.clone()).map_err(|e| FraudError::ModelInvalid(format!("{key}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FakeSource {
        calls: AtomicU32,
        value: serde_json::Value,
    }

    #[async_trait]
    impl KvSource for FakeSource {
        async fn fetch_raw(&self, _key: &str) -> Result<(serde_json::Value, Option<String>)> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok((self.value.clone(), None))
        }
    }

    #[tokio::test]
    async fn caches_config_between_calls() {
        let source = Arc::new(FakeSource {
            calls: AtomicU32::new(0),
            value: serde_json::to_value(Config::default()).unwrap(),
        });
        let cache = ArtifactCache::new(source.clone());
        cache.config().await.unwrap();
        cache.config().await.unwrap();
        assert_eq!(source.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        struct BadChecksumSource;
        #[async_trait]
        impl KvSource for BadChecksumSource {
            async fn fetch_raw(&self, _key: &str) -> Result<(serde_json::Value, Option<String>)> {
                Ok((serde_json::to_value(Config::default()).unwrap(), Some("deadbeef".to_string())))
            }
        }
        let cache = ArtifactCache::new(Arc::new(BadChecksumSource));
        assert!(cache.config().await.is_err());
    }

    #[test]
    fn invalidate_all_clears_every_slot() {
        let source = Arc::new(FakeSource {
            calls: AtomicU32::new(0),
            value: serde_json::to_value(Config::default()).unwrap(),
        });
        let cache = ArtifactCache::new(source);
        cache.config.install(Config::default());
        assert!(cache.config.current().is_some());
        cache.invalidate("all");
        assert!(cache.config.current().is_none());
    }
}
