//! MXResolver (§4.8): short-TTL, bounded-concurrency DNS MX lookup with
//! provider classification and request-deduplication.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::FraudError;

const DEFAULT_CACHE_SIZE: usize = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

/// MX provider buckets, classified by longest-suffix match on known
/// mailbox-provider hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MxProvider {
    Google,
    Microsoft,
    Proton,
    Fastmail,
    AmazonSes,
    SelfHosted,
    Other,
}

impl MxProvider {
    pub fn bucket_id(&self) -> u8 {
        match self {
            Self::Google => 0,
            Self::Microsoft => 1,
            Self::Proton => 2,
            Self::Fastmail => 3,
            Self::AmazonSes => 4,
            Self::SelfHosted => 5,
            Self::Other => 6,
        }
    }

    fn classify(exchanges: &[String]) -> Self {
        let suffixes: &[(&str, MxProvider)] = &[
            ("google.com", Self::Google),
            ("googlemail.com", Self::Google),
            ("outlook.com", Self::Microsoft),
            ("protection.outlook.com", Self::Microsoft),
            ("proton.me", Self::Proton),
            ("protonmail.ch", Self::Proton),
            ("fastmail.com", Self::Fastmail),
            ("amazonses.com", Self::AmazonSes),
        ];
        for exchange in exchanges {
            for (suffix, provider) in suffixes {
                if exchange.ends_with(suffix) {
                    return *provider;
                }
            }
        }
        if exchanges.is_empty() {
            Self::Other
        } else {
            Self::SelfHosted
        }
    }
}

#[derive(Debug, Clone)]
pub struct MxLookupResult {
    pub records: Vec<String>,
    pub provider: MxProvider,
    pub resolved_at: Instant,
}

struct CacheEntry {
    result: Arc<MxLookupResult>,
    expires_at: Instant,
}

/// Resolves MX records over DNS with an LRU+TTL cache and singleflight
/// collapsing of concurrent lookups for the same domain.
pub struct MxResolver {
    resolver: TokioAsyncResolver,
    cache: Mutex<LruCache<String, CacheEntry>>,
    in_flight: DashMap<String, watch::Sender<Option<Arc<MxLookupResult>>>>,
    ttl: Duration,
    timeout: Duration,
}

impl MxResolver {
    pub fn new(cache_size: usize, ttl: Duration, timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare_https(), ResolverOpts::default());
        Self {
            resolver,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size.max(1)).expect("cache_size > 0"),
            )),
            in_flight: DashMap::new(),
            ttl,
            timeout,
        }
    }

    /// Resolve MX records for `domain`, honoring the configured timeout.
    /// Never returns `Err` to the caller unless `record_error` is requested —
    /// per §7, timeouts and failures null the MX features rather than fail
    /// the request.
    pub async fn resolve(&self, domain: &str) -> Option<Arc<MxLookupResult>> {
        if let Some(entry) = self.cache_get(domain) {
            return Some(entry);
        }

        match tokio::time::timeout(self.timeout, self.resolve_singleflight(domain)).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                debug!(domain, error = %e, "mx lookup failed");
                None
            }
            Err(_) => {
                warn!(domain, timeout_ms = self.timeout.as_millis(), "mx lookup timed out");
                None
            }
        }
    }

    fn cache_get(&self, domain: &str) -> Option<Arc<MxLookupResult>> {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(domain) {
            if entry.expires_at > Instant::now() {
                return Some(entry.result.clone());
            }
        }
        None
    }

    async fn resolve_singleflight(&self, domain: &str) -> Result<Arc<MxLookupResult>, FraudError> {
        loop {
            if let Some(sender) = self.in_flight.get(domain) {
                let mut rx = sender.subscribe();
                drop(sender);
                if rx.changed().await.is_ok() {
                    if let Some(result) = rx.borrow().clone() {
                        return Ok(result);
                    }
                }
                return Err(FraudError::MxFailure(
                    domain.to_string(),
                    "in-flight lookup produced no result".to_string(),
                ));
            }

            let (tx, _rx) = watch::channel(None);
            match self.in_flight.entry(domain.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(tx.clone());
                }
            }

            let outcome = self.do_lookup(domain).await;
            self.in_flight.remove(domain);

            return match outcome {
                Ok(result) => {
                    let arc = Arc::new(result);
                    self.cache.lock().put(
                        domain.to_string(),
                        CacheEntry { result: arc.clone(), expires_at: Instant::now() + self.ttl },
                    );
                    let _ = tx.send(Some(arc.clone()));
                    Ok(arc)
                }
                Err(e) => {
                    let _ = tx.send(None);
                    Err(e)
                }
            };
        }
    }

    async fn do_lookup(&self, domain: &str) -> Result<MxLookupResult, FraudError> {
        let lookup = self
            .resolver
            .mx_lookup(domain)
            .await
            .map_err(|e| FraudError::MxFailure(domain.to_string(), e.to_string()))?;

        let mut exchanges: Vec<(u16, String)> = lookup
            .iter()
            .map(|mx| (mx.preference(), mx.exchange().to_utf8()))
            .collect();
        exchanges.sort_by_key(|(pref, _)| *pref);
        let records: Vec<String> = exchanges.into_iter().map(|(_, host)| host).collect();
        let provider = MxProvider::classify(&records);

        Ok(MxLookupResult { records, provider, resolved_at: Instant::now() })
    }
}

impl Default for MxResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE, DEFAULT_TTL, DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_google_mx() {
        let exchanges = vec!["aspmx.l.google.com".to_string()];
        assert_eq!(MxProvider::classify(&exchanges), MxProvider::Google);
    }

    #[test]
    fn classify_empty_is_other() {
        assert_eq!(MxProvider::classify(&[]), MxProvider::Other);
    }

    #[test]
    fn classify_unknown_host_is_self_hosted() {
        let exchanges = vec!["mail.acme-corp.internal".to_string()];
        assert_eq!(MxProvider::classify(&exchanges), MxProvider::SelfHosted);
    }

    #[test]
    fn bucket_ids_are_stable() {
        assert_eq!(MxProvider::Google.bucket_id(), 0);
        assert_eq!(MxProvider::Other.bucket_id(), 6);
    }
}
