//! Process-global model catalog cache.
//!
//! Dynamic pricing needs per-model token prices from the upstream inference
//! provider. The catalog is fetched opportunistically: a snapshot is kept for
//! up to [`CATALOG_TTL`], refreshes are single-flight, failures back off for
//! [`REFRESH_BACKOFF`] and leave the previous snapshot serving. The cache is
//! intentionally permissive: when no snapshot exists the caller falls back
//! to a compiled-in price table rather than rejecting the request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

pub const CATALOG_TTL: Duration = Duration::from_secs(3600);
pub const REFRESH_BACKOFF: Duration = Duration::from_secs(30);
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-model pricing, in USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt_per_k: f64,
    pub completion_per_k: f64,
}

impl ModelPricing {
    /// Pricing rows with non-finite or negative figures are dropped at
    /// cache-load time.
    pub fn is_sane(&self) -> bool {
        self.prompt_per_k.is_finite()
            && self.completion_per_k.is_finite()
            && self.prompt_per_k >= 0.0
            && self.completion_per_k >= 0.0
    }
}

/// Outcome of a catalog lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelLookup {
    /// The catalog knows this model.
    Priced(ModelPricing),
    /// The catalog is empty or stale-and-unrefreshable; the caller must fall
    /// back to its compiled-in table.
    Fallback,
    /// The catalog is populated and the model is absent.
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogFetchError {
    #[error("catalog fetch failed: {0}")]
    Upstream(String),
    #[error("catalog fetch timed out")]
    Timeout,
}

/// The upstream fetch, boxed so tests can inject their own.
pub type CatalogFetch = Arc<
    dyn Fn() -> Pin<
            Box<dyn Future<Output = Result<HashMap<String, ModelPricing>, CatalogFetchError>> + Send>,
        > + Send
        + Sync,
>;

#[derive(Default)]
struct CatalogState {
    entries: Option<Arc<HashMap<String, ModelPricing>>>,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
}

impl CatalogState {
    fn needs_refresh(&self, ttl: Duration, backoff: Duration) -> bool {
        let stale = match self.last_success {
            None => true,
            Some(at) => at.elapsed() > ttl,
        };
        if !stale {
            return false;
        }
        match self.last_failure {
            Some(at) if at.elapsed() < backoff => false,
            _ => true,
        }
    }
}

/// TTL-bounded snapshot of the upstream model list.
pub struct ModelCache {
    fetch: CatalogFetch,
    ttl: Duration,
    backoff: Duration,
    timeout: Duration,
    state: RwLock<CatalogState>,
    refresh: Mutex<()>,
}

impl ModelCache {
    pub fn new(fetch: CatalogFetch) -> Self {
        Self::with_tuning(fetch, CATALOG_TTL, REFRESH_BACKOFF, REFRESH_TIMEOUT)
    }

    pub fn with_tuning(
        fetch: CatalogFetch,
        ttl: Duration,
        backoff: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            fetch,
            ttl,
            backoff,
            timeout,
            state: RwLock::new(CatalogState::default()),
            refresh: Mutex::new(()),
        }
    }

    /// Looks up `model`, refreshing the snapshot first when it is due.
    pub async fn lookup(&self, model: &str) -> ModelLookup {
        self.ensure_fresh().await;
        let state = self.state.read().await;
        match &state.entries {
            None => ModelLookup::Fallback,
            Some(entries) => match entries.get(model) {
                Some(pricing) => ModelLookup::Priced(*pricing),
                None => ModelLookup::Unknown,
            },
        }
    }

    /// Refreshes the snapshot if it is empty or past TTL, honoring the
    /// failure backoff. Concurrent callers share one in-flight refresh: the
    /// double-check under the refresh mutex means only the first caller
    /// issues the upstream request.
    async fn ensure_fresh(&self) {
        {
            let state = self.state.read().await;
            if !state.needs_refresh(self.ttl, self.backoff) {
                return;
            }
        }
        let _guard = self.refresh.lock().await;
        {
            let state = self.state.read().await;
            if !state.needs_refresh(self.ttl, self.backoff) {
                return;
            }
        }

        let result = match tokio::time::timeout(self.timeout, (self.fetch)()).await {
            Ok(result) => result,
            Err(_) => Err(CatalogFetchError::Timeout),
        };

        let mut state = self.state.write().await;
        match result {
            Ok(entries) => {
                let before = entries.len();
                let sane: HashMap<String, ModelPricing> = entries
                    .into_iter()
                    .filter(|(_, pricing)| pricing.is_sane())
                    .collect();
                if sane.len() < before {
                    tracing::warn!(
                        dropped = before - sane.len(),
                        "discarded catalog entries with unusable pricing"
                    );
                }
                state.entries = Some(Arc::new(sane));
                state.last_success = Some(Instant::now());
                state.last_failure = None;
            }
            Err(err) => {
                tracing::warn!(error = %err, "model catalog refresh failed");
                state.last_failure = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fetch_returning(
        entries: Vec<(&'static str, ModelPricing)>,
        counter: Arc<AtomicUsize>,
    ) -> CatalogFetch {
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let entries: HashMap<String, ModelPricing> = entries
                .iter()
                .map(|(name, pricing)| (name.to_string(), *pricing))
                .collect();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(entries)
            })
        })
    }

    fn failing_fetch(counter: Arc<AtomicUsize>) -> CatalogFetch {
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(CatalogFetchError::Upstream("boom".to_string())) })
        })
    }

    const PRICING: ModelPricing = ModelPricing {
        prompt_per_k: 0.001,
        completion_per_k: 0.002,
    };

    #[tokio::test]
    async fn priced_and_unknown_lookups() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ModelCache::new(fetch_returning(vec![("gpt-x", PRICING)], calls.clone()));
        assert_eq!(cache.lookup("gpt-x").await, ModelLookup::Priced(PRICING));
        assert_eq!(cache.lookup("gpt-y").await, ModelLookup::Unknown);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_lookups_issue_one_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(ModelCache::new(fetch_returning(
            vec![("gpt-x", PRICING)],
            calls.clone(),
        )));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.lookup("gpt-x").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), ModelLookup::Priced(PRICING));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_backs_off_and_falls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ModelCache::new(failing_fetch(calls.clone()));
        assert_eq!(cache.lookup("gpt-x").await, ModelLookup::Fallback);
        // Within the backoff window no second upstream call is made.
        assert_eq!(cache.lookup("gpt-x").await, ModelLookup::Fallback);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unusable_pricing_rows_are_discarded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ModelCache::new(fetch_returning(
            vec![
                ("ok", PRICING),
                (
                    "nan",
                    ModelPricing {
                        prompt_per_k: f64::NAN,
                        completion_per_k: 0.1,
                    },
                ),
                (
                    "negative",
                    ModelPricing {
                        prompt_per_k: -0.1,
                        completion_per_k: 0.1,
                    },
                ),
            ],
            calls,
        ));
        assert_eq!(cache.lookup("ok").await, ModelLookup::Priced(PRICING));
        assert_eq!(cache.lookup("nan").await, ModelLookup::Unknown);
        assert_eq!(cache.lookup("negative").await, ModelLookup::Unknown);
    }

    #[tokio::test]
    async fn slow_fetch_hits_the_hard_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetch: CatalogFetch = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(HashMap::new())
            })
        });
        let cache = ModelCache::with_tuning(
            fetch,
            CATALOG_TTL,
            REFRESH_BACKOFF,
            Duration::from_millis(10),
        );
        assert_eq!(cache.lookup("gpt-x").await, ModelLookup::Fallback);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
