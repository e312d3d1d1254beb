//! Upstream fetch: races every configured provider for one scope.
//!
//! ```text
//!   race(scope)
//!       │
//!       ├── warmed payload for scope? ──► return it, no network
//!       │
//!       ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ provider 0 │ │ provider 1 │ │ provider N │   all start together
//!   └─────┬──────┘ └─────┬──────┘ └─────┬──────┘
//!         └──────────────┼──────────────┘
//!                        ▼
//!          first Ok wins, the rest are dropped
//!          all Err ──► AllSourcesFailed { errors }
//! ```
//!
//! The whole race runs against a [`CancellationToken`]; cancelling it drops
//! every in-flight provider future and resolves to [`CorralError::Cancelled`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use moka::sync::Cache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::providers::CollectionProvider;
use crate::telemetry;
use crate::types::{Collection, Item, ScopeKey};
use crate::{CorralError, Result};

/// Upper bound on scopes holding a warmed payload at once.
const WARM_CAPACITY: u64 = 64;

/// Races providers and hands out warmed payloads.
pub struct Fetcher<T: Item> {
    providers: Vec<Arc<dyn CollectionProvider<T>>>,
    warmed: Cache<ScopeKey, Collection<T>>,
}

impl<T: Item> Fetcher<T> {
    /// Create a fetcher. Warmed payloads not consumed within `warm_ttl`
    /// are dropped.
    pub fn new(providers: Vec<Arc<dyn CollectionProvider<T>>>, warm_ttl: Duration) -> Self {
        let warmed = Cache::builder()
            .max_capacity(WARM_CAPACITY)
            .time_to_live(warm_ttl)
            .build();
        Self { providers, warmed }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Stash a payload obtained elsewhere (e.g. returned by a login call)
    /// so the next fetch for `scope` resolves without touching the network.
    pub fn warm(&self, scope: &ScopeKey, data: Collection<T>) {
        debug!(scope = %scope, items = data.len(), "warmed payload stored");
        self.warmed.insert(scope.clone(), data);
    }

    /// Whether a warmed payload is waiting for `scope`.
    pub fn is_warm(&self, scope: &ScopeKey) -> bool {
        self.warmed.contains_key(scope)
    }

    /// Fetch the collection for `scope`.
    ///
    /// A warmed payload is consumed first. Otherwise every provider is
    /// queried concurrently and the first success is returned; failures
    /// are collected until every provider has answered.
    #[instrument(skip(self, cancel), fields(scope = %scope))]
    pub async fn race(&self, scope: &ScopeKey, cancel: &CancellationToken) -> Result<Collection<T>> {
        if let Some(data) = self.warmed.remove(scope) {
            debug!(items = data.len(), "serving warmed payload");
            return Ok(data);
        }
        if self.providers.is_empty() {
            return Err(CorralError::NoProvider);
        }
        if cancel.is_cancelled() {
            return Err(CorralError::Cancelled);
        }

        let mut attempts: FuturesUnordered<_> = self
            .providers
            .iter()
            .map(|provider| async move {
                let start = Instant::now();
                let result = provider.list(scope).await;
                record_request(provider.name(), start, result.is_ok());
                (provider.name(), result)
            })
            .collect();

        let settle = async {
            let mut errors = Vec::new();
            while let Some((name, result)) = attempts.next().await {
                match result {
                    Ok(items) => {
                        debug!(provider = name, items = items.len(), "provider won the race");
                        return Ok(Arc::new(items));
                    }
                    Err(e) => {
                        warn!(provider = name, error = %e, "provider failed");
                        errors.push(e);
                    }
                }
            }
            Err(CorralError::AllSourcesFailed { errors })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("fetch cancelled");
                Err(CorralError::Cancelled)
            }
            result = settle => result,
        }
    }
}

fn record_request(provider: &str, start: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(telemetry::PROVIDER_REQUESTS_TOTAL,
        "provider" => provider.to_owned(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::PROVIDER_REQUEST_DURATION_SECONDS,
        "provider" => provider.to_owned(),
    )
    .record(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        delay: Duration,
        outcome: std::result::Result<Vec<Value>, fn() -> CorralError>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn ok(name: &'static str, delay_ms: u64, items: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                name,
                delay: Duration::from_millis(delay_ms),
                outcome: Ok(items),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(name: &'static str, delay_ms: u64, make: fn() -> CorralError) -> Arc<Self> {
            Arc::new(Self {
                name,
                delay: Duration::from_millis(delay_ms),
                outcome: Err(make),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CollectionProvider<Value> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn list(&self, _scope: &ScopeKey) -> Result<Vec<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.outcome {
                Ok(items) => Ok(items.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn fetcher(providers: Vec<Arc<dyn CollectionProvider<Value>>>) -> Fetcher<Value> {
        Fetcher::new(providers, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_success_wins() {
        let slow = Fixed::ok("slow", 500, vec![json!({"id": "slow"})]);
        let fast = Fixed::ok("fast", 10, vec![json!({"id": "fast"})]);
        let f = fetcher(vec![slow.clone(), fast.clone()]);

        let data = f
            .race(&ScopeKey::from("u1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(data[0]["id"], "fast");
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_stop_the_race() {
        let broken = Fixed::err("broken", 1, || CorralError::Timeout);
        let good = Fixed::ok("good", 50, vec![json!({"id": 1})]);
        let f = fetcher(vec![broken, good]);

        let data = f
            .race(&ScopeKey::from("u1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_are_aggregated() {
        let a = Fixed::err("a", 5, || CorralError::Timeout);
        let b = Fixed::err("b", 10, || CorralError::Http("connection reset".into()));
        let f = fetcher(vec![a, b]);

        let err = f
            .race(&ScopeKey::from("u1"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            CorralError::AllSourcesFailed { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].is_timeout());
            }
            other => panic!("expected AllSourcesFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_providers() {
        let f = fetcher(vec![]);
        let err = f
            .race(&ScopeKey::from("u1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CorralError::NoProvider));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resolves_to_cancelled() {
        let slow = Fixed::ok("slow", 10_000, vec![]);
        let f = fetcher(vec![slow]);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                token.cancel();
            }
        };
        let scope = ScopeKey::from("u1");
        let (result, ()) = tokio::join!(f.race(&scope, &token), canceller);
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn warmed_payload_is_consumed_once() {
        let upstream = Fixed::ok("upstream", 0, vec![json!({"id": "net"})]);
        let f = fetcher(vec![upstream.clone()]);
        let scope = ScopeKey::from("u1");
        f.warm(&scope, Arc::new(vec![json!({"id": "warm"})]));
        assert!(f.is_warm(&scope));

        let token = CancellationToken::new();
        let first = f.race(&scope, &token).await.unwrap();
        assert_eq!(first[0]["id"], "warm");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);

        let second = f.race(&scope, &token).await.unwrap();
        assert_eq!(second[0]["id"], "net");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }
}
