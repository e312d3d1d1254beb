//! Failure handling: errors never clear data, and repeated failures are
//! escalated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use corral::{
    CacheConfig, CacheState, CollectionProvider, Corral, CorralError, Result, ScopeKey,
};
use serde_json::{Value, json};

struct Flaky {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl Flaky {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CollectionProvider<Value> for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn list(&self, _scope: &ScopeKey) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(CorralError::Http("connection refused".into()))
        } else {
            Ok(vec![json!({"id": "a"}), json!({"id": "b"})])
        }
    }
}

struct AlwaysDown;

#[async_trait]
impl CollectionProvider<Value> for AlwaysDown {
    fn name(&self) -> &str {
        "down"
    }

    async fn list(&self, _scope: &ScopeKey) -> Result<Vec<Value>> {
        Err(CorralError::Api {
            status: 503,
            message: "maintenance".into(),
        })
    }
}

#[tokio::test]
async fn failed_fetch_keeps_existing_data() {
    let provider = Flaky::new();
    let cache: Corral<Value> = Corral::builder()
        .provider(provider.clone())
        .build()
        .unwrap();
    let consumer = cache.mount("u1");
    assert_eq!(consumer.settled().await.len(), 2);

    provider.fail(true);
    let err = consumer.refetch(true).await.unwrap_err();
    assert!(err.is_network());

    let snapshot = consumer.read();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.error.is_some());
    assert_eq!(cache.store().state(&ScopeKey::from("u1")), CacheState::Ready);
}

#[tokio::test]
async fn failure_without_data_ends_in_error_state() {
    let cache: Corral<Value> = Corral::builder()
        .provider(Arc::new(AlwaysDown))
        .build()
        .unwrap();
    let consumer = cache.mount("u1");

    let snapshot = consumer.settled().await;
    assert!(snapshot.data.is_none());
    let error = snapshot.error.expect("error exposed");
    match &*error {
        CorralError::AllSourcesFailed { errors } => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(errors[0], CorralError::Api { status: 503, .. }));
        }
        other => panic!("expected AllSourcesFailed, got {other:?}"),
    }
    assert_eq!(cache.store().state(&ScopeKey::from("u1")), CacheState::Error);
}

#[tokio::test]
async fn one_failing_provider_does_not_fail_the_fetch() {
    let cache: Corral<Value> = Corral::builder()
        .provider(Arc::new(AlwaysDown))
        .provider(Flaky::new())
        .build()
        .unwrap();
    let snapshot = cache.mount("u1").settled().await;
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn repeated_failures_mark_the_entry_degraded() {
    let provider = Flaky::new();
    let cache: Corral<Value> = Corral::builder()
        .provider(provider.clone())
        .config(CacheConfig::new().max_consecutive_failures(2))
        .build()
        .unwrap();
    let u1 = ScopeKey::from("u1");
    let consumer = cache.mount("u1");
    consumer.settled().await;

    provider.fail(true);
    let _ = consumer.refetch(true).await;
    assert!(!cache.store().read(&u1).unwrap().degraded);
    let _ = consumer.refetch(true).await;
    let entry = cache.store().read(&u1).unwrap();
    assert!(entry.degraded);
    assert_eq!(entry.data.len(), 2);

    provider.fail(false);
    consumer.refetch(true).await.unwrap();
    let entry = cache.store().read(&u1).unwrap();
    assert!(!entry.degraded);
    assert!(entry.error.is_none());
    assert!(consumer.read().error.is_none());
}

#[tokio::test]
async fn recovery_clears_the_error() {
    let provider = Flaky::new();
    provider.fail(true);
    let cache: Corral<Value> = Corral::builder()
        .provider(provider.clone())
        .build()
        .unwrap();
    let consumer = cache.mount("u1");
    assert!(consumer.settled().await.error.is_some());

    provider.fail(false);
    consumer.refetch(false).await.unwrap();
    let snapshot = consumer.read();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.error.is_none());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn build_requires_a_provider() {
    let result = Corral::<Value>::builder().build();
    assert!(matches!(result, Err(CorralError::NoProvider)));
}

#[test]
fn build_rejects_invalid_config() {
    let result = Corral::<Value>::builder()
        .provider(Arc::new(AlwaysDown))
        .config(CacheConfig::new().namespace(""))
        .build();
    assert!(matches!(result, Err(CorralError::Configuration(_))));
}

struct Panicking;

#[async_trait]
impl CollectionProvider<Value> for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn list(&self, _scope: &ScopeKey) -> Result<Vec<Value>> {
        panic!("provider bug");
    }
}

#[tokio::test]
async fn panicking_fetch_is_reported_as_a_permanent_failure() {
    let cache: Corral<Value> = Corral::builder()
        .provider(Arc::new(Panicking))
        .build()
        .unwrap();
    let consumer = cache.mount("u1");

    let snapshot = consumer.settled().await;
    let error = snapshot.error.expect("error exposed");
    assert!(matches!(*error, CorralError::TaskFailed(_)));
    assert!(!error.is_transient());
    assert_eq!(cache.store().state(&ScopeKey::from("u1")), CacheState::Error);
}
