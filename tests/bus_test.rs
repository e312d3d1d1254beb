//! Session events, prefetch and warm payloads through the invalidation bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use corral::{CollectionProvider, Corral, Result, ScopeKey, SessionEvent};
use serde_json::{Value, json};

#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

impl Counting {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectionProvider<Value> for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list(&self, scope: &ScopeKey) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![json!({"id": 1, "owner": scope.as_str()})])
    }
}

fn cache(provider: &Arc<Counting>) -> Corral<Value> {
    Corral::builder()
        .provider(provider.clone())
        .build()
        .unwrap()
}

async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn warm_payload_is_served_without_network() {
    let provider = Arc::new(Counting::default());
    let cache = cache(&provider);
    let u1 = ScopeKey::from("u1");

    cache
        .bus()
        .warm(&u1, Arc::new(vec![json!({"id": 9}), json!({"id": 10})]));
    assert!(cache.store().fetcher().is_warm(&u1));

    let snapshot = cache.mount("u1").settled().await;
    assert_eq!(snapshot.len(), 2);
    assert_eq!(provider.calls(), 0);
    assert!(!cache.store().fetcher().is_warm(&u1), "payload is consumed once");
}

#[tokio::test]
async fn warm_payload_for_another_scope_is_ignored() {
    let provider = Arc::new(Counting::default());
    let cache = cache(&provider);

    cache
        .bus()
        .warm(&ScopeKey::from("u2"), Arc::new(vec![json!({"id": 9})]));
    let snapshot = cache.mount("u1").settled().await;
    assert_eq!(snapshot.data.unwrap()[0]["owner"], "u1");
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn login_prefetches_the_new_scope() {
    let provider = Arc::new(Counting::default());
    let cache = cache(&provider);

    cache.bus().handle(SessionEvent::LoggedIn(ScopeKey::from("u1")));
    settle_tasks().await;
    assert_eq!(provider.calls(), 1);

    let consumer = cache.mount("u1");
    let snapshot = consumer.read();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn prefetch_is_skipped_when_data_is_fresh() {
    let provider = Arc::new(Counting::default());
    let cache = cache(&provider);
    let u1 = ScopeKey::from("u1");

    cache.mount("u1").settled().await;
    assert_eq!(provider.calls(), 1);

    cache.bus().prefetch(&u1);
    settle_tasks().await;
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn logout_then_login_fetches_again() {
    let provider = Arc::new(Counting::default());
    let cache = cache(&provider);
    let u1 = ScopeKey::from("u1");

    cache.mount("u1").settled().await;
    cache.bus().handle(SessionEvent::LoggedOut(u1.clone()));
    assert!(cache.store().read(&u1).is_none());
    assert!(cache.store().persistent().get(&u1).is_none());

    cache.bus().handle(SessionEvent::LoggedIn(u1.clone()));
    settle_tasks().await;
    assert_eq!(provider.calls(), 2);
    assert!(cache.store().read(&u1).is_some());
}

#[tokio::test]
async fn bus_clones_share_the_store() {
    let provider = Arc::new(Counting::default());
    let cache = cache(&provider);
    let bus = cache.bus().clone();

    cache.mount("u1").settled().await;
    assert!(bus.invalidate(None));
    assert!(cache.store().read(&ScopeKey::from("u1")).is_none());
}
