//! Mutations go through the mutator and are followed by a forced reload.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use corral::{CollectionMutator, CollectionProvider, Corral, CorralError, Item, Result, ScopeKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Project {
    id: u32,
    name: String,
}

impl Item for Project {
    fn id(&self) -> String {
        self.id.to_string()
    }
}

fn project(id: u32, name: &str) -> Project {
    Project {
        id,
        name: name.to_string(),
    }
}

/// In-memory backend acting as both provider and mutator.
#[derive(Default)]
struct Backend {
    projects: Mutex<Vec<Project>>,
    lists: AtomicUsize,
    reject_writes: AtomicBool,
}

impl Backend {
    fn with(projects: Vec<Project>) -> Arc<Self> {
        Arc::new(Self {
            projects: Mutex::new(projects),
            ..Self::default()
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(CorralError::Api {
                status: 422,
                message: "name already taken".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CollectionProvider<Project> for Backend {
    fn name(&self) -> &str {
        "backend"
    }

    async fn list(&self, _scope: &ScopeKey) -> Result<Vec<Project>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.projects.lock().unwrap().clone())
    }
}

#[async_trait]
impl CollectionMutator<Project> for Backend {
    fn name(&self) -> &str {
        "backend"
    }

    async fn create(&self, _scope: &ScopeKey, item: &Project) -> Result<Project> {
        self.check_writable()?;
        self.projects.lock().unwrap().push(item.clone());
        Ok(item.clone())
    }

    async fn update(&self, _scope: &ScopeKey, item: &Project) -> Result<Project> {
        self.check_writable()?;
        let mut projects = self.projects.lock().unwrap();
        let existing = projects
            .iter_mut()
            .find(|p| p.id == item.id)
            .ok_or_else(|| CorralError::Api {
                status: 404,
                message: "no such project".into(),
            })?;
        *existing = item.clone();
        Ok(item.clone())
    }

    async fn delete(&self, _scope: &ScopeKey, item: &Project) -> Result<()> {
        self.check_writable()?;
        self.projects.lock().unwrap().retain(|p| p.id != item.id);
        Ok(())
    }
}

fn cache(backend: &Arc<Backend>) -> Corral<Project> {
    Corral::builder()
        .provider(backend.clone())
        .mutator(backend.clone())
        .build()
        .unwrap()
}

#[tokio::test]
async fn created_item_is_visible_on_next_read() {
    let backend = Backend::with(vec![project(1, "alpha")]);
    let cache = cache(&backend);
    let consumer = cache.mount("u1");
    assert_eq!(consumer.settled().await.len(), 1);

    let created = consumer.create(&project(2, "beta")).await.unwrap();
    assert_eq!(created.name, "beta");

    let data = consumer.read().data.unwrap();
    assert!(data.contains(&project(2, "beta")));
    assert_eq!(backend.lists.load(Ordering::SeqCst), 2);

    // Persisted copy follows too.
    let persisted = cache
        .store()
        .persistent()
        .get(&ScopeKey::from("u1"))
        .unwrap();
    assert_eq!(persisted.data.len(), 2);
}

#[tokio::test]
async fn update_and_delete_are_reflected() {
    let backend = Backend::with(vec![project(1, "alpha"), project(2, "beta")]);
    let cache = cache(&backend);
    let consumer = cache.mount("u1");
    consumer.settled().await;

    consumer.update(&project(1, "alpha v2")).await.unwrap();
    assert!(consumer.read().data.unwrap().contains(&project(1, "alpha v2")));

    consumer.delete(&project(2, "beta")).await.unwrap();
    let data = consumer.read().data.unwrap();
    assert_eq!(data.as_slice(), &[project(1, "alpha v2")]);
}

#[tokio::test]
async fn other_consumers_see_the_mutation_on_their_next_mount() {
    let backend = Backend::with(vec![]);
    let cache = cache(&backend);
    let writer = cache.mount("u1");
    writer.settled().await;

    writer.create(&project(7, "gamma")).await.unwrap();

    let reader = cache.mount("u1");
    assert!(!reader.read().loading);
    assert_eq!(reader.read().data.unwrap().as_slice(), &[project(7, "gamma")]);
}

#[tokio::test]
async fn rejected_mutation_keeps_data_and_reports_error() {
    let backend = Backend::with(vec![project(1, "alpha")]);
    let cache = cache(&backend);
    let consumer = cache.mount("u1");
    consumer.settled().await;
    backend.reject_writes.store(true, Ordering::SeqCst);

    let err = consumer.create(&project(2, "alpha")).await.unwrap_err();
    assert!(matches!(*err, CorralError::Api { status: 422, .. }));

    let snapshot = consumer.read();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.error.is_some());
    // No invalidation happened.
    assert!(cache.store().read(&ScopeKey::from("u1")).is_some());
    assert_eq!(backend.lists.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mutations_without_mutator_fail() {
    let backend = Backend::with(vec![]);
    let cache: Corral<Project> = Corral::builder()
        .provider(backend.clone())
        .build()
        .unwrap();
    let consumer = cache.mount("u1");
    consumer.settled().await;

    let err = consumer.create(&project(1, "alpha")).await.unwrap_err();
    assert!(matches!(*err, CorralError::NoMutator));
}
