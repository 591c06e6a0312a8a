#![allow(dead_code)]

use async_trait::async_trait;
use backoffice_sync::{
    Client, ClientPatch, ClientStatus, Entity, MemoryCollection, NewClient,
    OptimisticCollectionStore, RecordId, RemoteCollection, RemoteError, StoreConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub type Store = OptimisticCollectionStore<Arc<ScriptedRemote>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    List,
    Create,
    Update,
    Delete,
    SetStatus,
}

/// Installs a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn client(id: u64, name: &str) -> Client {
    Client::from_draft(RecordId::Assigned(id), &draft(name))
}

pub fn draft(name: &str) -> NewClient {
    NewClient::new(name, format!("{}@example.com", name.to_lowercase()))
}

pub fn names(clients: &[Client]) -> Vec<String> {
    clients.iter().map(|c| c.name.clone()).collect()
}

/// In-memory remote with per-verb fault injection and call holds.
pub struct ScriptedRemote {
    inner: MemoryCollection<Client>,
    failures: Mutex<HashMap<Verb, VecDeque<RemoteError>>>,
    holds: Mutex<HashMap<Verb, VecDeque<oneshot::Receiver<()>>>>,
    calls: Mutex<Vec<(Verb, Option<u64>)>>,
}

impl ScriptedRemote {
    pub fn new(records: Vec<Client>) -> Self {
        Self {
            inner: MemoryCollection::seeded(records),
            failures: Mutex::new(HashMap::new()),
            holds: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn server(&self) -> &MemoryCollection<Client> {
        &self.inner
    }

    /// The next `verb` call fails with `error` (after any hold is released).
    pub fn fail_next(&self, verb: Verb, error: RemoteError) {
        self.failures
            .lock()
            .unwrap()
            .entry(verb)
            .or_default()
            .push_back(error);
    }

    /// The next `verb` call blocks until the returned sender fires or drops.
    pub fn hold_next(&self, verb: Verb) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.holds
            .lock()
            .unwrap()
            .entry(verb)
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn call_count(&self, verb: Verb) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, _)| *v == verb)
            .count()
    }

    /// Yields until `verb` has been called `n` times.
    pub async fn wait_for_calls(&self, verb: Verb, n: usize) {
        while self.call_count(verb) < n {
            tokio::task::yield_now().await;
        }
    }

    async fn enter(&self, verb: Verb, id: Option<u64>) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push((verb, id));

        let hold = self
            .holds
            .lock()
            .unwrap()
            .get_mut(&verb)
            .and_then(VecDeque::pop_front);
        if let Some(release) = hold {
            let _ = release.await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&verb)
            .and_then(VecDeque::pop_front);
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteCollection for ScriptedRemote {
    type Entity = Client;

    async fn list(&self) -> Result<Vec<Client>, RemoteError> {
        self.enter(Verb::List, None).await?;
        self.inner.list().await
    }

    async fn create(&self, draft: &NewClient) -> Result<Client, RemoteError> {
        self.enter(Verb::Create, None).await?;
        self.inner.create(draft).await
    }

    async fn update(&self, key: &u64, patch: &ClientPatch) -> Result<Client, RemoteError> {
        self.enter(Verb::Update, Some(*key)).await?;
        self.inner.update(key, patch).await
    }

    async fn delete(&self, key: &u64) -> Result<(), RemoteError> {
        self.enter(Verb::Delete, Some(*key)).await?;
        self.inner.delete(key).await
    }

    async fn set_status(&self, key: &u64, status: &ClientStatus) -> Result<Client, RemoteError> {
        self.enter(Verb::SetStatus, Some(*key)).await?;
        self.inner.set_status(key, status).await
    }
}

/// Store over a scripted remote seeded with `names` (ids 1..), already loaded.
pub async fn loaded_store(names: &[&str]) -> (Arc<ScriptedRemote>, Store) {
    loaded_store_with(names, StoreConfig::default()).await
}

pub async fn loaded_store_with(names: &[&str], config: StoreConfig) -> (Arc<ScriptedRemote>, Store) {
    init_tracing();
    let records = names
        .iter()
        .zip(1_u64..)
        .map(|(name, id)| client(id, name))
        .collect();
    let remote = Arc::new(ScriptedRemote::new(records));
    let store = OptimisticCollectionStore::new(Arc::clone(&remote), config).unwrap();
    store.load().await.unwrap();
    (remote, store)
}
