//! Mock cluster for testing.
//!
//! Maps every server URL to its own [`MemoryStore`], so tests can inspect
//! each server's accounts, roles, job documents and recorded calls after a
//! run. Stores can be wrapped in a [`FlakyStore`] to inject transient failures.

use couch_mesh::config::{Credential, ProvisionConfig, ProvisionSettings, RetryPolicies, REPLICATOR_DB};
use couch_mesh::document::ReplicationDocument;
use couch_mesh::error::{ProvisionError, ProvisionResult};
use couch_mesh::resilience::RetryConfig;
use couch_mesh::store::{BoxFuture, CouchStore, MemoryStore, Revision, RoleScope, StoreConnector, StoredDocument, UserRecord};
use couch_mesh::ServerEndpoint;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A set of in-memory servers behind a [`StoreConnector`].
///
/// # Example
/// ```rust,ignore
/// let cluster = MockCluster::new(&["http://a:5984", "http://b:5984"]);
/// let config = cluster.config(&["orders"], false);
/// Provisioner::new(&config, &cluster)?.with_policies(fast_policies()).run().await?;
/// assert_eq!(cluster.store(0).document_ids("_replicator").len(), 1);
/// ```
pub struct MockCluster {
    servers: Vec<ServerEndpoint>,
    stores: HashMap<String, Arc<MemoryStore>>,
    /// Wrap opened stores so every n-th call fails with a transient error.
    flaky_every: Option<usize>,
    /// Servers whose connection cannot even be created.
    unopenable: Vec<String>,
    opened: Mutex<Vec<String>>,
}

impl MockCluster {
    pub fn new(urls: &[&str]) -> Self {
        let servers: Vec<ServerEndpoint> = urls
            .iter()
            .map(|u| ServerEndpoint::parse(u).expect("valid test URL"))
            .collect();
        let stores = servers
            .iter()
            .map(|s| (s.as_str().to_string(), Arc::new(MemoryStore::new())))
            .collect();
        Self {
            servers,
            stores,
            flaky_every: None,
            unopenable: Vec::new(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// `n` servers named `http://couch-{i}:5984`.
    pub fn with_size(n: usize) -> Self {
        let urls: Vec<String> = (0..n).map(|i| format!("http://couch-{}:5984", i)).collect();
        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        Self::new(&refs)
    }

    /// Make every `n`-th call on each opened store fail with a 503.
    pub fn flaky(mut self, n: usize) -> Self {
        self.flaky_every = Some(n);
        self
    }

    /// Make opening the server at `index` fail.
    pub fn unopenable(mut self, index: usize) -> Self {
        self.unopenable.push(self.servers[index].as_str().to_string());
        self
    }

    pub fn servers(&self) -> &[ServerEndpoint] {
        &self.servers
    }

    /// The store behind the server at `index`.
    pub fn store(&self, index: usize) -> &MemoryStore {
        &self.stores[self.servers[index].as_str()]
    }

    /// Servers opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Sum of state changes across all servers.
    pub fn total_changes(&self) -> u64 {
        self.stores.values().map(|s| s.change_count()).sum()
    }

    /// Forget recorded calls on every server.
    pub fn clear_calls(&self) {
        for store in self.stores.values() {
            store.clear_calls();
        }
    }

    /// A config covering every server in the cluster.
    pub fn config(&self, databases: &[&str], editor: bool) -> ProvisionConfig {
        ProvisionConfig {
            servers: self.servers.clone(),
            databases: databases.iter().map(|d| d.to_string()).collect(),
            admin: Credential::new("admin", "admin-pw"),
            replicator: Credential::new("replicator", "repl-pw"),
            editor: editor.then(|| Credential::new("editor", "edit-pw")),
            settings: ProvisionSettings::default(),
        }
    }
}

impl StoreConnector for MockCluster {
    fn open(&self, endpoint: &ServerEndpoint) -> ProvisionResult<Arc<dyn CouchStore>> {
        self.opened.lock().unwrap().push(endpoint.as_str().to_string());
        if self.unopenable.iter().any(|u| u == endpoint.as_str()) {
            return Err(ProvisionError::InvalidUrl {
                url: endpoint.to_string(),
                message: "cannot create client".to_string(),
            });
        }
        let store = self
            .stores
            .get(endpoint.as_str())
            .cloned()
            .ok_or_else(|| ProvisionError::InvalidUrl {
                url: endpoint.to_string(),
                message: "not part of the cluster".to_string(),
            })?;
        Ok(match self.flaky_every {
            Some(n) => Arc::new(FlakyStore::new(store, n)) as Arc<dyn CouchStore>,
            None => store as Arc<dyn CouchStore>,
        })
    }
}

/// Retry bounds short enough for unpaused tests.
pub fn fast_policies() -> RetryPolicies {
    RetryPolicies {
        liveness: RetryConfig::testing(),
        reconcile: RetryConfig::testing(),
        provisioning: RetryConfig::testing(),
    }
}

/// Retry bounds with many quick attempts, for flaky stores.
pub fn patient_policies() -> RetryPolicies {
    let patient = RetryConfig {
        max_attempts: 20,
        delay: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    };
    RetryPolicies {
        liveness: patient.clone(),
        reconcile: patient.clone(),
        provisioning: patient,
    }
}

/// Decoded job documents stored on a server.
pub fn job_documents(store: &MemoryStore) -> Vec<ReplicationDocument> {
    store
        .document_ids(REPLICATOR_DB)
        .iter()
        .filter_map(|id| store.document(REPLICATOR_DB, id))
        .filter_map(|doc| ReplicationDocument::from_value(&doc.body))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// FlakyStore
// ═══════════════════════════════════════════════════════════════════════════════

/// Wraps a store and fails every `every`-th call with a 503 before it
/// reaches the inner store.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    every: usize,
    calls: AtomicUsize,
    injected: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, every: usize) -> Self {
        Self {
            inner,
            every: every.max(1),
            calls: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
        }
    }

    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn trip(&self, operation: &str) -> Option<ProvisionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.every == 0 {
            self.injected.fetch_add(1, Ordering::SeqCst);
            Some(ProvisionError::from_status(operation, 503, "injected failure"))
        } else {
            None
        }
    }
}

fn failed<'a, T: Send + 'a>(err: ProvisionError) -> BoxFuture<'a, T> {
    Box::pin(async move { Err(err) })
}

impl CouchStore for FlakyStore {
    fn ping(&self) -> BoxFuture<'_, ()> {
        match self.trip("ping") {
            Some(err) => failed(err),
            None => self.inner.ping(),
        }
    }

    fn get_user(&self, auth: &Credential, name: &str) -> BoxFuture<'_, UserRecord> {
        match self.trip("get_user") {
            Some(err) => failed(err),
            None => self.inner.get_user(auth, name),
        }
    }

    fn create_user(&self, auth: &Credential, user: &Credential, roles: &[String]) -> BoxFuture<'_, ()> {
        match self.trip("create_user") {
            Some(err) => failed(err),
            None => self.inner.create_user(auth, user, roles),
        }
    }

    fn grant_role(&self, auth: &Credential, name: &str, role: &str) -> BoxFuture<'_, ()> {
        match self.trip("grant_role") {
            Some(err) => failed(err),
            None => self.inner.grant_role(auth, name, role),
        }
    }

    fn add_database_role(
        &self,
        auth: &Credential,
        database: &str,
        role: &str,
        scope: RoleScope,
    ) -> BoxFuture<'_, ()> {
        match self.trip("add_database_role") {
            Some(err) => failed(err),
            None => self.inner.add_database_role(auth, database, role, scope),
        }
    }

    fn read_document(&self, auth: &Credential, database: &str, id: &str) -> BoxFuture<'_, StoredDocument> {
        match self.trip("read_document") {
            Some(err) => failed(err),
            None => self.inner.read_document(auth, database, id),
        }
    }

    fn delete_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: &Revision,
    ) -> BoxFuture<'_, ()> {
        match self.trip("delete_document") {
            Some(err) => failed(err),
            None => self.inner.delete_document(auth, database, id, rev),
        }
    }

    fn save_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: Option<&Revision>,
        body: &Value,
    ) -> BoxFuture<'_, Revision> {
        match self.trip("save_document") {
            Some(err) => failed(err),
            None => self.inner.save_document(auth, database, id, rev, body),
        }
    }
}
