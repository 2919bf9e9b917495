// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote store integration traits.
//!
//! Defines the capability surface the provisioning core needs from a
//! document-database server. [`CouchClient`](crate::couch::CouchClient) is the
//! HTTP implementation; [`MemoryStore`] is an in-memory implementation that
//! records every call, used by tests and for offline experiments.
//!
//! # Example
//!
//! ```rust,no_run
//! use couch_mesh::config::Credential;
//! use couch_mesh::store::{CouchStore, MemoryStore};
//!
//! # async fn example() -> couch_mesh::ProvisionResult<()> {
//! let store = MemoryStore::new();
//! store.ping().await?;
//! let admin = Credential::new("admin", "secret");
//! let user = store.get_user(&admin, "replicator").await;
//! assert!(user.unwrap_err().is_not_found());
//! # Ok(())
//! # }
//! ```

use crate::config::{Credential, ServerEndpoint};
use crate::error::{ProvisionError, ProvisionResult};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ProvisionResult<T>> + Send + 'a>>;

/// Opaque version stamp of a stored document. Required to update or delete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(pub String);

impl Revision {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored document as read back from the remote store.
///
/// `body` has the store's bookkeeping fields (`_id`, `_rev`) removed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub body: Value,
    pub rev: Revision,
}

/// An account record as returned by a user lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub roles: Vec<String>,
}

/// Which role list of a database a role is added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleScope {
    /// Read/write access.
    Member,
    /// Role-management access.
    Admin,
}

impl std::fmt::Display for RoleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Member => write!(f, "member"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// What the provisioning core needs from one database server.
///
/// Every method except [`ping`](Self::ping) authenticates with `auth`.
/// A missing resource must be reported as an error whose
/// [`is_not_found()`](ProvisionError::is_not_found) is true.
pub trait CouchStore: Send + Sync {
    /// Liveness probe. No authentication.
    fn ping(&self) -> BoxFuture<'_, ()>;

    /// Look up an account by name.
    fn get_user(&self, auth: &Credential, name: &str) -> BoxFuture<'_, UserRecord>;

    /// Create an account with a password and its full role set.
    fn create_user(&self, auth: &Credential, user: &Credential, roles: &[String]) -> BoxFuture<'_, ()>;

    /// Grant one role to an existing account.
    fn grant_role(&self, auth: &Credential, name: &str, role: &str) -> BoxFuture<'_, ()>;

    /// Add a role to a database's member or admin role list.
    ///
    /// Adding a role that is already present is a no-op, not an error.
    fn add_database_role(
        &self,
        auth: &Credential,
        database: &str,
        role: &str,
        scope: RoleScope,
    ) -> BoxFuture<'_, ()>;

    /// Read a document and its current revision.
    fn read_document(&self, auth: &Credential, database: &str, id: &str) -> BoxFuture<'_, StoredDocument>;

    /// Delete a document at the given revision.
    fn delete_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: &Revision,
    ) -> BoxFuture<'_, ()>;

    /// Save a document. `rev` is `None` for a new document, or the current
    /// revision to replace an existing one. Returns the new revision.
    fn save_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: Option<&Revision>,
        body: &Value,
    ) -> BoxFuture<'_, Revision>;
}

/// Opens a [`CouchStore`] for a server.
///
/// Opening performs no network I/O; liveness is checked separately by
/// [`establish`](crate::connection::establish).
pub trait StoreConnector: Send + Sync {
    fn open(&self, endpoint: &ServerEndpoint) -> ProvisionResult<Arc<dyn CouchStore>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// MemoryStore
// ═══════════════════════════════════════════════════════════════════════════════

/// A call made against a [`MemoryStore`], in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Ping,
    GetUser { name: String },
    CreateUser { name: String, roles: Vec<String> },
    GrantRole { name: String, role: String },
    AddDatabaseRole { database: String, role: String, scope: RoleScope },
    ReadDocument { database: String, id: String },
    DeleteDocument { database: String, id: String, rev: String },
    SaveDocument { database: String, id: String, rev: Option<String> },
}

impl StoreCall {
    /// Whether this call changes remote state.
    ///
    /// Adding a role that is already present is recorded as a mutating call
    /// because the caller cannot know it was a no-op.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::CreateUser { .. }
                | Self::GrantRole { .. }
                | Self::AddDatabaseRole { .. }
                | Self::DeleteDocument { .. }
                | Self::SaveDocument { .. }
        )
    }

    /// Whether this call writes to a document database (not accounts or roles).
    pub fn is_document_write(&self) -> bool {
        matches!(self, Self::DeleteDocument { .. } | Self::SaveDocument { .. })
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    members: BTreeSet<String>,
    admins: BTreeSet<String>,
    docs: HashMap<String, (Value, Revision)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, (String, Vec<String>)>,
    databases: HashMap<String, DatabaseState>,
    calls: Vec<(StoreCall, Option<String>)>,
    failures: VecDeque<ProvisionError>,
    scheduled: HashMap<usize, ProvisionError>,
    changes: u64,
}

/// In-memory [`CouchStore`] that records every call.
///
/// Databases spring into existence on first use. Failures can be queued
/// with [`fail_next`](Self::fail_next), or pinned to the n-th call with
/// [`fail_at`](Self::fail_at); a failing call is recorded but not performed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    rev_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock only happens in a failing test
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_rev(&self) -> Revision {
        let n = self.rev_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Revision(format!("{}-mem", n))
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Seed an account.
    pub fn insert_user(&self, name: &str, password: &str, roles: &[&str]) {
        let roles = roles.iter().map(|r| r.to_string()).collect();
        self.lock()
            .users
            .insert(name.to_string(), (password.to_string(), roles));
    }

    /// Seed a role on a database.
    pub fn insert_database_role(&self, database: &str, role: &str, scope: RoleScope) {
        let mut state = self.lock();
        let db = state.databases.entry(database.to_string()).or_default();
        match scope {
            RoleScope::Member => db.members.insert(role.to_string()),
            RoleScope::Admin => db.admins.insert(role.to_string()),
        };
    }

    /// Seed a document. Returns its revision.
    pub fn insert_document(&self, database: &str, id: &str, body: Value) -> Revision {
        let rev = self.next_rev();
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .docs
            .insert(id.to_string(), (body, rev.clone()));
        rev
    }

    /// Make the next call fail with `error`. Queued errors are consumed in order.
    pub fn fail_next(&self, error: ProvisionError) {
        self.lock().failures.push_back(error);
    }

    /// Make the call with 0-based index `call_index` (counting every call
    /// recorded so far, including earlier ones) fail with `error`.
    pub fn fail_at(&self, call_index: usize, error: ProvisionError) {
        self.lock().scheduled.insert(call_index, error);
    }

    /// Drop recorded calls (state is kept).
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.iter().map(|(c, _)| c.clone()).collect()
    }

    /// All recorded calls with the username that issued them (`None` for ping).
    pub fn calls_with_auth(&self) -> Vec<(StoreCall, Option<String>)> {
        self.lock().calls.clone()
    }

    /// Recorded calls that change remote state.
    pub fn mutating_calls(&self) -> Vec<StoreCall> {
        self.calls().into_iter().filter(StoreCall::is_mutating).collect()
    }

    /// Number of calls that actually changed stored state.
    ///
    /// Unlike [`mutating_calls`](Self::mutating_calls), adding a role that is
    /// already present does not count.
    pub fn change_count(&self) -> u64 {
        self.lock().changes
    }

    /// Roles of an account, if it exists.
    pub fn user_roles(&self, name: &str) -> Option<Vec<String>> {
        self.lock().users.get(name).map(|(_, roles)| roles.clone())
    }

    /// Password of an account, if it exists.
    pub fn user_password(&self, name: &str) -> Option<String> {
        self.lock().users.get(name).map(|(pw, _)| pw.clone())
    }

    /// Roles of a database in a scope (sorted).
    pub fn database_roles(&self, database: &str, scope: RoleScope) -> Vec<String> {
        let state = self.lock();
        let Some(db) = state.databases.get(database) else {
            return Vec::new();
        };
        let set = match scope {
            RoleScope::Member => &db.members,
            RoleScope::Admin => &db.admins,
        };
        set.iter().cloned().collect()
    }

    /// A stored document, if present.
    pub fn document(&self, database: &str, id: &str) -> Option<StoredDocument> {
        let state = self.lock();
        state
            .databases
            .get(database)
            .and_then(|db| db.docs.get(id))
            .map(|(body, rev)| StoredDocument {
                body: body.clone(),
                rev: rev.clone(),
            })
    }

    /// Ids of all documents in a database.
    pub fn document_ids(&self, database: &str) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<String> = state
            .databases
            .get(database)
            .map(|db| db.docs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    // =========================================================================
    // Call handling
    // =========================================================================

    /// Record a call and pop a queued failure, if any.
    fn begin(&self, call: StoreCall, auth: Option<&Credential>) -> ProvisionResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        let index = state.calls.len();
        state.calls.push((call, auth.map(|a| a.username.clone())));
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        match state.scheduled.remove(&index) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    fn do_get_user(&self, auth: &Credential, name: &str) -> ProvisionResult<UserRecord> {
        let state = self.begin(StoreCall::GetUser { name: name.to_string() }, Some(auth))?;
        state
            .users
            .get(name)
            .map(|(_, roles)| UserRecord {
                name: name.to_string(),
                roles: roles.clone(),
            })
            .ok_or_else(|| ProvisionError::not_found("get user", format!("user '{}' missing", name)))
    }

    fn do_create_user(&self, auth: &Credential, user: &Credential, roles: &[String]) -> ProvisionResult<()> {
        let call = StoreCall::CreateUser {
            name: user.username.clone(),
            roles: roles.to_vec(),
        };
        let mut state = self.begin(call, Some(auth))?;
        if state.users.contains_key(&user.username) {
            return Err(ProvisionError::from_status("create user", 409, "user exists"));
        }
        state
            .users
            .insert(user.username.clone(), (user.password.clone(), roles.to_vec()));
        state.changes += 1;
        Ok(())
    }

    fn do_grant_role(&self, auth: &Credential, name: &str, role: &str) -> ProvisionResult<()> {
        let call = StoreCall::GrantRole {
            name: name.to_string(),
            role: role.to_string(),
        };
        let mut state = self.begin(call, Some(auth))?;
        let (_, roles) = state
            .users
            .get_mut(name)
            .ok_or_else(|| ProvisionError::not_found("grant role", format!("user '{}' missing", name)))?;
        if !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
            state.changes += 1;
        }
        Ok(())
    }

    fn do_add_database_role(
        &self,
        auth: &Credential,
        database: &str,
        role: &str,
        scope: RoleScope,
    ) -> ProvisionResult<()> {
        let call = StoreCall::AddDatabaseRole {
            database: database.to_string(),
            role: role.to_string(),
            scope,
        };
        let mut state = self.begin(call, Some(auth))?;
        let db = state.databases.entry(database.to_string()).or_default();
        let inserted = match scope {
            RoleScope::Member => db.members.insert(role.to_string()),
            RoleScope::Admin => db.admins.insert(role.to_string()),
        };
        if inserted {
            state.changes += 1;
        }
        Ok(())
    }

    fn do_read_document(&self, auth: &Credential, database: &str, id: &str) -> ProvisionResult<StoredDocument> {
        let call = StoreCall::ReadDocument {
            database: database.to_string(),
            id: id.to_string(),
        };
        let state = self.begin(call, Some(auth))?;
        state
            .databases
            .get(database)
            .and_then(|db| db.docs.get(id))
            .map(|(body, rev)| StoredDocument {
                body: body.clone(),
                rev: rev.clone(),
            })
            .ok_or_else(|| ProvisionError::not_found("read document", format!("'{}/{}' missing", database, id)))
    }

    fn do_delete_document(&self, auth: &Credential, database: &str, id: &str, rev: &Revision) -> ProvisionResult<()> {
        let call = StoreCall::DeleteDocument {
            database: database.to_string(),
            id: id.to_string(),
            rev: rev.0.clone(),
        };
        let mut state = self.begin(call, Some(auth))?;
        let docs = &mut state.databases.entry(database.to_string()).or_default().docs;
        let current = docs.get(id).map(|(_, r)| r.clone());
        match current {
            None => Err(ProvisionError::not_found("delete document", format!("'{}/{}' missing", database, id))),
            Some(current) if &current != rev => {
                Err(ProvisionError::from_status("delete document", 409, "revision mismatch"))
            }
            Some(_) => {
                docs.remove(id);
                state.changes += 1;
                Ok(())
            }
        }
    }

    fn do_save_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: Option<&Revision>,
        body: &Value,
    ) -> ProvisionResult<Revision> {
        let call = StoreCall::SaveDocument {
            database: database.to_string(),
            id: id.to_string(),
            rev: rev.map(|r| r.0.clone()),
        };
        let new_rev = self.next_rev();
        let mut state = self.begin(call, Some(auth))?;
        let docs = &mut state.databases.entry(database.to_string()).or_default().docs;
        let current = docs.get(id).map(|(_, r)| r);
        if current != rev {
            return Err(ProvisionError::from_status("save document", 409, "document update conflict"));
        }
        docs.insert(id.to_string(), (body.clone(), new_rev.clone()));
        state.changes += 1;
        Ok(new_rev)
    }
}

impl CouchStore for MemoryStore {
    fn ping(&self) -> BoxFuture<'_, ()> {
        let result = self.begin(StoreCall::Ping, None).map(|_| ());
        Box::pin(async move { result })
    }

    fn get_user(&self, auth: &Credential, name: &str) -> BoxFuture<'_, UserRecord> {
        let result = self.do_get_user(auth, name);
        Box::pin(async move { result })
    }

    fn create_user(&self, auth: &Credential, user: &Credential, roles: &[String]) -> BoxFuture<'_, ()> {
        let result = self.do_create_user(auth, user, roles);
        Box::pin(async move { result })
    }

    fn grant_role(&self, auth: &Credential, name: &str, role: &str) -> BoxFuture<'_, ()> {
        let result = self.do_grant_role(auth, name, role);
        Box::pin(async move { result })
    }

    fn add_database_role(
        &self,
        auth: &Credential,
        database: &str,
        role: &str,
        scope: RoleScope,
    ) -> BoxFuture<'_, ()> {
        let result = self.do_add_database_role(auth, database, role, scope);
        Box::pin(async move { result })
    }

    fn read_document(&self, auth: &Credential, database: &str, id: &str) -> BoxFuture<'_, StoredDocument> {
        let result = self.do_read_document(auth, database, id);
        Box::pin(async move { result })
    }

    fn delete_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: &Revision,
    ) -> BoxFuture<'_, ()> {
        let result = self.do_delete_document(auth, database, id, rev);
        Box::pin(async move { result })
    }

    fn save_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: Option<&Revision>,
        body: &Value,
    ) -> BoxFuture<'_, Revision> {
        let result = self.do_save_document(auth, database, id, rev, body);
        Box::pin(async move { result })
    }
}
