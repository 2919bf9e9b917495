//! Run report and event types.
//!
//! Core operations return outcomes instead of logging. The [`Provisioner`]
//! turns each outcome into a [`ProvisionEvent`], logs it, and folds it into
//! a [`RunReport`].
//!
//! # Event Order Per Server
//!
//! ```text
//! Connected
//!    │
//!    ↓
//! Account (replicator) ─→ Account (editor, if configured)
//!    │
//!    ↓
//! DatabaseRoles (_replicator)
//!    │
//!    ↓
//! for each other server, for each database:
//!    DatabaseRoles (database) ─→ Document
//! ```
//!
//! [`Provisioner`]: super::Provisioner

use crate::config::ServerEndpoint;
use crate::provision::{AccountOutcome, RoleOutcome};
use crate::reconcile::DocumentOutcome;

/// One step completed by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionEvent {
    /// The server answered its liveness probe.
    Connected {
        server: ServerEndpoint,
        attempts: usize,
    },

    /// A service account was checked.
    Account {
        server: ServerEndpoint,
        user: String,
        outcome: AccountOutcome,
    },

    /// A database's role lists were configured.
    DatabaseRoles {
        server: ServerEndpoint,
        database: String,
        outcome: RoleOutcome,
    },

    /// A replication job document was reconciled.
    Document {
        server: ServerEndpoint,
        source: ServerEndpoint,
        database: String,
        document_id: String,
        outcome: DocumentOutcome,
    },
}

impl ProvisionEvent {
    /// The server this event happened on.
    pub fn server(&self) -> &ServerEndpoint {
        match self {
            Self::Connected { server, .. }
            | Self::Account { server, .. }
            | Self::DatabaseRoles { server, .. }
            | Self::Document { server, .. } => server,
        }
    }
}

/// One reconciled replication edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub source: ServerEndpoint,
    pub database: String,
    pub document_id: String,
    pub outcome: DocumentOutcome,
}

/// Everything done on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReport {
    pub server: ServerEndpoint,

    /// Liveness probes it took to reach the server.
    pub liveness_attempts: usize,

    /// `(username, outcome)` per service account, in provisioning order.
    pub accounts: Vec<(String, AccountOutcome)>,

    /// Replication edges pulled into this server.
    pub jobs: Vec<JobReport>,
}

impl ServerReport {
    pub fn new(server: ServerEndpoint) -> Self {
        Self {
            server,
            liveness_attempts: 0,
            accounts: Vec::new(),
            jobs: Vec::new(),
        }
    }

    fn count(&self, outcome: DocumentOutcome) -> usize {
        self.jobs.iter().filter(|job| job.outcome == outcome).count()
    }
}

/// Result of a complete run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub servers: Vec<ServerReport>,

    /// Every event, in the order it happened.
    pub events: Vec<ProvisionEvent>,
}

impl RunReport {
    /// Replication jobs attempted across all servers.
    pub fn jobs_attempted(&self) -> usize {
        self.servers.iter().map(|s| s.jobs.len()).sum()
    }

    /// Job documents that did not exist before.
    pub fn created(&self) -> usize {
        self.servers.iter().map(|s| s.count(DocumentOutcome::Created)).sum()
    }

    /// Job documents replaced, in place or by delete and save.
    pub fn updated(&self) -> usize {
        self.servers
            .iter()
            .map(|s| s.count(DocumentOutcome::Updated) + s.count(DocumentOutcome::Recreated))
            .sum()
    }

    /// Job documents that already matched.
    pub fn unchanged(&self) -> usize {
        self.servers.iter().map(|s| s.count(DocumentOutcome::Unchanged)).sum()
    }

    /// All reconciled edges, flattened.
    pub fn jobs(&self) -> impl Iterator<Item = (&ServerEndpoint, &JobReport)> {
        self.servers
            .iter()
            .flat_map(|s| s.jobs.iter().map(move |job| (&s.server, job)))
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} servers, {} replication jobs ({} created, {} updated, {} unchanged)",
            self.servers.len(),
            self.jobs_attempted(),
            self.created(),
            self.updated(),
            self.unchanged()
        )
    }
}
