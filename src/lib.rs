//! # Couch Mesh
//!
//! Provisions full-mesh continuous replication between CouchDB-compatible
//! servers.
//!
//! ## Architecture
//!
//! For every configured server, the [`Provisioner`] makes sure the service
//! accounts and database roles exist, then writes one replication job
//! document per (other server, database) pair into the server's
//! `_replicator` database. The database engine runs the replication itself.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                                couch-mesh                                 │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌──────────────────────────┐  │
//! │  │ establish   │───►│ ensure_account   │───►│ ensure_database_roles    │  │
//! │  │ (liveness)  │    │ (replicator,     │    │ (_replicator, each db)   │  │
//! │  └─────────────┘    │  editor)         │    └────────────┬─────────────┘  │
//! │                     └──────────────────┘                 │                │
//! │                                                          ▼                │
//! │                                           ┌──────────────────────────┐    │
//! │                                           │ Reconciler               │    │
//! │                                           │ (job document per edge)  │    │
//! │                                           └──────────────────────────┘    │
//! │         every remote call: retry(policy) over CouchStore                  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotence
//!
//! Job documents are keyed by `sha1("{source},{target}")` and only written
//! when their content differs, accounts only get missing roles, and role
//! lists only grow. A second run with the same configuration changes nothing.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use couch_mesh::{Credential, HttpConnector, ProvisionConfig, Provisioner, ServerEndpoint};
//! use couch_mesh::config::ProvisionSettings;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> couch_mesh::ProvisionResult<()> {
//!     let config = ProvisionConfig {
//!         servers: vec![
//!             ServerEndpoint::parse("http://couch-a:5984")?,
//!             ServerEndpoint::parse("http://couch-b:5984")?,
//!         ],
//!         databases: vec!["orders".to_string()],
//!         admin: Credential::new("admin", "secret"),
//!         replicator: Credential::new("replicator", "secret"),
//!         editor: None,
//!         settings: ProvisionSettings::default(),
//!     };
//!     config.validate()?;
//!
//!     let connector = HttpConnector::new(config.settings.request_timeout_duration()?);
//!     let report = Provisioner::new(&config, &connector)?.run().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod couch;
pub mod document;
pub mod error;
pub mod metrics;
pub mod provision;
pub mod reconcile;
pub mod resilience;
pub mod store;

// Re-exports for convenience
pub use config::{Credential, ProvisionConfig, ProvisionSettings, ServerEndpoint, UpdateStrategy};
pub use coordinator::{ProvisionEvent, Provisioner, RunReport, ServerReport};
pub use couch::{CouchClient, HttpConnector};
pub use document::{document_id, ReplicationDocument};
pub use error::{ErrorKind, ProvisionError, ProvisionResult};
pub use reconcile::{DocumentOutcome, Reconciler};
pub use resilience::{retry, RetryConfig};
pub use store::{CouchStore, MemoryStore, StoreConnector};
