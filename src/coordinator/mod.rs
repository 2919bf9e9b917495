// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mesh provisioning coordinator.
//!
//! The orchestrator that ties together:
//! - Connection establishment via [`crate::connection::establish`]
//! - Account provisioning via [`crate::provision::ensure_account`]
//! - Database roles via [`crate::provision::ensure_database_roles`]
//! - Job documents via [`crate::reconcile::Reconciler`]
//!
//! # Architecture
//!
//! Servers are processed strictly one after another, and each one to
//! completion before the next:
//! 1. Wait until the server is alive (liveness policy)
//! 2. Ensure the replicator account, then the editor account if configured
//! 3. Grant `replicator` admin access to `_replicator`
//! 4. For every *other* server and every database: configure the database
//!    roles, then reconcile the job document that pulls it (reconcile policy)
//!
//! The first unrecoverable error stops the run; no later database or server
//! is attempted.

mod types;

pub use types::{JobReport, ProvisionEvent, RunReport, ServerReport};

use crate::config::{Credential, ProvisionConfig, RetryPolicies, ServerEndpoint, REPLICATOR_DB};
use crate::connection::establish;
use crate::error::{ProvisionResult, ResultExt};
use crate::metrics;
use crate::provision::{ensure_account, ensure_database_roles, AccountOutcome};
use crate::reconcile::Reconciler;
use crate::resilience::retry;
use crate::store::{CouchStore, StoreConnector};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Drives a full provisioning run.
///
/// Holds only borrowed, immutable configuration; a `Provisioner` can be run
/// any number of times and every run re-reads remote state.
pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    connector: &'a dyn StoreConnector,
    policies: RetryPolicies,
    reconciler: Reconciler<'a>,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner. Retry bounds come from the config's settings.
    ///
    /// The config must already be [validated](ProvisionConfig::validate).
    pub fn new(config: &'a ProvisionConfig, connector: &'a dyn StoreConnector) -> ProvisionResult<Self> {
        let policies = config.settings.retry.policies()?;
        Ok(Self {
            config,
            connector,
            policies,
            reconciler: Reconciler::new(config),
        })
    }

    /// Replace the retry bounds (tests use short delays).
    pub fn with_policies(mut self, policies: RetryPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Provision every configured server, in order.
    pub async fn run(&self) -> ProvisionResult<RunReport> {
        info!(
            servers = self.config.servers.len(),
            databases = self.config.databases.len(),
            expected_jobs = self.config.expected_jobs(),
            strategy = ?self.reconciler.strategy(),
            "Starting mesh provisioning"
        );

        let mut report = RunReport::default();
        for server in &self.config.servers {
            let started = Instant::now();
            let result = self.provision_server(server, &mut report.events).await;
            metrics::record_server_duration(started.elapsed());

            match result {
                Ok(server_report) => {
                    metrics::record_server(true);
                    info!(
                        server = %server,
                        jobs = server_report.jobs.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Server provisioned"
                    );
                    report.servers.push(server_report);
                }
                Err(e) => {
                    metrics::record_server(false);
                    error!(server = %server, error = %e, "Server provisioning failed");
                    return Err(e);
                }
            }
        }

        info!(
            jobs = report.jobs_attempted(),
            created = report.created(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            "Mesh provisioning complete"
        );
        Ok(report)
    }

    /// Provision one server. Events are appended to `events` as they happen,
    /// so a failed server still leaves a trail of what was done.
    pub async fn provision_server(
        &self,
        server: &ServerEndpoint,
        events: &mut Vec<ProvisionEvent>,
    ) -> ProvisionResult<ServerReport> {
        let mut report = ServerReport::new(server.clone());

        let established = establish(self.connector, server, &self.policies.liveness).await?;
        report.liveness_attempts = established.attempts;
        self.emit(
            events,
            ProvisionEvent::Connected {
                server: server.clone(),
                attempts: established.attempts,
            },
        );
        let store = established.store.as_ref();

        let replicator_roles = self.config.replicator_roles();
        let outcome = self
            .provision_account(store, server, &self.config.replicator, &replicator_roles)
            .await?;
        report.accounts.push((self.config.replicator.username.clone(), outcome.clone()));
        self.emit(
            events,
            ProvisionEvent::Account {
                server: server.clone(),
                user: self.config.replicator.username.clone(),
                outcome,
            },
        );

        if let Some(editor) = &self.config.editor {
            let editor_roles = self.config.editor_roles();
            let outcome = self
                .provision_account(store, server, editor, &editor_roles)
                .await?;
            report.accounts.push((editor.username.clone(), outcome.clone()));
            self.emit(
                events,
                ProvisionEvent::Account {
                    server: server.clone(),
                    user: editor.username.clone(),
                    outcome,
                },
            );
        }

        self.configure_database(store, server, REPLICATOR_DB, &[], &self.config.replicator_db_admin_roles(), events)
            .await?;

        let member_roles = self.config.database_member_roles();
        let admin_roles = self.config.database_admin_roles();
        for source in &self.config.servers {
            if source.as_str() == server.as_str() {
                debug!(server = %server, "Skipping replication from self");
                continue;
            }
            for database in &self.config.databases {
                self.configure_database(store, server, database, &member_roles, &admin_roles, events)
                    .await?;

                let reconciled = retry(&self.policies.reconcile, "reconcile replication", || {
                    self.reconciler.reconcile(source, database, store)
                })
                .await
                .context(|| {
                    format!(
                        "cannot reconcile replication of '{}' from '{}' on '{}'",
                        database, source, server
                    )
                })?;

                metrics::record_document_outcome(reconciled.outcome.label());
                report.jobs.push(JobReport {
                    source: source.clone(),
                    database: database.clone(),
                    document_id: reconciled.document_id.clone(),
                    outcome: reconciled.outcome,
                });
                self.emit(
                    events,
                    ProvisionEvent::Document {
                        server: server.clone(),
                        source: source.clone(),
                        database: database.clone(),
                        document_id: reconciled.document_id,
                        outcome: reconciled.outcome,
                    },
                );
            }
        }

        Ok(report)
    }

    async fn provision_account(
        &self,
        store: &dyn CouchStore,
        server: &ServerEndpoint,
        account: &Credential,
        roles: &[String],
    ) -> ProvisionResult<AccountOutcome> {
        let admin = &self.config.admin;
        let outcome = retry(&self.policies.provisioning, "ensure account", || {
            ensure_account(store, admin, account, roles)
        })
        .await
        .context(|| format!("cannot provision user '{}' on '{}'", account.username, server))?;

        metrics::record_account_outcome(outcome.label());
        Ok(outcome)
    }

    async fn configure_database(
        &self,
        store: &dyn CouchStore,
        server: &ServerEndpoint,
        database: &str,
        member_roles: &[String],
        admin_roles: &[String],
        events: &mut Vec<ProvisionEvent>,
    ) -> ProvisionResult<()> {
        let admin = &self.config.admin;
        let outcome = retry(&self.policies.provisioning, "configure database roles", || {
            ensure_database_roles(store, admin, database, member_roles, admin_roles)
        })
        .await
        .context(|| format!("cannot configure roles of database '{}' on '{}'", database, server))?;

        self.emit(
            events,
            ProvisionEvent::DatabaseRoles {
                server: server.clone(),
                database: database.to_string(),
                outcome,
            },
        );
        Ok(())
    }

    fn emit(&self, events: &mut Vec<ProvisionEvent>, event: ProvisionEvent) {
        log_event(&event);
        events.push(event);
    }
}

fn log_event(event: &ProvisionEvent) {
    let server = event.server();
    match event {
        ProvisionEvent::Connected { attempts, .. } => {
            info!(server = %server, attempts, "Server is alive");
        }
        ProvisionEvent::Account { user, outcome, .. } => match outcome {
            AccountOutcome::Created { roles } => {
                info!(server = %server, user = %user, roles = ?roles, "User created");
            }
            AccountOutcome::RolesGranted { roles } => {
                info!(server = %server, user = %user, roles = ?roles, "Roles granted");
            }
            AccountOutcome::Unchanged => {
                debug!(server = %server, user = %user, "User already provisioned");
            }
        },
        ProvisionEvent::DatabaseRoles { database, outcome, .. } => {
            debug!(
                server = %server,
                database = %database,
                members = ?outcome.member_roles,
                admins = ?outcome.admin_roles,
                "Database roles configured"
            );
        }
        ProvisionEvent::Document {
            source,
            database,
            document_id,
            outcome,
            ..
        } => {
            // Source is logged without its embedded credential
            info!(
                server = %server,
                source = %source,
                database = %database,
                document_id = %document_id,
                outcome = outcome.label(),
                "Replication job reconciled"
            );
        }
    }
}
