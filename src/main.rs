//! couch-mesh
//!
//! Sets up full-mesh continuous replication between CouchDB servers.
//!
//! ```text
//! couch-mesh --server-url http://couch-a:5984,http://couch-b:5984 --db orders \
//!     --admin-user admin --admin-password ... \
//!     --replicator-user replicator --replicator-password ...
//! ```

use clap::Parser;
use couch_mesh::config::{ConfigOverrides, ProvisionConfig};
use couch_mesh::{HttpConnector, ProvisionResult, Provisioner, RunReport};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Provision full-mesh replication between CouchDB servers.
#[derive(Parser, Debug)]
#[command(name = "couch-mesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file; flags and environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server URL (repeatable or comma separated)
    #[arg(long = "server-url", value_delimiter = ',')]
    server_url: Vec<String>,

    /// Database to replicate (repeatable or comma separated)
    #[arg(long = "db", value_delimiter = ',')]
    db: Vec<String>,

    /// Admin username
    #[arg(long, env = "COUCHDB_ADMIN_USERNAME")]
    admin_user: Option<String>,

    /// Admin password
    #[arg(long, env = "COUCHDB_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Replicator username
    #[arg(long, env = "COUCHDB_REPLICATOR_USERNAME")]
    replicator_user: Option<String>,

    /// Replicator password
    #[arg(long, env = "COUCHDB_REPLICATOR_PASSWORD", hide_env_values = true)]
    replicator_password: Option<String>,

    /// Editor username
    #[arg(long, env = "COUCHDB_USERNAME")]
    editor_user: Option<String>,

    /// Editor password
    #[arg(long, env = "COUCHDB_PASSWORD", hide_env_values = true)]
    editor_password: Option<String>,

    /// How a changed job document is written (in_place, recreate)
    #[arg(long)]
    update_strategy: Option<String>,

    /// Per-request HTTP timeout (e.g. "5s")
    #[arg(long)]
    request_timeout: Option<String>,

    /// Do not put a user_ctx into job documents
    #[arg(long)]
    no_user_ctx: bool,
}

impl Cli {
    fn into_config(self) -> ProvisionResult<ProvisionConfig> {
        let base = self.config.as_deref().map(|path| ProvisionConfig::from_file(path)).transpose()?;
        let overrides = ConfigOverrides {
            servers: self.server_url,
            databases: self.db,
            admin_user: self.admin_user,
            admin_password: self.admin_password,
            replicator_user: self.replicator_user,
            replicator_password: self.replicator_password,
            editor_user: self.editor_user,
            editor_password: self.editor_password,
            update_strategy: self.update_strategy,
            request_timeout: self.request_timeout,
            no_user_ctx: self.no_user_ctx,
        };
        let config = overrides.apply(base)?;
        config.validate()?;
        Ok(config)
    }
}

fn run(config: &ProvisionConfig) -> ProvisionResult<RunReport> {
    let connector = HttpConnector::new(config.settings.request_timeout_duration()?);
    let provisioner = Provisioner::new(config, &connector)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| couch_mesh::ProvisionError::Config(format!("cannot start runtime: {}", e)))?;
    runtime.block_on(provisioner.run())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting couch-mesh");

    let result = cli.into_config().and_then(|config| run(&config));
    match result {
        Ok(report) => {
            println!("Replication configured: {}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Provisioning failed");
            eprintln!("couch-mesh: {}", e);
            ExitCode::FAILURE
        }
    }
}
