//! Configuration for a provisioning run.
//!
//! A [`ProvisionConfig`] is built once at startup (from a JSON file,
//! command-line flags and environment variables), validated with
//! [`ProvisionConfig::validate()`], and then only borrowed.
//!
//! # Quick Start
//!
//! ```rust
//! use couch_mesh::config::{Credential, ProvisionConfig, ServerEndpoint};
//!
//! let config = ProvisionConfig {
//!     servers: vec![
//!         ServerEndpoint::parse("http://couch-a:5984").unwrap(),
//!         ServerEndpoint::parse("http://couch-b:5984").unwrap(),
//!     ],
//!     databases: vec!["orders".into()],
//!     admin: Credential::new("admin", "secret"),
//!     replicator: Credential::new("replicator", "secret"),
//!     editor: None,
//!     settings: Default::default(),
//! };
//! config.validate().unwrap();
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ProvisionConfig
//! ├── servers: Vec<ServerEndpoint>   # every server gets replication from every other one
//! ├── databases: Vec<String>         # must already exist on every server
//! ├── admin: Credential              # full server privileges
//! ├── replicator: Credential         # identity that performs replication reads
//! ├── editor: Option<Credential>     # general document access (optional)
//! └── settings: ProvisionSettings
//!     ├── retry: RetrySettings       # liveness / reconcile / provisioning bounds
//!     ├── update_strategy            # in_place | recreate
//!     ├── request_timeout: "5s"
//!     └── user_ctx: true
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "servers": ["http://couch-a:5984", "http://couch-b:5984"],
//!   "databases": ["orders", "customers"],
//!   "admin": { "username": "admin", "password": "..." },
//!   "replicator": { "username": "replicator", "password": "..." },
//!   "settings": {
//!     "update_strategy": "in_place",
//!     "retry": { "liveness": { "max_attempts": 30, "delay": "1s", "timeout": "2m" } }
//!   }
//! }
//! ```

use crate::error::{ProvisionError, ProvisionResult};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Name of the database holding replication job documents.
pub const REPLICATOR_DB: &str = "_replicator";

/// Role held by the replicator account.
pub const ROLE_REPLICATOR: &str = "replicator";

/// Role held by the editor account.
pub const ROLE_EDITOR: &str = "editor";

// ═══════════════════════════════════════════════════════════════════════════════
// Credential
// ═══════════════════════════════════════════════════════════════════════════════

/// A username/password pair. Supplied by configuration, never generated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ServerEndpoint
// ═══════════════════════════════════════════════════════════════════════════════

/// URL of one database server. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerEndpoint(Url);

impl ServerEndpoint {
    /// Parse and check a server URL.
    ///
    /// Only `http` and `https` URLs with a host are accepted. Userinfo, path,
    /// query and fragment are discarded so that two spellings of the same
    /// server compare equal.
    pub fn parse(raw: &str) -> ProvisionResult<Self> {
        let invalid = |message: String| ProvisionError::InvalidUrl {
            url: raw.to_string(),
            message,
        };

        let mut url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        // Cannot fail for http(s) URLs with a host
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_path("/");
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self(url))
    }

    /// The normalized URL string. Used for self-exclusion.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The normalized URL.
    pub fn url(&self) -> &Url {
        &self.0
    }

    /// URL of `database` on this server with `credential` embedded as userinfo.
    ///
    /// This is the `source` of a replication job pulling from this server.
    pub fn replication_source(&self, database: &str, credential: &Credential) -> ProvisionResult<Url> {
        let mut url = self.0.clone();
        url.set_username(&credential.username)
            .and_then(|_| url.set_password(Some(&credential.password)))
            .map_err(|_| ProvisionError::InvalidUrl {
                url: self.0.to_string(),
                message: "cannot embed credentials".to_string(),
            })?;
        url.path_segments_mut()
            .map_err(|_| ProvisionError::InvalidUrl {
                url: self.0.to_string(),
                message: "cannot carry a path".to_string(),
            })?
            .clear()
            .push(database);
        Ok(url)
    }
}

impl std::fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ServerEndpoint {
    type Error = ProvisionError;

    fn try_from(raw: String) -> ProvisionResult<Self> {
        Self::parse(&raw)
    }
}

impl From<ServerEndpoint> for String {
    fn from(endpoint: ServerEndpoint) -> Self {
        endpoint.0.into()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a run needs, constructed once and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Servers to configure. Every server replicates from every other one.
    pub servers: Vec<ServerEndpoint>,

    /// Databases to replicate. They must already exist on every server.
    pub databases: Vec<String>,

    /// Credential with full server privileges.
    pub admin: Credential,

    /// Credential used as the replication identity.
    pub replicator: Credential,

    /// Credential for general document access. `None` means no editor
    /// account and no editor roles.
    #[serde(default)]
    pub editor: Option<Credential>,

    #[serde(default)]
    pub settings: ProvisionSettings,
}

impl ProvisionConfig {
    /// A config with nothing set. Fails validation until filled in.
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
            databases: Vec::new(),
            admin: Credential::new("", ""),
            replicator: Credential::new("", ""),
            editor: None,
            settings: ProvisionSettings::default(),
        }
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ProvisionResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ProvisionError::Config(format!("cannot parse '{}': {}", path.display(), e))
        })
    }

    /// Check that every required input is present and well-formed.
    pub fn validate(&self) -> ProvisionResult<()> {
        if self.servers.is_empty() {
            return Err(ProvisionError::Config("--server-url must be set".to_string()));
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.as_str()) {
                return Err(ProvisionError::Config(format!("server '{}' listed twice", server)));
            }
        }

        if self.databases.is_empty() {
            return Err(ProvisionError::Config("--db must be set".to_string()));
        }
        if let Some(db) = self.databases.iter().find(|db| db.trim().is_empty()) {
            return Err(ProvisionError::Config(format!("invalid database name '{}'", db)));
        }

        check_credential(&self.admin, "admin")?;
        check_credential(&self.replicator, "replicator")?;
        if let Some(editor) = &self.editor {
            check_credential(editor, "editor")?;
        }

        self.settings.validate()
    }

    /// Roles the replicator account must hold.
    pub fn replicator_roles(&self) -> Vec<String> {
        vec![ROLE_REPLICATOR.to_string()]
    }

    /// Roles the editor account must hold.
    pub fn editor_roles(&self) -> Vec<String> {
        vec![ROLE_EDITOR.to_string()]
    }

    /// Member roles every replicated database must contain.
    pub fn database_member_roles(&self) -> Vec<String> {
        match self.editor {
            Some(_) => vec![ROLE_EDITOR.to_string()],
            None => Vec::new(),
        }
    }

    /// Admin roles every replicated database must contain.
    pub fn database_admin_roles(&self) -> Vec<String> {
        let mut roles = vec![ROLE_REPLICATOR.to_string()];
        if self.editor.is_some() {
            roles.push(ROLE_EDITOR.to_string());
        }
        roles
    }

    /// Admin roles the replicator database must contain.
    pub fn replicator_db_admin_roles(&self) -> Vec<String> {
        vec![ROLE_REPLICATOR.to_string()]
    }

    /// Number of directed replication jobs a full run attempts.
    pub fn expected_jobs(&self) -> usize {
        let n = self.servers.len();
        n * n.saturating_sub(1) * self.databases.len()
    }
}

fn check_credential(credential: &Credential, role: &str) -> ProvisionResult<()> {
    if credential.username.is_empty() {
        return Err(ProvisionError::Config(format!("--{}-user must be set", role)));
    }
    if !credential.is_complete() {
        return Err(ProvisionError::Config(format!("--{}-password must be set", role)));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command-line overrides
// ═══════════════════════════════════════════════════════════════════════════════

/// Values given on the command line or through environment variables.
///
/// Every field that is set replaces the corresponding value of a file
/// config; unset fields leave it alone. Empty strings count as unset.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub servers: Vec<String>,
    pub databases: Vec<String>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub replicator_user: Option<String>,
    pub replicator_password: Option<String>,
    pub editor_user: Option<String>,
    pub editor_password: Option<String>,
    pub update_strategy: Option<String>,
    pub request_timeout: Option<String>,
    pub no_user_ctx: bool,
}

impl ConfigOverrides {
    /// Apply onto `base`, or onto an empty config when there is no file.
    ///
    /// The result still needs [`ProvisionConfig::validate()`].
    pub fn apply(self, base: Option<ProvisionConfig>) -> ProvisionResult<ProvisionConfig> {
        let mut config = base.unwrap_or_else(ProvisionConfig::empty);

        let servers: Vec<&String> = self.servers.iter().filter(|s| !s.trim().is_empty()).collect();
        if !servers.is_empty() {
            config.servers = servers
                .into_iter()
                .map(|raw| ServerEndpoint::parse(raw))
                .collect::<ProvisionResult<_>>()?;
        }
        let databases: Vec<String> = self
            .databases
            .into_iter()
            .map(|db| db.trim().to_string())
            .filter(|db| !db.is_empty())
            .collect();
        if !databases.is_empty() {
            config.databases = databases;
        }

        override_field(&mut config.admin.username, self.admin_user);
        override_field(&mut config.admin.password, self.admin_password);
        override_field(&mut config.replicator.username, self.replicator_user);
        override_field(&mut config.replicator.password, self.replicator_password);

        let editor_user = self.editor_user.filter(|v| !v.is_empty());
        let editor_password = self.editor_password.filter(|v| !v.is_empty());
        if editor_user.is_some() || editor_password.is_some() {
            let editor = config.editor.get_or_insert_with(|| Credential::new("", ""));
            override_field(&mut editor.username, editor_user);
            override_field(&mut editor.password, editor_password);
        }

        if let Some(strategy) = self.update_strategy.filter(|v| !v.is_empty()) {
            config.settings.update_strategy = strategy.parse()?;
        }
        override_field(&mut config.settings.request_timeout, self.request_timeout);
        if self.no_user_ctx {
            config.settings.user_ctx = false;
        }

        Ok(config)
    }
}

fn override_field(field: &mut String, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        *field = value;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ProvisionSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// How a changed replication job document is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Save the new content with the current revision. No window without a document.
    #[default]
    InPlace,
    /// Delete the current revision, then save the new content as a fresh document.
    Recreate,
}

impl std::str::FromStr for UpdateStrategy {
    type Err = ProvisionError;

    fn from_str(s: &str) -> ProvisionResult<Self> {
        match s {
            "in_place" | "in-place" => Ok(Self::InPlace),
            "recreate" => Ok(Self::Recreate),
            other => Err(ProvisionError::Config(format!("unknown update strategy '{}'", other))),
        }
    }
}

/// Tunables. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSettings {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub update_strategy: UpdateStrategy,

    /// Per-request HTTP timeout as a duration string (e.g., "5s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Whether job documents carry a `user_ctx`.
    #[serde(default = "default_true")]
    pub user_ctx: bool,
}

fn default_request_timeout() -> String {
    "5s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            update_strategy: UpdateStrategy::default(),
            request_timeout: default_request_timeout(),
            user_ctx: true,
        }
    }
}

impl ProvisionSettings {
    /// Parse the request_timeout string to a Duration.
    pub fn request_timeout_duration(&self) -> ProvisionResult<Duration> {
        parse_duration("request_timeout", &self.request_timeout)
    }

    fn validate(&self) -> ProvisionResult<()> {
        self.request_timeout_duration()?;
        self.retry.liveness.to_retry_config("liveness")?;
        self.retry.reconcile.to_retry_config("reconcile")?;
        self.retry.provisioning.to_retry_config("provisioning")?;
        Ok(())
    }
}

/// Retry bounds per call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "RetryPolicySettings::liveness")]
    pub liveness: RetryPolicySettings,
    #[serde(default = "RetryPolicySettings::reconcile")]
    pub reconcile: RetryPolicySettings,
    #[serde(default = "RetryPolicySettings::provisioning")]
    pub provisioning: RetryPolicySettings,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            liveness: RetryPolicySettings::liveness(),
            reconcile: RetryPolicySettings::reconcile(),
            provisioning: RetryPolicySettings::provisioning(),
        }
    }
}

impl RetrySettings {
    /// Resolve all three policies.
    pub fn policies(&self) -> ProvisionResult<RetryPolicies> {
        Ok(RetryPolicies {
            liveness: self.liveness.to_retry_config("liveness")?,
            reconcile: self.reconcile.to_retry_config("reconcile")?,
            provisioning: self.provisioning.to_retry_config("provisioning")?,
        })
    }
}

/// Serialized form of one [`RetryConfig`]. Durations are humantime strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicySettings {
    pub max_attempts: usize,
    pub delay: String,
    pub timeout: String,
}

impl RetryPolicySettings {
    fn liveness() -> Self {
        Self::from(&RetryConfig::liveness())
    }

    fn reconcile() -> Self {
        Self::from(&RetryConfig::reconcile())
    }

    fn provisioning() -> Self {
        Self::from(&RetryConfig::provisioning())
    }

    /// Parse into a [`RetryConfig`]; `site` names the policy in errors.
    pub fn to_retry_config(&self, site: &str) -> ProvisionResult<RetryConfig> {
        if self.max_attempts == 0 {
            return Err(ProvisionError::Config(format!(
                "retry.{}.max_attempts must be at least 1",
                site
            )));
        }
        Ok(RetryConfig {
            max_attempts: self.max_attempts,
            delay: parse_duration(&format!("retry.{}.delay", site), &self.delay)?,
            timeout: parse_duration(&format!("retry.{}.timeout", site), &self.timeout)?,
        })
    }
}

impl From<&RetryConfig> for RetryPolicySettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: humantime::format_duration(config.delay).to_string(),
            timeout: humantime::format_duration(config.timeout).to_string(),
        }
    }
}

/// Resolved retry bounds for each call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicies {
    pub liveness: RetryConfig,
    pub reconcile: RetryConfig,
    pub provisioning: RetryConfig,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            liveness: RetryConfig::liveness(),
            reconcile: RetryConfig::reconcile(),
            provisioning: RetryConfig::provisioning(),
        }
    }
}

fn parse_duration(field: &str, raw: &str) -> ProvisionResult<Duration> {
    humantime::parse_duration(raw)
        .map_err(|e| ProvisionError::Config(format!("invalid {} '{}': {}", field, raw, e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
