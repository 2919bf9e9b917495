//! Replication job documents.
//!
//! A [`ReplicationDocument`] instructs the database engine to continuously
//! pull one database from one remote server into a local database. It is
//! stored in the `_replicator` database under an identifier derived from its
//! content, so the same replication edge always maps to the same document.
//!
//! # Identifier
//!
//! ```text
//! id = lowercase_hex(sha1("{source},{target}"))
//! ```
//!
//! Only `source` and `target` feed the identifier. Flipping `continuous` or
//! `user_ctx` changes the document content but not its identity, which is what
//! lets the reconciler detect and replace an outdated document.

use crate::config::{Credential, ServerEndpoint, ROLE_REPLICATOR};
use crate::error::{ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Identity the remote engine runs a replication job as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCtx {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Desired state of one directional replication stream.
///
/// Equality is field-by-field; bookkeeping fields added by the store or by
/// the replication engine (`_id`, `_rev`, `_replication_state`, ...) are
/// ignored when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationDocument {
    /// Credential-embedded URL of the source database.
    pub source: String,

    /// Local database name.
    pub target: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub create_target: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub continuous: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ctx: Option<UserCtx>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ReplicationDocument {
    /// Build the document that pulls `database` from `source` into the local
    /// database of the same name.
    pub fn for_edge(
        source: &ServerEndpoint,
        database: &str,
        replicator: &Credential,
        with_user_ctx: bool,
    ) -> ProvisionResult<Self> {
        let source_url = source.replication_source(database, replicator)?;
        let user_ctx = with_user_ctx.then(|| UserCtx {
            name: replicator.username.clone(),
            roles: vec![ROLE_REPLICATOR.to_string()],
        });
        Ok(Self {
            source: source_url.into(),
            target: database.to_string(),
            create_target: false,
            continuous: true,
            user_ctx,
        })
    }

    /// Deterministic identifier of this replication edge.
    pub fn id(&self) -> String {
        document_id(&self.source, &self.target)
    }

    /// JSON body to store.
    pub fn to_value(&self) -> ProvisionResult<Value> {
        serde_json::to_value(self).map_err(|e| ProvisionError::Decode {
            operation: "encode replication document".to_string(),
            message: e.to_string(),
        })
    }

    /// Decode a stored body. `None` if it does not have the shape of a job
    /// document (such a document is treated as outdated).
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

/// Lowercase hex SHA-1 of `"{source},{target}"`.
pub fn document_id(source: &str, target: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    hasher.update(b",");
    hasher.update(target.as_bytes());
    hex::encode(hasher.finalize())
}
