//! Account and database role provisioning.
//!
//! Both operations are additive: an existing role is never removed, and a
//! role that is already present causes no grant. Each function performs a
//! single attempt; callers wrap them in [`retry`](crate::resilience::retry).

use crate::config::Credential;
use crate::error::{ProvisionError, ProvisionResult};
use crate::store::{CouchStore, RoleScope};

/// What [`ensure_account`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    /// The account did not exist and was created with these roles.
    Created { roles: Vec<String> },
    /// The account existed; these missing roles were granted.
    RolesGranted { roles: Vec<String> },
    /// The account existed with every required role.
    Unchanged,
}

impl AccountOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::RolesGranted { .. } => "roles_granted",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Make sure `account` exists on the server and holds every role in
/// `required_roles`.
///
/// - Found: grants each missing role, one call per role. The first failed
///   grant aborts.
/// - Not found: creates the account with its password and all roles in one call.
/// - Any other lookup error is returned unchanged.
///
/// A 404 from a create or grant comes back as [`ProvisionError::NotReady`].
pub async fn ensure_account(
    store: &dyn CouchStore,
    admin: &Credential,
    account: &Credential,
    required_roles: &[String],
) -> ProvisionResult<AccountOutcome> {
    match store.get_user(admin, &account.username).await {
        Ok(existing) => {
            let missing: Vec<String> = required_roles
                .iter()
                .filter(|role| !existing.roles.contains(role))
                .cloned()
                .collect();
            if missing.is_empty() {
                return Ok(AccountOutcome::Unchanged);
            }
            for role in &missing {
                store
                    .grant_role(admin, &account.username, role)
                    .await
                    .map_err(ProvisionError::into_write_error)?;
            }
            Ok(AccountOutcome::RolesGranted { roles: missing })
        }
        Err(e) if e.is_not_found() => {
            store
                .create_user(admin, account, required_roles)
                .await
                .map_err(ProvisionError::into_write_error)?;
            Ok(AccountOutcome::Created {
                roles: required_roles.to_vec(),
            })
        }
        Err(e) => Err(e),
    }
}

/// What [`ensure_database_roles`] requested.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleOutcome {
    pub member_roles: Vec<String>,
    pub admin_roles: Vec<String>,
}

/// Make sure `database`'s member and admin role lists contain the given roles.
///
/// Issues one add call per role, members first. The remote side treats an
/// already-present role as a no-op. The first failure aborts; roles added
/// before it stay added. A missing database comes back as
/// [`ProvisionError::NotReady`] so the caller's retry waits for it.
pub async fn ensure_database_roles(
    store: &dyn CouchStore,
    admin: &Credential,
    database: &str,
    member_roles: &[String],
    admin_roles: &[String],
) -> ProvisionResult<RoleOutcome> {
    for role in member_roles {
        store
            .add_database_role(admin, database, role, RoleScope::Member)
            .await
            .map_err(ProvisionError::into_write_error)?;
    }
    for role in admin_roles {
        store
            .add_database_role(admin, database, role, RoleScope::Admin)
            .await
            .map_err(ProvisionError::into_write_error)?;
    }
    Ok(RoleOutcome {
        member_roles: member_roles.to_vec(),
        admin_roles: admin_roles.to_vec(),
    })
}
