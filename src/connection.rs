//! Server connection establishment.
//!
//! Opens a store handle for one server and blocks until the server answers
//! a liveness probe, retrying with the liveness policy. Exhaustion is fatal
//! for that server.

use crate::config::ServerEndpoint;
use crate::error::{ProvisionResult, ResultExt};
use crate::resilience::{retry, RetryConfig};
use crate::store::{CouchStore, StoreConnector};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A store handle for a server that has answered its liveness probe.
pub struct Established {
    pub store: Arc<dyn CouchStore>,
    /// Number of probes it took.
    pub attempts: usize,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Open a connection to `endpoint` and wait until it is alive.
pub async fn establish(
    connector: &dyn StoreConnector,
    endpoint: &ServerEndpoint,
    policy: &RetryConfig,
) -> ProvisionResult<Established> {
    let store = connector
        .open(endpoint)
        .context(|| format!("cannot create database connection to '{}'", endpoint))?;

    let attempts = AtomicUsize::new(0);
    retry(policy, "ping", || {
        attempts.fetch_add(1, Ordering::Relaxed);
        store.ping()
    })
    .await
    .context(|| format!("cannot ping database '{}'", endpoint))?;

    Ok(Established {
        store,
        attempts: attempts.load(Ordering::Relaxed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ProvisionError};
    use crate::store::{MemoryStore, StoreCall};
    use std::time::Duration;

    struct SingleStore(Arc<MemoryStore>);

    impl StoreConnector for SingleStore {
        fn open(&self, _endpoint: &ServerEndpoint) -> ProvisionResult<Arc<dyn CouchStore>> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    impl StoreConnector for Unreachable {
        fn open(&self, endpoint: &ServerEndpoint) -> ProvisionResult<Arc<dyn CouchStore>> {
            Err(ProvisionError::InvalidUrl {
                url: endpoint.to_string(),
                message: "no route".to_string(),
            })
        }
    }

    fn endpoint() -> ServerEndpoint {
        ServerEndpoint::parse("http://couch-a:5984").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_waits_for_liveness() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..3 {
            store.fail_next(ProvisionError::transport_msg("ping", "connection refused"));
        }

        let established = establish(&SingleStore(store.clone()), &endpoint(), &RetryConfig::liveness())
            .await
            .unwrap();
        assert_eq!(established.attempts, 4);
        assert_eq!(store.calls(), vec![StoreCall::Ping; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_gives_up() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..10 {
            store.fail_next(ProvisionError::transport_msg("ping", "connection refused"));
        }
        let policy = RetryConfig {
            max_attempts: 5,
            delay: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        };

        let err = establish(&SingleStore(store.clone()), &endpoint(), &policy)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cannot ping database 'http://couch-a:5984/'"));
        assert!(msg.contains("connection refused"));
        assert_eq!(store.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_establish_open_failure_is_fatal() {
        let err = establish(&Unreachable, &endpoint(), &RetryConfig::liveness())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert!(err.to_string().contains("cannot create database connection"));
    }
}
