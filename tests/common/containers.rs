// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for CouchDB.
//!
//! Provides helpers to spin up single-node CouchDB containers for
//! end-to-end tests.

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

pub const COUCH_ADMIN: &str = "admin";
pub const COUCH_ADMIN_PASSWORD: &str = "admin-pw";

/// Create a single-node CouchDB container with an admin account.
///
/// Uses the official couchdb:3 image. The liveness probe of the code under
/// test does the real waiting; the container is only given a head start.
pub fn couch_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("couchdb", "3")
        .with_env_var("COUCHDB_USER", COUCH_ADMIN)
        .with_env_var("COUCHDB_PASSWORD", COUCH_ADMIN_PASSWORD)
        .with_exposed_port(5984)
        .with_wait_for(WaitFor::seconds(3));
    docker.run(image)
}

/// Get the server URL for a container.
pub fn couch_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(5984);
    format!("http://127.0.0.1:{}", port)
}

/// A CouchDB server with the system databases and the given databases created.
pub struct TestCouch<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub url: String,
}

impl<'a> TestCouch<'a> {
    pub async fn new(docker: &'a Cli, databases: &[&str]) -> Self {
        let container = couch_container(docker);
        let url = couch_url(&container);
        let couch = Self { container, url };
        couch.wait_until_up().await;

        let mut all = vec!["_users", "_replicator"];
        all.extend_from_slice(databases);
        for db in all {
            couch.create_database(db).await;
        }
        couch
    }

    async fn wait_until_up(&self) {
        let client = reqwest::Client::new();
        for _ in 0..60 {
            if let Ok(response) = client.get(&self.url).send().await {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        panic!("CouchDB at {} did not come up", self.url);
    }

    /// Create a database; an existing one is left alone.
    pub async fn create_database(&self, name: &str) {
        let response = reqwest::Client::new()
            .put(format!("{}/{}", self.url, name))
            .basic_auth(COUCH_ADMIN, Some(COUCH_ADMIN_PASSWORD))
            .send()
            .await
            .expect("create database request");
        let status = response.status().as_u16();
        assert!(status == 201 || status == 202 || status == 412, "create {}: HTTP {}", name, status);
    }

    /// Fetch a document as the admin.
    pub async fn get(&self, path: &str) -> serde_json::Value {
        reqwest::Client::new()
            .get(format!("{}/{}", self.url, path))
            .basic_auth(COUCH_ADMIN, Some(COUCH_ADMIN_PASSWORD))
            .send()
            .await
            .expect("get request")
            .json()
            .await
            .expect("json body")
    }
}
