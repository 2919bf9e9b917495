// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CouchDB HTTP client.
//!
//! Implements [`CouchStore`] against the CouchDB HTTP API with `reqwest`.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | ping | `GET /` (no auth) |
//! | get user | `GET /_users/org.couchdb.user:{name}` |
//! | create user | `PUT /_users/org.couchdb.user:{name}` |
//! | grant role | `GET` the user document, append the role, `PUT` it back |
//! | add database role | `GET /{db}/_security`, append the role, `PUT` it back |
//! | read / delete / save document | `GET`, `DELETE ?rev=`, `PUT` on `/{db}/{id}` |
//!
//! Database names and document ids are percent-encoded as single path
//! segments, so `a/b` is sent as `a%2Fb`.
//!
//! Non-success responses are classified by status code with
//! [`ProvisionError::from_status`]; CouchDB's `{"error", "reason"}` body
//! becomes the message.

use crate::config::{Credential, ServerEndpoint};
use crate::error::{ProvisionError, ProvisionResult};
use crate::metrics;
use crate::store::{BoxFuture, CouchStore, Revision, RoleScope, StoreConnector, StoredDocument, UserRecord};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const USERS_DB: &str = "_users";
const USER_PREFIX: &str = "org.couchdb.user:";

/// HTTP client for one CouchDB server.
#[derive(Debug, Clone)]
pub struct CouchClient {
    http: Client,
    base: Url,
}

impl CouchClient {
    /// Create a client. No request is sent until the first call.
    pub fn new(endpoint: &ServerEndpoint, request_timeout: Duration) -> ProvisionResult<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProvisionError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base: endpoint.url().clone(),
        })
    }

    /// URL of `segments` below the server root, each one percent-encoded.
    fn url(&self, segments: &[&str]) -> ProvisionResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProvisionError::InvalidUrl {
                url: self.base.to_string(),
                message: "cannot carry a path".to_string(),
            })?
            .clear()
            .extend(segments);
        Ok(url)
    }

    fn user_url(&self, name: &str) -> ProvisionResult<Url> {
        let doc_id = format!("{}{}", USER_PREFIX, name);
        self.url(&[USERS_DB, doc_id.as_str()])
    }

    fn request(&self, method: Method, url: Url, auth: Option<&Credential>) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match auth {
            Some(auth) => builder.basic_auth(&auth.username, Some(&auth.password)),
            None => builder,
        }
    }

    /// Send a request and turn any non-success status into a classified error.
    async fn send(&self, operation: &str, request: RequestBuilder) -> ProvisionResult<Response> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_remote_call(operation, "transport_error");
                return Err(ProvisionError::transport(operation, e));
            }
        };

        let status = response.status();
        if status.is_success() {
            metrics::record_remote_call(operation, "ok");
            return Ok(response);
        }

        metrics::record_remote_call(operation, status.as_str());
        let body = response.text().await.unwrap_or_default();
        debug!(operation, status = status.as_u16(), body = %body, "Request refused");
        Err(ProvisionError::from_status(
            operation,
            status.as_u16(),
            error_message(&body, status.canonical_reason()),
        ))
    }

    async fn send_json(&self, operation: &str, request: RequestBuilder) -> ProvisionResult<Value> {
        let response = self.send(operation, request).await?;
        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                ProvisionError::Decode {
                    operation: operation.to_string(),
                    message: e.to_string(),
                }
            } else {
                ProvisionError::transport(operation, e)
            }
        })
    }

    async fn get_json(&self, operation: &str, auth: &Credential, url: Url) -> ProvisionResult<Value> {
        self.send_json(operation, self.request(Method::GET, url, Some(auth)))
            .await
    }

    async fn put_json(&self, operation: &str, auth: &Credential, url: Url, body: &Value) -> ProvisionResult<Value> {
        self.send_json(operation, self.request(Method::PUT, url, Some(auth)).json(body))
            .await
    }

    async fn ping_impl(&self) -> ProvisionResult<()> {
        let url = self.url(&[])?;
        self.send("ping", self.request(Method::GET, url, None)).await?;
        Ok(())
    }

    async fn get_user_impl(&self, auth: &Credential, name: &str) -> ProvisionResult<UserRecord> {
        let doc = self.get_json("get_user", auth, self.user_url(name)?).await?;
        Ok(parse_user_record(name, &doc))
    }

    async fn create_user_impl(&self, auth: &Credential, user: &Credential, roles: &[String]) -> ProvisionResult<()> {
        let body = json!({
            "_id": format!("{}{}", USER_PREFIX, user.username),
            "name": user.username,
            "password": user.password,
            "roles": roles,
            "type": "user",
        });
        self.put_json("create_user", auth, self.user_url(&user.username)?, &body)
            .await?;
        Ok(())
    }

    async fn grant_role_impl(&self, auth: &Credential, name: &str, role: &str) -> ProvisionResult<()> {
        let url = self.user_url(name)?;
        let mut doc = self.get_json("grant_role", auth, url.clone()).await?;
        if !add_user_role(&mut doc, role)? {
            return Ok(());
        }
        self.put_json("grant_role", auth, url, &doc).await?;
        Ok(())
    }

    async fn add_database_role_impl(
        &self,
        auth: &Credential,
        database: &str,
        role: &str,
        scope: RoleScope,
    ) -> ProvisionResult<()> {
        let url = self.url(&[database, "_security"])?;
        let mut security = self.get_json("add_database_role", auth, url.clone()).await?;
        if !add_security_role(&mut security, role, scope)? {
            return Ok(());
        }
        self.put_json("add_database_role", auth, url, &security).await?;
        Ok(())
    }

    async fn read_document_impl(&self, auth: &Credential, database: &str, id: &str) -> ProvisionResult<StoredDocument> {
        let doc = self
            .get_json("read_document", auth, self.url(&[database, id])?)
            .await?;
        split_stored_document(doc)
    }

    async fn delete_document_impl(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: &Revision,
    ) -> ProvisionResult<()> {
        let request = self
            .request(Method::DELETE, self.url(&[database, id])?, Some(auth))
            .query(&[("rev", rev.as_str())]);
        self.send("delete_document", request).await?;
        Ok(())
    }

    async fn save_document_impl(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: Option<&Revision>,
        body: &Value,
    ) -> ProvisionResult<Revision> {
        let body = with_revision(body, rev)?;
        let reply = self
            .put_json("save_document", auth, self.url(&[database, id])?, &body)
            .await?;
        reply
            .get("rev")
            .and_then(Value::as_str)
            .map(|rev| Revision(rev.to_string()))
            .ok_or_else(|| ProvisionError::Decode {
                operation: "save_document".to_string(),
                message: "response has no 'rev'".to_string(),
            })
    }
}

impl CouchStore for CouchClient {
    fn ping(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.ping_impl())
    }

    fn get_user(&self, auth: &Credential, name: &str) -> BoxFuture<'_, UserRecord> {
        let auth = auth.clone();
        let name = name.to_string();
        Box::pin(async move { self.get_user_impl(&auth, &name).await })
    }

    fn create_user(&self, auth: &Credential, user: &Credential, roles: &[String]) -> BoxFuture<'_, ()> {
        let auth = auth.clone();
        let user = user.clone();
        let roles = roles.to_vec();
        Box::pin(async move { self.create_user_impl(&auth, &user, &roles).await })
    }

    fn grant_role(&self, auth: &Credential, name: &str, role: &str) -> BoxFuture<'_, ()> {
        let auth = auth.clone();
        let name = name.to_string();
        let role = role.to_string();
        Box::pin(async move { self.grant_role_impl(&auth, &name, &role).await })
    }

    fn add_database_role(
        &self,
        auth: &Credential,
        database: &str,
        role: &str,
        scope: RoleScope,
    ) -> BoxFuture<'_, ()> {
        let auth = auth.clone();
        let database = database.to_string();
        let role = role.to_string();
        Box::pin(async move { self.add_database_role_impl(&auth, &database, &role, scope).await })
    }

    fn read_document(&self, auth: &Credential, database: &str, id: &str) -> BoxFuture<'_, StoredDocument> {
        let auth = auth.clone();
        let database = database.to_string();
        let id = id.to_string();
        Box::pin(async move { self.read_document_impl(&auth, &database, &id).await })
    }

    fn delete_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: &Revision,
    ) -> BoxFuture<'_, ()> {
        let auth = auth.clone();
        let database = database.to_string();
        let id = id.to_string();
        let rev = rev.clone();
        Box::pin(async move { self.delete_document_impl(&auth, &database, &id, &rev).await })
    }

    fn save_document(
        &self,
        auth: &Credential,
        database: &str,
        id: &str,
        rev: Option<&Revision>,
        body: &Value,
    ) -> BoxFuture<'_, Revision> {
        let auth = auth.clone();
        let database = database.to_string();
        let id = id.to_string();
        let rev = rev.cloned();
        let body = body.clone();
        Box::pin(async move {
            self.save_document_impl(&auth, &database, &id, rev.as_ref(), &body)
                .await
        })
    }
}

/// Opens a [`CouchClient`] per server.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl StoreConnector for HttpConnector {
    fn open(&self, endpoint: &ServerEndpoint) -> ProvisionResult<Arc<dyn CouchStore>> {
        Ok(Arc::new(CouchClient::new(endpoint, self.request_timeout)?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Body helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Message for a refused request: CouchDB's `error: reason`, else the raw body.
fn error_message(body: &str, fallback: Option<&str>) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let error = map.get("error").and_then(Value::as_str);
        let reason = map.get("reason").and_then(Value::as_str);
        match (error, reason) {
            (Some(error), Some(reason)) => return format!("{}: {}", error, reason),
            (Some(error), None) => return error.to_string(),
            _ => {}
        }
    }
    let body = body.trim();
    if body.is_empty() {
        fallback.unwrap_or("no response body").to_string()
    } else {
        body.to_string()
    }
}

fn parse_user_record(name: &str, doc: &Value) -> UserRecord {
    let roles = doc
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| roles.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    UserRecord {
        name: doc
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string(),
        roles,
    }
}

fn decode_error(operation: &str, message: &str) -> ProvisionError {
    ProvisionError::Decode {
        operation: operation.to_string(),
        message: message.to_string(),
    }
}

/// Append `role` to the `roles` array of `doc`. Returns whether it changed.
fn add_user_role(doc: &mut Value, role: &str) -> ProvisionResult<bool> {
    let user = doc
        .as_object_mut()
        .ok_or_else(|| decode_error("grant_role", "user document is not an object"))?;
    push_role(user, "roles", role, "grant_role")
}

/// Append `role` to `members.roles` or `admins.roles` of a `_security`
/// object, creating missing sections. Returns whether it changed.
fn add_security_role(security: &mut Value, role: &str, scope: RoleScope) -> ProvisionResult<bool> {
    let section = match scope {
        RoleScope::Member => "members",
        RoleScope::Admin => "admins",
    };
    let security = security
        .as_object_mut()
        .ok_or_else(|| decode_error("add_database_role", "security document is not an object"))?;
    let section = security
        .entry(section)
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| decode_error("add_database_role", "security section is not an object"))?;
    push_role(section, "roles", role, "add_database_role")
}

fn push_role(object: &mut Map<String, Value>, key: &str, role: &str, operation: &str) -> ProvisionResult<bool> {
    let roles = object
        .entry(key)
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| decode_error(operation, "roles is not an array"))?;
    if roles.iter().any(|r| r.as_str() == Some(role)) {
        return Ok(false);
    }
    roles.push(Value::String(role.to_string()));
    Ok(true)
}

/// Separate a fetched document into its body and `_rev`.
fn split_stored_document(doc: Value) -> ProvisionResult<StoredDocument> {
    let Value::Object(mut body) = doc else {
        return Err(decode_error("read_document", "document is not an object"));
    };
    let rev = match body.remove("_rev") {
        Some(Value::String(rev)) => Revision(rev),
        _ => return Err(decode_error("read_document", "document has no '_rev'")),
    };
    body.remove("_id");
    Ok(StoredDocument {
        body: Value::Object(body),
        rev,
    })
}

/// Body to PUT: `body` plus `_rev` when replacing an existing revision.
fn with_revision(body: &Value, rev: Option<&Revision>) -> ProvisionResult<Value> {
    let mut body = body.clone();
    if let Some(rev) = rev {
        body.as_object_mut()
            .ok_or_else(|| decode_error("save_document", "document is not an object"))?
            .insert("_rev".to_string(), Value::String(rev.0.clone()));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CouchClient {
        let endpoint = ServerEndpoint::parse("http://couch-a:5984").unwrap();
        CouchClient::new(&endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_encodes_segments() {
        let client = client();
        assert_eq!(client.url(&[]).unwrap().as_str(), "http://couch-a:5984/");
        assert_eq!(
            client.url(&["_replicator", "abc123"]).unwrap().as_str(),
            "http://couch-a:5984/_replicator/abc123"
        );
        assert_eq!(
            client.url(&["a/b", "_security"]).unwrap().as_str(),
            "http://couch-a:5984/a%2Fb/_security"
        );
    }

    #[test]
    fn test_user_url() {
        let url = client().user_url("repl").unwrap();
        assert!(url.as_str().starts_with("http://couch-a:5984/_users/org.couchdb.user"));
        assert!(url.as_str().ends_with("repl"));
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"error":"not_found","reason":"missing"}"#, Some("Not Found")),
            "not_found: missing"
        );
        assert_eq!(error_message(r#"{"error":"conflict"}"#, None), "conflict");
        assert_eq!(error_message("", Some("Unauthorized")), "Unauthorized");
        assert_eq!(error_message("", None), "no response body");
        assert_eq!(error_message("gateway down\n", None), "gateway down");
    }

    #[test]
    fn test_parse_user_record() {
        let doc = json!({"_id": "org.couchdb.user:bob", "name": "bob", "roles": ["editor", 7], "type": "user"});
        let user = parse_user_record("bob", &doc);
        assert_eq!(user.name, "bob");
        assert_eq!(user.roles, vec!["editor"]);

        let bare = parse_user_record("alice", &json!({}));
        assert_eq!(bare.name, "alice");
        assert!(bare.roles.is_empty());
    }

    #[test]
    fn test_add_user_role() {
        let mut doc = json!({"_rev": "1-a", "name": "bob", "roles": ["editor"]});
        assert!(add_user_role(&mut doc, "replicator").unwrap());
        assert_eq!(doc["roles"], json!(["editor", "replicator"]));
        assert_eq!(doc["_rev"], "1-a");
        assert!(!add_user_role(&mut doc, "editor").unwrap());

        let mut no_roles = json!({"name": "bob"});
        assert!(add_user_role(&mut no_roles, "editor").unwrap());
        assert_eq!(no_roles["roles"], json!(["editor"]));

        assert!(add_user_role(&mut json!("bob"), "editor").is_err());
    }

    #[test]
    fn test_add_security_role_to_empty() {
        let mut security = json!({});
        assert!(add_security_role(&mut security, "editor", RoleScope::Member).unwrap());
        assert!(add_security_role(&mut security, "replicator", RoleScope::Admin).unwrap());
        assert_eq!(
            security,
            json!({"members": {"roles": ["editor"]}, "admins": {"roles": ["replicator"]}})
        );
    }

    #[test]
    fn test_add_security_role_keeps_existing() {
        let mut security = json!({
            "admins": {"names": ["root"], "roles": ["x"]},
            "members": {"names": [], "roles": []}
        });
        assert!(add_security_role(&mut security, "z", RoleScope::Admin).unwrap());
        assert!(!add_security_role(&mut security, "x", RoleScope::Admin).unwrap());
        assert_eq!(security["admins"]["roles"], json!(["x", "z"]));
        assert_eq!(security["admins"]["names"], json!(["root"]));
    }

    #[test]
    fn test_add_security_role_rejects_bad_shape() {
        let mut security = json!({"members": {"roles": "editor"}});
        let err = add_security_role(&mut security, "editor", RoleScope::Member).unwrap_err();
        assert!(matches!(err, ProvisionError::Decode { .. }));
    }

    #[test]
    fn test_split_stored_document() {
        let doc = json!({"_id": "abc", "_rev": "3-f00", "source": "s", "target": "t"});
        let stored = split_stored_document(doc).unwrap();
        assert_eq!(stored.rev, Revision("3-f00".to_string()));
        assert_eq!(stored.body, json!({"source": "s", "target": "t"}));

        assert!(split_stored_document(json!({"_id": "abc"})).is_err());
        assert!(split_stored_document(json!([1, 2])).is_err());
    }

    #[test]
    fn test_with_revision() {
        let body = json!({"source": "s"});
        assert_eq!(with_revision(&body, None).unwrap(), body);
        let rev = Revision("2-b".to_string());
        assert_eq!(
            with_revision(&body, Some(&rev)).unwrap(),
            json!({"source": "s", "_rev": "2-b"})
        );
    }

    #[test]
    fn test_connector_opens_without_io() {
        let connector = HttpConnector::new(Duration::from_secs(1));
        let endpoint = ServerEndpoint::parse("http://unreachable.invalid:5984").unwrap();
        assert!(connector.open(&endpoint).is_ok());
    }
}
