//! The persistence seam.
//!
//! The gateway never owns entity data; it consumes a [`GatewayStore`].
//! [`MemoryStore`] is the in-process implementation used by tests and by the
//! binary's standalone fixture mode. Discovered-tool replacement is atomic
//! per upstream: readers see either the old set or the new set, never a mix.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{Endpoint, McpServer, Namespace, ToolOverride, VirtualServer};
use mcpgate_protocol::{ErrorKind, GatewayError, GatewayResult, ToolRecord};

/// Identity established by API-key auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyIdentity {
    /// Key record id
    pub key_id: String,
    /// Key owner
    pub user_id: String,
    /// Owning organization
    pub org: String,
    /// Role attached to the key
    #[serde(default)]
    pub role: Option<String>,
}

/// Identity established by OAuth token validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthIdentity {
    /// OAuth client id
    pub client_id: String,
    /// Owning organization
    pub org: String,
    /// Resource-owner id when the grant carries one
    #[serde(default)]
    pub user_id: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Role claim
    #[serde(default)]
    pub role: Option<String>,
}

/// Read surface the core consumes from the persistence collaborator.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Endpoint by public name.
    async fn endpoint_by_name(&self, name: &str) -> GatewayResult<Option<Endpoint>>;

    /// Namespace with its server list.
    async fn namespace(&self, id: &str) -> GatewayResult<Option<Namespace>>;

    /// Upstream server record.
    async fn server(&self, id: &str) -> GatewayResult<Option<McpServer>>;

    /// Virtual server spec.
    async fn virtual_server(&self, id: &str) -> GatewayResult<Option<VirtualServer>>;

    /// Tool overrides for a namespace.
    async fn tool_overrides(&self, namespace_id: &str) -> GatewayResult<Vec<ToolOverride>>;

    /// Replace the discovered tools of one upstream atomically.
    async fn replace_discovered_tools(
        &self,
        server_id: &str,
        tools: Vec<ToolRecord>,
    ) -> GatewayResult<()>;

    /// Discovered tools of one upstream.
    async fn discovered_tools(&self, server_id: &str) -> GatewayResult<Vec<ToolRecord>>;

    /// Drop the discovered tools of one upstream.
    async fn delete_discovered_tools(&self, server_id: &str) -> GatewayResult<()>;

    /// Validate an API key; `None` means unknown or revoked.
    async fn validate_api_key(&self, key: &str) -> GatewayResult<Option<ApiKeyIdentity>>;
}

/// Token-validation collaborator for OAuth bearer tokens.
///
/// The authorization server itself is out of scope; the gateway only asks it
/// whether a presented token is good.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token; `None` means invalid or expired.
    async fn validate(&self, token: &str) -> GatewayResult<Option<OauthIdentity>>;
}

/// Static fixture shape loaded into a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayFixture {
    /// Endpoints keyed by their record fields
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Namespaces with server lists
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    /// Upstream servers
    #[serde(default)]
    pub servers: Vec<McpServer>,
    /// Virtual servers
    #[serde(default)]
    pub virtual_servers: Vec<VirtualServer>,
    /// Tool overrides
    #[serde(default)]
    pub overrides: Vec<ToolOverride>,
    /// API keys: token -> identity
    #[serde(default)]
    pub api_keys: HashMap<String, ApiKeyIdentity>,
}

/// In-process store backed by concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    endpoints_by_name: DashMap<String, Endpoint>,
    namespaces: DashMap<String, Namespace>,
    servers: DashMap<String, McpServer>,
    virtual_servers: DashMap<String, VirtualServer>,
    overrides: DashMap<String, Vec<ToolOverride>>,
    // server id -> whole tool set, swapped atomically
    discovered: DashMap<String, Arc<Vec<ToolRecord>>>,
    api_keys: DashMap<String, ApiKeyIdentity>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a fixture, validating every record.
    pub fn from_fixture(fixture: GatewayFixture) -> GatewayResult<Self> {
        let store = Self::new();
        for server in fixture.servers {
            server.validate()?;
            store.servers.insert(server.id.clone(), server);
        }
        for vs in fixture.virtual_servers {
            store.virtual_servers.insert(vs.id.clone(), vs);
        }
        for namespace in fixture.namespaces {
            namespace.validate()?;
            store.namespaces.insert(namespace.id.clone(), namespace);
        }
        for endpoint in fixture.endpoints {
            store.put_endpoint(endpoint)?;
        }
        for override_ in fixture.overrides {
            store
                .overrides
                .entry(override_.namespace_id.clone())
                .or_default()
                .push(override_);
        }
        for (token, identity) in fixture.api_keys {
            store.api_keys.insert(token, identity);
        }
        Ok(store)
    }

    /// Parse a JSON fixture document and build a store from it.
    pub fn from_fixture_json(text: &str) -> GatewayResult<Self> {
        let fixture: GatewayFixture = serde_json::from_str(text)
            .map_err(|e| GatewayError::new(ErrorKind::InvalidConfig, format!("bad fixture: {e}")))?;
        Self::from_fixture(fixture)
    }

    /// Insert an endpoint. Endpoint names are globally unique because they
    /// live in the public URL space; duplicates are rejected regardless of
    /// organization.
    pub fn put_endpoint(&self, endpoint: Endpoint) -> GatewayResult<()> {
        endpoint.validate()?;
        if self.endpoints_by_name.contains_key(&endpoint.name) {
            return Err(GatewayError::new(
                ErrorKind::InvalidConfig,
                format!("endpoint name '{}' is already taken", endpoint.name),
            ));
        }
        self.endpoints_by_name.insert(endpoint.name.clone(), endpoint);
        Ok(())
    }

    /// Insert or replace a namespace.
    pub fn put_namespace(&self, namespace: Namespace) -> GatewayResult<()> {
        namespace.validate()?;
        self.namespaces.insert(namespace.id.clone(), namespace);
        Ok(())
    }

    /// Insert or replace a server record.
    pub fn put_server(&self, server: McpServer) -> GatewayResult<()> {
        server.validate()?;
        self.servers.insert(server.id.clone(), server);
        Ok(())
    }

    /// Insert or replace a virtual server.
    pub fn put_virtual_server(&self, vs: VirtualServer) {
        self.virtual_servers.insert(vs.id.clone(), vs);
    }

    /// Register an API key.
    pub fn put_api_key(&self, token: impl Into<String>, identity: ApiKeyIdentity) {
        self.api_keys.insert(token.into(), identity);
    }

    /// Add a tool override.
    pub fn put_override(&self, override_: ToolOverride) {
        self.overrides
            .entry(override_.namespace_id.clone())
            .or_default()
            .push(override_);
    }

    /// Remove an endpoint by name.
    pub fn remove_endpoint(&self, name: &str) -> Option<Endpoint> {
        self.endpoints_by_name.remove(name).map(|(_, e)| e)
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn endpoint_by_name(&self, name: &str) -> GatewayResult<Option<Endpoint>> {
        Ok(self.endpoints_by_name.get(name).map(|e| e.clone()))
    }

    async fn namespace(&self, id: &str) -> GatewayResult<Option<Namespace>> {
        Ok(self.namespaces.get(id).map(|n| n.clone()))
    }

    async fn server(&self, id: &str) -> GatewayResult<Option<McpServer>> {
        Ok(self.servers.get(id).map(|s| s.clone()))
    }

    async fn virtual_server(&self, id: &str) -> GatewayResult<Option<VirtualServer>> {
        Ok(self.virtual_servers.get(id).map(|v| v.clone()))
    }

    async fn tool_overrides(&self, namespace_id: &str) -> GatewayResult<Vec<ToolOverride>> {
        Ok(self
            .overrides
            .get(namespace_id)
            .map(|o| o.clone())
            .unwrap_or_default())
    }

    async fn replace_discovered_tools(
        &self,
        server_id: &str,
        tools: Vec<ToolRecord>,
    ) -> GatewayResult<()> {
        // Whole-entry swap: delete-then-insert as one map write.
        self.discovered.insert(server_id.to_string(), Arc::new(tools));
        Ok(())
    }

    async fn discovered_tools(&self, server_id: &str) -> GatewayResult<Vec<ToolRecord>> {
        Ok(self
            .discovered
            .get(server_id)
            .map(|t| t.as_ref().clone())
            .unwrap_or_default())
    }

    async fn delete_discovered_tools(&self, server_id: &str) -> GatewayResult<()> {
        self.discovered.remove(server_id);
        Ok(())
    }

    async fn validate_api_key(&self, key: &str) -> GatewayResult<Option<ApiKeyIdentity>> {
        Ok(self.api_keys.get(key).map(|i| i.clone()))
    }
}

/// Validator that accepts a fixed token set; test double for the OAuth
/// collaborator.
#[derive(Default)]
pub struct StaticTokenValidator {
    tokens: DashMap<String, OauthIdentity>,
}

impl StaticTokenValidator {
    /// Empty validator; rejects everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token.
    pub fn put(&self, token: impl Into<String>, identity: OauthIdentity) {
        self.tokens.insert(token.into(), identity);
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> GatewayResult<Option<OauthIdentity>> {
        Ok(self.tokens.get(token).map(|i| i.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EndpointAuth, Protocol};
    use pretty_assertions::assert_eq;

    fn endpoint(name: &str, org: &str) -> Endpoint {
        Endpoint {
            id: format!("ep-{name}"),
            org: org.into(),
            name: name.into(),
            namespace_id: "ns-1".into(),
            auth: EndpointAuth {
                public: true,
                ..EndpointAuth::default()
            },
            rate_limit: None,
            cors: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn endpoint_names_are_globally_unique() {
        let store = MemoryStore::new();
        store.put_endpoint(endpoint("demo", "org-1")).unwrap();
        // Same name, different organization: still rejected.
        let err = store.put_endpoint(endpoint("demo", "org-2")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);

        let found = store.endpoint_by_name("demo").await.unwrap().unwrap();
        assert_eq!(found.org, "org-1");
    }

    #[tokio::test]
    async fn discovered_tools_replace_atomically() {
        let store = MemoryStore::new();
        store
            .replace_discovered_tools(
                "srv-1",
                vec![ToolRecord::new("srv-1", "srv-a", "old", None, None)],
            )
            .await
            .unwrap();
        store
            .replace_discovered_tools(
                "srv-1",
                vec![
                    ToolRecord::new("srv-1", "srv-a", "new1", None, None),
                    ToolRecord::new("srv-1", "srv-a", "new2", None, None),
                ],
            )
            .await
            .unwrap();

        let tools = store.discovered_tools("srv-1").await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.raw_name.as_str()).collect();
        assert_eq!(names, vec!["new1", "new2"]);

        store.delete_discovered_tools("srv-1").await.unwrap();
        assert!(store.discovered_tools("srv-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fixture_round_trip() {
        let fixture_json = r#"{
            "endpoints": [{
                "id": "ep-1", "org": "org-1", "name": "demo",
                "namespace_id": "ns-1",
                "auth": {"public": true}
            }],
            "namespaces": [{
                "id": "ns-1", "org": "org-1", "name": "ns1",
                "servers": [{"server_id": "srv-1", "priority": 0}]
            }],
            "servers": [{
                "id": "srv-1", "org": "org-1", "name": "srv-a",
                "protocol": "stdio", "command": "cat"
            }],
            "api_keys": {
                "key-123": {"key_id": "k1", "user_id": "u1", "org": "org-1"}
            }
        }"#;
        let store = MemoryStore::from_fixture_json(fixture_json).unwrap();

        let ep = store.endpoint_by_name("demo").await.unwrap().unwrap();
        assert_eq!(ep.namespace_id, "ns-1");
        let ns = store.namespace("ns-1").await.unwrap().unwrap();
        assert_eq!(ns.servers.len(), 1);
        let srv = store.server("srv-1").await.unwrap().unwrap();
        assert_eq!(srv.protocol, Protocol::Stdio);
        assert!(
            store
                .validate_api_key("key-123")
                .await
                .unwrap()
                .is_some()
        );
        assert!(store.validate_api_key("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fixture_rejects_invalid_records() {
        // Namespace name too short.
        let fixture_json = r#"{
            "namespaces": [{"id": "ns-1", "org": "o", "name": "ab"}]
        }"#;
        assert!(MemoryStore::from_fixture_json(fixture_json).is_err());
    }
}
