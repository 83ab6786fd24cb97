//! Gateway core.
//!
//! The pieces between the HTTP surface and the wire: the tenant data model,
//! the persistence seam, the per-(namespace, upstream) session pool, tool
//! discovery and aggregation, the virtual-server adapter, the endpoint
//! resolver, and the request dispatcher that ties them together.

pub mod adapter;
pub mod aggregate;
pub mod discovery;
pub mod dispatch;
pub mod model;
pub mod pool;
pub mod resolver;
pub mod secrets;
pub mod store;

pub use adapter::VirtualAdapter;
pub use aggregate::{DISCOVERY_CONCURRENCY, NamespaceAggregator};
pub use discovery::{DISCOVERY_TIMEOUT, discover_and_store, discover_tools};
pub use dispatch::{DispatchContext, Dispatcher, error_response};
pub use model::{
    Endpoint, EndpointAuth, EndpointCors, EndpointRateLimit, LinkStatus, McpServer, Namespace,
    NamespaceServer, Protocol, RecipeAuth, RestRecipe, ToolOverride, VirtualServer, VirtualToolDef,
    validate_entity_name,
};
pub use pool::{PoolOptions, Session, SessionPool, SessionState};
pub use resolver::{EndpointResolver, PublicUrls, ResolvedEndpoint};
pub use secrets::{EnvSecretSource, SecretSource, StaticSecretSource};
pub use store::{
    ApiKeyIdentity, GatewayFixture, GatewayStore, MemoryStore, OauthIdentity,
    StaticTokenValidator, TokenValidator,
};
