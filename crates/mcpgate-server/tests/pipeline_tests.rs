//! End-to-end pipeline tests against the assembled router.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use mcpgate_core::{
    ApiKeyIdentity, Endpoint, EndpointAuth, EndpointCors, EndpointRateLimit, LinkStatus,
    MemoryStore, Namespace, NamespaceServer, RecipeAuth, RestRecipe, VirtualServer, VirtualToolDef,
};
use mcpgate_filter::FilterChain;
use mcpgate_server::{GatewayConfig, GatewayState, app};

fn virtual_tool(name: &str) -> VirtualToolDef {
    VirtualToolDef {
        name: name.into(),
        description: None,
        input_schema: None,
        recipe: RestRecipe {
            method: "POST".into(),
            url: "http://127.0.0.1:1/unused".into(),
            headers: HashMap::new(),
            body_map: HashMap::new(),
            auth: Some(RecipeAuth {
                auth_type: "bearer".into(),
                token: "unused".into(),
            }),
            timeout_secs: Some(1),
        },
    }
}

fn endpoint(name: &str, namespace_id: &str, auth: EndpointAuth) -> Endpoint {
    Endpoint {
        id: format!("ep-{name}"),
        org: "org-1".into(),
        name: name.into(),
        namespace_id: namespace_id.into(),
        auth,
        rate_limit: None,
        cors: None,
        active: true,
    }
}

fn public_auth() -> EndpointAuth {
    EndpointAuth {
        public: true,
        ..EndpointAuth::default()
    }
}

/// Store with: namespace ns-1 holding virtual upstreams srv-a (get, list)
/// and srv-b (list); endpoints demo (public), locked (api-key), open
/// (public, 2 requests / 60 s), cors (public + CORS policy).
fn fixture_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.put_virtual_server(VirtualServer {
        id: "vs-a".into(),
        org: "org-1".into(),
        name: "srv-a".into(),
        tools: vec![virtual_tool("list"), virtual_tool("get")],
    });
    store.put_virtual_server(VirtualServer {
        id: "vs-b".into(),
        org: "org-1".into(),
        name: "srv-b".into(),
        tools: vec![virtual_tool("list")],
    });
    store
        .put_namespace(Namespace {
            id: "ns-1".into(),
            org: "org-1".into(),
            name: "ns1".into(),
            active: true,
            servers: vec![
                NamespaceServer {
                    server_id: "vs-a".into(),
                    status: LinkStatus::Active,
                    priority: 0,
                },
                NamespaceServer {
                    server_id: "vs-b".into(),
                    status: LinkStatus::Active,
                    priority: 1,
                },
            ],
        })
        .unwrap();

    store
        .put_endpoint(endpoint("demo", "ns-1", public_auth()))
        .unwrap();
    store
        .put_endpoint(endpoint(
            "locked",
            "ns-1",
            EndpointAuth {
                api_key: true,
                ..EndpointAuth::default()
            },
        ))
        .unwrap();
    let mut open = endpoint("open", "ns-1", public_auth());
    open.rate_limit = Some(EndpointRateLimit {
        requests: 2,
        window_secs: 60,
    });
    store.put_endpoint(open).unwrap();
    let mut cors = endpoint("withcors", "ns-1", public_auth());
    cors.cors = Some(EndpointCors {
        origins: vec!["https://app.example.com".into()],
        methods: vec!["GET".into(), "POST".into(), "OPTIONS".into()],
    });
    store.put_endpoint(cors).unwrap();

    store.put_api_key(
        "key-123",
        ApiKeyIdentity {
            key_id: "k1".into(),
            user_id: "u1".into(),
            org: "org-1".into(),
            role: None,
        },
    );
    store
}

fn test_app() -> Router {
    let state = GatewayState::build(
        GatewayConfig::for_tests(),
        fixture_store(),
        None,
        FilterChain::empty(),
    );
    app(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_served_with_security_headers() {
    let response = test_app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-frame-options"));
    assert!(response.headers().contains_key("content-security-policy"));
    assert!(response.headers().contains_key("x-content-type-options"));
}

#[tokio::test]
async fn tools_listing_is_prefixed_and_ordered() {
    let response = test_app()
        .oneshot(get("/api/public/endpoints/demo/tools"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["srv_a__get", "srv_a__list", "srv_b__list"]);
    assert_eq!(body["count"], json!(3));
}

#[tokio::test]
async fn tools_list_over_mcp_channel() {
    let request = post_json(
        "/api/public/endpoints/demo/mcp",
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    );
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], json!(1));
    assert_eq!(
        body["result"]["tools"][0]["name"],
        json!("srv_a__get")
    );
}

#[tokio::test]
async fn unknown_endpoint_is_404() {
    let response = test_app()
        .oneshot(get("/api/public/endpoints/ghost/tools"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("endpoint_not_found"));
}

#[tokio::test]
async fn non_public_endpoint_requires_credentials() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(get("/api/public/endpoints/locked/tools"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/public/endpoints/locked/tools")
        .header("x-api-key", "key-123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn endpoint_rate_limit_allows_n_then_429() {
    let app = test_app();
    for expected in [StatusCode::OK, StatusCode::OK] {
        let request = Request::builder()
            .uri("/api/public/endpoints/open/tools")
            .header("x-real-ip", "9.9.9.9")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), expected);
    }

    let request = Request::builder()
        .uri("/api/public/endpoints/open/tools")
        .header("x-real-ip", "9.9.9.9")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("rate_limit_exceeded"));
    assert!(body["retry_after"].is_i64());

    // A different client IP is not throttled.
    let request = Request::builder()
        .uri("/api/public/endpoints/open/tools")
        .header("x-real-ip", "8.8.8.8")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn options_preflight_answers_204() {
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/public/endpoints/withcors/tools")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://app.example.com"
    );
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-methods")
    );
}

#[tokio::test]
async fn cors_header_is_echoed_on_simple_requests() {
    let request = Request::builder()
        .uri("/api/public/endpoints/withcors/tools")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://app.example.com"
    );
}

#[tokio::test]
async fn streamable_channel_assigns_a_session() {
    let request = post_json(
        "/api/public/endpoints/demo/mcp",
        json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}),
    );
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let assigned = response
        .headers()
        .get("set-session-id")
        .expect("generated session id must be echoed");
    assert!(!assigned.to_str().unwrap().is_empty());
}

#[tokio::test]
async fn provided_session_id_is_not_regenerated() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/public/endpoints/demo/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-session-id", "client-chosen")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}).to_string(),
        ))
        .unwrap();
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("set-session-id").is_none());
}

#[tokio::test]
async fn servers_prefix_path_is_rewritten() {
    let request = post_json(
        "/api/public/endpoints/demo/servers/vs-a/rpc",
        json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"}),
    );
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], json!(9));
    assert!(body["result"]["tools"].is_array());
}

#[tokio::test]
async fn notifications_are_acknowledged_with_202() {
    let request = post_json(
        "/api/public/endpoints/demo/mcp",
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    );
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/public/endpoints/demo/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn openapi_document_lists_every_tool() {
    let response = test_app()
        .oneshot(get("/api/public/endpoints/demo/api/openapi.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["openapi"], json!("3.0.3"));
    let paths = body["paths"].as_object().unwrap();
    assert!(paths.contains_key("/tools/srv_a__get"));
    assert!(paths.contains_key("/tools/srv_b__list"));
}

#[tokio::test]
async fn direct_tool_call_routes_to_the_prefixed_upstream() {
    // The virtual recipe points at a closed port, so a successful dispatch
    // surfaces as a 502-class error rather than tool-not-found: proof the
    // name resolved to the right upstream.
    let request = post_json(
        "/api/public/endpoints/demo/tools/srv_b__list",
        json!({"arguments": {}}),
    );
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let request = post_json(
        "/api/public/endpoints/demo/tools/srv_b__missing",
        json!({"arguments": {}}),
    );
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
