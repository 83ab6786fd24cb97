//! OpenAPI 3.0 document generation.
//!
//! One POST path per aggregated tool plus the catalogue listing; security
//! schemes mirror the endpoint's auth flags and a security requirement is
//! attached iff the endpoint is not public.

use serde_json::{Map, Value, json};

use mcpgate_core::{Endpoint, EndpointResolver};
use mcpgate_protocol::Tool;

/// Build the document for one endpoint and its aggregated catalogue.
pub fn document(
    endpoint: &Endpoint,
    tools: &[Tool],
    base_url: &str,
    oauth_issuer: Option<&str>,
) -> Value {
    let urls = EndpointResolver::public_urls(base_url, &endpoint.name);
    let server_url = urls
        .mcp
        .trim_end_matches("/mcp")
        .to_string();

    let mut paths = Map::new();
    paths.insert(
        "/tools".to_string(),
        json!({
            "get": {
                "operationId": "listTools",
                "summary": "List available tools",
                "responses": {
                    "200": {
                        "description": "The aggregated tool catalogue",
                        "content": {
                            "application/json": {
                                "schema": {"$ref": "#/components/schemas/ToolList"}
                            }
                        }
                    }
                }
            }
        }),
    );
    for tool in tools {
        let summary = tool
            .description
            .clone()
            .unwrap_or_else(|| format!("Invoke {}", tool.name));
        let request_schema = tool
            .input_schema
            .clone()
            .map_or_else(|| json!({"$ref": "#/components/schemas/ToolRequest"}), |schema| {
                json!({
                    "type": "object",
                    "properties": {"arguments": schema},
                })
            });
        paths.insert(
            format!("/tools/{}", tool.name),
            json!({
                "post": {
                    "operationId": format!("call_{}", tool.name),
                    "summary": summary,
                    "requestBody": {
                        "required": false,
                        "content": {
                            "application/json": {"schema": request_schema}
                        }
                    },
                    "responses": {
                        "200": {
                            "description": "Tool result",
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/ToolResponse"}
                                }
                            }
                        },
                        "default": {
                            "description": "Error",
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/Error"}
                                }
                            }
                        }
                    }
                }
            }),
        );
    }

    let mut security_schemes = Map::new();
    let mut security_requirements: Vec<Value> = Vec::new();
    if endpoint.auth.api_key {
        security_schemes.insert(
            "apiKey".to_string(),
            json!({"type": "apiKey", "in": "header", "name": "X-API-Key"}),
        );
        security_requirements.push(json!({"apiKey": []}));
        if endpoint.auth.use_query_param {
            security_schemes.insert(
                "apiKeyQuery".to_string(),
                json!({"type": "apiKey", "in": "query", "name": "api_key"}),
            );
            security_requirements.push(json!({"apiKeyQuery": []}));
        }
    }
    if endpoint.auth.oauth {
        let issuer = oauth_issuer.unwrap_or(base_url).trim_end_matches('/');
        security_schemes.insert(
            "oauth2".to_string(),
            json!({
                "type": "oauth2",
                "flows": {
                    "authorizationCode": {
                        "authorizationUrl": format!("{issuer}/oauth/authorize"),
                        "tokenUrl": format!("{issuer}/oauth/token"),
                        "scopes": {}
                    }
                }
            }),
        );
        security_requirements.push(json!({"oauth2": []}));
    }

    let mut document = json!({
        "openapi": "3.0.3",
        "info": {
            "title": format!("{} MCP endpoint", endpoint.name),
            "version": "1.0.0",
            "description": format!(
                "Aggregated tool surface of the '{}' endpoint", endpoint.name
            ),
        },
        "servers": [{"url": server_url}],
        "paths": paths,
        "components": {
            "schemas": {
                "ToolRequest": {
                    "type": "object",
                    "properties": {
                        "arguments": {
                            "type": "object",
                            "additionalProperties": true
                        }
                    }
                },
                "ToolResponse": {
                    "type": "object",
                    "properties": {
                        "content": {"type": "array", "items": {"type": "object"}},
                        "isError": {"type": "boolean"}
                    }
                },
                "ToolList": {
                    "type": "object",
                    "properties": {
                        "tools": {"type": "array", "items": {"type": "object"}},
                        "count": {"type": "integer"}
                    }
                },
                "Error": {
                    "type": "object",
                    "properties": {
                        "error": {"type": "string"},
                        "message": {"type": "string"},
                        "details": {}
                    },
                    "required": ["error", "message"]
                }
            },
            "securitySchemes": security_schemes,
        },
    });

    if !endpoint.auth.public && !security_requirements.is_empty() {
        document["security"] = Value::Array(security_requirements);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_core::EndpointAuth;
    use pretty_assertions::assert_eq;

    fn endpoint(auth: EndpointAuth) -> Endpoint {
        Endpoint {
            id: "ep-1".into(),
            org: "org-1".into(),
            name: "demo".into(),
            namespace_id: "ns-1".into(),
            auth,
            rate_limit: None,
            cors: None,
            active: true,
        }
    }

    #[test]
    fn one_post_path_per_tool_plus_listing() {
        let tools = vec![
            Tool::new("srv_a__get"),
            Tool::new("srv_a__list").with_description("list things"),
        ];
        let doc = document(
            &endpoint(EndpointAuth {
                public: true,
                ..EndpointAuth::default()
            }),
            &tools,
            "http://gw.local",
            None,
        );
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/tools"));
        assert!(paths.contains_key("/tools/srv_a__get"));
        assert!(paths.contains_key("/tools/srv_a__list"));
        assert_eq!(
            paths["/tools/srv_a__list"]["post"]["summary"],
            json!("list things")
        );
        // Public endpoint: no top-level security requirement.
        assert!(doc.get("security").is_none());
    }

    #[test]
    fn security_reflects_auth_flags() {
        let doc = document(
            &endpoint(EndpointAuth {
                api_key: true,
                oauth: true,
                use_query_param: true,
                ..EndpointAuth::default()
            }),
            &[],
            "http://gw.local",
            Some("https://auth.example.com"),
        );
        let schemes = doc["components"]["securitySchemes"].as_object().unwrap();
        assert!(schemes.contains_key("apiKey"));
        assert!(schemes.contains_key("apiKeyQuery"));
        assert!(schemes.contains_key("oauth2"));
        assert_eq!(
            schemes["oauth2"]["flows"]["authorizationCode"]["authorizationUrl"],
            json!("https://auth.example.com/oauth/authorize")
        );
        assert_eq!(doc["security"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn server_url_is_the_endpoint_root() {
        let doc = document(
            &endpoint(EndpointAuth {
                public: true,
                ..EndpointAuth::default()
            }),
            &[],
            "http://gw.local/",
            None,
        );
        assert_eq!(
            doc["servers"][0]["url"],
            json!("http://gw.local/api/public/endpoints/demo")
        );
    }
}
