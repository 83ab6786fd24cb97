//! Virtual-server adapter.
//!
//! A virtual server publishes the same `tools/list` / `tools/call` contract
//! as a real upstream, but each tool is a REST call recipe executed locally.
//! Secret references of the form `${SECRET:NAME}` are resolved against the
//! process secret source at dispatch time and never stored expanded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::model::{VirtualServer, VirtualToolDef};
use crate::secrets::SecretSource;
use mcpgate_protocol::{CallToolResult, ErrorKind, GatewayError, GatewayResult, ToolRecord};

/// Default timeout for recipe calls without one of their own.
pub const RECIPE_TIMEOUT: Duration = Duration::from_secs(30);

static SECRET_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{SECRET:([A-Za-z0-9_]+)\}$").expect("secret ref pattern"));

/// Executes virtual-server tool calls.
pub struct VirtualAdapter {
    http: reqwest::Client,
    secrets: Arc<dyn SecretSource>,
}

impl VirtualAdapter {
    /// Adapter with a pooled HTTP client.
    pub fn new(secrets: Arc<dyn SecretSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secrets,
        }
    }

    /// The catalogue a virtual server contributes to aggregation.
    pub fn list_tools(spec: &VirtualServer) -> Vec<ToolRecord> {
        spec.tools
            .iter()
            .map(|def| {
                ToolRecord::new(
                    &spec.id,
                    &spec.name,
                    &def.name,
                    def.description.clone(),
                    def.input_schema.clone(),
                )
            })
            .collect()
    }

    /// Execute one tool call against its recipe.
    pub async fn call_tool(
        &self,
        spec: &VirtualServer,
        raw_name: &str,
        arguments: Option<&HashMap<String, Value>>,
    ) -> GatewayResult<CallToolResult> {
        let def = spec
            .tools
            .iter()
            .find(|def| def.name == raw_name)
            .ok_or_else(|| GatewayError::tool_not_found(raw_name).with_component("virtual"))?;
        self.execute_recipe(spec, def, arguments).await
    }

    async fn execute_recipe(
        &self,
        spec: &VirtualServer,
        def: &VirtualToolDef,
        arguments: Option<&HashMap<String, Value>>,
    ) -> GatewayResult<CallToolResult> {
        let recipe = &def.recipe;
        let method: reqwest::Method = recipe.method.to_uppercase().parse().map_err(|_| {
            GatewayError::new(
                ErrorKind::InvalidConfig,
                format!("recipe for '{}' has invalid method '{}'", def.name, recipe.method),
            )
        })?;

        let timeout = recipe
            .timeout_secs
            .map_or(RECIPE_TIMEOUT, Duration::from_secs);

        let mut request = self.http.request(method.clone(), &recipe.url).timeout(timeout);

        for (key, value) in &recipe.headers {
            request = request.header(key, value);
        }

        if let Some(auth) = &recipe.auth
            && auth.auth_type.eq_ignore_ascii_case("bearer")
        {
            let token = self.resolve_token(&auth.token, spec, def);
            request = request.bearer_auth(token);
        }

        if method == reqwest::Method::POST || method == reqwest::Method::PUT {
            let mut body = Map::new();
            for (field, arg_name) in &recipe.body_map {
                if let Some(value) = arguments.and_then(|args| args.get(arg_name)) {
                    body.insert(field.clone(), value.clone());
                }
            }
            request = request.json(&Value::Object(body));
        }

        debug!(server = %spec.name, tool = %def.name, url = %recipe.url, "executing virtual tool");

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ErrorKind::UpstreamTimeout
            } else if e.is_connect() {
                ErrorKind::ConnectRefused
            } else {
                ErrorKind::WireError
            };
            GatewayError::new(kind, format!("virtual tool '{}' call failed: {e}", def.name))
                .with_component("virtual")
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body_text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Ok(CallToolResult::error(format!(
                "upstream returned {status}: {body_text}"
            )));
        }

        // JSON responses are wrapped as structured content; everything else
        // is returned verbatim as text.
        if content_type.contains("application/json") {
            match serde_json::from_str::<Value>(&body_text) {
                Ok(parsed) => Ok(CallToolResult {
                    content: vec![mcpgate_protocol::ContentBlock::Resource { resource: parsed }],
                    is_error: false,
                }),
                Err(e) => {
                    warn!(tool = %def.name, error = %e, "declared JSON body failed to parse");
                    Ok(CallToolResult::text(body_text))
                }
            }
        } else {
            Ok(CallToolResult::text(body_text))
        }
    }

    /// Resolve a recipe token: literal strings pass through, `${SECRET:NAME}`
    /// is looked up. An unresolved secret yields an empty bearer and a
    /// warning, never a fabricated token.
    fn resolve_token(&self, token: &str, spec: &VirtualServer, def: &VirtualToolDef) -> String {
        match SECRET_REF.captures(token) {
            Some(captures) => {
                let name = &captures[1];
                match self.secrets.get(name) {
                    Some(value) => value,
                    None => {
                        warn!(
                            server = %spec.name,
                            tool = %def.name,
                            secret = %name,
                            "secret not found, sending empty bearer"
                        );
                        String::new()
                    }
                }
            }
            None => token.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecipeAuth, RestRecipe};
    use crate::secrets::StaticSecretSource;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slack_spec(url: String, token: &str) -> VirtualServer {
        VirtualServer {
            id: "vs-slack".into(),
            org: "org-1".into(),
            name: "slack".into(),
            tools: vec![VirtualToolDef {
                name: "send_message".into(),
                description: Some("post a message".into()),
                input_schema: None,
                recipe: RestRecipe {
                    method: "POST".into(),
                    url,
                    headers: HashMap::from([("X-App".into(), "mcpgate".into())]),
                    body_map: HashMap::from([
                        ("channel".into(), "channel".into()),
                        ("text".into(), "message".into()),
                    ]),
                    auth: Some(RecipeAuth {
                        auth_type: "bearer".into(),
                        token: token.into(),
                    }),
                    timeout_secs: None,
                },
            }],
        }
    }

    #[test]
    fn list_tools_mirrors_the_spec() {
        let spec = slack_spec("https://slack.example/send".into(), "literal");
        let records = VirtualAdapter::list_tools(&spec);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prefixed_name, "slack__send_message");
    }

    #[tokio::test]
    async fn secret_reference_resolves_to_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer abc"))
            .and(body_json(serde_json::json!({"channel": "#general", "text": "hi"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(serde_json::json!({"ok": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let secrets = StaticSecretSource::from_pairs([("SLACK_BOT_TOKEN", "abc")]);
        let adapter = VirtualAdapter::new(Arc::new(secrets));
        let spec = slack_spec(format!("{}/send", server.uri()), "${SECRET:SLACK_BOT_TOKEN}");

        let args = HashMap::from([
            ("channel".to_string(), serde_json::json!("#general")),
            ("message".to_string(), serde_json::json!("hi")),
        ]);
        let result = adapter
            .call_tool(&spec, "send_message", Some(&args))
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn unresolved_secret_sends_empty_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer "))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = VirtualAdapter::new(Arc::new(StaticSecretSource::default()));
        let spec = slack_spec(format!("{}/send", server.uri()), "${SECRET:MISSING}");
        let result = adapter.call_tool(&spec, "send_message", None).await.unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn non_2xx_becomes_tool_error_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let adapter = VirtualAdapter::new(Arc::new(StaticSecretSource::default()));
        let spec = slack_spec(format!("{}/send", server.uri()), "literal");
        let result = adapter.call_tool(&spec, "send_message", None).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found() {
        let adapter = VirtualAdapter::new(Arc::new(StaticSecretSource::default()));
        let spec = slack_spec("https://slack.example/send".into(), "literal");
        let err = adapter.call_tool(&spec, "nope", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolNotFound);
    }
}
