//! JSON-RPC 2.0 runtime exposing documentation lookup as two tools.

use async_trait::async_trait;
use serde_json::{Value, json};
use sessionbus_core::Payload;
use tracing::{debug, warn};

use super::DocsBackend;
use crate::runtime::{ProtocolRuntime, RuntimeContext, RuntimeError};

const PROTOCOL_VERSION: &str = "2025-03-26";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_REQUEST: i64 = -32600;
const INVALID_PARAMS: i64 = -32602;

/// Answers `initialize`, `ping`, `tools/list` and `tools/call`.
pub struct DocsRuntime<B> {
    backend: B,
}

impl<B: DocsBackend> DocsRuntime<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    async fn call_tool(&self, ctx: &RuntimeContext, params: &Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::params("missing tool name"))?;
        let args = params.get("arguments").unwrap_or(&Value::Null);
        let repo = args
            .get("repo")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::params("missing argument: repo"))?;

        let outcome = match name {
            "fetch_documentation" => self.backend.fetch_docs(repo).await,
            "search_documentation" => {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::params("missing argument: query"))?;
                self.backend.search(repo, query).await.map(|hits| {
                    hits.iter()
                        .map(|h| h.excerpt.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n---\n\n")
                })
            }
            other => return Err(RpcError::params(format!("unknown tool: {other}"))),
        };

        if let Some(token) = params.pointer("/_meta/progressToken") {
            notify_progress(ctx, token).await;
        }

        Ok(match outcome {
            Ok(text) => json!({ "content": [{ "type": "text", "text": text }] }),
            Err(e) => {
                warn!(repo, tool = name, error = %e, "Documentation tool failed");
                json!({ "content": [{ "type": "text", "text": e.to_string() }], "isError": true })
            }
        })
    }
}

async fn notify_progress(ctx: &RuntimeContext, token: &Value) {
    let note = json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": { "progressToken": token, "progress": 1, "total": 1 },
    });
    if let Err(e) = ctx.outbox.send(&Payload::from(note)).await {
        debug!(session_id = %ctx.session_id, error = %e, "Progress notification dropped");
    }
}

struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

fn tool_definitions() -> Value {
    json!({
        "tools": [
            {
                "name": "fetch_documentation",
                "description": "Fetch the documentation of a GitHub repository.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "repo": { "type": "string", "description": "owner/repo" } },
                    "required": ["repo"],
                },
            },
            {
                "name": "search_documentation",
                "description": "Search the documentation of a GitHub repository.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "repo": { "type": "string", "description": "owner/repo" },
                        "query": { "type": "string" },
                    },
                    "required": ["repo", "query"],
                },
            },
        ]
    })
}

fn reply(id: &Value, outcome: Result<Value, RpcError>) -> Payload {
    let message = match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": e.code, "message": e.message },
        }),
    };
    Payload::from(message)
}

#[async_trait]
impl<B: DocsBackend> ProtocolRuntime for DocsRuntime<B> {
    async fn handle(
        &self,
        ctx: &RuntimeContext,
        message: Payload,
    ) -> Result<Option<Payload>, RuntimeError> {
        let Some(request) = message.to_json() else {
            return Err(RuntimeError::InvalidRequest(
                "message is not JSON".to_string(),
            ));
        };
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            return Ok(Some(reply(
                request.get("id").unwrap_or(&Value::Null),
                Err(RpcError {
                    code: INVALID_REQUEST,
                    message: "expected a JSON-RPC request object".to_string(),
                }),
            )));
        };
        let Some(id) = request.get("id") else {
            debug!(session_id = %ctx.session_id, method, "Notification received");
            return Ok(None);
        };
        let params = request.get("params").unwrap_or(&Value::Null);

        let outcome = match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "sessionbus-docs", "version": env!("CARGO_PKG_VERSION") },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tool_definitions()),
            "tools/call" => self.call_tool(ctx, params).await,
            other => Err(RpcError {
                code: METHOD_NOT_FOUND,
                message: format!("method not found: {other}"),
            }),
        };
        Ok(Some(reply(id, outcome)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::docs::{DocsError, SearchHit};
    use crate::test_support::{context, fixture};

    struct FakeDocs;

    #[async_trait]
    impl DocsBackend for FakeDocs {
        async fn fetch_docs(&self, repo_id: &str) -> Result<String, DocsError> {
            match repo_id {
                "tokio-rs/axum" => Ok("axum docs".to_string()),
                other => Err(DocsError::NotFound(other.to_string())),
            }
        }

        async fn search(&self, repo_id: &str, query: &str) -> Result<Vec<SearchHit>, DocsError> {
            self.fetch_docs(repo_id).await?;
            Ok(vec![
                SearchHit { score: 2, excerpt: format!("{query} one") },
                SearchHit { score: 1, excerpt: format!("{query} two") },
            ])
        }
    }

    async fn call(message: Value) -> Option<Value> {
        let f = fixture();
        let ctx = context(&f.relay, "s1", "r1");
        DocsRuntime::new(FakeDocs)
            .handle(&ctx, Payload::from(message))
            .await
            .unwrap()
            .map(|p| p.to_json().unwrap())
    }

    #[tokio::test]
    async fn initialize_reports_tools_capability() {
        let reply = call(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .await
            .unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(reply["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn ping_echoes_id() {
        let reply = call(json!({"jsonrpc": "2.0", "id": "abc", "method": "ping"}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": "abc", "result": {}}));
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        assert!(
            call(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn lists_both_tools() {
        let reply = call(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        let names: Vec<_> = reply["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["fetch_documentation", "search_documentation"]);
    }

    #[tokio::test]
    async fn fetch_tool_returns_text_content() {
        let reply = call(json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "fetch_documentation", "arguments": {"repo": "tokio-rs/axum"}}
        }))
        .await
        .unwrap();
        assert_eq!(reply["result"]["content"][0]["text"], "axum docs");
        assert!(reply["result"].get("isError").is_none());
    }

    #[tokio::test]
    async fn search_tool_joins_excerpts() {
        let reply = call(json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {"name": "search_documentation", "arguments": {"repo": "tokio-rs/axum", "query": "router"}}
        }))
        .await
        .unwrap();
        assert_eq!(
            reply["result"]["content"][0]["text"],
            "router one\n\n---\n\nrouter two"
        );
    }

    #[tokio::test]
    async fn backend_failure_is_tool_error() {
        let reply = call(json!({
            "jsonrpc": "2.0", "id": 5, "method": "tools/call",
            "params": {"name": "fetch_documentation", "arguments": {"repo": "no/docs"}}
        }))
        .await
        .unwrap();
        assert_eq!(reply["result"]["isError"], true);
    }

    #[tokio::test]
    async fn bad_params_are_rpc_errors() {
        let reply = call(json!({
            "jsonrpc": "2.0", "id": 6, "method": "tools/call",
            "params": {"name": "search_documentation", "arguments": {"repo": "tokio-rs/axum"}}
        }))
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);

        let reply = call(json!({
            "jsonrpc": "2.0", "id": 7, "method": "tools/call",
            "params": {"name": "delete_everything", "arguments": {"repo": "a/b"}}
        }))
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let reply = call(json!({"jsonrpc": "2.0", "id": 8, "method": "resources/list"}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn non_request_json_is_invalid_request() {
        let reply = call(json!([1, 2, 3])).await.unwrap();
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
        assert_eq!(reply["id"], Value::Null);
    }

    #[tokio::test]
    async fn raw_text_is_rejected() {
        let f = fixture();
        let ctx = context(&f.relay, "s1", "r1");
        let err = DocsRuntime::new(FakeDocs)
            .handle(&ctx, Payload::raw("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn progress_token_emits_event() {
        let f = fixture();
        f.relay
            .register_session_with_id("s1", Value::Null)
            .await
            .unwrap();
        let mut events = f.relay.listen_events("s1").await.unwrap();
        let ctx = context(&f.relay, "s1", "r1");

        let request = json!({
            "jsonrpc": "2.0", "id": 9, "method": "tools/call",
            "params": {
                "name": "fetch_documentation",
                "arguments": {"repo": "tokio-rs/axum"},
                "_meta": {"progressToken": "tok"}
            }
        });
        DocsRuntime::new(FakeDocs)
            .handle(&ctx, Payload::from(request))
            .await
            .unwrap();

        let event = events.next().await.unwrap();
        let note = event.payload().to_json().unwrap();
        assert_eq!(note["method"], "notifications/progress");
        assert_eq!(note["params"]["progressToken"], "tok");
    }
}
