//! The per-request orchestrator (spec §4.4): read body → apply policy →
//! select route → optionally translate dialect → forward → stream back →
//! cleanup.
//!
//! [`Pipeline`] holds the immutable [`AppConfig`]; [`RequestContext`] is the
//! per-invocation state built up as `handle` works through the request.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};

use ollama_swapper_core::{AppConfig, apply_policy, resolve_upstream};

use crate::dialect::{
    ollama_chat_to_openai_chat, ollama_generate_to_openai_generate, openai_chat_to_ollama_chat,
    openai_generate_to_ollama_generate,
};
use crate::stream::{opaque_passthrough, sse_chat_to_ndjson, sse_generate_to_ndjson, thinking_filter};

/// Maximum request body size read into memory. Chat/generate payloads are
/// small JSON documents; this is generous headroom, not a protocol limit.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Headers that describe the hop or the previous body and must never be
/// forwarded verbatim to the upstream (grounded on the teacher's
/// `forward.rs::HOP_BY_HOP_HEADERS`).
const STRIP_ON_FORWARD: &[&str] = &["host", "content-length", "transfer-encoding", "connection"];

/// Headers stripped from the upstream response before it's copied onto the
/// client response: framing is re-established by the HTTP stack, not copied.
const STRIP_ON_RETURN: &[&str] = &["content-length", "transfer-encoding", "connection"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Chat,
    Generate,
}

/// Per-request state threaded through `handle` (spec §3, `RequestContext`).
struct RequestContext {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    payload: Option<Value>,
    model: Option<String>,
    include_thinking: bool,
    upstream_base: String,
    use_openai_dialect: bool,
    stream: bool,
    dialect: Option<Dialect>,
}

/// Holds the immutable config and dispatches every inbound request.
pub struct Pipeline {
    config: Arc<AppConfig>,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    /// Run one request through the full pipeline (spec §4.4, steps 1-9).
    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let body = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to read request body: {e}");
                return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
            }
        };

        let mut ctx = self.build_context(parts.method, &parts.uri, parts.headers, body);
        self.rewrite_body_for_dialect(&mut ctx);

        let Some(url) = join_url(&ctx.upstream_base, &ctx.path, ctx.query.as_deref()) else {
            return (StatusCode::BAD_GATEWAY, "invalid upstream URL").into_response();
        };

        let client = Client::builder().build().unwrap_or_else(|_| Client::new());
        let upstream_request = client
            .request(ctx.method.clone(), url.as_str())
            .headers(forwardable_headers(&ctx.headers))
            .body(ctx.body.clone());

        let upstream_response = match upstream_request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(method = %ctx.method, url = %url, error = %e, "upstream request failed");
                drop(client);
                return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
            }
        };

        let status = upstream_response.status();
        let response_headers = upstream_response.headers().clone();

        if status.as_u16() >= 400 || !ctx.use_openai_dialect {
            return self.forward_native(&ctx, status, &response_headers, upstream_response);
        }

        if ctx.stream {
            return self.forward_translated_stream(&ctx, &response_headers, upstream_response);
        }

        self.forward_translated_buffered(&ctx, status, upstream_response).await
    }

    fn build_context(&self, method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> RequestContext {
        let path = uri.path().trim_start_matches('/').to_string();
        let query = uri.query().map(str::to_owned);
        let is_protocol_path = path == "api/chat" || path == "api/generate";

        let mut payload = None;
        let mut model = None;
        let mut include_thinking = false;

        if is_protocol_path && !body.is_empty() {
            match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Object(mut map)) => {
                    include_thinking = map
                        .remove("include_thinking")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    model = map.get("model").and_then(Value::as_str).map(str::to_owned);
                    payload = Some(Value::Object(map));
                }
                Ok(_) => {
                    debug!(path = %path, "skipping policy injection: payload is not a JSON object");
                }
                Err(e) => {
                    debug!(path = %path, error = %e, "skipping policy injection: invalid json body");
                }
            }
        }

        let upstream_base = resolve_upstream(model.as_deref(), &self.config);
        let use_openai_dialect =
            upstream_base != self.config.server.upstream && is_protocol_path && payload.is_some();

        let dialect = if path == "api/chat" {
            Some(Dialect::Chat)
        } else if path == "api/generate" {
            Some(Dialect::Generate)
        } else {
            None
        };

        RequestContext {
            method,
            path,
            query,
            headers,
            body,
            payload,
            model,
            include_thinking,
            upstream_base,
            use_openai_dialect,
            stream: false,
            dialect,
        }
    }

    /// Apply policy injection and, if routed to an OpenAI-dialect upstream,
    /// rewrite the payload into that dialect. Recomputes `content-length` /
    /// `content-type` whenever the body is rewritten (spec §4.4 steps 2, 4).
    fn rewrite_body_for_dialect(&self, ctx: &mut RequestContext) {
        let Some(mut payload) = ctx.payload.take() else {
            return;
        };

        let options_before = payload.get("options").cloned().unwrap_or(Value::Null);
        let keep_alive_before = payload.get("keep_alive").cloned().unwrap_or(Value::Null);
        apply_policy(&mut payload, &self.config.policy);
        debug!(
            model = ?ctx.model,
            options_before = %options_before,
            options_after = %payload["options"],
            keep_alive_before = %keep_alive_before,
            keep_alive_after = %payload["keep_alive"],
            "policy applied"
        );

        if ctx.use_openai_dialect {
            ctx.stream = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
            payload = match ctx.dialect {
                Some(Dialect::Chat) => {
                    ctx.path = "v1/chat/completions".to_string();
                    ollama_chat_to_openai_chat(&payload)
                }
                Some(Dialect::Generate) => {
                    ctx.path = "v1/completions".to_string();
                    ollama_generate_to_openai_generate(&payload)
                }
                None => payload,
            };
        }

        let serialized = serde_json::to_vec(&payload).unwrap_or_default();
        ctx.headers.insert(
            "content-length",
            HeaderValue::from_str(&serialized.len().to_string()).unwrap_or(HeaderValue::from_static("0")),
        );
        if ctx.use_openai_dialect {
            ctx.headers
                .insert("content-type", HeaderValue::from_static("application/json"));
        }
        ctx.body = Bytes::from(serialized);
        ctx.payload = Some(payload);
    }

    /// Native-dialect / error / opaque response path (spec §4.4 step 7): the
    /// upstream's status, headers and body are forwarded as-is, with the
    /// thinking filter interposed for non-erroring native Ollama chat
    /// responses that didn't opt into thinking passthrough.
    fn forward_native(
        &self,
        ctx: &RequestContext,
        status: reqwest::StatusCode,
        upstream_headers: &reqwest::header::HeaderMap,
        upstream_response: reqwest::Response,
    ) -> Response {
        let byte_stream = upstream_response.bytes_stream();
        let is_native_chat = ctx.path == "api/chat" && !ctx.use_openai_dialect;
        let body = if is_native_chat && !ctx.include_thinking && status.as_u16() < 400 {
            Body::from_stream(thinking_filter(byte_stream, ctx.include_thinking))
        } else {
            Body::from_stream(opaque_passthrough(byte_stream))
        };

        build_response(status.as_u16(), upstream_headers, body)
    }

    /// OpenAI-dialect streaming response path (spec §4.4 step 8, `stream: true`).
    fn forward_translated_stream(
        &self,
        ctx: &RequestContext,
        _upstream_headers: &reqwest::header::HeaderMap,
        upstream_response: reqwest::Response,
    ) -> Response {
        let model = ctx.model.clone().unwrap_or_default();
        let byte_stream = upstream_response.bytes_stream();

        let body = match ctx.dialect {
            Some(Dialect::Chat) => {
                Body::from_stream(sse_chat_to_ndjson(byte_stream, model, ctx.include_thinking))
            }
            Some(Dialect::Generate) => Body::from_stream(sse_generate_to_ndjson(byte_stream, model)),
            None => Body::from_stream(opaque_passthrough(byte_stream)),
        };

        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }

    /// OpenAI-dialect buffered response path (spec §4.4 step 8, non-streaming).
    async fn forward_translated_buffered(
        &self,
        ctx: &RequestContext,
        status: reqwest::StatusCode,
        upstream_response: reqwest::Response,
    ) -> Response {
        let raw = match upstream_response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to read upstream response body: {e}");
                return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
            }
        };

        let model = ctx.model.clone().unwrap_or_default();
        let converted = match serde_json::from_slice::<Value>(&raw) {
            Ok(openai) => match ctx.dialect {
                Some(Dialect::Chat) => Some(openai_chat_to_ollama_chat(&model, &openai, ctx.include_thinking)),
                Some(Dialect::Generate) => Some(openai_generate_to_ollama_generate(&model, &openai)),
                None => None,
            },
            Err(e) => {
                debug!(error = %e, "malformed upstream final json, forwarding raw bytes");
                None
            }
        };

        match converted {
            Some(value) => Response::builder()
                .status(status.as_u16())
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value).unwrap_or_default()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
            None => Response::builder()
                .status(status.as_u16())
                .body(Body::from(raw))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        }
    }
}

/// Copy headers onto an outbound request, dropping ones that describe the
/// previous hop or the previous body's framing.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if STRIP_ON_FORWARD.contains(&name.as_str()) {
            continue;
        }
        out.append(name, value.clone());
    }
    out
}

/// Join `base` and `path` with exactly one `/` between them, appending the
/// original query string when present.
fn join_url(base: &str, path: &str, query: Option<&str>) -> Option<String> {
    if base.is_empty() {
        return None;
    }
    let mut url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    if let Some(q) = query {
        if !q.is_empty() {
            url.push('?');
            url.push_str(q);
        }
    }
    Some(url)
}

fn build_response(status: u16, upstream_headers: &reqwest::header::HeaderMap, body: Body) -> Response {
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream_headers {
            if STRIP_ON_RETURN.contains(&name.as_str()) {
                continue;
            }
            headers.append(name, value.clone());
        }
    }
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_ensures_single_slash() {
        assert_eq!(
            join_url("http://127.0.0.1:11436/", "api/chat", None),
            Some("http://127.0.0.1:11436/api/chat".to_string())
        );
        assert_eq!(
            join_url("http://127.0.0.1:11436", "/api/chat", None),
            Some("http://127.0.0.1:11436/api/chat".to_string())
        );
    }

    #[test]
    fn join_url_appends_query_string() {
        assert_eq!(
            join_url("http://127.0.0.1:11436", "api/tags", Some("verbose=true")),
            Some("http://127.0.0.1:11436/api/tags?verbose=true".to_string())
        );
    }

    #[test]
    fn forwardable_headers_strips_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("client-host"));
        headers.insert("content-length", HeaderValue::from_static("10"));
        headers.insert("x-custom", HeaderValue::from_static("keep-me"));

        let out = forwardable_headers(&headers);

        assert!(out.get("host").is_none());
        assert!(out.get("content-length").is_none());
        assert_eq!(out.get("x-custom").unwrap(), "keep-me");
    }

    // End-to-end `Pipeline::handle` tests: a fake upstream is spun up on a
    // real `TcpListener` and echoes back what it received (as plain JSON for
    // the native-dialect cases, wrapped in an OpenAI chat response for the
    // dialect-translation case), so the assertions exercise what actually
    // crossed the wire rather than internal state.

    use std::collections::HashMap;

    use axum::Router;
    use axum::http::Request as HttpRequest;
    use axum::routing::any;
    use ollama_swapper_core::{KeepAlive, ModelPolicy, PolicyConfig, PolicyDefaults, ServerConfig};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    async fn echo(req: Request) -> Response {
        let path = req.uri().path().to_string();
        let body = to_bytes(req.into_body(), MAX_BODY_BYTES).await.unwrap_or_default();
        let received = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
        let out = serde_json::to_vec(&json!({"path": path, "received": received})).unwrap_or_default();
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(out))
            .unwrap()
    }

    async fn openai_diagnostic(req: Request) -> Response {
        let path = req.uri().path().to_string();
        let body = to_bytes(req.into_body(), MAX_BODY_BYTES).await.unwrap_or_default();
        let received = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
        let diagnostic = json!({"path": path, "received": received}).to_string();
        let openai_response = json!({
            "choices": [{"message": {"role": "assistant", "content": diagnostic}}]
        });
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&openai_response).unwrap_or_default()))
            .unwrap()
    }

    /// Bind a fake upstream that echoes back `{path, received}` as plain JSON.
    async fn spawn_echo_upstream() -> (String, JoinHandle<()>) {
        let app = Router::new().route("/", any(echo)).route("/*path", any(echo));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let join = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), join)
    }

    /// Bind a fake upstream that wraps `{path, received}` as the `content` of
    /// an OpenAI chat completion, so the dialect adapter round-trips it back
    /// through the pipeline's response conversion.
    async fn spawn_openai_diagnostic_upstream() -> (String, JoinHandle<()>) {
        let app = Router::new()
            .route("/", any(openai_diagnostic))
            .route("/*path", any(openai_diagnostic));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let join = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), join)
    }

    #[tokio::test]
    async fn handle_injects_policy_and_strips_include_thinking_before_forwarding() {
        let (upstream_url, server) = spawn_echo_upstream().await;

        let mut models = HashMap::new();
        models.insert(
            "llama3".to_string(),
            ModelPolicy {
                num_ctx: Some(32768),
                keep_alive: Some(KeepAlive::Duration("60s".to_string())),
                upstream: None,
            },
        );
        let config = AppConfig {
            server: ServerConfig {
                listen: "127.0.0.1:0".to_string(),
                upstream: upstream_url,
            },
            policy: PolicyConfig {
                defaults: PolicyDefaults {
                    num_ctx: Some(8192),
                    keep_alive: None,
                },
                models,
            },
        };
        let pipeline = Pipeline::new(Arc::new(config));

        let payload = json!({"model": "llama3", "messages": [], "include_thinking": true});
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/chat")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap();

        let response = pipeline.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();
        let echoed: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(echoed["path"], "/api/chat");
        assert_eq!(echoed["received"]["options"]["num_ctx"], 32768);
        assert_eq!(echoed["received"]["keep_alive"], "60s");
        assert!(echoed["received"].get("include_thinking").is_none());

        server.abort();
    }

    #[tokio::test]
    async fn handle_preserves_client_supplied_policy_fields() {
        let (upstream_url, server) = spawn_echo_upstream().await;

        let mut models = HashMap::new();
        models.insert(
            "llama3".to_string(),
            ModelPolicy {
                num_ctx: Some(32768),
                keep_alive: Some(KeepAlive::Duration("60s".to_string())),
                upstream: None,
            },
        );
        let config = AppConfig {
            server: ServerConfig {
                listen: "127.0.0.1:0".to_string(),
                upstream: upstream_url,
            },
            policy: PolicyConfig {
                defaults: PolicyDefaults {
                    num_ctx: Some(8192),
                    keep_alive: None,
                },
                models,
            },
        };
        let pipeline = Pipeline::new(Arc::new(config));

        let payload = json!({
            "model": "unknown",
            "messages": [],
            "options": {"num_ctx": 1234},
            "keep_alive": "10s",
        });
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/chat")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap();

        let response = pipeline.handle(request).await;
        let body = to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();
        let echoed: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(echoed["received"]["options"]["num_ctx"], 1234);
        assert_eq!(echoed["received"]["keep_alive"], "10s");

        server.abort();
    }

    #[tokio::test]
    async fn handle_translates_dialect_and_rewrites_path_for_openai_upstream() {
        let (openai_url, server) = spawn_openai_diagnostic_upstream().await;

        let mut models = HashMap::new();
        models.insert(
            "llama3".to_string(),
            ModelPolicy {
                num_ctx: None,
                keep_alive: None,
                upstream: Some(openai_url),
            },
        );
        let config = AppConfig {
            server: ServerConfig {
                listen: "127.0.0.1:0".to_string(),
                // Never dialed for this model; present only so `resolve_upstream`
                // has something distinct to compare the per-model override against.
                upstream: "http://127.0.0.1:1".to_string(),
            },
            policy: PolicyConfig {
                defaults: PolicyDefaults::default(),
                models,
            },
        };
        let pipeline = Pipeline::new(Arc::new(config));

        let payload = json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false,
        });
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/chat")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap();

        let response = pipeline.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");

        let body = to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();
        let ollama_response: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(ollama_response["done"], true);

        let diagnostic: Value =
            serde_json::from_str(ollama_response["message"]["content"].as_str().unwrap()).unwrap();
        assert_eq!(diagnostic["path"], "/v1/chat/completions");
        assert_eq!(diagnostic["received"]["model"], "llama3");
        assert_eq!(diagnostic["received"]["max_tokens"], -1);
        assert_eq!(diagnostic["received"]["stream"], false);

        server.abort();
    }
}
