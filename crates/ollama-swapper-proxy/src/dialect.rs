//! Pure, synchronous request/response translation between the Ollama native
//! dialect and the OpenAI Chat Completions / Completions dialect.
//!
//! Every function here takes a parsed JSON value and returns a new one; none
//! of them touch I/O, and none of them can fail — malformed or missing
//! fields degrade to sensible defaults rather than erroring, so a dialect
//! mismatch never takes the pipeline down.

use serde_json::{Value, json};

/// Translate an Ollama `/api/chat` body into an OpenAI `/v1/chat/completions` body.
///
/// Only `model`, `messages`, `stream`, `tools` (verbatim, if present) and a
/// forced `max_tokens: -1` survive; `think: true` additionally sets
/// `enable_thinking: true`. Every other field is dropped.
#[must_use]
pub fn ollama_chat_to_openai_chat(payload: &Value) -> Value {
    let mut out = json!({
        "model": payload.get("model").cloned().unwrap_or(Value::Null),
        "messages": payload.get("messages").cloned().unwrap_or_else(|| json!([])),
        "stream": payload.get("stream").and_then(Value::as_bool).unwrap_or(false),
        "max_tokens": -1,
    });

    if let Some(tools) = payload.get("tools") {
        out["tools"] = tools.clone();
    }

    if payload.get("think").is_some_and(is_truthy) {
        out["enable_thinking"] = Value::Bool(true);
    }

    out
}

/// Translate an Ollama `/api/generate` body into an OpenAI `/v1/completions` body.
#[must_use]
pub fn ollama_generate_to_openai_generate(payload: &Value) -> Value {
    json!({
        "model": payload.get("model").cloned().unwrap_or(Value::Null),
        "prompt": payload.get("prompt").and_then(Value::as_str).unwrap_or("").to_string(),
        "stream": payload.get("stream").and_then(Value::as_bool).unwrap_or(false),
        "max_tokens": -1,
    })
}

/// Translate a non-streaming OpenAI `/v1/chat/completions` response into the
/// Ollama `/api/chat` response shape.
///
/// `message.content == null` coerces to `""`.
/// `reasoning_content` is surfaced as `message.thinking` only when
/// `include_thinking` is true; `tool_calls`, when present, are converted via
/// [`convert_tool_calls`].
#[must_use]
pub fn openai_chat_to_ollama_chat(model: &str, openai: &Value, include_thinking: bool) -> Value {
    let message = &openai["choices"][0]["message"];
    let content = message.get("content").and_then(Value::as_str).unwrap_or("");

    let mut ollama_message = json!({
        "role": "assistant",
        "content": content,
    });

    if include_thinking {
        if let Some(reasoning) = message.get("reasoning_content").and_then(Value::as_str) {
            ollama_message["thinking"] = json!(reasoning);
        }
    }

    if let Some(tool_calls) = message.get("tool_calls") {
        if let Value::Array(items) = tool_calls {
            ollama_message["tool_calls"] = Value::Array(convert_tool_calls(items));
        }
    }

    json!({
        "model": model,
        "message": ollama_message,
        "done": true,
    })
}

/// Translate a non-streaming OpenAI `/v1/completions` response into the
/// Ollama `/api/generate` response shape.
#[must_use]
pub fn openai_generate_to_ollama_generate(model: &str, openai: &Value) -> Value {
    let text = openai["choices"][0]["text"].as_str().unwrap_or("");
    json!({
        "model": model,
        "response": text,
        "done": true,
    })
}

/// Convert a list of OpenAI `tool_calls` items into Ollama-shaped
/// `{function: {name, arguments}}` entries.
///
/// `arguments` is parsed as JSON when it arrives as a string; a parse
/// failure preserves the raw string rather than raising.
#[must_use]
pub fn convert_tool_calls(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .map(|item| {
            let name = item["function"]["name"].as_str().unwrap_or("");
            let arguments = parse_tool_call_arguments(&item["function"]["arguments"]);
            json!({
                "function": {
                    "name": name,
                    "arguments": arguments,
                }
            })
        })
        .collect()
}

/// Parse a tool-call `arguments` value: if it's a JSON string, parse it as
/// JSON and fall back to the raw string on failure; non-string values pass
/// through unchanged.
#[must_use]
pub fn parse_tool_call_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        other => other.clone(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_chat_to_openai_chat_drops_unenumerated_fields() {
        let payload = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "options": {"num_ctx": 8192},
            "keep_alive": "60s",
        });

        let out = ollama_chat_to_openai_chat(&payload);

        assert_eq!(out["model"], "m");
        assert_eq!(out["stream"], true);
        assert_eq!(out["max_tokens"], -1);
        assert!(out.get("options").is_none());
        assert!(out.get("keep_alive").is_none());
    }

    #[test]
    fn ollama_chat_to_openai_chat_passes_tools_and_thinking_flag() {
        let payload = json!({
            "model": "m",
            "messages": [],
            "tools": [{"type": "function", "function": {"name": "f"}}],
            "think": true,
        });

        let out = ollama_chat_to_openai_chat(&payload);

        assert_eq!(out["tools"][0]["function"]["name"], "f");
        assert_eq!(out["enable_thinking"], true);
    }

    #[test]
    fn ollama_generate_to_openai_generate_defaults_empty_prompt() {
        let out = ollama_generate_to_openai_generate(&json!({"model": "m"}));
        assert_eq!(out["prompt"], "");
        assert_eq!(out["max_tokens"], -1);
    }

    #[test]
    fn openai_chat_to_ollama_coerces_null_content() {
        let openai = json!({"choices": [{"message": {"role": "assistant", "content": null}}]});
        let out = openai_chat_to_ollama_chat("m", &openai, false);
        assert_eq!(out["message"]["content"], "");
        assert_eq!(out["done"], true);
    }

    #[test]
    fn openai_chat_to_ollama_surfaces_thinking_only_when_requested() {
        let openai = json!({
            "choices": [{"message": {"content": "hi", "reasoning_content": "because"}}]
        });

        let with_thinking = openai_chat_to_ollama_chat("m", &openai, true);
        assert_eq!(with_thinking["message"]["thinking"], "because");

        let without_thinking = openai_chat_to_ollama_chat("m", &openai, false);
        assert!(without_thinking["message"].get("thinking").is_none());
    }

    #[test]
    fn openai_chat_to_ollama_converts_tool_calls() {
        let openai = json!({
            "choices": [{"message": {
                "content": "",
                "tool_calls": [{"id": "c1", "function": {"name": "fn", "arguments": "{\"k\":\"v\"}"}}]
            }}]
        });

        let out = openai_chat_to_ollama_chat("m", &openai, false);

        assert_eq!(out["message"]["tool_calls"][0]["function"]["name"], "fn");
        assert_eq!(out["message"]["tool_calls"][0]["function"]["arguments"]["k"], "v");
    }

    #[test]
    fn convert_tool_calls_preserves_raw_string_on_parse_failure() {
        let items = vec![json!({"function": {"name": "fn", "arguments": "not json"}})];
        let converted = convert_tool_calls(&items);
        assert_eq!(converted[0]["function"]["arguments"], "not json");
    }

    #[test]
    fn openai_generate_to_ollama_generate_defaults_empty_text() {
        let openai = json!({"choices": [{"text": null}]});
        let out = openai_generate_to_ollama_generate("m", &openai);
        assert_eq!(out["response"], "");
        assert_eq!(out["done"], true);
    }
}
