//! Async byte-stream transforms between SSE-framed OpenAI chunks and
//! NDJSON-framed Ollama chunks (spec §4.3).
//!
//! Each translator here is a lazy, single-pass `Stream` built with
//! `futures_util::stream::unfold`: state (the upstream reader, a small
//! line-assembly buffer, and — for chat — the tool-call buffer) is threaded
//! through each poll, and dropping the stream (client disconnect) simply
//! drops that state, which is the whole of the cancellation contract in
//! spec §5.

use std::collections::{BTreeMap, VecDeque};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use tracing::warn;

use crate::dialect::convert_tool_calls;

/// Per-index accumulator for a streamed tool call (spec §3, `ToolCallBuffer`).
#[derive(Debug, Default, Clone)]
struct ToolCallSlot {
    id: String,
    name: String,
    /// Raw concatenation of every `function.arguments` fragment seen for
    /// this index; parsed to JSON only when the call is finally emitted.
    arguments: String,
}

/// Translate an OpenAI SSE chat stream into Ollama NDJSON (spec §4.3.1).
pub fn sse_chat_to_ndjson<S>(
    byte_stream: S,
    model: String,
    include_thinking: bool,
) -> impl Stream<Item = Result<Bytes, std::io::Error>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    struct State<S> {
        stream: S,
        buf: BytesMut,
        model: String,
        include_thinking: bool,
        tool_calls: BTreeMap<u64, ToolCallSlot>,
        pending: VecDeque<String>,
        done: bool,
    }

    let state = State {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        model,
        include_thinking,
        tool_calls: BTreeMap::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.pending.pop_front() {
                return Some((Ok(Bytes::from(line)), st));
            }
            if st.done {
                return None;
            }

            if let Some(line_end) = find_newline(&st.buf) {
                let line_bytes = st.buf.split_to(line_end);
                let line = String::from_utf8_lossy(&line_bytes).into_owned();
                let terminal = process_chat_line(
                    &line,
                    &st.model,
                    st.include_thinking,
                    &mut st.tool_calls,
                    &mut st.pending,
                );
                if terminal {
                    st.done = true;
                }
                continue;
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("upstream SSE stream error: {e}");
                    st.done = true;
                    return Some((Err(std::io::Error::other(e)), st));
                }
                None => {
                    st.done = true;
                    let message = build_done_message(&st.tool_calls);
                    let line = ndjson_line(&json!({"model": st.model, "message": message, "done": true}));
                    return Some((Ok(Bytes::from(line)), st));
                }
            }
        }
    })
}

/// Translate an OpenAI SSE completions stream into Ollama NDJSON (spec §4.3.2).
pub fn sse_generate_to_ndjson<S>(
    byte_stream: S,
    model: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    struct State<S> {
        stream: S,
        buf: BytesMut,
        model: String,
        pending: VecDeque<String>,
        done: bool,
    }

    let state = State {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        model,
        pending: VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.pending.pop_front() {
                return Some((Ok(Bytes::from(line)), st));
            }
            if st.done {
                return None;
            }

            if let Some(line_end) = find_newline(&st.buf) {
                let line_bytes = st.buf.split_to(line_end);
                let line = String::from_utf8_lossy(&line_bytes).into_owned();
                let terminal = process_generate_line(&line, &st.model, &mut st.pending);
                if terminal {
                    st.done = true;
                }
                continue;
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("upstream SSE stream error: {e}");
                    st.done = true;
                    return Some((Err(std::io::Error::other(e)), st));
                }
                None => {
                    st.done = true;
                    let line = ndjson_line(&json!({"model": st.model, "done": true}));
                    return Some((Ok(Bytes::from(line)), st));
                }
            }
        }
    })
}

/// Filter `message.thinking` out of a native-dialect Ollama NDJSON stream
/// (spec §4.3.3), dropping chunks that become empty-content, non-final
/// no-ops once `thinking` is removed.
pub fn thinking_filter<S>(
    byte_stream: S,
    include_thinking: bool,
) -> impl Stream<Item = Result<Bytes, std::io::Error>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    struct State<S> {
        stream: S,
        buf: BytesMut,
        include_thinking: bool,
        done: bool,
    }

    let state = State {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        include_thinking,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            if let Some(line_end) = find_newline(&st.buf) {
                let line_bytes = st.buf.split_to(line_end);
                let line = String::from_utf8_lossy(&line_bytes).into_owned();
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() {
                    continue;
                }
                match emit_thinking_filtered(trimmed, st.include_thinking) {
                    Some(out) => return Some((Ok(Bytes::from(out)), st)),
                    None => continue,
                }
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(std::io::Error::other(e)), st));
                }
                None => {
                    st.done = true;
                    let remaining = std::mem::take(&mut st.buf);
                    let line = String::from_utf8_lossy(&remaining).into_owned();
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    if trimmed.is_empty() {
                        return None;
                    }
                    return emit_thinking_filtered(trimmed, st.include_thinking)
                        .map(|out| (Ok(Bytes::from(out)), st));
                }
            }
        }
    })
}

/// Opaque byte passthrough (spec §4.3.4): used for errors, non-chat paths,
/// and any response that failed upstream.
pub fn opaque_passthrough<S>(byte_stream: S) -> impl Stream<Item = Result<Bytes, std::io::Error>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    byte_stream.map_err(std::io::Error::other)
}

fn emit_thinking_filtered(line: &str, include_thinking: bool) -> Option<String> {
    if include_thinking {
        return Some(format!("{line}\n"));
    }

    let Ok(mut value) = serde_json::from_str::<Value>(line) else {
        return Some(format!("{line}\n"));
    };

    if let Some(message) = value.get_mut("message").and_then(Value::as_object_mut) {
        message.remove("thinking");
    }

    let content_falsy = is_falsy(&value["message"]["content"]);
    let is_done = value["done"] == Value::Bool(true);

    if content_falsy && !is_done {
        return None;
    }

    serde_json::to_string(&value).ok().map(|s| format!("{s}\n"))
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Process one SSE line of a chat stream, appending any NDJSON output to
/// `pending`. Returns `true` once the `[DONE]` sentinel has been consumed.
fn process_chat_line(
    line: &str,
    model: &str,
    include_thinking: bool,
    tool_calls: &mut BTreeMap<u64, ToolCallSlot>,
    pending: &mut VecDeque<String>,
) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    let Some(data) = trimmed.strip_prefix("data:") else {
        return false;
    };
    let data = data.trim();

    if data == "[DONE]" {
        let message = build_done_message(tool_calls);
        pending.push_back(ndjson_line(&json!({"model": model, "message": message, "done": true})));
        return true;
    }

    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
        return false;
    };

    let delta = &parsed["choices"][0]["delta"];

    if include_thinking {
        let thinking = delta
            .get("reasoning_content")
            .and_then(Value::as_str)
            .or_else(|| delta.get("thinking").and_then(Value::as_str));
        if let Some(text) = thinking {
            pending.push_back(ndjson_line(&json!({
                "model": model,
                "message": {"role": "assistant", "content": "", "thinking": text},
                "done": false,
            })));
        }
    }

    if let Some(content) = delta.get("content").and_then(Value::as_str) {
        if !content.is_empty() {
            pending.push_back(ndjson_line(&json!({
                "model": model,
                "message": {"role": "assistant", "content": content},
                "done": false,
            })));
        }
    }

    if let Some(Value::Array(fragments)) = delta.get("tool_calls") {
        for fragment in fragments {
            let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
            let slot = tool_calls.entry(index).or_default();
            if let Some(id) = fragment.get("id").and_then(Value::as_str) {
                slot.id = id.to_string();
            }
            if let Some(name) = fragment["function"].get("name").and_then(Value::as_str) {
                slot.name = name.to_string();
            }
            if let Some(args) = fragment["function"].get("arguments").and_then(Value::as_str) {
                slot.arguments.push_str(args);
            }
        }
    }

    false
}

fn process_generate_line(line: &str, model: &str, pending: &mut VecDeque<String>) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    let Some(data) = trimmed.strip_prefix("data:") else {
        return false;
    };
    let data = data.trim();

    if data == "[DONE]" {
        pending.push_back(ndjson_line(&json!({"model": model, "done": true})));
        return true;
    }

    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
        return false;
    };

    if let Some(text) = parsed["choices"][0]["text"].as_str() {
        pending.push_back(ndjson_line(&json!({"model": model, "response": text, "done": false})));
    }

    false
}

/// Build the terminal `{role, content}` message, attaching `tool_calls` (in
/// ascending index order, `BTreeMap`'s natural iteration order) when any
/// slot was populated.
fn build_done_message(tool_calls: &BTreeMap<u64, ToolCallSlot>) -> Value {
    let mut message = json!({"role": "assistant", "content": ""});

    if !tool_calls.is_empty() {
        let items: Vec<Value> = tool_calls
            .values()
            .map(|slot| {
                json!({
                    "id": slot.id,
                    "type": "function",
                    "function": {"name": slot.name, "arguments": slot.arguments},
                })
            })
            .collect();
        message["tool_calls"] = Value::Array(convert_tool_calls(&items));
    }

    message
}

fn ndjson_line(value: &Value) -> String {
    let mut out = serde_json::to_string(value).unwrap_or_default();
    out.push('\n');
    out
}

/// Position just past the next `\n` in `buf`, or `None` if it holds no
/// complete line yet.
fn find_newline(buf: &BytesMut) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
}
