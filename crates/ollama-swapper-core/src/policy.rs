//! Policy resolution and in-place payload injection.

use crate::config::{AppConfig, KeepAlive, PolicyConfig};

/// Merged `num_ctx`/`keep_alive` for a single request, after overlaying
/// per-model overrides on top of `policy.defaults`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPolicy {
    pub num_ctx: Option<u64>,
    pub keep_alive: Option<KeepAlive>,
}

/// Merge `policy.defaults` with `policy.models[model]`, when present.
///
/// Only non-null per-model fields overlay the defaults; unset defaults stay
/// unset.
#[must_use]
pub fn resolve_policy(model: Option<&str>, policy: &PolicyConfig) -> ResolvedPolicy {
    let mut resolved = ResolvedPolicy {
        num_ctx: policy.defaults.num_ctx,
        keep_alive: policy.defaults.keep_alive.clone(),
    };

    let Some(model_policy) = model.and_then(|name| policy.models.get(name)) else {
        return resolved;
    };

    if let Some(num_ctx) = model_policy.num_ctx {
        resolved.num_ctx = Some(num_ctx);
    }
    if let Some(ref keep_alive) = model_policy.keep_alive {
        resolved.keep_alive = Some(keep_alive.clone());
    }

    resolved
}

/// Pick the upstream base URL for `model`: its per-model `upstream` override
/// if one is configured, else `server.upstream`.
#[must_use]
pub fn resolve_upstream(model: Option<&str>, config: &AppConfig) -> String {
    let per_model = model
        .and_then(|name| config.policy.models.get(name))
        .and_then(|m| m.upstream.as_ref());

    match per_model {
        Some(upstream) => upstream.clone(),
        None => config.server.upstream.clone(),
    }
}

/// Inject resolved policy into `payload`, in place, without overwriting
/// caller-supplied values.
///
/// - `payload.options` is created as an object if absent.
/// - `payload.options.num_ctx` is set only if absent.
/// - top-level `payload.keep_alive` is set only if absent or null.
pub fn apply_policy(payload: &mut serde_json::Value, policy: &PolicyConfig) {
    let model = payload
        .get("model")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let resolved = resolve_policy(model.as_deref(), policy);

    if !payload["options"].is_object() {
        payload["options"] = serde_json::json!({});
    }

    if let Some(num_ctx) = resolved.num_ctx {
        if payload["options"]["num_ctx"].is_null() {
            payload["options"]["num_ctx"] = serde_json::json!(num_ctx);
        }
    }

    if let Some(keep_alive) = resolved.keep_alive {
        if payload["keep_alive"].is_null() {
            payload["keep_alive"] =
                serde_json::to_value(keep_alive).unwrap_or(serde_json::Value::Null);
        }
    }
}
