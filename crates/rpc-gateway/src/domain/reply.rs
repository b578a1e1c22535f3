//! Business-status interpretation of reply bodies.
//!
//! Remote services report failures inside a normal reply. A JSON object is a
//! failure when it has a non-null `error` member, a `status` of `"error"`,
//! `"fail"` or `"failure"`, or `"ok": false`. Anything else is a success.

use serde_json::Value;

use crate::domain::error::CallError;

const FAILURE_STATUSES: [&str; 3] = ["error", "fail", "failure"];

/// Fallback when a failed reply carries no message.
const DEFAULT_REMOTE_MESSAGE: &str = "remote call failed";

/// Whether `body` reports a business failure.
pub fn is_failure(body: &Value) -> bool {
    let Some(object) = body.as_object() else {
        return false;
    };

    let has_error = object.get("error").is_some_and(|e| !e.is_null());
    let failed_status = object
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| FAILURE_STATUSES.iter().any(|f| s.eq_ignore_ascii_case(f)));
    let not_ok = object.get("ok").and_then(Value::as_bool) == Some(false);

    has_error || failed_status || not_ok
}

/// Turn a failed reply into [`CallError::Remote`]; pass successes through.
pub fn interpret_reply(body: Value) -> Result<Value, CallError> {
    if !is_failure(&body) {
        return Ok(body);
    }

    let error = body.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.and_then(Value::as_str))
        .or_else(|| body.get("message").and_then(Value::as_str))
        .unwrap_or(DEFAULT_REMOTE_MESSAGE)
        .to_string();
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(Value::as_i64)
        .or_else(|| body.get("code").and_then(Value::as_i64));

    Err(CallError::Remote {
        code,
        message,
        body,
    })
}
