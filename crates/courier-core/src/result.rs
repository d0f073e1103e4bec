// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service call outcomes.
//!
//! A [`ServiceResult`] is what a service hands back for each request, and is
//! also the shape of every reply the upstream engine API returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code attached to results produced when a handler fails outright.
pub const SYS_ERROR: &str = "sys_error";

/// Outcome status of a service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// The call succeeded.
    Ok,
    /// The call failed; `error_code` says why.
    Fail,
    /// The call was deliberately skipped.
    Ignore,
    /// The call did not finish in time.
    Timeout,
}

impl ResultStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Ok => "ok",
            ResultStatus::Fail => "fail",
            ResultStatus::Ignore => "ignore",
            ResultStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn empty_data() -> Value {
    Value::Object(serde_json::Map::new())
}

fn is_empty_data(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Tagged outcome of a service call.
///
/// Empty `error_code`, `message` and `data` are omitted on the wire and
/// restored to their defaults when decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResult {
    /// Outcome status.
    pub status: ResultStatus,
    /// Machine-readable error code, meaningful for `fail` and `timeout`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Result payload.
    #[serde(default = "empty_data", skip_serializing_if = "is_empty_data")]
    pub data: Value,
}

impl ServiceResult {
    /// Build a result with the given status and empty fields.
    pub fn new(status: ResultStatus) -> Self {
        Self {
            status,
            error_code: String::new(),
            message: String::new(),
            data: empty_data(),
        }
    }

    /// Successful result without data.
    pub fn ok() -> Self {
        Self::new(ResultStatus::Ok)
    }

    /// Successful result carrying `data`.
    pub fn ok_with(data: Value) -> Self {
        Self::ok().with_data(data)
    }

    /// Failed result.
    pub fn fail(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Fail,
            error_code: error_code.into(),
            message: message.into(),
            data: empty_data(),
        }
    }

    /// Failed result with the `sys_error` code.
    pub fn sys_error(message: impl Into<String>) -> Self {
        Self::fail(SYS_ERROR, message)
    }

    /// Timed-out result.
    pub fn timeout(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Timeout,
            error_code: error_code.into(),
            message: message.into(),
            data: empty_data(),
        }
    }

    /// Ignored result.
    pub fn ignore() -> Self {
        Self::new(ResultStatus::Ignore)
    }

    /// Replace the payload. `null` is normalised to an empty mapping.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = if data.is_null() { empty_data() } else { data };
        self
    }

    /// True when the status is `ok`.
    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }

    /// True when the status is `fail`.
    pub fn is_failure(&self) -> bool {
        self.status == ResultStatus::Fail
    }

    /// True when the status is `ignore`.
    pub fn is_ignore(&self) -> bool {
        self.status == ResultStatus::Ignore
    }

    /// True when the status is `timeout`.
    pub fn is_timeout(&self) -> bool {
        self.status == ResultStatus::Timeout
    }
}

impl std::fmt::Display for ServiceResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{}", self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_empty() {
        let result = ServiceResult::ok();
        assert!(result.is_ok());
        assert_eq!(result.error_code, "");
        assert_eq!(result.message, "");
        assert_eq!(result.data, json!({}));
    }

    #[test]
    fn test_serialize_omits_empty_fields() {
        let value = serde_json::to_value(ServiceResult::ok()).unwrap();
        assert_eq!(value, json!({"status": "ok"}));

        let value = serde_json::to_value(ServiceResult::fail("bad", "broken")).unwrap();
        assert_eq!(
            value,
            json!({"status": "fail", "error_code": "bad", "message": "broken"})
        );
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let result: ServiceResult = serde_json::from_str(r#"{"status": "timeout"}"#).unwrap();
        assert!(result.is_timeout());
        assert_eq!(result.data, json!({}));

        let result: ServiceResult =
            serde_json::from_str(r#"{"status": "ok", "data": {"buses": []}}"#).unwrap();
        assert_eq!(result.data["buses"], json!([]));
    }

    #[test]
    fn test_null_data_normalised() {
        let result = ServiceResult::ok_with(Value::Null);
        assert_eq!(result.data, json!({}));
    }

    #[test]
    fn test_sys_error() {
        let result = ServiceResult::sys_error("boom");
        assert!(result.is_failure());
        assert_eq!(result.error_code, SYS_ERROR);
        assert_eq!(result.message, "boom");
    }

    #[test]
    fn test_unknown_status_rejected() {
        let parsed = serde_json::from_str::<ServiceResult>(r#"{"status": "maybe"}"#);
        assert!(parsed.is_err());
    }
}
