// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! References to per-activity resources carried in request arguments.
//!
//! A reference is either an object `{"type", "name", "meta"?, "tmp"?}` or
//! the positional form `[type, name, meta?, tmp?]` that workflow `ref(...)`
//! expressions produce.

use courier_core::ServiceRequestMessage;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// A typed, named resource owned by one activity thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRef {
    /// Store type, e.g. `memory_table`.
    pub kind: String,
    /// Name, unique per activity thread and type.
    pub name: String,
    /// Store options such as `path`.
    pub meta: Map<String, Value>,
    /// Release when the activity thread ends.
    pub tmp: bool,
}

impl ResourceRef {
    /// Read the reference in `args[key]`. Keys of `args.meta` override
    /// those carried by the reference itself.
    pub fn from_request(request: &ServiceRequestMessage, key: &str) -> Result<Self> {
        let value = request
            .arg(key)
            .ok_or_else(|| StoreError::invalid_args(format!("missing '{}'", key)))?;
        let mut reference = Self::parse(value)
            .ok_or_else(|| StoreError::invalid_args(format!("'{}' is not a resource reference", key)))?;
        if let Some(Value::Object(meta)) = request.arg("meta") {
            reference
                .meta
                .extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(reference)
    }

    /// Parse either reference form.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Object(obj) => Some(Self {
                kind: obj.get("type")?.as_str()?.to_string(),
                name: obj.get("name")?.as_str()?.to_string(),
                meta: meta_of(obj.get("meta")),
                tmp: obj.get("tmp").and_then(Value::as_bool).unwrap_or(false),
            }),
            Value::Array(items) => Some(Self {
                kind: items.first()?.as_str()?.to_string(),
                name: items.get(1)?.as_str()?.to_string(),
                meta: meta_of(items.get(2)),
                tmp: items.get(3).and_then(Value::as_bool).unwrap_or(false),
            }),
            _ => None,
        }
    }

    /// String option from `meta`.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }
}

fn meta_of(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(meta)) => meta.clone(),
        _ => Map::new(),
    }
}

/// Registry key of a resource: `"<activity_id>:<domain_id>:<name>"`.
pub fn full_name(activity_id: i64, domain_id: &str, name: &str) -> String {
    format!("{}:{}:{}", activity_id, domain_id, name)
}
