// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upstream engine API.
//!
//! The engine is the authority on which message buses and services exist.
//! The container registers its own input bus and local services there, and
//! periodically pulls the full lists back.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | register bus | `POST /v1/message_bus/register {config}` |
//! | open bus | `POST /v1/message_bus/open {name}` |
//! | list buses | `GET /v1/message_bus/all` |
//! | register service | `POST /v1/service_meta/register {name, message_bus, config}` |
//! | list services | `GET /v1/service_meta/all` |

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::meta::ServiceMeta;

pub use http::HttpUpstreamApi;
pub use mock::MockUpstreamApi;

/// Error code the engine returns when opening a bus that is already open.
pub const ALREADY_OPENED: &str = "already_opened";

/// Errors from upstream API calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The HTTP exchange itself failed.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine answered with a non-`ok` status.
    #[error("upstream rejected {operation}: {status} [{error_code}] {message}")]
    Rejected {
        /// Operation that was rejected.
        operation: &'static str,
        /// Returned status.
        status: String,
        /// Returned error code.
        error_code: String,
        /// Returned message.
        message: String,
    },

    /// The reply could not be decoded.
    #[error("invalid upstream reply for {operation}: {reason}")]
    Decode {
        /// Operation whose reply was invalid.
        operation: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// The configured base URL cannot be joined with an endpoint path.
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Error code of a rejection, if this is one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { error_code, .. } => Some(error_code),
            _ => None,
        }
    }
}

/// A message bus as listed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusDescriptor {
    /// Unique bus name.
    pub name: String,
    /// Implementation class identifier.
    pub class: String,
    /// Bus process reachable.
    #[serde(default)]
    pub alive: bool,
    /// Bus accepting traffic.
    #[serde(default)]
    pub opened: bool,
    /// Bus usable.
    #[serde(default)]
    pub available: bool,
    /// Implementation-specific configuration.
    #[serde(default)]
    pub config: Value,
}

/// Client for the upstream engine API.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Register a message bus described by `config`.
    async fn register_message_bus(&self, config: &Value) -> Result<(), ApiError>;

    /// Open a registered message bus.
    async fn open_message_bus(&self, name: &str) -> Result<(), ApiError>;

    /// Fetch every known message bus.
    async fn all_message_buses(&self) -> Result<Vec<BusDescriptor>, ApiError>;

    /// Register a service.
    async fn register_service_meta(&self, meta: &ServiceMeta) -> Result<(), ApiError>;

    /// Fetch every known service.
    async fn all_service_metas(&self) -> Result<Vec<ServiceMeta>, ApiError>;
}
