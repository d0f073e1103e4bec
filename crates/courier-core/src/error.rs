// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for courier-core.

use thiserror::Error;

/// Lookup failures in the bus, service and factory registries.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum RegistryError {
    /// No message bus with this name is known.
    #[error("Unknown message bus: {0}")]
    UnknownMessageBus(String),

    /// No service meta with this name is known.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// The service is not hosted by this process.
    #[error("Unknown local service: {0}")]
    UnknownLocalService(String),

    /// No service factory is registered under this key.
    #[error("Unknown service factory: {0}")]
    UnknownServiceFactory(String),

    /// This process cannot drive buses of this class.
    #[error("Unknown message bus class: {0}")]
    UnknownBusClass(String),

    /// A second, different input bus was registered.
    #[error("Input message bus already registered as {0}")]
    InputBusConflict(String),
}

/// Container errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A message envelope could not be decoded.
    #[error("Message error: {0}")]
    Message(#[from] crate::message::MessageError),

    /// Upstream engine API call failed.
    #[error("Upstream API error: {0}")]
    Api(#[from] crate::api::ApiError),

    /// Message bus transport failed.
    #[error("Message bus error: {0}")]
    Bus(#[from] crate::bus::BusError),

    /// Service initialisation or execution failed.
    #[error("Service error: {0}")]
    Service(#[from] crate::service::ServiceError),

    /// Executor rejected or lost a batch.
    #[error("Executor error: {0}")]
    Executor(#[from] crate::executor::ExecutorError),

    /// Registry lookup failed.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type using the container Error.
pub type Result<T> = std::result::Result<T, Error>;
