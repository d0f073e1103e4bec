// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the built-in services.

use courier_core::ServiceResult;
use courier_core::bus::BusError;
use thiserror::Error;

/// Failures of the storage services, reported back as `fail` results.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The request named an action the service does not implement.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// The resource type is not one of the supported stores.
    #[error("Unknown {family} type: {kind}")]
    UnknownType {
        /// `text` or `table`.
        family: &'static str,
        /// The rejected type string.
        kind: String,
    },

    /// No resource of this type and name is registered.
    #[error("Could not find {kind} {name}")]
    NotFound {
        /// Resource type.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// `row_style` is neither `list` nor `map`.
    #[error("Invalid row style: {0}")]
    InvalidRowStyle(String),

    /// A column view named a column the table does not have.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// `to_messages` named a bus that is not registered.
    #[error("Could not find message bus: {0}")]
    BusNotFound(String),

    /// Required arguments are missing or malformed.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// File access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Writing to a message bus failed.
    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),
}

impl StoreError {
    /// Error code carried by the `fail` result.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::UnknownAction(_) => "unknown_action",
            StoreError::UnknownType { .. } => "unknown_type",
            StoreError::NotFound { .. } => "not_found",
            StoreError::InvalidRowStyle(_) => "invalid_row_style",
            StoreError::UnknownColumn(_) => "unknown_column",
            StoreError::BusNotFound(_) => "bus_not_found",
            StoreError::InvalidArgs(_) => "invalid_args",
            StoreError::Io(_) => "io_error",
            StoreError::Csv(_) => "csv_error",
            StoreError::Bus(_) => "bus_error",
        }
    }

    pub(crate) fn invalid_args(reason: impl Into<String>) -> Self {
        StoreError::InvalidArgs(reason.into())
    }
}

impl From<StoreError> for ServiceResult {
    fn from(e: StoreError) -> Self {
        ServiceResult::fail(e.error_code(), e.to_string())
    }
}

/// Result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
