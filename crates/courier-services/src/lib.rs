// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in services for the courier container.
//!
//! | Key | Service |
//! |-----|---------|
//! | `echo` | [`echo::EchoService`] |
//! | `system.exec_cmd` | [`system::ExecCmdService`] |
//! | `text` | [`text::TextService`] over `memory_text` / `file_text` |
//! | `table` | [`table::TableService`] over `memory_table` / `csv_table` |
//!
//! Storage services reply `fail` with a machine-readable code (see
//! [`error::StoreError::error_code`]) rather than raising, so workflows can
//! branch on it. Resources declared with `tmp` are traced and dropped when
//! their activity thread ends.

#![deny(missing_docs)]

pub mod echo;
pub mod error;
pub mod resource_ref;
pub mod system;
pub mod table;
pub mod text;

use std::sync::Arc;

use courier_core::bus::MessageBusManager;
use courier_core::resource::ResourceTracer;
use courier_core::service::ServiceFactoryRegistry;
use courier_core::{PerRequest, Service};
use tracing::info;

pub use error::StoreError;

/// Factory key of the echo service.
pub const ECHO: &str = "echo";
/// Factory key of the shell command service.
pub const EXEC_CMD: &str = "system.exec_cmd";
/// Factory key of the text service.
pub const TEXT: &str = "text";
/// Factory key of the table service.
pub const TABLE: &str = "table";

/// Register every built-in service and the release handlers of their
/// temporary resources.
///
/// `buses` is the registry `table.to_messages` writes through; pass the same
/// one to the runtime builder.
pub async fn register_builtin(
    registry: &mut ServiceFactoryRegistry,
    tracer: &Arc<ResourceTracer>,
    buses: Arc<MessageBusManager>,
) {
    let texts = Arc::new(text::TextRegistry::new());
    let tables = Arc::new(table::TableRegistry::new());
    text::register_release_handlers(&texts, tracer).await;
    table::register_release_handlers(&tables, tracer).await;

    let echo_service: Arc<dyn Service> = Arc::new(PerRequest::new(echo::EchoService));
    let exec_service: Arc<dyn Service> = Arc::new(PerRequest::new(system::ExecCmdService));
    let text_service: Arc<dyn Service> =
        Arc::new(PerRequest::new(text::TextService::new(texts, tracer.clone())));
    let table_service: Arc<dyn Service> = Arc::new(PerRequest::new(table::TableService::new(
        tables,
        tracer.clone(),
        buses,
    )));

    registry
        .register_instance(ECHO, echo_service)
        .register_instance(EXEC_CMD, exec_service)
        .register_instance(TEXT, text_service)
        .register_instance(TABLE, table_service);

    info!(services = ?[ECHO, EXEC_CMD, TEXT, TABLE], "Registered built-in services");
}
