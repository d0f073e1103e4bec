// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Courier Core - Service Execution Container
//!
//! This crate hosts service handlers next to an external activity engine.
//! Requests arrive on an input message bus, are executed by local services
//! under bounded concurrency, and the responses are shipped back to the bus
//! of whichever service asked.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Activity Engine                                 │
//! │           (bus + service registry, emits service requests)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │ POST <input url>                     ▲ POST <output url>
//!        ▼                                      │
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        courier (This Crate)                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Input Bus  │─▶│   Service   │─▶│  Service    │─▶│  Response   │     │
//! │  │  (buffer)   │  │   Runner    │  │  Executor   │  │  Delivery   │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! │         ▲                │ refresh                                       │
//! │    receive hook          ▼                                               │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐                      │
//! │  │ Web Server  │  │ Bus / Meta  │  │  Resource   │◄── gc service        │
//! │  │   (axum)    │  │ Registries  │  │   Tracer    │                      │
//! │  └─────────────┘  └─────────────┘  └─────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`result`] | `ok` / `fail` / `ignore` / `timeout` outcomes |
//! | [`message`] | request and response envelopes |
//! | [`bus`] | message bus trait, HTTP and memory buses, bus registry |
//! | [`api`] | upstream engine API client |
//! | [`service`] | service trait, per-request adaptor, factory registry |
//! | [`meta`] | service meta registry |
//! | [`executor`] | bounded batch executor |
//! | [`runner`] | polling control loop |
//! | [`resource`] | resource tracer and the `gc` service |
//! | [`runtime`] | embeddable runtime with graceful shutdown |
//!
//! # Configuration
//!
//! See [`config::Config`]. The `courier` binary loads it from YAML and
//! applies `COURIER_*` environment overrides.

#![deny(missing_docs)]

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod executor;
pub mod message;
pub mod meta;
pub mod resource;
pub mod result;
pub mod runner;
pub mod runtime;
pub mod service;
pub mod web;

pub use error::{Error, Result};
pub use message::{Message, ServiceRequestMessage, ServiceResponseMessage};
pub use result::{ResultStatus, ServiceResult};
pub use service::{PerRequest, RequestHandler, Service, ServiceError};
