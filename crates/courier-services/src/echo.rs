// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `echo` service: replies `ok` with the request arguments as data.

use async_trait::async_trait;
use courier_core::{RequestHandler, ServiceError, ServiceRequestMessage, ServiceResult};

/// Echo handler.
#[derive(Debug, Default)]
pub struct EchoService;

#[async_trait]
impl RequestHandler for EchoService {
    async fn handle(&self, request: &ServiceRequestMessage) -> Result<ServiceResult, ServiceError> {
        Ok(ServiceResult::ok_with(request.args().clone()))
    }
}
