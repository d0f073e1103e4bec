// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The service runner control loop.
//!
//! Each iteration:
//!
//! 1. refreshes the bus and service registries from the engine;
//! 2. unless `only_refresh` is set, delivers the responses the executor has
//!    completed, grouped per target bus, then reads up to
//!    `fetch_requests_num` requests from the input bus and submits one batch
//!    per receiving service;
//! 3. sleeps for `sleep_ms`.
//!
//! A failing step ends the iteration early; the loop itself keeps going.
//! Response writes share a `response_workers` permit pool and are bounded
//! by `send_response_timeout_ms` as a whole. Writes still pending at the
//! deadline are aborted and their responses are lost, not re-buffered. A
//! failed write loses its group the same way; delivery never keeps the
//! iteration from reaching request intake.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{MessageBus, MessageBusManager};
use crate::config::RunnerConfig;
use crate::error::Result;
use crate::executor::ServiceExecutor;
use crate::message::{Message, ServiceRequestMessage};
use crate::meta::ServiceMetaManager;

/// Outcome of one response delivery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Responses written to their bus.
    pub delivered: usize,
    /// Responses lost to an unresolvable route, a failed write or the
    /// delivery timeout.
    pub dropped: usize,
    /// Of `dropped`, responses whose bus write returned an error.
    pub failed: usize,
}

/// Drives fetch, dispatch and delivery.
pub struct ServiceRunner {
    config: RunnerConfig,
    buses: Arc<MessageBusManager>,
    metas: Arc<ServiceMetaManager>,
    executor: Arc<ServiceExecutor>,
    delivery_permits: Arc<Semaphore>,
    closed: AtomicBool,
    shutdown: Arc<Notify>,
}

impl ServiceRunner {
    /// Create a runner.
    pub fn new(
        config: RunnerConfig,
        buses: Arc<MessageBusManager>,
        metas: Arc<ServiceMetaManager>,
        executor: Arc<ServiceExecutor>,
    ) -> Self {
        let delivery_permits = Arc::new(Semaphore::new(config.response_workers.max(1)));
        Self {
            config,
            buses,
            metas,
            executor,
            delivery_permits,
            closed: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Ask the loop to stop after the current iteration.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run until closed.
    ///
    /// On exit the executor is closed, in-flight batches are awaited, and
    /// one last delivery pass ships what they produced.
    pub async fn run(&self) {
        info!(
            sleep_ms = self.config.sleep_ms,
            fetch_requests_num = self.config.fetch_requests_num,
            only_refresh = self.config.only_refresh,
            "Service runner started"
        );

        while !self.is_closed() {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Service runner iteration failed");
            }

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    debug!("Service runner woken for shutdown");
                }

                _ = tokio::time::sleep(self.config.sleep_interval()) => {}
            }
        }

        self.executor.close().await;
        if !self.config.only_refresh {
            let report = self.handle_responses().await;
            if report.delivered > 0 || report.dropped > 0 {
                info!(
                    delivered = report.delivered,
                    dropped = report.dropped,
                    failed = report.failed,
                    "Final response delivery"
                );
            }
        }

        info!("Service runner stopped");
    }

    /// One iteration without the trailing sleep.
    pub async fn run_once(&self) -> Result<()> {
        self.buses.refresh_all().await?;
        self.metas.refresh_all().await?;

        if self.config.only_refresh {
            return Ok(());
        }

        let report = self.handle_responses().await;
        if report.dropped > 0 {
            warn!(
                delivered = report.delivered,
                dropped = report.dropped,
                failed = report.failed,
                "Responses dropped during delivery"
            );
        }
        self.handle_requests().await?;
        Ok(())
    }

    /// Deliver every response the executor has completed.
    ///
    /// Responses are grouped by receiver, routed through the receiver's
    /// service meta to a bus, and written once per bus. A receiver that
    /// cannot be routed loses its responses and a bus whose write fails
    /// loses its group; the other groups still go out. Writes still pending
    /// at the delivery timeout are aborted. None of these stop the caller
    /// from moving on to request intake.
    pub async fn handle_responses(&self) -> DeliveryReport {
        let responses = self.executor.get_response().await;
        if responses.is_empty() {
            return DeliveryReport::default();
        }

        let mut by_receiver: HashMap<String, Vec<Message>> = HashMap::new();
        for response in responses {
            by_receiver
                .entry(response.receiver().to_string())
                .or_default()
                .push(response.into());
        }

        let mut report = DeliveryReport::default();
        let mut by_bus: HashMap<String, (Arc<dyn MessageBus>, Vec<Message>)> = HashMap::new();
        for (receiver, messages) in by_receiver {
            let bus = match self.route(&receiver).await {
                Ok(bus) => bus,
                Err(e) => {
                    error!(receiver = %receiver, count = messages.len(), error = %e, "Cannot route responses, dropped");
                    report.dropped += messages.len();
                    continue;
                }
            };
            by_bus
                .entry(bus.name().to_string())
                .or_insert_with(|| (bus, Vec::new()))
                .1
                .extend(messages);
        }

        let total: usize = by_bus.values().map(|(_, m)| m.len()).sum();
        let mut writes = JoinSet::new();
        for (_, (bus, messages)) in by_bus {
            let permits = self.delivery_permits.clone();
            writes.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = bus.write(&messages).await;
                (bus.name().to_string(), messages.len(), outcome)
            });
        }

        let mut delivered = 0;
        let mut failed = 0;
        let outcome = tokio::time::timeout(self.config.send_response_timeout(), async {
            while let Some(joined) = writes.join_next().await {
                match joined {
                    Ok((bus, count, Ok(()))) => {
                        debug!(bus = %bus, count, "Delivered responses");
                        delivered += count;
                    }
                    Ok((bus, count, Err(e))) => {
                        error!(bus = %bus, count, error = %e, "Response delivery failed, dropped");
                        failed += count;
                    }
                    Err(e) => warn!(error = %e, "Response delivery task failed"),
                }
            }
        })
        .await;

        if outcome.is_err() {
            writes.abort_all();
            warn!(
                timeout_ms = self.config.send_response_timeout_ms,
                delivered,
                "Response delivery timed out, pending responses dropped"
            );
        }

        report.delivered += delivered;
        report.failed += failed;
        report.dropped += total - delivered;
        report
    }

    async fn route(&self, receiver: &str) -> Result<Arc<dyn MessageBus>> {
        let meta = self.metas.get_service_meta(receiver).await?;
        Ok(self.buses.get_message_bus(&meta.message_bus).await?)
    }

    /// Fetch requests from the input bus and submit them per service.
    ///
    /// Returns the number of requests submitted.
    pub async fn handle_requests(&self) -> Result<usize> {
        let Some(input) = self.buses.input_message_bus().await else {
            return Ok(0);
        };

        let messages = input.read(self.config.fetch_requests_num).await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<ServiceRequestMessage>> = HashMap::new();
        for message in messages {
            let kind = message.kind().to_string();
            let Some(request) = message.into_request() else {
                warn!(bus = %input.name(), kind = %kind, "Skipping non-request message");
                continue;
            };
            let receiver = request.receiver().to_string();
            if !groups.contains_key(&receiver) {
                order.push(receiver.clone());
            }
            groups.entry(receiver).or_default().push(request);
        }

        let mut submitted = 0;
        for receiver in order {
            let Some(requests) = groups.remove(&receiver) else {
                continue;
            };
            let service = match self.metas.get_local_service_meta(&receiver).await {
                Ok(service) => service,
                Err(e) => {
                    error!(service = %receiver, count = requests.len(), error = %e, "Requests for unknown local service dropped");
                    continue;
                }
            };
            let count = requests.len();
            self.executor.execute(service, requests).await?;
            submitted += count;
        }

        if submitted > 0 {
            debug!(count = submitted, "Submitted requests");
        }
        Ok(submitted)
    }
}
