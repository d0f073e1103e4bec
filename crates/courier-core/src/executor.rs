// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded service executor.
//!
//! Batches are spawned as tokio tasks and gated by a semaphore, so at most
//! `workers` batches run at once regardless of how many are queued. Finished
//! batches push their responses into an unbounded channel that the runner
//! drains without waiting.
//!
//! A batch fails as a whole: if the service returns an error or panics,
//! every request in it gets a `sys_error` result. A service that returns the
//! wrong number of results breaks its contract and the batch produces no
//! responses at all.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::message::{ServiceRequestMessage, ServiceResponseMessage, now_millis};
use crate::meta::LocalServiceMeta;
use crate::result::ServiceResult;

/// Executor errors.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The executor no longer accepts work.
    #[error("Executor is closed")]
    Closed,

    /// A service returned a different number of results than requests.
    #[error("Service {service} returned {actual} results for {expected} requests")]
    ResultCountMismatch {
        /// Service name.
        service: String,
        /// Number of requests in the batch.
        expected: usize,
        /// Number of results returned.
        actual: usize,
    },
}

/// Runs service batches with bounded concurrency and buffers their responses.
pub struct ServiceExecutor {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    responses_tx: mpsc::UnboundedSender<ServiceResponseMessage>,
    responses_rx: Mutex<mpsc::UnboundedReceiver<ServiceResponseMessage>>,
    closed: AtomicBool,
}

impl ServiceExecutor {
    /// Create an executor running at most `workers` batches at once.
    pub fn new(workers: usize) -> Self {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            responses_tx,
            responses_rx: Mutex::new(responses_rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Submit a batch for `service`. Returns as soon as the batch is queued.
    pub async fn execute(
        &self,
        service: LocalServiceMeta,
        requests: Vec<ServiceRequestMessage>,
    ) -> Result<(), ExecutorError> {
        if self.is_closed() {
            return Err(ExecutorError::Closed);
        }

        let permits = self.permits.clone();
        let tx = self.responses_tx.clone();
        let mut tasks = self.tasks.lock().await;

        // Reap finished batches so the set only holds live ones.
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "Service batch task failed");
            }
        }

        debug!(service = %service.name(), count = requests.len(), "Submitting service batch");
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = process(&service, &requests, &tx).await {
                error!(error = %e, "Service contract violation, batch dropped");
            }
        });
        Ok(())
    }

    /// Take every response completed since the last call, without waiting.
    pub async fn get_response(&self) -> Vec<ServiceResponseMessage> {
        let mut rx = self.responses_rx.lock().await;
        let mut responses = Vec::new();
        while let Ok(response) = rx.try_recv() {
            responses.push(response);
        }
        responses
    }

    /// Stop accepting work and wait for in-flight batches to finish.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        let pending = tasks.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight service batches");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Service batch task failed");
            }
        }
        info!("Service executor closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Run one batch and push its responses.
async fn process(
    service: &LocalServiceMeta,
    requests: &[ServiceRequestMessage],
    tx: &mpsc::UnboundedSender<ServiceResponseMessage>,
) -> Result<usize, ExecutorError> {
    let name = service.name();
    let outcome = AssertUnwindSafe(service.service().call(requests))
        .catch_unwind()
        .await;

    let results = match outcome {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            error!(service = %name, count = requests.len(), error = %e, "Service batch failed");
            let message = e.to_string();
            requests
                .iter()
                .map(|_| ServiceResult::sys_error(message.clone()))
                .collect()
        }
        Err(_) => {
            error!(service = %name, count = requests.len(), "Service batch panicked");
            requests
                .iter()
                .map(|_| ServiceResult::sys_error("service panicked"))
                .collect()
        }
    };

    if results.len() != requests.len() {
        return Err(ExecutorError::ResultCountMismatch {
            service: name.to_string(),
            expected: requests.len(),
            actual: results.len(),
        });
    }

    let now = now_millis();
    let mut produced = 0;
    for (request, result) in requests.iter().zip(results) {
        if request.ignore_result() {
            continue;
        }
        // The receiver is gone only once the executor itself is dropped.
        if tx
            .send(ServiceResponseMessage::from_result(now, request, result))
            .is_ok()
        {
            produced += 1;
        }
    }
    debug!(service = %name, produced, "Service batch completed");
    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ServiceMeta;
    use crate::result::{ResultStatus, SYS_ERROR};
    use crate::service::{Service, ServiceError, service_fn};
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn local(name: &str, service: Arc<dyn Service>) -> LocalServiceMeta {
        LocalServiceMeta::new(ServiceMeta::new(name, "in", json!({})), service)
    }

    fn request(receiver: &str, x: i64) -> ServiceRequestMessage {
        ServiceRequestMessage::new("activity", receiver, 0, 1, "d", "run", json!({"x": x}))
    }

    fn echo() -> Arc<dyn Service> {
        Arc::new(service_fn(|requests: Vec<ServiceRequestMessage>| async move {
            Ok::<_, ServiceError>(
                requests
                    .iter()
                    .map(|r| ServiceResult::ok_with(json!({"v": r.arg("x").cloned().unwrap_or(Value::Null)})))
                    .collect(),
            )
        }))
    }

    async fn drain_until(executor: &ServiceExecutor, expected: usize) -> Vec<ServiceResponseMessage> {
        let mut all = Vec::new();
        for _ in 0..100 {
            all.extend(executor.get_response().await);
            if all.len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        all
    }

    #[tokio::test]
    async fn test_echo_batch_produces_response() {
        let executor = ServiceExecutor::new(2);
        executor
            .execute(local("echo", echo()), vec![request("echo", 5)])
            .await
            .unwrap();
        executor.close().await;

        let responses = executor.get_response().await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), ResultStatus::Ok);
        assert_eq!(responses[0].result().data, json!({"v": 5}));
        assert_eq!(responses[0].receiver(), "activity");
        assert_eq!(responses[0].sender(), "echo");
    }

    #[tokio::test]
    async fn test_service_error_fails_whole_batch() {
        let failing: Arc<dyn Service> = Arc::new(service_fn(|_: Vec<ServiceRequestMessage>| async {
            Err::<Vec<ServiceResult>, _>(ServiceError::Other("boom".into()))
        }));
        let executor = ServiceExecutor::new(2);
        executor
            .execute(
                local("bad", failing),
                vec![request("bad", 1), request("bad", 2), request("bad", 3)],
            )
            .await
            .unwrap();

        let responses = drain_until(&executor, 3).await;
        assert_eq!(responses.len(), 3);
        for response in &responses {
            assert_eq!(response.status(), ResultStatus::Fail);
            assert_eq!(response.result().error_code, SYS_ERROR);
        }
    }

    #[tokio::test]
    async fn test_ignore_result_produces_nothing() {
        let executor = ServiceExecutor::new(1);
        executor
            .execute(
                local("echo", echo()),
                vec![
                    request("echo", 1).with_ignore_result(true),
                    request("echo", 2),
                ],
            )
            .await
            .unwrap();
        executor.close().await;

        let responses = executor.get_response().await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result().data, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_result_count_mismatch_drops_batch() {
        let short: Arc<dyn Service> = Arc::new(service_fn(|_: Vec<ServiceRequestMessage>| async {
            Ok::<_, ServiceError>(vec![ServiceResult::ok()])
        }));
        let executor = ServiceExecutor::new(1);
        executor
            .execute(local("short", short), vec![request("short", 1), request("short", 2)])
            .await
            .unwrap();
        executor.close().await;

        assert!(executor.get_response().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_executor_rejects_work() {
        let executor = ServiceExecutor::new(1);
        executor.close().await;
        let err = executor
            .execute(local("echo", echo()), vec![request("echo", 1)])
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::Closed);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let slow: Arc<dyn Service> = {
            let running = running.clone();
            let peak = peak.clone();
            Arc::new(service_fn(move |requests: Vec<ServiceRequestMessage>| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ServiceError>(requests.iter().map(|_| ServiceResult::ok()).collect())
                }
            }))
        };

        let executor = ServiceExecutor::new(2);
        for i in 0..6 {
            executor
                .execute(local("slow", slow.clone()), vec![request("slow", i)])
                .await
                .unwrap();
        }
        executor.close().await;

        assert_eq!(executor.get_response().await.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
