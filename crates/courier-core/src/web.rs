// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP listener for bus receive hooks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A running web server.
pub struct WebServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl WebServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the server to exit.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            error!(error = %e, "Web server task failed");
        }
        info!(addr = %self.local_addr, "Web server stopped");
    }
}

/// Bind `addr` and serve `routes` plus `GET /health` in the background.
pub async fn spawn_web_server(addr: SocketAddr, routes: Router) -> std::io::Result<WebServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let app = routes.route("/health", get(|| async { "ok" }));

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.notified().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Web server failed");
        }
    });

    info!(addr = %local_addr, "Web server listening");
    Ok(WebServerHandle {
        local_addr,
        shutdown,
        task,
    })
}
