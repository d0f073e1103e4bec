// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `system.exec_cmd` service: runs `args.cmd` through `sh -c`.
//!
//! Replies `ok` with `{exit_code}` when the command exits with status 0, and
//! `fail`/`cmd_failed` with the same data and the command's stderr as the
//! message otherwise.

use async_trait::async_trait;
use courier_core::{RequestHandler, ServiceError, ServiceRequestMessage, ServiceResult};
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, warn};

/// Error code of a command that exited unsuccessfully.
pub const CMD_FAILED: &str = "cmd_failed";

/// Shell command handler.
#[derive(Debug, Default)]
pub struct ExecCmdService;

#[async_trait]
impl RequestHandler for ExecCmdService {
    async fn handle(&self, request: &ServiceRequestMessage) -> Result<ServiceResult, ServiceError> {
        let Some(cmd) = request.arg("cmd").and_then(Value::as_str) else {
            return Ok(ServiceResult::fail("invalid_args", "'cmd' must be a string"));
        };

        debug!(activity_id = request.activity_id(), cmd, "Running command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .kill_on_drop(true)
            .output()
            .await?;

        // Killed by a signal: no exit code.
        let exit_code = output.status.code().unwrap_or(-1);
        let data = json!({ "exit_code": exit_code });
        if output.status.success() {
            return Ok(ServiceResult::ok_with(data));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(activity_id = request.activity_id(), cmd, exit_code, stderr = %stderr, "Command failed");
        let message = if stderr.is_empty() {
            format!("command exited with status {}", exit_code)
        } else {
            stderr
        };
        Ok(ServiceResult::fail(CMD_FAILED, message).with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(args: Value) -> ServiceRequestMessage {
        ServiceRequestMessage::new("activity", "system.exec_cmd", 0, 1, "d", "exec", args)
    }

    #[tokio::test]
    async fn test_exec_cmd_success() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let cmd = format!("touch '{}'", marker.display());

        let result = ExecCmdService.handle(&request(json!({ "cmd": cmd }))).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(result.data, json!({"exit_code": 0}));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_exec_cmd_failure() {
        let result = ExecCmdService
            .handle(&request(json!({"cmd": "echo boom >&2; exit 3"})))
            .await
            .unwrap();
        assert_eq!(result.error_code, CMD_FAILED);
        assert_eq!(result.message, "boom");
        assert_eq!(result.data, json!({"exit_code": 3}));
    }

    #[tokio::test]
    async fn test_exec_cmd_requires_cmd() {
        let result = ExecCmdService.handle(&request(json!({}))).await.unwrap();
        assert_eq!(result.error_code, "invalid_args");
    }
}
