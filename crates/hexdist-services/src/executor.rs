//! Subprocess task executor.
//!
//! Pipes each task, as JSON, to the stdin of an external engine adapter and
//! reads one JSON value from its stdout. A non-zero exit fails the task with
//! the adapter's stderr.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use hexdist_core::task::WorkerTask;

use crate::peer_client::TaskExecutor;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, task: WorkerTask) -> Result<serde_json::Value, String> {
        let input = serde_json::to_vec(&task).map_err(|e| e.to_string())?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn '{}': {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| format!("failed to write task to '{}': {}", self.program, e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("failed to wait for '{}': {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(if stderr.is_empty() {
                format!("'{}' exited with {}", self.program, output.status)
            } else {
                stderr.to_string()
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("'{}' printed invalid JSON: {}", self.program, e))
    }
}
