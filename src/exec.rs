//! One-shot exec endpoint: runs a single command to completion with bounded
//! stdout/stderr capture and a hard timeout, returning a JSON envelope.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::config::Config;
use crate::pty;

/// Per-stream output cap. Beyond this, output is truncated with a trailer
/// and further reads are discarded.
const MAX_OUTPUT_SIZE: usize = 40960;
const TRUNCATION_TRAILER: &str = "...<More contents were truncated>";
const HARD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    #[serde(default)]
    pub context: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub context: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub output1: String,
    pub output2: String,
    pub error: String,
}

/// Run `request.command` with `request.arguments` as a child under the
/// configured uid/gid, capturing stdout/stderr up to `MAX_OUTPUT_SIZE` bytes
/// each, bounded by `HARD_TIMEOUT`.
///
/// Deliberately waits for only ONE of the two output pumps to finish before
/// cancelling the child, rather than both — this bounds total wall time to
/// the earlier of (command exit, one-stream drain, 60s). Matching this
/// ordering exactly is required for behavioral compatibility with existing
/// callers.
pub async fn run(config: &Config, request: ExecRequest) -> ExecResponse {
    let (uid, gid) = pty::resolve_user(config.run_as_user.as_deref());

    let mut cmd = Command::new(&request.command);
    cmd.args(&request.arguments);
    cmd.uid(uid);
    cmd.gid(gid);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecResponse {
                context: request.context,
                command: request.command,
                arguments: request.arguments,
                output1: String::new(),
                output2: String::new(),
                error: e.to_string(),
            };
        }
    };

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let mut stdout_task = tokio::spawn(capture_bounded(stdout, "stdout", request.command.clone()));
    let mut stderr_task = tokio::spawn(capture_bounded(stderr, "stderr", request.command.clone()));

    let body = async {
        tokio::select! {
            result = &mut stdout_task => {
                let output1 = result.unwrap_or_default();
                let _ = child.start_kill();
                let output2 = stderr_task.await.unwrap_or_default();
                (output1, output2)
            }
            result = &mut stderr_task => {
                let output2 = result.unwrap_or_default();
                let _ = child.start_kill();
                let output1 = stdout_task.await.unwrap_or_default();
                (output1, output2)
            }
        }
    };

    match timeout(HARD_TIMEOUT, body).await {
        Ok((output1, output2)) => {
            let error = match child.wait().await {
                Ok(status) if status.success() => String::new(),
                Ok(status) => format!("command exited with {status}"),
                Err(e) => e.to_string(),
            };
            ExecResponse {
                context: request.context,
                command: request.command,
                arguments: request.arguments,
                output1,
                output2,
                error,
            }
        }
        Err(_) => {
            warn!(command = %request.command, "exec: hard timeout reached, killing child");
            let _ = child.kill().await;
            ExecResponse {
                context: request.context,
                command: request.command,
                arguments: request.arguments,
                output1: String::new(),
                output2: String::new(),
                error: "command timed out after 60s".to_string(),
            }
        }
    }
}

/// Read a stream up to `MAX_OUTPUT_SIZE` bytes, appending a truncation
/// trailer if the cap is hit or an error trailer on a non-EOF read error.
async fn capture_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    stream_name: &str,
    command: String,
) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if buf.len() >= MAX_OUTPUT_SIZE {
            buf.truncate(MAX_OUTPUT_SIZE);
            buf.extend_from_slice(TRUNCATION_TRAILER.as_bytes());
            break;
        }
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                buf.extend_from_slice(
                    format!(
                        "...<Error occurred while reading {stream_name} for command {command:?}: {e}>"
                    )
                    .as_bytes(),
                );
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_command_captures_stdout() {
        let config = Config::default();
        let request = ExecRequest {
            context: "ctx".to_string(),
            command: "echo".to_string(),
            arguments: vec!["hello".to_string()],
        };
        let response = run(&config, request).await;
        assert_eq!(response.output1.trim(), "hello");
        assert_eq!(response.error, "");
    }

    #[tokio::test]
    async fn nonexistent_command_reports_spawn_error() {
        let config = Config::default();
        let request = ExecRequest {
            context: String::new(),
            command: "definitely-not-a-real-binary-xyz".to_string(),
            arguments: vec![],
        };
        let response = run(&config, request).await;
        assert!(!response.error.is_empty());
    }

    #[tokio::test]
    async fn capture_bounded_truncates_past_cap() {
        let data = std::io::Cursor::new(vec![b'x'; MAX_OUTPUT_SIZE + 100]);
        let captured = capture_bounded(data, "stdout", "test".to_string()).await;
        assert!(captured.ends_with(TRUNCATION_TRAILER));
        assert_eq!(captured.len(), MAX_OUTPUT_SIZE + TRUNCATION_TRAILER.len());
    }

    #[tokio::test]
    async fn capture_bounded_returns_short_output_untouched() {
        let data = std::io::Cursor::new(b"hi there".to_vec());
        let captured = capture_bounded(data, "stdout", "test".to_string()).await;
        assert_eq!(captured, "hi there");
    }
}
