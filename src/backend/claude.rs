//! `claude` CLI runner: spawns one subprocess per request.

use futures::StreamExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::AppConfig;

use super::{parser, BackendError, BackendResult, BackendRunner, FragmentStream, Prompt};

pub struct ClaudeCliRunner {
    bin: String,
    timeout: Duration,
}

impl ClaudeCliRunner {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            bin: config.claude_bin.clone(),
            timeout: config.request_timeout,
        }
    }

    /// Builds the CLI invocation; the prompt itself goes in over stdin.
    fn command(&self, prompt: &Prompt, streaming: bool) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-p");
        if streaming {
            // --verbose is required by the CLI for stream-json output
            cmd.args([
                "--verbose",
                "--output-format",
                "stream-json",
                "--include-partial-messages",
            ]);
        } else {
            cmd.args(["--output-format", "json"]);
        }
        cmd.arg("--dangerously-skip-permissions");
        if !prompt.system.is_empty() {
            cmd.args(["--system-prompt", &prompt.system]);
        }
        cmd.arg("-");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // client disconnects must not orphan the subprocess
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl BackendRunner for ClaudeCliRunner {
    async fn complete(&self, prompt: &Prompt) -> Result<BackendResult, BackendError> {
        let mut child = self
            .command(prompt, false)
            .spawn()
            .map_err(BackendError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.text.as_bytes()).await?;
            // dropping stdin closes the pipe and lets the CLI start
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = if stderr.trim().is_empty() {
                output.status.to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(BackendError::Process(msg));
        }

        parser::parse_result(&String::from_utf8_lossy(&output.stdout))
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream, BackendError> {
        let mut child = self
            .command(prompt, true)
            .spawn()
            .map_err(BackendError::Spawn)?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Process("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Process("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::channel::<Result<String, BackendError>>(64);
        let prompt_text = prompt.text.clone();

        tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(prompt_text.as_bytes()).await {
                    let _ = tx.send(Err(BackendError::Io(e))).await;
                    return;
                }
            }

            // Drain stderr concurrently so the child never blocks on a full pipe.
            let stderr_task = tokio::spawn(async move {
                let mut buf = String::new();
                let mut stderr = stderr;
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            });

            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(text) = parser::delta_text(&line) {
                            if tx.send(Ok(text)).await.is_err() {
                                // receiver dropped: client went away; kill_on_drop
                                // reaps the child when we return
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(BackendError::Io(e))).await;
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let stderr_out = stderr_task.await.unwrap_or_default();
                    let msg = if stderr_out.trim().is_empty() {
                        status.to_string()
                    } else {
                        stderr_out.trim().to_string()
                    };
                    let _ = tx.send(Err(BackendError::Process(msg))).await;
                }
                Err(e) => {
                    let _ = tx.send(Err(BackendError::Io(e))).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}
