//! MCP stdio transport
//!
//! Newline-delimited JSON over a worker's stdin/stdout. Each message is a
//! JSON object followed by a newline. The halves are boxed so the same
//! transport runs over in-memory pipes in tests.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::SessionError;
use crate::process::WorkerStdio;

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-delimited JSON transport
pub struct StdioTransport {
    name: String,
    writer: Mutex<Option<Writer>>,
    reader: Mutex<Reader>,
}

impl StdioTransport {
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let writer: Writer = Box::new(writer);
        Self {
            name: name.into(),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(BufReader::new(reader)),
        }
    }

    /// Transport over a supervised worker's pipes
    pub fn from_worker(name: impl Into<String>, stdio: WorkerStdio) -> Self {
        Self::new(name, stdio.stdout, stdio.stdin)
    }

    /// Send one JSON message followed by a newline
    pub async fn send(&self, message: &str) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SessionError::Disconnected(self.name.clone()))?;

        writer.write_all(message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        tracing::debug!(worker = %self.name, "Sent: {}", message);
        Ok(())
    }

    /// Receive the next JSON line. Non-JSON lines (worker chatter) are skipped,
    /// including lines that are not valid UTF-8.
    pub async fn receive(&self) -> Result<String, SessionError> {
        let mut reader = self.reader.lock().await;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let bytes = reader.read_until(b'\n', &mut buf).await?;

            if bytes == 0 {
                return Err(SessionError::Transport(format!(
                    "{} closed stdout",
                    self.name
                )));
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(_) => {
                    tracing::debug!(
                        worker = %self.name,
                        "Skipping non-UTF-8 line: {}",
                        String::from_utf8_lossy(&buf).trim()
                    );
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            if line.starts_with('{') {
                tracing::debug!(worker = %self.name, "Received: {}", line);
                return Ok(line.to_string());
            }

            tracing::debug!(worker = %self.name, "Skipping non-JSON line: {}", line);
        }
    }

    /// Close the write half. The peer sees EOF on its stdin. Safe to repeat.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(worker = %self.name, error = %e, "Error closing stdin");
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}
