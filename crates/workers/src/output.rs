//! Forwarding of worker stdout/stderr for observability.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lines of stderr kept for startup diagnostics.
const STDERR_TAIL_LINES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every line a worker writes.
pub trait WorkerOutputSink: Send + Sync {
    fn line(&self, worker: &str, stream: OutputStream, line: &str);
}

/// Default sink: one `tracing` event per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl WorkerOutputSink for TracingSink {
    fn line(&self, worker: &str, stream: OutputStream, line: &str) {
        info!(target: "roundtable::worker", worker = %worker, stream = %stream, line = %line, "worker output");
    }
}

/// Bounded tail of recent stderr lines.
#[derive(Debug, Clone, Default)]
pub(crate) struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line.to_string());
        }
    }

    pub(crate) fn snapshot(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// Spawn a background task that forwards `reader`'s lines to `sink` until EOF or cancellation.
///
/// Invalid UTF-8 is replaced rather than treated as an error, so the pipe stays
/// drained for as long as the worker writes to it.
pub(crate) fn spawn_output_drain<R>(
    worker: String,
    stream: OutputStream,
    reader: R,
    sink: Arc<dyn WorkerOutputSink>,
    tail: Option<StderrTail>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let decoded = String::from_utf8_lossy(&buf);
                        let line = decoded.trim_end_matches(['\n', '\r']);
                        if let Some(tail) = &tail {
                            tail.push(line);
                        }
                        sink.line(&worker, stream, line);
                    }
                    Err(error) => {
                        debug!(worker = %worker, stream = %stream, %error, "stopped reading worker output");
                        break;
                    }
                },
            }
        }
    })
}
