//! Line pumps for the agent's output streams.
//!
//! One pump per stream, running as its own task for the lifetime of one
//! agent invocation. Every line is scanned for the two sentinels, stamps
//! the watchdog, and is forwarded to the operator immediately so long
//! iterations stay observable.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::watchdog::WatchdogState;

/// Literal marker the agent emits when the task is complete.
pub const COMPLETION_SENTINEL: &str = "<done>COMPLETE</done>";

/// Literal marker the agent emits when invoked without a message argument.
/// Seeing it means the loop itself is misconfigured; retrying is pointless.
pub const USAGE_ERROR_SENTINEL: &str = "missing message argument";

/// Which of the agent's streams a pump is draining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Consumes one output stream line-by-line, detecting sentinels and
/// recording activity on the shared watchdog.
pub struct StreamPump {
    kind: StreamKind,
    state: Arc<WatchdogState>,
}

impl StreamPump {
    pub fn new(kind: StreamKind, state: Arc<WatchdogState>) -> Self {
        Self { kind, state }
    }

    /// Drain the stream until EOF. Read errors end the pump; they are the
    /// stream closing under the process, not an iteration failure.
    pub async fn run<R>(&self, reader: R)
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("{:?} stream closed", self.kind);
                    break;
                }
                Ok(_) => self.handle_line(&line),
                Err(e) => {
                    warn!("{:?} read error: {}", self.kind, e);
                    break;
                }
            }
        }
    }

    fn handle_line(&self, line: &str) {
        if line.contains(COMPLETION_SENTINEL) {
            debug!("completion sentinel seen on {:?}", self.kind);
            self.state.mark_completion();
        }
        if line.contains(USAGE_ERROR_SENTINEL) {
            debug!("usage-error sentinel seen on {:?}", self.kind);
            self.state.mark_usage_error();
        }
        self.state.touch();
        // Forward unbuffered so the operator sees agent output as it happens.
        let trimmed = line.strip_suffix('\n').unwrap_or(line);
        match self.kind {
            StreamKind::Stdout => println!("{trimmed}"),
            StreamKind::Stderr => eprintln!("{trimmed}"),
        }
    }
}

/// Spawn pump tasks for stdout and stderr against a shared watchdog.
pub fn spawn_pumps(
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    state: Arc<WatchdogState>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let stdout_state = Arc::clone(&state);
    let stdout_handle = tokio::spawn(async move {
        StreamPump::new(StreamKind::Stdout, stdout_state)
            .run(stdout)
            .await;
    });

    let stderr_handle = tokio::spawn(async move {
        StreamPump::new(StreamKind::Stderr, state).run(stderr).await;
    });

    (stdout_handle, stderr_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pump_text(kind: StreamKind, text: &str) -> Arc<WatchdogState> {
        let state = Arc::new(WatchdogState::new());
        let pump = StreamPump::new(kind, Arc::clone(&state));
        pump.run(text.as_bytes()).await;
        state
    }

    #[tokio::test]
    async fn test_completion_sentinel_on_stdout() {
        let state = pump_text(
            StreamKind::Stdout,
            "working...\nall done <done>COMPLETE</done>\n",
        )
        .await;
        assert!(state.completion_seen());
        assert!(!state.usage_error_seen());
    }

    #[tokio::test]
    async fn test_completion_sentinel_on_stderr() {
        let state = pump_text(StreamKind::Stderr, "<done>COMPLETE</done>\n").await;
        assert!(state.completion_seen());
    }

    #[tokio::test]
    async fn test_usage_error_sentinel() {
        let state =
            pump_text(StreamKind::Stderr, "error: missing message argument\n").await;
        assert!(state.usage_error_seen());
        assert!(!state.completion_seen());
    }

    #[tokio::test]
    async fn test_plain_output_sets_no_flags() {
        let state = pump_text(StreamKind::Stdout, "line one\nline two\n").await;
        assert!(!state.completion_seen());
        assert!(!state.usage_error_seen());
    }

    #[tokio::test]
    async fn test_pump_exits_on_eof() {
        // run() returning at all is the assertion; an unclosed stream would
        // hang the test.
        pump_text(StreamKind::Stdout, "").await;
    }
}
