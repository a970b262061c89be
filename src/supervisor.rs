//! Single-iteration supervision: spawn the agent, pump its streams, run the
//! watchdog, and always come back with an outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::process::AgentProcess;
use crate::pump::spawn_pumps;
use crate::watchdog::WatchdogState;

/// How often the watchdog loop polls process and activity state.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long a terminated process gets to exit before it is force-killed.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Bounded wait for each pump at the end of an iteration.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to run one iteration
#[derive(Debug, Clone)]
pub struct IterationRequest {
    /// Zero-based iteration index
    pub index: u32,
    /// Fully built prompt text
    pub prompt: String,
    /// Extra arguments appended to the agent invocation
    pub extra_args: Vec<String>,
    /// Wall-clock limit for the whole iteration
    pub timeout: Option<Duration>,
    /// Idle interval after which a heartbeat notice is printed
    pub heartbeat: Option<Duration>,
}

/// What one iteration produced. Always constructed, even when the process
/// crashed or was force-terminated.
#[derive(Debug, Clone, Default)]
pub struct IterationOutcome {
    /// Exit code; None when the process died without one (signal, crash)
    pub exit_code: Option<i32>,
    /// The completion sentinel appeared on either stream
    pub sentinel_seen: bool,
    /// The usage-error sentinel appeared on either stream
    pub usage_sentinel_seen: bool,
    /// The iteration hit its wall-clock limit and was terminated
    pub timed_out: bool,
    /// Wall-clock duration of the iteration
    pub duration_secs: f64,
    /// Session token delta, filled in by the loop controller
    pub session_token_delta: Option<u64>,
}

/// Trait seam so the loop controller can be exercised with mocks
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Run one iteration to completion (or timeout) and report the outcome
    async fn run(&self, request: &IterationRequest) -> Result<IterationOutcome>;
}

/// Production supervisor that spawns the real agent process
pub struct ProcessSupervisor {
    agent_path: String,
    tool_overrides: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ProcessSupervisor {
    pub fn new(
        agent_path: String,
        tool_overrides: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self {
            agent_path,
            tool_overrides,
        }
    }

    /// Poll until the process exits or times out. Returns (exit status if
    /// already reaped, timed_out). Ordering per tick: exit, then timeout,
    /// then heartbeat; a tick that fires the timeout never also prints a
    /// heartbeat.
    async fn watch(
        &self,
        process: &mut AgentProcess,
        request: &IterationRequest,
        state: &WatchdogState,
        started: Instant,
    ) -> (Option<std::process::ExitStatus>, bool) {
        loop {
            match process.try_wait() {
                Ok(Some(status)) => return (Some(status), false),
                Ok(None) => {}
                Err(e) => {
                    // The iteration still gets an outcome; the process is
                    // simply unobservable from here on.
                    warn!("error polling agent process: {}", e);
                    return (None, false);
                }
            }

            if let Some(timeout) = request.timeout {
                if started.elapsed() >= timeout {
                    warn!(
                        iteration = request.index + 1,
                        "iteration exceeded {}s timeout, terminating agent",
                        timeout.as_secs()
                    );
                    return (None, true);
                }
            }

            if let Some(heartbeat) = request.heartbeat {
                // heartbeat_due resets the activity clock, so the notice
                // fires at most once per idle window.
                if state.heartbeat_due(heartbeat) {
                    info!(
                        iteration = request.index + 1,
                        "no output for {}s, agent still running (pid {:?})",
                        heartbeat.as_secs(),
                        process.id()
                    );
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// SIGTERM, wait out the grace period, SIGKILL if still alive. Always
    /// reaps a status when one becomes available.
    async fn terminate_with_grace(
        &self,
        process: &mut AgentProcess,
    ) -> Option<std::process::ExitStatus> {
        if let Err(e) = process.terminate().await {
            warn!("failed to signal agent process: {}", e);
        }
        let deadline = Instant::now() + TERMINATION_GRACE;
        while Instant::now() < deadline {
            match process.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                    warn!("error polling terminated agent: {}", e);
                    break;
                }
            }
        }
        debug!("grace period elapsed, force-killing agent");
        if let Err(e) = process.kill().await {
            warn!("failed to kill agent process: {}", e);
        }
        process.wait().await.ok()
    }

    /// Join a pump with a bounded wait; a pump that has not drained yet must
    /// not hold up the iteration.
    async fn join_pump(handle: JoinHandle<()>, name: &str) {
        if tokio::time::timeout(PUMP_JOIN_TIMEOUT, handle).await.is_err() {
            warn!("{} pump did not finish within join timeout", name);
        }
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn run(&self, request: &IterationRequest) -> Result<IterationOutcome> {
        let started = Instant::now();

        // Spawn failure is fatal: the command resolved at startup, so this
        // is misconfiguration, not something the next iteration can fix.
        let mut process = AgentProcess::spawn(
            &self.agent_path,
            &request.prompt,
            &request.extra_args,
            self.tool_overrides.as_ref(),
        )?;
        debug!(
            iteration = request.index + 1,
            pid = ?process.id(),
            "agent process spawned"
        );

        let state = Arc::new(WatchdogState::new());
        let stdout = process.stdout.take().expect("stdout was piped");
        let stderr = process.stderr.take().expect("stderr was piped");
        let (stdout_pump, stderr_pump) = spawn_pumps(stdout, stderr, Arc::clone(&state));

        let (status, timed_out) = self.watch(&mut process, request, &state, started).await;

        let status = if timed_out {
            self.terminate_with_grace(&mut process).await
        } else {
            status
        };

        Self::join_pump(stdout_pump, "stdout").await;
        Self::join_pump(stderr_pump, "stderr").await;

        let outcome = IterationOutcome {
            exit_code: status.and_then(|s| s.code()),
            sentinel_seen: state.completion_seen(),
            usage_sentinel_seen: state.usage_error_seen(),
            timed_out,
            duration_secs: started.elapsed().as_secs_f64(),
            session_token_delta: None,
        };
        debug!(iteration = request.index + 1, ?outcome, "iteration finished");
        Ok(outcome)
    }
}
