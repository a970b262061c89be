use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::config::Config;
use crate::error::{LoopError, Result};
use crate::prompt::PromptBudgeter;
use crate::supervisor::{IterationRequest, Supervisor};
use crate::token_estimator::TokenEstimator;
use crate::usage::UsageProbe;

/// Session-usage sampling seam; implemented by [`UsageProbe`] in production
/// and by mocks in tests.
#[async_trait]
pub trait UsageSampler: Send + Sync {
    async fn sample(&self) -> Option<u64>;
}

#[async_trait]
impl UsageSampler for UsageProbe {
    async fn sample(&self) -> Option<u64> {
        UsageProbe::sample(self).await
    }
}

/// How the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopResult {
    /// The completion sentinel was seen
    Completed { iterations: u32 },
    /// The iteration cap was hit without a sentinel
    MaxIterationsReached { iterations: u32 },
    /// The budgeter asked the agent to wrap up; soft completion
    TokenLimitReached { iterations: u32 },
    /// The operator cancelled the run
    Interrupted { iterations: u32 },
}

/// Drives iterations until a terminal state, owning the budgeter, usage
/// probe, and checkpoint collaborator.
pub struct LoopController<S: Supervisor, C: Checkpoint> {
    config: Arc<Config>,
    supervisor: S,
    checkpoint: C,
    sampler: Option<Box<dyn UsageSampler>>,
    estimator: TokenEstimator,
    base_prompt: String,
}

impl<S: Supervisor, C: Checkpoint> LoopController<S, C> {
    pub fn new(
        config: Arc<Config>,
        supervisor: S,
        checkpoint: C,
        sampler: Option<Box<dyn UsageSampler>>,
        estimator: TokenEstimator,
        base_prompt: String,
    ) -> Self {
        Self {
            config,
            supervisor,
            checkpoint,
            sampler,
            estimator,
            base_prompt,
        }
    }

    async fn sample_usage(&self) -> Option<u64> {
        match &self.sampler {
            Some(sampler) => sampler.sample().await,
            None => None,
        }
    }

    async fn run_checkpoint(&self, message: &str) {
        self.checkpoint.stage_all().await;
        self.checkpoint.commit(message).await;
    }

    /// Run iterations until the sentinel appears, the cap is hit, the token
    /// budget forces a stop, or the shutdown channel fires. The current
    /// iteration's checkpoint is still attempted on interrupt.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<LoopResult> {
        let budgeter = PromptBudgeter::new(&self.estimator);
        let max_iterations = self.config.max_iterations;
        let mut last_session_delta: Option<u64> = None;

        for index in 0..max_iterations {
            let iteration = index + 1;
            let before = self.sample_usage().await;

            let package =
                budgeter.build(&self.base_prompt, last_session_delta, &self.config.budget);
            info!(
                iteration,
                prompt_tokens = package.token_count,
                last_session_tokens = ?last_session_delta,
                wrap_up = package.stop_after_this_iteration,
                "starting iteration"
            );

            let request = IterationRequest {
                index,
                prompt: package.text,
                extra_args: self.config.agent_args.clone(),
                timeout: self.config.timeout_secs.map(Duration::from_secs),
                heartbeat: self.config.heartbeat_secs.map(Duration::from_secs),
            };

            let mut outcome = tokio::select! {
                outcome = self.supervisor.run(&request) => outcome?,
                _ = shutdown.recv() => {
                    // Dropping the supervisor future tears down the agent
                    // process (kill_on_drop); the work already on disk still
                    // gets its checkpoint.
                    warn!(iteration, "interrupt received, stopping loop");
                    self.run_checkpoint(&format!("Loop interrupted at iteration {iteration}"))
                        .await;
                    return Ok(LoopResult::Interrupted { iterations: index });
                }
            };

            let after = self.sample_usage().await;
            outcome.session_token_delta = UsageProbe::delta(before, after);
            last_session_delta = outcome.session_token_delta;

            info!(
                iteration,
                exit_code = ?outcome.exit_code,
                sentinel = outcome.sentinel_seen,
                timed_out = outcome.timed_out,
                duration_secs = outcome.duration_secs,
                session_tokens = ?outcome.session_token_delta,
                "iteration finished"
            );
            if outcome.timed_out {
                warn!(iteration, "iteration timed out and was terminated");
            } else if let Some(code) = outcome.exit_code {
                if code != 0 {
                    warn!(iteration, code, "agent exited nonzero, continuing");
                }
            }

            self.run_checkpoint(&format!("Loop iteration {iteration}")).await;

            if outcome.sentinel_seen {
                info!(iteration, "completion sentinel seen");
                return Ok(LoopResult::Completed { iterations: iteration });
            }
            if outcome.usage_sentinel_seen {
                return Err(LoopError::AgentUsageError);
            }
            if package.stop_after_this_iteration {
                info!(iteration, "token limit reached, stopping loop");
                return Ok(LoopResult::TokenLimitReached { iterations: iteration });
            }
        }

        Ok(LoopResult::MaxIterationsReached {
            iterations: max_iterations,
        })
    }
}
