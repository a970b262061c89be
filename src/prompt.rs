//! Prompt construction under a token budget.
//!
//! Every iteration gets the base prompt plus a fixed enforcement suffix
//! telling the agent to persist its progress before continuing. When the
//! previous session burned past the progress threshold, an additional
//! usage notice asks the agent to wrap up and emit the completion sentinel.

use std::path::Path;

use tracing::warn;

use crate::config::TokenBudget;
use crate::error::{LoopError, Result};
use crate::token_estimator::TokenEstimator;

/// Instructions appended to every prompt. Durable progress notes are how
/// work survives the process restart between iterations, so this text is
/// never dropped except in the degraded path where it alone exceeds the
/// ceiling.
const ENFORCEMENT_TEXT: &str = "\n\n<enforcement>\n\
    Before doing anything else, read PROGRESS.md if it exists and continue \
    from where it leaves off. Record every finding, decision and completed \
    step in PROGRESS.md as you go; assume this session can be terminated at \
    any moment and a fresh session must be able to resume from that file \
    alone. When the whole task is finished, write the final state to \
    PROGRESS.md and output <done>COMPLETE</done>.\n\
    </enforcement>\n";

/// Extra notice when the previous session's token usage crossed the
/// progress threshold.
const USAGE_NOTICE: &str = "\n<usage-notice>\n\
    Token usage is running high. Persist all findings to PROGRESS.md \
    immediately, then output <done>COMPLETE</done> and stop.\n\
    </usage-notice>\n";

/// A prompt built for one iteration
#[derive(Debug, Clone)]
pub struct PromptPackage {
    /// Final prompt text, guaranteed under the budget ceiling
    pub text: String,
    /// Token count of `text`
    pub token_count: usize,
    /// The budgeter asked the agent to wrap up; stop after this iteration
    pub stop_after_this_iteration: bool,
}

/// Builds token-budgeted prompts with session-usage feedback
pub struct PromptBudgeter<'a> {
    estimator: &'a TokenEstimator,
}

impl<'a> PromptBudgeter<'a> {
    pub fn new(estimator: &'a TokenEstimator) -> Self {
        Self { estimator }
    }

    /// Combine the base prompt with the enforcement suffix (and usage notice
    /// when warranted), keeping the result under `budget.ceiling_tokens`.
    pub fn build(
        &self,
        base_prompt: &str,
        last_session_tokens: Option<u64>,
        budget: &TokenBudget,
    ) -> PromptPackage {
        let over_threshold = last_session_tokens
            .is_some_and(|used| used >= budget.progress_threshold_tokens);

        let mut suffix = String::from(ENFORCEMENT_TEXT);
        if over_threshold {
            suffix.push_str(USAGE_NOTICE);
        }

        let ceiling = budget.ceiling_tokens;
        let suffix_tokens = self.estimator.count(&suffix);

        let mut text = if suffix_tokens > ceiling {
            // Degraded path: even the fixed suffix does not fit. Drop the
            // base prompt entirely and cut the suffix to the ceiling.
            warn!(
                suffix_tokens,
                ceiling, "enforcement text exceeds the token ceiling, truncating it"
            );
            self.estimator.truncate(&suffix, ceiling)
        } else {
            let available = ceiling - suffix_tokens;
            let base_tokens = self.estimator.count(base_prompt);
            let base = if base_tokens > available {
                warn!(
                    base_tokens,
                    available, "base prompt exceeds the remaining budget, truncating it"
                );
                self.estimator.truncate(base_prompt, available)
            } else {
                base_prompt.to_string()
            };
            format!("{base}{suffix}")
        };

        // Recount the concatenation; BPE merges at the seam can shift the
        // total, and the ceiling invariant is on the final text.
        let mut token_count = self.estimator.count(&text);
        if token_count > ceiling {
            text = self.estimator.truncate(&text, ceiling);
            token_count = self.estimator.count(&text);
        }
        PromptPackage {
            text,
            token_count,
            stop_after_this_iteration: over_threshold,
        }
    }
}

/// Load the base prompt: read the template file and splice the tech-stack
/// file's contents into its `{tech_stack}` placeholder.
pub fn load_base_prompt(prompt_file: &Path, tech_stack_file: &Path) -> Result<String> {
    let tech_stack =
        std::fs::read_to_string(tech_stack_file).map_err(|e| LoopError::TechStackFileError {
            path: tech_stack_file.to_path_buf(),
            source: e,
        })?;
    let template =
        std::fs::read_to_string(prompt_file).map_err(|e| LoopError::PromptFileError {
            path: prompt_file.to_path_buf(),
            source: e,
        })?;
    Ok(template.replace("{tech_stack}", &tech_stack))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> TokenEstimator {
        TokenEstimator::new("cl100k_base").unwrap()
    }

    fn budget(ceiling: usize, threshold: u64) -> TokenBudget {
        TokenBudget {
            ceiling_tokens: ceiling,
            progress_threshold_tokens: threshold,
        }
    }

    #[test]
    fn test_built_prompt_never_exceeds_ceiling() {
        let estimator = estimator();
        let budgeter = PromptBudgeter::new(&estimator);
        for ceiling in [5, 50, 500, 5_000] {
            for prompt_len in [0, 100, 10_000] {
                let base = "lorem ipsum ".repeat(prompt_len);
                let package = budgeter.build(&base, None, &budget(ceiling, 150_000));
                assert!(
                    package.token_count <= ceiling,
                    "ceiling {} violated: {}",
                    ceiling,
                    package.token_count
                );
            }
        }
    }

    #[test]
    fn test_enforcement_text_always_present() {
        let estimator = estimator();
        let budgeter = PromptBudgeter::new(&estimator);
        let package = budgeter.build("do the thing", None, &budget(50_000, 150_000));
        assert!(package.text.contains("PROGRESS.md"));
        assert!(package.text.ends_with(ENFORCEMENT_TEXT));
        assert!(!package.stop_after_this_iteration);
    }

    #[test]
    fn test_usage_notice_over_threshold() {
        let estimator = estimator();
        let budgeter = PromptBudgeter::new(&estimator);
        let package = budgeter.build("do the thing", Some(150_000), &budget(50_000, 150_000));
        assert!(package.text.contains("<usage-notice>"));
        assert!(package.stop_after_this_iteration);
    }

    #[test]
    fn test_no_notice_under_threshold() {
        let estimator = estimator();
        let budgeter = PromptBudgeter::new(&estimator);
        let package = budgeter.build("do the thing", Some(149_999), &budget(50_000, 150_000));
        assert!(!package.text.contains("<usage-notice>"));
        assert!(!package.stop_after_this_iteration);
    }

    #[test]
    fn test_base_prompt_truncated_before_suffix() {
        let estimator = estimator();
        let budgeter = PromptBudgeter::new(&estimator);
        let suffix_tokens = estimator.count(ENFORCEMENT_TEXT);
        let ceiling = suffix_tokens + 20;
        let base = "alpha beta gamma ".repeat(200);
        let package = budgeter.build(&base, None, &budget(ceiling, 150_000));
        // The suffix survives intact; only the base prompt was cut.
        assert!(package.text.ends_with(ENFORCEMENT_TEXT));
        assert!(package.token_count <= ceiling);
    }

    #[test]
    fn test_degraded_path_truncates_suffix() {
        let estimator = estimator();
        let budgeter = PromptBudgeter::new(&estimator);
        let package = budgeter.build("base", None, &budget(5, 150_000));
        assert!(package.token_count <= 5);
        // The base prompt is dropped entirely in the degraded path.
        assert!(!package.text.starts_with("base"));
    }

    #[test]
    fn test_load_base_prompt_substitutes_tech_stack() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("PROMPT.md");
        let stack_path = dir.path().join("TECH_STACK.md");
        std::fs::write(&prompt_path, "Build it with:\n{tech_stack}\nThanks.").unwrap();
        std::fs::write(&stack_path, "Rust + tokio").unwrap();
        let prompt = load_base_prompt(&prompt_path, &stack_path).unwrap();
        assert_eq!(prompt, "Build it with:\nRust + tokio\nThanks.");
    }

    #[test]
    fn test_load_base_prompt_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("PROMPT.md");
        std::fs::write(&prompt_path, "{tech_stack}").unwrap();
        let err = load_base_prompt(&prompt_path, &dir.path().join("missing.md")).unwrap_err();
        assert!(matches!(err, LoopError::TechStackFileError { .. }));
    }
}
