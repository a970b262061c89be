use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard upper bound on the prompt token ceiling; overrides are clamped to it.
pub const MAX_CEILING_TOKENS: usize = 50_000;

/// Token budget for prompt construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Maximum tokens a built prompt may contain (clamped to MAX_CEILING_TOKENS)
    #[serde(default = "default_ceiling_tokens")]
    pub ceiling_tokens: usize,
    /// Session token usage at which the loop asks the agent to wrap up
    #[serde(default = "default_progress_threshold")]
    pub progress_threshold_tokens: u64,
}

fn default_ceiling_tokens() -> usize {
    MAX_CEILING_TOKENS
}

fn default_progress_threshold() -> u64 {
    150_000
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            ceiling_tokens: default_ceiling_tokens(),
            progress_threshold_tokens: default_progress_threshold(),
        }
    }
}

/// Main configuration for the opencode-loop application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Prompt template file ({tech_stack} is substituted at load time)
    #[serde(default = "default_prompt_file")]
    pub prompt_file: PathBuf,
    /// Tech-stack description file spliced into the prompt template
    #[serde(default = "default_tech_stack_file")]
    pub tech_stack_file: PathBuf,
    /// Maximum number of iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Agent command name or path (resolved on PATH at startup)
    #[serde(default = "default_agent_cmd")]
    pub agent_cmd: String,
    /// Extra arguments appended after the built-in `run --prompt <text>`
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Per-iteration wall-clock timeout in seconds (0/unset = unbounded)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Idle interval in seconds before a heartbeat notice (0/unset = disabled)
    #[serde(default)]
    pub heartbeat_secs: Option<u64>,
    /// Token budget for prompt construction
    #[serde(default)]
    pub budget: TokenBudget,
    /// Encoding or model hint for the token estimator
    #[serde(default = "default_token_encoding")]
    pub token_encoding: String,
    /// Usage-reporting command (unset = usage tracking disabled)
    #[serde(default)]
    pub usage_cmd: Option<String>,
    /// Project identifier passed to the usage-reporting command
    #[serde(default)]
    pub usage_project: Option<String>,
    /// Tool enable/disable overrides merged into the agent's env-provided
    /// configuration for this run only
    #[serde(default)]
    pub tool_overrides: Option<serde_json::Map<String, serde_json::Value>>,
    /// Print resolved command path and effective settings before the first iteration
    #[serde(default)]
    pub diagnostics: bool,
}

fn default_prompt_file() -> PathBuf {
    PathBuf::from("PROMPT.md")
}

fn default_tech_stack_file() -> PathBuf {
    PathBuf::from("TECH_STACK.md")
}

fn default_max_iterations() -> u32 {
    50
}

fn default_agent_cmd() -> String {
    "opencode".to_string()
}

fn default_token_encoding() -> String {
    "cl100k_base".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt_file: default_prompt_file(),
            tech_stack_file: default_tech_stack_file(),
            max_iterations: default_max_iterations(),
            agent_cmd: default_agent_cmd(),
            agent_args: Vec::new(),
            timeout_secs: None,
            heartbeat_secs: None,
            budget: TokenBudget::default(),
            token_encoding: default_token_encoding(),
            usage_cmd: None,
            usage_project: None,
            tool_overrides: None,
            diagnostics: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::LoopError::ConfigError(e.to_string()))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::LoopError::ConfigError(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Merge CLI arguments into this configuration.
    /// CLI arguments take precedence over config file values.
    #[allow(clippy::too_many_arguments)]
    pub fn merge_cli_args(
        &mut self,
        prompt_file: Option<PathBuf>,
        tech_stack_file: Option<PathBuf>,
        max_iterations: Option<u32>,
        agent_cmd: Option<String>,
        agent_args: Vec<String>,
        timeout_secs: Option<u64>,
        heartbeat_secs: Option<u64>,
        token_ceiling: Option<usize>,
        progress_threshold: Option<u64>,
        token_encoding: Option<String>,
        usage_cmd: Option<String>,
        usage_project: Option<String>,
        diagnostics: bool,
    ) {
        if let Some(pf) = prompt_file {
            self.prompt_file = pf;
        }
        if let Some(ts) = tech_stack_file {
            self.tech_stack_file = ts;
        }
        if let Some(m) = max_iterations {
            self.max_iterations = m;
        }
        if let Some(cmd) = agent_cmd {
            self.agent_cmd = cmd;
        }
        if !agent_args.is_empty() {
            self.agent_args = agent_args;
        }
        if timeout_secs.is_some() {
            self.timeout_secs = timeout_secs;
        }
        if heartbeat_secs.is_some() {
            self.heartbeat_secs = heartbeat_secs;
        }
        if let Some(c) = token_ceiling {
            self.budget.ceiling_tokens = c;
        }
        if let Some(t) = progress_threshold {
            self.budget.progress_threshold_tokens = t;
        }
        if let Some(enc) = token_encoding {
            self.token_encoding = enc;
        }
        if usage_cmd.is_some() {
            self.usage_cmd = usage_cmd;
        }
        if usage_project.is_some() {
            self.usage_project = usage_project;
        }
        if diagnostics {
            self.diagnostics = true;
        }
        self.normalize();
    }

    /// Clamp and canonicalize values after any layer of loading.
    fn normalize(&mut self) {
        self.budget.ceiling_tokens = self.budget.ceiling_tokens.min(MAX_CEILING_TOKENS);
        // 0 means "disabled" for both intervals
        if self.timeout_secs == Some(0) {
            self.timeout_secs = None;
        }
        if self.heartbeat_secs == Some(0) {
            self.heartbeat_secs = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_clamped_to_hard_max() {
        let mut config = Config::default();
        config.merge_cli_args(
            None,
            None,
            None,
            None,
            Vec::new(),
            None,
            None,
            Some(1_000_000),
            None,
            None,
            None,
            None,
            false,
        );
        assert_eq!(config.budget.ceiling_tokens, MAX_CEILING_TOKENS);
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let mut config = Config::default();
        config.merge_cli_args(
            None,
            None,
            None,
            None,
            Vec::new(),
            Some(0),
            Some(0),
            None,
            None,
            None,
            None,
            None,
            false,
        );
        assert_eq!(config.timeout_secs, None);
        assert_eq!(config.heartbeat_secs, None);
    }

    #[test]
    fn test_from_toml_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.agent_cmd, "opencode");
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.budget.ceiling_tokens, MAX_CEILING_TOKENS);
    }

    #[test]
    fn test_tool_overrides_parse() {
        let config: Config = toml::from_str(
            r#"
            [tool_overrides]
            webfetch = false
            bash = true
            "#,
        )
        .unwrap();
        let overrides = config.tool_overrides.unwrap();
        assert_eq!(overrides["webfetch"], serde_json::json!(false));
        assert_eq!(overrides["bash"], serde_json::json!(true));
    }
}
