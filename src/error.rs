use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the opencode-loop application
#[derive(Error, Debug)]
pub enum LoopError {
    /// The agent command could not be resolved on PATH
    #[error(
        "agent command '{0}' not found on PATH: install OpenCode or pass \
         --agent-cmd with the full path to the executable"
    )]
    AgentCommandNotFound(String),

    /// Failed to spawn the agent subprocess
    #[error("failed to spawn agent process: {0}")]
    ProcessSpawnError(#[source] std::io::Error),

    /// Error communicating with the agent subprocess
    #[error("process I/O error: {0}")]
    ProcessIoError(#[source] std::io::Error),

    /// Error reading or parsing configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Error reading the prompt template file
    #[error(
        "failed to read prompt file '{path}': {source}. Create it or pass \
         --prompt-file with the template location"
    )]
    PromptFileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error reading the tech-stack file referenced by the prompt template
    #[error(
        "failed to read tech-stack file '{path}': {source}. Create it or pass \
         --tech-stack-file with its location"
    )]
    TechStackFileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No tokenizer backend could be initialized
    #[error(
        "tokenizer backend unavailable for encoding '{0}': prompt sizing \
         cannot be bounded, refusing to start"
    )]
    TokenizerUnavailable(String),

    /// The agent reported a usage error (invoked with bad arguments)
    #[error(
        "agent reported a usage error (missing message argument): the loop \
         is misconfigured, check the extra agent arguments"
    )]
    AgentUsageError,
}

/// Result type alias for loop operations
pub type Result<T> = std::result::Result<T, LoopError>;
