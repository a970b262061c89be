//! OpenCode Loop: a concurrent Rust application that supervises an OpenCode
//! agent across repeated iterations until it signals completion.
//!
//! This crate provides the core functionality for running the agent as a
//! subprocess, watching both of its output streams for the completion
//! sentinel, enforcing wall-clock and idle timeouts, budgeting the prompt
//! against a token ceiling, and checkpointing the workspace between
//! iterations.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod loop_controller;
pub mod process;
pub mod prompt;
pub mod pump;
pub mod resolver;
pub mod supervisor;
pub mod token_estimator;
pub mod usage;
pub mod watchdog;

pub use checkpoint::{Checkpoint, GitCheckpoint};
pub use config::{Config, TokenBudget};
pub use error::{LoopError, Result};
pub use loop_controller::{LoopController, LoopResult};
pub use prompt::{PromptBudgeter, PromptPackage};
pub use supervisor::{IterationOutcome, IterationRequest, ProcessSupervisor, Supervisor};
pub use token_estimator::TokenEstimator;
pub use usage::UsageProbe;
