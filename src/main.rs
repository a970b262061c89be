use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use opencode_loop::checkpoint::GitCheckpoint;
use opencode_loop::config::Config;
use opencode_loop::error::{LoopError, Result};
use opencode_loop::loop_controller::{LoopController, LoopResult, UsageSampler};
use opencode_loop::prompt::load_base_prompt;
use opencode_loop::resolver::resolve_agent_command;
use opencode_loop::supervisor::ProcessSupervisor;
use opencode_loop::token_estimator::TokenEstimator;
use opencode_loop::usage::UsageProbe;

/// OpenCode Loop: run an OpenCode agent in a loop until it emits the
/// completion sentinel
#[derive(Parser, Debug)]
#[command(name = "opencode-loop")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Prompt template file ({tech_stack} is substituted)
    #[arg(short = 'f', long = "prompt-file")]
    prompt_file: Option<PathBuf>,

    /// Tech-stack description file spliced into the template
    #[arg(short = 't', long = "tech-stack-file")]
    tech_stack_file: Option<PathBuf>,

    /// Maximum number of iterations (default: 50)
    #[arg(short = 'm', long = "max-iterations")]
    max_iterations: Option<u32>,

    /// Agent command name or path (default: "opencode")
    #[arg(long = "agent-cmd")]
    agent_cmd: Option<String>,

    /// Extra argument appended to the agent invocation (repeatable)
    #[arg(long = "agent-arg")]
    agent_args: Vec<String>,

    /// Per-iteration timeout in seconds (0 = unbounded)
    #[arg(long = "timeout-secs")]
    timeout_secs: Option<u64>,

    /// Heartbeat interval in seconds when no output is seen (0 = disabled)
    #[arg(long = "heartbeat-secs")]
    heartbeat_secs: Option<u64>,

    /// Prompt token ceiling (clamped to 50000)
    #[arg(long = "token-ceiling")]
    token_ceiling: Option<usize>,

    /// Session token usage at which the loop asks the agent to wrap up
    #[arg(long = "progress-threshold")]
    progress_threshold: Option<u64>,

    /// Token encoding or model hint (default: cl100k_base)
    #[arg(long = "token-encoding")]
    token_encoding: Option<String>,

    /// Usage-reporting command (omit to disable usage tracking)
    #[arg(long = "usage-cmd")]
    usage_cmd: Option<String>,

    /// Project identifier for the usage-reporting command
    #[arg(long = "usage-project")]
    usage_project: Option<String>,

    /// Print resolved command path and effective settings at startup
    #[arg(long = "diagnostics")]
    diagnostics: bool,

    /// Config file (TOML format)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("opencode_loop=debug,info")
    } else {
        EnvFilter::new("opencode_loop=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(ref config_path) = cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    config.merge_cli_args(
        cli.prompt_file.clone(),
        cli.tech_stack_file.clone(),
        cli.max_iterations,
        cli.agent_cmd.clone(),
        cli.agent_args.clone(),
        cli.timeout_secs,
        cli.heartbeat_secs,
        cli.token_ceiling,
        cli.progress_threshold,
        cli.token_encoding.clone(),
        cli.usage_cmd.clone(),
        cli.usage_project.clone(),
        cli.diagnostics,
    );

    Ok(config)
}

fn print_diagnostics(config: &Config, agent_path: &std::path::Path) {
    println!("{}", "opencode-loop startup diagnostics".bold());
    println!("  agent command:      {}", agent_path.display());
    println!("  extra args:         {:?}", config.agent_args);
    println!("  prompt file:        {}", config.prompt_file.display());
    println!("  tech-stack file:    {}", config.tech_stack_file.display());
    println!("  max iterations:     {}", config.max_iterations);
    println!(
        "  timeout:            {}",
        config
            .timeout_secs
            .map_or("unbounded".to_string(), |s| format!("{s}s"))
    );
    println!(
        "  heartbeat:          {}",
        config
            .heartbeat_secs
            .map_or("disabled".to_string(), |s| format!("{s}s"))
    );
    println!("  token ceiling:      {}", config.budget.ceiling_tokens);
    println!(
        "  progress threshold: {}",
        config.budget.progress_threshold_tokens
    );
    println!("  token encoding:     {}", config.token_encoding);
    println!(
        "  usage tracking:     {}",
        config.usage_cmd.as_deref().unwrap_or("disabled")
    );
}

async fn run(config: Config, shutdown_rx: broadcast::Receiver<()>) -> Result<LoopResult> {
    // Everything here is category-fatal: unresolved command, missing
    // template files, or an unavailable tokenizer means the loop cannot
    // safely start.
    let agent_path = resolve_agent_command(&config.agent_cmd)?;
    let base_prompt = load_base_prompt(&config.prompt_file, &config.tech_stack_file)?;
    let estimator = TokenEstimator::new(&config.token_encoding)?;

    if config.diagnostics {
        print_diagnostics(&config, &agent_path);
    }

    info!(
        "starting loop: up to {} iteration(s), watching for {}",
        config.max_iterations,
        opencode_loop::pump::COMPLETION_SENTINEL.cyan()
    );

    let workspace_root = std::env::current_dir().map_err(LoopError::ProcessIoError)?;
    let supervisor = ProcessSupervisor::new(
        agent_path.to_string_lossy().into_owned(),
        config.tool_overrides.clone(),
    );
    let checkpoint = GitCheckpoint::new(&workspace_root);
    let sampler: Option<Box<dyn UsageSampler>> = config.usage_cmd.clone().map(|cmd| {
        Box::new(UsageProbe::new(cmd, config.usage_project.clone())) as Box<dyn UsageSampler>
    });

    let controller = LoopController::new(
        Arc::new(config),
        supervisor,
        checkpoint,
        sampler,
        estimator,
        base_prompt,
    );

    controller.run(shutdown_rx).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // Fan Ctrl+C out to the controller so the running iteration is torn
    // down and its checkpoint still happens.
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down...");
        let _ = shutdown_tx_clone.send(());
    });

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    match run(config, shutdown_rx).await {
        Ok(LoopResult::Completed { iterations }) => {
            println!(
                "\n{} Task complete after {} iteration(s)",
                "SUCCESS:".green().bold(),
                iterations
            );
            std::process::exit(0);
        }
        Ok(LoopResult::TokenLimitReached { iterations }) => {
            println!(
                "\n{} Token limit reached after {} iteration(s); progress is checkpointed",
                "STOPPED:".yellow().bold(),
                iterations
            );
            std::process::exit(1);
        }
        Ok(LoopResult::MaxIterationsReached { iterations }) => {
            println!(
                "\n{} Max iterations ({}) reached without completion sentinel",
                "FAILED:".red().bold(),
                iterations
            );
            std::process::exit(1);
        }
        Ok(LoopResult::Interrupted { iterations }) => {
            println!(
                "\n{} Interrupted after {} completed iteration(s)",
                "INTERRUPTED:".yellow().bold(),
                iterations
            );
            std::process::exit(130); // Standard exit code for Ctrl+C
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
