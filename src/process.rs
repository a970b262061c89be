use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

use crate::error::{LoopError, Result};

/// Environment variable carrying the agent's JSON configuration.
const AGENT_CONFIG_ENV: &str = "OPENCODE_CONFIG_CONTENT";

/// Wrapper around one agent subprocess
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

impl AgentProcess {
    /// Spawn the agent for one iteration: `<path> run --prompt <text> <extra...>`.
    ///
    /// Stdin is closed so the agent can never block on operator input. The
    /// tool-override map, when present, is merged into the JSON config the
    /// agent reads from its environment; the merge is visible only to this
    /// child.
    pub fn spawn(
        agent_path: &str,
        prompt: &str,
        extra_args: &[String],
        tool_overrides: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Self> {
        let mut cmd = Command::new(agent_path);
        cmd.arg("run")
            .arg("--prompt")
            .arg(prompt)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(overrides) = tool_overrides {
            let merged = merged_agent_config(overrides);
            debug!("agent config override: {}", merged);
            cmd.env(AGENT_CONFIG_ENV, merged);
        }

        let mut child = cmd.spawn().map_err(LoopError::ProcessSpawnError)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(Self {
            child,
            stdout,
            stderr,
        })
    }

    /// Wait for the process to exit and return the exit status
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(LoopError::ProcessIoError)
    }

    /// Check if the process has exited
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        self.child.try_wait().map_err(LoopError::ProcessIoError)
    }

    /// Request graceful termination. On unix this is SIGTERM so the agent
    /// can flush its own state; elsewhere it falls through to a hard kill.
    pub async fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                return Ok(());
            }
        }
        self.kill().await
    }

    /// Force-kill the process
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(LoopError::ProcessIoError)
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Merge the tool-override map under the `tools` key of the JSON config the
/// agent already receives via its environment (an empty object when unset).
/// Persistent configuration on disk is never touched.
fn merged_agent_config(overrides: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut config: serde_json::Value = std::env::var(AGENT_CONFIG_ENV)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(|| serde_json::json!({}));

    if !config.is_object() {
        config = serde_json::json!({});
    }
    let obj = config.as_object_mut().expect("config is an object");
    let tools = obj
        .entry("tools")
        .or_insert_with(|| serde_json::json!({}));
    if let Some(tools) = tools.as_object_mut() {
        for (name, enabled) in overrides {
            tools.insert(name.clone(), enabled.clone());
        }
    } else {
        obj.insert(
            "tools".to_string(),
            serde_json::Value::Object(overrides.clone()),
        );
    }
    config.to_string()
}
