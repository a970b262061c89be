//! Agent command resolution: PATH lookup returning an absolute path, with a
//! Windows `where` fallback for script shims the PATH search misses.

use std::path::PathBuf;

use crate::error::{LoopError, Result};

/// Resolve the configured agent command to an absolute path, or fail with
/// a remediation hint. Resolution happens once at startup so spawn failures
/// later in the loop can be treated as real faults.
pub fn resolve_agent_command(cmd: &str) -> Result<PathBuf> {
    // Explicit paths bypass the PATH search.
    let as_path = PathBuf::from(cmd);
    if as_path.components().count() > 1 && as_path.is_file() {
        return Ok(as_path);
    }

    if let Ok(path) = which::which(cmd) {
        return Ok(path);
    }

    #[cfg(windows)]
    if let Some(path) = resolve_via_where(cmd) {
        return Ok(path);
    }

    Err(LoopError::AgentCommandNotFound(cmd.to_string()))
}

/// `where` understands App Execution Aliases and PATHEXT shims that a plain
/// PATH walk can miss.
#[cfg(windows)]
fn resolve_via_where(cmd: &str) -> Option<PathBuf> {
    let output = std::process::Command::new("where").arg(cmd).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_command_errors_with_hint() {
        let err = resolve_agent_command("definitely-not-a-real-command-xyz").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("--agent-cmd"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolves_sh_from_path() {
        let path = resolve_agent_command("sh").unwrap();
        assert!(path.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_explicit_path_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("agent");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        let resolved = resolve_agent_command(&script.to_string_lossy()).unwrap();
        assert_eq!(resolved, script);
    }
}
