//! Workspace checkpointing between iterations.
//!
//! Both operations are best-effort: a broken git setup costs durability,
//! not the loop itself. Failures are logged and swallowed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Checkpoint collaborator consumed by the loop controller
#[async_trait]
pub trait Checkpoint: Send + Sync {
    /// Stage every change under the workspace root
    async fn stage_all(&self);
    /// Commit staged changes with the given message
    async fn commit(&self, message: &str);
}

/// Git-backed checkpointing of the workspace root
pub struct GitCheckpoint {
    root: PathBuf,
}

impl GitCheckpoint {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    async fn git(&self, args: &[&str]) -> Option<std::process::Output> {
        let result = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .await;
        match result {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("git {:?} failed to run: {}", args, e);
                None
            }
        }
    }

    /// Whether the index has anything to commit.
    async fn index_dirty(&self) -> bool {
        match self.git(&["diff", "--cached", "--quiet"]).await {
            // diff --cached --quiet exits 1 when there are staged changes
            Some(output) => !output.status.success(),
            None => false,
        }
    }
}

#[async_trait]
impl Checkpoint for GitCheckpoint {
    async fn stage_all(&self) {
        if let Some(output) = self.git(&["add", "-A"]).await {
            if !output.status.success() {
                warn!(
                    "git add failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
    }

    async fn commit(&self, message: &str) {
        if !self.index_dirty().await {
            debug!("nothing staged, skipping checkpoint commit");
            return;
        }
        if let Some(output) = self.git(&["commit", "-m", message]).await {
            if output.status.success() {
                debug!("checkpoint committed: {}", message);
            } else {
                warn!(
                    "git commit failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
    }
}
