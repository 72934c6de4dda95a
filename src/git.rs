//! Version-control probe.
//!
//! Shells out to `git` for the branch, last commit, origin remote, and
//! working-tree state of a checkout. Every invocation carries a fixed
//! 10-second timeout. A checkout without a `.git` marker, a missing `git`
//! binary, or any failed command yields `None`: absent VCS metadata is not
//! an error.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::GitInfo;

const GIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Collect [`GitInfo`] for a repository root, or `None` if it has none.
pub async fn probe(repo_path: &Path) -> Option<GitInfo> {
    if !repo_path.join(".git").exists() {
        return None;
    }
    match read_git_info(repo_path).await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(repo = %repo_path.display(), error = %e, "skipping git metadata");
            None
        }
    }
}

async fn read_git_info(repo_path: &Path) -> Result<GitInfo> {
    let branch = run_git(repo_path, &["branch", "--show-current"]).await?;

    let log = run_git(repo_path, &["log", "-1", "--format=%H|%cI"]).await?;
    let (commit, date) = log
        .split_once('|')
        .ok_or_else(|| Error::Git(format!("unexpected log output: {}", log)))?;
    let last_commit_date = DateTime::parse_from_rfc3339(date.trim())
        .map_err(|e| Error::Git(format!("bad commit date '{}': {}", date, e)))?
        .with_timezone(&Utc);

    let remote_url = match run_git(repo_path, &["remote", "get-url", "origin"]).await {
        Ok(url) if !url.is_empty() => Some(url),
        Ok(_) => None,
        Err(e) => {
            debug!(repo = %repo_path.display(), error = %e, "no origin remote");
            None
        }
    };

    let status = run_git(repo_path, &["status", "--porcelain"]).await?;

    Ok(GitInfo {
        branch: if branch.is_empty() {
            "HEAD".to_string()
        } else {
            branch
        },
        last_commit: commit.to_string(),
        last_commit_date,
        remote_url,
        is_dirty: !status.is_empty(),
    })
}

/// Run one git subcommand and return its trimmed stdout.
async fn run_git(repo_path: &Path, args: &[&str]) -> Result<String> {
    let child = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(GIT_TIMEOUT, child)
        .await
        .map_err(|_| Error::Git(format!("git {} timed out", args.join(" "))))?
        .map_err(|e| Error::Git(format!("failed to execute git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_without_marker_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(probe(tmp.path()).await.is_none());
    }
}
