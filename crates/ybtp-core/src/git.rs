//! Git operations used to build a reproducible checkout.

use std::path::Path;

use crate::error::{ReleaseError, Result};
use crate::exec::{CommandRunner, CommandSpec};

fn git<I, S>(dir: &Path, args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new("git", args).in_dir(dir)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Capture the HEAD commit SHA of the repository at `repo_dir`.
pub async fn head_sha(runner: &dyn CommandRunner, repo_dir: &Path) -> Result<String> {
    let output = runner
        .run_checked(&git(repo_dir, ["rev-parse", "HEAD"]))
        .await?;
    let sha = output.stdout.trim().to_string();
    if sha.is_empty() {
        return Err(ReleaseError::CommandFailed {
            command: "git rev-parse HEAD".to_string(),
            exit_code: 0,
            stderr: "empty output".to_string(),
        });
    }
    Ok(sha)
}

/// URL of the `origin` remote, or `None` when it is not configured.
pub async fn origin_url(runner: &dyn CommandRunner, repo_dir: &Path) -> Result<Option<String>> {
    let output = runner
        .run(&git(repo_dir, ["config", "--get", "remote.origin.url"]))
        .await?;
    let url = output.stdout.trim();
    if !output.success() || url.is_empty() {
        return Ok(None);
    }
    Ok(Some(url.to_string()))
}

/// Clone the committed history of `src` into `dest`.
pub async fn clone_local(runner: &dyn CommandRunner, src: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().unwrap_or(dest);
    runner
        .run_checked(&git(parent, ["clone".to_string(), path_arg(src), path_arg(dest)]))
        .await?;
    Ok(())
}

/// Write uncommitted changes (staged and unstaged) of tracked files to
/// `patch` and return its size in bytes. Zero means a clean work tree.
///
/// Git writes the file itself so non-UTF-8 content survives byte for byte.
pub async fn write_uncommitted_diff(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    patch: &Path,
) -> Result<u64> {
    runner
        .run_checked(&git(
            repo_dir,
            [
                "diff".to_string(),
                "--binary".to_string(),
                format!("--output={}", path_arg(patch)),
                "HEAD".to_string(),
            ],
        ))
        .await?;
    Ok(std::fs::metadata(patch).map(|m| m.len()).unwrap_or(0))
}

/// Apply the patch file at `patch` to the work tree at `repo_dir`.
pub async fn apply_patch(runner: &dyn CommandRunner, repo_dir: &Path, patch: &Path) -> Result<()> {
    runner
        .run_checked(&git(
            repo_dir,
            ["apply".to_string(), "--whitespace=nowarn".to_string(), path_arg(patch)],
        ))
        .await?;
    Ok(())
}

/// Point the `origin` remote of `repo_dir` at `url`.
pub async fn set_origin_url(runner: &dyn CommandRunner, repo_dir: &Path, url: &str) -> Result<()> {
    runner
        .run_checked(&git(repo_dir, ["remote", "set-url", "origin", url]))
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::process::Command as StdCommand;

    pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A repository with one committed file and an `origin` remote.
    pub fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-q"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(dir.path().join("README.md"), "thirdparty\n").unwrap();
        run_git(dir.path(), &["add", "README.md"]);
        run_git(dir.path(), &["commit", "-q", "-m", "initial"]);
        run_git(
            dir.path(),
            &[
                "remote",
                "add",
                "origin",
                "https://github.com/yugabyte/yugabyte-db-thirdparty.git",
            ],
        );
        dir
    }
}
