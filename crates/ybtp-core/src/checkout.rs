//! Reproducible checkout construction.
//!
//! The checkout is a fresh local clone of the repository with the working
//! tree's uncommitted edits applied on top, placed at
//! `<build root>/<archive dir name>`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{archive_file_name, checksum_file_name};
use crate::config::BuildContext;
use crate::error::{ReleaseError, Result};
use crate::exec::CommandRunner;
use crate::git;

/// Leading component of every archive and checkout directory name.
pub const ARCHIVE_PREFIX: &str = "yugabyte-db-thirdparty";

/// Number of commit-hash characters in a version tag.
pub const SHORT_SHA_LEN: usize = 10;

static LAST_ISSUED_SECS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current UTC time at second resolution, strictly later than any value
/// previously returned in this process.
pub fn next_release_timestamp() -> DateTime<Utc> {
    let now = Utc::now().timestamp();
    let mut prev = LAST_ISSUED_SECS.load(Ordering::SeqCst);
    loop {
        let candidate = if prev == i64::MIN { now } else { now.max(prev + 1) };
        match LAST_ISSUED_SECS.compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => return DateTime::from_timestamp(candidate, 0).unwrap_or_else(Utc::now),
            Err(actual) => prev = actual,
        }
    }
}

/// Version tag and directory name of one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseName {
    /// `v<YYYYMMDDHHMMSS>-<sha10>-<suffix>`
    pub version_tag: String,

    /// `yugabyte-db-thirdparty-<version tag>`
    pub archive_dir_name: String,
}

impl ReleaseName {
    pub fn new(timestamp: DateTime<Utc>, commit_sha: &str, suffix: &str) -> Self {
        let short_sha = commit_sha.get(..SHORT_SHA_LEN).unwrap_or(commit_sha);
        let version_tag = format!(
            "v{}-{}-{}",
            timestamp.format("%Y%m%d%H%M%S"),
            short_sha,
            suffix
        );
        let archive_dir_name = format!("{ARCHIVE_PREFIX}-{version_tag}");
        Self {
            version_tag,
            archive_dir_name,
        }
    }
}

/// A reproducible checkout ready for building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkout {
    /// `<build root>/<archive dir name>`
    pub dir: PathBuf,

    pub name: ReleaseName,

    /// Full commit hash the checkout was cloned at.
    pub commit_sha: String,

    /// Remote origin URL restored into the checkout.
    pub origin_url: String,
}

impl Checkout {
    pub fn version_tag(&self) -> &str {
        &self.name.version_tag
    }

    pub fn archive_dir_name(&self) -> &str {
        &self.name.archive_dir_name
    }

    /// Directory the archive is written into.
    pub fn parent_dir(&self) -> &Path {
        self.dir.parent().unwrap_or(&self.dir)
    }
}

/// Clone `repo_dir` into a fresh checkout under `build_root`.
pub async fn create_checkout(
    runner: &dyn CommandRunner,
    ctx: &BuildContext,
    repo_dir: &Path,
    build_root: &Path,
) -> Result<Checkout> {
    let commit_sha = git::head_sha(runner, repo_dir).await?;
    let name = ReleaseName::new(next_release_timestamp(), &commit_sha, ctx.effective_suffix());
    info!(
        version_tag = %name.version_tag,
        commit = %commit_sha,
        "Computed release name"
    );

    let origin_url = git::origin_url(runner, repo_dir)
        .await?
        .ok_or_else(|| ReleaseError::MissingOriginUrl(repo_dir.to_path_buf()))?;

    let dir = build_root.join(&name.archive_dir_name);
    if dir.exists() {
        return Err(ReleaseError::CheckoutExists(dir));
    }
    std::fs::create_dir_all(build_root)?;

    info!(src = %repo_dir.display(), dest = %dir.display(), "Cloning repository");
    git::clone_local(runner, repo_dir, &dir).await?;

    let patch = tempfile::Builder::new()
        .prefix("ybtp-local-changes-")
        .suffix(".patch")
        .tempfile()?;
    let bytes = git::write_uncommitted_diff(runner, repo_dir, patch.path()).await?;
    if bytes == 0 {
        info!("No uncommitted local changes to carry over");
    } else {
        info!(bytes, "Applying uncommitted local changes to checkout");
        git::apply_patch(runner, &dir, patch.path()).await?;
    }

    git::set_origin_url(runner, &dir, &origin_url).await?;

    Ok(Checkout {
        dir,
        name,
        commit_sha,
        origin_url,
    })
}

/// Remove a checkout directory and the archive and checksum next to it.
///
/// Never invoked by the pipeline itself. Returns the paths that existed and
/// were removed.
pub fn cleanup_partial_state(checkout_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    let sibling = |name: String| checkout_dir.parent().map(|p| p.join(name));
    let dir_name = checkout_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let archive = sibling(archive_file_name(&dir_name));
    let checksum = sibling(checksum_file_name(&dir_name));

    if checkout_dir.is_dir() {
        std::fs::remove_dir_all(checkout_dir)?;
        removed.push(checkout_dir.to_path_buf());
    }
    for path in [archive, checksum].into_iter().flatten() {
        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed.push(path);
        }
    }

    if removed.is_empty() {
        warn!(dir = %checkout_dir.display(), "Nothing to clean up");
    } else {
        for path in &removed {
            info!(path = %path.display(), "Removed");
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, OsFamily};
    use crate::exec::ProcessRunner;
    use crate::git::testing::{make_git_repo, run_git};
    use chrono::TimeZone;

    fn ctx(suffix: Option<&str>) -> BuildContext {
        let overrides = ConfigOverrides {
            archive_name_suffix: suffix.map(str::to_string),
            ..Default::default()
        };
        BuildContext::resolve(&overrides, OsFamily::Linux)
    }

    #[test]
    fn test_release_name_format() {
        let ts = Utc.with_ymd_and_hms(2020, 10, 17, 18, 9, 58).unwrap();
        let name = ReleaseName::new(ts, "0123456789abcdef0123456789abcdef01234567", "linux");
        assert_eq!(name.version_tag, "v20201017180958-0123456789-linux");
        assert_eq!(
            name.archive_dir_name,
            "yugabyte-db-thirdparty-v20201017180958-0123456789-linux"
        );
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let first = next_release_timestamp();
        let second = next_release_timestamp();
        assert!(second > first);

        let sha = "0123456789abcdef0123456789abcdef01234567";
        let a = ReleaseName::new(first, sha, "linux");
        let b = ReleaseName::new(second, sha, "linux");
        assert_ne!(a.version_tag, b.version_tag);
    }

    #[tokio::test]
    async fn test_create_checkout_carries_local_edits() {
        let repo = make_git_repo();
        std::fs::write(repo.path().join("README.md"), "thirdparty\nlocal edit\n").unwrap();
        let build_root = tempfile::tempdir().unwrap();

        let checkout = create_checkout(&ProcessRunner, &ctx(None), repo.path(), build_root.path())
            .await
            .unwrap();

        assert!(checkout.dir.starts_with(build_root.path()));
        assert!(checkout.version_tag().ends_with("-linux"));
        assert_eq!(
            checkout.dir.file_name().unwrap().to_string_lossy(),
            checkout.archive_dir_name()
        );
        let readme = std::fs::read_to_string(checkout.dir.join("README.md")).unwrap();
        assert!(readme.contains("local edit"));
        assert_eq!(
            run_git(&checkout.dir, &["config", "--get", "remote.origin.url"]),
            "https://github.com/yugabyte/yugabyte-db-thirdparty.git"
        );
        assert_eq!(run_git(&checkout.dir, &["rev-parse", "HEAD"]), checkout.commit_sha);
    }

    #[tokio::test]
    async fn test_create_checkout_preserves_non_utf8_edits() {
        let repo = make_git_repo();
        std::fs::write(repo.path().join("latin1.txt"), b"caf\xe9\n").unwrap();
        run_git(repo.path(), &["add", "latin1.txt"]);
        run_git(repo.path(), &["commit", "-q", "-m", "latin-1 file"]);
        let edited: &[u8] = b"caf\xe9\nna\xefve\n";
        std::fs::write(repo.path().join("latin1.txt"), edited).unwrap();
        let build_root = tempfile::tempdir().unwrap();

        let checkout = create_checkout(&ProcessRunner, &ctx(None), repo.path(), build_root.path())
            .await
            .unwrap();

        let copied = std::fs::read(checkout.dir.join("latin1.txt")).unwrap();
        assert_eq!(copied, edited);
    }

    #[tokio::test]
    async fn test_create_checkout_uses_archive_suffix() {
        let repo = make_git_repo();
        let build_root = tempfile::tempdir().unwrap();

        let checkout = create_checkout(
            &ProcessRunner,
            &ctx(Some("centos7-linuxbrew")),
            repo.path(),
            build_root.path(),
        )
        .await
        .unwrap();

        assert!(checkout.version_tag().ends_with("-centos7-linuxbrew"));
        assert!(checkout
            .archive_dir_name()
            .starts_with("yugabyte-db-thirdparty-v"));
    }

    #[tokio::test]
    async fn test_missing_origin_is_fatal() {
        let repo = make_git_repo();
        run_git(repo.path(), &["remote", "remove", "origin"]);
        let build_root = tempfile::tempdir().unwrap();

        let err = create_checkout(&ProcessRunner, &ctx(None), repo.path(), build_root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::MissingOriginUrl(_)));
        assert_eq!(std::fs::read_dir(build_root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cleanup_removes_checkout_and_siblings() {
        let root = tempfile::tempdir().unwrap();
        let name = "yugabyte-db-thirdparty-v20201017180958-0123456789-linux";
        let dir = root.path().join(name);
        std::fs::create_dir_all(dir.join("installed")).unwrap();
        std::fs::write(root.path().join(archive_file_name(name)), b"tar").unwrap();
        std::fs::write(root.path().join(checksum_file_name(name)), b"sum").unwrap();
        std::fs::write(root.path().join("unrelated.txt"), b"keep").unwrap();

        let removed = cleanup_partial_state(&dir).unwrap();

        assert_eq!(removed.len(), 3);
        assert!(!dir.exists());
        assert!(root.path().join("unrelated.txt").exists());
        assert!(cleanup_partial_state(&dir).unwrap().is_empty());
    }
}
