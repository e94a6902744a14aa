//! Prebuilt toolchain provisioning.
//!
//! The checkout names a toolchain archive URL in [`TOOLCHAIN_URL_FILE`]. The
//! archive installs into `<toolchain parent>/<archive name minus .tar.gz>`.
//! If that directory already exists it is trusted as-is: presence is the
//! whole cache key, there is no re-verification of a cached install.
//!
//! On a cache miss the archive is downloaded into a scratch directory under
//! the toolchain parent, checked against the published `<url>.sha256`,
//! unpacked, moved into place and finalised by its own post-install script.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::BuildContext;
use crate::digest::{is_sha256_hex, sha256_file};
use crate::download::Downloader;
use crate::error::{ReleaseError, Result};
use crate::exec::{run_blocking, CommandRunner, CommandSpec};

/// File at the checkout root holding the toolchain archive URL.
pub const TOOLCHAIN_URL_FILE: &str = "linuxbrew_url.txt";

/// Post-install procedure shipped inside the toolchain archive.
pub const POST_INSTALL_SCRIPT: &str = "post_install.sh";

const TOOLCHAIN_ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Accepted shape of the toolchain URL.
pub const TOOLCHAIN_URL_PATTERN: &str = r"^https://\S+\.tar\.gz$";

/// An installed toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainHandle {
    pub install_dir: PathBuf,

    /// Whether the directory already existed.
    pub cache_hit: bool,
}

impl ToolchainHandle {
    /// Directory prepended to `PATH` by the build step.
    pub fn bin_dir(&self) -> PathBuf {
        self.install_dir.join("bin")
    }
}

/// Read and validate the toolchain URL from the checkout.
pub fn read_toolchain_url(checkout_dir: &Path) -> Result<String> {
    let path = checkout_dir.join(TOOLCHAIN_URL_FILE);
    let url = std::fs::read_to_string(&path)?.trim().to_string();
    if !Regex::new(TOOLCHAIN_URL_PATTERN).is_ok_and(|re| re.is_match(&url)) {
        return Err(ReleaseError::InvalidToolchainUrl { path, url });
    }
    Ok(url)
}

/// Install directory name for a toolchain URL: its file name minus `.tar.gz`.
pub fn install_dir_name(url: &str) -> Option<&str> {
    let file_name = url.rsplit('/').next()?;
    let name = file_name.strip_suffix(TOOLCHAIN_ARCHIVE_EXTENSION)?;
    (!name.is_empty()).then_some(name)
}

/// Digest from a published checksum body (`<digest>` or `<digest>  <file>`).
pub fn parse_published_checksum(url: &str, body: &str) -> Result<String> {
    match body.split_whitespace().next() {
        Some(digest) if is_sha256_hex(digest) => Ok(digest.to_ascii_lowercase()),
        _ => Err(ReleaseError::InvalidPublishedChecksum {
            url: url.to_string(),
            body: body.trim().to_string(),
        }),
    }
}

/// Unpack `archive` into `scratch` and return its single top-level directory.
fn unpack_single_dir(archive: &Path, scratch: &Path) -> Result<PathBuf> {
    let decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
    tar::Archive::new(decoder).unpack(scratch)?;

    let mut top_level = Vec::new();
    for entry in std::fs::read_dir(scratch)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            top_level.push(entry.path());
        }
    }

    match top_level.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Err(ReleaseError::UnexpectedArchiveLayout {
            archive: archive.to_path_buf(),
            message: format!(
                "expected exactly one top-level directory, found {:?}",
                top_level
                    .iter()
                    .filter_map(|p| p.file_name())
                    .collect::<Vec<_>>()
            ),
        }),
    }
}

/// Installs toolchains under a fixed parent directory.
pub struct ToolchainProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    downloader: &'a dyn Downloader,
    parent_dir: PathBuf,
}

impl<'a> ToolchainProvisioner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        downloader: &'a dyn Downloader,
        parent_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            downloader,
            parent_dir: parent_dir.into(),
        }
    }

    /// Resolve the toolchain for this run, if the context asks for one.
    ///
    /// A surviving toolchain directory override that exists is used as-is.
    /// Otherwise the toolchain named by the checkout is provisioned.
    pub async fn resolve(
        &self,
        ctx: &BuildContext,
        checkout_dir: &Path,
    ) -> Result<Option<ToolchainHandle>> {
        if !ctx.wants_toolchain() {
            info!(
                os = %ctx.os_family(),
                suffix = %ctx.archive_name_suffix(),
                "No prebuilt toolchain for this OS/archive variant"
            );
            return Ok(None);
        }

        if let Some(dir) = ctx.toolchain_dir() {
            if dir.is_dir() {
                info!(install_dir = %dir.display(), "Using toolchain directory override");
                return Ok(Some(ToolchainHandle {
                    install_dir: dir.to_path_buf(),
                    cache_hit: true,
                }));
            }
            warn!(
                install_dir = %dir.display(),
                "Toolchain directory override does not exist, provisioning from checkout"
            );
        }

        self.provision(checkout_dir).await.map(Some)
    }

    /// Provision the toolchain whose URL is recorded in the checkout.
    pub async fn provision(&self, checkout_dir: &Path) -> Result<ToolchainHandle> {
        let url = read_toolchain_url(checkout_dir)?;
        let name = install_dir_name(&url)
            .map(str::to_string)
            .ok_or_else(|| ReleaseError::InvalidToolchainUrl {
                path: checkout_dir.join(TOOLCHAIN_URL_FILE),
                url: url.clone(),
            })?;
        let install_dir = self.parent_dir.join(&name);

        if install_dir.exists() {
            info!(install_dir = %install_dir.display(), "Toolchain already installed");
            return Ok(ToolchainHandle {
                install_dir,
                cache_hit: true,
            });
        }

        std::fs::create_dir_all(&self.parent_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("tmp-{name}-"))
            .tempdir_in(&self.parent_dir)?;
        let archive_path = scratch.path().join(format!("{name}{TOOLCHAIN_ARCHIVE_EXTENSION}"));

        let bytes = self.downloader.fetch(&url, &archive_path).await?;
        info!(url = %url, bytes, "Downloaded toolchain archive");

        let checksum_url = format!("{url}.sha256");
        let expected =
            parse_published_checksum(&checksum_url, &self.downloader.fetch_text(&checksum_url).await?)?;
        let actual = {
            let archive_path = archive_path.clone();
            run_blocking(move || sha256_file(&archive_path)).await?
        };
        if actual != expected {
            return Err(ReleaseError::ChecksumMismatch {
                url,
                expected,
                actual,
            });
        }
        info!(sha256 = %actual, "Toolchain archive checksum verified");

        let extracted = {
            let archive_path = archive_path.clone();
            let unpack_dir = scratch.path().join("unpacked");
            run_blocking(move || {
                std::fs::create_dir_all(&unpack_dir)?;
                unpack_single_dir(&archive_path, &unpack_dir)
            })
            .await?
        };
        std::fs::rename(&extracted, &install_dir)?;
        info!(install_dir = %install_dir.display(), "Toolchain extracted");

        let post_install = CommandSpec::new(
            install_dir.join(POST_INSTALL_SCRIPT).to_string_lossy(),
            Vec::<String>::new(),
        )
        .in_dir(&install_dir)
        .streaming();
        self.runner.run_checked(&post_install).await?;

        if !install_dir.is_dir() {
            return Err(ReleaseError::InstallDirMissing(install_dir));
        }

        Ok(ToolchainHandle {
            install_dir,
            cache_hit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{env, ConfigOverrides, OsFamily};
    use crate::exec::CommandOutput;
    use crate::fakes::{tarball, MemoryDownloader, ScriptedRunner};
    use sha2::{Digest, Sha256};

    const URL: &str = "https://example.com/linuxbrew-20200101.tar.gz";

    fn checkout_with_url(url: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOOLCHAIN_URL_FILE), format!("{url}\n")).unwrap();
        dir
    }

    fn linuxbrew_ctx(toolchain_dir: Option<&str>) -> BuildContext {
        let overrides = ConfigOverrides::from_lookup(|key| match key {
            env::ARCHIVE_NAME_SUFFIX => Some("centos7-linuxbrew".to_string()),
            env::TOOLCHAIN_DIR => toolchain_dir.map(str::to_string),
            _ => None,
        });
        BuildContext::resolve(&overrides, OsFamily::Linux)
    }

    fn toolchain_tarball() -> Vec<u8> {
        tarball(&[
            ("linuxbrew-20200101/bin/gcc", "#!/bin/sh\n"),
            ("linuxbrew-20200101/post_install.sh", "#!/bin/sh\n"),
        ])
    }

    fn sha_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    #[test]
    fn test_install_dir_name() {
        assert_eq!(
            install_dir_name("https://example.com/brew-1.2.3.tar.gz"),
            Some("brew-1.2.3")
        );
        assert_eq!(install_dir_name("https://example.com/brew.zip"), None);
        assert_eq!(install_dir_name("https://example.com/.tar.gz"), None);
    }

    #[test]
    fn test_read_toolchain_url_validates_pattern() {
        let good = checkout_with_url(URL);
        assert_eq!(read_toolchain_url(good.path()).unwrap(), URL);

        for bad in ["http://example.com/x.tar.gz", "https://example.com/x.zip", ""] {
            let dir = checkout_with_url(bad);
            let err = read_toolchain_url(dir.path()).unwrap_err();
            assert!(matches!(err, ReleaseError::InvalidToolchainUrl { .. }), "{bad}");
        }
    }

    #[test]
    fn test_parse_published_checksum() {
        let digest = "A".repeat(64);
        assert_eq!(
            parse_published_checksum(URL, &format!("{digest}  linuxbrew.tar.gz\n")).unwrap(),
            "a".repeat(64)
        );
        assert!(parse_published_checksum(URL, "not-a-digest").is_err());
        assert!(parse_published_checksum(URL, "").is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_download() {
        let checkout = checkout_with_url(URL);
        let parent = tempfile::tempdir().unwrap();
        std::fs::create_dir(parent.path().join("linuxbrew-20200101")).unwrap();
        let runner = ScriptedRunner::new();
        let downloader = MemoryDownloader::new();

        let handle = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .provision(checkout.path())
            .await
            .unwrap();

        assert!(handle.cache_hit);
        assert_eq!(handle.install_dir, parent.path().join("linuxbrew-20200101"));
        assert_eq!(handle.bin_dir(), parent.path().join("linuxbrew-20200101/bin"));
        assert!(downloader.requests().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cache_miss_downloads_verifies_and_installs() {
        let checkout = checkout_with_url(URL);
        let parent = tempfile::tempdir().unwrap();
        let body = toolchain_tarball();
        let runner = ScriptedRunner::new();
        let downloader = MemoryDownloader::new()
            .with(URL, body.clone())
            .with(&format!("{URL}.sha256"), sha_hex(&body));

        let handle = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .provision(checkout.path())
            .await
            .unwrap();

        assert!(!handle.cache_hit);
        assert!(handle.install_dir.join("bin/gcc").is_file());
        let post_install = handle.install_dir.join(POST_INSTALL_SCRIPT);
        assert!(runner.was_called(&[post_install.to_string_lossy().as_ref()]));
        // Only the install directory is left behind.
        let leftovers: Vec<_> = std::fs::read_dir(parent.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_aborts_before_post_install() {
        let checkout = checkout_with_url(URL);
        let parent = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let downloader = MemoryDownloader::new()
            .with(URL, toolchain_tarball())
            .with(&format!("{URL}.sha256"), "0".repeat(64));

        let err = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .provision(checkout.path())
            .await
            .unwrap_err();

        assert!(matches!(err, ReleaseError::ChecksumMismatch { .. }));
        assert!(runner.calls().is_empty());
        assert!(!parent.path().join("linuxbrew-20200101").exists());
    }

    #[tokio::test]
    async fn test_archive_with_multiple_top_level_entries_rejected() {
        let checkout = checkout_with_url(URL);
        let parent = tempfile::tempdir().unwrap();
        let body = tarball(&[("a/bin/gcc", ""), ("b/bin/gcc", "")]);
        let runner = ScriptedRunner::new();
        let downloader = MemoryDownloader::new()
            .with(URL, body.clone())
            .with(&format!("{URL}.sha256"), sha_hex(&body));

        let err = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .provision(checkout.path())
            .await
            .unwrap_err();

        assert!(matches!(err, ReleaseError::UnexpectedArchiveLayout { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_post_install_failure_is_fatal() {
        let checkout = checkout_with_url(URL);
        let parent = tempfile::tempdir().unwrap();
        let body = toolchain_tarball();
        let post_install = parent
            .path()
            .join("linuxbrew-20200101")
            .join(POST_INSTALL_SCRIPT);
        let runner = ScriptedRunner::new().on(
            &[post_install.to_string_lossy().as_ref()],
            CommandOutput::failed(1, "relocation failed"),
        );
        let downloader = MemoryDownloader::new()
            .with(URL, body.clone())
            .with(&format!("{URL}.sha256"), sha_hex(&body));

        let err = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .provision(checkout.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_install_dir_removed_by_post_install_is_fatal() {
        let checkout = checkout_with_url(URL);
        let parent = tempfile::tempdir().unwrap();
        let body = toolchain_tarball();
        let install_dir = parent.path().join("linuxbrew-20200101");
        let post_install = install_dir.join(POST_INSTALL_SCRIPT);
        let doomed = install_dir.clone();
        let runner = ScriptedRunner::new().on_with(
            &[post_install.to_string_lossy().as_ref()],
            CommandOutput::ok(""),
            move |_| {
                std::fs::remove_dir_all(&doomed).unwrap();
            },
        );
        let downloader = MemoryDownloader::new()
            .with(URL, body.clone())
            .with(&format!("{URL}.sha256"), sha_hex(&body));

        let err = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .provision(checkout.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InstallDirMissing(_)));
    }

    #[tokio::test]
    async fn test_resolve_skips_when_not_requested() {
        let ctx = BuildContext::resolve(&ConfigOverrides::default(), OsFamily::Linux);
        let runner = ScriptedRunner::new();
        let downloader = MemoryDownloader::new();
        let parent = tempfile::tempdir().unwrap();
        let checkout = tempfile::tempdir().unwrap();

        let handle = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .resolve(&ctx, checkout.path())
            .await
            .unwrap();
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_resolve_prefers_existing_override() {
        let installed = tempfile::tempdir().unwrap();
        let ctx = linuxbrew_ctx(Some(installed.path().to_str().unwrap()));
        let runner = ScriptedRunner::new();
        let downloader = MemoryDownloader::new();
        let parent = tempfile::tempdir().unwrap();
        // No URL file: the override must short-circuit before reading it.
        let checkout = tempfile::tempdir().unwrap();

        let handle = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .resolve(&ctx, checkout.path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.install_dir, installed.path());
        assert!(handle.cache_hit);
        assert!(downloader.requests().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_provisions_for_linuxbrew_variant() {
        let ctx = linuxbrew_ctx(None);
        let checkout = checkout_with_url(URL);
        let parent = tempfile::tempdir().unwrap();
        std::fs::create_dir(parent.path().join("linuxbrew-20200101")).unwrap();
        let runner = ScriptedRunner::new();
        let downloader = MemoryDownloader::new();

        let handle = ToolchainProvisioner::new(&runner, &downloader, parent.path())
            .resolve(&ctx, checkout.path())
            .await
            .unwrap();
        assert_eq!(
            handle.map(|h| h.install_dir),
            Some(parent.path().join("linuxbrew-20200101"))
        );
    }
}
