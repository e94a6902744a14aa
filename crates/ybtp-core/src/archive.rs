//! Packaging of a built checkout.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::info;
use walkdir::WalkDir;

use crate::checkout::Checkout;
use crate::digest::sha256_file;
use crate::error::Result;
use crate::toolchain::ToolchainHandle;

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Top-level checkout subdirectories left out of the archive: git metadata,
/// raw sources, build scratch space, the virtualenv and the download cache.
pub const EXCLUDED_DIRS: [&str; 5] = [".git", "src", "build", "venv", "download"];

/// Side-file recording which toolchain the bundle was built against.
pub const TOOLCHAIN_PATH_FILE: &str = "linuxbrew_path.txt";

pub fn archive_file_name(archive_dir_name: &str) -> String {
    format!("{archive_dir_name}{ARCHIVE_EXTENSION}")
}

pub fn checksum_file_name(archive_dir_name: &str) -> String {
    format!("{}.sha256", archive_file_name(archive_dir_name))
}

/// A packaged checkout and its checksum side-file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Archive {
    pub path: PathBuf,
    pub checksum_path: PathBuf,

    /// Lowercase hex SHA-256 of `path`.
    pub sha256: String,
}

/// Write `<dir>/<name>.tar.gz` holding `dir/name`, minus [`EXCLUDED_DIRS`]
/// directly under it. Entry paths start with `name/`.
pub fn package_directory(parent: &Path, name: &str, dest: &Path) -> Result<()> {
    let root = parent.join(name);
    let file = BufWriter::new(File::create(dest)?);
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.depth() == 1
                && entry.file_type().is_dir()
                && EXCLUDED_DIRS.iter().any(|d| entry.file_name() == *d))
        });

    for entry in walker {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        let archived = Path::new(name).join(relative);
        if entry.file_type().is_dir() {
            builder.append_dir(&archived, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &archived)?;
        }
    }

    let mut file = builder.into_inner()?.finish()?;
    file.flush()?;
    Ok(())
}

/// Record `handle` inside the checkout so the archive names its toolchain.
pub fn record_toolchain(checkout_dir: &Path, handle: &ToolchainHandle) -> Result<PathBuf> {
    let path = checkout_dir.join(TOOLCHAIN_PATH_FILE);
    fs::write(&path, handle.install_dir.to_string_lossy().as_bytes())?;
    Ok(path)
}

/// Package the checkout next to itself and write its checksum side-file.
pub fn create_archive(checkout: &Checkout, toolchain: Option<&ToolchainHandle>) -> Result<Archive> {
    if let Some(handle) = toolchain {
        let side_file = record_toolchain(&checkout.dir, handle)?;
        info!(path = %side_file.display(), "Recorded toolchain path");
    }

    let parent = checkout.parent_dir();
    let dir_name = checkout.archive_dir_name();
    let path = parent.join(archive_file_name(dir_name));
    let checksum_path = parent.join(checksum_file_name(dir_name));

    info!(archive = %path.display(), "Creating archive");
    package_directory(parent, dir_name, &path)?;

    let sha256 = sha256_file(&path)?;
    fs::write(&checksum_path, sha256.as_bytes())?;
    info!(archive = %path.display(), sha256 = %sha256, "Archive ready");

    Ok(Archive {
        path,
        checksum_path,
        sha256,
    })
}
