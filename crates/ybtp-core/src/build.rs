//! Build step.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::BuildContext;
use crate::error::Result;
use crate::exec::{run_blocking, CommandRunner, CommandSpec};
use crate::toolchain::ToolchainHandle;

/// Build entry point at the checkout root.
pub const BUILD_ENTRY_POINT: &str = "./build_thirdparty.sh";

/// The build invocation: base arguments, then extra arguments, run from the
/// checkout with the toolchain's `bin` directory first on `PATH`.
pub fn build_command(
    ctx: &BuildContext,
    checkout_dir: &Path,
    toolchain: Option<&ToolchainHandle>,
) -> CommandSpec {
    let args = ctx.build_args().iter().chain(ctx.extra_build_args()).cloned();
    let spec = CommandSpec::new(BUILD_ENTRY_POINT, args)
        .in_dir(checkout_dir)
        .streaming();
    match toolchain {
        Some(handle) => spec.with_path_prefix(handle.bin_dir()),
        None => spec,
    }
}

/// Run the build. A non-zero exit surfaces as `CommandFailed` carrying the
/// build's own exit code.
pub async fn run_build(
    runner: &dyn CommandRunner,
    ctx: &BuildContext,
    checkout_dir: &Path,
    toolchain: Option<&ToolchainHandle>,
) -> Result<()> {
    let spec = build_command(ctx, checkout_dir, toolchain);
    info!(command = %spec.display(), cwd = %checkout_dir.display(), "Building");
    runner.run_checked(&spec).await?;

    let dir = checkout_dir.to_path_buf();
    let removed = run_blocking(move || remove_bytecode_caches(&dir)).await?;
    info!(count = removed.len(), "Removed Python bytecode files");
    Ok(())
}

/// Delete every `*.pyc` file under `root`. Returns the deleted paths.
pub fn remove_bytecode_caches(root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let is_pyc = entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "pyc");
        if is_pyc {
            debug!(path = %entry.path().display(), "Removing bytecode file");
            std::fs::remove_file(entry.path())?;
            removed.push(entry.into_path());
        }
    }
    Ok(removed)
}
