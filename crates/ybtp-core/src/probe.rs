//! Host environment probe.
//!
//! Read-only: confirms the required build tools are runnable, logs their
//! versions, and refuses known-bad tool releases before anything is built.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{BuildContext, OsFamily};
use crate::error::{ReleaseError, Result};
use crate::exec::{CommandRunner, CommandSpec};

/// cmake release that miscompiles parts of the bundle.
pub const BLOCKED_CMAKE_VERSION: &str = "3.19.1";

const CPU_INFO_PATH: &str = "/proc/cpuinfo";

/// Tools that must be on `PATH`, in probe order. cmake is first so a blocked
/// release aborts before anything else runs.
pub fn required_tools(os: OsFamily) -> Vec<&'static str> {
    let mut tools = vec!["cmake", "automake", "autoconf", "autoreconf", "pkg-config"];
    match os {
        OsFamily::MacOs => tools.push("shasum"),
        OsFamily::Linux => tools.extend(["libtool", "sha256sum"]),
    }
    tools
}

/// One tool's reported version line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolVersion {
    pub tool: String,
    pub version_line: String,
}

/// Facts gathered by [`probe_environment`].
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub os_family: OsFamily,
    pub tools: Vec<ToolVersion>,
    pub cpu_info: Option<String>,
    pub disk_usage: Option<String>,
}

/// Parse the version out of `cmake --version` output
/// (`cmake version 3.19.1` on the first line).
pub fn parse_cmake_version(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("cmake version "))
        .map(str::trim)
}

async fn tool_version(runner: &dyn CommandRunner, tool: &str) -> Result<ToolVersion> {
    let spec = CommandSpec::new(tool, ["--version"]);
    let output = runner
        .run(&spec)
        .await
        .map_err(|e| ReleaseError::ToolMissing {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;
    if !output.success() {
        return Err(ReleaseError::ToolMissing {
            tool: tool.to_string(),
            message: format!(
                "`{}` exited with code {}: {}",
                spec.display(),
                output.exit_code,
                output.stderr.trim()
            ),
        });
    }

    // Some tools (older sha256sum builds) print their version on stderr.
    let text = if output.stdout.trim().is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };
    let version_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string();

    if tool == "cmake" {
        if let Some(version) = parse_cmake_version(text) {
            if version == BLOCKED_CMAKE_VERSION {
                return Err(ReleaseError::BlockedToolVersion {
                    tool: tool.to_string(),
                    version: version.to_string(),
                });
            }
        }
    }

    Ok(ToolVersion {
        tool: tool.to_string(),
        version_line,
    })
}

/// Probe the host. Any missing or failing tool is fatal.
pub async fn probe_environment(
    runner: &dyn CommandRunner,
    ctx: &BuildContext,
    work_dir: &Path,
) -> Result<ProbeReport> {
    let os_family = ctx.os_family();

    if ctx.dump_env() {
        for (key, value) in ctx.environment_dump() {
            info!("{key}={value}");
        }
    }

    let cpu_info = if os_family.is_apple() {
        None
    } else {
        match tokio::fs::read_to_string(CPU_INFO_PATH).await {
            Ok(text) => {
                info!(cpu_info = %text, "CPU info");
                Some(text)
            }
            Err(e) => {
                warn!(path = CPU_INFO_PATH, error = %e, "Could not read CPU info");
                None
            }
        }
    };

    let mut tools = Vec::new();
    for tool in required_tools(os_family) {
        let version = tool_version(runner, tool).await?;
        info!(tool = %version.tool, version = %version.version_line, "Tool found");
        tools.push(version);
    }

    let df = CommandSpec::new("df", ["-h".to_string(), work_dir.to_string_lossy().into_owned()]);
    let disk_usage = match runner.run_checked(&df).await {
        Ok(output) => {
            info!(disk_usage = %output.stdout.trim(), "Disk space");
            Some(output.stdout)
        }
        Err(e) => {
            warn!(error = %e, "Could not determine free disk space");
            None
        }
    };

    Ok(ProbeReport {
        os_family,
        tools,
        cpu_info,
        disk_usage,
    })
}
