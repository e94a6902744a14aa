//! ybtp - YugabyteDB third-party release CLI
//!
//! ## Commands
//!
//! - `run`: probe, check out, build, package and (when allowed) publish
//! - `probe`: check the host toolchain without building anything
//! - `config`: print the configuration resolved from the environment
//! - `clean`: remove a checkout left behind by a failed run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};

use ybtp_ci::{PipelineError, PipelineResult, ReleasePipeline, StageOutcome};
use ybtp_core::{
    cleanup_partial_state, probe_environment, BuildContext, ConfigOverrides, HttpDownloader,
    OsFamily, PipelineSettings, ProbeReport, ProcessRunner, ReleaseError,
};

#[derive(Parser)]
#[command(name = "ybtp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, package and publish the YugabyteDB third-party bundle", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines on stderr and JSON reports on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full release pipeline
    Run {
        /// Repository whose working tree is released (default: current directory)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Parent directory for the reproducible checkout
        #[arg(long)]
        build_root: Option<PathBuf>,

        /// Parent directory for installed toolchains
        #[arg(long)]
        toolchain_parent: Option<PathBuf>,

        /// Also write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check required build tools and host resources
    Probe {
        /// Directory whose filesystem usage is reported
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Print the resolved build configuration
    Config,

    /// Remove a checkout and its archive files
    Clean {
        /// Checkout directory reported by a failed run
        checkout_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ybtp_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = ConfigOverrides::from_env();
    let os = OsFamily::detect();

    match cli.command {
        Commands::Run {
            repo,
            build_root,
            toolchain_parent,
            report,
        } => {
            let defaults = PipelineSettings::default();
            let settings = PipelineSettings {
                repo_dir: repo.unwrap_or(defaults.repo_dir),
                build_root: build_root.unwrap_or(defaults.build_root),
                toolchain_parent: toolchain_parent.unwrap_or(defaults.toolchain_parent),
            };
            let ctx = BuildContext::resolve(&overrides, os);
            cmd_run(&ctx, settings, report.as_deref(), cli.json).await
        }
        Commands::Probe { dir } => {
            let ctx = BuildContext::resolve(&overrides, os);
            cmd_probe(&ctx, &dir, cli.json).await
        }
        Commands::Config => {
            let ctx = BuildContext::resolve(&overrides, os);
            cmd_config(&ctx)
        }
        Commands::Clean { checkout_dir } => cmd_clean(&checkout_dir, cli.json),
    }
}

/// Map a failure to the process exit code. A failed build keeps its own code.
fn exit_code(err: &anyhow::Error) -> u8 {
    let code = if let Some(e) = err.downcast_ref::<PipelineError>() {
        e.exit_code()
    } else if let Some(e) = err.downcast_ref::<ReleaseError>() {
        e.exit_code()
    } else {
        1
    };
    u8::try_from(code).unwrap_or(1)
}

async fn cmd_run(
    ctx: &BuildContext,
    settings: PipelineSettings,
    report: Option<&Path>,
    json: bool,
) -> Result<()> {
    let runner = Arc::new(ProcessRunner);
    let downloader = Arc::new(HttpDownloader::new()?);
    let pipeline = ReleasePipeline::new(runner, downloader, settings);

    let result = match pipeline.run(ctx).await {
        Ok(result) => result,
        Err(err) => {
            if let Some(dir) = &err.checkout_dir {
                eprintln!(
                    "Checkout left at {}; remove it with `ybtp clean {}`",
                    dir.display(),
                    dir.display()
                );
            }
            return Err(err.into());
        }
    };

    if let Some(path) = report {
        let body = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_run_summary(&result);
    }
    Ok(())
}

fn print_run_summary(result: &PipelineResult) {
    println!("Release:  {}", result.version_tag);
    println!("Checkout: {}", result.checkout.dir.display());
    println!("Archive:  {}", result.archive.path.display());
    println!("SHA-256:  {}", result.archive.sha256);
    if let Some(toolchain) = &result.toolchain {
        let origin = if toolchain.cache_hit { "cached" } else { "installed" };
        println!("Toolchain: {} ({})", toolchain.install_dir.display(), origin);
    }
    println!();
    for stage in &result.stages {
        match &stage.outcome {
            StageOutcome::Completed => {
                println!("  ✓ {:<10} {} ms", stage.stage.name(), stage.duration_ms)
            }
            StageOutcome::Skipped { reason } => {
                println!("  - {:<10} skipped: {}", stage.stage.name(), reason)
            }
        }
    }
    println!();
    println!(
        "{} completed, {} skipped in {} ms",
        result.completed_count(),
        result.skipped_count(),
        result.duration_ms
    );
}

async fn cmd_probe(ctx: &BuildContext, dir: &Path, json: bool) -> Result<()> {
    let report: ProbeReport = probe_environment(&ProcessRunner, ctx, dir).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("OS family: {}", report.os_family);
    for tool in &report.tools {
        println!("  {:<12} {}", tool.tool, tool.version_line);
    }
    if let Some(df) = &report.disk_usage {
        println!();
        print!("{df}");
    }
    Ok(())
}

fn cmd_config(ctx: &BuildContext) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(ctx)?);
    Ok(())
}

fn cmd_clean(checkout_dir: &Path, json: bool) -> Result<()> {
    let removed = cleanup_partial_state(checkout_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&removed)?);
    } else if removed.is_empty() {
        println!("Nothing to remove at {}", checkout_dir.display());
    } else {
        for path in &removed {
            println!("Removed {}", path.display());
        }
    }
    Ok(())
}
