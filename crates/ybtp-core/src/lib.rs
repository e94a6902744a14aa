//! ybtp-core: building blocks for producing third-party dependency releases.
//!
//! Each stage of a release (environment probe, reproducible checkout,
//! toolchain provisioning, build, packaging, publication) lives in its own
//! module. External effects go through the [`CommandRunner`] and
//! [`Downloader`] capabilities so every stage can run against fakes.

pub mod archive;
pub mod build;
pub mod checkout;
pub mod config;
pub mod digest;
pub mod download;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod git;
pub mod probe;
pub mod publish;
pub mod telemetry;
pub mod toolchain;

pub use archive::{create_archive, Archive};
pub use build::run_build;
pub use checkout::{cleanup_partial_state, create_checkout, Checkout, ReleaseName};
pub use config::{BuildContext, ConfigOverrides, OsFamily, PipelineSettings, PublishDecision};
pub use download::{Downloader, HttpDownloader};
pub use error::{ReleaseError, Result};
pub use exec::{run_blocking, CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use probe::{probe_environment, ProbeReport};
pub use publish::{publish_release, PublishOutcome};
pub use telemetry::{init_tracing, log_subscriber, release_span};
pub use toolchain::{ToolchainHandle, ToolchainProvisioner};
