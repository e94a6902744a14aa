//! ybtp-ci: sequential release pipeline
//!
//! Drives the stages from `ybtp-core` in order:
//! - probe the host, build a reproducible checkout
//! - provision the prebuilt toolchain when the variant needs one
//! - build, package, and publish when allowed
//!
//! The first failing stage stops the run and is reported with everything
//! that completed before it.

pub mod pipeline;
pub mod runner;
pub mod stage;

pub use pipeline::{PipelineResult, ReleasePipeline};
pub use runner::{PipelineError, StageLog, StageOutcome, StageResult};
pub use stage::ReleaseStage;
