//! Stage execution bookkeeping.

use crate::stage::ReleaseStage;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};
use ybtp_core::ReleaseError;

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageOutcome {
    Completed,
    Skipped { reason: String },
}

/// Result of a stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: ReleaseStage,
    pub outcome: StageOutcome,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    pub fn completed(&self) -> bool {
        self.outcome == StageOutcome::Completed
    }
}

/// A stage failed; nothing after it ran.
#[derive(Debug, Error)]
#[error("release stage `{stage}` failed: {source}")]
pub struct PipelineError {
    pub stage: ReleaseStage,

    /// Stages that finished before the failure.
    pub completed: Vec<StageResult>,

    /// Checkout left behind, if one was created.
    pub checkout_dir: Option<PathBuf>,

    #[source]
    pub source: ReleaseError,
}

impl PipelineError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}

/// Records stage results as a run progresses and converts the first stage
/// error into a [`PipelineError`].
#[derive(Debug, Default)]
pub struct StageLog {
    results: Vec<StageResult>,
    checkout_dir: Option<PathBuf>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the checkout so a later failure can point at it.
    pub fn set_checkout_dir(&mut self, dir: PathBuf) {
        self.checkout_dir = Some(dir);
    }

    /// Run one stage to completion, timing it.
    pub async fn run<T, F>(&mut self, stage: ReleaseStage, work: F) -> Result<T, PipelineError>
    where
        F: Future<Output = ybtp_core::Result<T>>,
    {
        info!(stage = %stage, "Executing stage");
        let start = Instant::now();
        let result = work.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                info!(stage = %stage, duration_ms, "Stage completed");
                self.results.push(StageResult {
                    stage,
                    outcome: StageOutcome::Completed,
                    duration_ms,
                });
                Ok(value)
            }
            Err(source) => {
                error!(stage = %stage, duration_ms, error = %source, "Stage failed");
                Err(PipelineError {
                    stage,
                    completed: std::mem::take(&mut self.results),
                    checkout_dir: self.checkout_dir.take(),
                    source,
                })
            }
        }
    }

    /// Record a stage that did not need to run.
    pub fn skip(&mut self, stage: ReleaseStage, reason: impl Into<String>) {
        let reason = reason.into();
        info!(stage = %stage, reason = %reason, "Skipping stage");
        self.results.push(StageResult {
            stage,
            outcome: StageOutcome::Skipped { reason },
            duration_ms: 0,
        });
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<StageResult> {
        self.results
    }
}
