//! Release pipeline orchestration.
//!
//! Stages run strictly in order and the first failure stops the run. Nothing
//! created along the way is removed on failure; `ybtp clean` does that
//! explicitly.

use crate::runner::{PipelineError, StageLog, StageResult};
use crate::stage::ReleaseStage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Instrument};
use ybtp_core::{
    build, create_archive, create_checkout, probe_environment, publish_release, release_span,
    run_blocking, Archive, BuildContext, Checkout, CommandRunner, Downloader, PipelineSettings,
    ProbeReport, PublishOutcome, ToolchainHandle, ToolchainProvisioner,
};

/// Result of a complete release run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub version_tag: String,
    pub probe: ProbeReport,
    pub checkout: Checkout,
    pub toolchain: Option<ToolchainHandle>,
    pub archive: Archive,
    pub publish: PublishOutcome,

    /// Results of individual stages.
    pub stages: Vec<StageResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

/// Release pipeline orchestrator.
pub struct ReleasePipeline {
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
    settings: PipelineSettings,
}

impl ReleasePipeline {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            runner,
            downloader,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run every stage once for `ctx`.
    pub async fn run(&self, ctx: &BuildContext) -> Result<PipelineResult, PipelineError> {
        let span = release_span(ctx.os_family().tag());
        self.run_stages(ctx).instrument(span).await
    }

    async fn run_stages(&self, ctx: &BuildContext) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        let runner = self.runner.as_ref();
        let settings = &self.settings;
        let mut log = StageLog::new();

        info!(
            repo = %settings.repo_dir.display(),
            build_root = %settings.build_root.display(),
            "Starting release pipeline"
        );

        let probe_dir = if settings.build_root.is_dir() {
            &settings.build_root
        } else {
            &settings.repo_dir
        };
        let probe = log
            .run(ReleaseStage::Probe, probe_environment(runner, ctx, probe_dir))
            .await?;

        let checkout = log
            .run(
                ReleaseStage::Checkout,
                create_checkout(runner, ctx, &settings.repo_dir, &settings.build_root),
            )
            .await?;
        log.set_checkout_dir(checkout.dir.clone());
        tracing::Span::current().record("tag", checkout.version_tag());

        let toolchain = if ctx.wants_toolchain() {
            let provisioner = ToolchainProvisioner::new(
                runner,
                self.downloader.as_ref(),
                settings.toolchain_parent.clone(),
            );
            log.run(ReleaseStage::Toolchain, provisioner.resolve(ctx, &checkout.dir))
                .await?
        } else {
            log.skip(
                ReleaseStage::Toolchain,
                format!(
                    "no prebuilt toolchain for {} / '{}'",
                    ctx.os_family(),
                    ctx.archive_name_suffix()
                ),
            );
            None
        };

        log.run(
            ReleaseStage::Build,
            build::run_build(runner, ctx, &checkout.dir, toolchain.as_ref()),
        )
        .await?;

        let archive = {
            let checkout = checkout.clone();
            let toolchain = toolchain.clone();
            log.run(
                ReleaseStage::Archive,
                run_blocking(move || create_archive(&checkout, toolchain.as_ref())),
            )
            .await?
        };

        let publish = if ctx.publish_eligible() {
            log.run(
                ReleaseStage::Publish,
                publish_release(runner, ctx, &checkout, &archive),
            )
            .await?
        } else {
            log.skip(ReleaseStage::Publish, ctx.publish().reason());
            PublishOutcome::Skipped {
                decision: ctx.publish(),
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            tag = %checkout.version_tag(),
            archive = %archive.path.display(),
            duration_ms,
            "Release pipeline completed"
        );

        Ok(PipelineResult {
            version_tag: checkout.version_tag().to_string(),
            probe,
            checkout,
            toolchain,
            archive,
            publish,
            stages: log.into_results(),
            duration_ms,
        })
    }
}

impl PipelineResult {
    /// Number of stages that ran to completion.
    pub fn completed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.completed()).count()
    }

    /// Number of stages that were skipped.
    pub fn skipped_count(&self) -> usize {
        self.stages.len() - self.completed_count()
    }
}
