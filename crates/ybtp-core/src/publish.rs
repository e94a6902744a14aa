//! Release publication through the `hub` CLI.

use serde::Serialize;
use tracing::info;

use crate::archive::Archive;
use crate::checkout::Checkout;
use crate::config::{BuildContext, PublishDecision};
use crate::error::Result;
use crate::exec::{CommandRunner, CommandSpec};

/// What happened at the publish step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PublishOutcome {
    Published { tag: String },
    Skipped { decision: PublishDecision },
}

/// `hub release create` for the archive and its checksum, tagged at the
/// checkout's commit.
pub fn release_command(checkout: &Checkout, archive: &Archive) -> CommandSpec {
    let tag = checkout.version_tag();
    CommandSpec::new(
        "hub",
        [
            "release".to_string(),
            "create".to_string(),
            "-m".to_string(),
            format!("Release {tag}"),
            "-a".to_string(),
            archive.path.to_string_lossy().into_owned(),
            "-a".to_string(),
            archive.checksum_path.to_string_lossy().into_owned(),
            "-t".to_string(),
            checkout.commit_sha.clone(),
            tag.to_string(),
        ],
    )
    .in_dir(&checkout.dir)
}

/// Publish the archive when the context allows it. A skip is not an error.
pub async fn publish_release(
    runner: &dyn CommandRunner,
    ctx: &BuildContext,
    checkout: &Checkout,
    archive: &Archive,
) -> Result<PublishOutcome> {
    let decision = ctx.publish();
    if !decision.is_eligible() {
        info!(reason = decision.reason(), "Skipping release publication");
        return Ok(PublishOutcome::Skipped { decision });
    }

    let spec = release_command(checkout, archive);
    info!(tag = %checkout.version_tag(), "Publishing release");
    runner.run_checked(&spec).await?;

    Ok(PublishOutcome::Published {
        tag: checkout.version_tag().to_string(),
    })
}
