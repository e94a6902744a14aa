//! Release stage definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages of a release run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStage {
    /// Host tool and resource checks.
    Probe,

    /// Fresh clone with local edits applied.
    Checkout,

    /// Prebuilt toolchain lookup or installation.
    Toolchain,

    /// `./build_thirdparty.sh`
    Build,

    /// Tarball and checksum side-file.
    Archive,

    /// `hub release create`
    Publish,
}

impl ReleaseStage {
    pub const ALL: [ReleaseStage; 6] = [
        ReleaseStage::Probe,
        ReleaseStage::Checkout,
        ReleaseStage::Toolchain,
        ReleaseStage::Build,
        ReleaseStage::Archive,
        ReleaseStage::Publish,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            ReleaseStage::Probe => "probe",
            ReleaseStage::Checkout => "checkout",
            ReleaseStage::Toolchain => "toolchain",
            ReleaseStage::Build => "build",
            ReleaseStage::Archive => "archive",
            ReleaseStage::Publish => "publish",
        }
    }
}

impl fmt::Display for ReleaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = ReleaseStage::ALL.iter().map(ReleaseStage::name).collect();
        assert_eq!(
            names,
            ["probe", "checkout", "toolchain", "build", "archive", "publish"]
        );
    }

    #[test]
    fn test_stage_order_matches_declaration() {
        let mut sorted = ReleaseStage::ALL;
        sorted.sort();
        assert_eq!(sorted, ReleaseStage::ALL);
        assert!(ReleaseStage::Build < ReleaseStage::Archive);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&ReleaseStage::Toolchain).unwrap();
        assert_eq!(json, "\"toolchain\"");
    }
}
