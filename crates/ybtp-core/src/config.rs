//! Configuration resolution.
//!
//! Environment overrides are read exactly once into [`ConfigOverrides`] and
//! resolved into an immutable [`BuildContext`] that every later stage reads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Substring of the archive-name suffix that selects the prebuilt toolchain.
pub const TOOLCHAIN_VARIANT: &str = "linuxbrew";

/// Environment variable names for every override.
pub mod env {
    pub const ARCHIVE_NAME_SUFFIX: &str = "YB_THIRDPARTY_ARCHIVE_NAME_SUFFIX";
    pub const BUILD_ARGS: &str = "YB_BUILD_THIRDPARTY_ARGS";
    pub const EXTRA_BUILD_ARGS: &str = "YB_BUILD_THIRDPARTY_EXTRA_ARGS";
    pub const TOOLCHAIN_DIR: &str = "YB_LINUXBREW_DIR";
    pub const PULL_REQUEST: &str = "CIRCLE_PULL_REQUEST";
    pub const PUBLISH_TOKEN: &str = "GITHUB_TOKEN";
    pub const DUMP_ENV: &str = "YB_BUILD_THIRDPARTY_DUMP_ENV";
}

/// Host operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Linux,
    MacOs,
}

impl OsFamily {
    /// Family of the host this binary was compiled for.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            OsFamily::MacOs
        } else {
            OsFamily::Linux
        }
    }

    /// Tag used in archive names when no suffix is configured.
    pub fn tag(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::MacOs => "darwin",
        }
    }

    pub fn is_apple(&self) -> bool {
        matches!(self, OsFamily::MacOs)
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Raw, unresolved override values. `None` means the variable was unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub archive_name_suffix: Option<String>,
    pub build_args: Option<String>,
    pub extra_build_args: Option<String>,
    pub toolchain_dir: Option<String>,
    pub pull_request: Option<String>,
    pub publish_token: Option<String>,
    pub dump_env: Option<String>,

    /// Full environment snapshot, captured only when a dump was requested.
    pub environment: Vec<(String, String)>,
}

impl ConfigOverrides {
    /// Read every override from the process environment.
    pub fn from_env() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        Self::from_vars(vars)
    }

    /// Read every override from `vars`, keeping a sorted snapshot of all of
    /// them when the dump variable is among them.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        let mut overrides = Self::from_lookup(|key| vars.get(key).cloned());
        if overrides.dump_env.is_some() {
            overrides.environment = vars.into_iter().collect();
        }
        overrides
    }

    /// Read every override through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            archive_name_suffix: lookup(env::ARCHIVE_NAME_SUFFIX),
            build_args: lookup(env::BUILD_ARGS),
            extra_build_args: lookup(env::EXTRA_BUILD_ARGS),
            toolchain_dir: lookup(env::TOOLCHAIN_DIR),
            pull_request: lookup(env::PULL_REQUEST),
            publish_token: lookup(env::PUBLISH_TOKEN),
            dump_env: lookup(env::DUMP_ENV),
            environment: Vec::new(),
        }
    }
}

/// Whether the archive gets published, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishDecision {
    Publish,
    /// Pull-request builds are informational only.
    SkipPullRequest,
    /// No usable publish credential.
    SkipNoCredential,
}

impl PublishDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, PublishDecision::Publish)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            PublishDecision::Publish => "publish credential available",
            PublishDecision::SkipPullRequest => "pull request build",
            PublishDecision::SkipNoCredential => "publish credential unset or placeholder",
        }
    }
}

/// A credential that is empty or obviously a template value.
pub fn is_placeholder_credential(token: &str) -> bool {
    let token = token.trim();
    token.is_empty() || token.to_ascii_lowercase().contains("githubtoken")
}

/// Environment variables whose values never reach the log.
pub fn is_secret_var(key: &str) -> bool {
    let key = key.to_ascii_uppercase();
    key == env::PUBLISH_TOKEN
        || ["TOKEN", "SECRET", "PASSWORD"]
            .iter()
            .any(|marker| key.contains(marker))
}

/// Copy of `vars` with secret values replaced by `<set>`.
pub fn redact_environment(vars: &[(String, String)]) -> Vec<(String, String)> {
    vars.iter()
        .map(|(key, value)| {
            let value = if is_secret_var(key) {
                "<set>".to_string()
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}

/// Resolved, immutable configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildContext {
    os_family: OsFamily,
    archive_name_suffix: String,
    build_args: Vec<String>,
    extra_build_args: Vec<String>,
    publish: PublishDecision,
    toolchain_dir: Option<PathBuf>,
    dump_env: bool,
    #[serde(skip)]
    environment_dump: Vec<(String, String)>,
}

impl BuildContext {
    /// Apply defaults and decision rules to the raw overrides.
    pub fn resolve(overrides: &ConfigOverrides, os_family: OsFamily) -> Self {
        let value = |v: &Option<String>| v.clone().unwrap_or_default();

        let archive_name_suffix = value(&overrides.archive_name_suffix);
        let build_args_raw = value(&overrides.build_args);
        let extra_build_args_raw = value(&overrides.extra_build_args);
        let toolchain_dir_raw = value(&overrides.toolchain_dir);
        let pull_request = value(&overrides.pull_request);

        info!(
            os = %os_family,
            archive_name_suffix = %archive_name_suffix,
            build_args = %build_args_raw,
            extra_build_args = %extra_build_args_raw,
            toolchain_dir = %toolchain_dir_raw,
            pull_request = %pull_request,
            publish_token_set = overrides.publish_token.is_some(),
            "Resolving build configuration"
        );

        let toolchain_dir = if toolchain_dir_raw.is_empty() {
            None
        } else if os_family.is_apple() || !archive_name_suffix.contains(TOOLCHAIN_VARIANT) {
            info!(
                toolchain_dir = %toolchain_dir_raw,
                "Ignoring toolchain directory override for this OS/archive variant"
            );
            None
        } else {
            Some(PathBuf::from(toolchain_dir_raw))
        };

        let publish = if !pull_request.is_empty() {
            PublishDecision::SkipPullRequest
        } else if overrides
            .publish_token
            .as_deref()
            .map_or(true, is_placeholder_credential)
        {
            PublishDecision::SkipNoCredential
        } else {
            PublishDecision::Publish
        };
        debug!(decision = ?publish, reason = publish.reason(), "Publish decision");

        Self {
            os_family,
            archive_name_suffix,
            build_args: split_args(&build_args_raw),
            extra_build_args: split_args(&extra_build_args_raw),
            publish,
            toolchain_dir,
            dump_env: overrides.dump_env.is_some(),
            environment_dump: redact_environment(&overrides.environment),
        }
    }

    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    pub fn archive_name_suffix(&self) -> &str {
        &self.archive_name_suffix
    }

    /// The archive-name suffix if set, else the OS family tag.
    pub fn effective_suffix(&self) -> &str {
        if self.archive_name_suffix.is_empty() {
            self.os_family.tag()
        } else {
            &self.archive_name_suffix
        }
    }

    pub fn build_args(&self) -> &[String] {
        &self.build_args
    }

    pub fn extra_build_args(&self) -> &[String] {
        &self.extra_build_args
    }

    pub fn publish(&self) -> PublishDecision {
        self.publish
    }

    pub fn publish_eligible(&self) -> bool {
        self.publish.is_eligible()
    }

    /// Toolchain override that survived resolution.
    pub fn toolchain_dir(&self) -> Option<&Path> {
        self.toolchain_dir.as_deref()
    }

    /// Whether this OS/archive combination builds against the prebuilt toolchain.
    pub fn wants_toolchain(&self) -> bool {
        !self.os_family.is_apple() && self.archive_name_suffix.contains(TOOLCHAIN_VARIANT)
    }

    pub fn dump_env(&self) -> bool {
        self.dump_env
    }

    /// Environment snapshot to log when [`dump_env`](Self::dump_env) is set,
    /// with secrets already redacted.
    pub fn environment_dump(&self) -> &[(String, String)] {
        &self.environment_dump
    }
}

/// Split an override on whitespace. Quoting is deliberately not honoured.
fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Filesystem locations that are not environment driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Repository whose working tree is cloned.
    pub repo_dir: PathBuf,

    /// Parent directory of every reproducible checkout.
    pub build_root: PathBuf,

    /// Parent directory of installed toolchains.
    pub toolchain_parent: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("."),
            build_root: PathBuf::from("/opt/yb-build/thirdparty"),
            toolchain_parent: PathBuf::from("/opt/yb-build/brew"),
        }
    }
}
