//! Error taxonomy for the release stages.
//!
//! Every variant is fatal to the pipeline. The grouping mirrors how failures
//! are reported: configuration problems, integrity violations, failed
//! external commands, and unexpected on-disk state.

use std::path::PathBuf;

/// Release pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    // -- configuration ------------------------------------------------------
    #[error("could not determine the remote origin URL of {0}")]
    MissingOriginUrl(PathBuf),

    #[error("invalid toolchain URL in {path}: {url:?} (expected https://...tar.gz)")]
    InvalidToolchainUrl { path: PathBuf, url: String },

    #[error("{tool} version {version} is known to be broken and is not allowed")]
    BlockedToolVersion { tool: String, version: String },

    #[error("required tool {tool} is not usable: {message}")]
    ToolMissing { tool: String, message: String },

    // -- integrity ----------------------------------------------------------
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("published checksum for {url} is not a SHA-256 digest: {body:?}")]
    InvalidPublishedChecksum { url: String, body: String },

    // -- external commands --------------------------------------------------
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("http client error: {0}")]
    Http(String),

    // -- environment / state ------------------------------------------------
    #[error("toolchain install directory missing after installation: {0}")]
    InstallDirMissing(PathBuf),

    #[error("checkout destination already exists: {0}")]
    CheckoutExists(PathBuf),

    #[error("unexpected layout in archive {archive}: {message}")]
    UnexpectedArchiveLayout { archive: PathBuf, message: String },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReleaseError {
    /// Process exit code for this failure.
    ///
    /// A failed external command surfaces its own exit code; everything else
    /// exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReleaseError::CommandFailed { exit_code, .. } if (1..=255).contains(exit_code) => {
                *exit_code
            }
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for ReleaseError {
    fn from(err: reqwest::Error) -> Self {
        match err.url() {
            Some(url) => ReleaseError::Download {
                url: url.to_string(),
                message: err.to_string(),
            },
            None => ReleaseError::Http(err.to_string()),
        }
    }
}

/// Result type for release stage operations.
pub type Result<T> = std::result::Result<T, ReleaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_keeps_exit_code() {
        let err = ReleaseError::CommandFailed {
            command: "./build_thirdparty.sh".to_string(),
            exit_code: 2,
            stderr: String::new(),
        };
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("exited with code 2"));
    }

    #[test]
    fn test_signal_terminated_command_exits_one() {
        let err = ReleaseError::CommandFailed {
            command: "hub".to_string(),
            exit_code: -1,
            stderr: String::new(),
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = ReleaseError::ChecksumMismatch {
            url: "https://example.com/brew.tar.gz".to_string(),
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected abc"));
        assert!(msg.contains("got def"));
        assert_eq!(err.exit_code(), 1);
    }
}
