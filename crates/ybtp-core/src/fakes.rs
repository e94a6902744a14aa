//! In-process fakes for the capability traits (testing only)
//!
//! Provides `ScriptedRunner` and `MemoryDownloader`, which record every call
//! so tests can assert on what did or did not reach the outside world.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::download::Downloader;
use crate::error::{ReleaseError, Result};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

type Effect = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

struct Rule {
    prefix: Vec<String>,
    output: CommandOutput,
    effect: Option<Effect>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        let argv: Vec<&str> = spec.argv().collect();
        argv.len() >= self.prefix.len() && self.prefix.iter().zip(&argv).all(|(p, a)| p.as_str() == *a)
    }
}

/// Command runner answering from a list of argv-prefix rules.
///
/// The first rule whose words prefix the invocation wins. Unmatched
/// commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer invocations starting with `prefix` with `output`.
    pub fn on(mut self, prefix: &[&str], output: CommandOutput) -> Self {
        self.rules.push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
            effect: None,
        });
        self
    }

    /// Like [`ScriptedRunner::on`], additionally running `effect` first.
    pub fn on_with<F>(mut self, prefix: &[&str], output: CommandOutput, effect: F) -> Self
    where
        F: Fn(&CommandSpec) + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
            effect: Some(Arc::new(effect)),
        });
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations whose argv starts with `prefix`.
    pub fn calls_matching(&self, prefix: &[&str]) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| {
                let argv: Vec<&str> = spec.argv().collect();
                argv.len() >= prefix.len() && prefix.iter().zip(&argv).all(|(p, a)| p == a)
            })
            .collect()
    }

    pub fn was_called(&self, prefix: &[&str]) -> bool {
        !self.calls_matching(prefix).is_empty()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        match self.rules.iter().find(|rule| rule.matches(spec)) {
            Some(rule) => {
                if let Some(effect) = &rule.effect {
                    effect(spec);
                }
                Ok(rule.output.clone())
            }
            None => Ok(CommandOutput::ok("")),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryDownloader
// ---------------------------------------------------------------------------

/// Downloader serving fixed bodies from a `HashMap<url, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryDownloader {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn body(&self, url: &str) -> Result<&Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies.get(url).ok_or_else(|| ReleaseError::Download {
            url: url.to_string(),
            message: "HTTP 404 Not Found".to_string(),
        })
    }
}

#[async_trait]
impl Downloader for MemoryDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let body = self.body(url)?;
        std::fs::write(dest, body)?;
        Ok(body.len() as u64)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let body = self.body(url)?;
        Ok(String::from_utf8_lossy(body).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Build a gzipped tarball in memory holding `files` (relative path, contents).
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

// ---------------------------------------------------------------------------
// CapturedLog
// ---------------------------------------------------------------------------

/// In-memory log sink for `tracing_subscriber` writers.
#[derive(Clone, Default)]
pub struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn text(&self) -> String {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl std::io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
