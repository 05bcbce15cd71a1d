//! Per-attempt forensic logs under `.devloop/logs/<service>/<strategy>/v<N>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::types::{ArtifactSet, IssueKind};

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta {
    pub service: String,
    pub strategy: Vec<String>,
    pub strategy_dir: String,
    pub version: u32,
    pub iteration: u32,
    pub outcome: String,
    /// SHA-256 over the artifact set, see [`artifact_digest`].
    pub artifact_digest: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

/// What one repair round decided.
#[derive(Debug, Clone, Serialize)]
pub struct RepairMeta {
    pub issue: IssueKind,
    pub error_summary: String,
    pub solution: String,
    pub seen_before: bool,
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub build_log_path: PathBuf,
    pub excerpt_path: PathBuf,
    pub repair_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            meta_path: dir.join("meta.json"),
            build_log_path: dir.join("build.log"),
            excerpt_path: dir.join("excerpt.log"),
            repair_path: dir.join("repair.json"),
            dir,
        }
    }
}

pub struct AttemptWriteRequest<'a> {
    pub meta: &'a AttemptMeta,
    pub build_log: &'a str,
    pub excerpt: Option<&'a str>,
}

/// Write the build record of one attempt.
pub fn write_attempt(paths: &AttemptPaths, request: &AttemptWriteRequest<'_>) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
    write_text(&paths.build_log_path, request.build_log)?;
    if let Some(excerpt) = request.excerpt {
        write_text(&paths.excerpt_path, excerpt)?;
    }
    write_json(&paths.meta_path, request.meta)
}

/// Record the repair decided after a failed attempt.
pub fn write_repair(paths: &AttemptPaths, repair: &RepairMeta) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
    write_json(&paths.repair_path, repair)
}

/// Stable digest of an artifact set: names and contents in name order.
pub fn artifact_digest(files: &ArtifactSet) -> String {
    let mut hasher = Sha256::new();
    for (name, content) in files {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
