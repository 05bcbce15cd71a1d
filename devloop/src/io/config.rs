//! Loop configuration stored in `devloop.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::strategy::{StrategyRules, ToolCapability};

/// Default config file name, resolved relative to the working directory.
pub const CONFIG_FILE_NAME: &str = "devloop.toml";

/// Build-repair loop configuration (TOML).
///
/// Every field has a default so a partial file (or no file at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevloopConfig {
    /// Strategies kept after brainstorm post-processing.
    pub max_strategies: usize,

    /// Packages kept per strategy.
    pub max_packages_per_strategy: usize,

    /// Build attempts per strategy before it is abandoned.
    pub max_iterations: u32,

    /// Lines kept from the end of a failed build log.
    pub tail_lines: usize,

    /// Upper bound on the characters of one error summary.
    pub summary_max_chars: usize,

    /// When false, every strategy gets exactly one build attempt.
    pub self_healing: bool,

    pub oracle: OracleConfig,
    pub build: BuildConfig,
    pub registry: RegistryConfig,
    pub packages: PackagesConfig,
}

impl Default for DevloopConfig {
    fn default() -> Self {
        Self {
            max_strategies: 5,
            max_packages_per_strategy: 3,
            max_iterations: 10,
            tail_lines: 100,
            summary_max_chars: 2000,
            self_healing: true,
            oracle: OracleConfig::default(),
            build: BuildConfig::default(),
            registry: RegistryConfig::default(),
            packages: PackagesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// OpenAI-compatible chat-completions URL.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub temperature: f32,
    /// Maximum silence between two streamed chunks.
    pub stall_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Retries of a whole call after a transient failure.
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            stall_timeout_secs: 60,
            connect_timeout_secs: 30,
            max_retries: 10,
            retry_backoff_secs: 10,
        }
    }
}

impl OracleConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build-and-push argv. `{name}` and `{dir}` are substituted.
    pub command: Vec<String>,
    /// Argv whose exit status answers "is `{name}` publicly resolvable?".
    pub publish_check: Vec<String>,
    /// Base image of the rendered build-environment file.
    pub base_image: String,
    pub timeout_secs: u64,
    /// Build output beyond this many bytes is dropped from the front.
    pub output_limit_bytes: usize,
    /// Retries of a push after a transport failure.
    pub push_retries: u32,
    pub push_backoff_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: ["docker", "build", "--progress=plain", "-t", "{name}", "{dir}"]
                .map(String::from)
                .to_vec(),
            publish_check: ["docker", "image", "inspect", "{name}"]
                .map(String::from)
                .to_vec(),
            base_image: "python:3.11-slim".to_string(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 2_000_000,
            push_retries: 3,
            push_backoff_secs: 5,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn push_backoff(&self) -> Duration {
        Duration::from_secs(self.push_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base of the PyPI JSON API (`<index_url>/<name>[/<version>]/json`).
    pub index_url: String,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            index_url: "https://pypi.org/pypi".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackagesConfig {
    /// A strategy using any of these is dropped.
    pub blacklisted: Vec<String>,
    /// Removed from strategies without dropping them.
    pub unnecessary: Vec<String>,
    /// Always present at the top of the manifest.
    pub base_requirements: Vec<String>,
    pub tools: Vec<ToolCapability>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            blacklisted: strings(&[
                "moderngl",
                "pyopengl",
                "pyglet",
                "pythreejs",
                "panda3d",
                "tika",
            ]),
            unnecessary: strings(&["fastapi", "uvicorn", "starlette"]),
            base_requirements: strings(&["jina==3.15.1.dev14", "docarray==0.21.0"]),
            tools: vec![
                ToolCapability {
                    id: "gpt_3_5_turbo".to_string(),
                    replaces: strings(&[
                        "allennlp",
                        "bertopic",
                        "fasttext",
                        "flair",
                        "gensim",
                        "nltk",
                        "pattern",
                        "polyglot",
                        "pytorch-transformers",
                        "rasa",
                        "sentence-transformers",
                        "spacy",
                        "stanza",
                        "summarizer",
                        "sumy",
                        "textblob",
                        "textstat",
                        "transformers",
                    ]),
                },
                ToolCapability {
                    id: "google_custom_search".to_string(),
                    replaces: strings(&[
                        "google",
                        "googlesearch-python",
                        "google-api-python-client",
                        "serpapi",
                        "duckduckgo-search",
                    ]),
                },
            ],
        }
    }
}

impl DevloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_strategies == 0 {
            return Err(anyhow!("max_strategies must be > 0"));
        }
        if self.max_packages_per_strategy == 0 {
            return Err(anyhow!("max_packages_per_strategy must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.tail_lines == 0 {
            return Err(anyhow!("tail_lines must be > 0"));
        }
        if self.summary_max_chars == 0 {
            return Err(anyhow!("summary_max_chars must be > 0"));
        }
        if self.oracle.endpoint.trim().is_empty() {
            return Err(anyhow!("oracle.endpoint must not be empty"));
        }
        if self.oracle.stall_timeout_secs == 0 {
            return Err(anyhow!("oracle.stall_timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            return Err(anyhow!("oracle.temperature must be within 0.0..=2.0"));
        }
        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            return Err(anyhow!("build.command must be a non-empty array"));
        }
        if self.build.publish_check.is_empty() || self.build.publish_check[0].trim().is_empty() {
            return Err(anyhow!("build.publish_check must be a non-empty array"));
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.build.output_limit_bytes == 0 {
            return Err(anyhow!("build.output_limit_bytes must be > 0"));
        }
        if let Some(tool) = self.packages.tools.iter().find(|t| t.id.trim().is_empty()) {
            return Err(anyhow!(
                "packages.tools entry replacing {:?} has an empty id",
                tool.replaces
            ));
        }
        Ok(())
    }

    /// Iteration budget per strategy, honoring `self_healing`.
    pub fn iteration_budget(&self) -> u32 {
        if self.self_healing {
            self.max_iterations
        } else {
            1
        }
    }

    pub fn strategy_rules(&self) -> StrategyRules<'_> {
        StrategyRules {
            tools: &self.packages.tools,
            blacklisted: &self.packages.blacklisted,
            unnecessary: &self.packages.unnecessary,
            max_strategies: self.max_strategies,
            max_packages: self.max_packages_per_strategy,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DevloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<DevloopConfig> {
    if !path.exists() {
        let cfg = DevloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DevloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DevloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
