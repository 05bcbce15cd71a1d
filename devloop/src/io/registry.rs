//! Package registry boundary and dependency-manifest cleanup.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::manifest::{parse_manifest, parse_requirement};
use crate::io::config::RegistryConfig;

pub trait PackageRegistry {
    /// `Some(true)` if the package (at `version`, when given) exists,
    /// `Some(false)` if it does not, `None` when the registry cannot tell.
    fn exists(&self, name: &str, version: Option<&str>) -> Option<bool>;

    fn latest_version(&self, name: &str) -> Option<String>;
}

/// Registry backed by the PyPI JSON API.
#[derive(Debug, Clone)]
pub struct PypiRegistry {
    client: Client,
    index_url: String,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    info: ProjectInfoBody,
}

#[derive(Debug, Deserialize)]
struct ProjectInfoBody {
    version: String,
}

impl PypiRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build registry http client")?;
        Ok(Self {
            client,
            index_url: config.index_url.trim_end_matches('/').to_string(),
        })
    }

    fn project_url(&self, name: &str, version: Option<&str>) -> String {
        match version {
            Some(version) => format!("{}/{name}/{version}/json", self.index_url),
            None => format!("{}/{name}/json", self.index_url),
        }
    }
}

impl PackageRegistry for PypiRegistry {
    #[instrument(skip(self))]
    fn exists(&self, name: &str, version: Option<&str>) -> Option<bool> {
        let response = match self.client.get(self.project_url(name, version)).send() {
            Ok(response) => response,
            Err(err) => {
                warn!(err = %err, "registry lookup failed");
                return None;
            }
        };
        match response.status() {
            StatusCode::OK => Some(true),
            StatusCode::NOT_FOUND => Some(false),
            status => {
                warn!(%status, "unexpected registry status");
                None
            }
        }
    }

    #[instrument(skip(self))]
    fn latest_version(&self, name: &str) -> Option<String> {
        let response = self.client.get(self.project_url(name, None)).send().ok()?;
        if !response.status().is_success() {
            return None;
        }
        match response.json::<ProjectInfo>() {
            Ok(project) => Some(project.info.version),
            Err(err) => {
                warn!(err = %err, "malformed registry project info");
                None
            }
        }
    }
}

/// Rewrite a dependency manifest so every line can be installed.
///
/// Base requirements come first, verbatim. Tool identifiers and packages the
/// registry reports missing are dropped, and a pin on a version that does not
/// exist becomes `name~=<latest>`. Packages the registry cannot answer for are
/// kept as written.
pub fn clean_manifest(
    content: &str,
    base_requirements: &[String],
    tool_ids: &[&str],
    registry: &dyn PackageRegistry,
) -> String {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut lines: Vec<String> = Vec::new();

    for base in base_requirements {
        if let Some(req) = parse_requirement(base)
            && seen.insert(req.name)
        {
            lines.push(req.line);
        }
    }

    for req in parse_manifest(content) {
        if tool_ids.contains(&req.name.as_str()) || seen.contains(&req.name) {
            continue;
        }
        match registry.exists(&req.name, None) {
            Some(false) => {
                debug!(package = %req.name, "dropping unknown package");
                continue;
            }
            None => lines.push(req.line.clone()),
            Some(true) => match req.version.as_deref() {
                Some(version) if registry.exists(&req.name, Some(version)) == Some(false) => {
                    match registry.latest_version(&req.name) {
                        Some(latest) => {
                            debug!(package = %req.name, version, %latest, "replacing missing pin");
                            lines.push(format!("{}~={latest}", req.name));
                        }
                        None => {
                            debug!(package = %req.name, version, "dropping unresolvable pin");
                            continue;
                        }
                    }
                }
                _ => lines.push(req.line.clone()),
            },
        }
        seen.insert(req.name);
    }

    let mut cleaned = lines.join("\n");
    cleaned.push('\n');
    cleaned
}
