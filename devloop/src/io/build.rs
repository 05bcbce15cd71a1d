//! Build system boundary: submit an artifact set, read back a log, and confirm
//! publication.

use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::log_tail::reduce_log;
use crate::core::types::BuildOutcome;
use crate::io::config::BuildConfig;
use crate::io::process::run_command_with_timeout;

/// One artifact set to build and publish under `name`.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub name: &'a str,
    pub dir: &'a Path,
}

/// Raw result of a build the build system actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub succeeded: bool,
    pub log: String,
}

/// Failure to reach the build system at all. A failing build is a
/// [`BuildReport`], never a `BuildError`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build transport failure: {0}")]
    Transport(String),
}

pub trait BuildSystem {
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildReport, BuildError>;

    /// Whether an artifact named `name` is publicly resolvable.
    fn is_published(&self, name: &str) -> Result<bool>;
}

/// Build system driven by configured command lines.
#[derive(Debug, Clone)]
pub struct CommandBuildSystem {
    config: BuildConfig,
}

impl CommandBuildSystem {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    fn command(argv: &[String], name: &str, dir: Option<&Path>) -> Result<Command> {
        let dir = dir.map(|d| d.display().to_string()).unwrap_or_default();
        let mut args = argv
            .iter()
            .map(|arg| arg.replace("{name}", name).replace("{dir}", &dir));
        let program = args.next().ok_or_else(|| anyhow!("empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }
}

impl BuildSystem for CommandBuildSystem {
    #[instrument(skip_all, fields(name = request.name))]
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildReport, BuildError> {
        let cmd = Self::command(&self.config.command, request.name, Some(request.dir))
            .map_err(|err| BuildError::Transport(format!("{err:#}")))?;
        let output =
            run_command_with_timeout(cmd, self.config.timeout(), self.config.output_limit_bytes)
                .map_err(|err| BuildError::Transport(format!("{err:#}")))?;
        let succeeded = output.status.success() && !output.timed_out;
        debug!(succeeded, exit_code = ?output.status.code(), "build command finished");
        Ok(BuildReport {
            succeeded,
            log: output.combined_log(),
        })
    }

    #[instrument(skip(self))]
    fn is_published(&self, name: &str) -> Result<bool> {
        let cmd = Self::command(&self.config.publish_check, name, None)?;
        let output = run_command_with_timeout(
            cmd,
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .context("run publish check")?;
        Ok(output.status.success() && !output.timed_out)
    }
}

/// Submit `request`, retrying transport failures only.
///
/// A build that ran and failed is returned immediately.
pub fn push_with_retry(
    build: &dyn BuildSystem,
    request: &BuildRequest<'_>,
    retries: u32,
    backoff: Duration,
) -> Result<BuildReport, BuildError> {
    let mut attempt = 0;
    loop {
        match build.build(request) {
            Ok(report) => return Ok(report),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(attempt, retries, err = %err, "push failed, retrying");
                thread::sleep(backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Reduce a build report to an outcome.
///
/// A failed build with a non-empty reduced tail is a classified failure.
/// Anything else is a success only once the artifact is confirmed published.
/// A publication check that cannot run is a transport failure.
pub fn derive_outcome(
    build: &dyn BuildSystem,
    name: &str,
    report: &BuildReport,
    tail_lines: usize,
) -> Result<BuildOutcome, BuildError> {
    if !report.succeeded {
        let excerpt = reduce_log(&report.log, tail_lines);
        if !excerpt.is_empty() {
            return Ok(BuildOutcome::Failed { excerpt });
        }
    }
    let published = build.is_published(name).map_err(|err| {
        BuildError::Transport(format!("check publication of {name}: {err:#}"))
    })?;
    let outcome = if published {
        BuildOutcome::Success
    } else {
        BuildOutcome::Ambiguous
    };
    info!(name, outcome = outcome.label(), "build outcome");
    Ok(outcome)
}
