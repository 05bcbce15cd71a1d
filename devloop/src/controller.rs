//! Iteration controller: the state machine driving strategies through
//! generate, build, classify, and repair until one succeeds.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::agents::AgentContext;
use crate::agents::classifier::classify_error;
use crate::agents::companion::generate_companion;
use crate::agents::enumerator::enumerate_strategies;
use crate::agents::generator::{
    generate_initial, implement_solution, patch_manifest, patch_os_packages, propose_service_name,
};
use crate::agents::repair::choose_solution;
use crate::core::session::Session;
use crate::core::strategy::strategy_dir_name;
use crate::core::types::{ArtifactKind, ArtifactSet, BuildOutcome, ClassifiedError, IssueKind, Strategy};
use crate::io::artifact_store::{ArtifactHandle, ArtifactStore};
use crate::io::attempt_log::{
    AttemptMeta, AttemptPaths, AttemptWriteRequest, RepairMeta, artifact_digest, write_attempt,
    write_repair,
};
use crate::io::build::{BuildRequest, BuildSystem, derive_outcome, push_with_retry};
use crate::io::config::DevloopConfig;
use crate::io::paths::RunPaths;
use crate::io::registry::{PackageRegistry, clean_manifest};

/// How one strategy ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// Built, published, and its companion published too.
    Succeeded {
        version: u32,
        dir: PathBuf,
        companion_dir: PathBuf,
    },
    /// Every build in the iteration budget failed.
    Exhausted { iterations: u32 },
    /// A build reported no error but was never published.
    Ambiguous { version: u32 },
    /// The service built but its companion could not be produced or published.
    CompanionFailed { version: u32, reason: String },
}

impl StrategyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StrategyOutcome::Succeeded { .. } => "succeeded",
            StrategyOutcome::Exhausted { .. } => "exhausted",
            StrategyOutcome::Ambiguous { .. } => "ambiguous",
            StrategyOutcome::CompanionFailed { .. } => "companion_failed",
        }
    }
}

/// How the whole run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded {
        service: String,
        strategy: Strategy,
        version: u32,
        dir: PathBuf,
        companion_dir: PathBuf,
    },
    AllStrategiesExhausted {
        service: String,
        attempts: Vec<(Strategy, StrategyOutcome)>,
    },
}

enum State {
    Generate,
    Build(ArtifactHandle),
    Classify {
        handle: ArtifactHandle,
        excerpt: String,
    },
    Repair {
        handle: ArtifactHandle,
        error: ClassifiedError,
    },
    Publish(ArtifactHandle),
}

pub struct Controller<'a> {
    config: &'a DevloopConfig,
    paths: RunPaths,
    agents: AgentContext<'a>,
    build: &'a dyn BuildSystem,
    registry: &'a dyn PackageRegistry,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: &'a DevloopConfig,
        root: &Path,
        agents: AgentContext<'a>,
        build: &'a dyn BuildSystem,
        registry: &'a dyn PackageRegistry,
    ) -> Self {
        Self {
            config,
            paths: RunPaths::new(root),
            agents,
            build,
            registry,
        }
    }

    /// Name the service, enumerate strategies, and try them in rank order.
    ///
    /// Transport failures (oracle or build push) abort the run with an error;
    /// every other failure is recovered by advancing to the next strategy.
    pub fn run(&self) -> Result<RunOutcome> {
        let service = propose_service_name(&self.agents)?;
        let strategies =
            enumerate_strategies(&self.agents, &self.config.strategy_rules(), self.registry)?;
        self.run_with_strategies(&service, &strategies)
    }

    #[instrument(skip(self, strategies), fields(strategies = strategies.len()))]
    pub fn run_with_strategies(&self, service: &str, strategies: &[Strategy]) -> Result<RunOutcome> {
        let store = ArtifactStore::new(self.paths.service_dir(service));
        let mut attempts = Vec::new();

        for (index, strategy) in strategies.iter().enumerate() {
            info!(index, %strategy, "starting strategy");
            let outcome = self.run_strategy(&store, service, index, strategy)?;
            info!(index, %strategy, outcome = outcome.label(), "strategy finished");
            if let StrategyOutcome::Succeeded {
                version,
                dir,
                companion_dir,
            } = outcome
            {
                self.log_usage();
                return Ok(RunOutcome::Succeeded {
                    service: service.to_string(),
                    strategy: strategy.clone(),
                    version,
                    dir,
                    companion_dir,
                });
            }
            attempts.push((strategy.clone(), outcome));
        }

        warn!(tried = attempts.len(), "all strategies exhausted");
        self.log_usage();
        Ok(RunOutcome::AllStrategiesExhausted {
            service: service.to_string(),
            attempts,
        })
    }

    fn run_strategy(
        &self,
        store: &ArtifactStore,
        service: &str,
        index: usize,
        strategy: &Strategy,
    ) -> Result<StrategyOutcome> {
        let strategy_dir = strategy_dir_name(index, strategy);
        let budget = self.config.iteration_budget();
        let mut session = Session::new(strategy.clone());
        let mut state = State::Generate;

        loop {
            state = match state {
                State::Generate => {
                    let handle = store.create(&strategy_dir, session.version())?;
                    let files =
                        generate_initial(&self.agents, strategy, &self.config.build.base_image)?;
                    store.write_all(&handle, &self.prepare(files))?;
                    State::Build(handle)
                }
                State::Build(handle) => {
                    let iteration = session.begin_iteration();
                    match self.build_attempt(store, service, &session, &handle, iteration)? {
                        BuildOutcome::Success => State::Publish(handle),
                        BuildOutcome::Ambiguous => {
                            warn!(version = handle.version(), "build outcome is ambiguous");
                            return Ok(StrategyOutcome::Ambiguous {
                                version: handle.version(),
                            });
                        }
                        BuildOutcome::Failed { .. } if iteration >= budget => {
                            warn!(iteration, budget, "iteration budget exhausted");
                            return Ok(StrategyOutcome::Exhausted {
                                iterations: iteration,
                            });
                        }
                        BuildOutcome::Failed { excerpt } => State::Classify { handle, excerpt },
                    }
                }
                State::Classify { handle, excerpt } => {
                    let error =
                        classify_error(&self.agents, &excerpt, self.config.summary_max_chars)?;
                    State::Repair { handle, error }
                }
                State::Repair { handle, error } => {
                    State::Build(self.repair(store, service, &mut session, &handle, &error)?)
                }
                State::Publish(handle) => {
                    return self.publish(store, service, &handle);
                }
            };
        }
    }

    /// Submit one version and write its attempt log.
    fn build_attempt(
        &self,
        store: &ArtifactStore,
        service: &str,
        session: &Session,
        handle: &ArtifactHandle,
        iteration: u32,
    ) -> Result<BuildOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let files = store.read_all(handle)?;
        let image = image_name(service);
        let request = BuildRequest {
            name: &image,
            dir: handle.path(),
        };
        info!(
            version = handle.version(),
            iteration,
            dir = %handle.path().display(),
            "building"
        );

        let report = push_with_retry(
            self.build,
            &request,
            self.config.build.push_retries,
            self.config.build.push_backoff(),
        )?;
        let outcome = derive_outcome(self.build, &image, &report, self.config.tail_lines)?;

        let meta = AttemptMeta {
            service: service.to_string(),
            strategy: session.strategy().packages.clone(),
            strategy_dir: handle.strategy_dir().to_string(),
            version: handle.version(),
            iteration,
            outcome: outcome.label().to_string(),
            artifact_digest: artifact_digest(&files),
            started_at: started_at.to_rfc3339(),
            ended_at: Utc::now().to_rfc3339(),
            duration_ms: u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let excerpt = match &outcome {
            BuildOutcome::Failed { excerpt } => Some(excerpt.as_str()),
            _ => None,
        };
        write_attempt(
            &self.attempt_paths(service, handle),
            &AttemptWriteRequest {
                meta: &meta,
                build_log: &report.log,
                excerpt,
            },
        )?;
        Ok(outcome)
    }

    /// Produce the next version from `handle` with a patch for `error`.
    ///
    /// The new version starts as a copy of the current one and only the
    /// patched files are overwritten.
    fn repair(
        &self,
        store: &ArtifactStore,
        service: &str,
        session: &mut Session,
        handle: &ArtifactHandle,
        error: &ClassifiedError,
    ) -> Result<ArtifactHandle> {
        let files = store.read_all(handle)?;
        let base_image = &self.config.build.base_image;
        let (patch, solution, seen_before) = match error.kind {
            IssueKind::OsPackage => (
                patch_os_packages(&self.agents, error, &files, base_image)?,
                "install the missing OS packages".to_string(),
                false,
            ),
            IssueKind::LanguagePackage => (
                patch_manifest(&self.agents, error, &files)?,
                "fix the dependency manifest".to_string(),
                false,
            ),
            IssueKind::Code => {
                let decision = choose_solution(&self.agents, session, error, &files)?;
                let patch = implement_solution(&self.agents, error, &decision.solution, &files)?;
                (patch, decision.solution.description, decision.seen_before)
            }
        };
        let patch = self.prepare(patch);

        let next = store.create(handle.strategy_dir(), session.advance_version())?;
        store.copy_forward(handle, &next)?;
        store.write_all(&next, &patch)?;

        let files_changed: Vec<String> = patch
            .iter()
            .filter(|(name, content)| files.get(*name) != Some(*content))
            .map(|(name, _)| name.clone())
            .collect();
        info!(
            from = handle.version(),
            to = next.version(),
            kind = %error.kind,
            ?files_changed,
            "created next version"
        );
        write_repair(
            &self.attempt_paths(service, handle),
            &RepairMeta {
                issue: error.kind,
                error_summary: error.record.summary.clone(),
                solution,
                seen_before,
                files_changed,
            },
        )?;
        Ok(next)
    }

    /// Generate and publish the companion of a successful version.
    fn publish(
        &self,
        store: &ArtifactStore,
        service: &str,
        handle: &ArtifactHandle,
    ) -> Result<StrategyOutcome> {
        let version = handle.version();
        let files = store.read_all(handle)?;
        let Some(companion) =
            generate_companion(&self.agents, &files, &self.config.build.base_image)?
        else {
            return Ok(companion_failed(version, "no companion app was produced"));
        };

        let companion_handle = store.create_companion(handle.strategy_dir(), version)?;
        store.write_all(&companion_handle, &companion)?;
        let dir = companion_handle.path().to_path_buf();

        let image = format!("{}-companion", image_name(service));
        let request = BuildRequest {
            name: &image,
            dir: &dir,
        };
        let report = match self.build.build(&request) {
            Ok(report) => report,
            Err(err) => return Ok(companion_failed(version, &err.to_string())),
        };
        if !report.succeeded {
            return Ok(companion_failed(version, "companion build failed"));
        }
        match self.build.is_published(&image) {
            Ok(true) => {}
            Ok(false) => return Ok(companion_failed(version, "companion was not published")),
            Err(err) => return Ok(companion_failed(version, &format!("{err:#}"))),
        }

        info!(version, companion = %dir.display(), "strategy succeeded");
        Ok(StrategyOutcome::Succeeded {
            version,
            dir: handle.path().to_path_buf(),
            companion_dir: dir,
        })
    }

    /// Clean the manifest of a full set or a patch before it is written.
    fn prepare(&self, mut files: ArtifactSet) -> ArtifactSet {
        if let Some(manifest) = files.get_mut(ArtifactKind::Manifest.file_name()) {
            let tool_ids: Vec<&str> = self
                .config
                .packages
                .tools
                .iter()
                .map(|tool| tool.id.as_str())
                .collect();
            *manifest = clean_manifest(
                manifest,
                &self.config.packages.base_requirements,
                &tool_ids,
                self.registry,
            );
        }
        files
    }

    fn attempt_paths(&self, service: &str, handle: &ArtifactHandle) -> AttemptPaths {
        AttemptPaths::new(self.paths.attempt_log_dir(
            service,
            handle.strategy_dir(),
            handle.version(),
        ))
    }

    fn log_usage(&self) {
        let usage = self.agents.oracle().usage();
        info!(
            calls = usage.calls,
            prompt_chars = usage.prompt_chars,
            generation_chars = usage.generation_chars,
            estimated_tokens = usage.estimated_tokens(),
            "oracle usage"
        );
    }
}

/// Build-system name of a service (image references are lowercase).
pub fn image_name(service: &str) -> String {
    service.to_lowercase()
}

fn companion_failed(version: u32, reason: &str) -> StrategyOutcome {
    warn!(version, reason, "companion step failed");
    StrategyOutcome::CompanionFailed {
        version,
        reason: reason.to_string(),
    }
}
