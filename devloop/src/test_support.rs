//! Test doubles for the oracle, build system, and package registry.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;

use crate::core::extract::wrap_file;
use crate::core::types::{ArtifactKind, ArtifactSet, Message};
use crate::io::build::{BuildError, BuildReport, BuildRequest, BuildSystem};
use crate::io::oracle::{Oracle, OracleError, OracleSession, RetryPolicy};
use crate::io::registry::PackageRegistry;

struct Rule {
    needle: String,
    responses: VecDeque<String>,
}

#[derive(Default)]
struct ScriptState {
    rules: Vec<Rule>,
    calls: Vec<Vec<Message>>,
    matched: Vec<String>,
}

/// Oracle answering by substring match on the last message of each call.
///
/// Rules are tried in registration order. A rule registered with
/// [`ScriptedOracle::on_sequence`] hands out its responses in order and keeps
/// repeating the last one. A call no rule matches is rejected.
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, needle: &str, response: &str) {
        self.on_sequence(needle, &[response.to_string()]);
    }

    pub fn on_sequence(&self, needle: &str, responses: &[String]) {
        self.state.borrow_mut().rules.push(Rule {
            needle: needle.to_string(),
            responses: responses.iter().cloned().collect(),
        });
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.state.borrow().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.borrow().calls.len()
    }

    /// Number of calls answered by the rule registered for `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.state
            .borrow()
            .matched
            .iter()
            .filter(|matched| *matched == needle)
            .count()
    }

    /// Needle of the rule that answered each call, in call order.
    pub fn matched_needles(&self) -> Vec<String> {
        self.state.borrow().matched.clone()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, messages: &[Message]) -> Result<String, OracleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(messages.to_vec());
        let last = messages.last().map_or("", |m| m.content.as_str());
        let Some(rule) = state
            .rules
            .iter_mut()
            .find(|rule| last.contains(&rule.needle))
        else {
            return Err(OracleError::Rejected(format!(
                "no scripted answer for: {}",
                last.lines().next().unwrap_or_default()
            )));
        };
        let response = if rule.responses.len() > 1 {
            rule.responses.pop_front().unwrap_or_default()
        } else {
            rule.responses.front().cloned().unwrap_or_default()
        };
        let needle = rule.needle.clone();
        state.matched.push(needle);
        Ok(response)
    }
}

/// Oracle session over `oracle` with no retries or backoff.
pub fn session(oracle: &ScriptedOracle) -> OracleSession {
    OracleSession::new(
        Box::new(oracle.clone()),
        RetryPolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
        },
    )
}

/// `content` formatted the way the oracle is asked to label a file.
pub fn labeled(file_name: &str, content: &str) -> String {
    let tag = match ArtifactKind::from_file_name(file_name) {
        Some(kind) => kind.fence_tag(),
        None if file_name.ends_with(".json") => "json",
        None if file_name.ends_with(".py") => "python",
        None => "",
    };
    wrap_file(file_name, tag, content)
}

/// Build request as seen by [`ScriptedBuildSystem`].
#[derive(Debug, Clone)]
pub struct RecordedBuild {
    pub name: String,
    pub dir: PathBuf,
    /// Top-level files of `dir` at build time.
    pub files: ArtifactSet,
}

#[derive(Default)]
struct BuildState {
    results: VecDeque<Result<BuildReport, BuildError>>,
    published: VecDeque<bool>,
    last_succeeded: bool,
    requests: Vec<RecordedBuild>,
    published_checks: Vec<String>,
}

/// Build system replaying queued results.
///
/// Once the build queue is empty every build succeeds. Publication answers
/// come from their own queue and otherwise mirror the last build.
#[derive(Clone, Default)]
pub struct ScriptedBuildSystem {
    state: Rc<RefCell<BuildState>>,
}

impl ScriptedBuildSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, log: &str) {
        self.push_result(Ok(BuildReport {
            succeeded: false,
            log: log.to_string(),
        }));
    }

    pub fn succeed(&self) {
        self.push_result(Ok(BuildReport {
            succeeded: true,
            log: "build ok".to_string(),
        }));
    }

    pub fn push_result(&self, result: Result<BuildReport, BuildError>) {
        self.state.borrow_mut().results.push_back(result);
    }

    pub fn publish_answer(&self, published: bool) {
        self.state.borrow_mut().published.push_back(published);
    }

    pub fn requests(&self) -> Vec<RecordedBuild> {
        self.state.borrow().requests.clone()
    }

    pub fn published_checks(&self) -> Vec<String> {
        self.state.borrow().published_checks.clone()
    }
}

impl BuildSystem for ScriptedBuildSystem {
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildReport, BuildError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(RecordedBuild {
            name: request.name.to_string(),
            dir: request.dir.to_path_buf(),
            files: snapshot(request.dir),
        });
        let result = state.results.pop_front().unwrap_or_else(|| {
            Ok(BuildReport {
                succeeded: true,
                log: "build ok".to_string(),
            })
        });
        if let Ok(report) = &result {
            state.last_succeeded = report.succeeded;
        }
        result
    }

    fn is_published(&self, name: &str) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.published_checks.push(name.to_string());
        let last = state.last_succeeded;
        Ok(state.published.pop_front().unwrap_or(last))
    }
}

fn snapshot(dir: &std::path::Path) -> ArtifactSet {
    let mut files = ArtifactSet::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let (Some(name), Ok(content)) = (
            path.file_name().and_then(|n| n.to_str()),
            fs::read_to_string(&path),
        ) {
            files.insert(name.to_string(), content);
        }
    }
    files
}

/// Registry knowing a fixed set of packages, every version of each.
#[derive(Debug, Clone, Default)]
pub struct FakeRegistry {
    known: BTreeSet<String>,
    all_known: bool,
}

impl FakeRegistry {
    pub fn with_packages(names: &[&str]) -> Self {
        Self {
            known: names.iter().map(|name| name.to_lowercase()).collect(),
            all_known: false,
        }
    }

    /// Registry that claims every package exists.
    pub fn permissive() -> Self {
        Self {
            known: BTreeSet::new(),
            all_known: true,
        }
    }
}

impl PackageRegistry for FakeRegistry {
    fn exists(&self, name: &str, _version: Option<&str>) -> Option<bool> {
        Some(self.all_known || self.known.contains(&name.to_lowercase()))
    }

    fn latest_version(&self, name: &str) -> Option<String> {
        self.exists(name, None)
            .filter(|known| *known)
            .map(|_| "1.0.0".to_string())
    }
}
