//! Oracle-backed components of the build-repair loop.
//!
//! Every agent talks to the oracle through one [`AgentContext`], which owns
//! the task's system prompt and the re-prompt policy for unparseable answers.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::answers::parse_verdict;
use crate::core::extract::{Extracted, extract_files};
use crate::core::types::{ArtifactKind, ArtifactSet, Message, TaskSpec};
use crate::io::oracle::OracleSession;
use crate::io::prompt::{PromptEngine, Template};

pub mod classifier;
pub mod companion;
pub mod enumerator;
pub mod generator;
pub mod repair;

/// Shared handle every agent uses to reach the oracle.
pub struct AgentContext<'a> {
    oracle: &'a OracleSession,
    prompts: &'a PromptEngine,
    system: String,
}

impl<'a> AgentContext<'a> {
    pub fn new(oracle: &'a OracleSession, prompts: &'a PromptEngine, task: &TaskSpec) -> Result<Self> {
        let system = prompts.render(Template::System, task)?;
        Ok(Self {
            oracle,
            prompts,
            system,
        })
    }

    pub fn oracle(&self) -> &OracleSession {
        self.oracle
    }

    pub fn render<S: Serialize>(&self, template: Template, ctx: S) -> Result<String> {
        self.prompts.render(template, ctx)
    }

    /// Ask a free-text question and return the raw answer.
    pub fn ask_text(&self, label: &str, user: &str) -> Result<String> {
        Ok(self.oracle.ask(label, &self.system, user)?)
    }

    /// Ask for the files in `file_names` and extract whichever are present.
    ///
    /// If nothing could be extracted, the oracle is re-prompted once with its
    /// own answer and the exact expected format; a second failure yields an
    /// empty set.
    pub fn ask_files(&self, label: &str, user: &str, file_names: &[&str]) -> Result<ArtifactSet> {
        let mut messages = vec![Message::system(&self.system), Message::user(user)];
        let answer = self.oracle.chat(label, &messages)?;
        let files = extract_files(&answer, file_names);
        if !files.is_empty() {
            return Ok(files);
        }

        warn!(label, ?file_names, "nothing extracted, re-prompting once");
        let tags: Vec<&str> = file_names.iter().map(|name| fence_tag(name)).collect();
        let reformat = self.render(
            Template::Reformat,
            minijinja::context! { previous => &answer, file_names => file_names, tags => tags },
        )?;
        messages.push(Message::assistant(answer));
        messages.push(Message::user(reformat));
        let retry = self.oracle.chat(&format!("{label}:reformat"), &messages)?;
        let files = extract_files(&retry, file_names);
        if files.is_empty() {
            warn!(label, "extraction failed after re-prompt");
        }
        Ok(files)
    }

    /// Ask for a single file.
    pub fn ask_file(&self, label: &str, user: &str, file_name: &str) -> Result<Extracted> {
        let mut files = self.ask_files(label, user, &[file_name])?;
        Ok(files
            .remove(file_name)
            .map_or(Extracted::Empty, Extracted::Parsed))
    }

    /// Ask a yes/no question answered as `{"<key>": "yes" | "no"}` in `file_name`.
    ///
    /// A missing or invalid answer counts as "no".
    pub fn ask_verdict(&self, label: &str, user: &str, file_name: &str, key: &str) -> Result<bool> {
        let verdict = self
            .ask_file(label, user, file_name)?
            .into_option()
            .and_then(|raw| parse_verdict(&raw, key));
        debug!(label, ?verdict, "oracle verdict");
        Ok(verdict.unwrap_or(false))
    }
}

fn fence_tag(file_name: &str) -> &'static str {
    if let Some(kind) = ArtifactKind::from_file_name(file_name) {
        return kind.fence_tag();
    }
    if file_name.ends_with(".json") {
        "json"
    } else if file_name.ends_with(".py") {
        "python"
    } else {
        ""
    }
}
