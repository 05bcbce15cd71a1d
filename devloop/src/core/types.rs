//! Shared deterministic types for the build-repair loop.
//!
//! These types define stable contracts between components. They must not
//! depend on external state or I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical file name -> text content for one (strategy, version) pair.
pub type ArtifactSet = BTreeMap<String, String>;

/// Role of one turn in an oracle conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged turn of an oracle conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The files every artifact set is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Implementation,
    Test,
    Manifest,
    BuildEnv,
}

impl ArtifactKind {
    /// Serialization order used whenever files are shown to the oracle.
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Implementation,
        ArtifactKind::Test,
        ArtifactKind::Manifest,
        ArtifactKind::BuildEnv,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Implementation => "microservice.py",
            ArtifactKind::Test => "test_microservice.py",
            ArtifactKind::Manifest => "requirements.txt",
            ArtifactKind::BuildEnv => "Dockerfile",
        }
    }

    /// Language tag written after the opening fence.
    pub fn fence_tag(self) -> &'static str {
        match self {
            ArtifactKind::Implementation | ArtifactKind::Test => "python",
            ArtifactKind::Manifest => "",
            ArtifactKind::BuildEnv => "dockerfile",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_name() == name)
    }
}

/// Package manager a dependency failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    /// OS-level packages installed into the build environment (`apt-get`).
    Os,
    /// Language packages listed in the manifest (`pip`).
    Language,
}

impl PackageManager {
    pub fn display_name(self) -> &'static str {
        match self {
            PackageManager::Os => "apt-get",
            PackageManager::Language => "pip",
        }
    }
}

/// Classification of a failed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    OsPackage,
    LanguagePackage,
    Code,
}

impl IssueKind {
    pub fn for_package_manager(manager: PackageManager) -> Self {
        match manager {
            PackageManager::Os => IssueKind::OsPackage,
            PackageManager::Language => IssueKind::LanguagePackage,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueKind::OsPackage => "os-package",
            IssueKind::LanguagePackage => "language-package",
            IssueKind::Code => "code",
        };
        f.write_str(label)
    }
}

/// Ordered dependency identifiers chosen for one implementation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub packages: Vec<String>,
}

impl Strategy {
    pub fn new<S: Into<String>>(packages: impl IntoIterator<Item = S>) -> Self {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == package)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.packages.join(", "))
    }
}

/// Natural-language task the generated service must solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task: String,
    /// Scenario the generated test must cover.
    pub test: Option<String>,
}

/// Length-bounded summary of one failed build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub summary: String,
}

impl ErrorRecord {
    /// Normalize whitespace and bound the summary to `max_chars` characters.
    pub fn new(summary: &str, max_chars: usize) -> Self {
        let normalized = summary.split_whitespace().collect::<Vec<_>>().join(" ");
        let bounded = match normalized.char_indices().nth(max_chars) {
            Some((idx, _)) => normalized[..idx].to_string(),
            None => normalized,
        };
        Self { summary: bounded }
    }
}

/// Natural-language description of an accepted fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub description: String,
    /// 1-based rank among the candidates of its round; `None` for the generic fallback.
    pub rank: Option<usize>,
}

/// A reduced, summarized, classified build failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub record: ErrorRecord,
    pub kind: IssueKind,
    /// Reduced log tail the summary was derived from.
    pub excerpt: String,
}

/// Result of submitting one artifact set to the build system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    /// Build failed with a non-empty reduced error tail.
    Failed { excerpt: String },
    /// No error text was extracted but publication was never confirmed.
    Ambiguous,
}

impl BuildOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BuildOutcome::Success => "success",
            BuildOutcome::Failed { .. } => "failed",
            BuildOutcome::Ambiguous => "ambiguous",
        }
    }
}
