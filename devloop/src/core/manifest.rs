//! Parsing of dependency manifest (`requirements.txt`) lines.

use std::sync::LazyLock;

use regex::Regex;

static VERSION_OP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"==|>=|<=|~=|>|<").expect("valid version operator regex"));

/// One requirement line split into name and optional pinned version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Line as written, trimmed.
    pub line: String,
    pub name: String,
    pub version: Option<String>,
}

/// Parse a single manifest line; blank lines and comments yield `None`.
///
/// Lines with more than one version constraint keep their text but report no
/// version.
pub fn parse_requirement(line: &str) -> Option<Requirement> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let parts: Vec<&str> = VERSION_OP_RE.split(line).collect();
    let (name, version) = match parts.as_slice() {
        [name, version] => (name.trim(), Some(version.trim().to_string())),
        [name, ..] => (name.trim(), None),
        [] => return None,
    };
    if name.is_empty() {
        return None;
    }
    Some(Requirement {
        line: line.to_string(),
        name: name.to_lowercase(),
        version: version.filter(|v| !v.is_empty()),
    })
}

/// Parse every requirement in a manifest.
pub fn parse_manifest(content: &str) -> Vec<Requirement> {
    content.lines().filter_map(parse_requirement).collect()
}
