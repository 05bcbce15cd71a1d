//! Extraction of named files from free-form oracle responses.
//!
//! The convention is a bolded label line holding the file name, immediately
//! followed by a fenced block:
//!
//! ````text
//! **requirements.txt**
//! ```
//! requests~=2.31
//! ```
//! ````
//!
//! The closing fence must sit at the start of a line, so fences embedded in
//! generated code are not mistaken for the terminator. Nothing here fails on
//! malformed input: callers get [`Extracted::Empty`] and decide whether to
//! re-prompt.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ArtifactKind, ArtifactSet};

static SINGLE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:\w+\n)?([\s\S]*?)```").expect("valid block regex"));

/// Outcome of extracting one file from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Parsed(String),
    Empty,
}

impl Extracted {
    pub fn is_empty(&self) -> bool {
        matches!(self, Extracted::Empty)
    }

    pub fn into_option(self) -> Option<String> {
        match self {
            Extracted::Parsed(content) => Some(content),
            Extracted::Empty => None,
        }
    }

    fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Extracted::Empty
        } else {
            Extracted::Parsed(trimmed.to_string())
        }
    }
}

/// Extract the content labeled `file_name`.
///
/// When several labeled blocks exist the last one wins. With
/// `match_single_block`, a response holding exactly one fenced block and no
/// label is accepted as the answer.
pub fn extract_file(text: &str, file_name: &str, match_single_block: bool) -> Extracted {
    let pattern = format!(
        r"(?:\*|\*\*| ){}\*?\*?[ \t]*\n```(?:\w+\n)?([\s\S]*?)\n```",
        regex::escape(file_name)
    );
    // The escaped file name cannot produce an invalid pattern.
    let Ok(labeled) = Regex::new(&pattern) else {
        return Extracted::Empty;
    };
    if let Some(last) = labeled.captures_iter(text).last() {
        return Extracted::from_raw(last.get(1).map_or("", |m| m.as_str()));
    }
    if match_single_block {
        let blocks: Vec<_> = SINGLE_BLOCK_RE.captures_iter(text).collect();
        if let [only] = blocks.as_slice() {
            return Extracted::from_raw(only.get(1).map_or("", |m| m.as_str()));
        }
    }
    Extracted::Empty
}

/// Extract every requested file that is present.
///
/// The single-block fallback only applies when exactly one file is requested.
pub fn extract_files(text: &str, file_names: &[&str]) -> ArtifactSet {
    let single = file_names.len() == 1;
    file_names
        .iter()
        .filter_map(|name| {
            extract_file(text, name, single)
                .into_option()
                .map(|content| ((*name).to_string(), content))
        })
        .collect()
}

/// Wrap one file in the label + fence convention.
pub fn wrap_file(file_name: &str, tag: &str, content: &str) -> String {
    format!("**{file_name}**\n```{tag}\n{content}\n```")
}

/// Serialize files for prompt context: known artifact kinds first, in canonical
/// order, then any remaining files by name.
pub fn files_to_string(files: &ArtifactSet, restrict: Option<&[ArtifactKind]>) -> String {
    let mut blocks = Vec::new();
    for kind in ArtifactKind::ALL {
        if restrict.is_some_and(|allowed| !allowed.contains(&kind)) {
            continue;
        }
        if let Some(content) = files.get(kind.file_name()) {
            blocks.push(wrap_file(kind.file_name(), kind.fence_tag(), content));
        }
    }
    if restrict.is_none() {
        for (name, content) in files {
            if ArtifactKind::from_file_name(name).is_none() {
                blocks.push(wrap_file(name, "", content));
            }
        }
    }
    blocks.join("\n\n")
}
