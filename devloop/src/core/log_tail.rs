//! Reduction of raw build logs to the tail that explains a failure.

use std::sync::LazyLock;

use regex::Regex;

/// Default number of lines kept from the end of a reduced log.
pub const DEFAULT_TAIL_LINES: usize = 100;

/// Lines longer than this are collapsed when they report a missing version.
const LONG_LINE_CHARS: usize = 400;
/// Characters kept from each end of a collapsed line.
const LONG_LINE_KEEP: usize = 150;

/// Build-step markers: BuildKit (`#11 [7/8] RUN ...`) and classic (`Step 7/8 : RUN ...`).
static STEP_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:#\d+ \[[ \d]+/[ \d]+\]|Step \d+/\d+ :)").expect("valid step marker regex")
});
static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ansi regex"));

const NOISE_MARKERS: [&str; 2] = ["Requirement already satisfied", "Using cached"];
const MISSING_VERSION_MARKER: &str = "could not find a version that satisfies";

/// Reduce `log` to at most `max_lines` relevant lines.
///
/// Starts at the last build-step marker (or the whole log if none exists),
/// strips ANSI escapes, drops noise lines, and collapses over-long
/// missing-version lines to a head/tail excerpt.
pub fn reduce_log(log: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines
        .iter()
        .rposition(|line| STEP_MARKER_RE.is_match(&strip_ansi(line)))
        .unwrap_or(0);

    let kept: Vec<String> = lines[start..]
        .iter()
        .map(|line| strip_ansi(line))
        .filter(|line| !is_noise(line))
        .map(|line| collapse_long_line(&line))
        .collect();

    let skip = kept.len().saturating_sub(max_lines);
    kept[skip..].join("\n").trim().to_string()
}

fn strip_ansi(line: &str) -> String {
    ANSI_RE.replace_all(line, "").into_owned()
}

fn is_noise(line: &str) -> bool {
    NOISE_MARKERS.iter().any(|marker| line.contains(marker))
}

fn collapse_long_line(line: &str) -> String {
    let char_count = line.chars().count();
    if char_count <= LONG_LINE_CHARS || !line.to_lowercase().contains(MISSING_VERSION_MARKER) {
        return line.to_string();
    }
    let head: String = line.chars().take(LONG_LINE_KEEP).collect();
    let tail: String = line.chars().skip(char_count - LONG_LINE_KEEP).collect();
    format!("{head} ... {tail}")
}
