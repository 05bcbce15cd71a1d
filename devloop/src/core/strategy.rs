//! Deterministic post-processing of brainstormed strategies.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::Strategy;

static INVALID_PATH_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid path regex"));

/// A first-class tool that stands in for a family of packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Identifier placed in strategies (never checked against the registry).
    pub id: String,
    /// Package names this tool replaces.
    pub replaces: Vec<String>,
}

/// Filtering rules applied to every brainstorm.
#[derive(Debug, Clone, Copy)]
pub struct StrategyRules<'a> {
    pub tools: &'a [ToolCapability],
    /// A strategy containing any of these is dropped entirely.
    pub blacklisted: &'a [String],
    /// Removed from strategies that keep going without them.
    pub unnecessary: &'a [String],
    pub max_strategies: usize,
    pub max_packages: usize,
}

impl StrategyRules<'_> {
    pub fn is_tool(&self, package: &str) -> bool {
        self.tools.iter().any(|tool| tool.id == package)
    }

    fn replace_with_tool(&self, package: String) -> String {
        self.tools
            .iter()
            .find(|tool| tool.replaces.iter().any(|name| *name == package))
            .map_or(package, |tool| tool.id.clone())
    }
}

/// Filter, rewrite, and de-duplicate `strategies` while preserving their rank.
///
/// `resolves` answers whether a non-tool package exists in the registry.
/// Applying this function to its own output yields the same list.
pub fn refine_strategies(
    strategies: Vec<Strategy>,
    rules: &StrategyRules<'_>,
    mut resolves: impl FnMut(&str) -> bool,
) -> Vec<Strategy> {
    let mut seen_sets: BTreeSet<BTreeSet<String>> = BTreeSet::new();
    let mut refined = Vec::new();

    for strategy in strategies {
        let mut packages: Vec<String> = Vec::new();
        for raw in strategy.packages {
            let name = raw.trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            let name = rules.replace_with_tool(name);
            if !packages.contains(&name) {
                packages.push(name);
            }
        }

        if packages
            .iter()
            .any(|pkg| rules.blacklisted.iter().any(|blocked| blocked == pkg))
        {
            continue;
        }

        packages.retain(|pkg| !rules.unnecessary.iter().any(|skip| skip == pkg));
        packages.retain(|pkg| rules.is_tool(pkg) || resolves(pkg));
        packages.truncate(rules.max_packages);

        let set: BTreeSet<String> = packages.iter().cloned().collect();
        if !seen_sets.insert(set) {
            continue;
        }
        refined.push(Strategy { packages });
        if refined.len() == rules.max_strategies {
            break;
        }
    }

    refined
}

/// Directory name for the strategy at `index` in the ranked list.
///
/// The same strategy always maps to the same name; characters that are
/// invalid in paths are removed.
pub fn strategy_dir_name(index: usize, strategy: &Strategy) -> String {
    let joined = strategy.packages.join("_").replace(' ', "_").to_lowercase();
    let cleaned = INVALID_PATH_CHARS_RE.replace_all(&joined, "");
    if cleaned.is_empty() {
        format!("{index}_plain")
    } else {
        format!("{index}_{cleaned}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules<'a>(
        tools: &'a [ToolCapability],
        blacklisted: &'a [String],
        unnecessary: &'a [String],
    ) -> StrategyRules<'a> {
        StrategyRules {
            tools,
            blacklisted,
            unnecessary,
            max_strategies: 5,
            max_packages: 3,
        }
    }

    fn tools() -> Vec<ToolCapability> {
        vec![ToolCapability {
            id: "gpt_3_5_turbo".to_string(),
            replaces: vec!["nltk".to_string(), "spacy".to_string()],
        }]
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn packages(list: &[Strategy]) -> Vec<Vec<&str>> {
        list.iter()
            .map(|s| s.packages.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn deduplicates_package_sets_ignoring_order() {
        let tools = tools();
        let input = vec![Strategy::new(["a", "b"]), Strategy::new(["b", "a"])];
        let out = refine_strategies(input, &rules(&tools, &[], &[]), |_| true);
        assert_eq!(packages(&out), vec![vec!["a", "b"]]);
    }

    #[test]
    fn replaces_language_packages_with_tool_and_collapses() {
        let tools = tools();
        let input = vec![Strategy::new(["NLTK ", "spacy", "requests"])];
        let out = refine_strategies(input, &rules(&tools, &[], &[]), |_| true);
        assert_eq!(packages(&out), vec![vec!["gpt_3_5_turbo", "requests"]]);
    }

    #[test]
    fn blacklisted_package_drops_whole_strategy() {
        let tools = tools();
        let blacklisted = strings(&["pyglet"]);
        let input = vec![
            Strategy::new(["numpy", "pyglet"]),
            Strategy::new(["pillow"]),
        ];
        let out = refine_strategies(input, &rules(&tools, &blacklisted, &[]), |_| true);
        assert_eq!(packages(&out), vec![vec!["pillow"]]);
    }

    #[test]
    fn unnecessary_packages_are_removed_but_strategy_survives() {
        let tools = tools();
        let unnecessary = strings(&["fastapi", "uvicorn"]);
        let input = vec![Strategy::new(["fastapi", "pillow", "uvicorn"])];
        let out = refine_strategies(input, &rules(&tools, &[], &unnecessary), |_| true);
        assert_eq!(packages(&out), vec![vec!["pillow"]]);
    }

    #[test]
    fn unresolvable_packages_are_dropped_except_tools() {
        let tools = tools();
        let input = vec![Strategy::new(["nltk", "base64", "pillow"])];
        let out = refine_strategies(input, &rules(&tools, &[], &[]), |pkg| pkg != "base64");
        assert_eq!(packages(&out), vec![vec!["gpt_3_5_turbo", "pillow"]]);
    }

    #[test]
    fn preserves_rank_and_truncates() {
        let tools = tools();
        let mut rules = rules(&tools, &[], &[]);
        rules.max_strategies = 2;
        let input = vec![
            Strategy::new(["c"]),
            Strategy::new(["a"]),
            Strategy::new(["b"]),
        ];
        let out = refine_strategies(input, &rules, |_| true);
        assert_eq!(packages(&out), vec![vec!["c"], vec!["a"]]);
    }

    #[test]
    fn caps_packages_per_strategy() {
        let tools = tools();
        let mut rules = rules(&tools, &[], &[]);
        rules.max_packages = 2;
        let out = refine_strategies(vec![Strategy::new(["a", "b", "c"])], &rules, |_| true);
        assert_eq!(packages(&out), vec![vec!["a", "b"]]);
    }

    #[test]
    fn filtering_is_idempotent() {
        let tools = tools();
        let blacklisted = strings(&["tika"]);
        let unnecessary = strings(&["starlette"]);
        let rules = rules(&tools, &blacklisted, &unnecessary);
        let resolves = |pkg: &str| pkg != "nonexistent";
        let input = vec![
            Strategy::new(["spacy", "starlette", "requests"]),
            Strategy::new(["tika"]),
            Strategy::new(["requests", "gpt_3_5_turbo"]),
            Strategy::new(["nonexistent"]),
            Strategy::new(Vec::<String>::new()),
        ];
        let once = refine_strategies(input, &rules, resolves);
        let twice = refine_strategies(once.clone(), &rules, resolves);
        assert_eq!(once, twice);
        assert_eq!(
            packages(&once),
            vec![vec!["gpt_3_5_turbo", "requests"], Vec::<&str>::new()]
        );
    }

    #[test]
    fn dir_name_is_deterministic_and_path_safe() {
        let strategy = Strategy::new(["Pillow", "py/opencv", "a b"]);
        assert_eq!(strategy_dir_name(2, &strategy), "2_pillow_pyopencv_a_b");
        assert_eq!(
            strategy_dir_name(2, &strategy),
            strategy_dir_name(2, &strategy.clone())
        );
        assert_eq!(strategy_dir_name(0, &Strategy::new(Vec::<String>::new())), "0_plain");
    }
}
