//! Strategy enumerator: brainstorm dependency sets, then filter them.

use std::collections::BTreeMap;

use anyhow::Result;
use minijinja::context;
use tracing::{info, instrument, warn};

use crate::agents::AgentContext;
use crate::core::answers::parse_strategies;
use crate::core::strategy::{StrategyRules, refine_strategies};
use crate::core::types::Strategy;
use crate::io::prompt::Template;
use crate::io::registry::PackageRegistry;

const STRATEGIES_FILE: &str = "strategies.json";

/// Ranked, filtered strategies for the task.
///
/// Packages the registry cannot answer for are kept. When nothing survives
/// filtering, a single standard-library strategy is returned so the run
/// still has something to build.
#[instrument(skip_all, fields(max_strategies = rules.max_strategies))]
pub fn enumerate_strategies(
    ctx: &AgentContext<'_>,
    rules: &StrategyRules<'_>,
    registry: &dyn PackageRegistry,
) -> Result<Vec<Strategy>> {
    let prompt = ctx.render(
        Template::Strategies,
        context! {
            max_strategies => rules.max_strategies,
            max_packages => rules.max_packages,
            tools => rules.tools,
        },
    )?;
    let brainstorm = ctx
        .ask_file("strategies", &prompt, STRATEGIES_FILE)?
        .into_option()
        .and_then(|raw| parse_strategies(&raw))
        .unwrap_or_default();

    let mut lookups: BTreeMap<String, bool> = BTreeMap::new();
    let mut strategies = refine_strategies(brainstorm, rules, |package| {
        *lookups
            .entry(package.to_string())
            .or_insert_with(|| registry.exists(package, None) != Some(false))
    });
    if strategies.is_empty() {
        warn!("no strategy survived filtering, falling back to the standard library");
        strategies.push(Strategy::new(Vec::<String>::new()));
    }
    for (rank, strategy) in strategies.iter().enumerate() {
        info!(rank, %strategy, "strategy");
    }
    Ok(strategies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskSpec;
    use crate::io::config::DevloopConfig;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{FakeRegistry, ScriptedOracle, labeled, session};

    fn task() -> TaskSpec {
        TaskSpec {
            task: "summarize a text".to_string(),
            test: None,
        }
    }

    #[test]
    fn brainstorm_is_filtered_and_ranked() {
        let oracle = ScriptedOracle::new();
        oracle.on(
            "strategies.json",
            &labeled(
                "strategies.json",
                r#"[["nltk", "fastapi"], ["pyglet"], ["sumy"], ["doesnotexist", "requests"]]"#,
            ),
        );
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");
        let config = DevloopConfig::default();
        let registry = FakeRegistry::with_packages(&["requests", "fastapi"]);

        let strategies =
            enumerate_strategies(&ctx, &config.strategy_rules(), &registry).expect("strategies");
        assert_eq!(
            strategies,
            vec![
                Strategy::new(["gpt_3_5_turbo"]),
                Strategy::new(["requests"]),
            ]
        );
        let prompt = &oracle.calls()[0][1].content;
        assert!(prompt.contains("`gpt_3_5_turbo`"));
        assert!(prompt.contains("at most 5"));
    }

    #[test]
    fn unusable_brainstorm_falls_back_to_standard_library() {
        let oracle = ScriptedOracle::new();
        oracle.on("could not be parsed", "no idea");
        oracle.on("strategies.json", "no idea");
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");
        let config = DevloopConfig::default();

        let strategies =
            enumerate_strategies(&ctx, &config.strategy_rules(), &FakeRegistry::default())
                .expect("strategies");
        assert_eq!(strategies, vec![Strategy::new(Vec::<String>::new())]);
    }
}
