//! Error classifier: summarize a reduced build log and decide what kind of
//! issue it reports.

use anyhow::Result;
use minijinja::context;
use tracing::{debug, info, instrument};

use crate::agents::AgentContext;
use crate::core::heuristics::dependency_verdict;
use crate::core::types::{ClassifiedError, ErrorRecord, IssueKind, PackageManager};
use crate::io::prompt::Template;

const VERDICT_FILE: &str = "response.json";
const VERDICT_KEY: &str = "dependency_installation_failure";

/// Package managers in the order they are checked.
const CHECK_ORDER: [PackageManager; 2] = [PackageManager::Os, PackageManager::Language];

/// Summarize and classify `excerpt`, the reduced tail of a failed build.
#[instrument(skip_all, fields(excerpt_lines = excerpt.lines().count()))]
pub fn classify_error(
    ctx: &AgentContext<'_>,
    excerpt: &str,
    summary_max_chars: usize,
) -> Result<ClassifiedError> {
    let record = summarize(ctx, excerpt, summary_max_chars)?;
    let kind = classify_record(ctx, &record, excerpt)?;
    info!(%kind, summary = %record.summary, "classified build error");
    Ok(ClassifiedError {
        record,
        kind,
        excerpt: excerpt.to_string(),
    })
}

fn summarize(ctx: &AgentContext<'_>, excerpt: &str, max_chars: usize) -> Result<ErrorRecord> {
    let prompt = ctx.render(Template::SummarizeError, context! { excerpt => excerpt })?;
    let summary = ctx.ask_text("summarize_error", &prompt)?;
    let source = if summary.trim().is_empty() {
        excerpt
    } else {
        summary.as_str()
    };
    Ok(ErrorRecord::new(source, max_chars))
}

/// OS packages are checked before language packages; both negative means
/// the code itself is at fault.
fn classify_record(
    ctx: &AgentContext<'_>,
    record: &ErrorRecord,
    excerpt: &str,
) -> Result<IssueKind> {
    let evidence = format!("{}\n{}", record.summary, excerpt);
    for manager in CHECK_ORDER {
        if is_dependency_issue(ctx, record, &evidence, manager)? {
            return Ok(IssueKind::for_package_manager(manager));
        }
    }
    Ok(IssueKind::Code)
}

fn is_dependency_issue(
    ctx: &AgentContext<'_>,
    record: &ErrorRecord,
    evidence: &str,
    manager: PackageManager,
) -> Result<bool> {
    if let Some(verdict) = dependency_verdict(evidence, manager) {
        debug!(manager = manager.display_name(), verdict, "settled by heuristics");
        return Ok(verdict);
    }
    let prompt = ctx.render(
        Template::DependencyCheck,
        context! { summary => &record.summary, manager => manager.display_name() },
    )?;
    ctx.ask_verdict(
        &format!("dependency_check:{}", manager.display_name()),
        &prompt,
        VERDICT_FILE,
        VERDICT_KEY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskSpec;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{ScriptedOracle, labeled, session};

    fn task() -> TaskSpec {
        TaskSpec {
            task: "resize images".to_string(),
            test: None,
        }
    }

    fn yes() -> String {
        labeled("response.json", r#"{"dependency_installation_failure": "yes"}"#)
    }

    fn no() -> String {
        labeled("response.json", r#"{"dependency_installation_failure": "no"}"#)
    }

    #[test]
    fn assertion_error_is_code_even_if_oracle_says_dependency() {
        let oracle = ScriptedOracle::new();
        oracle.on("Summarize the following build error", "AssertionError in test_resize line 4");
        oracle.on("dependency_installation_failure", &yes());
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");

        let classified =
            classify_error(&ctx, "#9 [5/5] RUN pytest\nE AssertionError", 2000).expect("classify");
        assert_eq!(classified.kind, IssueKind::Code);
        assert_eq!(oracle.calls_matching("dependency_installation_failure"), 0);
    }

    #[test]
    fn module_not_found_is_settled_without_oracle() {
        let oracle = ScriptedOracle::new();
        oracle.on(
            "Summarize the following build error",
            "test_microservice.py line 1: ModuleNotFoundError: No module named 'pkgA'",
        );
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");

        let classified = classify_error(
            &ctx,
            "#9 [5/5] RUN pytest\nModuleNotFoundError: No module named 'pkgA'",
            2000,
        )
        .expect("classify");
        assert_eq!(classified.kind, IssueKind::LanguagePackage);
        assert_eq!(oracle.call_count(), 1);
    }

    #[test]
    fn oracle_is_asked_os_first_then_language() {
        let oracle = ScriptedOracle::new();
        oracle.on("Summarize the following build error", "E: Unable to locate package libfoo");
        oracle.on("failed `apt-get` installation", &no());
        oracle.on("failed `pip` installation", &yes());
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");

        let classified = classify_error(&ctx, "E: Unable to locate package libfoo", 2000)
            .expect("classify");
        assert_eq!(classified.kind, IssueKind::LanguagePackage);
        let labels = oracle.matched_needles();
        assert_eq!(
            labels,
            vec![
                "Summarize the following build error",
                "failed `apt-get` installation",
                "failed `pip` installation",
            ]
        );
    }

    #[test]
    fn both_negative_means_code() {
        let oracle = ScriptedOracle::new();
        oracle.on("Summarize the following build error", "TypeError: bad operand");
        oracle.on("dependency_installation_failure", &no());
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");

        let classified = classify_error(&ctx, "TypeError: bad operand", 30).expect("classify");
        assert_eq!(classified.kind, IssueKind::Code);
        assert!(classified.record.summary.chars().count() <= 30);
    }
}
