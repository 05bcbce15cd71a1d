//! Repair strategy generator: pick a fix that is not a rerun of an earlier one.

use anyhow::Result;
use minijinja::context;
use tracing::{debug, info, instrument};

use crate::agents::AgentContext;
use crate::core::answers::parse_solutions;
use crate::core::extract::files_to_string;
use crate::core::session::Session;
use crate::core::types::{ArtifactKind, ArtifactSet, ClassifiedError, IssueKind, SolutionRecord};
use crate::io::prompt::Template;

/// Candidate fixes requested per round.
const SOLUTION_COUNT: usize = 3;

const SOLUTIONS_FILE: &str = "solutions.json";
const SEEN_FILE: &str = "was_error_seen_before.json";
const SEEN_KEY: &str = "was_error_seen_before";
const DIFFERENT_FILE: &str = "will_lead_to_different_actions.json";
const DIFFERENT_KEY: &str = "will_lead_to_different_actions";

/// Accepted fix for one repair round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairDecision {
    pub solution: SolutionRecord,
    /// Whether the error was judged a repeat of an earlier one.
    pub seen_before: bool,
}

/// Choose a fix for `error` and record it in the session history.
#[instrument(skip_all, fields(kind = %error.kind, history = session.previous_errors().len()))]
pub fn choose_solution(
    ctx: &AgentContext<'_>,
    session: &mut Session,
    error: &ClassifiedError,
    files: &ArtifactSet,
) -> Result<RepairDecision> {
    let candidates = suggest_solutions(ctx, error, files)?;
    let seen_before = !session.previous_errors().is_empty() && was_seen_before(ctx, session, error)?;

    let accepted = if seen_before {
        first_untried(ctx, session, &candidates)?
    } else {
        candidates.first().map(|text| SolutionRecord {
            description: text.clone(),
            rank: Some(1),
        })
    };
    let solution = accepted.unwrap_or_else(|| generic_solution(error));

    info!(
        seen_before,
        rank = ?solution.rank,
        solution = %solution.description,
        "accepted solution"
    );
    session.record(error.record.clone(), solution.clone());
    Ok(RepairDecision {
        solution,
        seen_before,
    })
}

fn suggest_solutions(
    ctx: &AgentContext<'_>,
    error: &ClassifiedError,
    files: &ArtifactSet,
) -> Result<Vec<String>> {
    let exclude_build_env = error.kind == IssueKind::Code;
    let shown: &[ArtifactKind] = if exclude_build_env {
        &[
            ArtifactKind::Implementation,
            ArtifactKind::Test,
            ArtifactKind::Manifest,
        ]
    } else {
        &ArtifactKind::ALL
    };
    let prompt = ctx.render(
        Template::SuggestSolutions,
        context! {
            summary => &error.record.summary,
            files => files_to_string(files, Some(shown)),
            exclude_build_env => exclude_build_env,
            count => SOLUTION_COUNT,
        },
    )?;
    let candidates = ctx
        .ask_file("suggest_solutions", &prompt, SOLUTIONS_FILE)?
        .into_option()
        .and_then(|raw| parse_solutions(&raw))
        .unwrap_or_default();
    debug!(candidates = candidates.len(), "solution candidates");
    Ok(candidates)
}

fn was_seen_before(
    ctx: &AgentContext<'_>,
    session: &Session,
    error: &ClassifiedError,
) -> Result<bool> {
    let previous: Vec<&str> = session
        .previous_errors()
        .iter()
        .map(|e| e.summary.as_str())
        .collect();
    let prompt = ctx.render(
        Template::ErrorSeenBefore,
        context! { previous_errors => previous, summary => &error.record.summary },
    )?;
    ctx.ask_verdict("error_seen_before", &prompt, SEEN_FILE, SEEN_KEY)
}

/// Walk candidates in rank order and accept the first whose adoption would
/// change something compared to every earlier solution.
fn first_untried(
    ctx: &AgentContext<'_>,
    session: &Session,
    candidates: &[String],
) -> Result<Option<SolutionRecord>> {
    let previous: Vec<&str> = session
        .previous_solutions()
        .iter()
        .map(|s| s.description.as_str())
        .collect();
    for (idx, candidate) in candidates.iter().enumerate() {
        let prompt = ctx.render(
            Template::SolutionTriedBefore,
            context! { previous_solutions => &previous, candidate => candidate },
        )?;
        if ctx.ask_verdict("solution_tried_before", &prompt, DIFFERENT_FILE, DIFFERENT_KEY)? {
            return Ok(Some(SolutionRecord {
                description: candidate.clone(),
                rank: Some(idx + 1),
            }));
        }
        debug!(rank = idx + 1, "candidate already tried");
    }
    Ok(None)
}

fn generic_solution(error: &ClassifiedError) -> SolutionRecord {
    SolutionRecord {
        description: format!("solve error: {}", error.record.summary),
        rank: None,
    }
}
