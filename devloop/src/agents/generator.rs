//! Artifact generation: the first version of a strategy and the patches
//! applied by each repair round.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::Result;
use minijinja::context;
use rand::Rng;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::agents::AgentContext;
use crate::core::answers::parse_packages;
use crate::core::extract::files_to_string;
use crate::core::types::{ArtifactKind, ArtifactSet, ClassifiedError, SolutionRecord, Strategy};
use crate::io::prompt::Template;

pub const FALLBACK_SERVICE_NAME: &str = "GeneratedExecutor";

/// Upper bound (exclusive) of the numeric suffix that keeps names unique.
const NAME_SUFFIX_BOUND: u32 = 10_000_000;

const NAME_FILE: &str = "name.txt";
const OS_PACKAGES_FILE: &str = "apt-get-packages.json";

static APT_INSTALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"apt-get install --no-install-recommends -y ([^&\n]+)")
        .expect("valid apt-get regex")
});

/// Ask the oracle for a service name and make it unique.
pub fn propose_service_name(ctx: &AgentContext<'_>) -> Result<String> {
    let prompt = ctx.render(Template::ServiceName, context! {})?;
    let raw = ctx.ask_file("service_name", &prompt, NAME_FILE)?.into_option();
    let suffix = rand::thread_rng().gen_range(0..NAME_SUFFIX_BOUND);
    let name = service_name_from(raw.as_deref(), suffix);
    info!(%name, "service name");
    Ok(name)
}

/// Strip everything but ASCII alphanumerics from `raw` and append `suffix`.
pub fn service_name_from(raw: Option<&str>, suffix: u32) -> String {
    let cleaned: String = raw
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    let base = if cleaned.is_empty() || cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        FALLBACK_SERVICE_NAME
    } else {
        cleaned.as_str()
    };
    format!("{base}{suffix}")
}

/// Generate version 1 of a strategy: implementation, then test, then
/// manifest, plus a build environment without OS packages.
///
/// Files the oracle failed to produce are left empty so the set stays
/// complete and the build reports what is missing.
#[instrument(skip_all, fields(%strategy))]
pub fn generate_initial(
    ctx: &AgentContext<'_>,
    strategy: &Strategy,
    base_image: &str,
) -> Result<ArtifactSet> {
    let mut files = ArtifactSet::new();

    let implementation = ask_artifact(
        ctx,
        ArtifactKind::Implementation,
        &ctx.render(
            Template::Implementation,
            context! { packages => &strategy.packages },
        )?,
    )?;
    files.insert(ArtifactKind::Implementation.file_name().to_string(), implementation);

    let test = ask_artifact(
        ctx,
        ArtifactKind::Test,
        &ctx.render(
            Template::Test,
            context! { implementation => files_to_string(&files, None) },
        )?,
    )?;
    files.insert(ArtifactKind::Test.file_name().to_string(), test);

    let manifest = ask_artifact(
        ctx,
        ArtifactKind::Manifest,
        &ctx.render(
            Template::Requirements,
            context! { files => files_to_string(&files, None) },
        )?,
    )?;
    files.insert(ArtifactKind::Manifest.file_name().to_string(), manifest);

    files.insert(
        ArtifactKind::BuildEnv.file_name().to_string(),
        render_build_env(ctx, base_image, &[])?,
    );
    Ok(with_trailing_newlines(files))
}

fn ask_artifact(ctx: &AgentContext<'_>, kind: ArtifactKind, prompt: &str) -> Result<String> {
    let content = ctx
        .ask_file(kind.file_name(), prompt, kind.file_name())?
        .into_option();
    if content.is_none() {
        warn!(file = kind.file_name(), "oracle produced no content, leaving file empty");
    }
    Ok(content.unwrap_or_default())
}

/// Render the build-environment file with `os_packages` installed.
pub fn render_build_env(
    ctx: &AgentContext<'_>,
    base_image: &str,
    os_packages: &[String],
) -> Result<String> {
    ctx.render(
        Template::Dockerfile,
        context! { base_image => base_image, packages => os_packages },
    )
}

/// OS packages already installed by a rendered build-environment file.
pub fn installed_os_packages(build_env: &str) -> Vec<String> {
    APT_INSTALL_RE
        .captures(build_env)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Re-render the build environment with the OS packages the oracle names,
/// keeping the ones installed before.
#[instrument(skip_all)]
pub fn patch_os_packages(
    ctx: &AgentContext<'_>,
    error: &ClassifiedError,
    files: &ArtifactSet,
    base_image: &str,
) -> Result<ArtifactSet> {
    let prompt = ctx.render(
        Template::SolveOsDependency,
        context! {
            summary => &error.record.summary,
            files => files_to_string(files, None),
            base_image => base_image,
        },
    )?;
    let Some(requested) = ctx
        .ask_file("solve_os_dependency", &prompt, OS_PACKAGES_FILE)?
        .into_option()
        .and_then(|raw| parse_packages(&raw))
    else {
        warn!("no usable OS package list");
        return Ok(ArtifactSet::new());
    };

    let current = files
        .get(ArtifactKind::BuildEnv.file_name())
        .map(|content| installed_os_packages(content))
        .unwrap_or_default();
    let mut seen = BTreeSet::new();
    let packages: Vec<String> = current
        .into_iter()
        .chain(requested)
        .filter(|pkg| seen.insert(pkg.clone()))
        .collect();
    info!(?packages, "os packages");

    let build_env = render_build_env(ctx, base_image, &packages)?;
    Ok(ArtifactSet::from([(
        ArtifactKind::BuildEnv.file_name().to_string(),
        build_env,
    )]))
}

/// Ask for a corrected dependency manifest.
#[instrument(skip_all)]
pub fn patch_manifest(
    ctx: &AgentContext<'_>,
    error: &ClassifiedError,
    files: &ArtifactSet,
) -> Result<ArtifactSet> {
    let prompt = ctx.render(
        Template::SolveLanguageDependency,
        context! {
            summary => &error.record.summary,
            files => files_to_string(files, None),
        },
    )?;
    let name = ArtifactKind::Manifest.file_name();
    let patch = ctx
        .ask_file("solve_language_dependency", &prompt, name)?
        .into_option()
        .map(|content| ArtifactSet::from([(name.to_string(), content)]))
        .unwrap_or_default();
    Ok(with_trailing_newlines(patch))
}

/// Ask the oracle to implement `solution`. Any of implementation, test, and
/// manifest may come back; the build environment never does.
#[instrument(skip_all, fields(rank = ?solution.rank))]
pub fn implement_solution(
    ctx: &AgentContext<'_>,
    error: &ClassifiedError,
    solution: &SolutionRecord,
    files: &ArtifactSet,
) -> Result<ArtifactSet> {
    let editable = [
        ArtifactKind::Implementation,
        ArtifactKind::Test,
        ArtifactKind::Manifest,
    ];
    let allowed: Vec<&str> = editable.iter().map(|kind| kind.file_name()).collect();
    let prompt = ctx.render(
        Template::ImplementSolution,
        context! {
            summary => &error.record.summary,
            solution => &solution.description,
            files => files_to_string(files, Some(&editable)),
            allowed => &allowed,
        },
    )?;
    let patch = ctx.ask_files("implement_solution", &prompt, &allowed)?;
    info!(files = ?patch.keys().collect::<Vec<_>>(), "solution implemented");
    Ok(with_trailing_newlines(patch))
}

fn with_trailing_newlines(mut files: ArtifactSet) -> ArtifactSet {
    for content in files.values_mut() {
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ErrorRecord, IssueKind, TaskSpec};
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{ScriptedOracle, labeled, session};

    fn task() -> TaskSpec {
        TaskSpec {
            task: "resize images".to_string(),
            test: Some("a 10x10 png becomes 5x5".to_string()),
        }
    }

    fn error(kind: IssueKind) -> ClassifiedError {
        ClassifiedError {
            record: ErrorRecord::new("libGL.so.1: cannot open shared object file", 2000),
            kind,
            excerpt: String::new(),
        }
    }

    #[test]
    fn service_names_are_sanitized_and_suffixed() {
        assert_eq!(
            service_name_from(Some("Image Resize-Executor!"), 42),
            "ImageResizeExecutor42"
        );
        assert_eq!(service_name_from(None, 7), "GeneratedExecutor7");
        assert_eq!(service_name_from(Some("123"), 7), "GeneratedExecutor7");
    }

    #[test]
    fn initial_generation_asks_in_order_and_renders_build_env() {
        let oracle = ScriptedOracle::new();
        oracle.on(
            "Write the implementation file",
            &labeled("microservice.py", "from PIL import Image"),
        );
        oracle.on("Write the test file", &labeled("test_microservice.py", "def test(): pass"));
        oracle.on("Write the dependency manifest", &labeled("requirements.txt", "pillow==10.1.0"));
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");

        let files =
            generate_initial(&ctx, &Strategy::new(["pillow"]), "python:3.11-slim").expect("files");
        assert_eq!(files.len(), 4);
        assert_eq!(files["microservice.py"], "from PIL import Image\n");
        assert_eq!(files["requirements.txt"], "pillow==10.1.0\n");
        assert!(files["Dockerfile"].starts_with("FROM python:3.11-slim"));
        assert!(!files["Dockerfile"].contains("apt-get"));

        assert_eq!(
            oracle.matched_needles(),
            vec![
                "Write the implementation file",
                "Write the test file",
                "Write the dependency manifest",
            ]
        );
        let calls = oracle.calls();
        assert!(calls[0][0].content.contains("a 10x10 png becomes 5x5"));
        assert!(calls[0][1].content.contains("- pillow"));
        assert!(calls[1][1].content.contains("from PIL import Image"));
        assert!(calls[2][1].content.contains("def test(): pass"));
    }

    #[test]
    fn os_patch_merges_with_installed_packages() {
        let oracle = ScriptedOracle::new();
        oracle.on(
            "apt-get-packages.json",
            &labeled("apt-get-packages.json", r#"{"packages": ["libgl1", "ffmpeg"]}"#),
        );
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");
        let current = render_build_env(&ctx, "python:3.11-slim", &["ffmpeg".to_string()])
            .expect("render");
        let files = ArtifactSet::from([("Dockerfile".to_string(), current)]);

        let patch = patch_os_packages(&ctx, &error(IssueKind::OsPackage), &files, "python:3.11-slim")
            .expect("patch");
        assert_eq!(patch.len(), 1);
        assert_eq!(
            installed_os_packages(&patch["Dockerfile"]),
            vec!["ffmpeg".to_string(), "libgl1".to_string()]
        );
    }

    #[test]
    fn code_patch_never_touches_build_env() {
        let oracle = ScriptedOracle::new();
        oracle.on(
            "Implement the following solution",
            &format!(
                "{}\n\n{}",
                labeled("microservice.py", "fixed = True"),
                labeled("Dockerfile", "FROM evil")
            ),
        );
        let session = session(&oracle);
        let prompts = PromptEngine::new();
        let ctx = AgentContext::new(&session, &prompts, &task()).expect("ctx");
        let solution = SolutionRecord {
            description: "set fixed".to_string(),
            rank: Some(1),
        };
        let files = ArtifactSet::from([
            ("microservice.py".to_string(), "fixed = False\n".to_string()),
            ("Dockerfile".to_string(), "FROM python\n".to_string()),
        ]);

        let patch =
            implement_solution(&ctx, &error(IssueKind::Code), &solution, &files).expect("patch");
        assert_eq!(
            patch,
            ArtifactSet::from([("microservice.py".to_string(), "fixed = True\n".to_string())])
        );
        assert!(!oracle.calls()[0][1].content.contains("FROM python"));
    }
}
