//! Prompt and build-environment templates rendered with minijinja.

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;

/// Every embedded template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    System,
    ServiceName,
    Strategies,
    Implementation,
    Test,
    Requirements,
    SummarizeError,
    DependencyCheck,
    SolveOsDependency,
    SolveLanguageDependency,
    SuggestSolutions,
    ErrorSeenBefore,
    SolutionTriedBefore,
    ImplementSolution,
    Reformat,
    Companion,
    Dockerfile,
    CompanionDockerfile,
}

impl Template {
    const ALL: [Template; 18] = [
        Template::System,
        Template::ServiceName,
        Template::Strategies,
        Template::Implementation,
        Template::Test,
        Template::Requirements,
        Template::SummarizeError,
        Template::DependencyCheck,
        Template::SolveOsDependency,
        Template::SolveLanguageDependency,
        Template::SuggestSolutions,
        Template::ErrorSeenBefore,
        Template::SolutionTriedBefore,
        Template::ImplementSolution,
        Template::Reformat,
        Template::Companion,
        Template::Dockerfile,
        Template::CompanionDockerfile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Template::System => "system",
            Template::ServiceName => "service_name",
            Template::Strategies => "strategies",
            Template::Implementation => "implementation",
            Template::Test => "test",
            Template::Requirements => "requirements",
            Template::SummarizeError => "summarize_error",
            Template::DependencyCheck => "dependency_check",
            Template::SolveOsDependency => "solve_os_dependency",
            Template::SolveLanguageDependency => "solve_language_dependency",
            Template::SuggestSolutions => "suggest_solutions",
            Template::ErrorSeenBefore => "error_seen_before",
            Template::SolutionTriedBefore => "solution_tried_before",
            Template::ImplementSolution => "implement_solution",
            Template::Reformat => "reformat",
            Template::Companion => "companion",
            Template::Dockerfile => "dockerfile",
            Template::CompanionDockerfile => "companion_dockerfile",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Template::System => include_str!("prompts/system.md"),
            Template::ServiceName => include_str!("prompts/service_name.md"),
            Template::Strategies => include_str!("prompts/strategies.md"),
            Template::Implementation => include_str!("prompts/implementation.md"),
            Template::Test => include_str!("prompts/test.md"),
            Template::Requirements => include_str!("prompts/requirements.md"),
            Template::SummarizeError => include_str!("prompts/summarize_error.md"),
            Template::DependencyCheck => include_str!("prompts/dependency_check.md"),
            Template::SolveOsDependency => include_str!("prompts/solve_os_dependency.md"),
            Template::SolveLanguageDependency => {
                include_str!("prompts/solve_language_dependency.md")
            }
            Template::SuggestSolutions => include_str!("prompts/suggest_solutions.md"),
            Template::ErrorSeenBefore => include_str!("prompts/error_seen_before.md"),
            Template::SolutionTriedBefore => include_str!("prompts/solution_tried_before.md"),
            Template::ImplementSolution => include_str!("prompts/implement_solution.md"),
            Template::Reformat => include_str!("prompts/reformat.md"),
            Template::Companion => include_str!("prompts/companion.md"),
            Template::Dockerfile => include_str!("prompts/dockerfile.j2"),
            Template::CompanionDockerfile => include_str!("prompts/companion_dockerfile.j2"),
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        for template in Template::ALL {
            env.add_template(template.name(), template.source())
                .expect("embedded template should be valid");
        }
        Self { env }
    }

    pub fn render<S: Serialize>(&self, template: Template, ctx: S) -> Result<String> {
        self.env
            .get_template(template.name())
            .and_then(|tmpl| tmpl.render(ctx))
            .with_context(|| format!("render template {}", template.name()))
    }
}

#[cfg(test)]
mod tests {
    use minijinja::context;

    use super::*;

    #[test]
    fn every_template_is_registered() {
        let engine = PromptEngine::new();
        for template in Template::ALL {
            assert!(engine.env.get_template(template.name()).is_ok());
        }
    }

    #[test]
    fn dockerfile_lists_os_packages_only_when_present() {
        let engine = PromptEngine::new();
        let plain = engine
            .render(
                Template::Dockerfile,
                context! { base_image => "python:3.11-slim", packages => Vec::<String>::new() },
            )
            .expect("render");
        assert!(plain.starts_with("FROM python:3.11-slim\n"));
        assert!(!plain.contains("apt-get"));

        let with_packages = engine
            .render(
                Template::Dockerfile,
                context! { base_image => "python:3.11-slim", packages => vec!["libgl1", "ffmpeg"] },
            )
            .expect("render");
        assert!(with_packages.contains("apt-get install --no-install-recommends -y libgl1 ffmpeg"));
    }

    #[test]
    fn previous_errors_are_numbered() {
        let engine = PromptEngine::new();
        let rendered = engine
            .render(
                Template::ErrorSeenBefore,
                context! {
                    previous_errors => vec!["first", "second"],
                    summary => "third",
                },
            )
            .expect("render");
        assert!(rendered.contains("1. first\n2. second\n"));
        assert!(rendered.contains("was_error_seen_before"));
    }
}
