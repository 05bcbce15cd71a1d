//! Companion playground generated once a service builds.

use anyhow::Result;
use minijinja::context;
use tracing::instrument;

use crate::agents::AgentContext;
use crate::core::extract::files_to_string;
use crate::core::types::{ArtifactKind, ArtifactSet};
use crate::io::prompt::Template;

pub const COMPANION_APP_FILE: &str = "app.py";

/// Files copied from the successful version next to the generated app.
pub const COMPANION_INPUTS: [ArtifactKind; 2] = [ArtifactKind::Implementation, ArtifactKind::Manifest];

/// Build the companion artifact set, or `None` if the oracle produced no app.
#[instrument(skip_all)]
pub fn generate_companion(
    ctx: &AgentContext<'_>,
    files: &ArtifactSet,
    base_image: &str,
) -> Result<Option<ArtifactSet>> {
    let prompt = ctx.render(
        Template::Companion,
        context! {
            files => files_to_string(files, Some(&[ArtifactKind::Implementation, ArtifactKind::Test])),
        },
    )?;
    let Some(app) = ctx
        .ask_file("companion", &prompt, COMPANION_APP_FILE)?
        .into_option()
    else {
        return Ok(None);
    };

    let mut companion = ArtifactSet::new();
    companion.insert(COMPANION_APP_FILE.to_string(), format!("{app}\n"));
    for kind in COMPANION_INPUTS {
        if let Some(content) = files.get(kind.file_name()) {
            companion.insert(kind.file_name().to_string(), content.clone());
        }
    }
    companion.insert(
        ArtifactKind::BuildEnv.file_name().to_string(),
        ctx.render(
            Template::CompanionDockerfile,
            context! { base_image => base_image },
        )?,
    );
    Ok(Some(companion))
}
