//! Filesystem layout of one run root.

use std::path::PathBuf;

/// Paths shared by every component of a run.
///
/// Artifact sets live under `<root>/<service>/<strategy dir>/v<N>/`; forensic
/// logs and the oracle transcript live under `<root>/.devloop/`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub devloop_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub transcript_path: PathBuf,
}

impl RunPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let devloop_dir = root.join(".devloop");
        Self {
            root: root.clone(),
            devloop_dir: devloop_dir.clone(),
            logs_dir: devloop_dir.join("logs"),
            transcript_path: devloop_dir.join("oracle.jsonl"),
        }
    }

    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.root.join(service)
    }

    pub fn strategy_dir(&self, service: &str, strategy_dir: &str) -> PathBuf {
        self.service_dir(service).join(strategy_dir)
    }

    pub fn version_dir(&self, service: &str, strategy_dir: &str, version: u32) -> PathBuf {
        self.strategy_dir(service, strategy_dir)
            .join(version_dir_name(version))
    }

    pub fn attempt_log_dir(&self, service: &str, strategy_dir: &str, version: u32) -> PathBuf {
        self.logs_dir
            .join(service)
            .join(strategy_dir)
            .join(version_dir_name(version))
    }
}

pub fn version_dir_name(version: u32) -> String {
    format!("v{version}")
}

/// Companion artifact directory, a sibling of the version directories.
pub const COMPANION_DIR_NAME: &str = "companion";

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn layout_is_stable() {
        let paths = RunPaths::new("/tmp/run");
        assert_eq!(
            paths.version_dir("EchoExecutor42", "0_pillow", 3),
            Path::new("/tmp/run/EchoExecutor42/0_pillow/v3")
        );
        assert_eq!(
            paths.attempt_log_dir("EchoExecutor42", "0_pillow", 1),
            Path::new("/tmp/run/.devloop/logs/EchoExecutor42/0_pillow/v1")
        );
        assert!(paths.transcript_path.ends_with(".devloop/oracle.jsonl"));
    }
}
