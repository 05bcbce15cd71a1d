//! Versioned, append-only storage of generated artifact sets.
//!
//! One store covers one service directory. Each (strategy, version) pair owns
//! a directory `<strategy dir>/v<N>/` holding the flat set of generated files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::types::ArtifactSet;
use crate::io::paths::{COMPANION_DIR_NAME, version_dir_name};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact set already exists at {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> StoreError {
        let path = path.to_path_buf();
        move |source| StoreError::Io {
            action,
            path,
            source,
        }
    }
}

/// Location of one (strategy, version) artifact set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    strategy_dir: String,
    version: u32,
    dir: PathBuf,
}

impl ArtifactHandle {
    pub fn strategy_dir(&self) -> &str {
        &self.strategy_dir
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at a service directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, empty directory for `(strategy_dir, version)`.
    ///
    /// Reusing a pair fails with [`StoreError::AlreadyExists`] so a version is
    /// never written twice.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn create(&self, strategy_dir: &str, version: u32) -> Result<ArtifactHandle, StoreError> {
        self.allocate(strategy_dir, version, &version_dir_name(version))
    }

    /// Allocate the companion directory of a strategy, tagged with the
    /// version it accompanies. A strategy has at most one companion.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn create_companion(
        &self,
        strategy_dir: &str,
        version: u32,
    ) -> Result<ArtifactHandle, StoreError> {
        self.allocate(strategy_dir, version, COMPANION_DIR_NAME)
    }

    fn allocate(
        &self,
        strategy_dir: &str,
        version: u32,
        dir_name: &str,
    ) -> Result<ArtifactHandle, StoreError> {
        let parent = self.root.join(strategy_dir);
        fs::create_dir_all(&parent).map_err(StoreError::io("create strategy dir", &parent))?;
        let dir = parent.join(dir_name);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(dir));
            }
            Err(err) => return Err(StoreError::io("create artifact dir", &dir)(err)),
        }
        debug!(dir = %dir.display(), "created artifact set");
        Ok(ArtifactHandle {
            strategy_dir: strategy_dir.to_string(),
            version,
            dir,
        })
    }

    /// Overwrite one named entry.
    pub fn write(
        &self,
        handle: &ArtifactHandle,
        file_name: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let path = handle.dir.join(file_name);
        fs::write(&path, content).map_err(StoreError::io("write artifact", &path))
    }

    pub fn write_all(&self, handle: &ArtifactHandle, files: &ArtifactSet) -> Result<(), StoreError> {
        for (name, content) in files {
            self.write(handle, name, content)?;
        }
        Ok(())
    }

    /// Duplicate every entry of `from` into `to`.
    #[instrument(skip_all, fields(from = from.version, to = to.version))]
    pub fn copy_forward(&self, from: &ArtifactHandle, to: &ArtifactHandle) -> Result<(), StoreError> {
        let files = self.read_all(from)?;
        self.write_all(to, &files)?;
        debug!(files = files.len(), "copied artifact set forward");
        Ok(())
    }

    /// Full content map of the set, keyed by file name.
    ///
    /// Only regular files directly inside the version directory belong to the
    /// set.
    pub fn read_all(&self, handle: &ArtifactHandle) -> Result<ArtifactSet, StoreError> {
        let mut files = ArtifactSet::new();
        let entries =
            fs::read_dir(&handle.dir).map_err(StoreError::io("list artifacts", &handle.dir))?;
        for entry in entries {
            let entry = entry.map_err(StoreError::io("list artifacts", &handle.dir))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let content =
                fs::read_to_string(&path).map_err(StoreError::io("read artifact", &path))?;
            files.insert(name.to_string(), content);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path().join("EchoExecutor1"));
        (temp, store)
    }

    #[test]
    fn create_rejects_reused_version() {
        let (_temp, store) = store();
        let first = store.create("0_pillow", 1).expect("create v1");
        assert!(first.path().ends_with("0_pillow/v1"));
        assert!(first.path().is_dir());

        let err = store.create("0_pillow", 1).expect_err("reuse");
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        store.create("1_numpy", 1).expect("other strategy");
    }

    #[test]
    fn companion_is_created_once_per_strategy() {
        let (_temp, store) = store();
        let v2 = store.create("0_pillow", 2).expect("v2");
        let companion = store.create_companion("0_pillow", 2).expect("companion");
        assert!(companion.path().ends_with("0_pillow/companion"));
        assert_eq!(companion.version(), 2);
        assert_eq!(companion.path().parent(), v2.path().parent());

        store
            .write(&companion, "app.py", "print('hi')\n")
            .expect("write");
        let err = store.create_companion("0_pillow", 3).expect_err("second companion");
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.read_all(&companion).expect("read")["app.py"], "print('hi')\n");
    }

    #[test]
    fn copy_forward_then_patch_keeps_unchanged_files() {
        let (_temp, store) = store();
        let v1 = store.create("0_pkga", 1).expect("v1");
        store.write(&v1, "microservice.py", "print(1)\n").expect("write");
        store.write(&v1, "requirements.txt", "pkga==1.0\n").expect("write");
        store.write(&v1, "Dockerfile", "FROM python\n").expect("write");

        let v2 = store.create("0_pkga", 2).expect("v2");
        store.copy_forward(&v1, &v2).expect("copy");
        store.write(&v2, "requirements.txt", "pkga==2.0\n").expect("patch");

        let before = store.read_all(&v1).expect("read v1");
        let after = store.read_all(&v2).expect("read v2");
        assert_eq!(before.len(), after.len());
        for (name, content) in &before {
            if name == "requirements.txt" {
                assert_eq!(after[name], "pkga==2.0\n");
                assert_eq!(content, "pkga==1.0\n");
            } else {
                assert_eq!(&after[name], content);
            }
        }
    }

    #[test]
    fn write_is_an_idempotent_overwrite() {
        let (_temp, store) = store();
        let v1 = store.create("0_plain", 1).expect("v1");
        store.write(&v1, "a.txt", "one").expect("write");
        store.write(&v1, "a.txt", "two").expect("write");
        store.write(&v1, "a.txt", "two").expect("write");
        let files = store.read_all(&v1).expect("read");
        assert_eq!(files.len(), 1);
        assert_eq!(files["a.txt"], "two");
    }

    #[test]
    fn read_all_ignores_nested_directories() {
        let (_temp, store) = store();
        let v1 = store.create("0_plain", 1).expect("v1");
        store.write(&v1, "Dockerfile", "FROM x").expect("write");
        fs::create_dir(v1.path().join("__pycache__")).expect("mkdir");
        fs::write(v1.path().join("__pycache__").join("x.pyc"), "bin").expect("write");
        let files = store.read_all(&v1).expect("read");
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["Dockerfile"]);
    }
}
