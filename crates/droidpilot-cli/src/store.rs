//! Project-scoped persistence: locator definitions in, result records out.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Context;
use droidpilot_core::locator::{parse_locator_map, LocatorMap};
use droidpilot_core::result::{record_file_name, ExecutionResult};
use tracing::debug;

/// Source of alias → definition mappings.
pub trait LocatorStore: Send + Sync {
    /// Load the current definitions. Called once per resolution attempt,
    /// so edits made during a run are picked up.
    fn load(&self) -> anyhow::Result<LocatorMap>;
}

/// `locators/locators.json` inside a project.
#[derive(Debug, Clone)]
pub struct FileLocatorStore {
    path: PathBuf,
}

impl FileLocatorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LocatorStore for FileLocatorStore {
    fn load(&self) -> anyhow::Result<LocatorMap> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No locator file at {}", self.path.display());
                return Ok(LocatorMap::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        parse_locator_map(&text).with_context(|| format!("Malformed locator file {}", self.path.display()))
    }
}

/// Fixed in-memory definitions.
impl LocatorStore for LocatorMap {
    fn load(&self) -> anyhow::Result<LocatorMap> {
        Ok(self.clone())
    }
}

/// Sink for finished execution records.
pub trait ResultStore: Send + Sync {
    /// Persist `result`, returning where it went.
    fn persist(&self, result: &ExecutionResult, script_file: &str) -> anyhow::Result<PathBuf>;
}

const MAX_NAME_COLLISIONS: usize = 1000;

/// Writes pretty JSON records into `results/`.
#[derive(Debug, Clone)]
pub struct FileResultStore {
    dir: PathBuf,
}

impl FileResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ResultStore for FileResultStore {
    fn persist(&self, result: &ExecutionResult, script_file: &str) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(result)?;

        // Existing records are never overwritten.
        for collision in 0..MAX_NAME_COLLISIONS {
            let path = self.dir.join(record_file_name(
                script_file,
                result.start_time,
                result.status(),
                collision,
            ));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()))
                }
            };
            file.write_all(json.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            return Ok(path);
        }

        anyhow::bail!(
            "Too many records named after {} in {}",
            script_file,
            self.dir.display()
        )
    }
}


#[cfg(test)]
mod tests {
    use droidpilot_core::locator::LocatorDefinition;
    use droidpilot_core::script::Script;

    use super::*;

    #[test]
    fn test_missing_locator_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocatorStore::new(dir.path().join("locators").join("locators.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_locator_file_is_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locators.json");
        let store = FileLocatorStore::new(&path);

        fs::write(&path, r#"{"a": {"resourceId": "id/a"}}"#).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);

        fs::write(
            &path,
            r#"{"a": {"resourceId": "id/a"}, "b": {"type": "image", "path": "b.png"}}"#,
        )
        .unwrap();
        let map = store.load().unwrap();
        assert_eq!(map.len(), 2);
        assert!(matches!(map["b"], LocatorDefinition::Image { .. }));
    }

    #[test]
    fn test_malformed_locator_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locators.json");
        fs::write(&path, "{not json").unwrap();

        let err = FileLocatorStore::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("Malformed locator file"));
    }

    #[test]
    fn test_result_store_writes_named_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path().join("results"));

        let mut result = ExecutionResult::begin("run-1", &Script::default(), "emulator-5554");
        result.finish(true, None);
        let path = store.persist(&result, "flows/login.txt").unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("login_"));
        assert!(name.ends_with("_PASS.json"));

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["run_id"], "run-1");
        assert_eq!(written["device_id"], "emulator-5554");
    }

    #[test]
    fn test_same_second_runs_keep_separate_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path().join("results"));

        let mut first = ExecutionResult::begin("run-a", &Script::default(), "emulator-5554");
        first.finish(false, None);
        let mut second = ExecutionResult::begin("run-b", &Script::default(), "emulator-5556");
        second.start_time = first.start_time;
        second.finish(false, None);

        let path_a = store.persist(&first, "login.txt").unwrap();
        let path_b = store.persist(&second, "login.txt").unwrap();

        assert_ne!(path_a, path_b);
        assert!(path_b.to_string_lossy().ends_with("_2_FAIL.json"));
        assert_eq!(fs::read_dir(dir.path().join("results")).unwrap().count(), 2);

        let kept: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path_a).unwrap()).unwrap();
        assert_eq!(kept["device_id"], "emulator-5554");
    }
}
