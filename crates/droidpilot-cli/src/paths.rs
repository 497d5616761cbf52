//! Project layout and tool path resolution.
//!
//! Priority for the project directory:
//! 1. `--project` flag
//! 2. `DROIDPILOT_PROJECT`
//! 3. Current directory
//!
//! Priority for the adb binary:
//! 1. `DROIDPILOT_ADB` (explicit override)
//! 2. `$ANDROID_HOME/platform-tools/adb`
//! 3. `$ANDROID_SDK_ROOT/platform-tools/adb`
//! 4. `~/Android/Sdk/platform-tools/adb` (only if it exists)
//! 5. `adb` from `PATH`
//!
//! Empty environment values are treated as unset.
//!
//! Inside a project:
//! - `locators/locators.json`: locator store
//! - `results/`: execution result records
//! - `images/`: template images for `@{name}` references

use std::env;
use std::path::{Path, PathBuf};

const ADB_EXE: &str = if cfg!(windows) { "adb.exe" } else { "adb" };

/// Read an env var, treating empty values as unset.
fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Resolve the project directory.
pub fn project_dir(flag: Option<&Path>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }

    if let Some(dir) = env_non_empty("DROIDPILOT_PROJECT") {
        return PathBuf::from(dir);
    }

    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Resolve the adb executable.
pub fn adb_path() -> PathBuf {
    if let Some(adb) = env_non_empty("DROIDPILOT_ADB") {
        return PathBuf::from(adb);
    }

    for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Some(sdk) = env_non_empty(var) {
            return PathBuf::from(sdk).join("platform-tools").join(ADB_EXE);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let candidate = home
            .join("Android")
            .join("Sdk")
            .join("platform-tools")
            .join(ADB_EXE);
        if candidate.is_file() {
            return candidate;
        }
    }

    PathBuf::from(ADB_EXE)
}

/// External image matcher program, if configured.
pub fn matcher_program() -> Option<PathBuf> {
    env_non_empty("DROIDPILOT_MATCHER").map(PathBuf::from)
}

pub fn locator_file(project: &Path) -> PathBuf {
    project.join("locators").join("locators.json")
}

pub fn results_dir(project: &Path) -> PathBuf {
    project.join("results")
}

/// Template image for an `@{name}` reference with no locator definition.
pub fn default_image_path(project: &Path, name: &str) -> PathBuf {
    project.join("images").join(format!("{}.png", name))
}

/// Where the current screenshot is written for image matching.
///
/// Scoped per device so concurrent executors never share a file.
pub fn screenshot_path(device_id: &str) -> PathBuf {
    env::temp_dir()
        .join("droidpilot")
        .join(format!("{}.png", sanitize_device_id(device_id)))
}

/// Make a device id safe to use as a file name.
///
/// Network device ids such as `192.168.1.5:5555` contain characters that
/// are not portable in file names; anything outside `[A-Za-z0-9._-]` is
/// replaced with `_`. A leading dot or hyphen is replaced too.
pub(crate) fn sanitize_device_id(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let allowed = c.is_ascii_alphanumeric() || c == '_' || ((c == '-' || c == '.') && i > 0);
            if allowed {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        tracing::warn!("Empty device id, using 'device' for file names");
        "device".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    // Mutex to serialize tests that manipulate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    // Saves and restores env vars, holding the mutex for the test's duration.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
        _lock: std::sync::MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), std::env::var(name).ok()))
                .collect();
            Self { vars, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                // SAFETY: We hold ENV_MUTEX, so no other test thread is modifying env vars
                unsafe {
                    match value {
                        Some(v) => std::env::set_var(name, v),
                        None => std::env::remove_var(name),
                    }
                }
            }
        }
    }

    const ADB_VARS: &[&str] = &["DROIDPILOT_ADB", "ANDROID_HOME", "ANDROID_SDK_ROOT"];

    #[test]
    fn test_project_dir_flag_wins() {
        let _guard = EnvGuard::new(&["DROIDPILOT_PROJECT"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("DROIDPILOT_PROJECT", "/from/env") };

        assert_eq!(
            project_dir(Some(Path::new("/from/flag"))),
            PathBuf::from("/from/flag")
        );
        assert_eq!(project_dir(None), PathBuf::from("/from/env"));
    }

    #[test]
    fn test_project_dir_ignores_empty_env() {
        let _guard = EnvGuard::new(&["DROIDPILOT_PROJECT"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("DROIDPILOT_PROJECT", "") };

        assert_eq!(project_dir(None), std::env::current_dir().unwrap());
    }

    #[test]
    fn test_adb_path_explicit_override() {
        let _guard = EnvGuard::new(ADB_VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROIDPILOT_ADB", "/opt/adb");
            std::env::set_var("ANDROID_HOME", "/sdk");
        }

        assert_eq!(adb_path(), PathBuf::from("/opt/adb"));
    }

    #[test]
    fn test_adb_path_android_home_before_sdk_root() {
        let _guard = EnvGuard::new(ADB_VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::remove_var("DROIDPILOT_ADB");
            std::env::set_var("ANDROID_HOME", "/sdk/home");
            std::env::set_var("ANDROID_SDK_ROOT", "/sdk/root");
        }

        assert_eq!(
            adb_path(),
            PathBuf::from("/sdk/home").join("platform-tools").join(ADB_EXE)
        );
    }

    #[test]
    fn test_adb_path_sdk_root_when_home_empty() {
        let _guard = EnvGuard::new(ADB_VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROIDPILOT_ADB", "");
            std::env::set_var("ANDROID_HOME", "");
            std::env::set_var("ANDROID_SDK_ROOT", "/sdk/root");
        }

        assert_eq!(
            adb_path(),
            PathBuf::from("/sdk/root").join("platform-tools").join(ADB_EXE)
        );
    }

    #[test]
    fn test_matcher_program_unset() {
        let _guard = EnvGuard::new(&["DROIDPILOT_MATCHER"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::remove_var("DROIDPILOT_MATCHER") };

        assert_eq!(matcher_program(), None);
    }

    #[test]
    fn test_project_layout() {
        let project = Path::new("/work/app");
        assert_eq!(
            locator_file(project),
            PathBuf::from("/work/app/locators/locators.json")
        );
        assert_eq!(results_dir(project), PathBuf::from("/work/app/results"));
        assert_eq!(
            default_image_path(project, "logo"),
            PathBuf::from("/work/app/images/logo.png")
        );
    }

    #[test]
    fn test_sanitize_device_ids() {
        assert_eq!(sanitize_device_id("emulator-5554"), "emulator-5554");
        assert_eq!(sanitize_device_id("192.168.1.5:5555"), "192.168.1.5_5555");
        assert_eq!(sanitize_device_id("../../etc/passwd"), "_._.._etc_passwd");
        assert_eq!(sanitize_device_id("-serial"), "_serial");
        assert_eq!(sanitize_device_id(""), "device");
    }

    #[test]
    fn test_screenshot_path_is_device_scoped() {
        let a = screenshot_path("emulator-5554");
        let b = screenshot_path("192.168.1.5:5555");
        assert_ne!(a, b);
        assert!(a.ends_with("droidpilot/emulator-5554.png"));
    }
}
