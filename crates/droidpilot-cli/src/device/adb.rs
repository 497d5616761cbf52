//! Device access through the `adb` binary.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use droidpilot_core::input::{parse_window_size, DeviceCommand};
use droidpilot_core::ui::{infer_screen_size, parse_hierarchy, UiSnapshot};
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ChannelError, CommandOutput, DeviceChannel, SnapshotProvider};

const DUMP_PATH: &str = "/sdcard/window_dump.xml";

/// Printed by `uiautomator dump` only when the file was written.
const DUMP_OK_MARKER: &str = "dumped to";

/// Runs shell commands with `adb -s <device> shell <command>`.
#[derive(Debug, Clone)]
pub struct AdbChannel {
    adb: PathBuf,
}

impl AdbChannel {
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self { adb: adb.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, ChannelError> {
        debug!("{} {}", self.adb.display(), args.join(" "));
        let output = Command::new(&self.adb)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(ChannelError::Failed {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
            })
        }
    }

    /// Raw bytes from `adb exec-out`, which bypasses the shell's line
    /// ending translation.
    pub async fn exec_out(&self, device: &str, command: &[&str]) -> Result<Vec<u8>, ChannelError> {
        let mut args = vec!["-s", device, "exec-out"];
        args.extend_from_slice(command);
        Ok(self.run(&args).await?.stdout)
    }

    /// Devices known to the adb server.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, ChannelError> {
        let output = self.run(&["devices", "-l"]).await?;
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl DeviceChannel for AdbChannel {
    async fn execute(&self, device: &str, command: &str) -> Result<CommandOutput, ChannelError> {
        let output = self.run(&["-s", device, "shell", command]).await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One line of `adb devices -l`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Parse `adb devices -l` output.
pub fn parse_devices(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?.to_string();
            let state = fields.next()?.to_string();
            let model = fields
                .find_map(|f| f.strip_prefix("model:"))
                .map(String::from);
            Some(DeviceInfo {
                serial,
                state,
                model,
            })
        })
        .collect()
}

/// Captures UI state with `uiautomator dump` and `screencap`.
#[derive(Debug, Clone)]
pub struct AdbSnapshotProvider {
    channel: AdbChannel,
}

impl AdbSnapshotProvider {
    pub fn new(channel: AdbChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl SnapshotProvider for AdbSnapshotProvider {
    async fn capture(&self, device: &str) -> Result<UiSnapshot, ChannelError> {
        // uiautomator exits 0 on failure too, leaving the previous dump behind.
        let dump_command = format!("uiautomator dump {}", DUMP_PATH);
        let reply = self.channel.execute(device, &dump_command).await?.combined();
        if !reply.contains(DUMP_OK_MARKER) {
            return Err(ChannelError::Rejected {
                command: dump_command,
                output: reply,
            });
        }
        let dump = self
            .channel
            .execute(device, &format!("cat {}", DUMP_PATH))
            .await?;
        let elements = parse_hierarchy(&dump.stdout);

        // A missing screenshot only disables image matching.
        let screenshot = match self.channel.exec_out(device, &["screencap", "-p"]).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Screenshot capture failed on {}: {}", device, e);
                Vec::new()
            }
        };

        let screen_size = match self
            .channel
            .execute(device, &DeviceCommand::WindowSize.to_shell())
            .await
        {
            Ok(out) => parse_window_size(&out.stdout),
            Err(e) => {
                debug!("wm size failed on {}: {}", device, e);
                None
            }
        }
        .or_else(|| infer_screen_size(&elements));

        debug!("Captured {} elements from {}", elements.len(), device);
        Ok(UiSnapshot {
            screenshot,
            elements,
            screen_size,
        })
    }
}
