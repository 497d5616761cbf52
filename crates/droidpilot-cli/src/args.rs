//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const DEVICE_HELP: &str = "Target device serial [default: the only connected device]";

/// Script-driven automation for Android devices.
///
/// Parses line-oriented test scripts, resolves element references against
/// the live UI hierarchy and drives the device over adb. Results are
/// written as JSON records under the project's results/ directory.
#[derive(Debug, Parser)]
#[command(name = "droidpilot", version)]
pub struct Cli {
    /// Project directory holding locators/, images/ and results/
    /// [env: DROIDPILOT_PROJECT, default: current directory]
    #[arg(short, long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a script file against a device
    #[command(after_help = "\
Examples:
  droidpilot run login.txt                      # Run on the only connected device
  droidpilot run login.txt -d emulator-5554     # Pick a device
  droidpilot run login.txt --strict             # Reject unknown commands
  droidpilot run login.txt --wait-timeout 10000 # Wait at most 10s for elements
  droidpilot -p ~/apps/shop run checkout.txt    # Use another project directory

Exit status is 0 when every step passed, 1 otherwise.
Press Ctrl+C to stop; the current step is aborted within 100ms.")]
    Run(RunArgs),

    /// Run individual command lines without a script file
    #[command(after_help = "\
Examples:
  droidpilot batch '启动应用 [com.example, .Main]' '点击 [{登录按钮}]'
  droidpilot batch --keep-going '隐藏键盘' '返回'   # Failures don't stop the batch")]
    Batch(BatchArgs),

    /// Parse a script and print its structure as JSON
    #[command(after_help = "\
Examples:
  droidpilot parse login.txt                    # Lenient: unknown commands dropped with a warning
  droidpilot parse login.txt --strict           # Fail on the first unknown command")]
    Parse(ParseArgs),

    /// Resolve one element reference on the current screen
    #[command(after_help = "\
Examples:
  droidpilot resolve '{登录按钮}'                # Alias from locators/locators.json
  droidpilot resolve '@{logo}'                  # Template image match
  droidpilot resolve 设置 -d emulator-5554       # Bare text search")]
    Resolve(ResolveArgs),

    /// List devices known to adb
    Devices,

    /// Show an example script and project layout
    Examples,
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Script file to run
    pub script: PathBuf,

    #[arg(short, long, help = DEVICE_HELP)]
    pub device: Option<String>,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Fail on unknown command words instead of skipping them
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, clap::Args)]
pub struct BatchArgs {
    /// Command lines, executed in order
    #[arg(required = true, num_args = 1..)]
    pub commands: Vec<String>,

    #[arg(short, long, help = DEVICE_HELP)]
    pub device: Option<String>,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Record failures and continue instead of stopping
    #[arg(long)]
    pub keep_going: bool,
}

#[derive(Debug, clap::Args)]
pub struct TuningArgs {
    /// Timeout in milliseconds for waiting on an element
    #[arg(long, value_name = "MS", default_value_t = 30000)]
    pub wait_timeout: u64,

    /// Pixel tolerance for position-based element matching
    #[arg(long, value_name = "PX", default_value_t = 100)]
    pub tolerance: i32,
}

#[derive(Debug, clap::Args)]
pub struct ParseArgs {
    /// Script file to parse
    pub script: PathBuf,

    /// Fail on unknown command words instead of skipping them
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, clap::Args)]
pub struct ResolveArgs {
    /// Element reference as written in a script: {alias}, @{image}, x,y or text
    pub selector: String,

    #[arg(short, long, help = DEVICE_HELP)]
    pub device: Option<String>,

    /// Pixel tolerance for position-based element matching
    #[arg(long, value_name = "PX", default_value_t = 100)]
    pub tolerance: i32,
}

/// End-to-end example text for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"End-to-end example: log in to an app

Project layout:

  my-app/
    locators/locators.json   # alias → how to find the element
    images/logo.png          # templates for @{logo}
    login.txt                # the script
    results/                 # written by droidpilot run

locators/locators.json:

  {
    "登录按钮": { "type": "xml", "resourceId": "com.example:id/login", "className": "android.widget.Button" },
    "用户名":   { "resourceId": "com.example:id/username" },
    "logo":     { "type": "image", "path": "images/logo.png" }
  }

login.txt:

  case: TC-001
  scriptName: 登录流程
  details:
    package: com.example
    activity: .MainActivity
  steps:
    启动应用
    等待 [{登录按钮}]
    输入 [{用户名}, "alice"]
    隐藏键盘
    点击 [{登录按钮}]
    等待 [2s]
    断言 [@{logo}, 存在]

Run it:

  cd my-app
  droidpilot parse login.txt          # check the script first
  droidpilot resolve '{登录按钮}'       # check a locator against the live screen
  droidpilot run login.txt            # run it; the record lands in results/
"#;
