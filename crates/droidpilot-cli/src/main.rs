//! droidpilot CLI entry point.

mod args;
mod device;
mod executor;
mod paths;
mod resolver;
mod store;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use droidpilot_core::matching::{format_visible_elements, Selector};
use droidpilot_core::parser::{parse_command_line, parse_parameter, parse_strict, parse_with_warnings};
use droidpilot_core::result::ExecutionResult;
use serde_json::json;
use tracing::{error, info, warn};

use crate::args::{Cli, Commands, TuningArgs};
use crate::device::adb::{AdbChannel, AdbSnapshotProvider};
use crate::device::matcher::{CommandImageMatcher, NullMatcher};
use crate::device::{ImageMatcher, SnapshotProvider};
use crate::executor::{BatchEntry, Executor, ExecutorConfig, ExecutorState};
use crate::resolver::ElementResolver;
use crate::store::{FileLocatorStore, FileResultStore};

fn main() {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Examples = cli.command {
        println!("{}", crate::args::EXAMPLES_TEXT);
        return;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(run_command(cli)) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Run one subcommand. `Ok(false)` means it ran but did not pass.
async fn run_command(cli: Cli) -> anyhow::Result<bool> {
    let project = paths::project_dir(cli.project.as_deref());
    let adb = AdbChannel::new(paths::adb_path());

    match cli.command {
        Commands::Run(args) => {
            let text = tokio::fs::read_to_string(&args.script)
                .await
                .with_context(|| format!("Failed to read script {}", args.script.display()))?;
            let script = if args.strict {
                parse_strict(&text)?
            } else {
                parse_with_warnings(&text).0
            };
            if script.steps.is_empty() {
                warn!("{} contains no steps", args.script.display());
            }

            let device = pick_device(&adb, args.device).await?;
            let script_file = args.script.to_string_lossy().into_owned();
            let mut executor = build_executor(&project, &device, adb, &args.tuning)
                .with_script_file(script_file);
            let result = run_cancellable(&mut executor, |executor| executor.execute(&script)).await?;
            report(&executor, &result)
        }
        Commands::Batch(args) => {
            let mut entries = Vec::with_capacity(args.commands.len());
            for (i, line) in args.commands.iter().enumerate() {
                match parse_command_line(line, i + 1) {
                    Ok(step) => entries.push(BatchEntry {
                        step,
                        required: !args.keep_going,
                    }),
                    Err(w) => bail!("Unknown command '{}' in '{}'", w.word, w.raw_text),
                }
            }

            let device = pick_device(&adb, args.device).await?;
            let mut executor =
                build_executor(&project, &device, adb, &args.tuning).with_script_file("batch");
            let result =
                run_cancellable(&mut executor, |executor| executor.execute_batch(&entries)).await?;
            report(&executor, &result)
        }
        Commands::Parse(args) => {
            let text = tokio::fs::read_to_string(&args.script)
                .await
                .with_context(|| format!("Failed to read script {}", args.script.display()))?;
            let output = if args.strict {
                let script = parse_strict(&text)?;
                json!({ "script": script, "warnings": [] })
            } else {
                let (script, warnings) = parse_with_warnings(&text);
                json!({ "script": script, "warnings": warnings })
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(true)
        }
        Commands::Resolve(args) => {
            let param = parse_parameter(&args.selector);
            let Some(selector) = Selector::from_parameter(&param) else {
                bail!("'{}' is not an element reference", args.selector);
            };

            let device = pick_device(&adb, args.device).await?;
            let snapshot = AdbSnapshotProvider::new(adb)
                .capture(&device)
                .await
                .context("Failed to capture the device UI")?;
            let resolver = build_resolver(&project, &device).with_tolerance(args.tolerance);

            match resolver
                .resolve(&selector, &snapshot.elements, &snapshot.screenshot)
                .await
            {
                Some(found) => {
                    let output = json!({ "strategy": found.strategy, "element": found.element });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    Ok(true)
                }
                None => {
                    eprintln!(
                        "Error: {} not found. Visible: {}",
                        selector,
                        format_visible_elements(&snapshot.elements)
                    );
                    Ok(false)
                }
            }
        }
        Commands::Devices => {
            let devices = adb.list_devices().await.context("Failed to list devices")?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(true)
        }
        Commands::Examples => unreachable!("Examples handled before the runtime starts"),
    }
}

/// Use the requested device, or the only one attached.
async fn pick_device(adb: &AdbChannel, requested: Option<String>) -> anyhow::Result<String> {
    if let Some(device) = requested {
        return Ok(device);
    }

    let ready: Vec<String> = adb
        .list_devices()
        .await
        .context("Failed to list devices (is adb installed? set DROIDPILOT_ADB)")?
        .into_iter()
        .filter(|d| d.state == "device")
        .map(|d| d.serial)
        .collect();

    match ready.as_slice() {
        [only] => Ok(only.clone()),
        [] => bail!("No devices attached. Connect one and check 'adb devices'"),
        _ => bail!(
            "{} devices attached ({}); pick one with --device",
            ready.len(),
            ready.join(", ")
        ),
    }
}

fn build_resolver(project: &Path, device: &str) -> ElementResolver {
    let matcher: Arc<dyn ImageMatcher> = match paths::matcher_program() {
        Some(program) => Arc::new(CommandImageMatcher::new(program)),
        None => Arc::new(NullMatcher),
    };
    ElementResolver::new(
        Arc::new(FileLocatorStore::new(paths::locator_file(project))),
        matcher,
        project,
        paths::screenshot_path(device),
    )
}

fn build_executor(project: &Path, device: &str, adb: AdbChannel, tuning: &TuningArgs) -> Executor {
    let config = ExecutorConfig {
        wait_timeout: Duration::from_millis(tuning.wait_timeout),
        position_tolerance: tuning.tolerance,
        ..ExecutorConfig::default()
    };
    let resolver = build_resolver(project, device);
    let snapshots: Arc<dyn SnapshotProvider> = Arc::new(AdbSnapshotProvider::new(adb.clone()));

    Executor::new(
        device,
        Arc::new(adb),
        snapshots,
        resolver,
        Arc::new(FileResultStore::new(paths::results_dir(project))),
    )
    .with_config(config)
}

/// Run `f`, turning Ctrl+C into a cooperative stop request.
async fn run_cancellable<'a, F, Fut>(
    executor: &'a mut Executor,
    f: F,
) -> anyhow::Result<ExecutionResult>
where
    F: FnOnce(&'a mut Executor) -> Fut,
    Fut: std::future::Future<Output = Result<ExecutionResult, droidpilot_core::error::EngineError>>,
{
    let cancel = executor.cancel_handle();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT, stopping"),
                Err(e) => {
                    warn!("Failed to register Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            },
            _ = sigterm() => info!("Received SIGTERM, stopping"),
        }
        cancel.cancel();
    });

    let result = f(executor).await;
    watcher.abort();
    Ok(result?)
}

fn report(executor: &Executor, result: &ExecutionResult) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(result)?);

    if executor.state() == ExecutorState::Aborted {
        warn!(
            "Run aborted at step {}",
            executor.current_step().map_or(0, |i| i + 1)
        );
    } else if let (Some(line), Some(err)) = (result.failed_line, &result.error) {
        eprintln!("Error (line {}): {}", line, err);
    }
    Ok(result.success)
}

/// Wait for SIGTERM (Unix only).
///
/// If registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
