//! Script execution against one device.
//!
//! An [`Executor`] binds a device and a project for a single run:
//!
//! ```text
//! Idle ──execute──▶ Running ──▶ Completed { success }
//!                      │
//!                      └──cancel──▶ Aborted
//! ```
//!
//! Each step starts with a UI resync, replacing the cached elements and
//! screenshot wholesale, then dispatches on the command type. The first
//! failing step stops the run. Cancellation is cooperative: the flag is
//! checked before every step and on every tick of a sleep or poll, so a
//! stop request takes effect within one tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use droidpilot_core::error::{EngineError, ErrorCode};
use droidpilot_core::input::{
    clear_field_keys, directional_swipe, encode_ime_text, is_plain_input, keyboard_shown,
    parse_window_size, reports_failure, screen_bounds, DeviceCommand, KEYCODE_BACK,
};
use droidpilot_core::matching::{format_visible_elements, Selector, DEFAULT_POSITION_TOLERANCE};
use droidpilot_core::result::{ExecutionResult, StepRecord};
use droidpilot_core::script::{CommandType, Direction, Parameter, Script, Step};
use droidpilot_core::ui::{Bounds, ScreenSize, UiElement};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::device::{CommandOutput, DeviceChannel, SnapshotProvider};
use crate::resolver::ElementResolver;
use crate::store::ResultStore;

const PACKAGE_KEYS: &[&str] = &["package", "appPackage"];
const ACTIVITY_KEYS: &[&str] = &["activity", "appActivity"];

/// Lifecycle of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Running,
    Completed { success: bool },
    Aborted,
}

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound for `wait` on an element.
    pub wait_timeout: Duration,
    /// Delay between resyncs while waiting for an element.
    pub poll_interval: Duration,
    /// Granularity of cancellation checks inside sleeps.
    pub cancel_tick: Duration,
    pub position_tolerance: i32,
    pub swipe_duration_ms: u64,
    pub long_press_ms: u64,
    /// Deletes sent by `clear` when the field's text is unknown.
    pub clear_fallback_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            cancel_tick: Duration::from_millis(100),
            position_tolerance: DEFAULT_POSITION_TOLERANCE,
            swipe_duration_ms: 300,
            long_press_ms: 1000,
            clear_fallback_chars: 32,
        }
    }
}

/// One step of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub step: Step,
    /// A failing optional entry is recorded and the batch continues.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

pub struct Executor {
    device_id: String,
    channel: Arc<dyn DeviceChannel>,
    snapshots: Arc<dyn SnapshotProvider>,
    resolver: ElementResolver,
    results: Arc<dyn ResultStore>,
    config: ExecutorConfig,
    cancel: CancelHandle,
    state: ExecutorState,
    script_file: String,
    current_step: Option<usize>,
    cached_elements: Vec<UiElement>,
    screenshot: Vec<u8>,
    screen_size: Option<ScreenSize>,
}

impl Executor {
    pub fn new(
        device_id: impl Into<String>,
        channel: Arc<dyn DeviceChannel>,
        snapshots: Arc<dyn SnapshotProvider>,
        resolver: ElementResolver,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            channel,
            snapshots,
            resolver,
            results,
            config: ExecutorConfig::default(),
            cancel: CancelHandle::new(),
            state: ExecutorState::Idle,
            script_file: String::new(),
            current_step: None,
            cached_elements: Vec::new(),
            screenshot: Vec::new(),
            screen_size: None,
        }
    }

    /// Replace the tuning; the position tolerance is handed to the resolver.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.resolver = self.resolver.with_tolerance(config.position_tolerance);
        self.config = config;
        self
    }

    /// Name used for the persisted result record.
    pub fn with_script_file(mut self, script_file: impl Into<String>) -> Self {
        self.script_file = script_file.into();
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Index of the step in progress (or last run).
    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    /// Run every step of `script`, stopping at the first failure.
    pub async fn execute(&mut self, script: &Script) -> Result<ExecutionResult, EngineError> {
        let entries: Vec<(&Step, bool)> = script.steps.iter().map(|s| (s, true)).collect();
        self.run(script, &entries).await
    }

    /// Run loose steps; optional entries may fail without stopping the batch.
    pub async fn execute_batch(
        &mut self,
        entries: &[BatchEntry],
    ) -> Result<ExecutionResult, EngineError> {
        let script = Script {
            script_name: "batch".to_string(),
            ..Script::default()
        };
        let entries: Vec<(&Step, bool)> = entries.iter().map(|e| (&e.step, e.required)).collect();
        self.run(&script, &entries).await
    }

    async fn run(
        &mut self,
        script: &Script,
        entries: &[(&Step, bool)],
    ) -> Result<ExecutionResult, EngineError> {
        if self.state != ExecutorState::Idle {
            return Err(EngineError::invalid_input(format!(
                "Executor for {} is {:?}; create a new executor for each run",
                self.device_id, self.state
            )));
        }
        self.state = ExecutorState::Running;

        let mut result = ExecutionResult::begin(Uuid::new_v4().to_string(), script, &self.device_id);
        info!(
            "Running '{}' ({} steps) on {} [run {}]",
            display_name(script, &self.script_file),
            entries.len(),
            self.device_id,
            result.run_id
        );

        let mut aborted = false;
        let mut aborted_in_step = false;
        let mut required_failed = false;

        for (index, (step, required)) in entries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Stop requested before step {}", index + 1);
                aborted = true;
                break;
            }

            self.current_step = Some(index);
            info!("Step {} (line {}): {}", index + 1, step.line, step.raw_text);

            let started = Instant::now();
            self.refresh().await;
            let outcome = self.dispatch(step, script).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let failure = outcome.as_ref().err().map(|e| e.code);
            if let Err(e) = &outcome {
                warn!("Step {} (line {}) failed: {}", index + 1, step.line, e);
            }
            result
                .steps
                .push(StepRecord::new(index, step, outcome, duration_ms));

            match failure {
                None => {}
                Some(ErrorCode::Aborted) => {
                    aborted = true;
                    aborted_in_step = true;
                    break;
                }
                Some(_) if *required => {
                    required_failed = true;
                    break;
                }
                Some(_) => debug!("Step {} is optional, continuing", index + 1),
            }
        }

        self.refresh().await;

        let success = !aborted && !required_failed;
        let stopped_between_steps = aborted && !aborted_in_step;
        result.finish(success, stopped_between_steps.then(EngineError::aborted));

        self.state = if aborted {
            ExecutorState::Aborted
        } else {
            ExecutorState::Completed { success }
        };

        match self.results.persist(&result, &self.script_file) {
            Ok(path) => info!("Result saved to {}", path.display()),
            Err(e) => error!("Failed to persist result: {:#}", e),
        }

        info!(
            "Run {} finished: {} in {}ms",
            result.run_id,
            result.status().as_str(),
            result.duration_ms()
        );
        Ok(result)
    }

    /// Replace the cached UI state with a fresh capture.
    async fn refresh(&mut self) {
        match self.snapshots.capture(&self.device_id).await {
            Ok(snapshot) => {
                self.cached_elements = snapshot.elements;
                self.screenshot = snapshot.screenshot;
                if snapshot.screen_size.is_some() {
                    self.screen_size = snapshot.screen_size;
                }
            }
            Err(e) => {
                warn!("UI refresh failed on {}: {}", self.device_id, e);
                self.cached_elements = Vec::new();
                self.screenshot = Vec::new();
            }
        }
    }

    async fn dispatch(&mut self, step: &Step, script: &Script) -> Result<(), EngineError> {
        match step.command {
            CommandType::LaunchApp => self.launch_app(step, script).await,
            CommandType::CloseApp => self.close_app(step, script).await,
            CommandType::Click => self.click(step).await,
            CommandType::LongPress => self.long_press(step).await,
            CommandType::Swipe => self.swipe(step).await,
            CommandType::DirectionalSwipe => self.directional_swipe(step, 0).await,
            CommandType::InputText => self.input_text(step).await,
            CommandType::ClearField => self.clear_field(step).await,
            CommandType::HideKeyboard => self.hide_keyboard().await,
            CommandType::Back => self.send(DeviceCommand::key(KEYCODE_BACK)).await.map(drop),
            CommandType::Wait => self.wait(step).await,
            CommandType::Assert => self.assert(step).await,
        }
    }

    async fn shell(&self, command: &str) -> Result<CommandOutput, EngineError> {
        debug!("[{}] {}", self.device_id, command);
        self.channel
            .execute(&self.device_id, command)
            .await
            .map_err(|e| e.into_engine_error(command))
    }

    async fn send(&self, command: DeviceCommand) -> Result<CommandOutput, EngineError> {
        self.shell(&command.to_shell()).await
    }

    async fn tap(&self, element: &UiElement) -> Result<(), EngineError> {
        self.send(DeviceCommand::Tap {
            x: element.center_x,
            y: element.center_y,
        })
        .await
        .map(drop)
    }

    /// Resolve parameter `index` of `step` to an on-screen element.
    async fn locate(&self, step: &Step, index: usize, what: &str) -> Result<UiElement, EngineError> {
        let param = step
            .param(index)
            .ok_or_else(|| EngineError::missing_argument(step.command, index + 1, what))?;
        let selector = selector_for(step, param)?;
        self.find(&selector).await
    }

    async fn find(&self, selector: &Selector) -> Result<UiElement, EngineError> {
        match self
            .resolver
            .resolve(selector, &self.cached_elements, &self.screenshot)
            .await
        {
            Some(resolution) => Ok(resolution.element),
            None => {
                let mut err = EngineError::element_not_found(&selector.to_string());
                err.message = format!(
                    "{}. Visible: {}",
                    err.message,
                    format_visible_elements(&self.cached_elements)
                );
                Err(err)
            }
        }
    }

    /// Sleep for `duration`, waking every tick to honour a stop request.
    async fn sleep(&self, duration: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::aborted());
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(self.config.cancel_tick.min(deadline - now)).await;
        }
    }

    async fn launch_app(&self, step: &Step, script: &Script) -> Result<(), EngineError> {
        let package = text_param(step, 0)
            .or_else(|| script.detail(PACKAGE_KEYS))
            .ok_or_else(|| EngineError::missing_detail(step.command, "a package", PACKAGE_KEYS))?;
        let activity = text_param(step, 1)
            .or_else(|| script.detail(ACTIVITY_KEYS))
            .ok_or_else(|| {
                EngineError::missing_detail(step.command, "an activity", ACTIVITY_KEYS)
            })?;

        let command = DeviceCommand::StartActivity {
            package: package.to_string(),
            activity: activity.to_string(),
        }
        .to_shell();
        let output = self.shell(&command).await?.combined();
        if reports_failure(&output) {
            return Err(EngineError::device_reported_failure(&command, &output));
        }
        info!("Launched {}/{}", package, activity);
        Ok(())
    }

    async fn close_app(&self, step: &Step, script: &Script) -> Result<(), EngineError> {
        let package = text_param(step, 0)
            .or_else(|| script.detail(PACKAGE_KEYS))
            .ok_or_else(|| EngineError::missing_detail(step.command, "a package", PACKAGE_KEYS))?;
        self.send(DeviceCommand::ForceStop {
            package: package.to_string(),
        })
        .await
        .map(drop)
    }

    async fn click(&self, step: &Step) -> Result<(), EngineError> {
        let element = self.locate(step, 0, "target").await?;
        self.tap(&element).await
    }

    async fn long_press(&self, step: &Step) -> Result<(), EngineError> {
        let element = self.locate(step, 0, "target").await?;
        let duration_ms = gesture_ms(step, 1)?.unwrap_or(self.config.long_press_ms);
        self.send(DeviceCommand::long_press(
            element.center_x,
            element.center_y,
            duration_ms,
        ))
        .await
        .map(drop)
    }

    async fn swipe(&mut self, step: &Step) -> Result<(), EngineError> {
        if let Some(Parameter::Direction(_)) = step.param(0) {
            return self.directional_swipe(step, 0).await;
        }

        let from = self.locate(step, 0, "start").await?;
        let to = self.locate(step, 1, "end").await?;
        let duration_ms = gesture_ms(step, 2)?.unwrap_or(self.config.swipe_duration_ms);
        self.send(DeviceCommand::Swipe {
            from: (from.center_x, from.center_y),
            to: (to.center_x, to.center_y),
            duration_ms,
        })
        .await
        .map(drop)
    }

    /// Swipe in a direction, inside an element or across the screen.
    ///
    /// Parameters after the direction may be a target element and/or a
    /// gesture duration, in either order.
    async fn directional_swipe(&mut self, step: &Step, offset: usize) -> Result<(), EngineError> {
        let direction = match step.param(offset) {
            Some(Parameter::Direction(d)) => *d,
            Some(Parameter::Literal(word)) => Direction::from_keyword(word).ok_or_else(|| {
                EngineError::invalid_argument(step.command, format!("unknown direction '{}'", word))
            })?,
            Some(other) => {
                return Err(EngineError::invalid_argument(
                    step.command,
                    format!("expected a direction, got {}", other),
                ))
            }
            None => return Err(EngineError::missing_argument(step.command, offset + 1, "direction")),
        };

        let mut area: Option<Bounds> = None;
        let mut duration_ms = self.config.swipe_duration_ms;
        for index in offset + 1..step.parameters.len() {
            match gesture_ms(step, index) {
                Ok(Some(ms)) => duration_ms = ms,
                _ => area = Some(self.locate(step, index, "container").await?.bounds),
            }
        }

        let area = match area {
            Some(bounds) => bounds,
            None => screen_bounds(self.screen_size().await?),
        };
        let (from, to) = directional_swipe(area, direction);
        self.send(DeviceCommand::Swipe {
            from,
            to,
            duration_ms,
        })
        .await
        .map(drop)
    }

    /// Screen size from the last snapshot, or asked from the device.
    async fn screen_size(&mut self) -> Result<ScreenSize, EngineError> {
        if let Some(size) = self.screen_size {
            return Ok(size);
        }
        let command = DeviceCommand::WindowSize.to_shell();
        let output = self.shell(&command).await?;
        let size = parse_window_size(&output.stdout).ok_or_else(|| {
            EngineError::device_command_failed(&command, Some("could not determine screen size"))
        })?;
        self.screen_size = Some(size);
        Ok(size)
    }

    async fn input_text(&self, step: &Step) -> Result<(), EngineError> {
        let text_index = if step.parameters.len() >= 2 {
            let target = self.locate(step, 0, "target").await?;
            self.tap(&target).await?;
            1
        } else {
            0
        };

        let text = match step.param(text_index) {
            Some(Parameter::Literal(s)) | Some(Parameter::ElementReference(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(EngineError::missing_argument(step.command, text_index + 1, "text")),
        };
        if text.is_empty() {
            debug!("Nothing to type");
            return Ok(());
        }

        if is_plain_input(&text) {
            self.send(DeviceCommand::Text(text)).await.map(drop)
        } else {
            let payload = general_purpose::STANDARD.encode(text.as_bytes());
            self.shell(&encode_ime_text(&payload)).await.map(drop)
        }
    }

    async fn clear_field(&self, step: &Step) -> Result<(), EngineError> {
        let target = if step.param(0).is_some() {
            let element = self.locate(step, 0, "target").await?;
            self.tap(&element).await?;
            Some(element)
        } else {
            self.cached_elements.iter().find(|e| e.focused).cloned()
        };

        let count = target
            .map(|e| e.text.chars().count())
            .filter(|n| *n > 0)
            .unwrap_or(self.config.clear_fallback_chars);
        self.send(clear_field_keys(count)).await.map(drop)
    }

    async fn hide_keyboard(&self) -> Result<(), EngineError> {
        let dump = self.send(DeviceCommand::DumpInputMethod).await?;
        if keyboard_shown(&dump.stdout) {
            self.send(DeviceCommand::key(KEYCODE_BACK)).await.map(drop)
        } else {
            debug!("Keyboard already hidden");
            Ok(())
        }
    }

    async fn wait(&mut self, step: &Step) -> Result<(), EngineError> {
        let param = step
            .param(0)
            .ok_or_else(|| EngineError::missing_argument(step.command, 1, "duration or element"))?;

        if let Some(duration) = param.as_duration() {
            debug!("Sleeping {}ms", duration.as_millis());
            return self.sleep(duration).await;
        }

        let selector = selector_for(step, param)?;
        let timeout = step
            .param(1)
            .and_then(Parameter::as_duration)
            .unwrap_or(self.config.wait_timeout);
        self.wait_for(&selector, timeout).await
    }

    /// Poll until `selector` resolves, resyncing between attempts.
    async fn wait_for(&mut self, selector: &Selector, timeout: Duration) -> Result<(), EngineError> {
        let start = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::aborted());
            }

            if let Some(found) = self
                .resolver
                .resolve(selector, &self.cached_elements, &self.screenshot)
                .await
            {
                debug!(
                    "Found {} after {}ms: {}",
                    selector,
                    start.elapsed().as_millis(),
                    found.element.label()
                );
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(EngineError::timeout(&selector.to_string(), elapsed.as_millis()));
            }

            self.sleep(self.config.poll_interval.min(timeout - elapsed)).await?;
            self.refresh().await;
        }
    }

    async fn assert(&self, step: &Step) -> Result<(), EngineError> {
        let param = step
            .param(0)
            .ok_or_else(|| EngineError::missing_argument(step.command, 1, "target"))?;
        let selector = selector_for(step, param)?;
        let target = selector.to_string();

        let found = self
            .resolver
            .resolve(&selector, &self.cached_elements, &self.screenshot)
            .await
            .map(|r| r.element);

        match step.param(1) {
            None | Some(Parameter::Boolean(true)) => match found {
                Some(_) => Ok(()),
                None => Err(EngineError::assertion_failed(&target, "present", "not found")),
            },
            Some(Parameter::Boolean(false)) => match found {
                None => Ok(()),
                Some(el) => Err(EngineError::assertion_failed(
                    &target,
                    "absent",
                    format!("found {}", el.label()),
                )),
            },
            Some(Parameter::Literal(expected)) | Some(Parameter::ElementReference(expected)) => {
                let expected_text = format!("text \"{}\"", expected);
                match found {
                    None => Err(EngineError::assertion_failed(&target, expected_text, "not found")),
                    Some(el) if element_text(&el) == expected => Ok(()),
                    Some(el) => Err(EngineError::assertion_failed(
                        &target,
                        expected_text,
                        format!("text \"{}\"", element_text(&el)),
                    )),
                }
            }
            Some(other) => Err(EngineError::invalid_argument(
                step.command,
                format!("unsupported condition {}", other),
            )),
        }
    }
}

/// Visible text, falling back to the content description.
fn element_text(element: &UiElement) -> &str {
    if element.text.is_empty() {
        &element.content_desc
    } else {
        &element.text
    }
}

fn selector_for(step: &Step, param: &Parameter) -> Result<Selector, EngineError> {
    Selector::from_parameter(param).ok_or_else(|| {
        EngineError::invalid_argument(
            step.command,
            format!("expected an element, image or coordinate, got {}", param),
        )
    })
}

fn text_param(step: &Step, index: usize) -> Option<&str> {
    step.param(index)
        .and_then(Parameter::as_text)
        .filter(|s| !s.is_empty())
}

/// Optional gesture duration at `index`, in milliseconds.
///
/// Bare integers are milliseconds here, unlike `wait` where they are
/// seconds.
fn gesture_ms(step: &Step, index: usize) -> Result<Option<u64>, EngineError> {
    match step.param(index) {
        None => Ok(None),
        Some(Parameter::Integer(n)) if *n >= 0 => Ok(Some(*n as u64)),
        Some(p @ Parameter::Duration { .. }) => {
            Ok(p.as_duration().map(|d| d.as_millis() as u64))
        }
        Some(other) => Err(EngineError::invalid_argument(
            step.command,
            format!("expected a duration, got {}", other),
        )),
    }
}

fn display_name<'a>(script: &'a Script, script_file: &'a str) -> &'a str {
    [script.script_name.as_str(), script.case_id.as_str(), script_file]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or("script")
}
