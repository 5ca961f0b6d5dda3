use base64::{engine::general_purpose::STANDARD, Engine};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::builtins;
use super::context::{is_valid_variable, Globals, Scope, ILLEGAL_VARIABLE_MSG};
use super::error::{PlaybackStatus, ScriptError, ScriptFailure, StepOutcome};
use super::events::PlaybackListener;
use super::registry::CommandRegistry;
use super::state::{Metrics, PlaybackResult, StepResult, StepState};
use super::world::{CommandWorld, SUITE_EXT};
use crate::agent::Agent;
use crate::parser::types::modifier;
use crate::parser::{parse_line, parse_script_file, Command};
use crate::protocol::{CommandSender, Response, Timing};
use crate::utils::config::{PlaybackConfig, StepConfig, DEFAULT_WAITFOR_TIMEOUT_MS};
use crate::verify::VerifyKind;

/// Component types that only make sense inside a suite
const SUITE_COMPONENTS: &[&str] = &["test", "setup", "teardown", "suite"];

const SCREENSHOT_COMMAND: &str = "Device * Screenshot";
const METRICS_COMMAND: &str = "Device * Get dummy allinfo";

pub type PlaybackFuture<'a> = Pin<Box<dyn Future<Output = PlaybackResult> + Send + 'a>>;

/// Result of running one command, before it becomes a [`StepResult`]
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub outcome: StepOutcome,
    pub warning: Option<String>,
    pub debug: Option<String>,
    /// Base64 PNG returned by the agent
    pub screenshot: Option<String>,
    pub metrics: Option<Metrics>,
    pub retries: u32,
    /// Steps of a sub-script (or data rows) run by this command
    pub steps: Vec<StepResult>,
}

impl From<StepOutcome> for CommandOutcome {
    fn from(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            warning: None,
            debug: None,
            screenshot: None,
            metrics: None,
            retries: 0,
            steps: Vec::new(),
        }
    }
}

impl CommandOutcome {
    pub fn invalid(message: impl Into<String>) -> Self {
        StepOutcome::invalid(message).into()
    }

    pub fn from_playback(result: PlaybackResult) -> Self {
        let mut outcome: Self = StepOutcome::from_status(result.status, result.message).into();
        outcome.warning = result.warning;
        outcome.steps = result.steps;
        outcome
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }

    pub fn with_steps(mut self, steps: Vec<StepResult>) -> Self {
        self.steps = steps;
        self
    }

    pub fn status(&self) -> PlaybackStatus {
        self.outcome.status()
    }
}

/// Whether `outcome` ends the run under the step's `%abort` setting
pub fn should_abort(outcome: &StepOutcome, step: &StepConfig) -> bool {
    match outcome {
        StepOutcome::Failed(_) => step.abort_on_failure,
        StepOutcome::Errored(e) => step.abort_on_error || e.is_fatal(),
        _ => false,
    }
}

/// Stops a running processor before its next command
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Plays scripts against one agent, one command at a time.
pub struct ScriptProcessor {
    agent: Arc<dyn Agent>,
    world: CommandWorld,
    config: PlaybackConfig,
    globals: Globals,
    registry: Arc<CommandRegistry>,
    listeners: Vec<Arc<dyn PlaybackListener>>,
    abort: AbortHandle,
}

impl ScriptProcessor {
    /// Processor for scripts under `root`. Globals are seeded from
    /// `globals.properties` in the root when present.
    pub fn new(root: impl Into<PathBuf>, agent: Arc<dyn Agent>) -> Self {
        let world = CommandWorld::new(root);
        let mut globals = Globals::new();
        if let Err(e) = globals.load(&world.globals_file()) {
            log::warn!("unable to load globals: {}", e);
        }
        Self {
            agent,
            world,
            config: PlaybackConfig::default(),
            globals,
            registry: Arc::new(builtins::registry()),
            listeners: Vec::new(),
            abort: AbortHandle::default(),
        }
    }

    pub fn with_config(mut self, config: PlaybackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn PlaybackListener>) {
        self.listeners.push(listener);
    }

    /// Share an externally owned abort flag (e.g. a Ctrl+C handler)
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn world(&self) -> &CommandWorld {
        &self.world
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut Globals {
        &mut self.globals
    }

    /// Send text to every listener's `on_print`
    pub fn print(&self, message: &str) {
        self.notify(|l| l.on_print(message));
    }

    fn notify(&self, f: impl Fn(&dyn PlaybackListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }

    /// Run a script file from the root
    pub async fn run_script(&mut self, filename: &str) -> PlaybackResult {
        self.run_script_in(filename, Scope::new(Some(filename))).await
    }

    /// Run a script file in the given scope (sub-scripts, custom commands)
    pub fn run_script_in<'a>(&'a mut self, filename: &'a str, mut scope: Scope) -> PlaybackFuture<'a> {
        Box::pin(async move {
            if filename.to_lowercase().ends_with(SUITE_EXT) {
                return PlaybackResult::error(
                    format!("running suite '{}' as a script is not allowed", filename),
                    &scope.hierarchy(),
                );
            }
            let Some(path) = self.world.script(filename) else {
                return PlaybackResult::error(
                    ScriptError::ScriptNotFound(filename.to_string()).to_string(),
                    &scope.hierarchy(),
                );
            };
            let commands = parse_script_file(&path, false, true).unwrap_or_default();
            if commands.is_empty() {
                return PlaybackResult::error(
                    ScriptError::EmptyScript(filename.to_string()).to_string(),
                    &scope.hierarchy(),
                );
            }
            self.run_commands(&commands, &mut scope).await
        })
    }

    /// Run commands in order. The first aborting step ends the run and
    /// decides its status; otherwise the worst failing step does.
    pub async fn run_commands(&mut self, commands: &[Command], scope: &mut Scope) -> PlaybackResult {
        let started = Instant::now();
        self.notify(|l| l.on_script_start(scope));

        let mut result = if let Err(e) = self.agent.start() {
            PlaybackResult::error(e.to_string(), &scope.hierarchy())
        } else if commands.is_empty() {
            PlaybackResult::new(
                PlaybackStatus::Ok,
                Some("empty command list".to_string()),
                &scope.hierarchy(),
            )
        } else {
            self.run_steps(commands, scope).await
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        self.notify(|l| l.on_script_complete(scope, &result));
        result
    }

    async fn run_steps(&mut self, commands: &[Command], scope: &mut Scope) -> PlaybackResult {
        let mut result = PlaybackResult::new(PlaybackStatus::Ok, None, &scope.hierarchy());

        for (i, command) in commands.iter().enumerate() {
            if self.abort.take() {
                log::info!("playback of {} aborted", scope.hierarchy());
                result.status = PlaybackStatus::Error;
                result.message = Some(ScriptError::Aborted.to_string());
                break;
            }

            let index = i + 1;
            scope.set_current(command, index);
            let mut state = StepState::new(index, &command.to_string());
            state.start();

            let outcome = self.run_command(command, scope).await;
            if outcome.retries > 0 {
                state.retry(outcome.retries);
            }
            state.finish(&outcome.outcome);

            let aborts = should_abort(&outcome.outcome, &StepConfig::resolve(command, &self.config));
            let step = self.step_result(&state, command, scope, outcome);
            if aborts {
                result.status = step.playback_status();
                result.message = step.message.clone();
                result.warning = step.warning.clone();
                result.steps.push(step);
                result.screenshots = collect_screenshots(&result.steps);
                return result;
            }
            result.steps.push(step);
        }

        // Non-aborting failures still fail the run; errors outrank failures
        let worst = result
            .steps
            .iter()
            .filter(|s| s.playback_status() == PlaybackStatus::Error)
            .chain(
                result
                    .steps
                    .iter()
                    .filter(|s| s.playback_status() == PlaybackStatus::Failure),
            )
            .next();
        if let Some(step) = worst {
            result.status = step.playback_status();
            result.message = step.message.clone();
            result.warning = step.warning.clone();
        }

        result.screenshots = collect_screenshots(&result.steps);
        result
    }

    /// Substitute, then run one command with listener notifications.
    /// Comments and ignored commands are skipped.
    pub async fn run_command(&mut self, command: &Command, scope: &mut Scope) -> CommandOutcome {
        if command.is_comment() {
            return StepOutcome::Skipped("comment".to_string()).into();
        }
        if command.is_blank() {
            return StepOutcome::Skipped("blank".to_string()).into();
        }
        if command.is_ignored() {
            return StepOutcome::Skipped("ignored".to_string()).into();
        }

        let full = match scope.substitute(command, &self.globals) {
            Ok(full) => full,
            Err(e) => return StepOutcome::Errored(e).into(),
        };
        scope.set_current(&full, scope.current_index());

        self.notify(|l| l.on_start(scope));
        let outcome = self.dispatch(&full, scope).await;
        let response = outcome.outcome.to_response();
        self.notify(|l| l.on_complete(scope, &response));
        outcome
    }

    /// Route an already-substituted command: local commands, custom command
    /// scripts, `Get`, `WaitFor*`, then the agent.
    pub async fn dispatch(&mut self, command: &Command, scope: &mut Scope) -> CommandOutcome {
        if let Some(handler) = self.registry.lookup(command) {
            return handler.run(self, command, scope).await;
        }

        if let Some(path) = self.world.custom_command(command) {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let child = Scope::for_file(&filename, command, scope);
            let result = self.run_script_in(&filename, child).await;
            return CommandOutcome::from_playback(result);
        }

        let component_type = command.component_type().to_lowercase();
        if SUITE_COMPONENTS.contains(&component_type.as_str()) {
            return CommandOutcome::invalid(format!(
                "command '{}' is only allowed in a suite (maybe you need to change the file extension to {}?)",
                command.command_name(),
                SUITE_EXT
            ));
        }

        let action = command.action().to_lowercase();
        if action == "get" || action == "execandreturn" {
            return self.get(command, scope).await;
        }
        if action.starts_with("waitfor") {
            return self.wait_for(command, scope).await;
        }
        self.play(command, scope).await
    }

    /// Play and store the reply message in the variable named by the first arg
    async fn get(&mut self, command: &Command, scope: &mut Scope) -> CommandOutcome {
        let Some(name) = command.args().first().cloned() else {
            return CommandOutcome::invalid(format!(
                "command '{}' must have a variable as its first arg",
                command
            ));
        };
        if !is_valid_variable(&name) {
            return CommandOutcome::invalid(format!(
                "command '{}' has illegal variable '{}' as its first arg -- {}",
                command, name, ILLEGAL_VARIABLE_MSG
            ));
        }

        let mut outcome = self.play(command, scope).await;
        if let StepOutcome::Passed(message) = &outcome.outcome {
            let value = message.clone().unwrap_or_default();
            if scope.has_variable(&name) || !self.globals.contains(&name) {
                scope.set_variable(&name, &value);
            } else if let Err(e) = self.globals.set(&name, &value, None) {
                log::warn!("{}", e);
            }
        }

        if name == "value" {
            outcome.warning = Some(format!(
                "command '{}' uses variable 'value' -- did you mean to use it as a property instead?",
                command
            ));
        }
        outcome
    }

    /// `WaitForX [seconds] args...` plays as `VerifyX args...` with a timeout
    async fn wait_for(&mut self, command: &Command, scope: &mut Scope) -> CommandOutcome {
        let mut args = command.args().to_vec();
        let mut timeout_ms = DEFAULT_WAITFOR_TIMEOUT_MS;

        if let Some(arg) = args.first().filter(|a| !a.is_empty()) {
            let seconds: i64 = match arg.trim().parse() {
                Ok(seconds) => seconds,
                Err(_) => {
                    return CommandOutcome::invalid(format!(
                        "command '{}' must have a number of seconds to wait as its first arg, found: {}",
                        command, arg
                    ))
                }
            };
            if seconds < 1 {
                return CommandOutcome::invalid(format!(
                    "command '{}' must have a number of seconds to wait greater than zero, found: {}",
                    command, arg
                ));
            }
            timeout_ms = seconds as u64 * 1000;
        }
        if !args.is_empty() {
            args.remove(0);
        }

        let suffix = command.action().get("waitfor".len()..).unwrap_or_default();
        let verify = command
            .with_action(&format!("Verify{}", suffix), args)
            .with_modifier(modifier::TIMEOUT, Some(&timeout_ms.to_string()));
        self.play(&verify, scope).await
    }

    /// Send a command to the agent: thinktime, then PLAY until it passes, is
    /// not retryable, or the timeout elapses. `%shouldfail` is applied to the
    /// final outcome.
    pub async fn play(&self, command: &Command, scope: &Scope) -> CommandOutcome {
        let step = StepConfig::resolve(command, &self.config);
        let sender = match self.agent.command_sender() {
            Ok(sender) => sender,
            Err(e) => return StepOutcome::Errored(ScriptError::Transport(e.to_string())).into(),
        };

        if step.thinktime_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.thinktime_ms)).await;
        }

        // Already paused; the agent must not pause again
        let timing = Timing {
            thinktime_ms: 0,
            ..step.timing()
        };
        let verify_kind = VerifyKind::from_action(command.action());
        let retry_delay = Duration::from_millis(step.retry_delay_ms.max(1));
        let deadline = Instant::now() + Duration::from_millis(step.timeout_ms);
        let mut retries = 0;

        let (outcome, response) = loop {
            let response = match sender.play(command, timing).await {
                Ok(response) => response,
                Err(e) => {
                    log::warn!("{}", e);
                    break (StepOutcome::Errored(ScriptError::Transport(e.to_string())), None);
                }
            };

            let outcome = check_response(command, verify_kind, &response);
            let retryable = match &outcome {
                StepOutcome::Failed(ScriptFailure::ComponentNotFound(_)) => true,
                StepOutcome::Failed(_) => verify_kind.is_some(),
                _ => false,
            };
            if !retryable || Instant::now() + retry_delay > deadline {
                break (outcome, Some(response));
            }

            retries += 1;
            log::debug!("retry {} of {}", retries, command);
            self.notify(|l| l.on_retry(scope, retries));
            tokio::time::sleep(retry_delay).await;
        };

        let outcome = if step.should_fail {
            outcome.reconcile_should_fail()
        } else {
            outcome
        };

        let mut result = CommandOutcome::from(outcome);
        result.retries = retries;

        // Transport errors leave nothing to ask the agent for
        let Some(response) = response else {
            return result;
        };
        result.warning = response.warning;

        let failed = result.outcome.is_failure() || result.outcome.is_error();
        if failed && step.screenshot_on_error {
            result.screenshot = match response.screenshot {
                Some(screenshot) => Some(screenshot),
                None => self.agent_screenshot(sender.as_ref()).await,
            };
        }
        if self.config.take_after_metrics {
            result.metrics = self.agent_metrics(sender.as_ref()).await;
        }
        result
    }

    async fn agent_screenshot(&self, sender: &dyn CommandSender) -> Option<String> {
        match sender.play(&parse_line(SCREENSHOT_COMMAND), Timing::default()).await {
            Ok(response) => response.screenshot,
            Err(e) => {
                log::warn!("unable to take screenshot: {}", e);
                None
            }
        }
    }

    async fn agent_metrics(&self, sender: &dyn CommandSender) -> Option<Metrics> {
        match sender.play(&parse_line(METRICS_COMMAND), Timing::default()).await {
            Ok(response) if response.is_ok() => Metrics::parse(response.message_or_empty()),
            Ok(response) => {
                log::debug!("metrics unavailable: {}", response.message_or_empty());
                None
            }
            Err(e) => {
                log::warn!("unable to fetch metrics: {}", e);
                None
            }
        }
    }

    fn step_result(
        &self,
        state: &StepState,
        command: &Command,
        scope: &Scope,
        outcome: CommandOutcome,
    ) -> StepResult {
        let shown = scope.current_command().unwrap_or(command);
        let screenshot = outcome
            .screenshot
            .as_deref()
            .and_then(|data| self.save_screenshot(data));

        StepResult {
            index: state.index,
            command: shown.to_string(),
            command_name: shown.command_name(),
            scope: scope.hierarchy(),
            status: state.status.clone(),
            message: outcome.outcome.message(),
            warning: outcome.warning,
            debug: outcome.debug,
            screenshot,
            metrics: outcome.metrics,
            duration_ms: state.duration_ms,
            retry_count: state.retry_count,
            steps: outcome.steps,
        }
    }

    /// Write a base64 PNG to `<output>/screenshots/`. Needs an output dir.
    fn save_screenshot(&self, data: &str) -> Option<String> {
        let dir = self.config.output_dir.as_ref()?.join("screenshots");
        let bytes = match STANDARD.decode(data.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("screenshot is not valid base64: {}", e);
                return None;
            }
        };
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("unable to create {}: {}", dir.display(), e);
            return None;
        }

        let stamp = chrono::Local::now().format("%Y-%m-%d_%H%M%S").to_string();
        let mut path = dir.join(format!("screenshot_{}.png", stamp));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("screenshot_{}_{}.png", stamp, n));
            n += 1;
        }

        match std::fs::write(&path, bytes) {
            Ok(()) => Some(path.to_string_lossy().to_string()),
            Err(e) => {
                log::warn!("unable to save screenshot {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Agent reply to outcome. Verify actions are re-checked locally against the
/// `verify.actual` the agent reports.
fn check_response(command: &Command, kind: Option<VerifyKind>, response: &Response) -> StepOutcome {
    let outcome = StepOutcome::from_response(response);
    let (Some(kind), StepOutcome::Passed(_)) = (kind, &outcome) else {
        return outcome;
    };
    let (Some(expected), Some(verify)) = (command.args().first(), response.verify.as_ref()) else {
        return outcome;
    };
    if kind.check(Some(expected), Some(&verify.actual)) {
        outcome
    } else {
        StepOutcome::Failed(ScriptFailure::VerifyMismatch(
            kind.failure_message(expected, Some(&verify.actual)),
        ))
    }
}

fn collect_screenshots(steps: &[StepResult]) -> Vec<String> {
    steps
        .iter()
        .flat_map(|step| {
            step.screenshot
                .iter()
                .cloned()
                .chain(collect_screenshots(&step.steps))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use super::ScriptProcessor;
    use crate::agent::MtAgent;
    use crate::parser::Command;
    use crate::protocol::{CommandSender, Response, SendError, Timing};
    use crate::utils::config::PlaybackConfig;

    type Reply = dyn Fn(&Command, usize) -> Result<Response, SendError> + Send + Sync;

    /// Sender answering with a closure of (command, nth call) and recording
    /// every PLAY
    pub struct FakeSender {
        reply: Box<Reply>,
        played: Mutex<Vec<String>>,
        timings: Mutex<Vec<Timing>>,
    }

    impl FakeSender {
        pub fn played(&self) -> Vec<String> {
            self.played.lock().unwrap().clone()
        }

        pub fn timings(&self) -> Vec<Timing> {
            self.timings.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandSender for FakeSender {
        async fn play(&self, command: &Command, timing: Timing) -> Result<Response, SendError> {
            self.timings.lock().unwrap().push(timing);
            let n = {
                let mut played = self.played.lock().unwrap();
                played.push(command.to_string());
                played.len()
            };
            (self.reply)(command, n)
        }

        async fn ping(&self, _record: Option<(&str, u16)>) -> Result<Response, SendError> {
            Ok(Response::default())
        }

        async fn record(&self, _command: &Command) -> Result<Response, SendError> {
            Ok(Response::default())
        }
    }

    pub fn fast_config() -> PlaybackConfig {
        PlaybackConfig {
            timeout_ms: Some(300),
            thinktime_ms: Some(0),
            retry_delay_ms: Some(10),
            screenshot_on_error: false,
            ..Default::default()
        }
    }

    pub fn processor(
        root: &Path,
        reply: impl Fn(&Command, usize) -> Result<Response, SendError> + Send + Sync + 'static,
    ) -> (ScriptProcessor, Arc<FakeSender>) {
        let sender = Arc::new(FakeSender {
            reply: Box::new(reply),
            played: Mutex::new(Vec::new()),
            timings: Mutex::new(Vec::new()),
        });
        let agent = Arc::new(MtAgent::with_sender("Fake", sender.clone()));
        let processor = ScriptProcessor::new(root, agent).with_config(fast_config());
        (processor, sender)
    }

    pub fn ok(_: &Command, _: usize) -> Result<Response, SendError> {
        Ok(Response::ok(None::<String>))
    }
}
