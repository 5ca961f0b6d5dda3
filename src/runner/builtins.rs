//! Built-in local commands: `Vars`, `Globals`, `Debug`, `Script` and `System`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use super::context::{is_valid_variable, Scope, ILLEGAL_VARIABLE_MSG};
use super::error::{ScriptError, ScriptFailure, StepOutcome};
use super::executor::{should_abort, CommandOutcome, ScriptProcessor};
use super::registry::{CommandRegistry, LocalCommand};
use super::state::{StepResult, StepStatus};
use super::world::DATA_EXT;
use crate::parser::{parse_csv_file, parse_line, Command};
use crate::utils::config::StepConfig;
use crate::verify::VerifyKind;

/// Registry holding every built-in command
pub fn registry() -> CommandRegistry {
    let builtins: Vec<(&str, &str, Arc<dyn LocalCommand>)> = vec![
        ("Vars", "Define", Arc::new(VarsDefine)),
        ("Vars", "Verify*", Arc::new(VarsVerify)),
        ("Globals", "Define", Arc::new(GlobalsDefine)),
        ("Globals", "Set", Arc::new(GlobalsDefine)),
        ("Debug", "Print", Arc::new(DebugPrint)),
        ("Debug", "Vars", Arc::new(DebugVars)),
        ("Script", "Run", Arc::new(ScriptRun)),
        ("Script", "RunIf", Arc::new(ScriptRunIf)),
        ("Script", "RunWith", Arc::new(ScriptRunWith)),
        ("System", "Exec", Arc::new(SystemExec)),
        ("System", "ExecAndReturn", Arc::new(SystemExecAndReturn)),
    ];

    let mut registry = CommandRegistry::new();
    for (component_type, action, handler) in builtins {
        if let Err(e) = registry.register(component_type, action, handler) {
            log::error!("{}", e);
        }
    }
    registry
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// `Vars * Define name[=default] ...`: bind variables from the invoking
/// command's args, falling back to the defaults
struct VarsDefine;

#[async_trait]
impl LocalCommand for VarsDefine {
    async fn run(
        &self,
        _processor: &mut ScriptProcessor,
        command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome {
        if command.args().is_empty() {
            return CommandOutcome::invalid(format!(
                "command '{}' must define at least one variable",
                command.command_name()
            ));
        }

        for (i, arg) in command.args().iter().enumerate() {
            let (key, default) = match arg.split_once('=') {
                Some((key, value)) => (key, strip_quotes(value).to_string()),
                None => (arg.as_str(), format!("<{}>", arg)),
            };
            if !is_valid_variable(key) {
                return CommandOutcome::invalid(format!(
                    "command '{}' has illegal variable '{}' -- {}",
                    command.command_name(),
                    key,
                    ILLEGAL_VARIABLE_MSG
                ));
            }

            // Already bound by a data row
            if scope.has_variable(key) {
                continue;
            }

            match scope.args().get(i).cloned() {
                Some(parent) if parent == "*" => scope.set_variable(key, &default),
                Some(parent) if i == 0 && parent.to_lowercase().ends_with(DATA_EXT) => {
                    return CommandOutcome::invalid(format!(
                        "datafile '{}' is missing column '{}' from the header row",
                        parent, key
                    ));
                }
                Some(parent) => scope.set_variable(key, &parent),
                None => scope.set_variable(key, &default),
            }
        }
        StepOutcome::ok().into()
    }
}

/// `Vars * Verify* expected name`
struct VarsVerify;

#[async_trait]
impl LocalCommand for VarsVerify {
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome {
        let (expected, name) = match command.args() {
            [] => {
                return CommandOutcome::invalid(format!(
                    "command '{}' must have the expected value as its first arg",
                    command
                ))
            }
            [_] => {
                return CommandOutcome::invalid(format!(
                    "command '{}' must have a variable as its second arg",
                    command
                ))
            }
            [expected, name, ..] => (expected, name),
        };

        let Some(value) = scope
            .variable(name)
            .or_else(|| processor.globals().get(name))
            .map(str::to_string)
        else {
            return CommandOutcome::invalid(format!(
                "command '{}' must have a valid variable as its second arg -- variable '{}' not found",
                command, name
            ));
        };
        let Some(kind) = VerifyKind::from_action(command.action()) else {
            return CommandOutcome::invalid(format!(
                "command '{}' has unknown action '{}'",
                command,
                command.action()
            ));
        };

        let outcome = if kind.check(Some(expected), Some(&value)) {
            StepOutcome::ok()
        } else {
            StepOutcome::Failed(ScriptFailure::VerifyMismatch(
                kind.failure_message(expected, Some(&value)),
            ))
        };
        if command.should_fail() {
            outcome.reconcile_should_fail().into()
        } else {
            outcome.into()
        }
    }
}

/// `Globals * Define name=value ...` (also `Set`)
struct GlobalsDefine;

#[async_trait]
impl LocalCommand for GlobalsDefine {
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        command: &Command,
        _scope: &mut Scope,
    ) -> CommandOutcome {
        if command.args().is_empty() {
            return CommandOutcome::invalid(format!(
                "command '{}' must {} at least one global variable",
                command.command_name(),
                command.action().to_lowercase()
            ));
        }

        let context = format!("command '{}' has", command.command_name());
        for arg in command.args() {
            let Some((key, value)) = arg.split_once('=') else {
                return CommandOutcome::invalid(format!(
                    "command '{}' has bad argument '{}' -- arguments must be in the form of name=value",
                    command.command_name(),
                    arg
                ));
            };
            if let Err(e) = processor
                .globals_mut()
                .set(key, strip_quotes(value), Some(&context))
            {
                return CommandOutcome::invalid(e);
            }
        }
        StepOutcome::ok().into()
    }
}

struct DebugPrint;

#[async_trait]
impl LocalCommand for DebugPrint {
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        command: &Command,
        _scope: &mut Scope,
    ) -> CommandOutcome {
        let message = command.args().join(" ");
        processor.print(&format!("{}\n", message));
        CommandOutcome::from(StepOutcome::ok()).with_debug(message)
    }
}

struct DebugVars;

#[async_trait]
impl LocalCommand for DebugVars {
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        _command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome {
        let message: String = scope
            .variables()
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect();
        processor.print(&message);
        CommandOutcome::from(StepOutcome::ok()).with_debug(message)
    }
}

/// `Script name Run args...`
struct ScriptRun;

#[async_trait]
impl LocalCommand for ScriptRun {
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome {
        let child = Scope::for_command(command, scope);
        let result = processor.run_script_in(command.monkey_id(), child).await;
        CommandOutcome::from_playback(result)
    }
}

/// `Script name RunIf <verify command>`: run only when the embedded verify passes
struct ScriptRunIf;

#[async_trait]
impl LocalCommand for ScriptRunIf {
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome {
        if command.args().is_empty() {
            return CommandOutcome::invalid(format!(
                "command '{}' must have a valid verify command as its arguments",
                command
            ));
        }

        let verify = parse_line(&format!(
            "{} {}",
            command.args_as_string(),
            command.modifiers_as_string()
        ));
        if !verify.action().to_lowercase().starts_with("verify") {
            return CommandOutcome::invalid(format!(
                "command '{}' has invalid verify command '{}'",
                command, verify
            ));
        }

        match processor.dispatch(&verify, scope).await.outcome {
            StepOutcome::Failed(failure) => StepOutcome::passed(format!(
                "not running {} - {}",
                command.monkey_id(),
                failure
            ))
            .into(),
            StepOutcome::Errored(error) => {
                StepOutcome::Errored(ScriptError::Script(format!("verify error - {}", error)))
                    .into()
            }
            StepOutcome::Passed(_) | StepOutcome::Skipped(_) => {
                let run = Command::new(
                    command.component_type(),
                    command.monkey_id(),
                    "Run",
                    Vec::new(),
                    BTreeMap::new(),
                );
                let child = Scope::for_command(&run, scope);
                let result = processor.run_script_in(command.monkey_id(), child).await;
                CommandOutcome::from_playback(result)
            }
        }
    }
}

/// `Script name RunWith data.csv args...`: run once per data row
struct ScriptRunWith;

#[async_trait]
impl LocalCommand for ScriptRunWith {
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome {
        let Some(datafile) = command.args().first() else {
            return CommandOutcome::invalid(format!(
                "command '{}' must have a datafile as its first arg",
                command
            ));
        };
        let Some(path) = processor.world().data(datafile) else {
            return StepOutcome::Errored(ScriptError::DataFileNotFound(datafile.clone())).into();
        };
        let rows = parse_csv_file(&path, true).unwrap_or_default();
        if rows.is_empty() {
            return CommandOutcome::invalid(format!("datafile '{}' has no data", datafile));
        }

        let step_config = StepConfig::resolve(command, processor.config());
        let mut steps = Vec::new();
        let mut aborted = None;

        for (i, row) in rows.iter().enumerate() {
            let index = i + 1;
            let child = Scope::for_command(command, scope).with_variables(row.iter());
            let result = processor.run_script_in(command.monkey_id(), child).await;
            let outcome = StepOutcome::from_status(result.status, result.message.clone());

            let label = command
                .to_string()
                .replace(datafile.as_str(), &format!("{}[@{}]", datafile, index));
            steps.push(StepResult {
                index,
                command: label,
                command_name: command.command_name(),
                scope: scope.hierarchy(),
                status: StepStatus::from(&outcome),
                message: result.message.clone(),
                warning: result.warning.clone(),
                debug: None,
                screenshot: None,
                metrics: None,
                duration_ms: Some(result.duration_ms),
                retry_count: 0,
                steps: result.steps,
            });

            if should_abort(&outcome, &step_config) {
                aborted = Some(outcome);
                break;
            }
        }

        let processed = format!("{} data records processed", steps.len());
        let outcome = match aborted {
            Some(outcome) => {
                let message = match outcome.message().filter(|m| !m.is_empty()) {
                    Some(m) => format!("{}: {}", m, processed),
                    None => processed,
                };
                StepOutcome::from_status(outcome.status(), Some(message))
            }
            None => StepOutcome::passed(processed),
        };
        CommandOutcome::from(outcome).with_steps(steps)
    }
}

/// `System * Exec program args...`
struct SystemExec;

#[async_trait]
impl LocalCommand for SystemExec {
    async fn run(
        &self,
        _processor: &mut ScriptProcessor,
        command: &Command,
        _scope: &mut Scope,
    ) -> CommandOutcome {
        if command.args().is_empty() {
            return CommandOutcome::invalid(format!(
                "command '{}' must have a system command to execute as its first arg",
                command
            ));
        }
        exec(command.args()).await.into()
    }
}

/// `System * ExecAndReturn name program args...`: like `Exec`, storing the
/// output in a variable
struct SystemExecAndReturn;

#[async_trait]
impl LocalCommand for SystemExecAndReturn {
    async fn run(
        &self,
        _processor: &mut ScriptProcessor,
        command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome {
        let (name, program) = match command.args() {
            [] => {
                return CommandOutcome::invalid(format!(
                    "command '{}' must have a variable as its first arg",
                    command
                ))
            }
            [_] => {
                return CommandOutcome::invalid(format!(
                    "command '{}' must have a system command to execute as its second arg",
                    command
                ))
            }
            [name, program @ ..] => (name, program),
        };

        let outcome = exec(program).await;
        scope.set_variable(name, &outcome.message().unwrap_or_default());
        outcome.into()
    }
}

/// Run a host process. Stdout and stderr form the message; a non-zero exit
/// is an error ending in `err <code>`.
async fn exec(args: &[String]) -> StepOutcome {
    let Some((program, rest)) = args.split_first() else {
        return StepOutcome::invalid("no system command to execute");
    };
    log::debug!("exec: {}", args.join(" "));

    let output = match tokio::process::Command::new(program)
        .args(rest)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            return StepOutcome::Errored(ScriptError::Script(format!(
                "unable to execute '{}': {}",
                program, e
            )))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let (stdout, stderr) = (stdout.trim_end(), stderr.trim_end());
    let mut out = stdout.to_string();
    if !stdout.is_empty() && !stderr.is_empty() {
        out.push('\n');
    }
    out.push_str(stderr);

    if output.status.success() {
        return StepOutcome::passed(out);
    }
    let code = output
        .status
        .code()
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!("err {}", code));
    StepOutcome::Errored(ScriptError::Script(out))
}
