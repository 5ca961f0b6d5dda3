pub mod builtins;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod registry;
pub mod state;
pub mod world;

use anyhow::Result;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::Agent;
use crate::utils::config::PlaybackConfig;

pub use context::{Globals, Scope};
pub use error::{PlaybackStatus, ScriptError, ScriptFailure, StepOutcome};
pub use events::*;
pub use executor::{AbortHandle, CommandOutcome, ScriptProcessor};
pub use registry::{CommandRegistry, LocalCommand, RegistryError};
pub use state::*;
pub use world::CommandWorld;

/// Run one script, or every script in a directory, against `agent`.
///
/// Scripts run one after another on a single processor, so globals set by
/// one script are visible to the next. Custom command files and suites in a
/// directory are not run directly.
pub async fn run_scripts(
    path: &Path,
    agent: Arc<dyn Agent>,
    config: PlaybackConfig,
    abort: AbortHandle,
) -> Result<RunReport> {
    let (root, files) = collect_scripts(path)?;
    let session_id = uuid::Uuid::new_v4().to_string();

    if files.is_empty() {
        println!("{} No scripts found in {}", "ℹ".blue(), path.display());
        return Ok(RunReport::new(&session_id, Vec::new()));
    }

    let (emitter, receiver) = EventEmitter::new();
    let console = tokio::spawn(ConsoleEventListener::listen(receiver));

    let mut processor = ScriptProcessor::new(&root, agent.clone())
        .with_config(config)
        .with_abort_handle(abort.clone());
    processor.add_listener(Arc::new(emitter));

    let mut scripts = Vec::new();
    for file in &files {
        if abort.is_aborted() {
            break;
        }
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        log::info!("running {}", file.display());

        let result = processor.run_script(&name).await;
        let aborted =
            result.message.as_deref() == Some(ScriptError::Aborted.to_string().as_str());
        scripts.push(ScriptReport {
            name,
            path: file.to_string_lossy().to_string(),
            result,
        });
        if aborted {
            break;
        }
    }

    // Closing the emitter ends the console task
    drop(processor);
    let _ = console.await;
    agent.close();

    let report = RunReport::new(&session_id, scripts);
    print_summary(&report);
    Ok(report)
}

/// Script root and the scripts to run under it
fn collect_scripts(path: &Path) -> Result<(PathBuf, Vec<PathBuf>)> {
    if path.is_dir() {
        let world = CommandWorld::new(path);
        return Ok((path.to_path_buf(), world.scripts()));
    }
    if !path.is_file() {
        anyhow::bail!("script '{}' not found", path.display());
    }
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    Ok((root, vec![path.to_path_buf()]))
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    println!("\n{}", "═".repeat(50));
    println!(
        "{} scripts, {} steps: {} passed, {} failed, {} errors, {} skipped ({}ms)",
        summary.total_scripts,
        summary.total_steps,
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.errored.to_string().red(),
        summary.skipped.to_string().yellow(),
        summary.total_duration_ms
    );
    for script in &report.scripts {
        let status = match script.result.status {
            PlaybackStatus::Ok => "OK".green().bold(),
            PlaybackStatus::Failure => "FAILURE".red().bold(),
            PlaybackStatus::Error => "ERROR".red().bold(),
        };
        println!("  [{}] {}", status, script.name);
        if let Some(message) = script.result.message.as_ref().filter(|_| !script.result.is_ok()) {
            println!("        {}", message.red());
        }
    }
}
