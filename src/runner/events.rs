use super::context::Scope;
use super::error::PlaybackStatus;
use super::state::PlaybackResult;
use crate::protocol::{Response, ResponseStatus};
use tokio::sync::broadcast;

/// Callbacks fired by the playback engine. All methods default to no-ops.
pub trait PlaybackListener: Send + Sync {
    fn on_script_start(&self, _scope: &Scope) {}

    fn on_script_complete(&self, _scope: &Scope, _result: &PlaybackResult) {}

    /// A step in `scope` is about to run (`scope.current_command()`)
    fn on_start(&self, _scope: &Scope) {}

    /// The current step is being re-sent because its target was not ready
    fn on_retry(&self, _scope: &Scope, _attempt: u32) {}

    fn on_complete(&self, _scope: &Scope, _response: &Response) {}

    /// Output of `Debug.Print` / `Debug.Vars`
    fn on_print(&self, _message: &str) {}
}

/// Playback events for real-time updates
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    ScriptStarted {
        script: String,
        depth: usize,
    },
    ScriptFinished {
        script: String,
        status: PlaybackStatus,
        message: Option<String>,
        duration_ms: u64,
        depth: usize,
    },

    StepStarted {
        index: usize,
        command: String,
        depth: usize,
    },
    StepRetrying {
        index: usize,
        attempt: u32,
        depth: usize,
    },
    StepFinished {
        index: usize,
        status: ResponseStatus,
        message: Option<String>,
        depth: usize,
    },

    Print {
        message: String,
        depth: usize,
    },
}

/// Broadcasts listener callbacks as [`PlaybackEvent`]s
pub struct EventEmitter {
    sender: broadcast::Sender<PlaybackEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<PlaybackEvent>) {
        let (sender, receiver) = broadcast::channel(100);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: PlaybackEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

impl PlaybackListener for EventEmitter {
    fn on_script_start(&self, scope: &Scope) {
        self.emit(PlaybackEvent::ScriptStarted {
            script: scope.hierarchy(),
            depth: scope.depth(),
        });
    }

    fn on_script_complete(&self, scope: &Scope, result: &PlaybackResult) {
        self.emit(PlaybackEvent::ScriptFinished {
            script: scope.hierarchy(),
            status: result.status,
            message: result.message.clone(),
            duration_ms: result.duration_ms,
            depth: scope.depth(),
        });
    }

    fn on_start(&self, scope: &Scope) {
        let command = scope
            .current_command()
            .map(|c| c.to_string())
            .unwrap_or_default();
        self.emit(PlaybackEvent::StepStarted {
            index: scope.current_index(),
            command,
            depth: scope.depth(),
        });
    }

    fn on_retry(&self, scope: &Scope, attempt: u32) {
        self.emit(PlaybackEvent::StepRetrying {
            index: scope.current_index(),
            attempt,
            depth: scope.depth(),
        });
    }

    fn on_complete(&self, scope: &Scope, response: &Response) {
        self.emit(PlaybackEvent::StepFinished {
            index: scope.current_index(),
            status: response.status,
            message: response.message.clone(),
            depth: scope.depth(),
        });
    }

    fn on_print(&self, message: &str) {
        self.emit(PlaybackEvent::Print {
            message: message.trim_end().to_string(),
            depth: 0,
        });
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::{Duration as StdDuration, Instant};

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<PlaybackEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        // Piped output gets no spinner escape codes
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        // One live spinner per nesting depth
        let mut spinners: Vec<Option<ProgressBar>> = Vec::new();
        let mut step_texts: Vec<String> = Vec::new();
        let mut step_started: Vec<Option<Instant>> = Vec::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                PlaybackEvent::ScriptStarted { script, depth } => {
                    // A nested script freezes the spinners of the steps that started it
                    for pb in spinners.iter_mut().take(depth).filter_map(Option::take) {
                        pb.finish();
                    }

                    let indent = "    ".repeat(depth);
                    println!("\n{}  {} Script: {}", indent, "→".blue(), script.white().bold());
                }

                PlaybackEvent::ScriptFinished {
                    script,
                    status,
                    message,
                    duration_ms,
                    depth,
                } => {
                    if let Some(pb) = spinners.get_mut(depth).and_then(Option::take) {
                        pb.finish();
                    }

                    let status_str = match status {
                        PlaybackStatus::Ok => "OK".green().bold(),
                        PlaybackStatus::Failure => "FAILURE".red().bold(),
                        PlaybackStatus::Error => "ERROR".red().bold(),
                    };
                    let indent = "    ".repeat(depth);
                    println!("{}  {} Script {} [{}]", indent, "←".blue(), script, status_str);
                    if status != PlaybackStatus::Ok {
                        if let Some(msg) = message {
                            println!("{}    {}", indent, msg.red());
                        }
                    }
                    println!("{}    Duration: {}ms", indent, duration_ms);
                }

                PlaybackEvent::StepStarted {
                    index,
                    command,
                    depth,
                } => {
                    if depth >= spinners.len() {
                        spinners.resize(depth + 1, None);
                        step_texts.resize(depth + 1, String::new());
                        step_started.resize(depth + 1, None);
                    }

                    let pb = multi.add(ProgressBar::new_spinner());
                    let indent = "    ".repeat(depth);
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template(&format!("{}    {{spinner}} {{msg}}", indent))
                    {
                        pb.set_style(style);
                    }

                    let body = format!("[{}] {}... ", index, command.dimmed());
                    pb.set_message(body.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));

                    spinners[depth] = Some(pb);
                    step_texts[depth] = body;
                    step_started[depth] = Some(Instant::now());
                }

                PlaybackEvent::StepRetrying { attempt, depth, .. } => {
                    if let Some(Some(pb)) = spinners.get(depth) {
                        pb.set_message(format!(
                            "{} {}",
                            step_texts[depth],
                            format!("↻ retry {}", attempt).yellow()
                        ));
                    }
                }

                PlaybackEvent::StepFinished {
                    status,
                    message,
                    depth,
                    ..
                } => {
                    if depth >= spinners.len() {
                        continue;
                    }
                    let indent = "    ".repeat(depth);
                    let elapsed = step_started[depth]
                        .take()
                        .map(|t| t.elapsed().as_millis())
                        .unwrap_or(0);
                    let mark = match status {
                        ResponseStatus::Ok => "✓".green(),
                        ResponseStatus::Failure => "✗".red(),
                        ResponseStatus::Error => "✗".red().bold(),
                    };
                    let mut done_msg =
                        format!("{}    {} {}({}ms)", indent, mark, step_texts[depth], elapsed);
                    if status != ResponseStatus::Ok {
                        if let Some(msg) = message {
                            done_msg.push_str(&format!("\n{}      {}", indent, msg.red()));
                        }
                    }

                    if let Some(pb) = spinners[depth].take() {
                        pb.finish_and_clear();
                        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                    }
                    println!("{}", done_msg);
                }

                PlaybackEvent::Print { message, depth } => {
                    let indent = "    ".repeat(depth);
                    multi.println(format!("{}      {}", indent, message)).ok();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    #[tokio::test]
    async fn test_emitter_translates_callbacks() {
        let (emitter, mut rx) = EventEmitter::new();
        let mut scope = Scope::new(Some("a.mt"));
        scope.set_current(&parse_line("Button OK Tap"), 2);

        emitter.on_start(&scope);
        emitter.on_complete(&scope, &Response::failure("Unable to find Button(OK)"));
        emitter.on_print("hello\n");

        match rx.recv().await.unwrap() {
            PlaybackEvent::StepStarted { index, command, depth } => {
                assert_eq!(index, 2);
                assert_eq!(command, "Button OK Tap");
                assert_eq!(depth, 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            PlaybackEvent::StepFinished { status, message, .. } => {
                assert_eq!(status, ResponseStatus::Failure);
                assert_eq!(message.as_deref(), Some("Unable to find Button(OK)"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            PlaybackEvent::Print { message, .. } => assert_eq!(message, "hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
