//! Record listener
//!
//! Agents POST a `RECORD` message for every user action while recording is
//! on. The session turns recording on and off on the agent with PING, and
//! hands each accepted command to its queue and optional [`RecordListener`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::queue::{CommandQueue, DEFAULT_QUEUE_CAPACITY};
use crate::agent::Agent;
use crate::parser::Command;
use crate::protocol::{JsonHandler, JsonRequest, JsonServer, MtCommand, Response};

/// Callback for each recorded command
pub trait RecordListener: Send + Sync {
    fn on_record(&self, command: &Command);
}

/// Recording state shared with the server task
pub struct RecordSession {
    recording: AtomicBool,
    agent: Mutex<Option<Arc<dyn Agent>>>,
    listener: Mutex<Option<Arc<dyn RecordListener>>>,
    queue: CommandQueue,
}

impl Default for RecordSession {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl RecordSession {
    pub fn new(capacity: usize) -> Self {
        Self {
            recording: AtomicBool::new(false),
            agent: Mutex::new(None),
            listener: Mutex::new(None),
            queue: CommandQueue::new(capacity),
        }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub async fn set_listener(&self, listener: Arc<dyn RecordListener>) {
        *self.listener.lock().await = Some(listener);
    }

    pub async fn current_agent(&self) -> Option<Arc<dyn Agent>> {
        self.agent.lock().await.clone()
    }

    /// Ask `agent` to send RECORD messages to `record_host:record_port`.
    /// Queued commands from an earlier session are dropped.
    pub async fn start_recording(
        &self,
        agent: Arc<dyn Agent>,
        record_host: &str,
        record_port: u16,
    ) -> Result<Response> {
        agent.start()?;
        let sender = agent.command_sender()?;
        let response = sender
            .ping(Some((record_host, record_port)))
            .await
            .with_context(|| format!("{} - unable to turn recording on", agent.name()))?;

        let dropped = self.queue.clear();
        if dropped > 0 {
            log::debug!("dropped {} stale recorded commands", dropped);
        }
        *self.agent.lock().await = Some(agent);
        self.recording.store(true, Ordering::SeqCst);
        log::info!("recording on, listening at {}:{}", record_host, record_port);
        Ok(response)
    }

    /// Turn recording off on the current agent
    pub async fn stop_recording(&self) -> Result<Option<Response>> {
        self.recording.store(false, Ordering::SeqCst);
        let Some(agent) = self.current_agent().await else {
            return Ok(None);
        };
        let response = agent
            .command_sender()?
            .ping(None)
            .await
            .with_context(|| format!("{} - unable to turn recording off", agent.name()))?;
        log::info!("recording off");
        Ok(Some(response))
    }

    async fn accept(&self, command: Command) {
        let command = match self.current_agent().await {
            Some(agent) => agent.filter_command(command),
            None => Some(command),
        };
        let Some(command) = command else {
            return;
        };
        log::debug!("recorded: {}", command);

        if let Some(listener) = self.listener.lock().await.as_ref() {
            listener.on_record(&command);
        }
        if let Err(e) = self.queue.offer(command) {
            log::warn!("{}", e);
        }
    }
}

#[async_trait]
impl JsonHandler for RecordSession {
    async fn serve(&self, request: JsonRequest) -> Response {
        match MtCommand::of(&request.json) {
            Some(MtCommand::Record) if self.is_recording() => {
                self.accept(Command::from_json(&request.json)).await;
            }
            Some(MtCommand::Record) => log::debug!("not recording, dropped RECORD message"),
            _ => log::debug!("ignored message on {}", request.uri),
        }
        Response::ok(None::<String>)
    }
}

/// Start a record listener for `session` on `port` (0 picks a free port)
pub async fn start_record_server(port: u16, session: Arc<RecordSession>) -> Result<JsonServer> {
    JsonServer::start(port, session)
        .await
        .with_context(|| format!("Failed to start record listener on port {}", port))
}
