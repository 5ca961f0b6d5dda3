use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::parser::Command;
use crate::protocol::{CommandSender, ResponseStatus};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{0} - playback host or port not set")]
    NotConfigured(String),

    #[error("Unable to find agent {0}")]
    UnknownAgent(String),

    #[error("{agent} - {reason}")]
    Sender { agent: String, reason: String },
}

/// What the playback engine and record listener need from a platform agent.
///
/// How an agent finds or drives on-screen components is its own business;
/// the core only sends commands and asks about readiness.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent name (e.g., "Android", "iOS")
    fn name(&self) -> &str;

    /// Validate configuration before use
    fn start(&self) -> Result<(), AgentError>;

    fn stop(&self) {}

    fn close(&self) {}

    /// Sender used to deliver commands to this agent
    fn command_sender(&self) -> Result<Arc<dyn CommandSender>, AgentError>;

    /// Inspect a recorded command before listeners see it. `None` drops it.
    fn filter_command(&self, command: Command) -> Option<Command> {
        Some(command)
    }

    fn set_property(&self, key: &str, value: &str);

    fn property(&self, key: &str) -> Option<String>;

    /// True if the agent answers a PING with OK
    async fn is_ready(&self) -> bool {
        if self.start().is_err() {
            return false;
        }
        let Ok(sender) = self.command_sender() else {
            return false;
        };
        matches!(
            sender.ping(None).await,
            Ok(resp) if resp.status == ResponseStatus::Ok
        )
    }

    /// Poll readiness until `timeout_ms` elapses. A timeout below 1 ms means
    /// "don't wait" and reports ready.
    async fn wait_until_ready(&self, timeout_ms: u64) -> bool {
        if timeout_ms < 1 {
            return true;
        }
        let pause = Duration::from_millis((timeout_ms / 100).clamp(50, 1000));
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            if self.is_ready().await {
                return true;
            }
            tokio::time::sleep(pause).await;
        }
        false
    }

    /// `mtversion` reported by the agent's PING reply
    async fn agent_version(&self) -> Option<String> {
        self.start().ok()?;
        let sender = self.command_sender().ok()?;
        let resp = sender.ping(None).await.ok()?;
        resp.ping_info()?.mtversion
    }
}
