//! Command sender: delivers PLAY / PING / RECORD messages to an agent over HTTP.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::types::{envelope, ping_payload, MtCommand, Response, Timing};
use crate::parser::Command;
use crate::utils::config::ServerConfig;

/// Component types that are handled locally and never sent to an agent
pub const IGNORE_COMPONENTS_FOR_PLAY: &[&str] =
    &["doc", "vars", "script", "test", "setup", "teardown"];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The agent could not be reached or did not answer in time.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Unable to send command to {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("Unable to send command to {url}: timed out")]
    Timeout { url: String },
}

/// Anything that can deliver protocol messages to an agent.
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Send a PLAY. `timing` carries the effective timeout and thinktime.
    async fn play(&self, command: &Command, timing: Timing) -> Result<Response, SendError>;

    /// Health check; `record` switches recording on and says where to post.
    async fn ping(&self, record: Option<(&str, u16)>) -> Result<Response, SendError>;

    /// Forward a recorded command to a record listener.
    async fn record(&self, command: &Command) -> Result<Response, SendError>;
}

/// Reply for commands that are never sent over the wire, if `command` is one.
pub fn local_play_response(command: &Command) -> Option<Response> {
    if command.is_blank() {
        Some(Response::ok("ignore blank command".to_string()))
    } else if command.is_comment() {
        Some(Response::ok("ignore comment".to_string()))
    } else if IGNORE_COMPONENTS_FOR_PLAY
        .contains(&command.component_type().to_lowercase().as_str())
    {
        Some(Response::ok(format!("ignore {}", command.command_name())))
    } else {
        None
    }
}

/// JSON-over-HTTP sender
pub struct HttpCommandSender {
    /// Target URL (e.g., "http://localhost:16862/fonemonkey")
    url: String,
    client: reqwest::Client,
}

impl HttpCommandSender {
    /// Sender for `host:port` on the default context path
    pub fn new(host: &str, port: u16) -> Result<Self, SendError> {
        Self::with_path(host, port, ServerConfig::DEFAULT_CONTEXT_PATH)
    }

    pub fn with_path(host: &str, port: u16, path: &str) -> Result<Self, SendError> {
        let host = if host.is_empty() {
            ServerConfig::DEFAULT_PLAYBACK_HOST
        } else {
            host
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let url = format!("http://{}:{}{}", host, port, path);

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SendError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(
        &self,
        kind: MtCommand,
        payload: Value,
        read_timeout: Duration,
    ) -> Result<Response, SendError> {
        let body = envelope(kind, payload);
        log::debug!("{} -> {}: {}", kind, self.url, body);

        let resp = self
            .client
            .post(&self.url)
            .timeout(read_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let code = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| self.map_err(e))?;
        log::debug!("{} <- {}: {} {}", kind, self.url, code, text);

        Ok(Response::from_http(code, Some(&text)))
    }

    fn map_err(&self, e: reqwest::Error) -> SendError {
        if e.is_timeout() {
            SendError::Timeout {
                url: self.url.clone(),
            }
        } else {
            SendError::Transport {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl CommandSender for HttpCommandSender {
    async fn play(&self, command: &Command, timing: Timing) -> Result<Response, SendError> {
        if let Some(resp) = local_play_response(command) {
            return Ok(resp);
        }
        let read_timeout = BASE_READ_TIMEOUT
            + Duration::from_millis(timing.timeout_ms + timing.thinktime_ms);
        let payload = command.to_json(Some((timing.timeout_ms, timing.thinktime_ms)));
        self.send(MtCommand::Play, payload, read_timeout).await
    }

    async fn ping(&self, record: Option<(&str, u16)>) -> Result<Response, SendError> {
        self.send(MtCommand::Ping, ping_payload(record), BASE_READ_TIMEOUT)
            .await
    }

    async fn record(&self, command: &Command) -> Result<Response, SendError> {
        self.send(MtCommand::Record, command.to_json(None), BASE_READ_TIMEOUT)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use crate::protocol::ResponseStatus;

    #[test]
    fn test_sender_url() {
        let sender = HttpCommandSender::new("10.0.0.5", 16863).unwrap();
        assert_eq!(sender.url(), "http://10.0.0.5:16863/fonemonkey");

        let sender = HttpCommandSender::with_path("", 8080, "agent").unwrap();
        assert_eq!(sender.url(), "http://localhost:8080/agent");
    }

    #[test]
    fn test_local_play_response() {
        assert!(local_play_response(&parse_line("Button OK Tap")).is_none());

        let resp = local_play_response(&parse_line("# note")).unwrap();
        assert_eq!(resp.message.as_deref(), Some("ignore comment"));

        let resp = local_play_response(&parse_line("Doc * Vars user=\"name\"")).unwrap();
        assert_eq!(resp.status, ResponseStatus::Ok);
        assert_eq!(resp.message.as_deref(), Some("ignore doc.vars"));

        let resp = local_play_response(&parse_line("")).unwrap();
        assert_eq!(resp.message.as_deref(), Some("ignore blank command"));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_transport_error() {
        // port 9 (discard) on loopback is reliably closed in test environments
        let sender = HttpCommandSender::new("127.0.0.1", 9).unwrap();
        let err = sender.ping(None).await.unwrap_err();
        assert!(err.to_string().starts_with("Unable to send command to http://127.0.0.1:9/fonemonkey"));
    }
}
