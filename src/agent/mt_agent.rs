use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{Agent, AgentError};
use crate::parser::Command;
use crate::protocol::{CommandSender, HttpCommandSender};

/// Property prefix that switches recording of one action on or off,
/// e.g. `filter.Drag = false`.
pub const FILTER_PREFIX: &str = "filter.";

pub const PROP_HOST: &str = "host";
pub const PROP_PORT: &str = "port";

/// Actions whose recorded commands are dropped before reaching listeners
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    disabled: HashSet<String>,
}

impl ActionFilter {
    pub fn set(&mut self, action: &str, enabled: bool) {
        let action = action.to_lowercase();
        if enabled {
            self.disabled.remove(&action);
        } else {
            self.disabled.insert(action);
        }
    }

    pub fn allows(&self, command: &Command) -> bool {
        !self.disabled.contains(&command.action().to_lowercase())
    }
}

struct AgentState {
    host: String,
    port: Option<u16>,
    props: HashMap<String, String>,
    filter: ActionFilter,
    sender: Option<Arc<dyn CommandSender>>,
}

/// Generic agent that speaks the JSON protocol to `host:port`.
///
/// Platform agents (Android, iOS, ...) are this agent with a platform name
/// and default port; see [`super::AgentManager`].
pub struct MtAgent {
    name: String,
    fixed_sender: bool,
    state: Mutex<AgentState>,
}

impl MtAgent {
    pub fn new(name: &str, host: &str, port: Option<u16>) -> Self {
        Self {
            name: name.to_string(),
            fixed_sender: false,
            state: Mutex::new(AgentState {
                host: host.to_string(),
                port,
                props: HashMap::new(),
                filter: ActionFilter::default(),
                sender: None,
            }),
        }
    }

    /// Agent backed by an existing sender (in-process agents, tests)
    pub fn with_sender(name: &str, sender: Arc<dyn CommandSender>) -> Self {
        let agent = Self::new(name, "", None);
        agent.lock().sender = Some(sender);
        Self {
            fixed_sender: true,
            ..agent
        }
    }

    fn lock(&self) -> MutexGuard<'_, AgentState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn host(&self) -> String {
        self.lock().host.clone()
    }

    pub fn port(&self) -> Option<u16> {
        self.lock().port
    }
}

#[async_trait]
impl Agent for MtAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<(), AgentError> {
        if self.fixed_sender {
            return Ok(());
        }
        let state = self.lock();
        if state.host.is_empty() || state.port.is_none() {
            return Err(AgentError::NotConfigured(self.name.clone()));
        }
        Ok(())
    }

    fn close(&self) {
        if !self.fixed_sender {
            self.lock().sender = None;
        }
    }

    fn command_sender(&self) -> Result<Arc<dyn CommandSender>, AgentError> {
        let mut state = self.lock();
        if let Some(sender) = &state.sender {
            return Ok(sender.clone());
        }
        let port = state
            .port
            .ok_or_else(|| AgentError::NotConfigured(self.name.clone()))?;
        let sender = HttpCommandSender::new(&state.host, port).map_err(|e| AgentError::Sender {
            agent: self.name.clone(),
            reason: e.to_string(),
        })?;
        let sender: Arc<dyn CommandSender> = Arc::new(sender);
        state.sender = Some(sender.clone());
        Ok(sender)
    }

    fn filter_command(&self, command: Command) -> Option<Command> {
        if self.lock().filter.allows(&command) {
            Some(command)
        } else {
            log::debug!("{} filtered recorded command: {}", self.name, command);
            None
        }
    }

    fn set_property(&self, key: &str, value: &str) {
        let mut state = self.lock();
        match key {
            PROP_HOST => {
                state.host = value.to_string();
                if !self.fixed_sender {
                    state.sender = None;
                }
            }
            PROP_PORT => {
                state.port = value.trim().parse().ok();
                if !self.fixed_sender {
                    state.sender = None;
                }
            }
            _ => {
                if let Some(action) = key.strip_prefix(FILTER_PREFIX) {
                    state
                        .filter
                        .set(action, !value.trim().eq_ignore_ascii_case("false"));
                }
            }
        }
        state.props.insert(key.to_string(), value.to_string());
    }

    fn property(&self, key: &str) -> Option<String> {
        let state = self.lock();
        match key {
            PROP_HOST => Some(state.host.clone()).filter(|h| !h.is_empty()),
            PROP_PORT => state.port.map(|p| p.to_string()),
            _ => state.props.get(key).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use crate::protocol::{JsonHandler, JsonRequest, JsonServer, MtCommand, PingInfo, Response};

    struct PingOnly;

    #[async_trait]
    impl JsonHandler for PingOnly {
        async fn serve(&self, request: JsonRequest) -> Response {
            match MtCommand::of(&request.json) {
                Some(MtCommand::Ping) => PingInfo {
                    os: Some("Test".into()),
                    mtversion: Some("9.9".into()),
                    record: None,
                }
                .into_response(),
                _ => Response::error("unexpected"),
            }
        }
    }

    #[test]
    fn test_start_requires_host_and_port() {
        let agent = MtAgent::new("MTAgent", "", Some(16862));
        let err = agent.start().unwrap_err();
        assert_eq!(err.to_string(), "MTAgent - playback host or port not set");

        let agent = MtAgent::new("MTAgent", "localhost", None);
        assert!(agent.start().is_err());

        agent.set_property(PROP_PORT, "16862");
        assert!(agent.start().is_ok());
        assert_eq!(agent.property(PROP_PORT).as_deref(), Some("16862"));
    }

    #[test]
    fn test_action_filter() {
        let agent = MtAgent::new("Android", "localhost", Some(16862));
        let drag = parse_line("Table * Drag 1 2");
        assert!(agent.filter_command(drag.clone()).is_some());

        agent.set_property("filter.Drag", "false");
        assert!(agent.filter_command(drag.clone()).is_none());
        assert!(agent.filter_command(parse_line("Button OK Tap")).is_some());

        agent.set_property("filter.drag", "true");
        assert!(agent.filter_command(drag).is_some());
        assert_eq!(agent.property("filter.drag").as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_ready() {
        let agent = MtAgent::new("MTAgent", "127.0.0.1", Some(9));
        assert!(agent.wait_until_ready(0).await);
    }

    #[tokio::test]
    async fn test_ready_and_version_over_http() {
        let server = JsonServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(PingOnly))
            .await
            .unwrap();
        let agent = MtAgent::new("MTAgent", "127.0.0.1", Some(server.port()));

        assert!(agent.is_ready().await);
        assert!(agent.wait_until_ready(2000).await);
        assert_eq!(agent.agent_version().await.as_deref(), Some("9.9"));
    }

    #[tokio::test]
    async fn test_unreachable_agent_never_ready() {
        let agent = MtAgent::new("MTAgent", "127.0.0.1", Some(9));
        assert!(!agent.is_ready().await);
        assert!(!agent.wait_until_ready(120).await);
        assert!(agent.agent_version().await.is_none());
    }
}
