pub mod mt_agent;
pub mod traits;

pub use mt_agent::{ActionFilter, MtAgent};
pub use traits::{Agent, AgentError};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::utils::config::ServerConfig;

/// Name used when no agent is specified
pub const DEFAULT_AGENT: &str = "MTAgent";

#[derive(Debug, Clone)]
struct AgentKind {
    name: String,
    host: String,
    port: u16,
}

/// Registry of known agent names. Agents are created on demand and cached
/// per `name:host:port`, so repeated lookups share one connection.
pub struct AgentManager {
    kinds: BTreeMap<String, AgentKind>,
    cache: Mutex<HashMap<String, Arc<MtAgent>>>,
}

impl Default for AgentManager {
    fn default() -> Self {
        let mut manager = Self {
            kinds: BTreeMap::new(),
            cache: Mutex::new(HashMap::new()),
        };
        let host = ServerConfig::DEFAULT_PLAYBACK_HOST;
        manager.register(DEFAULT_AGENT, host, ServerConfig::DEFAULT_PLAYBACK_PORT_ANDROID);
        manager.register("Generic", host, ServerConfig::DEFAULT_PLAYBACK_PORT_ANDROID);
        manager.register("Android", host, ServerConfig::DEFAULT_PLAYBACK_PORT_ANDROID);
        manager.register("AndroidEmulator", host, ServerConfig::DEFAULT_PLAYBACK_PORT_ANDROID);
        manager.register("iOS", host, ServerConfig::DEFAULT_PLAYBACK_PORT_IOS);
        manager.register("HTML", host, ServerConfig::DEFAULT_PLAYBACK_PORT_HTML5);
        manager.register("HTML5", host, ServerConfig::DEFAULT_PLAYBACK_PORT_HTML5);
        manager.register("Web", host, ServerConfig::DEFAULT_PLAYBACK_PORT_WEB);
        manager.register("Flex", host, ServerConfig::DEFAULT_PLAYBACK_PORT_FLEX);
        manager
    }
}

impl AgentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an agent name with its default endpoint.
    /// Names are case-insensitive.
    pub fn register(&mut self, name: &str, host: &str, port: u16) {
        self.kinds.insert(
            name.to_lowercase(),
            AgentKind {
                name: name.to_string(),
                host: host.to_string(),
                port,
            },
        );
    }

    /// Registered names, as given at registration
    pub fn names(&self) -> Vec<&str> {
        self.kinds.values().map(|k| k.name.as_str()).collect()
    }

    /// Look up (or create) an agent. Unset host and port take the
    /// registered defaults for that name.
    pub fn agent(
        &self,
        name: Option<&str>,
        host: Option<&str>,
        port: Option<u16>,
    ) -> Result<Arc<MtAgent>, AgentError> {
        let name = name.unwrap_or(DEFAULT_AGENT);
        let kind = self
            .kinds
            .get(&name.to_lowercase())
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))?;

        let host = host.filter(|h| !h.is_empty()).unwrap_or(&kind.host);
        let port = port.filter(|p| *p > 0).unwrap_or(kind.port);
        let key = format!("{}:{}:{}", kind.name.to_lowercase(), host, port);

        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let agent = cache
            .entry(key)
            .or_insert_with(|| {
                log::debug!("creating agent {} for {}:{}", kind.name, host, port);
                Arc::new(MtAgent::new(&kind.name, host, Some(port)))
            })
            .clone();
        Ok(agent)
    }

    /// Drop all cached agents
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_agent() {
        let manager = AgentManager::new();
        let err = manager.agent(Some("Blackberry"), None, None).err().unwrap();
        assert_eq!(err.to_string(), "Unable to find agent Blackberry");
    }

    #[test]
    fn test_default_ports() {
        let manager = AgentManager::new();
        let ios = manager.agent(Some("ios"), None, None).unwrap();
        assert_eq!(ios.name(), "iOS");
        assert_eq!(ios.port(), Some(16863));
        assert_eq!(ios.host(), "localhost");

        let android = manager.agent(Some("ANDROID"), Some("10.0.0.2"), None).unwrap();
        assert_eq!(android.port(), Some(16862));
        assert_eq!(android.host(), "10.0.0.2");

        let flex = manager.agent(Some("flex"), None, Some(9999)).unwrap();
        assert_eq!(flex.port(), Some(9999));

        let generic = manager.agent(None, None, None).unwrap();
        assert_eq!(generic.name(), DEFAULT_AGENT);
    }

    #[test]
    fn test_agents_are_cached() {
        let manager = AgentManager::new();
        let a = manager.agent(Some("iOS"), Some("h"), Some(1)).unwrap();
        let b = manager.agent(Some("ios"), Some("h"), Some(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = manager.agent(Some("ios"), Some("h"), Some(2)).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));

        manager.clear();
        let d = manager.agent(Some("iOS"), Some("h"), Some(1)).unwrap();
        assert!(!Arc::ptr_eq(&a, &d));
    }

    #[test]
    fn test_register_custom_agent() {
        let mut manager = AgentManager::new();
        manager.register("Kiosk", "192.168.1.5", 7000);
        assert!(manager.names().contains(&"Kiosk"));
        let kiosk = manager.agent(Some("kiosk"), None, None).unwrap();
        assert_eq!(kiosk.port(), Some(7000));
    }
}
