use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::parser::types::modifier;
use crate::parser::Command;
use crate::protocol::Timing;

/// Built-in per-step timeout (ms)
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Built-in pause before each step (ms)
pub const DEFAULT_THINKTIME_MS: u64 = 500;

/// Built-in poll interval while an agent cannot find a component (ms)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Default timeout for `WaitFor*` actions without an explicit seconds arg (ms)
pub const DEFAULT_WAITFOR_TIMEOUT_MS: u64 = 10_000;

/// Network endpoints used by agents and the record listener
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_RECORD_HOST: &'static str = "10.0.2.2";
    pub const DEFAULT_RECORD_PORT: u16 = 16861;
    pub const DEFAULT_PLAYBACK_HOST: &'static str = "localhost";
    pub const DEFAULT_PLAYBACK_PORT_ANDROID: u16 = 16862;
    pub const DEFAULT_PLAYBACK_PORT_IOS: u16 = 16863;
    pub const DEFAULT_PLAYBACK_PORT_HTML5: u16 = 16864;
    pub const DEFAULT_PLAYBACK_PORT_FLEX: u16 = 16865;
    pub const DEFAULT_PLAYBACK_PORT_WEB: u16 = 80;
    pub const DEFAULT_CONTEXT_PATH: &'static str = "/fonemonkey";

    /// Playback port for an agent name; unknown names get the Android port.
    pub fn playback_port(agent: &str) -> u16 {
        match agent.to_lowercase().as_str() {
            "ios" => Self::DEFAULT_PLAYBACK_PORT_IOS,
            "flex" => Self::DEFAULT_PLAYBACK_PORT_FLEX,
            "html" | "html5" => Self::DEFAULT_PLAYBACK_PORT_HTML5,
            "web" => Self::DEFAULT_PLAYBACK_PORT_WEB,
            _ => Self::DEFAULT_PLAYBACK_PORT_ANDROID,
        }
    }
}

/// Global playback defaults. Per-command modifiers override these; unset
/// fields fall back to the built-in constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct PlaybackConfig {
    /// Global timeout for locating a component (ms)
    pub timeout_ms: Option<u64>,

    /// Global pause before each step (ms)
    pub thinktime_ms: Option<u64>,

    /// Global retry poll interval (ms)
    pub retry_delay_ms: Option<u64>,

    /// Capture a screenshot when a step fails
    pub screenshot_on_error: bool,

    /// Fetch device metrics after every dispatched step
    pub take_after_metrics: bool,

    /// Where screenshots and reports are written
    pub output_dir: Option<PathBuf>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            thinktime_ms: None,
            retry_delay_ms: None,
            screenshot_on_error: true,
            take_after_metrics: false,
            output_dir: None,
        }
    }
}

impl PlaybackConfig {
    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn timeout(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn thinktime(&self) -> u64 {
        self.thinktime_ms.unwrap_or(DEFAULT_THINKTIME_MS)
    }

    pub fn retry_delay(&self) -> u64 {
        self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }
}

/// Effective settings of one step: command modifier, else global default,
/// else built-in constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepConfig {
    pub timeout_ms: u64,
    pub thinktime_ms: u64,
    pub retry_delay_ms: u64,
    pub screenshot_on_error: bool,
    pub should_fail: bool,
    pub abort_on_failure: bool,
    pub abort_on_error: bool,
}

impl StepConfig {
    pub fn resolve(command: &Command, config: &PlaybackConfig) -> Self {
        let should_fail = command.should_fail();

        // An explicit modifier wins; otherwise screenshots follow the global
        // switch and are off for steps that are expected to fail.
        let screenshot_on_error = match command.modifier(modifier::SCREENSHOT_ON_ERROR) {
            Some(_) => command.is_screenshot_on_error(),
            None => config.screenshot_on_error && !should_fail,
        };

        // `%abort` names the outcome that does NOT stop the run
        let abort = command
            .modifier(modifier::ABORT)
            .map(str::to_lowercase)
            .unwrap_or_default();
        let (abort_on_failure, abort_on_error) = if abort.contains("never") {
            (false, false)
        } else if abort.contains("fail") {
            (false, true)
        } else if abort.contains("error") {
            (true, false)
        } else {
            (true, true)
        };

        Self {
            timeout_ms: command
                .int_modifier(modifier::TIMEOUT)
                .unwrap_or_else(|| config.timeout()),
            thinktime_ms: command
                .int_modifier(modifier::THINKTIME)
                .unwrap_or_else(|| config.thinktime()),
            retry_delay_ms: command
                .int_modifier(modifier::RETRY_DELAY)
                .unwrap_or_else(|| config.retry_delay()),
            screenshot_on_error,
            should_fail,
            abort_on_failure,
            abort_on_error,
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            timeout_ms: self.timeout_ms,
            thinktime_ms: self.thinktime_ms,
        }
    }
}
