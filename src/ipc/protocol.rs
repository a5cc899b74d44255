//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian
//! length.

use serde::{Deserialize, Serialize};

use crate::config::Preferences;
use crate::events::SwitchEvent;
use crate::hotkey::CommandKey;
use crate::sources::InputSource;

/// Requests from the settings surface to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Enumerate the selectable input sources for the pickers
    ListSources,

    /// Toggle tap detection
    SetEnabled { enabled: bool },

    /// Bind a Command key to a target identifier fragment
    SetTarget { key: CommandKey, target: String },

    /// Subscribe to switch notifications
    Subscribe,
}

/// Responses from daemon to the settings surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Selectable input sources, in OS order
    Sources { sources: Vec<InputSource> },

    /// Preference change applied and persisted
    Updated,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification for subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A tap was detected or a switch finished
    Event(SwitchEvent),
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether tap detection is enabled
    pub enabled: bool,

    /// Target fragment bound to the left Command key
    pub left_target: String,

    /// Target fragment bound to the right Command key
    pub right_target: String,

    /// Whether the event tap listener is running
    pub tap_active: bool,

    /// Identifier of the most recently activated source, if any
    pub last_switch: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        let prefs = Preferences::default();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            enabled: prefs.enabled,
            left_target: prefs.left_target,
            right_target: prefs.right_target,
            tap_active: false,
            last_switch: None,
            uptime_secs: 0,
        }
    }
}
