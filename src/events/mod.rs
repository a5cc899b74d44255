//! Events emitted while taps are detected and switches execute
//!
//! Broadcast from the switch executor to the main loop and the IPC
//! status sync.

use serde::{Deserialize, Serialize};

use crate::hotkey::CommandKey;

/// Events emitted on the daemon's broadcast bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchEvent {
    /// A bare Command-key tap was recognized
    TapDetected {
        key: CommandKey,
    },

    /// An input-source switch completed
    SwitchCompleted {
        /// Resolved identifier of the activated source
        source_id: String,
    },

    /// An input-source switch was dropped
    SwitchFailed {
        /// Configured target fragment that was being resolved
        target: String,
        reason: String,
    },
}

impl std::fmt::Display for SwitchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchEvent::TapDetected { key } => write!(f, "TAP_DETECTED ({})", key),
            SwitchEvent::SwitchCompleted { source_id } => {
                write!(f, "SWITCH_COMPLETED ({})", source_id)
            }
            SwitchEvent::SwitchFailed { target, reason } => {
                write!(f, "SWITCH_FAILED ({}: {})", target, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SwitchEvent::SwitchCompleted {
            source_id: "com.apple.keylayout.ABC".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("switch_completed"));
        assert!(json.contains("com.apple.keylayout.ABC"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"tap_detected","key":"right"}"#;
        let event: SwitchEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            SwitchEvent::TapDetected {
                key: CommandKey::Right
            }
        ));
    }
}
