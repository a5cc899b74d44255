//! Command key definitions and flag decoding
//!
//! Provides the two monitored physical keys and the event-flag masks
//! needed to tell which of them changed state.

use serde::{Deserialize, Serialize};

/// macOS virtual key code for the left Command key
pub const LEFT_COMMAND_KEY_CODE: u16 = 55;
/// macOS virtual key code for the right Command key
pub const RIGHT_COMMAND_KEY_CODE: u16 = 54;

/// CGEventFlags bit masks relevant to tap detection
pub mod flags {
    /// Aggregate Command modifier flag (set while either side is held)
    pub const COMMAND: u64 = 0x0010_0000;
    /// Device-specific flag for the left Command key
    pub const DEVICE_LEFT_COMMAND: u64 = 0x0000_0008;
    /// Device-specific flag for the right Command key
    pub const DEVICE_RIGHT_COMMAND: u64 = 0x0000_0010;
}

/// The two physical keys the daemon watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKey {
    Left,
    Right,
}

impl CommandKey {
    /// Map a flags-changed key code to a monitored key, if it is one
    pub fn from_key_code(key_code: u16) -> Option<Self> {
        match key_code {
            LEFT_COMMAND_KEY_CODE => Some(CommandKey::Left),
            RIGHT_COMMAND_KEY_CODE => Some(CommandKey::Right),
            _ => None,
        }
    }

    /// Device-specific flag bit for this key.
    ///
    /// The aggregate Command bit stays set while either side is held, so
    /// per-key press/release edges come from the device-specific bits.
    pub fn device_mask(self) -> u64 {
        match self {
            CommandKey::Left => flags::DEVICE_LEFT_COMMAND,
            CommandKey::Right => flags::DEVICE_RIGHT_COMMAND,
        }
    }

    /// Whether this key is held according to the given event flags
    pub fn is_pressed_in(self, event_flags: u64) -> bool {
        event_flags & self.device_mask() != 0
    }
}

impl std::fmt::Display for CommandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKey::Left => write!(f, "left-command"),
            CommandKey::Right => write!(f, "right-command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_code_mapping() {
        assert_eq!(CommandKey::from_key_code(55), Some(CommandKey::Left));
        assert_eq!(CommandKey::from_key_code(54), Some(CommandKey::Right));
        assert_eq!(CommandKey::from_key_code(56), None); // Shift
        assert_eq!(CommandKey::from_key_code(0), None); // 'a'
    }

    #[test]
    fn test_device_masks_are_distinct() {
        assert_ne!(
            CommandKey::Left.device_mask(),
            CommandKey::Right.device_mask()
        );
    }

    #[test]
    fn test_pressed_in_flags() {
        let left_down = flags::COMMAND | flags::DEVICE_LEFT_COMMAND;
        assert!(CommandKey::Left.is_pressed_in(left_down));
        assert!(!CommandKey::Right.is_pressed_in(left_down));

        // Left released while right is still held: aggregate bit remains
        let right_only = flags::COMMAND | flags::DEVICE_RIGHT_COMMAND;
        assert!(!CommandKey::Left.is_pressed_in(right_only));
        assert!(CommandKey::Right.is_pressed_in(right_only));

        assert!(!CommandKey::Left.is_pressed_in(0));
    }

    #[test]
    fn test_serde_rename() {
        let json = serde_json::to_string(&CommandKey::Left).unwrap();
        assert_eq!(json, "\"left\"");
        let key: CommandKey = serde_json::from_str("\"right\"").unwrap();
        assert_eq!(key, CommandKey::Right);
    }
}
