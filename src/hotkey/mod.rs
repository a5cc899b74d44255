//! Global keyboard hook for Command-key tap detection
//!
//! Owns the macOS CGEventTap, the accessibility-permission bootstrap,
//! and the routing of raw events into the gesture detector.

mod keys;
#[cfg(target_os = "macos")]
mod listener;
#[cfg(target_os = "macos")]
mod permission;

pub use keys::{CommandKey, flags, LEFT_COMMAND_KEY_CODE, RIGHT_COMMAND_KEY_CODE};
#[cfg(target_os = "macos")]
pub use listener::{ListenerError, TapListener};

use crate::gesture::TapDetector;

/// A keyboard event as seen by the tap callback, reduced to the fields
/// detection needs.
#[derive(Debug, Clone, Copy)]
pub enum TapEvent {
    /// An ordinary key was pressed
    KeyDown,
    /// Modifier flags changed; `key_code` identifies the key that moved
    FlagsChanged { key_code: u16, flags: u64 },
}

/// Feed one event through the detector, honoring the enabled flag.
///
/// This is the whole decision path of the tap callback, kept free of
/// CGEvent types so it can be exercised directly. When disabled, the
/// event is not inspected at all.
pub fn process_tap_event(
    detector: &mut TapDetector,
    enabled: bool,
    event: TapEvent,
) -> Option<CommandKey> {
    if !enabled {
        return None;
    }

    match event {
        TapEvent::KeyDown => {
            detector.on_key_down();
            None
        }
        TapEvent::FlagsChanged { key_code, flags } => {
            let key = CommandKey::from_key_code(key_code);
            let pressed = key.map_or(false, |k| k.is_pressed_in(flags));
            detector.on_flags_changed(key, pressed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left_down() -> TapEvent {
        TapEvent::FlagsChanged {
            key_code: LEFT_COMMAND_KEY_CODE,
            flags: flags::COMMAND | flags::DEVICE_LEFT_COMMAND,
        }
    }

    fn left_up() -> TapEvent {
        TapEvent::FlagsChanged {
            key_code: LEFT_COMMAND_KEY_CODE,
            flags: 0,
        }
    }

    #[test]
    fn test_clean_tap_through_event_path() {
        let mut detector = TapDetector::new();

        assert_eq!(process_tap_event(&mut detector, true, left_down()), None);
        assert_eq!(
            process_tap_event(&mut detector, true, left_up()),
            Some(CommandKey::Left)
        );
    }

    #[test]
    fn test_key_down_rejects_chord() {
        let mut detector = TapDetector::new();

        process_tap_event(&mut detector, true, left_down());
        process_tap_event(&mut detector, true, TapEvent::KeyDown);
        assert_eq!(process_tap_event(&mut detector, true, left_up()), None);
    }

    #[test]
    fn test_disabled_produces_no_decisions() {
        let mut detector = TapDetector::new();

        assert_eq!(process_tap_event(&mut detector, false, left_down()), None);
        assert_eq!(process_tap_event(&mut detector, false, left_up()), None);
        assert_eq!(detector.state(), crate::gesture::TapState::Idle);
    }

    #[test]
    fn test_shift_flags_change_disarms() {
        let mut detector = TapDetector::new();

        process_tap_event(&mut detector, true, left_down());
        // Shift (key code 56) joins: not a monitored key
        process_tap_event(
            &mut detector,
            true,
            TapEvent::FlagsChanged {
                key_code: 56,
                flags: flags::COMMAND | flags::DEVICE_LEFT_COMMAND | 0x2_0000,
            },
        );
        assert_eq!(process_tap_event(&mut detector, true, left_up()), None);
    }
}
