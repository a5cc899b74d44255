//! Tap detection state machine
//!
//! Turns the raw press/release edge stream from the event tap into
//! "Command key tapped alone" decisions. Detection is purely
//! edge-triggered: a tap is a press followed by a release of the same
//! key with no disqualifying event in between. No timing thresholds are
//! involved, so keyboard repeat and debounce differences cannot affect
//! the outcome.

use tracing::debug;

use crate::hotkey::CommandKey;

/// Detector state: either nothing is pending, or one Command key is
/// down with nothing else pressed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Idle,
    Armed(CommandKey),
}

impl Default for TapState {
    fn default() -> Self {
        Self::Idle
    }
}

/// The per-tap state machine.
///
/// Owned by the event-tap callback and only ever touched from that
/// single callback context, so it needs no locking.
#[derive(Debug, Default)]
pub struct TapDetector {
    state: TapState,
}

impl TapDetector {
    pub fn new() -> Self {
        Self {
            state: TapState::Idle,
        }
    }

    /// Current state (for diagnostics)
    pub fn state(&self) -> TapState {
        self.state
    }

    /// Handle a modifier-flags-changed edge.
    ///
    /// `key` is the monitored key the event belongs to (`None` for any
    /// other modifier), `pressed` whether that key is now held. Returns
    /// the key to switch for when a completed tap is recognized.
    pub fn on_flags_changed(&mut self, key: Option<CommandKey>, pressed: bool) -> Option<CommandKey> {
        let Some(key) = key else {
            // Another modifier joined in; whatever was armed is a chord now.
            self.state = TapState::Idle;
            return None;
        };

        if pressed {
            // The most recent press is the tap candidate, overwriting any
            // prior arming.
            self.state = TapState::Armed(key);
            return None;
        }

        match self.state {
            TapState::Armed(armed) if armed == key => {
                debug!(%key, "tap detected");
                self.state = TapState::Idle;
                Some(key)
            }
            // Releasing a key that is not the candidate is the tail of an
            // abandoned tap; it neither triggers nor disarms.
            _ => None,
        }
    }

    /// Handle an ordinary key-down.
    ///
    /// Any non-modifier keystroke while a Command key is held means the
    /// user is typing a shortcut, not tapping.
    pub fn on_key_down(&mut self) {
        self.state = TapState::Idle;
    }

    /// Drop any pending arming, e.g. after the tap was re-enabled and
    /// events may have been missed.
    pub fn reset(&mut self) {
        self.state = TapState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let detector = TapDetector::new();
        assert_eq!(detector.state(), TapState::Idle);
    }

    #[test]
    fn test_clean_tap_triggers_once() {
        let mut detector = TapDetector::new();

        assert_eq!(detector.on_flags_changed(Some(CommandKey::Left), true), None);
        assert_eq!(detector.state(), TapState::Armed(CommandKey::Left));

        assert_eq!(
            detector.on_flags_changed(Some(CommandKey::Left), false),
            Some(CommandKey::Left)
        );
        assert_eq!(detector.state(), TapState::Idle);

        // A stray release afterwards must not trigger again
        assert_eq!(detector.on_flags_changed(Some(CommandKey::Left), false), None);
    }

    #[test]
    fn test_key_down_aborts_tap() {
        let mut detector = TapDetector::new();

        // [LeftDown, OtherKeyDown, LeftUp] is a shortcut, not a tap
        detector.on_flags_changed(Some(CommandKey::Left), true);
        detector.on_key_down();
        assert_eq!(detector.state(), TapState::Idle);
        assert_eq!(detector.on_flags_changed(Some(CommandKey::Left), false), None);
    }

    #[test]
    fn test_other_modifier_aborts_tap() {
        let mut detector = TapDetector::new();

        // Command down, then Shift down: chord in progress
        detector.on_flags_changed(Some(CommandKey::Left), true);
        detector.on_flags_changed(None, true);
        assert_eq!(detector.state(), TapState::Idle);
        assert_eq!(detector.on_flags_changed(Some(CommandKey::Left), false), None);
    }

    #[test]
    fn test_second_key_overwrites_arming() {
        let mut detector = TapDetector::new();

        // [LeftDown, RightDown, LeftUp, RightUp]: only the right key
        // completes a tap, and exactly once
        detector.on_flags_changed(Some(CommandKey::Left), true);
        detector.on_flags_changed(Some(CommandKey::Right), true);
        assert_eq!(detector.state(), TapState::Armed(CommandKey::Right));

        assert_eq!(detector.on_flags_changed(Some(CommandKey::Left), false), None);
        assert_eq!(detector.state(), TapState::Armed(CommandKey::Right));

        assert_eq!(
            detector.on_flags_changed(Some(CommandKey::Right), false),
            Some(CommandKey::Right)
        );
        assert_eq!(detector.state(), TapState::Idle);
    }

    #[test]
    fn test_release_of_unarmed_key_triggers_nothing() {
        let mut detector = TapDetector::new();

        assert_eq!(detector.on_flags_changed(Some(CommandKey::Right), false), None);
        assert_eq!(detector.state(), TapState::Idle);
    }

    #[test]
    fn test_reset_clears_arming() {
        let mut detector = TapDetector::new();

        detector.on_flags_changed(Some(CommandKey::Right), true);
        detector.reset();
        assert_eq!(detector.state(), TapState::Idle);
        assert_eq!(detector.on_flags_changed(Some(CommandKey::Right), false), None);
    }

    #[test]
    fn test_consecutive_taps_each_trigger() {
        let mut detector = TapDetector::new();

        for _ in 0..2 {
            detector.on_flags_changed(Some(CommandKey::Right), true);
            assert_eq!(
                detector.on_flags_changed(Some(CommandKey::Right), false),
                Some(CommandKey::Right)
            );
        }
    }
}
