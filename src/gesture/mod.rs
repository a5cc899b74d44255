//! Gesture detection for bare Command-key taps
//!
//! Distinguishes "tapped alone" from "used as part of a shortcut chord"
//! using only press/release edges delivered by the event tap.

mod detector;

pub use detector::{TapDetector, TapState};
