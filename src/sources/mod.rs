//! Keyboard input-source directory
//!
//! Wraps the OS view of selectable keyboard input sources behind a
//! small typed surface. Sources are enumerated fresh on every query:
//! the system set changes when input methods are installed or removed,
//! so nothing here is cached.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(target_os = "macos")]
mod tis;

#[cfg(target_os = "macos")]
pub use tis::TisDirectory;

/// One selectable keyboard input source as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSource {
    /// Stable OS-assigned identifier, e.g. `com.apple.keylayout.ABC`
    pub id: String,
    /// Human-readable name for settings UIs
    pub localized_name: String,
    /// Whether the OS allows activating this source directly
    pub selectable: bool,
}

/// Activation failure reported by the OS
#[derive(Debug, Error)]
pub enum ActivateError {
    #[error("input source {id} disappeared between enumeration and activation")]
    SourceGone { id: String },

    #[error("input source activation refused by the OS (status {status})")]
    Refused { status: i32 },
}

/// Access to the OS input-source list.
///
/// The macOS implementation talks to Text Input Source Services; tests
/// substitute an in-memory directory.
pub trait SourceDirectory: Send + Sync {
    /// All keyboard input sources the OS marks select-capable, in OS
    /// order. Order carries no meaning beyond stable display enumeration.
    fn list_selectable(&self) -> Vec<InputSource>;

    /// Issue the OS activation call for the given source.
    fn activate(&self, source: &InputSource) -> Result<(), ActivateError>;
}

/// First selectable source whose identifier contains `needle`.
///
/// Matching is case-respecting, so configured fragments survive
/// vendor-qualified suffixes without false positives. Multiple matches
/// resolve to the first in OS order; the ambiguity is accepted rather
/// than resolved further.
pub fn find_by_substring<'a>(sources: &'a [InputSource], needle: &str) -> Option<&'a InputSource> {
    sources
        .iter()
        .find(|source| source.selectable && source.id.contains(needle))
}

/// Input-method categories affected by the focus-propagation bug.
const CJKV_MARKERS: [&str; 4] = ["Chinese", "Japanese", "Korean", "Vietnamese"];

/// Whether an identifier belongs to a CJKV input method, the category
/// that needs the focus-coercion workaround after activation.
pub fn is_cjkv(id: &str) -> bool {
    CJKV_MARKERS.iter().any(|marker| id.contains(marker))
}
