//! Switch execution
//!
//! Turns a tap decision into an input-source activation: resolve the
//! configured identifier fragment against the live source list, issue
//! the activation call, and run the focus-coercion cycle for CJKV
//! targets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::SharedPrefs;
use crate::events::SwitchEvent;
use crate::focus::{FocusCoercion, DEFAULT_HOLD};
use crate::hotkey::CommandKey;
use crate::sources::{self, ActivateError, SourceDirectory};

/// Why a switch request was dropped
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("no selectable input source matches \"{0}\"")]
    SourceNotFound(String),

    #[error(transparent)]
    Activate(#[from] ActivateError),
}

/// Executes "switch to identifier X" requests.
pub struct SwitchExecutor {
    directory: Box<dyn SourceDirectory>,
    coercer: Box<dyn FocusCoercion>,
    coercion_hold: Duration,
}

impl SwitchExecutor {
    pub fn new(directory: Box<dyn SourceDirectory>, coercer: Box<dyn FocusCoercion>) -> Self {
        Self::with_hold(directory, coercer, DEFAULT_HOLD)
    }

    pub fn with_hold(
        directory: Box<dyn SourceDirectory>,
        coercer: Box<dyn FocusCoercion>,
        coercion_hold: Duration,
    ) -> Self {
        Self {
            directory,
            coercer,
            coercion_hold,
        }
    }

    /// Resolve `needle` and activate the matching source.
    ///
    /// The activation call is issued even when the target is already
    /// active: the OS treats that as a no-op, and skipping it would
    /// trust a notion of "active" that can lag reality. Returns the
    /// resolved identifier.
    pub fn switch_to(&self, needle: &str) -> Result<String, SwitchError> {
        let available = self.directory.list_selectable();
        let source = sources::find_by_substring(&available, needle)
            .ok_or_else(|| SwitchError::SourceNotFound(needle.to_string()))?;

        self.directory.activate(source)?;
        info!(source = %source.id, "input source activated");

        if sources::is_cjkv(&source.id) {
            self.coercer.trigger(self.coercion_hold);
        }

        Ok(source.id.clone())
    }

    /// Process tap decisions until the channel closes.
    ///
    /// Each decision spawns an independent blocking task (the TIS calls
    /// block). Overlapping switches are deliberately not serialized:
    /// two rapid taps race, and the activation that finishes last wins.
    pub async fn run(
        self: Arc<Self>,
        mut decision_rx: mpsc::Receiver<CommandKey>,
        prefs: Arc<SharedPrefs>,
        event_tx: broadcast::Sender<SwitchEvent>,
    ) {
        info!("switch executor started");

        while let Some(key) = decision_rx.recv().await {
            let _ = event_tx.send(SwitchEvent::TapDetected { key });

            let target = prefs.target_for(key).await;
            let executor = Arc::clone(&self);
            let event_tx = event_tx.clone();

            tokio::task::spawn_blocking(move || match executor.switch_to(&target) {
                Ok(source_id) => {
                    let _ = event_tx.send(SwitchEvent::SwitchCompleted { source_id });
                }
                Err(e) => {
                    warn!(%target, error = %e, "switch request dropped");
                    let _ = event_tx.send(SwitchEvent::SwitchFailed {
                        target,
                        reason: e.to_string(),
                    });
                }
            });
        }

        info!("switch executor stopped");
    }
}
