//! Global event tap listener using macOS CGEventTap
//!
//! Observes system-wide flags-changed and key-down events from a
//! dedicated thread with its own CFRunLoop. The tap is listen-only:
//! every event passes through unmodified, and the callback does nothing
//! that can block. Tap decisions leave the callback through a
//! non-blocking channel send.

use std::cell::RefCell;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    EventField,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{permission, process_tap_event, CommandKey, TapEvent};
use crate::config::SharedPrefs;
use crate::gesture::TapDetector;

extern "C" {
    // CoreGraphics: re-enable a tap the OS turned off
    fn CGEventTapEnable(tap: *mut c_void, enable: bool);
}

/// How often to re-check for accessibility permission before the tap
/// can be installed
const PERMISSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Back-off between failed tap-creation attempts
const TAP_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Global listener that watches Command-key press/release events
pub struct TapListener {
    decision_tx: mpsc::Sender<CommandKey>,
    prefs: Arc<SharedPrefs>,
    running: Arc<AtomicBool>,
}

/// Errors that can occur in the tap listener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("tap listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    TapCreation,

    #[error("failed to create run loop source for the event tap")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

impl TapListener {
    /// Create a new listener. Decisions go out on `decision_tx`; the
    /// enabled flag is read live from `prefs` on every event.
    pub fn new(decision_tx: mpsc::Sender<CommandKey>, prefs: Arc<SharedPrefs>) -> Self {
        Self {
            decision_tx,
            prefs,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the listener.
    ///
    /// Spawns a dedicated thread that waits for accessibility
    /// permission (prompting once, then polling), installs the tap,
    /// and services its CFRunLoop until `stop()` is called. Failed tap
    /// creation is retried on a fixed cadence rather than giving up.
    pub fn start(&self) -> Result<(), ListenerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }

        let decision_tx = self.decision_tx.clone();
        let prefs = Arc::clone(&self.prefs);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("tap-listener".to_string())
            .spawn(move || {
                info!("tap listener thread started");

                wait_for_permission(&running);

                while running.load(Ordering::SeqCst) {
                    match run_event_loop(decision_tx.clone(), Arc::clone(&prefs), Arc::clone(&running)) {
                        Ok(()) => break,
                        Err(e) => {
                            error!(?e, "event tap unavailable, retrying");
                            thread::sleep(TAP_RETRY_INTERVAL);
                        }
                    }
                }

                running.store(false, Ordering::SeqCst);
                info!("tap listener thread stopped");
            })
            .map_err(|e| ListenerError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    /// Stop the listener. Idempotent; the listener thread notices on
    /// its next run-loop slice, drops the tap, and unwinds.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for TapListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Block until the process is trusted for accessibility access.
///
/// Asks the OS to show its grant prompt once, then polls: there is no
/// notification API for the grant, and installing the tap early just
/// fails silently.
fn wait_for_permission(running: &AtomicBool) {
    if permission::request_trust() {
        return;
    }

    info!("waiting for accessibility permission");
    while running.load(Ordering::SeqCst) && !permission::is_trusted() {
        thread::sleep(PERMISSION_POLL_INTERVAL);
    }
}

/// Install the tap and service its run loop until stopped
fn run_event_loop(
    decision_tx: mpsc::Sender<CommandKey>,
    prefs: Arc<SharedPrefs>,
    running: Arc<AtomicBool>,
) -> Result<(), ListenerError> {
    // Touched only from the tap callback on this thread
    let detector = RefCell::new(TapDetector::new());

    // Raw mach port of the tap, stored so the callback can re-enable
    // the tap from inside itself after the OS disables it
    let tap_port: Arc<AtomicPtr<c_void>> = Arc::new(AtomicPtr::new(ptr::null_mut()));
    let port_for_callback = Arc::clone(&tap_port);

    let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        let decision = match event_type {
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!(?event_type, "event tap disabled by the OS, re-enabling");
                let port = port_for_callback.load(Ordering::SeqCst);
                if !port.is_null() {
                    unsafe { CGEventTapEnable(port, true) };
                }
                // Events may have been missed; a stale arming must not
                // turn a later release into a phantom tap.
                detector.borrow_mut().reset();
                None
            }
            CGEventType::KeyDown => {
                process_tap_event(&mut detector.borrow_mut(), prefs.is_enabled(), TapEvent::KeyDown)
            }
            CGEventType::FlagsChanged => {
                let key_code =
                    event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
                let flags = event.get_flags().bits();
                process_tap_event(
                    &mut detector.borrow_mut(),
                    prefs.is_enabled(),
                    TapEvent::FlagsChanged { key_code, flags },
                )
            }
            _ => None,
        };

        if let Some(key) = decision {
            // Switch execution takes tens of milliseconds; hand it off
            // without waiting. A full channel drops the tap.
            if decision_tx.try_send(key).is_err() {
                warn!(%key, "decision channel full, tap dropped");
            }
        }

        // Purely observational: always hand the event back unmodified
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::FlagsChanged, CGEventType::KeyDown],
        callback,
    )
    .map_err(|_| ListenerError::TapCreation)?;

    tap_port.store(
        tap.mach_port.as_concrete_TypeRef() as *mut c_void,
        Ordering::SeqCst,
    );

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| ListenerError::RunLoopSource)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    tap.enable();
    info!("event tap installed and enabled");

    // Service the run loop in short slices so stop() is honored
    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(250), true);
        }
    }

    tap_port.store(ptr::null_mut(), Ordering::SeqCst);
    // The tap and its source are released when they go out of scope

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preferences;

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let prefs = Arc::new(SharedPrefs::new(Preferences::default()));
        let listener = TapListener::new(tx, prefs);
        assert!(!listener.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (tx, _rx) = mpsc::channel(32);
        let prefs = Arc::new(SharedPrefs::new(Preferences::default()));
        let listener = TapListener::new(tx, prefs);
        listener.stop();
        listener.stop();
        assert!(!listener.is_running());
    }
}
