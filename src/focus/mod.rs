//! Focus-coercion workaround for the TISSelectInputSource bug
//!
//! Activating a CJKV input method updates the menu-bar indicator, but
//! applications built on certain cross-platform UI toolkits (Electron
//! being the known case, see Karabiner-Elements issue #1602) keep
//! feeding the focused text field from the old input method until their
//! window loses and regains focus. Ordering an invisible window of our
//! own to the front and back out again manufactures that focus cycle
//! without activating this process.

use std::time::Duration;

/// Default time the coercion window stays ordered in
pub const DEFAULT_HOLD: Duration = Duration::from_millis(50);

/// A focus-cycle trigger. Best effort: failures are logged, never
/// surfaced.
pub trait FocusCoercion: Send + Sync {
    /// Run one focus cycle, holding the transient window for `hold`.
    fn trigger(&self, hold: Duration);
}

#[cfg(target_os = "macos")]
mod tap_window {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cocoa::appkit::{
        NSBackingStoreBuffered, NSWindow, NSWindowCollectionBehavior, NSWindowStyleMask,
    };
    use cocoa::base::{id, nil, NO};
    use cocoa::foundation::{NSPoint, NSRect, NSSize};
    use objc::{class, msg_send, sel, sel_impl};
    use tracing::debug;

    use super::FocusCoercion;

    // NSFloatingWindowLevel
    const TAP_WINDOW_LEVEL: i64 = 3;

    /// NSWindow pointer handed between the trigger call and its delayed
    /// teardown. Window operations happen one at a time under the state
    /// mutex.
    struct WindowHandle(id);

    unsafe impl Send for WindowHandle {}

    struct CoercerState {
        window: Option<WindowHandle>,
        generation: u64,
    }

    /// Owns the single transient coercion window.
    ///
    /// At most one window exists at a time: a new trigger tears down
    /// the previous window before creating its own, and the generation
    /// counter turns a superseded teardown timer into a no-op.
    pub struct TapWindowCoercer {
        state: Arc<Mutex<CoercerState>>,
    }

    impl TapWindowCoercer {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(CoercerState {
                    window: None,
                    generation: 0,
                })),
            }
        }
    }

    impl Default for TapWindowCoercer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FocusCoercion for TapWindowCoercer {
        fn trigger(&self, hold: Duration) {
            let generation = {
                let Ok(mut state) = self.state.lock() else {
                    return;
                };

                if let Some(prev) = state.window.take() {
                    unsafe { prev.0.orderOut_(nil) };
                }

                let window = unsafe { create_tap_window() };
                if window == nil {
                    debug!("coercion window creation failed");
                    return;
                }
                unsafe { window.orderFrontRegardless() };

                state.generation += 1;
                state.window = Some(WindowHandle(window));
                state.generation
            };

            let state = Arc::clone(&self.state);
            std::thread::spawn(move || {
                std::thread::sleep(hold);
                let Ok(mut state) = state.lock() else {
                    return;
                };
                // A newer trigger owns the window now; leave it alone.
                if state.generation != generation {
                    return;
                }
                if let Some(handle) = state.window.take() {
                    unsafe { handle.0.orderOut_(nil) };
                    debug!(hold_ms = hold.as_millis() as u64, "coercion window closed");
                }
            });
        }
    }

    /// 1x1 borderless transparent window parked off-screen. Ordered
    /// front without activating the process, so the menu-bar host never
    /// becomes the active application itself.
    unsafe fn create_tap_window() -> id {
        let rect = NSRect::new(NSPoint::new(-100.0, -100.0), NSSize::new(1.0, 1.0));
        let window = NSWindow::alloc(nil).initWithContentRect_styleMask_backing_defer_(
            rect,
            NSWindowStyleMask::NSBorderlessWindowMask,
            NSBackingStoreBuffered,
            NO,
        );
        if window == nil {
            return nil;
        }

        let clear_color: id = msg_send![class!(NSColor), clearColor];
        window.setBackgroundColor_(clear_color);
        window.setOpaque_(NO);
        window.setLevel_(TAP_WINDOW_LEVEL);
        window.setCollectionBehavior_(
            NSWindowCollectionBehavior::NSWindowCollectionBehaviorCanJoinAllSpaces
                | NSWindowCollectionBehavior::NSWindowCollectionBehaviorStationary,
        );
        let _: () = msg_send![window, setReleasedWhenClosed: NO];
        window
    }
}

#[cfg(target_os = "macos")]
pub use tap_window::TapWindowCoercer;
