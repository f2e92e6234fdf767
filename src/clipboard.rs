//! Clipboard coordination
//!
//! The system pasteboard is one global shared resource. Every transient
//! writer (simulate-copy capture, programmatic paste) snapshots the current
//! content, does its work, and restores the snapshot, serialized behind one
//! lock and with the history monitor paused for the duration so programmatic
//! traffic is never recorded as user clipboard history.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::PopResult;

/// How long a synthesized copy keystroke gets to land in the pasteboard.
pub const COPY_SETTLE: Duration = Duration::from_millis(100);

/// Minimal pasteboard access. Implementations never fail hard; a read that
/// cannot be served is `None`.
pub trait Clipboard: Send + Sync {
    fn read(&self) -> Option<String>;
    fn write(&self, text: &str);
}

/// Copy/paste keystroke synthesis, split out so tests can fake the
/// foreground application's reaction.
pub trait KeySynth: Send + Sync {
    fn press_copy(&self) -> PopResult<()>;
    fn press_paste(&self) -> PopResult<()>;
}

/// Pause bookkeeping for the external clipboard-history watcher plus the
/// mutual-exclusion gate for transient pasteboard writers.
///
/// Pausing is token-counted: the watcher resumes only once the last guard is
/// dropped, so nested and concurrent pausers compose.
pub struct ClipMonitor {
    pausers: StdMutex<HashSet<u64>>,
    next_token: AtomicU64,
    gate: tokio::sync::Mutex<()>,
}

impl Default for ClipMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipMonitor {
    pub fn new() -> Self {
        Self {
            pausers: StdMutex::new(HashSet::new()),
            next_token: AtomicU64::new(1),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Acquire a pause token. The watcher stays paused until every
    /// outstanding guard has been dropped.
    pub fn pause(self: &Arc<Self>) -> PauseGuard {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut pausers) = self.pausers.lock() {
            pausers.insert(token);
        }
        debug!("clipboard monitor paused (token {})", token);
        PauseGuard {
            monitor: Arc::clone(self),
            token,
        }
    }

    /// Whether the history watcher should currently ignore pasteboard traffic.
    pub fn is_paused(&self) -> bool {
        self.pausers.lock().map(|p| !p.is_empty()).unwrap_or(false)
    }

    fn resume(&self, token: u64) {
        if let Ok(mut pausers) = self.pausers.lock() {
            pausers.remove(&token);
            if pausers.is_empty() {
                debug!("clipboard monitor resumed");
            }
        }
    }
}

/// RAII pause token; releases on every exit path.
pub struct PauseGuard {
    monitor: Arc<ClipMonitor>,
    token: u64,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.monitor.resume(self.token);
    }
}

/// Capture the current selection by synthesizing a copy keystroke, then put
/// the user's clipboard back exactly as it was. Returns an empty string when
/// nothing new arrived in the pasteboard.
pub async fn simulate_copy_and_read(
    monitor: &Arc<ClipMonitor>,
    clipboard: &dyn Clipboard,
    keys: &dyn KeySynth,
) -> String {
    let _gate = monitor.gate.lock().await;
    let _pause = monitor.pause();

    let saved = clipboard.read();
    if let Err(e) = keys.press_copy() {
        warn!("copy keystroke failed: {}", e);
        return String::new();
    }
    sleep(COPY_SETTLE).await;

    let captured = clipboard.read();
    if captured == saved {
        // Nothing was copied; the pasteboard is untouched.
        return String::new();
    }
    clipboard.write(saved.as_deref().unwrap_or(""));
    captured.unwrap_or_default()
}

/// Paste `text` into the focused field via the pasteboard, restoring the
/// previous content afterwards.
pub async fn paste_text(
    monitor: &Arc<ClipMonitor>,
    clipboard: &dyn Clipboard,
    keys: &dyn KeySynth,
    text: &str,
) -> PopResult<()> {
    let _gate = monitor.gate.lock().await;
    let _pause = monitor.pause();

    let saved = clipboard.read();
    clipboard.write(text);
    let pressed = keys.press_paste();
    sleep(COPY_SETTLE).await;
    clipboard.write(saved.as_deref().unwrap_or(""));
    pressed
}

/// Overwrite the clipboard with `text`, with no restore. Used by the Copy
/// after-effect and the copy builtin.
pub fn copy_text(clipboard: &dyn Clipboard, text: &str) {
    clipboard.write(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory pasteboard.
    #[derive(Default)]
    struct MemClipboard(StdMutex<Option<String>>);

    impl Clipboard for MemClipboard {
        fn read(&self) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
        fn write(&self, text: &str) {
            *self.0.lock().unwrap() = Some(text.to_string());
        }
    }

    /// Fake foreground app: pressing copy drops its "selection" into the
    /// pasteboard; pressing paste is a no-op.
    struct FakeKeys<'a> {
        clipboard: &'a MemClipboard,
        selection: &'a str,
    }

    impl KeySynth for FakeKeys<'_> {
        fn press_copy(&self) -> PopResult<()> {
            self.clipboard.write(self.selection);
            Ok(())
        }
        fn press_paste(&self) -> PopResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_copy_restores_clipboard() {
        let monitor = Arc::new(ClipMonitor::new());
        let clipboard = MemClipboard::default();
        clipboard.write("X");
        let keys = FakeKeys {
            clipboard: &clipboard,
            selection: "captured words",
        };

        let got = simulate_copy_and_read(&monitor, &clipboard, &keys).await;
        assert_eq!(got, "captured words");
        assert_eq!(clipboard.read().as_deref(), Some("X"));
        assert!(!monitor.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_copy_nothing_selected() {
        let monitor = Arc::new(ClipMonitor::new());
        let clipboard = MemClipboard::default();
        clipboard.write("X");
        // The app copies the same content the pasteboard already holds.
        let keys = FakeKeys {
            clipboard: &clipboard,
            selection: "X",
        };

        let got = simulate_copy_and_read(&monitor, &clipboard, &keys).await;
        assert_eq!(got, "");
        assert_eq!(clipboard.read().as_deref(), Some("X"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paste_restores_clipboard() {
        let monitor = Arc::new(ClipMonitor::new());
        let clipboard = MemClipboard::default();
        clipboard.write("original");
        let keys = FakeKeys {
            clipboard: &clipboard,
            selection: "",
        };

        paste_text(&monitor, &clipboard, &keys, "pasted").await.unwrap();
        assert_eq!(clipboard.read().as_deref(), Some("original"));
    }

    #[test]
    fn test_nested_pausers() {
        let monitor = Arc::new(ClipMonitor::new());
        assert!(!monitor.is_paused());

        let a = monitor.pause();
        let b = monitor.pause();
        assert!(monitor.is_paused());

        drop(a);
        assert!(monitor.is_paused(), "one pauser still holds a token");
        drop(b);
        assert!(!monitor.is_paused());
    }
}
