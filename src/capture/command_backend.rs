//! Command-delegating capture backend
//!
//! Implements the [`CaptureBackend`] contract by shelling out to
//! user-configurable desktop tools (xdotool/xclip style), so the actual OS
//! bindings stay outside the core. Every failure degrades to empty output.

use async_trait::async_trait;
use std::process::{Command as StdCommand, Stdio};
use std::sync::Arc;
use sysinfo::{Pid, System};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::clipboard::{self, ClipMonitor, Clipboard, KeySynth};
use crate::config::Config;

/// Run an argv-style command and return raw stdout, or `None` on any
/// failure or non-zero exit. Selection text must come back untrimmed; id
/// and URL reads trim at the call site.
async fn run_capture(argv: &[String]) -> Option<String> {
    let (program, args) = argv.split_first()?;
    let output = Command::new(program).args(args).output().await.ok()?;
    if !output.status.success() {
        debug!("capture command {:?} exited with {}", program, output.status);
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Pasteboard access through external clipboard tools. Reads and writes are
/// short-lived subprocess calls.
pub struct CommandClipboard {
    read_argv: Vec<String>,
    write_argv: Vec<String>,
}

impl CommandClipboard {
    pub fn new(config: &Config) -> Self {
        Self {
            read_argv: config.clipboard_read_command.clone(),
            write_argv: config.clipboard_write_command.clone(),
        }
    }
}

impl Clipboard for CommandClipboard {
    fn read(&self) -> Option<String> {
        let (program, args) = self.read_argv.split_first()?;
        let output = StdCommand::new(program).args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn write(&self, text: &str) {
        let Some((program, args)) = self.write_argv.split_first() else {
            return;
        };
        let child = StdCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn();
        match child {
            Ok(mut child) => {
                if let Some(mut stdin) = child.stdin.take() {
                    use std::io::Write;
                    let _ = stdin.write_all(text.as_bytes());
                }
                let _ = child.wait();
            }
            Err(e) => warn!("clipboard write command failed to spawn: {}", e),
        }
    }
}

/// Capture backend wired to configured commands plus the shared virtual
/// keyboard and clipboard monitor.
pub struct CommandBackend {
    app_id_argv: Vec<String>,
    selection_argv: Vec<String>,
    browser_url_argv: Vec<String>,
    clipboard: Arc<dyn Clipboard>,
    keys: Arc<dyn KeySynth>,
    monitor: Arc<ClipMonitor>,
}

impl CommandBackend {
    pub fn new(
        config: &Config,
        clipboard: Arc<dyn Clipboard>,
        keys: Arc<dyn KeySynth>,
        monitor: Arc<ClipMonitor>,
    ) -> Self {
        Self {
            app_id_argv: config.app_id_command.clone(),
            selection_argv: config.selection_command.clone(),
            browser_url_argv: config.browser_url_command.clone(),
            clipboard,
            keys,
            monitor,
        }
    }

    /// Frontmost-process fallback: resolve the active window's pid and look
    /// the process name up in the process table.
    async fn frontmost_process_name(&self) -> Option<String> {
        let argv: Vec<String> = vec![
            "xdotool".into(),
            "getactivewindow".into(),
            "getwindowpid".into(),
        ];
        let pid: usize = run_capture(&argv).await?.trim().parse().ok()?;
        let sys = System::new_all();
        let process = sys.process(Pid::from(pid))?;
        Some(process.name().to_string_lossy().to_string())
    }
}

#[async_trait]
impl super::CaptureBackend for CommandBackend {
    async fn foreground_app_id(&self) -> Option<String> {
        if let Some(id) = run_capture(&self.app_id_argv).await {
            let id = id.trim();
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
        self.frontmost_process_name().await
    }

    async fn focused_selection_text(&self, _app_id: &str) -> String {
        run_capture(&self.selection_argv).await.unwrap_or_default()
    }

    async fn is_focused_element_editable(&self) -> Option<bool> {
        // No portable introspection through external tools.
        None
    }

    async fn browser_selection_and_url(&self, app_id: &str) -> Option<(String, String)> {
        let text = self.focused_selection_text(app_id).await;
        if self.browser_url_argv.is_empty() {
            return Some((text, String::new()));
        }
        let url = run_capture(&self.browser_url_argv)
            .await
            .map(|url| url.trim().to_string())
            .unwrap_or_default();
        Some((text, url))
    }

    async fn simulate_copy_and_read(&self) -> String {
        clipboard::simulate_copy_and_read(&self.monitor, self.clipboard.as_ref(), self.keys.as_ref())
            .await
    }

    async fn simulate_paste(&self, text: &str) {
        if let Err(e) =
            clipboard::paste_text(&self.monitor, self.clipboard.as_ref(), self.keys.as_ref(), text)
                .await
        {
            warn!("paste failed: {}", e);
        }
    }
}
