//! Selection capture
//!
//! The [`CaptureBackend`] trait is the contract against the platform's text
//! extraction facilities; [`ContextBuilder`] orchestrates it into a
//! [`SelectedTextContext`] using a prioritized chain of strategies with a
//! simulated-copy fallback for apps that expose selections no other way.

pub mod command_backend;
pub mod detect;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub use command_backend::CommandBackend;

/// Snapshot of one capture. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedTextContext {
    pub text: String,
    /// Identifier of the source application (WM class / bundle id).
    pub app_id: String,
    /// URL of the page containing the selection, for browser captures.
    pub web_page_url: Option<String>,
    /// Links detected inside the selected text, deduplicated.
    pub urls: Vec<String>,
    /// Last street address detected inside the selected text.
    pub address: Option<String>,
    /// Whether the focused element accepts a paste.
    pub editable: bool,
}

/// Platform text/context extraction. Every operation degrades to empty or
/// `None` on permission or introspection failure; none may fail hard.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Identifier of the foreground application, after any system-level
    /// fallback the backend can muster.
    async fn foreground_app_id(&self) -> Option<String>;

    /// Selected text of the focused element.
    async fn focused_selection_text(&self, app_id: &str) -> String;

    /// Whether the focused element is editable; `None` when unknowable.
    async fn is_focused_element_editable(&self) -> Option<bool>;

    /// Browser-specific capture returning selected text and the active tab URL.
    async fn browser_selection_and_url(&self, app_id: &str) -> Option<(String, String)>;

    /// Capture by synthesizing a copy keystroke; must leave the user's
    /// clipboard untouched.
    async fn simulate_copy_and_read(&self) -> String;

    /// Paste text into the focused field via the pasteboard.
    async fn simulate_paste(&self, text: &str);
}

/// Browsers get the script/tooling capture path that also yields the tab URL.
const BROWSER_APPS: &[&str] = &[
    "firefox",
    "org.mozilla.firefox",
    "chromium",
    "chromium-browser",
    "google-chrome",
    "brave-browser",
    "microsoft-edge",
];

/// Apps whose selections are only reachable through a synthesized copy.
const COPY_FALLBACK_APPS: &[&str] = &[
    "code",
    "code-oss",
    "dev.zed.Zed",
    "foliate",
    "org.telegram.desktop",
    "obsidian",
];

/// Apps that misreport editability; treated as editable regardless.
const FORCE_EDITABLE_APPS: &[&str] = &["code", "code-oss", "dev.zed.Zed", "obsidian"];

/// E-book readers append an attribution footer to copied excerpts.
const EXCERPT_FOOTER_APPS: &[&str] = &["foliate", "calibre-ebook-viewer"];

const EXCERPT_FOOTER_MARKERS: &[&str] = &["\n\nExcerpt From\n", "\n\n摘录来自\n"];

pub fn is_browser(app_id: &str) -> bool {
    BROWSER_APPS.contains(&app_id)
}

/// Truncate at the last occurrence of a known excerpt footer.
fn strip_excerpt_footer(text: &str) -> &str {
    for marker in EXCERPT_FOOTER_MARKERS {
        if let Some(idx) = text.rfind(marker) {
            return &text[..idx];
        }
    }
    text
}

/// Builds a [`SelectedTextContext`] from the current foreground selection.
pub struct ContextBuilder {
    backend: Arc<dyn CaptureBackend>,
    self_app_id: String,
}

impl ContextBuilder {
    pub fn new(backend: Arc<dyn CaptureBackend>, self_app_id: impl Into<String>) -> Self {
        Self {
            backend,
            self_app_id: self_app_id.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    /// Whether the foreground app is this daemon itself.
    pub async fn foreground_is_self(&self) -> bool {
        matches!(
            self.backend.foreground_app_id().await.as_deref(),
            Some(id) if id == self.self_app_id
        )
    }

    /// Capture the current selection. `None` only when the foreground app
    /// cannot be identified at all; an empty selection is a valid miss and
    /// comes back as a context with empty text.
    pub async fn capture(&self) -> Option<SelectedTextContext> {
        let app_id = self.backend.foreground_app_id().await?;
        if app_id == self.self_app_id {
            // Never capture from our own surfaces.
            return None;
        }

        let mut editable = self
            .backend
            .is_focused_element_editable()
            .await
            .unwrap_or(false);
        if FORCE_EDITABLE_APPS.contains(&app_id.as_str()) {
            editable = true;
        }

        let mut web_page_url = None;
        let mut text = if is_browser(&app_id) {
            match self.backend.browser_selection_and_url(&app_id).await {
                Some((text, url)) => {
                    if !url.is_empty() {
                        web_page_url = Some(url);
                    }
                    text
                }
                None => String::new(),
            }
        } else {
            self.backend.focused_selection_text(&app_id).await
        };

        if text.is_empty() && COPY_FALLBACK_APPS.contains(&app_id.as_str()) {
            debug!("falling back to simulated copy for {}", app_id);
            text = self.backend.simulate_copy_and_read().await;
            if EXCERPT_FOOTER_APPS.contains(&app_id.as_str()) {
                text = strip_excerpt_footer(&text).to_string();
            }
        }

        let urls = detect::detect_links(&text);
        let address = detect::detect_address(&text);

        Some(SelectedTextContext {
            text,
            app_id,
            web_page_url,
            urls,
            address,
            editable,
        })
    }
}
