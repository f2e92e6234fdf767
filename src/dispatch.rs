//! Dispatcher
//!
//! Wires classifier emissions to capture, catalog resolution, and the
//! action surface. Owns the popup debounce: one pending timer at a time,
//! the newest cancels the oldest, and a canceled timer can never surface a
//! stale capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::actions::catalog::ActionCatalog;
use crate::actions::ResolvedAction;
use crate::capture::{ContextBuilder, SelectedTextContext};
use crate::events::{Classification, EventClassifier, InputEvent, POPUP_DEBOUNCE};

/// How eagerly a surface close treats the pointer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Close unless the pointer is within an expanded margin of the surface.
    Expanded,
    /// Close unless the pointer is over the surface itself.
    Original,
    /// Close unconditionally.
    Force,
}

/// The presentation layer, driven but never owned by the core.
pub trait ActionSurface: Send + Sync {
    /// Present the action bar for a fresh capture.
    fn show_bar(&self, ctx: &SelectedTextContext, actions: Vec<ResolvedAction>);

    /// Close popbar surfaces only; true when something closed.
    fn close_popbar(&self, mode: CloseMode) -> bool;

    /// Close every surface; true when something closed.
    fn close_all(&self, mode: CloseMode) -> bool;
}

pub struct Dispatcher {
    classifier: EventClassifier,
    builder: ContextBuilder,
    catalog: Arc<ActionCatalog>,
    surface: Arc<dyn ActionSurface>,
    paused: Arc<AtomicBool>,
    /// Text of the capture most recently scheduled for display; identical
    /// re-captures are suppressed.
    last_text: Arc<StdMutex<String>>,
    /// Guards the debounce against late firings: a timer only shows its
    /// capture while its generation is still current.
    generation: Arc<StdMutex<u64>>,
    pending: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        builder: ContextBuilder,
        catalog: Arc<ActionCatalog>,
        surface: Arc<dyn ActionSurface>,
    ) -> Self {
        Self {
            classifier: EventClassifier::new(),
            builder,
            catalog,
            surface,
            paused: Arc::new(AtomicBool::new(false)),
            last_text: Arc::new(StdMutex::new(String::new())),
            generation: Arc::new(StdMutex::new(0)),
            pending: None,
        }
    }

    /// Shared pause flag; while set, events are dropped on the floor.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    /// Drive the dispatcher from an event channel until it closes.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<InputEvent>) {
        info!("🖱️ dispatcher running");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        self.shutdown();
    }

    pub async fn handle_event(&mut self, event: InputEvent) {
        if self.paused.load(Ordering::Relaxed) {
            return;
        }

        match self.classifier.classify(&event) {
            Classification::Motion => {
                if self.surface.close_popbar(CloseMode::Expanded) {
                    self.clear_last_text();
                }
            }
            Classification::Reset => {
                self.clear_last_text();
                self.cancel_pending();
                self.surface.close_all(CloseMode::Original);
            }
            Classification::Selection => {
                let mut scheduled = false;
                if let Some(ctx) = self.builder.capture().await {
                    if !ctx.text.is_empty() {
                        scheduled = true;
                        self.schedule_popup(ctx);
                    }
                }
                if !scheduled {
                    self.close_foreign().await;
                }
            }
            Classification::Passive => self.close_foreign().await,
        }
    }

    /// Stop any pending popup; used on shutdown and scroll resets.
    pub fn shutdown(&mut self) {
        self.cancel_pending();
    }

    fn clear_last_text(&self) {
        if let Ok(mut last) = self.last_text.lock() {
            last.clear();
        }
    }

    /// A non-selection event from a foreign app closes surfaces and forgets
    /// the last selection; events over our own windows leave them alone.
    async fn close_foreign(&self) {
        if self.builder.foreground_is_self().await {
            return;
        }
        self.clear_last_text();
        self.surface.close_all(CloseMode::Original);
    }

    fn schedule_popup(&mut self, ctx: SelectedTextContext) {
        {
            let Ok(mut last) = self.last_text.lock() else {
                return;
            };
            if *last == ctx.text {
                debug!("suppressing redundant capture");
                return;
            }
            *last = ctx.text.clone();
        }

        self.cancel_pending();
        let expected = match self.generation.lock() {
            Ok(generation) => *generation,
            Err(poisoned) => *poisoned.into_inner(),
        };

        let generation = Arc::clone(&self.generation);
        let catalog = Arc::clone(&self.catalog);
        let surface = Arc::clone(&self.surface);

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(POPUP_DEBOUNCE).await;
            // Check and show under the generation lock so a concurrent
            // cancel can never lose to a late firing.
            let Ok(guard) = generation.lock() else {
                return;
            };
            if *guard != expected {
                return;
            }
            let actions = catalog.resolve(&ctx);
            surface.show_bar(&ctx, actions);
        }));
    }

    fn cancel_pending(&mut self) {
        if let Ok(mut generation) = self.generation.lock() {
            *generation += 1;
        }
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}
