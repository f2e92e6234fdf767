//! Selection event classification
//!
//! Turns the global input event stream into "selection committed" signals.
//! A selection is committed by a drag-release, a double/triple click, a
//! select-all keystroke, or a shift+super arrow extension. Everything else
//! either resets the last known selection (scroll) or just collapses any
//! open surface.

use std::time::Duration;

/// Two left clicks closer than this are a double (or triple) click.
pub const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(500);

/// Quiet period before a committed selection is surfaced. A newer qualifying
/// event cancels the pending one, which keeps the bar from flickering during
/// rapid re-selection.
pub const POPUP_DEBOUNCE: Duration = Duration::from_millis(200);

/// Modifier keys held during a key event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Super/Meta on Linux, Command on macOS keyboards.
    pub command: bool,
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
}

impl Modifiers {
    pub fn command() -> Self {
        Modifiers {
            command: true,
            ..Default::default()
        }
    }

    pub fn command_shift() -> Self {
        Modifiers {
            command: true,
            shift: true,
            ..Default::default()
        }
    }
}

/// Keys the classifier distinguishes; anything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    A,
    LeftArrow,
    RightArrow,
    UpArrow,
    DownArrow,
    Other,
}

impl KeyPress {
    fn is_arrow(self) -> bool {
        matches!(
            self,
            KeyPress::LeftArrow | KeyPress::RightArrow | KeyPress::UpArrow | KeyPress::DownArrow
        )
    }
}

/// One global input event. Timestamps are measured from an arbitrary
/// monotonic origin; only differences are ever compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    MouseMoved { at: Duration },
    LeftMouseDragged { at: Duration },
    LeftMouseUp { at: Duration },
    ScrollWheel { at: Duration },
    KeyDown {
        at: Duration,
        key: KeyPress,
        modifiers: Modifiers,
    },
}

/// What the dispatcher should do with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Qualifying selection gesture: capture now.
    Selection,
    /// Scroll: forget the last selection and close surfaces away from the pointer.
    Reset,
    /// Pointer motion only: may collapse an expanded surface.
    Motion,
    /// Anything else: closes surfaces when no new selection was produced.
    Passive,
}

/// Kinds tracked as "the last mouse event". Key presses are deliberately
/// excluded so Cmd+A after a click still sees the click as the last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastKind {
    MouseMoved,
    LeftMouseDragged,
    LeftMouseUp,
}

/// Classifies the input stream. One instance per stream; never fails, and
/// unknown events simply classify as `Passive`.
#[derive(Debug)]
pub struct EventClassifier {
    last_kind: LastKind,
    last_up: Duration,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventClassifier {
    pub fn new() -> Self {
        Self {
            last_kind: LastKind::LeftMouseUp,
            last_up: Duration::ZERO,
        }
    }

    /// Classify one event, updating internal state.
    pub fn classify(&mut self, event: &InputEvent) -> Classification {
        match *event {
            InputEvent::MouseMoved { .. } => {
                self.last_kind = LastKind::MouseMoved;
                Classification::Motion
            }
            InputEvent::ScrollWheel { .. } => Classification::Reset,
            InputEvent::LeftMouseDragged { .. } => {
                self.last_kind = LastKind::LeftMouseDragged;
                Classification::Passive
            }
            InputEvent::LeftMouseUp { at } => {
                let selected = self.last_kind == LastKind::LeftMouseDragged
                    || (self.last_kind == LastKind::LeftMouseUp
                        && at.saturating_sub(self.last_up) < DOUBLE_CLICK_WINDOW);
                self.last_up = at;
                self.last_kind = LastKind::LeftMouseUp;
                if selected {
                    Classification::Selection
                } else {
                    Classification::Passive
                }
            }
            InputEvent::KeyDown { key, modifiers, .. } => {
                // Key presses never become the "last mouse event".
                if Self::is_selection_key(key, modifiers) {
                    Classification::Selection
                } else {
                    Classification::Passive
                }
            }
        }
    }

    /// Cmd+A without shift/control selects all; Cmd+Shift+Arrow extends the
    /// selection. Other modifiers on top of the required pair are tolerated
    /// for arrows, matching how editors report them.
    fn is_selection_key(key: KeyPress, modifiers: Modifiers) -> bool {
        match key {
            KeyPress::A => modifiers.command && !modifiers.shift && !modifiers.control,
            k if k.is_arrow() => modifiers.command && modifiers.shift,
            _ => false,
        }
    }
}
