//! Global input intake and key simulation
//!
//! Two halves: an rdev-based global listener that normalizes raw OS events
//! into [`InputEvent`]s for the classifier (drags are synthesized from moves
//! while the left button is down), and an evdev/uinput virtual keyboard used
//! to synthesize copy/paste keystrokes and key-combo actions. Works on both
//! X11 and Wayland.

use anyhow::{Context, Result};
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, Key};
use std::sync::Mutex as StdMutex;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clipboard::KeySynth;
use crate::error::{PopError, PopResult};
use crate::events::{InputEvent, KeyPress, Modifiers};

/// Tracks button and modifier state across raw events so the stream handed
/// to the classifier is self-describing.
#[derive(Debug, Default)]
struct ListenerState {
    left_down: bool,
    modifiers: Modifiers,
}

impl ListenerState {
    fn map(&mut self, event: rdev::Event) -> Option<InputEvent> {
        let at = event
            .time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);

        match event.event_type {
            rdev::EventType::MouseMove { .. } => {
                if self.left_down {
                    Some(InputEvent::LeftMouseDragged { at })
                } else {
                    Some(InputEvent::MouseMoved { at })
                }
            }
            rdev::EventType::Wheel { .. } => Some(InputEvent::ScrollWheel { at }),
            rdev::EventType::ButtonPress(rdev::Button::Left) => {
                self.left_down = true;
                None
            }
            rdev::EventType::ButtonRelease(rdev::Button::Left) => {
                self.left_down = false;
                Some(InputEvent::LeftMouseUp { at })
            }
            rdev::EventType::KeyPress(key) => {
                if self.track_modifier(key, true) {
                    return None;
                }
                Some(InputEvent::KeyDown {
                    at,
                    key: map_key(key),
                    modifiers: self.modifiers,
                })
            }
            rdev::EventType::KeyRelease(key) => {
                self.track_modifier(key, false);
                None
            }
            _ => None,
        }
    }

    /// Returns true when the key is a modifier (and is therefore consumed).
    fn track_modifier(&mut self, key: rdev::Key, down: bool) -> bool {
        match key {
            rdev::Key::ShiftLeft | rdev::Key::ShiftRight => self.modifiers.shift = down,
            rdev::Key::ControlLeft | rdev::Key::ControlRight => self.modifiers.control = down,
            rdev::Key::MetaLeft | rdev::Key::MetaRight => self.modifiers.command = down,
            rdev::Key::Alt | rdev::Key::AltGr => self.modifiers.alt = down,
            _ => return false,
        }
        true
    }
}

fn map_key(key: rdev::Key) -> KeyPress {
    match key {
        rdev::Key::KeyA => KeyPress::A,
        rdev::Key::LeftArrow => KeyPress::LeftArrow,
        rdev::Key::RightArrow => KeyPress::RightArrow,
        rdev::Key::UpArrow => KeyPress::UpArrow,
        rdev::Key::DownArrow => KeyPress::DownArrow,
        _ => KeyPress::Other,
    }
}

/// Start the global listener on a dedicated thread; events arrive on the
/// returned channel. The rdev loop never returns on success.
pub fn start_listener() -> mpsc::UnboundedReceiver<InputEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    thread::spawn(move || {
        let mut state = ListenerState::default();
        let result = rdev::listen(move |event| {
            if let Some(mapped) = state.map(event) {
                let _ = tx.send(mapped);
            }
        });
        if let Err(e) = result {
            warn!("⚠️ Global input listener stopped: {:?}", e);
            warn!("   Check input-group membership or accessibility permissions");
        }
    });

    rx
}

/// Virtual keyboard for simulating key presses
pub struct VirtualKeyboard {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualKeyboard {
    /// Create a new virtual keyboard device
    pub fn new() -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();

        for key in [
            // Letters
            Key::KEY_A,
            Key::KEY_B,
            Key::KEY_C,
            Key::KEY_D,
            Key::KEY_E,
            Key::KEY_F,
            Key::KEY_G,
            Key::KEY_H,
            Key::KEY_I,
            Key::KEY_J,
            Key::KEY_K,
            Key::KEY_L,
            Key::KEY_M,
            Key::KEY_N,
            Key::KEY_O,
            Key::KEY_P,
            Key::KEY_Q,
            Key::KEY_R,
            Key::KEY_S,
            Key::KEY_T,
            Key::KEY_U,
            Key::KEY_V,
            Key::KEY_W,
            Key::KEY_X,
            Key::KEY_Y,
            Key::KEY_Z,
            // Numbers
            Key::KEY_0,
            Key::KEY_1,
            Key::KEY_2,
            Key::KEY_3,
            Key::KEY_4,
            Key::KEY_5,
            Key::KEY_6,
            Key::KEY_7,
            Key::KEY_8,
            Key::KEY_9,
            // Function keys
            Key::KEY_F1,
            Key::KEY_F2,
            Key::KEY_F3,
            Key::KEY_F4,
            Key::KEY_F5,
            Key::KEY_F6,
            Key::KEY_F7,
            Key::KEY_F8,
            Key::KEY_F9,
            Key::KEY_F10,
            Key::KEY_F11,
            Key::KEY_F12,
            // Modifiers
            Key::KEY_LEFTSHIFT,
            Key::KEY_LEFTCTRL,
            Key::KEY_LEFTALT,
            Key::KEY_LEFTMETA,
            // Navigation
            Key::KEY_UP,
            Key::KEY_DOWN,
            Key::KEY_LEFT,
            Key::KEY_RIGHT,
            Key::KEY_HOME,
            Key::KEY_END,
            Key::KEY_PAGEUP,
            Key::KEY_PAGEDOWN,
            // Common
            Key::KEY_SPACE,
            Key::KEY_ENTER,
            Key::KEY_TAB,
            Key::KEY_ESC,
            Key::KEY_BACKSPACE,
            Key::KEY_DELETE,
            Key::KEY_INSERT,
        ] {
            keys.insert(key);
        }

        let device = VirtualDeviceBuilder::new()?
            .name("textpop Virtual Keyboard")
            .with_keys(&keys)?
            .build()
            .context("Failed to create virtual keyboard")?;

        info!("⌨️ Virtual keyboard created");
        Ok(Self { device })
    }

    /// Press and release a single key
    pub fn tap_key(&mut self, key: Key) -> Result<()> {
        self.press_key(key)?;
        thread::sleep(Duration::from_millis(10));
        self.release_key(key)?;
        Ok(())
    }

    fn press_key(&mut self, key: Key) -> Result<()> {
        debug!("Key down: {:?}", key);
        self.device
            .emit(&[evdev::InputEvent::new(evdev::EventType::KEY, key.code(), 1)])?;
        Ok(())
    }

    fn release_key(&mut self, key: Key) -> Result<()> {
        debug!("Key up: {:?}", key);
        self.device
            .emit(&[evdev::InputEvent::new(evdev::EventType::KEY, key.code(), 0)])?;
        Ok(())
    }

    /// Type a key combination (e.g., Ctrl+C)
    pub fn key_combo(&mut self, modifiers: &[Key], key: Key) -> Result<()> {
        for modifier in modifiers {
            self.press_key(*modifier)?;
            thread::sleep(Duration::from_millis(5));
        }

        self.tap_key(key)?;

        for modifier in modifiers.iter().rev() {
            self.release_key(*modifier)?;
            thread::sleep(Duration::from_millis(5));
        }

        Ok(())
    }
}

/// Thread-safe wrapper shared between the capture path and action executors.
pub struct SharedKeyboard {
    inner: StdMutex<VirtualKeyboard>,
}

impl SharedKeyboard {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: StdMutex::new(VirtualKeyboard::new()?),
        })
    }

    /// Execute a combo given key names from a plugin manifest, e.g.
    /// `["CTRL", "SHIFT", "T"]`: the last name is the key, the rest are
    /// modifiers.
    pub fn press_named_combo(&self, names: &[String]) -> PopResult<()> {
        let Some((last, mods)) = names.split_last() else {
            return Ok(());
        };
        let key = parse_key(last).ok_or_else(|| PopError::Input(format!("unknown key: {last}")))?;
        let modifiers: Vec<Key> = mods.iter().filter_map(|m| parse_key(m)).collect();

        let mut keyboard = self.inner.lock()?;
        keyboard.key_combo(&modifiers, key)?;
        Ok(())
    }
}

impl KeySynth for SharedKeyboard {
    fn press_copy(&self) -> PopResult<()> {
        let mut keyboard = self.inner.lock()?;
        keyboard.key_combo(&[Key::KEY_LEFTCTRL], Key::KEY_C)?;
        Ok(())
    }

    fn press_paste(&self) -> PopResult<()> {
        let mut keyboard = self.inner.lock()?;
        keyboard.key_combo(&[Key::KEY_LEFTCTRL], Key::KEY_V)?;
        Ok(())
    }
}

/// Parse a key name string to evdev Key
pub fn parse_key(name: &str) -> Option<Key> {
    match name.to_uppercase().as_str() {
        "A" => Some(Key::KEY_A),
        "B" => Some(Key::KEY_B),
        "C" => Some(Key::KEY_C),
        "D" => Some(Key::KEY_D),
        "E" => Some(Key::KEY_E),
        "F" => Some(Key::KEY_F),
        "G" => Some(Key::KEY_G),
        "H" => Some(Key::KEY_H),
        "I" => Some(Key::KEY_I),
        "J" => Some(Key::KEY_J),
        "K" => Some(Key::KEY_K),
        "L" => Some(Key::KEY_L),
        "M" => Some(Key::KEY_M),
        "N" => Some(Key::KEY_N),
        "O" => Some(Key::KEY_O),
        "P" => Some(Key::KEY_P),
        "Q" => Some(Key::KEY_Q),
        "R" => Some(Key::KEY_R),
        "S" => Some(Key::KEY_S),
        "T" => Some(Key::KEY_T),
        "U" => Some(Key::KEY_U),
        "V" => Some(Key::KEY_V),
        "W" => Some(Key::KEY_W),
        "X" => Some(Key::KEY_X),
        "Y" => Some(Key::KEY_Y),
        "Z" => Some(Key::KEY_Z),
        "0" => Some(Key::KEY_0),
        "1" => Some(Key::KEY_1),
        "2" => Some(Key::KEY_2),
        "3" => Some(Key::KEY_3),
        "4" => Some(Key::KEY_4),
        "5" => Some(Key::KEY_5),
        "6" => Some(Key::KEY_6),
        "7" => Some(Key::KEY_7),
        "8" => Some(Key::KEY_8),
        "9" => Some(Key::KEY_9),
        "F1" => Some(Key::KEY_F1),
        "F2" => Some(Key::KEY_F2),
        "F3" => Some(Key::KEY_F3),
        "F4" => Some(Key::KEY_F4),
        "F5" => Some(Key::KEY_F5),
        "F6" => Some(Key::KEY_F6),
        "F7" => Some(Key::KEY_F7),
        "F8" => Some(Key::KEY_F8),
        "F9" => Some(Key::KEY_F9),
        "F10" => Some(Key::KEY_F10),
        "F11" => Some(Key::KEY_F11),
        "F12" => Some(Key::KEY_F12),
        "SHIFT" => Some(Key::KEY_LEFTSHIFT),
        "CTRL" | "CONTROL" => Some(Key::KEY_LEFTCTRL),
        "ALT" => Some(Key::KEY_LEFTALT),
        "SUPER" | "META" | "CMD" | "COMMAND" => Some(Key::KEY_LEFTMETA),
        "UP" => Some(Key::KEY_UP),
        "DOWN" => Some(Key::KEY_DOWN),
        "LEFT" => Some(Key::KEY_LEFT),
        "RIGHT" => Some(Key::KEY_RIGHT),
        "HOME" => Some(Key::KEY_HOME),
        "END" => Some(Key::KEY_END),
        "PAGEUP" | "PGUP" => Some(Key::KEY_PAGEUP),
        "PAGEDOWN" | "PGDN" => Some(Key::KEY_PAGEDOWN),
        "SPACE" => Some(Key::KEY_SPACE),
        "ENTER" | "RETURN" => Some(Key::KEY_ENTER),
        "TAB" => Some(Key::KEY_TAB),
        "ESC" | "ESCAPE" => Some(Key::KEY_ESC),
        "BACKSPACE" => Some(Key::KEY_BACKSPACE),
        "DELETE" | "DEL" => Some(Key::KEY_DELETE),
        "INSERT" | "INS" => Some(Key::KEY_INSERT),
        _ => None,
    }
}
