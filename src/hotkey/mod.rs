//! Global shortcut detection via evdev
//!
//! Reads keyboard events directly from /dev/input/event* devices, bypassing
//! Wayland's compositor-level input isolation. Unlike a fire-on-press hotkey,
//! dictation needs both edges of a chord press: push-to-talk records for as
//! long as the key is held.
//!
//! # Requirements
//! - User must be in the `input` group: `sudo usermod -aG input $USER`
//! - Log out and back in after adding to group

mod detector;
pub mod manager;

pub use detector::{ChordDetector, KeyEdge};
pub use manager::{HotkeyManager, HotkeyStatus};

use evdev::Key;

/// A shortcut combination (modifiers + key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chord {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
    pub key: Key,
}

impl Chord {
    /// Default toggle shortcut: Ctrl+Alt+Space
    pub fn default_toggle() -> Self {
        Self {
            ctrl: true,
            alt: true,
            shift: false,
            meta: false,
            key: Key::KEY_SPACE,
        }
    }

    /// Default push-to-talk shortcut: Ctrl+Alt+V
    pub fn default_push_to_talk() -> Self {
        Self {
            ctrl: true,
            alt: true,
            shift: false,
            meta: false,
            key: Key::KEY_V,
        }
    }

    /// Parse a chord from its settings representation, e.g. "ctrl+alt+space".
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut chord = Self {
            ctrl: false,
            alt: false,
            shift: false,
            meta: false,
            key: Key::KEY_RESERVED,
        };
        let mut key = None;

        for part in spec.split('+') {
            match part.trim().to_ascii_lowercase().as_str() {
                "" => return Err(format!("empty component in chord {:?}", spec)),
                "ctrl" | "control" => chord.ctrl = true,
                "alt" => chord.alt = true,
                "shift" => chord.shift = true,
                "meta" | "super" | "win" => chord.meta = true,
                name => {
                    if key.is_some() {
                        return Err(format!("chord {:?} has more than one non-modifier", spec));
                    }
                    key = Some(key_from_name(name).ok_or_else(|| {
                        format!("unknown key {:?} in chord {:?}", name, spec)
                    })?);
                }
            }
        }

        chord.key = key.ok_or_else(|| format!("chord {:?} has no non-modifier key", spec))?;
        Ok(chord)
    }
}

impl std::fmt::Display for Chord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.ctrl {
            parts.push("Ctrl");
        }
        if self.alt {
            parts.push("Alt");
        }
        if self.shift {
            parts.push("Shift");
        }
        if self.meta {
            parts.push("Meta");
        }
        parts.push(key_name(self.key));
        write!(f, "{}", parts.join("+"))
    }
}

fn key_from_name(name: &str) -> Option<Key> {
    let key = match name {
        "a" => Key::KEY_A,
        "b" => Key::KEY_B,
        "c" => Key::KEY_C,
        "d" => Key::KEY_D,
        "e" => Key::KEY_E,
        "f" => Key::KEY_F,
        "g" => Key::KEY_G,
        "h" => Key::KEY_H,
        "i" => Key::KEY_I,
        "j" => Key::KEY_J,
        "k" => Key::KEY_K,
        "l" => Key::KEY_L,
        "m" => Key::KEY_M,
        "n" => Key::KEY_N,
        "o" => Key::KEY_O,
        "p" => Key::KEY_P,
        "q" => Key::KEY_Q,
        "r" => Key::KEY_R,
        "s" => Key::KEY_S,
        "t" => Key::KEY_T,
        "u" => Key::KEY_U,
        "v" => Key::KEY_V,
        "w" => Key::KEY_W,
        "x" => Key::KEY_X,
        "y" => Key::KEY_Y,
        "z" => Key::KEY_Z,
        "0" => Key::KEY_0,
        "1" => Key::KEY_1,
        "2" => Key::KEY_2,
        "3" => Key::KEY_3,
        "4" => Key::KEY_4,
        "5" => Key::KEY_5,
        "6" => Key::KEY_6,
        "7" => Key::KEY_7,
        "8" => Key::KEY_8,
        "9" => Key::KEY_9,
        "space" => Key::KEY_SPACE,
        "enter" | "return" => Key::KEY_ENTER,
        "tab" => Key::KEY_TAB,
        "backspace" => Key::KEY_BACKSPACE,
        "escape" | "esc" => Key::KEY_ESC,
        "f1" => Key::KEY_F1,
        "f2" => Key::KEY_F2,
        "f3" => Key::KEY_F3,
        "f4" => Key::KEY_F4,
        "f5" => Key::KEY_F5,
        "f6" => Key::KEY_F6,
        "f7" => Key::KEY_F7,
        "f8" => Key::KEY_F8,
        "f9" => Key::KEY_F9,
        "f10" => Key::KEY_F10,
        "f11" => Key::KEY_F11,
        "f12" => Key::KEY_F12,
        _ => return None,
    };
    Some(key)
}

fn key_name(key: Key) -> &'static str {
    match key {
        Key::KEY_A => "A",
        Key::KEY_B => "B",
        Key::KEY_C => "C",
        Key::KEY_D => "D",
        Key::KEY_E => "E",
        Key::KEY_F => "F",
        Key::KEY_G => "G",
        Key::KEY_H => "H",
        Key::KEY_I => "I",
        Key::KEY_J => "J",
        Key::KEY_K => "K",
        Key::KEY_L => "L",
        Key::KEY_M => "M",
        Key::KEY_N => "N",
        Key::KEY_O => "O",
        Key::KEY_P => "P",
        Key::KEY_Q => "Q",
        Key::KEY_R => "R",
        Key::KEY_S => "S",
        Key::KEY_T => "T",
        Key::KEY_U => "U",
        Key::KEY_V => "V",
        Key::KEY_W => "W",
        Key::KEY_X => "X",
        Key::KEY_Y => "Y",
        Key::KEY_Z => "Z",
        Key::KEY_0 => "0",
        Key::KEY_1 => "1",
        Key::KEY_2 => "2",
        Key::KEY_3 => "3",
        Key::KEY_4 => "4",
        Key::KEY_5 => "5",
        Key::KEY_6 => "6",
        Key::KEY_7 => "7",
        Key::KEY_8 => "8",
        Key::KEY_9 => "9",
        Key::KEY_SPACE => "Space",
        Key::KEY_ENTER => "Enter",
        Key::KEY_TAB => "Tab",
        Key::KEY_BACKSPACE => "Backspace",
        Key::KEY_ESC => "Escape",
        Key::KEY_F1 => "F1",
        Key::KEY_F2 => "F2",
        Key::KEY_F3 => "F3",
        Key::KEY_F4 => "F4",
        Key::KEY_F5 => "F5",
        Key::KEY_F6 => "F6",
        Key::KEY_F7 => "F7",
        Key::KEY_F8 => "F8",
        Key::KEY_F9 => "F9",
        Key::KEY_F10 => "F10",
        Key::KEY_F11 => "F11",
        Key::KEY_F12 => "F12",
        _ => "?",
    }
}
