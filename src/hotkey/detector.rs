//! Chord detection logic with modifier state tracking

use evdev::Key;

use super::Chord;
use crate::gesture::ShortcutId;

/// Tracks the current state of modifier keys
#[derive(Debug, Default)]
pub struct ModifierState {
    left_ctrl: bool,
    right_ctrl: bool,
    left_alt: bool,
    right_alt: bool,
    left_shift: bool,
    right_shift: bool,
    left_meta: bool,
    right_meta: bool,
}

impl ModifierState {
    /// Update modifier state based on key event
    pub fn update(&mut self, key: Key, pressed: bool) {
        match key {
            Key::KEY_LEFTCTRL => self.left_ctrl = pressed,
            Key::KEY_RIGHTCTRL => self.right_ctrl = pressed,
            Key::KEY_LEFTALT => self.left_alt = pressed,
            Key::KEY_RIGHTALT => self.right_alt = pressed,
            Key::KEY_LEFTSHIFT => self.left_shift = pressed,
            Key::KEY_RIGHTSHIFT => self.right_shift = pressed,
            Key::KEY_LEFTMETA => self.left_meta = pressed,
            Key::KEY_RIGHTMETA => self.right_meta = pressed,
            _ => {}
        }
    }

    /// Check if key is a modifier
    pub fn is_modifier(key: Key) -> bool {
        matches!(
            key,
            Key::KEY_LEFTCTRL
                | Key::KEY_RIGHTCTRL
                | Key::KEY_LEFTALT
                | Key::KEY_RIGHTALT
                | Key::KEY_LEFTSHIFT
                | Key::KEY_RIGHTSHIFT
                | Key::KEY_LEFTMETA
                | Key::KEY_RIGHTMETA
        )
    }

    pub fn ctrl(&self) -> bool {
        self.left_ctrl || self.right_ctrl
    }

    pub fn alt(&self) -> bool {
        self.left_alt || self.right_alt
    }

    pub fn shift(&self) -> bool {
        self.left_shift || self.right_shift
    }

    pub fn meta(&self) -> bool {
        self.left_meta || self.right_meta
    }
}

/// A shortcut edge: the chord went down, or its key came back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Down(ShortcutId),
    Up(ShortcutId),
}

/// Detects shortcut chords from raw key events and reports both edges.
///
/// The release edge matches on the non-modifier key alone: push-to-talk must
/// end when the key comes up even if the user already let go of the
/// modifiers.
pub struct ChordDetector {
    modifiers: ModifierState,
    bindings: Vec<(ShortcutId, Chord)>,
    /// Shortcut whose chord is currently pressed, with the key whose release
    /// will end it.
    active: Option<(ShortcutId, Key)>,
}

impl ChordDetector {
    pub fn new(bindings: Vec<(ShortcutId, Chord)>) -> Self {
        Self {
            modifiers: ModifierState::default(),
            bindings,
            active: None,
        }
    }

    /// Process a key event.
    ///
    /// `value` is the evdev convention: 0 = released, 1 = pressed, 2 = repeat.
    pub fn process_key(&mut self, key: Key, value: i32) -> Option<KeyEdge> {
        let pressed = value == 1;
        self.modifiers.update(key, pressed);

        if ModifierState::is_modifier(key) {
            return None;
        }

        match value {
            0 => {
                if let Some((shortcut, active_key)) = self.active {
                    if key == active_key {
                        self.active = None;
                        return Some(KeyEdge::Up(shortcut));
                    }
                }
                None
            }
            1 => {
                // One chord press at a time; a second chord while the first
                // is still down would confuse release matching.
                if self.active.is_some() {
                    return None;
                }

                let current = Chord {
                    ctrl: self.modifiers.ctrl(),
                    alt: self.modifiers.alt(),
                    shift: self.modifiers.shift(),
                    meta: self.modifiers.meta(),
                    key,
                };

                for (shortcut, chord) in &self.bindings {
                    if *chord == current {
                        self.active = Some((*shortcut, key));
                        return Some(KeyEdge::Down(*shortcut));
                    }
                }
                None
            }
            // Key repeat while the chord is held is not a new press.
            _ => None,
        }
    }
}
