//! Gesture disambiguation for the dictation shortcuts.
//!
//! Converts raw key-down/key-up edges into three semantic intents without
//! conflating toggle and push-to-talk. Two strategies exist behind the same
//! type: two independently bound shortcuts, or a single shortcut where a
//! ~300ms timer separates tap (toggle) from hold (push-to-talk). The
//! disambiguator is pure: it never sleeps or spawns; in tap/hold mode it
//! hands the caller a timer request and expects the fire-back.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a key must stay down before a press counts as a hold.
pub const HOLD_THRESHOLD: Duration = Duration::from_millis(300);

/// Which of the two bindable shortcuts an edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutId {
    Toggle,
    PushToTalk,
}

/// High-level intent emitted toward the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureIntent {
    ToggleFired,
    HoldStarted,
    HoldEnded,
}

/// Strategy selector, persisted in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureStrategy {
    /// Toggle and push-to-talk are separate shortcuts.
    TwoShortcut,
    /// One shortcut; tap toggles, holding past the threshold is push-to-talk.
    TapHold,
}

/// Request for the driver to schedule a one-shot timer. The token comes back
/// via [`GestureDisambiguator::on_timer_fired`]; stale tokens are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub token: u64,
    pub after: Duration,
}

/// Result of feeding one key edge into the disambiguator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeOutcome {
    pub intent: Option<GestureIntent>,
    pub arm_timer: Option<TimerRequest>,
}

impl EdgeOutcome {
    fn none() -> Self {
        Self::default()
    }

    fn intent(intent: GestureIntent) -> Self {
        Self {
            intent: Some(intent),
            arm_timer: None,
        }
    }
}

/// State machine translating key edges into gesture intents.
#[derive(Debug)]
pub struct GestureDisambiguator {
    strategy: GestureStrategy,
    hold_active: bool,
    /// Tap/hold only: token of the armed hold timer, if the key is down and
    /// the press has not yet resolved to tap or hold.
    pending_timer: Option<u64>,
    next_token: u64,
}

impl GestureDisambiguator {
    pub fn new(strategy: GestureStrategy) -> Self {
        Self {
            strategy,
            hold_active: false,
            pending_timer: None,
            next_token: 0,
        }
    }

    /// Feed a key-down edge. In tap/hold mode the shortcut id is ignored;
    /// there is only one bound shortcut.
    pub fn on_key_down(&mut self, shortcut: ShortcutId) -> EdgeOutcome {
        match self.strategy {
            GestureStrategy::TwoShortcut => match shortcut {
                ShortcutId::Toggle => {
                    if self.hold_active {
                        // Toggle while holding would double-trigger; drop it.
                        log::debug!("toggle ignored while push-to-talk hold is active");
                        EdgeOutcome::none()
                    } else {
                        EdgeOutcome::intent(GestureIntent::ToggleFired)
                    }
                }
                ShortcutId::PushToTalk => {
                    if self.hold_active {
                        EdgeOutcome::none()
                    } else {
                        self.hold_active = true;
                        EdgeOutcome::intent(GestureIntent::HoldStarted)
                    }
                }
            },
            GestureStrategy::TapHold => {
                if self.hold_active || self.pending_timer.is_some() {
                    return EdgeOutcome::none();
                }
                self.next_token += 1;
                self.pending_timer = Some(self.next_token);
                EdgeOutcome {
                    intent: None,
                    arm_timer: Some(TimerRequest {
                        token: self.next_token,
                        after: HOLD_THRESHOLD,
                    }),
                }
            }
        }
    }

    /// Feed a key-up edge.
    pub fn on_key_up(&mut self, shortcut: ShortcutId) -> EdgeOutcome {
        match self.strategy {
            GestureStrategy::TwoShortcut => match shortcut {
                ShortcutId::Toggle => EdgeOutcome::none(),
                ShortcutId::PushToTalk => {
                    if self.hold_active {
                        self.hold_active = false;
                        EdgeOutcome::intent(GestureIntent::HoldEnded)
                    } else {
                        EdgeOutcome::none()
                    }
                }
            },
            GestureStrategy::TapHold => {
                if self.pending_timer.take().is_some() {
                    // Released before the threshold: a tap. The armed timer
                    // becomes stale and will be ignored when it fires.
                    EdgeOutcome::intent(GestureIntent::ToggleFired)
                } else if self.hold_active {
                    self.hold_active = false;
                    EdgeOutcome::intent(GestureIntent::HoldEnded)
                } else {
                    EdgeOutcome::none()
                }
            }
        }
    }

    /// Deliver a previously requested timer expiry (tap/hold mode).
    pub fn on_timer_fired(&mut self, token: u64) -> Option<GestureIntent> {
        if self.pending_timer == Some(token) {
            self.pending_timer = None;
            self.hold_active = true;
            Some(GestureIntent::HoldStarted)
        } else {
            None
        }
    }

    pub fn hold_active(&self) -> bool {
        self.hold_active
    }
}
