//! Recording session state machine.
//!
//! Single-writer pattern: all transitions go through `reduce()`, which
//! returns the next state and a list of effects to execute. The reducer never
//! performs I/O itself, and it drops events that carry a stale episode id.

use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

/// How long the error state shows before resetting to idle.
pub const ERROR_RESET_SECS: u64 = 3;

/// Authoritative state of the dictation workflow.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Recording {
        episode_id: Uuid,
        started_at: Instant,
    },
    Processing {
        episode_id: Uuid,
    },
    Error {
        message: String,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

/// Presentation-safe view of the state, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum StateSnapshot {
    Idle,
    Recording,
    Processing,
    Error { message: String },
}

impl From<&State> for StateSnapshot {
    fn from(state: &State) -> Self {
        match state {
            State::Idle => StateSnapshot::Idle,
            State::Recording { .. } => StateSnapshot::Recording,
            State::Processing { .. } => StateSnapshot::Processing,
            State::Error { message } => StateSnapshot::Error {
                message: message.clone(),
            },
        }
    }
}

/// Events feeding the reducer: gesture intents, capture/transcription
/// results, and timers.
#[derive(Debug, Clone)]
pub enum Event {
    /// A tap of the toggle shortcut (start or stop, depending on state)
    ToggleFired,
    /// Push-to-talk hold began
    HoldStarted,
    /// Push-to-talk hold ended
    HoldEnded,
    /// User requested cancel
    Cancel,
    /// Application exit requested; handled by the session loop, not the reducer
    Shutdown,

    // Capture events
    CaptureStarted {
        id: Uuid,
    },
    CaptureFailed {
        id: Uuid,
        message: String,
    },

    // Transcription events
    TranscriptReady {
        id: Uuid,
        text: String,
        duration_secs: f64,
    },
    TranscriptEmpty {
        id: Uuid,
    },
    TranscribeFailed {
        id: Uuid,
        message: String,
    },

    /// Error state auto-reset fired
    ErrorTimeout,
}

/// Effects to be executed after a transition. The effect runner handles
/// these asynchronously.
#[derive(Debug, Clone)]
pub enum Effect {
    BeginCapture {
        id: Uuid,
    },
    FinishCapture {
        id: Uuid,
        elapsed: Duration,
    },
    AbortCapture {
        id: Uuid,
    },
    /// Drop stashed episode audio that will not be recorded to history
    DiscardEpisode {
        id: Uuid,
    },
    Paste {
        text: String,
    },
    RecordHistory {
        id: Uuid,
        text: String,
        duration_secs: f64,
    },
    /// No model is configured; send the user to model settings instead of
    /// recording
    OpenModelSettings,
    ScheduleErrorReset,
    /// Publish the new state snapshot
    NotifyState,
}

/// Facts the reducer needs that live outside the state itself.
#[derive(Debug, Clone, Copy)]
pub struct ReduceContext {
    /// A transcription engine is loaded and ready.
    pub engine_ready: bool,
}

/// Reducer function: (state, event, context) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale episode ids
/// - Emit NotifyState after every state change
pub fn reduce(state: &State, event: Event, ctx: ReduceContext) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id: Option<Uuid> = match state {
        Idle => None,
        Recording { episode_id, .. } => Some(*episode_id),
        Processing { episode_id } => Some(*episode_id),
        Error { .. } => None,
    };

    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, ToggleFired) | (Idle, HoldStarted) => {
            if !ctx.engine_ready {
                log::info!("Recording requested with no model configured");
                return (Idle, vec![OpenModelSettings]);
            }
            let id = Uuid::new_v4();
            (
                Recording {
                    episode_id: id,
                    started_at: Instant::now(),
                },
                vec![BeginCapture { id }, NotifyState],
            )
        }
        // A hold release with no matching start can happen after an error
        // consumed the hold; nothing to do.
        (Idle, HoldEnded) => (Idle, vec![]),
        (Idle, Cancel) => (Idle, vec![]),

        // -----------------
        // Recording
        // -----------------
        (
            Recording {
                episode_id,
                started_at,
            },
            ToggleFired,
        )
        | (
            Recording {
                episode_id,
                started_at,
            },
            HoldEnded,
        ) => {
            let elapsed = started_at.elapsed();
            log::info!("Recording {} stopped after {:?}", episode_id, elapsed);
            (
                Processing {
                    episode_id: *episode_id,
                },
                vec![
                    FinishCapture {
                        id: *episode_id,
                        elapsed,
                    },
                    NotifyState,
                ],
            )
        }
        // Acknowledgement from the capture engine; the state already reflects it.
        (Recording { episode_id, .. }, CaptureStarted { id }) if *episode_id == id => {
            log::debug!("Capture confirmed for {}", id);
            (state.clone(), vec![])
        }
        // A late start from a previous episode while a new one records: the
        // engine begin is idempotent, so that audio merged into the live
        // episode and there is nothing to clean up.
        (Recording { .. }, CaptureStarted { .. }) => (state.clone(), vec![]),
        (Recording { episode_id, .. }, CaptureFailed { id, message }) if *episode_id == id => (
            Error { message },
            vec![
                AbortCapture { id: *episode_id },
                ScheduleErrorReset,
                NotifyState,
            ],
        ),
        (Recording { episode_id, .. }, Cancel) => (
            Idle,
            vec![AbortCapture { id: *episode_id }, NotifyState],
        ),

        // -----------------
        // Processing
        // -----------------
        (
            Processing { episode_id },
            TranscriptReady {
                id,
                text,
                duration_secs,
            },
        ) if *episode_id == id => (
            Idle,
            vec![
                Paste { text: text.clone() },
                RecordHistory {
                    id: *episode_id,
                    text,
                    duration_secs,
                },
                NotifyState,
            ],
        ),
        // Ack arrived after the stop was requested; FinishCapture owns the
        // episode audio from here.
        (Processing { episode_id }, CaptureStarted { id }) if *episode_id == id => {
            (state.clone(), vec![])
        }
        (Processing { episode_id }, TranscriptEmpty { id }) if *episode_id == id => {
            log::info!("Episode {} produced no speech", episode_id);
            (Idle, vec![DiscardEpisode { id: *episode_id }, NotifyState])
        }
        (Processing { episode_id }, TranscribeFailed { id, message }) if *episode_id == id => (
            Error { message },
            vec![
                DiscardEpisode { id: *episode_id },
                ScheduleErrorReset,
                NotifyState,
            ],
        ),
        (Processing { episode_id }, Cancel) => (
            Idle,
            vec![DiscardEpisode { id: *episode_id }, NotifyState],
        ),

        // -----------------
        // Error
        // -----------------
        // Gestures are swallowed until the error resets; this keeps a stuck
        // hold from re-triggering against a broken capture path.
        (Error { .. }, ToggleFired) => (state.clone(), vec![]),
        (Error { .. }, HoldStarted) => (state.clone(), vec![]),
        (Error { .. }, HoldEnded) => (state.clone(), vec![]),
        (Error { .. }, ErrorTimeout) => (Idle, vec![NotifyState]),
        (Error { .. }, Cancel) => (Idle, vec![NotifyState]),

        // A reset timer that outlived its error state
        (_, ErrorTimeout) => (state.clone(), vec![]),

        // The capture start lost the race with the stop (e.g. a permission
        // prompt held it up past the key release). The engine is now
        // mid-episode with no session to consume it; discard that audio.
        (_, CaptureStarted { id }) => {
            log::info!("Capture for {} started after the session moved on", id);
            (state.clone(), vec![AbortCapture { id }])
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, CaptureFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscriptReady { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscriptEmpty { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscribeFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> ReduceContext {
        ReduceContext { engine_ready: true }
    }

    fn unconfigured() -> ReduceContext {
        ReduceContext {
            engine_ready: false,
        }
    }

    fn recording(id: Uuid) -> State {
        State::Recording {
            episode_id: id,
            started_at: Instant::now(),
        }
    }

    #[test]
    fn idle_toggle_begins_capture() {
        let (next, effects) = reduce(&State::Idle, Event::ToggleFired, ready());
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::BeginCapture { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::NotifyState)));
    }

    #[test]
    fn idle_hold_begins_capture() {
        let (next, effects) = reduce(&State::Idle, Event::HoldStarted, ready());
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::BeginCapture { .. })));
    }

    #[test]
    fn unconfigured_engine_redirects_instead_of_recording() {
        for event in [Event::ToggleFired, Event::HoldStarted] {
            let (next, effects) = reduce(&State::Idle, event, unconfigured());
            assert!(matches!(next, State::Idle));
            assert!(effects
                .iter()
                .any(|e| matches!(e, Effect::OpenModelSettings)));
            assert!(!effects
                .iter()
                .any(|e| matches!(e, Effect::BeginCapture { .. })));
        }
    }

    #[test]
    fn toggle_during_recording_moves_to_processing() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&recording(id), Event::ToggleFired, ready());
        assert!(matches!(next, State::Processing { episode_id } if episode_id == id));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::FinishCapture { id: eid, .. } if *eid == id)));
    }

    #[test]
    fn hold_release_during_recording_moves_to_processing() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&recording(id), Event::HoldEnded, ready());
        assert!(matches!(next, State::Processing { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::FinishCapture { .. })));
    }

    #[test]
    fn capture_started_acknowledgement_keeps_recording() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&recording(id), Event::CaptureStarted { id }, ready());
        assert!(matches!(next, State::Recording { episode_id, .. } if episode_id == id));
        assert!(effects.is_empty());

        // Late acknowledgement from a previous episode is dropped.
        let stale = Uuid::new_v4();
        let (next, effects) = reduce(&recording(id), Event::CaptureStarted { id: stale }, ready());
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn capture_start_losing_the_race_with_release_is_aborted() {
        // The hold is released while the capture start is still pending (a
        // permission prompt can suspend it for seconds). By the time the
        // acknowledgement arrives the session is back in idle and the engine
        // holds an episode nobody will consume.
        let (state, _) = reduce(&State::Idle, Event::HoldStarted, ready());
        let id = match &state {
            State::Recording { episode_id, .. } => *episode_id,
            other => panic!("expected Recording, got {:?}", other),
        };
        let (state, _) = reduce(&state, Event::HoldEnded, ready());
        let (state, _) = reduce(&state, Event::TranscriptEmpty { id }, ready());
        assert!(matches!(state, State::Idle));

        let (next, effects) = reduce(&state, Event::CaptureStarted { id }, ready());
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AbortCapture { id: eid } if *eid == id)));
    }

    #[test]
    fn capture_start_arriving_in_error_state_is_aborted() {
        let id = Uuid::new_v4();
        let state = State::Error {
            message: "boom".to_string(),
        };
        let (next, effects) = reduce(&state, Event::CaptureStarted { id }, ready());
        assert!(matches!(next, State::Error { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AbortCapture { id: eid } if *eid == id)));
    }

    #[test]
    fn capture_start_during_processing_of_same_episode_is_dropped() {
        let id = Uuid::new_v4();
        let state = State::Processing { episode_id: id };
        let (next, effects) = reduce(&state, Event::CaptureStarted { id }, ready());
        assert!(matches!(next, State::Processing { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn capture_failure_enters_error_with_reset_timer() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &recording(id),
            Event::CaptureFailed {
                id,
                message: "microphone access denied".to_string(),
            },
            ready(),
        );
        assert!(matches!(next, State::Error { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AbortCapture { .. })));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleErrorReset)));
    }

    #[test]
    fn transcript_ready_pastes_and_records_history() {
        let id = Uuid::new_v4();
        let state = State::Processing { episode_id: id };
        let (next, effects) = reduce(
            &state,
            Event::TranscriptReady {
                id,
                text: "hello world".to_string(),
                duration_secs: 1.5,
            },
            ready(),
        );
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Paste { text } if text == "hello world")));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::RecordHistory { .. })));
    }

    #[test]
    fn empty_transcript_returns_to_idle_without_paste() {
        let id = Uuid::new_v4();
        let state = State::Processing { episode_id: id };
        let (next, effects) = reduce(&state, Event::TranscriptEmpty { id }, ready());
        assert!(matches!(next, State::Idle));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Paste { .. })));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::RecordHistory { .. })));
    }

    #[test]
    fn transcribe_failure_enters_error() {
        let id = Uuid::new_v4();
        let state = State::Processing { episode_id: id };
        let (next, effects) = reduce(
            &state,
            Event::TranscribeFailed {
                id,
                message: "engine crashed".to_string(),
            },
            ready(),
        );
        assert!(matches!(next, State::Error { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleErrorReset)));
    }

    #[test]
    fn stale_events_are_dropped() {
        let id = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let state = State::Processing { episode_id: id };

        let (next, effects) = reduce(
            &state,
            Event::TranscriptReady {
                id: stale,
                text: "late".to_string(),
                duration_secs: 0.5,
            },
            ready(),
        );
        assert!(matches!(next, State::Processing { .. }));
        assert!(effects.is_empty());

        let (next, effects) = reduce(&state, Event::TranscriptEmpty { id: stale }, ready());
        assert!(matches!(next, State::Processing { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn error_swallows_gestures_until_timeout() {
        let state = State::Error {
            message: "boom".to_string(),
        };

        for event in [Event::ToggleFired, Event::HoldStarted, Event::HoldEnded] {
            let (next, effects) = reduce(&state, event, ready());
            assert!(matches!(next, State::Error { .. }));
            assert!(effects.is_empty());
        }

        let (next, effects) = reduce(&state, Event::ErrorTimeout, ready());
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::NotifyState)));
    }

    #[test]
    fn error_timeout_in_idle_is_a_no_op() {
        let (next, effects) = reduce(&State::Idle, Event::ErrorTimeout, ready());
        assert!(matches!(next, State::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn cancel_during_recording_aborts_without_transcription() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&recording(id), Event::Cancel, ready());
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AbortCapture { .. })));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::FinishCapture { .. })));
    }

    #[test]
    fn cancel_during_processing_discards_episode() {
        let id = Uuid::new_v4();
        let state = State::Processing { episode_id: id };
        let (next, effects) = reduce(&state, Event::Cancel, ready());
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::DiscardEpisode { .. })));
    }

    #[test]
    fn gestures_during_processing_are_ignored() {
        let state = State::Processing {
            episode_id: Uuid::new_v4(),
        };
        for event in [Event::ToggleFired, Event::HoldStarted] {
            let (next, effects) = reduce(&state, event, ready());
            assert!(matches!(next, State::Processing { .. }));
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn snapshot_hides_episode_details() {
        let state = State::Recording {
            episode_id: Uuid::new_v4(),
            started_at: Instant::now(),
        };
        assert_eq!(StateSnapshot::from(&state), StateSnapshot::Recording);

        let error = State::Error {
            message: "boom".to_string(),
        };
        assert_eq!(
            StateSnapshot::from(&error),
            StateSnapshot::Error {
                message: "boom".to_string()
            }
        );
    }
}
