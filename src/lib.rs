//! Dictus: push-to-talk and toggle dictation.
//!
//! A global shortcut starts a recording episode; releasing the hold (or
//! tapping again) hands the audio to a transcription engine, and the result
//! lands on the clipboard. Capture runs continuously so a short pre-roll
//! window is spliced onto the front of every episode.

pub mod audio;
pub mod effects;
pub mod gesture;
pub mod history;
pub mod hotkey;
pub mod paste;
pub mod permission;
pub mod session;
pub mod settings;
pub mod transcribe;

use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use audio::{run_level_publisher, CaptureEngine, LevelVector, LEVEL_BUCKETS};
use effects::{DictationEffectRunner, EffectRunner};
use gesture::{GestureStrategy, ShortcutId};
use history::HistoryStore;
use hotkey::{Chord, HotkeyManager};
use paste::ClipboardPaste;
use permission::AlwaysGranted;
use session::{reduce, Effect, Event, ReduceContext, State, StateSnapshot};
use transcribe::{EngineSlot, Transcriber};

/// Run the main session loop until a `Shutdown` event arrives.
///
/// Every event goes through the reducer; `NotifyState` effects publish a
/// snapshot on `state_tx`, all other effects go to the runner.
pub async fn run_session_loop(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    slot: Arc<RwLock<EngineSlot>>,
    state_tx: watch::Sender<StateSnapshot>,
) {
    let mut state = State::default();
    let _ = state_tx.send(StateSnapshot::from(&state));
    log::info!("Session loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        // Handle Shutdown at the edge
        if matches!(event, Event::Shutdown) {
            log::info!("Shutdown requested, stopping session loop");
            break;
        }

        let ctx = ReduceContext {
            engine_ready: slot.read().unwrap().is_ready(),
        };

        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event, ctx);
        let new_discriminant = std::mem::discriminant(&next);

        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state, next);
        }

        state = next;

        for eff in effects {
            match eff {
                Effect::NotifyState => {
                    let _ = state_tx.send(StateSnapshot::from(&state));
                }
                other => effect_runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("Session loop ended");
}

/// Derive the transcription slot from the injected engine and the settings.
/// Recording needs both an engine and a selected model; anything less stays
/// unconfigured and redirects to model settings.
fn engine_slot_for(
    transcriber: Option<Arc<dyn Transcriber>>,
    app_settings: &settings::AppSettings,
) -> EngineSlot {
    match transcriber {
        Some(engine) if app_settings.has_model() => {
            log::info!("Transcription engine ready: {}", engine.model_id());
            EngineSlot::Ready(engine)
        }
        Some(_) => {
            log::warn!("Transcription engine available but no model is selected");
            EngineSlot::Unconfigured
        }
        None => {
            log::warn!("No transcription engine configured");
            EngineSlot::Unconfigured
        }
    }
}

/// Assemble and run the application.
///
/// `transcriber` is the speech-to-text backend; with `None` the app runs in
/// the unconfigured state and recording attempts redirect to model settings.
pub async fn run(transcriber: Option<Arc<dyn Transcriber>>) -> Result<(), String> {
    let settings_path = settings::settings_path();
    let app_settings = settings::load_settings(&settings_path);
    log::info!("Settings loaded from {:?}", settings_path);

    if !settings_path.exists() {
        // First run: materialize the defaults so there is a file to edit.
        if let Err(e) = settings::save_settings(&settings_path, &app_settings) {
            log::warn!("Could not write default settings to {:?}: {}", settings_path, e);
        }
    }

    let slot = Arc::new(RwLock::new(engine_slot_for(transcriber, &app_settings)));

    let strategy = app_settings.gesture_strategy;
    let toggle_chord = Chord::parse(&app_settings.toggle_chord).unwrap_or_else(|e| {
        log::warn!("Invalid toggle chord: {}; using default", e);
        Chord::default_toggle()
    });
    let ptt_chord = Chord::parse(&app_settings.push_to_talk_chord).unwrap_or_else(|e| {
        log::warn!("Invalid push-to-talk chord: {}; using default", e);
        Chord::default_push_to_talk()
    });

    let mut bindings = vec![(ShortcutId::Toggle, toggle_chord)];
    if strategy == GestureStrategy::TwoShortcut {
        bindings.push((ShortcutId::PushToTalk, ptt_chord));
    }

    let history = Arc::new(HistoryStore::new(
        HistoryStore::default_root(),
        app_settings.history_cap,
    ));
    let preroll_secs = app_settings.preroll_secs;
    let settings = Arc::new(Mutex::new(app_settings));

    let (engine, level_rx) = CaptureEngine::new(Arc::new(AlwaysGranted), preroll_secs);
    let engine = Arc::new(engine);
    if let Err(e) = engine.start_preroll_capture() {
        // Not fatal: the engine retries when an episode begins, and the
        // failure surfaces in the error state then.
        log::warn!("Pre-roll capture unavailable at startup: {}", e);
    }

    let cancel = CancellationToken::new();
    let (level_tx, level_watch) = watch::channel::<LevelVector>([0.0; LEVEL_BUCKETS]);
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            run_level_publisher(level_rx, level_tx, cancel).await;
        });
    }

    let (state_tx, _state_watch) = watch::channel(StateSnapshot::Idle);
    let (tx, rx) = mpsc::channel::<Event>(32);

    let config_path = settings_path.clone();
    let effect_runner = DictationEffectRunner::new(
        engine.clone(),
        slot.clone(),
        settings,
        Arc::new(ClipboardPaste),
        history,
        Arc::new(move || {
            log::warn!(
                "No transcription model configured; set \"selected_model\" in {:?}",
                config_path
            );
        }),
    );

    let _hotkey_manager = match HotkeyManager::start(tx.clone(), bindings, strategy) {
        Ok(manager) => {
            log::info!("Hotkey manager started: {}", manager.status().bindings);
            Some(manager)
        }
        Err(e) => {
            // The app stays up so the user can fix permissions and restart.
            log::error!("Failed to start hotkey manager: {}", e);
            None
        }
    };

    {
        let shutdown_tx = tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received");
                let _ = shutdown_tx.send(Event::Shutdown).await;
            }
        });
    }

    run_session_loop(rx, tx, effect_runner, slot, state_tx).await;

    cancel.cancel();
    engine.shutdown();
    drop(level_watch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use transcribe::{TranscribeError, TranscriptionParameters};

    struct NullEngine;

    #[async_trait]
    impl Transcriber for NullEngine {
        async fn transcribe(
            &self,
            _samples: &[f32],
            _params: &TranscriptionParameters,
        ) -> Result<Option<String>, TranscribeError> {
            Ok(None)
        }

        fn model_id(&self) -> &str {
            "null"
        }
    }

    #[test]
    fn slot_requires_both_engine_and_selected_model() {
        let mut app_settings = settings::AppSettings::default();
        assert!(!engine_slot_for(Some(Arc::new(NullEngine)), &app_settings).is_ready());
        assert!(!engine_slot_for(None, &app_settings).is_ready());

        app_settings.selected_model = "base-en".to_string();
        assert!(engine_slot_for(Some(Arc::new(NullEngine)), &app_settings).is_ready());
        assert!(!engine_slot_for(None, &app_settings).is_ready());
    }
}
