//! Effect runner for the dictation session.
//!
//! Executes the effects produced by the reducer: capture control on the
//! audio engine, transcription, paste, history, and timers. Completion events
//! are sent back to the session loop via the provided channel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{CaptureEngine, TARGET_SAMPLE_RATE};
use crate::history::HistoryStore;
use crate::paste::PasteTarget;
use crate::session::{Effect, Event, ERROR_RESET_SECS};
use crate::settings::AppSettings;
use crate::transcribe::EngineSlot;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Production effect runner wired to the capture engine, transcription slot,
/// paste target, and history store.
pub struct DictationEffectRunner {
    engine: Arc<CaptureEngine>,
    slot: Arc<RwLock<EngineSlot>>,
    settings: Arc<Mutex<AppSettings>>,
    paste: Arc<dyn PasteTarget>,
    history: Arc<HistoryStore>,
    /// Conditioned audio per episode, kept between transcription and the
    /// history write (or discard).
    episodes: Arc<Mutex<HashMap<Uuid, Vec<f32>>>>,
    /// Cancellation handles for in-flight transcriptions.
    inflight: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    /// Invoked instead of recording when no model is configured.
    on_configuration_missing: Arc<dyn Fn() + Send + Sync>,
}

impl DictationEffectRunner {
    pub fn new(
        engine: Arc<CaptureEngine>,
        slot: Arc<RwLock<EngineSlot>>,
        settings: Arc<Mutex<AppSettings>>,
        paste: Arc<dyn PasteTarget>,
        history: Arc<HistoryStore>,
        on_configuration_missing: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            slot,
            settings,
            paste,
            history,
            episodes: Arc::new(Mutex::new(HashMap::new())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            on_configuration_missing,
        })
    }

    async fn cancel_inflight(inflight: &Mutex<HashMap<Uuid, CancellationToken>>, id: Uuid) {
        if let Some(token) = inflight.lock().await.remove(&id) {
            token.cancel();
        }
    }
}

impl EffectRunner for DictationEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::BeginCapture { id } => {
                let engine = self.engine.clone();

                tokio::spawn(async move {
                    match engine.begin_episode().await {
                        Ok(()) => {
                            let _ = tx.send(Event::CaptureStarted { id }).await;
                        }
                        Err(e) => {
                            log::error!("Failed to begin capture: {}", e);
                            let _ = tx
                                .send(Event::CaptureFailed {
                                    id,
                                    message: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::FinishCapture { id, elapsed } => {
                let engine = self.engine.clone();
                let slot = self.slot.clone();
                let settings = self.settings.clone();
                let episodes = self.episodes.clone();
                let inflight = self.inflight.clone();

                tokio::spawn(async move {
                    let samples = engine.end_episode();
                    if samples.is_empty() {
                        log::info!("Episode {} ended with no audio ({:?} held)", id, elapsed);
                        let _ = tx.send(Event::TranscriptEmpty { id }).await;
                        return;
                    }

                    let duration_secs = samples.len() as f64 / TARGET_SAMPLE_RATE as f64;

                    let Some(transcriber) = slot.read().unwrap().engine() else {
                        // The idle guard normally prevents this; the model can
                        // still be deselected mid-episode.
                        let _ = tx
                            .send(Event::TranscribeFailed {
                                id,
                                message: "transcription model is not loaded".to_string(),
                            })
                            .await;
                        return;
                    };

                    let params = {
                        let guard = settings.lock().await;
                        guard.transcription.clone()
                    };

                    episodes.lock().await.insert(id, samples.clone());

                    let token = CancellationToken::new();
                    inflight.lock().await.insert(id, token.clone());

                    let result = tokio::select! {
                        _ = token.cancelled() => {
                            log::debug!("Transcription for {} cancelled", id);
                            episodes.lock().await.remove(&id);
                            return;
                        }
                        result = transcriber.transcribe(&samples, &params) => result,
                    };

                    inflight.lock().await.remove(&id);

                    match result {
                        Ok(Some(text)) if !text.trim().is_empty() => {
                            let text = text.trim().to_string();
                            log::info!(
                                "Transcription complete: {} chars from {:.2}s of audio",
                                text.len(),
                                duration_secs
                            );
                            let _ = tx
                                .send(Event::TranscriptReady {
                                    id,
                                    text,
                                    duration_secs,
                                })
                                .await;
                        }
                        Ok(_) => {
                            let _ = tx.send(Event::TranscriptEmpty { id }).await;
                        }
                        Err(e) => {
                            log::error!("Transcription failed: {}", e);
                            let _ = tx
                                .send(Event::TranscribeFailed {
                                    id,
                                    message: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::AbortCapture { id } => {
                let engine = self.engine.clone();
                let episodes = self.episodes.clone();
                let inflight = self.inflight.clone();

                tokio::spawn(async move {
                    engine.abort_episode();
                    Self::cancel_inflight(&inflight, id).await;
                    episodes.lock().await.remove(&id);
                });
            }

            Effect::DiscardEpisode { id } => {
                let engine = self.engine.clone();
                let episodes = self.episodes.clone();
                let inflight = self.inflight.clone();

                tokio::spawn(async move {
                    // A capture start that lost the race with the stop can
                    // leave the engine mid-episode; put it back in pre-roll.
                    engine.abort_episode();
                    Self::cancel_inflight(&inflight, id).await;
                    episodes.lock().await.remove(&id);
                });
            }

            Effect::Paste { text } => {
                self.paste.paste(&text);
            }

            Effect::RecordHistory {
                id,
                text,
                duration_secs,
            } => {
                let settings = self.settings.clone();
                let episodes = self.episodes.clone();
                let history = self.history.clone();
                let slot = self.slot.clone();

                tokio::spawn(async move {
                    let samples = episodes.lock().await.remove(&id);

                    let (enabled, params) = {
                        let guard = settings.lock().await;
                        (guard.history_enabled, guard.transcription.clone())
                    };
                    if !enabled {
                        log::debug!("History disabled; dropping episode {} audio", id);
                        return;
                    }

                    let Some(samples) = samples else {
                        log::warn!("RecordHistory: no stashed audio for {}", id);
                        return;
                    };

                    let model = slot
                        .read()
                        .unwrap()
                        .engine()
                        .map(|e| e.model_id().to_string())
                        .unwrap_or_default();

                    let write = tokio::task::spawn_blocking(move || {
                        history.record(id, &samples, TARGET_SAMPLE_RATE, &text, &model, &params)
                    })
                    .await;

                    match write {
                        Ok(Ok(entry)) => {
                            debug_assert!((entry.duration_secs - duration_secs).abs() < 0.01);
                        }
                        Ok(Err(e)) => log::warn!("Failed to record history entry: {}", e),
                        Err(e) => log::warn!("History write task failed: {}", e),
                    }
                });
            }

            Effect::OpenModelSettings => {
                (self.on_configuration_missing)();
            }

            Effect::ScheduleErrorReset => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(ERROR_RESET_SECS)).await;
                    let _ = tx.send(Event::ErrorTimeout).await;
                });
            }

            Effect::NotifyState => {
                // Handled in the main loop, not here
                unreachable!("NotifyState should be handled in run_session_loop");
            }
        }
    }
}
