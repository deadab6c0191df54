//! Transcription engine interface.
//!
//! The engine itself is an external collaborator: it consumes 16 kHz mono
//! float PCM plus decoding parameters and returns text. The session
//! controller never nil-checks an engine reference; readiness is an explicit
//! tagged state inspected before every recording attempt.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Decoding parameters read from settings each time a transcription request
/// is constructed. The core never mutates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionParameters {
    pub language: String,
    pub temperature: f32,
    pub beam_size: usize,
    pub best_of: usize,
    pub top_k: usize,
    pub enable_timestamps: bool,
    pub log_prob_threshold: f32,
    pub compression_ratio_threshold: f32,
    pub suppress_blank: bool,
}

impl Default for TranscriptionParameters {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            temperature: 0.2,
            beam_size: 1,
            best_of: 1,
            top_k: 5,
            enable_timestamps: true,
            log_prob_threshold: -1.0,
            compression_ratio_threshold: 2.4,
            suppress_blank: true,
        }
    }
}

/// Errors surfaced by a transcription engine.
#[derive(Debug, Clone)]
pub enum TranscribeError {
    ModelNotLoaded,
    Engine(String),
}

impl std::fmt::Display for TranscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscribeError::ModelNotLoaded => write!(f, "transcription model is not loaded"),
            TranscribeError::Engine(e) => write!(f, "transcription failed: {}", e),
        }
    }
}

impl std::error::Error for TranscribeError {}

/// Opaque speech-to-text engine. An empty or `None` result means "nothing to
/// paste" and is not an error.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        samples: &[f32],
        params: &TranscriptionParameters,
    ) -> Result<Option<String>, TranscribeError>;

    /// Identifier of the loaded model, recorded in history entries.
    fn model_id(&self) -> &str;
}

/// Readiness of the transcription dependency. Replaces optional wiring with
/// an explicit state the session controller can inspect.
#[derive(Clone, Default)]
pub enum EngineSlot {
    #[default]
    Unconfigured,
    Ready(Arc<dyn Transcriber>),
    Failed(String),
}

impl EngineSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineSlot::Ready(_))
    }

    pub fn engine(&self) -> Option<Arc<dyn Transcriber>> {
        match self {
            EngineSlot::Ready(engine) => Some(engine.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineSlot::Unconfigured => write!(f, "Unconfigured"),
            EngineSlot::Ready(engine) => write!(f, "Ready({})", engine.model_id()),
            EngineSlot::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}
