//! Dictation history: WAV audio plus a JSON index of structured records.
//!
//! Invoked only after a successful, non-empty transcription and only when
//! history is enabled in settings. Layout under the platform data dir:
//!
//!   dictus/history/history.json
//!   dictus/history/audio/<timestamp>_<uuid>.wav

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hound::{WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transcribe::TranscriptionParameters;

const HISTORY_FILE_NAME: &str = "history.json";
const AUDIO_DIR_NAME: &str = "audio";

/// Decoding parameters frozen into a history record at transcription time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub temperature: f32,
    pub beam_size: usize,
    pub best_of: usize,
    pub top_k: usize,
    pub enable_timestamps: bool,
}

impl From<&TranscriptionParameters> for QualitySnapshot {
    fn from(params: &TranscriptionParameters) -> Self {
        Self {
            temperature: params.temperature,
            beam_size: params.beam_size,
            best_of: params.best_of,
            top_k: params.top_k,
            enable_timestamps: params.enable_timestamps,
        }
    }
}

/// One completed dictation episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub audio_path: PathBuf,
    pub transcript: String,
    pub duration_secs: f64,
    pub model: String,
    pub language: String,
    pub quality: QualitySnapshot,
}

/// Filesystem-backed history store.
pub struct HistoryStore {
    root: PathBuf,
    /// Oldest entries past this count are pruned, audio files included.
    cap: usize,
}

impl HistoryStore {
    pub fn new(root: PathBuf, cap: usize) -> Self {
        Self {
            root,
            cap: cap.max(1),
        }
    }

    /// Default location: `<data dir>/dictus/history`.
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dictus")
            .join("history")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE_NAME)
    }

    fn audio_dir(&self) -> PathBuf {
        self.root.join(AUDIO_DIR_NAME)
    }

    /// Persist a completed episode: write the WAV, prepend the record to the
    /// index, prune past the cap.
    pub fn record(
        &self,
        episode_id: Uuid,
        samples: &[f32],
        sample_rate: u32,
        transcript: &str,
        model: &str,
        params: &TranscriptionParameters,
    ) -> io::Result<HistoryEntry> {
        fs::create_dir_all(self.audio_dir())?;

        let timestamp = Utc::now();
        let audio_path = self.audio_dir().join(format!(
            "{}_{}.wav",
            timestamp.format("%Y%m%d_%H%M%S"),
            episode_id
        ));
        write_wav(&audio_path, samples, sample_rate)?;

        let entry = HistoryEntry {
            id: episode_id,
            timestamp,
            audio_path,
            transcript: transcript.to_string(),
            duration_secs: samples.len() as f64 / sample_rate as f64,
            model: model.to_string(),
            language: params.language.clone(),
            quality: QualitySnapshot::from(params),
        };

        let mut entries = self.entries()?;
        entries.insert(0, entry.clone());
        self.prune(&mut entries);
        self.save(&entries)?;

        log::info!(
            "History: recorded {:.1}s episode ({} chars) as {:?}",
            entry.duration_secs,
            transcript.len(),
            entry.audio_path
        );
        Ok(entry)
    }

    /// Load all records, newest first. A missing index reads as empty.
    pub fn entries(&self) -> io::Result<Vec<HistoryEntry>> {
        match fs::read_to_string(self.index_path()) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt history index: {}", e),
                )
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Delete one record and its audio file.
    pub fn remove(&self, id: Uuid) -> io::Result<()> {
        let mut entries = self.entries()?;
        if let Some(pos) = entries.iter().position(|e| e.id == id) {
            let entry = entries.remove(pos);
            if let Err(e) = fs::remove_file(&entry.audio_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("History: failed to delete {:?}: {}", entry.audio_path, e);
                }
            }
            self.save(&entries)?;
        }
        Ok(())
    }

    fn prune(&self, entries: &mut Vec<HistoryEntry>) {
        while entries.len() > self.cap {
            let entry = entries.pop().expect("len > cap >= 1");
            log::debug!("History: pruning old entry {:?}", entry.audio_path);
            if let Err(e) = fs::remove_file(&entry.audio_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("History: failed to prune {:?}: {}", entry.audio_path, e);
                }
            }
        }
    }

    fn save(&self, entries: &[HistoryEntry]) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        // Temp file + rename so a crash mid-write never corrupts the index.
        let tmp_path = self.index_path().with_extension("json.tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, self.index_path())?;
        Ok(())
    }
}

/// 16-bit PCM mono WAV, the interchange format for episode audio.
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> io::Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer
            .write_sample((clamped * i16::MAX as f32) as i16)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(())
}
