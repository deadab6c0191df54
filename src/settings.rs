use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::DEFAULT_PREROLL_SECS;
use crate::gesture::GestureStrategy;
use crate::transcribe::TranscriptionParameters;

const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Identifier of the selected transcription model. Empty means no model
    /// has been chosen yet; recording attempts redirect to model settings.
    pub selected_model: String,

    /// How the dictation shortcuts are interpreted.
    pub gesture_strategy: GestureStrategy,

    /// Shortcut starting/stopping a toggle recording, e.g. "ctrl+alt+space".
    pub toggle_chord: String,

    /// Shortcut for push-to-talk. Unused in tap/hold mode.
    pub push_to_talk_chord: String,

    /// Seconds of pre-roll audio spliced onto the front of each episode.
    pub preroll_secs: f32,

    /// Keep a local record (audio + transcript) of completed dictations.
    pub history_enabled: bool,

    /// Maximum number of retained history entries.
    pub history_cap: usize,

    /// Decoding parameters passed to the transcription engine.
    pub transcription: TranscriptionParameters,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            selected_model: String::new(),
            gesture_strategy: GestureStrategy::TapHold,
            toggle_chord: "ctrl+alt+space".to_string(),
            push_to_talk_chord: "ctrl+alt+v".to_string(),
            preroll_secs: DEFAULT_PREROLL_SECS,
            history_enabled: true,
            history_cap: 200,
            transcription: TranscriptionParameters::default(),
        }
    }
}

impl AppSettings {
    /// True once the user has picked a transcription model.
    pub fn has_model(&self) -> bool {
        !self.selected_model.is_empty()
    }
}

pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dictus")
        .join(SETTINGS_FILE_NAME)
}

pub fn load_settings(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents partial/corrupt settings.json if the app crashes mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Remove existing settings file {:?}: {}", path, e));
                }
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unconfigured() {
        let settings = AppSettings::default();
        assert!(!settings.has_model());
        assert_eq!(settings.gesture_strategy, GestureStrategy::TapHold);
        assert!((settings.preroll_secs - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = AppSettings::default();
        settings.selected_model = "base-en".to_string();
        settings.history_cap = 50;
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.selected_model, "base-en");
        assert_eq!(loaded.history_cap, 50);
        assert!(loaded.has_model());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let loaded = load_settings(&path);
        assert!(!loaded.has_model());
    }

    #[test]
    fn unknown_and_missing_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"selected_model": "tiny", "future_field": 1}"#).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.selected_model, "tiny");
        assert_eq!(loaded.toggle_chord, "ctrl+alt+space");
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let loaded = load_settings(&path);
        assert!(!loaded.has_model());
    }
}
