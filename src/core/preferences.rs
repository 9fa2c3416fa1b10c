//! Per-user UI preferences.
//!
//! Preferences are a flat string map. [`FilePreferenceStore`] keeps one JSON
//! file per subject.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

pub const PUSH_TO_TALK_UI: &str = "pushToTalkUI";
pub const LOGS_EXPANDED: &str = "logsExpanded";
pub const AUDIO_PLAYBACK_ENABLED: &str = "audioPlaybackEnabled";

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Unknown preference: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Preference storage error: {0}")]
    Storage(String),
}

pub type PreferenceResult<T> = Result<T, PreferenceError>;

impl From<std::io::Error> for PreferenceError {
    fn from(err: std::io::Error) -> Self {
        PreferenceError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PreferenceError {
    fn from(err: serde_json::Error) -> Self {
        PreferenceError::Storage(err.to_string())
    }
}

/// Typed view over the stored string map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(rename = "pushToTalkUI")]
    pub push_to_talk_ui: bool,
    pub logs_expanded: bool,
    pub audio_playback_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            push_to_talk_ui: false,
            logs_expanded: true,
            audio_playback_enabled: true,
        }
    }
}

impl Preferences {
    /// Read known keys from `map`; missing or unparsable values keep their default.
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            map.get(key)
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(default)
        };
        Self {
            push_to_talk_ui: flag(PUSH_TO_TALK_UI, defaults.push_to_talk_ui),
            logs_expanded: flag(LOGS_EXPANDED, defaults.logs_expanded),
            audio_playback_enabled: flag(AUDIO_PLAYBACK_ENABLED, defaults.audio_playback_enabled),
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (PUSH_TO_TALK_UI.to_string(), self.push_to_talk_ui.to_string()),
            (LOGS_EXPANDED.to_string(), self.logs_expanded.to_string()),
            (
                AUDIO_PLAYBACK_ENABLED.to_string(),
                self.audio_playback_enabled.to_string(),
            ),
        ])
    }

    /// Apply one change, validating key and value.
    pub fn set(&mut self, key: &str, value: &str) -> PreferenceResult<()> {
        let parsed = value
            .trim()
            .parse::<bool>()
            .map_err(|_| PreferenceError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })?;
        match key {
            PUSH_TO_TALK_UI => self.push_to_talk_ui = parsed,
            LOGS_EXPANDED => self.logs_expanded = parsed,
            AUDIO_PLAYBACK_ENABLED => self.audio_playback_enabled = parsed,
            other => return Err(PreferenceError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load(&self, subject: &str) -> PreferenceResult<Preferences>;

    async fn save(&self, subject: &str, preferences: &Preferences) -> PreferenceResult<()>;
}

/// One JSON file per subject.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    dir: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Subjects come from tokens, so they are hashed into a safe file name.
    fn path_for(&self, subject: &str) -> PathBuf {
        let digest = Sha256::digest(subject.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn load(&self, subject: &str) -> PreferenceResult<Preferences> {
        let path = self.path_for(subject);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Preferences::default());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<BTreeMap<String, String>>(&raw) {
            Ok(map) => Ok(Preferences::from_map(&map)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt preference file, using defaults"
                );
                Ok(Preferences::default())
            }
        }
    }

    async fn save(&self, subject: &str, preferences: &Preferences) -> PreferenceResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(subject);
        let body = serde_json::to_vec_pretty(&preferences.to_map())?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Preferences saved");
        Ok(())
    }
}
