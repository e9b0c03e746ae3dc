use log::{debug, warn};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

use crate::prefs::{keys, PreferenceStore};
use crate::services::AudioService;

pub const DEFAULT_ADZAN_ASSET: &str = "audios/adzan.opus";
pub const ADZAN_RESOURCE: &str = "adzan";
pub const ADZAN_SUBUH_RESOURCE: &str = "adzan_subuh";
pub const TICK_RESOURCE: &str = "tick";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Unable to open {source_name}: {reason}")]
    Open { source_name: String, reason: String },
}

/// Either a bundled raw resource (by name, no extension) or an asset path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    Raw(String),
    Asset(String),
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Raw(name) => write!(f, "raw:{}", name),
            AudioSource::Asset(path) => write!(f, "asset:{}", path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Tracked as the current ringtone; replaced by the next one.
    Ringtone { looping: bool },
    /// Fire-and-forget, released by the platform on completion.
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerHandle(pub u64);

/// Adzan resource for a prayer name; subuh has its own recording.
pub fn adzan_resource(prayer: &str) -> &'static str {
    if prayer.eq_ignore_ascii_case("subuh") {
        ADZAN_SUBUH_RESOURCE
    } else {
        ADZAN_RESOURCE
    }
}

/// The application stores this as a string; only the exact text "true" loops.
pub fn loop_enabled(app_prefs: &dyn PreferenceStore) -> bool {
    app_prefs.get_string(keys::LOOP_ADHAN_AUDIO).as_deref() == Some("true")
}

/// The single current ringtone player. Starting a new ringtone always stops
/// the previous one first.
#[derive(Debug, Default)]
pub struct Ringtone {
    current: Mutex<Option<PlayerHandle>>,
}

impl Ringtone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play<A: AudioService + ?Sized>(
        &self,
        audio: &A,
        app_prefs: &dyn PreferenceStore,
        source: &AudioSource,
    ) -> Result<PlayerHandle, AudioError> {
        // Held across stop, start and store so concurrent plays cannot
        // orphan a player.
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = current.take() {
            audio.stop(previous);
            debug!("Stopped ringtone {:?}", previous);
        }

        let looping = loop_enabled(app_prefs);
        let handle = audio.play(source, PlaybackMode::Ringtone { looping })?;
        debug!("Playing {} as ringtone (looping={})", source, looping);
        *current = Some(handle);
        Ok(handle)
    }

    /// Short sound next to whatever ringtone is playing.
    pub fn play_once<A: AudioService + ?Sized>(&self, audio: &A, resource: &str) -> Result<(), AudioError> {
        audio.play(&AudioSource::Raw(resource.to_string()), PlaybackMode::Once)?;
        debug!("Played {} once", resource);
        Ok(())
    }

    pub fn stop<A: AudioService + ?Sized>(&self, audio: &A) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = previous {
            audio.stop(handle);
            debug!("Stopped ringtone {:?}", handle);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current
            .lock()
            .map(|current| current.is_some())
            .unwrap_or_else(|poisoned| poisoned.into_inner().is_some())
    }
}

/// Logs instead of failing; used by handlers where audio is a side effect.
pub(crate) fn log_audio_failure(what: &str, result: Result<(), AudioError>) {
    if let Err(e) = result {
        warn!("Failed to {}: {}", what, e);
    }
}
