//! Read-aloud support: sentence-by-sentence speech on background threads.
//!
//! Components:
//! - `control`: per-session pause/stop handle, woken through a condvar
//! - `session`: the segment loop, session threads and the session registry
//! - `kokoro`: Kokoro ONNX inference + rodio playback behind [`SpeechEngine`]

pub mod control;
pub mod kokoro;
pub mod session;

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

pub use control::SpeechControl;
pub use session::{SpeechOptions, SpeechSessions};

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("failed to load speech model: {0}")]
    Load(String),

    #[error("unknown voice: {0}")]
    UnknownVoice(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("audio output failed: {0}")]
    Audio(String),

    #[error("failed to spawn speech thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// A blocking text-to-speech backend.
///
/// `say_and_wait` must not return until the utterance has finished playing;
/// the session loop relies on that to check pause and stop between segments.
pub trait SpeechEngine: Send + Sync {
    /// Voice identifiers in a stable order, addressed by index.
    fn voices(&self) -> Vec<String>;

    /// Words per minute.
    fn set_rate(&self, words_per_minute: u32) -> Result<(), SpeechError>;

    fn set_voice(&self, voice: &str) -> Result<(), SpeechError>;

    fn say_and_wait(&self, text: &str) -> Result<(), SpeechError>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
