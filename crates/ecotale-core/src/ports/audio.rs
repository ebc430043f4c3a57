use thiserror::Error;

/// Sounds the notification center may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Achievement,
}

#[derive(Debug, Error)]
#[error("audio playback failed: {0}")]
pub struct AudioError(pub String);

/// Best-effort sound output. Failures are logged by the caller and dropped.
pub trait AudioCue: Send + Sync {
    fn play(&self, cue: Cue) -> Result<(), AudioError>;
}

/// Plays nothing. Default for headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentAudio;

impl AudioCue for SilentAudio {
    fn play(&self, _cue: Cue) -> Result<(), AudioError> {
        Ok(())
    }
}
