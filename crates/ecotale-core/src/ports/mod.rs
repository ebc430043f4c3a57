//! Collaborator interfaces the engine consumes.
//!
//! Adapters over the hosted backend, the monitoring SDK and the audio
//! device implement these; the core only ever sees the traits.

mod audio;
mod durable;
mod remote;
mod reporter;

pub use audio::{AudioCue, AudioError, Cue, SilentAudio};
pub use durable::{DurableStore, MemoryStore};
pub use remote::RemoteStore;
pub use reporter::{CollectingReporter, ExceptionReporter, Report, TracingReporter};
