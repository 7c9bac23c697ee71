//! Multi-timbral sample player for SF2 soundbanks and SFZ instruments.
//!
//! A [`Synth`] plays one [`Sound`](soundbank::sound::Sound) on one MIDI channel. Synths that
//! open the same file share its decoded samples through [`SharedSamples`].

pub mod audio_engine;
pub mod messages;
pub mod soundbank;

#[cfg(test)]
mod testutil;

pub use audio_engine::audio_stream::{AudioStreamHandle, create_audio_stream, setup_logger};
pub use audio_engine::progress::CancelToken;
pub use audio_engine::synth::{
    MasterParameter, ParameterSnapshot, Synth, SynthConfig, VoiceStealing,
};
pub use audio_engine::{LoaderHandle, spawn_sample_loader};
pub use messages::{ControlMessage, LoaderEvent};
pub use soundbank::program::ProgramSelection;
pub use soundbank::shared::SharedSamples;
