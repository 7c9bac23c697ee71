//! Instrument definitions: SF2 soundbanks, SFZ text files, and the sample cache they share.
//!
//! - [`sound`]: A loaded definition and its programs
//! - [`sf2_reader`] / [`sfz_reader`]: Format readers producing [`zone::Zone`]s
//! - [`shared`]: Reference-counted registry of decoded samples
//! - [`riff`], [`hydra`], [`generator`]: SF2 container and table layouts

pub mod diagnostics;
pub mod generator;
pub mod hydra;
pub mod program;
pub mod riff;
pub mod sample;
pub mod sf2_reader;
pub mod sfz_reader;
pub mod shared;
pub mod sound;
pub mod zone;
