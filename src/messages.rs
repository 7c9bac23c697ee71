//! Message definitions for communication between control threads and the real-time audio thread.
//!
//! [`ControlMessage`] is the wire format pushed through the ring buffer into the audio callback,
//! [`LoaderEvent`] reports background sample loading back to the caller.

use std::sync::Arc;

/// Decoded PCM data, interleaved, shared read-only between every sample that views it.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub channels: usize,
    pub samples: Arc<[f32]>,
}

impl SampleBuffer {
    pub fn new(channels: usize, samples: Vec<f32>) -> Self {
        Self {
            channels,
            samples: Arc::from(samples.into_boxed_slice()),
        }
    }

    /// Number of frames stored, guard frames included.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }

    /// Reads one sample, returning silence outside the buffer.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples
            .get(frame * self.channels + channel)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Message that is emitted from the control side and consumed by the audio callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    /// Start a note.
    ///
    /// # Parameters
    /// * `note` - MIDI note number (0 to 127)
    /// * `velocity` - MIDI velocity (1 to 127)
    NoteOn { note: u8, velocity: u8 },

    /// Release a note.
    NoteOff { note: u8 },

    /// Controller change (bank select, volume, pan, sustain, send, resets).
    Controller { controller: u8, value: u8 },

    /// Select a program within the current bank.
    ProgramChange { program: u8 },

    /// Pitch wheel position (0 to 16383, center 8192).
    PitchWheel(u16),

    /// Stop every sounding voice.
    AllNotesOff { tail_off: bool },
}

/// Events emitted from background sample loading.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    /// Loading started for the given definition file.
    Started { path: String },

    /// A progress update.
    ///
    /// - `percent` is the total progress of the load (0.0..=1.0).
    /// - `stage` is a human-readable stage string (e.g. "Loading (decoding)").
    Progress { percent: f32, stage: String },

    /// Loading completed successfully.
    Success { path: String, errors: usize },

    /// Loading was canceled by the caller; the samples stay unloaded.
    Canceled { path: String },

    /// Loading failed.
    Error { path: String, error: String },
}
