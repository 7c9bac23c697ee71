//! Amplitude envelope state machine.
//!
//! The generator only computes segment boundaries. The owning voice applies `slope` per frame
//! (added, or multiplied for exponential segments), counts `frames_left` down, writes the
//! level back and calls [`EnvelopeGenerator::next_segment`] when a segment runs out.

use crate::audio_engine::constants::{
    EG_EXPONENTIAL_FLOOR, EG_MIN_SEGMENT_SECONDS, FAST_RELEASE_SECONDS,
};
use crate::soundbank::zone::EgParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeSegment {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Done,
}

impl EnvelopeSegment {
    pub fn name(self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::Attack => "attack",
            Self::Hold => "hold",
            Self::Decay => "decay",
            Self::Sustain => "sustain",
            Self::Release => "release",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    parameters: EgParameters,
    sample_rate: f64,
    segment: EnvelopeSegment,
    level: f32,
    slope: f32,
    frames_left: i32,
    exponential: bool,
}

impl Default for EnvelopeGenerator {
    fn default() -> Self {
        Self {
            parameters: EgParameters::default(),
            sample_rate: 44_100.0,
            segment: EnvelopeSegment::Done,
            level: 0.0,
            slope: 0.0,
            frames_left: 0,
            exponential: false,
        }
    }
}

impl EnvelopeGenerator {
    /// Starts a note. `velocity` is the MIDI velocity; tracking adds `velocity / 127 * vel2x`.
    pub fn start(
        &mut self,
        parameters: &EgParameters,
        velocity: i32,
        tracking: &EgParameters,
        sample_rate: f64,
    ) {
        self.parameters = parameters.with_velocity(velocity as f32 / 127.0, tracking);
        self.sample_rate = sample_rate;
        self.start_delay();
    }

    fn frames_for(&self, seconds: f32) -> i32 {
        ((f64::from(seconds) * self.sample_rate).round() as i32).max(1)
    }

    fn start_delay(&mut self) {
        if self.parameters.delay <= 0.0 {
            self.start_attack();
            return;
        }
        self.segment = EnvelopeSegment::Delay;
        self.level = 0.0;
        self.slope = 0.0;
        self.frames_left = self.frames_for(self.parameters.delay);
        self.exponential = false;
    }

    fn start_attack(&mut self) {
        if self.parameters.attack <= 0.0 {
            self.start_hold();
            return;
        }
        self.segment = EnvelopeSegment::Attack;
        self.level = (self.parameters.start / 100.0).clamp(0.0, 1.0);
        self.frames_left = self.frames_for(self.parameters.attack);
        self.slope = (1.0 - self.level) / self.frames_left as f32;
        self.exponential = false;
    }

    fn start_hold(&mut self) {
        if self.parameters.hold <= 0.0 {
            self.level = 1.0;
            self.start_decay();
            return;
        }
        self.segment = EnvelopeSegment::Hold;
        self.level = 1.0;
        self.slope = 0.0;
        self.frames_left = self.frames_for(self.parameters.hold);
        self.exponential = false;
    }

    fn start_decay(&mut self) {
        if self.parameters.decay <= 0.0 {
            self.start_sustain();
            return;
        }
        self.segment = EnvelopeSegment::Decay;
        self.level = 1.0;
        self.exponential = true;

        let frames = self.frames_for(self.parameters.decay);
        let log_slope = EG_EXPONENTIAL_FLOOR / f64::from(frames);
        self.slope = log_slope.exp() as f32;
        self.frames_left = frames;

        // Stop where the curve meets the sustain level.
        if self.parameters.sustain > 0.0 {
            let sustain = f64::from(self.parameters.sustain / 100.0);
            self.frames_left = ((sustain.ln() / log_slope) as i32).max(1);
        }
    }

    fn start_sustain(&mut self) {
        if self.parameters.sustain <= 0.0 {
            self.start_release();
            return;
        }
        self.segment = EnvelopeSegment::Sustain;
        self.level = self.parameters.sustain / 100.0;
        self.slope = 0.0;
        self.frames_left = i32::MAX;
        self.exponential = false;
    }

    /// Enters release from the current level.
    pub fn start_release(&mut self) {
        let release = if self.parameters.release <= 0.0 {
            EG_MIN_SEGMENT_SECONDS
        } else {
            self.parameters.release
        };
        self.exponential_release(release);
    }

    fn exponential_release(&mut self, seconds: f32) {
        self.segment = EnvelopeSegment::Release;
        self.frames_left = self.frames_for(seconds);
        self.slope = (EG_EXPONENTIAL_FLOOR / f64::from(self.frames_left)).exp() as f32;
        self.exponential = true;
    }

    /// Advances to the following segment. Called when `frames_left` runs out.
    pub fn next_segment(&mut self) {
        match self.segment {
            EnvelopeSegment::Delay => self.start_attack(),
            EnvelopeSegment::Attack => self.start_hold(),
            EnvelopeSegment::Hold => self.start_decay(),
            EnvelopeSegment::Decay => self.start_sustain(),
            EnvelopeSegment::Sustain => {}
            EnvelopeSegment::Release | EnvelopeSegment::Done => self.finish(),
        }
    }

    /// Releases the note; an envelope already in release finishes immediately.
    pub fn note_off(&mut self) {
        match self.segment {
            EnvelopeSegment::Release | EnvelopeSegment::Done => self.finish(),
            _ => self.start_release(),
        }
    }

    /// Short exponential release, used when a voice is cut by its group or a retrigger.
    pub fn fast_release(&mut self) {
        self.exponential_release(FAST_RELEASE_SECONDS);
    }

    fn finish(&mut self) {
        self.segment = EnvelopeSegment::Done;
        self.level = 0.0;
        self.slope = 0.0;
        self.frames_left = i32::MAX;
        self.exponential = false;
    }

    pub fn is_done(&self) -> bool {
        self.segment == EnvelopeSegment::Done
    }

    pub fn segment(&self) -> EnvelopeSegment {
        self.segment
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn set_level(&mut self, level: f32) {
        self.level = level;
    }

    pub fn slope(&self) -> f32 {
        self.slope
    }

    pub fn frames_left(&self) -> i32 {
        self.frames_left
    }

    pub fn set_frames_left(&mut self, frames: i32) {
        self.frames_left = frames;
    }

    pub fn is_exponential(&self) -> bool {
        self.exponential
    }
}
