//! Master parameter curves and lock-free parameter storage.
//!
//! Faders run from 0.0 to 1.0. The +6 dB curve reaches unity gain a little above 0.8 and
//! doubles the amplitude at full travel; the 0 dB curve tops out at unity.

use std::sync::atomic::{AtomicU32, Ordering};

const FADER_CUTOFF: f32 = 0.006;
const GAIN_6DB_SCALE: f32 = 0.002;
const GAIN_6DB_EXPONENT: f32 = 6.908;
const GAIN_0DB_SCALE: f32 = 0.0012;
const GAIN_0DB_EXPONENT: f32 = 6.726;
const UNITY_SNAP: f32 = 0.0066;

/// Fader position to linear gain, 0 to 2 (+6 dB).
pub fn fader_to_gain_6db(fader: f32) -> f32 {
    if fader < FADER_CUTOFF {
        return 0.0;
    }
    let gain = GAIN_6DB_SCALE * (GAIN_6DB_EXPONENT * fader.min(1.0).sqrt()).exp();
    if (gain - 1.0).abs() < UNITY_SNAP { 1.0 } else { gain }
}

pub fn gain_to_fader_6db(gain: f32) -> f32 {
    if gain <= 0.0 {
        return 0.0;
    }
    let fader = ((gain.min(2.0) / GAIN_6DB_SCALE).ln() / GAIN_6DB_EXPONENT)
        .max(0.0)
        .powi(2)
        .clamp(0.0, 1.0);
    if fader < FADER_CUTOFF { 0.0 } else { fader }
}

/// Fader position to linear gain, 0 to 1.
pub fn fader_to_gain_0db(fader: f32) -> f32 {
    if fader < FADER_CUTOFF {
        return 0.0;
    }
    (GAIN_0DB_SCALE * (GAIN_0DB_EXPONENT * fader.min(1.0).sqrt()).exp()).clamp(0.0, 1.0)
}

pub fn gain_to_fader_0db(gain: f32) -> f32 {
    if gain <= 0.0 {
        return 0.0;
    }
    let fader = ((gain.min(1.0) / GAIN_0DB_SCALE).ln() / GAIN_0DB_EXPONENT)
        .max(0.0)
        .powi(2)
        .clamp(0.0, 1.0);
    if fader < FADER_CUTOFF { 0.0 } else { fader }
}

/// Constant-power pan law. `position` 0.0 is hard left, 1.0 hard right.
pub fn pan_gains(position: f32) -> (f32, f32) {
    let position = position.clamp(0.0, 1.0);
    ((1.0 - position).sqrt(), position.sqrt())
}

/// Maps a 7-bit controller value onto 0.0..=1.0.
pub fn cc_to_fader(value: u8) -> f32 {
    f32::from(value.min(127)) / 127.0
}

pub fn fader_to_cc(fader: f32) -> u8 {
    (fader.clamp(0.0, 1.0) * 127.0).round() as u8
}

/// An `f32` stored as its bit pattern, readable from the audio thread without locking.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}
