//! A single sounding note.
//!
//! A [`Voice`] plays one [`Zone`] at a time: it resamples the zone's sample by linear
//! interpolation at the pitch ratio, applies gain, pan and the amplitude envelope, and adds
//! the result into the caller's planar output buffers.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::audio_engine::constants::{PITCH_WHEEL_CENTER, PITCH_WHEEL_MAX};
use crate::audio_engine::envelope::EnvelopeGenerator;
use crate::soundbank::sample::SampleData;
use crate::soundbank::zone::{LoopMode, OffMode, Trigger, Zone};

/// What the engine needs from a voice.
pub trait SynthVoice {
    /// Whether the zone can sound at all (sample loaded, usable end point).
    fn can_play(&self, zone: &Zone) -> bool;

    /// Starts the zone for a note. A zone that cannot play leaves the voice free.
    fn start(&mut self, note: i32, velocity: i32, zone: Arc<Zone>, pitch_wheel: u16);

    /// Ends the note, either through its release or immediately.
    fn stop(&mut self, tail_off: bool);

    /// Adds `frames` frames into `output` starting at frame `start`.
    fn render(&mut self, output: &mut [Vec<f32>], start: usize, frames: usize);
}

#[derive(Debug)]
pub struct Voice {
    zone: Option<Arc<Zone>>,
    sample_rate: f64,

    note: i32,
    velocity: i32,
    key_down: bool,
    sustained: bool,
    stamp: u64,

    position: f64,
    pitch_ratio: f64,
    sample_end: f64,
    loop_mode: LoopMode,
    looping: bool,
    loop_start: i64,
    loop_end: i64,
    loop_count: u32,

    gain_left: f32,
    gain_right: f32,
    eg: EnvelopeGenerator,
}

impl Voice {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            zone: None,
            sample_rate,
            note: 0,
            velocity: 0,
            key_down: false,
            sustained: false,
            stamp: 0,
            position: 0.0,
            pitch_ratio: 1.0,
            sample_end: 0.0,
            loop_mode: LoopMode::NoLoop,
            looping: false,
            loop_start: 0,
            loop_end: 0,
            loop_count: 0,
            gain_left: 0.0,
            gain_right: 0.0,
            eg: EnvelopeGenerator::default(),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    pub fn is_active(&self) -> bool {
        self.zone.is_some()
    }

    pub fn zone(&self) -> Option<&Arc<Zone>> {
        self.zone.as_ref()
    }

    pub fn note(&self) -> i32 {
        self.note
    }

    pub fn trigger(&self) -> Option<Trigger> {
        self.zone.as_ref().map(|zone| zone.trigger)
    }

    /// The exclusive group this voice is silenced by, 0 for none.
    pub fn off_by(&self) -> u32 {
        self.zone.as_ref().map_or(0, |zone| zone.off_by)
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn pitch_ratio(&self) -> f64 {
        self.pitch_ratio
    }

    pub fn envelope(&self) -> &EnvelopeGenerator {
        &self.eg
    }

    pub fn is_key_down(&self) -> bool {
        self.key_down
    }

    pub fn is_sustained(&self) -> bool {
        self.sustained
    }

    /// Marks the note as held by the sustain pedal after its key was released.
    pub fn set_sustained(&mut self) {
        self.key_down = false;
        self.sustained = true;
    }

    /// Start order, used to steal the oldest voice.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn set_stamp(&mut self, stamp: u64) {
        self.stamp = stamp;
    }

    /// Active and not started by a note release.
    pub fn is_playing_note_down(&self) -> bool {
        self.trigger().is_some_and(|trigger| trigger != Trigger::Release)
    }

    /// Current output level, used to steal the quietest voice.
    pub fn current_level(&self) -> f32 {
        if !self.is_active() {
            return 0.0;
        }
        self.eg.level() * self.gain_left.max(self.gain_right)
    }

    /// Releases the note, cutting it short or letting it ring per the zone's `off_mode`.
    pub fn stop_for_group(&mut self) {
        let Some(zone) = &self.zone else {
            return;
        };
        match zone.off_mode {
            OffMode::Fast => self.eg.fast_release(),
            OffMode::Normal => self.eg.note_off(),
        }
        self.key_down = false;
        self.sustained = false;
    }

    /// Fades the note out over a few milliseconds.
    pub fn stop_quick(&mut self) {
        if self.is_active() {
            self.eg.fast_release();
            self.key_down = false;
            self.sustained = false;
        }
    }

    /// Retunes a sounding voice to a new wheel position.
    pub fn set_pitch_wheel(&mut self, pitch_wheel: u16) {
        let Some(zone) = &self.zone else {
            return;
        };
        let Some(data) = zone.sample.as_ref().and_then(|sample| sample.data()) else {
            return;
        };
        self.pitch_ratio = pitch_ratio(zone, data, self.note, pitch_wheel, self.sample_rate);
    }

    pub fn kill(&mut self) {
        self.zone = None;
        self.key_down = false;
        self.sustained = false;
        self.looping = false;
    }

    pub fn voice_info(&self) -> String {
        let Some(zone) = &self.zone else {
            return "inactive\n".to_owned();
        };
        let mut info = String::new();
        let _ = writeln!(
            info,
            "note {}, vel {}, pitch ratio {:.4}, keycenter {}, transpose {}, tune {}, keytrack {}, loops {}, eg {}",
            self.note,
            self.velocity,
            self.pitch_ratio,
            zone.pitch_keycenter,
            zone.transpose,
            zone.tune,
            zone.pitch_keytrack,
            self.loop_count,
            self.eg.segment().name()
        );
        info
    }
}

fn is_playable(zone: &Zone) -> bool {
    !zone.negative_end
        && zone
            .sample
            .as_ref()
            .is_some_and(|sample| sample.is_loaded())
}

fn pitch_ratio(zone: &Zone, data: &SampleData, note: i32, pitch_wheel: u16, engine_rate: f64) -> f64 {
    let keycenter = f64::from(zone.pitch_keycenter);
    let mut pitch = f64::from(note + zone.transpose) + f64::from(zone.tune) / 100.0;
    if zone.pitch_keytrack != 100 {
        pitch = keycenter + (pitch - keycenter) * f64::from(zone.pitch_keytrack) / 100.0;
    }

    let wheel = i32::from(pitch_wheel.min(PITCH_WHEEL_MAX)) - i32::from(PITCH_WHEEL_CENTER);
    if wheel > 0 {
        pitch += f64::from(wheel) / 8191.0 * f64::from(zone.bend_up) / 100.0;
    } else if wheel < 0 {
        pitch += f64::from(wheel) / 8192.0 * f64::from(zone.bend_down) / -100.0;
    }

    2f64.powf((pitch - keycenter) / 12.0) * data.sample_rate / engine_rate
}

fn pan_gains(zone: &Zone, velocity: i32) -> (f32, f32) {
    let velocity = velocity.clamp(1, 127) as f32;
    let velocity_db = -20.0 * (127.0f32 * 127.0 / (velocity * velocity)).log10();
    let db = zone.volume + velocity_db * zone.amp_veltrack / 100.0;
    let gain = 10.0f32.powf(db / 20.0);

    let position = ((zone.pan + 100.0) / 200.0).clamp(0.0, 1.0);
    (gain * (1.0 - position).sqrt(), gain * position.sqrt())
}

impl SynthVoice for Voice {
    fn can_play(&self, zone: &Zone) -> bool {
        is_playable(zone)
    }

    fn start(&mut self, note: i32, velocity: i32, zone: Arc<Zone>, pitch_wheel: u16) {
        self.kill();
        if !is_playable(&zone) {
            return;
        }
        let Some(data) = zone.sample.as_ref().and_then(|sample| sample.data()) else {
            return;
        };

        self.note = note;
        self.velocity = velocity;
        self.key_down = true;
        self.loop_count = 0;
        self.position = zone.offset.max(0) as f64;
        self.pitch_ratio = pitch_ratio(&zone, data, note, pitch_wheel, self.sample_rate);
        (self.gain_left, self.gain_right) = pan_gains(&zone, velocity);

        let frames = data.frames as i64;
        self.sample_end = if zone.end > 0 && zone.end < frames {
            (zone.end + 1) as f64
        } else {
            frames as f64
        };

        self.loop_mode = match zone.loop_mode {
            LoopMode::SampleLoop if data.has_loop() => LoopMode::Continuous,
            LoopMode::SampleLoop => LoopMode::NoLoop,
            mode => mode,
        };
        (self.loop_start, self.loop_end) = if zone.loop_start < zone.loop_end {
            (zone.loop_start, zone.loop_end)
        } else {
            (data.loop_start, data.loop_end)
        };
        self.looping = matches!(self.loop_mode, LoopMode::Continuous | LoopMode::Sustain)
            && self.loop_start < self.loop_end;

        self.eg
            .start(&zone.ampeg, velocity, &zone.ampeg_veltrack, self.sample_rate);
        self.zone = Some(zone);
    }

    fn stop(&mut self, tail_off: bool) {
        if !tail_off || self.zone.is_none() {
            self.kill();
            return;
        }
        if self.loop_mode != LoopMode::OneShot {
            self.eg.note_off();
        }
        if self.loop_mode == LoopMode::Sustain {
            self.looping = false;
        }
        self.key_down = false;
        self.sustained = false;
    }

    fn render(&mut self, output: &mut [Vec<f32>], start: usize, frames: usize) {
        let Some(zone) = &self.zone else {
            return;
        };
        let Some(data) = zone.sample.as_ref().and_then(|sample| sample.data()) else {
            self.kill();
            return;
        };
        let Some(len) = output.iter().take(2).map(Vec::len).min() else {
            return;
        };
        let end = (start + frames).min(len);

        let buffer = &data.buffer;
        let last_frame = buffer.frames().saturating_sub(1);
        let stereo_source = buffer.channels > 1;
        let loop_start = self.loop_start as f64;
        let loop_end = self.loop_end as f64;

        let mut level = self.eg.level();
        let mut slope = self.eg.slope();
        let mut frames_left = self.eg.frames_left();
        let mut exponential = self.eg.is_exponential();
        let mut finished = false;

        for frame in start..end {
            let pos1 = self.position as usize;
            let mut pos2 = pos1 + 1;
            if self.looping && pos2 as i64 > self.loop_end {
                pos2 = self.loop_start.max(0) as usize;
            }
            let pos2 = pos2.min(last_frame);
            let fraction = (self.position - pos1 as f64) as f32;

            let interpolate = |channel: usize| {
                let a = buffer.sample(pos1, channel);
                let b = buffer.sample(pos2, channel);
                a + (b - a) * fraction
            };
            let left = interpolate(0);
            let right = if stereo_source { interpolate(1) } else { left };

            let left = left * self.gain_left * level;
            let right = right * self.gain_right * level;
            match &mut *output {
                [mono] => mono[frame] += (left + right) * 0.5,
                [out_left, out_right, ..] => {
                    out_left[frame] += left;
                    out_right[frame] += right;
                }
                [] => {}
            }

            self.position += self.pitch_ratio;
            if self.looping && self.position >= loop_end {
                self.position = loop_start + (self.position - loop_end);
                self.loop_count += 1;
            }

            if exponential {
                level *= slope;
            } else {
                level += slope;
            }
            frames_left -= 1;
            if frames_left < 0 {
                self.eg.set_level(level);
                self.eg.next_segment();
                level = self.eg.level();
                slope = self.eg.slope();
                frames_left = self.eg.frames_left();
                exponential = self.eg.is_exponential();
            }

            if self.position >= self.sample_end || self.eg.is_done() {
                finished = true;
                break;
            }
        }

        self.eg.set_level(level);
        self.eg.set_frames_left(frames_left);
        if finished {
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::envelope::EnvelopeSegment;
    use crate::messages::SampleBuffer;
    use crate::soundbank::sample::Sample;
    use crate::soundbank::zone::EgParameters;

    const RATE: f64 = 44_100.0;

    fn loaded_sample(values: Vec<f32>, channels: usize, sample_rate: f64) -> Arc<Sample> {
        let frames = values.len() / channels;
        let mut samples = values;
        samples.extend(std::iter::repeat_n(0.0, 4 * channels));
        let sample = Sample::from_file("memory.wav");
        assert!(sample.publish(SampleData {
            buffer: SampleBuffer::new(channels, samples),
            sample_rate,
            frames,
            loop_start: 0,
            loop_end: 0,
        }));
        Arc::new(sample)
    }

    fn zone_with(values: Vec<f32>) -> Zone {
        Zone {
            sample: Some(loaded_sample(values, 1, RATE)),
            ..Zone::default()
        }
    }

    fn started(zone: Zone, note: i32) -> Voice {
        let mut voice = Voice::new(RATE);
        voice.start(note, 127, Arc::new(zone), PITCH_WHEEL_CENTER);
        voice
    }

    fn stereo_out(frames: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; frames]; 2]
    }

    #[test]
    fn test_pitch_ratio_at_keycenter_is_unity() {
        let voice = started(zone_with(vec![0.5; 8]), 60);
        assert!(voice.is_active());
        assert!((voice.pitch_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pitch_ratio_tracks_note_and_rate() {
        let voice = started(zone_with(vec![0.5; 8]), 72);
        assert!((voice.pitch_ratio() - 2.0).abs() < 1e-9);

        let zone = Zone {
            sample: Some(loaded_sample(vec![0.5; 8], 1, 22_050.0)),
            ..Zone::default()
        };
        let voice = started(zone, 60);
        assert!((voice.pitch_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_keytrack_and_tune() {
        let zone = Zone {
            pitch_keytrack: 0,
            ..zone_with(vec![0.5; 8])
        };
        let voice = started(zone, 84);
        assert!((voice.pitch_ratio() - 1.0).abs() < 1e-9);

        let zone = Zone {
            tune: 1200,
            ..zone_with(vec![0.5; 8])
        };
        let voice = started(zone, 60);
        assert!((voice.pitch_ratio() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pitch_wheel_bends_by_range() {
        let mut voice = started(zone_with(vec![0.5; 8]), 60);
        voice.set_pitch_wheel(PITCH_WHEEL_MAX);
        assert!((voice.pitch_ratio() - 2f64.powf(2.0 / 12.0)).abs() < 1e-9);

        voice.set_pitch_wheel(0);
        assert!((voice.pitch_ratio() - 2f64.powf(-2.0 / 12.0)).abs() < 1e-9);
    }

    #[test]
    fn test_unloaded_sample_leaves_voice_free() {
        let zone = Zone {
            sample: Some(Arc::new(Sample::from_file("missing.wav"))),
            ..Zone::default()
        };
        let voice = Voice::new(RATE);
        assert!(!voice.can_play(&zone));

        let voice = started(zone, 60);
        assert!(!voice.is_active());

        let voice = started(Zone::default(), 60);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_negative_end_is_not_played() {
        let zone = Zone {
            negative_end: true,
            ..zone_with(vec![0.5; 8])
        };
        assert!(!started(zone, 60).is_active());
    }

    #[test]
    fn test_render_plays_to_sample_end() {
        let mut voice = started(zone_with(vec![0.5; 8]), 60);
        let mut output = stereo_out(16);
        voice.render(&mut output, 0, 16);

        let center = 0.5 * 0.5f32.sqrt();
        assert!((output[0][0] - center).abs() < 1e-6);
        assert!((output[1][7] - center).abs() < 1e-6);
        assert_eq!(output[0][8], 0.0);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_render_respects_start_offset() {
        let mut voice = started(zone_with(vec![0.5; 8]), 60);
        let mut output = stereo_out(8);
        voice.render(&mut output, 4, 4);
        assert_eq!(output[0][3], 0.0);
        assert!(output[0][4] > 0.0);
        assert!(voice.is_active());
    }

    #[test]
    fn test_zone_end_shortens_playback() {
        let zone = Zone {
            end: 3,
            ..zone_with(vec![0.5; 8])
        };
        let mut voice = started(zone, 60);
        let mut output = stereo_out(8);
        voice.render(&mut output, 0, 8);
        assert!(output[0][3] > 0.0);
        assert_eq!(output[0][4], 0.0);
    }

    #[test]
    fn test_interpolates_between_frames() {
        let ramp: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
        let zone = Zone {
            pan: -100.0,
            ..zone_with(ramp)
        };
        // one octave down plays every frame twice
        let mut voice = started(zone, 48);
        let mut output = stereo_out(4);
        voice.render(&mut output, 0, 4);
        assert!((output[0][1] - 0.0625).abs() < 1e-6);
        assert!((output[0][2] - 0.125).abs() < 1e-6);
        assert_eq!(output[1][2], 0.0);
    }

    #[test]
    fn test_continuous_loop_wraps() {
        let zone = Zone {
            loop_mode: LoopMode::Continuous,
            loop_start: 2,
            loop_end: 6,
            ..zone_with(vec![0.5; 10])
        };
        let mut voice = started(zone, 60);
        let mut output = stereo_out(20);
        voice.render(&mut output, 0, 20);
        assert!(voice.is_active());
        assert_eq!(voice.loop_count(), 4);
        assert!(output[0][19] > 0.0);
    }

    #[test]
    fn test_sample_loop_uses_embedded_points() {
        let sample = loaded_sample(vec![0.5; 10], 1, RATE);
        let mut data = sample.data().unwrap().clone();
        data.loop_start = 2;
        data.loop_end = 6;
        let looped = Sample::from_file("looped.wav");
        looped.publish(data);

        let zone = Zone {
            sample: Some(Arc::new(looped)),
            ..Zone::default()
        };
        let voice = started(zone, 60);
        assert_eq!(voice.loop_mode(), LoopMode::Continuous);

        let voice = started(zone_with(vec![0.5; 10]), 60);
        assert_eq!(voice.loop_mode(), LoopMode::NoLoop);
    }

    #[test]
    fn test_mono_output_mixes_both_sides() {
        let zone = Zone {
            pan: -100.0,
            ..zone_with(vec![0.5; 8])
        };
        let mut voice = started(zone, 60);
        let mut output = vec![vec![0.0; 4]];
        voice.render(&mut output, 0, 4);
        assert!((output[0][0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_velocity_attenuates() {
        let mut voice = Voice::new(RATE);
        voice.start(60, 64, Arc::new(zone_with(vec![1.0; 8])), PITCH_WHEEL_CENTER);
        let mut output = stereo_out(1);
        voice.render(&mut output, 0, 1);

        let db = -20.0 * (127.0f32 * 127.0 / (64.0 * 64.0)).log10();
        let expected = 10.0f32.powf(db / 20.0) * 0.5f32.sqrt();
        assert!((output[0][0] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_stop_without_tail_kills() {
        let mut voice = started(zone_with(vec![0.5; 8]), 60);
        voice.stop(false);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_stop_with_tail_releases() {
        let zone = Zone {
            ampeg: EgParameters {
                release: 0.5,
                ..EgParameters::sfz_default()
            },
            ..zone_with(vec![0.5; 8])
        };
        let mut voice = started(zone, 60);
        assert!(voice.is_key_down());
        voice.stop(true);
        assert!(voice.is_active());
        assert!(!voice.is_key_down());
        assert_eq!(voice.envelope().segment(), EnvelopeSegment::Release);
    }

    #[test]
    fn test_one_shot_ignores_release() {
        let zone = Zone {
            loop_mode: LoopMode::OneShot,
            ..zone_with(vec![0.5; 8])
        };
        let mut voice = started(zone, 60);
        voice.stop(true);
        assert_eq!(voice.envelope().segment(), EnvelopeSegment::Sustain);
        assert!(!voice.is_key_down());
    }

    #[test]
    fn test_sustain_loop_stops_looping_on_release() {
        let zone = Zone {
            loop_mode: LoopMode::Sustain,
            loop_start: 2,
            loop_end: 6,
            ampeg: EgParameters {
                release: 10.0,
                ..EgParameters::sfz_default()
            },
            ..zone_with(vec![0.5; 10])
        };
        let mut voice = started(zone, 60);
        voice.stop(true);
        let mut output = stereo_out(20);
        voice.render(&mut output, 0, 20);
        assert_eq!(voice.loop_count(), 0);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_group_stop_follows_off_mode() {
        let zone = Zone {
            off_mode: OffMode::Normal,
            ampeg: EgParameters {
                release: 2.0,
                ..EgParameters::sfz_default()
            },
            ..zone_with(vec![0.5; 8])
        };
        let mut voice = started(zone, 60);
        voice.stop_for_group();
        let normal = voice.envelope().frames_left();
        assert_eq!(normal, (2.0 * RATE) as i32);

        let mut voice = started(zone_with(vec![0.5; 8]), 60);
        voice.stop_for_group();
        assert_eq!(voice.envelope().frames_left(), 441);
    }

    #[test]
    fn test_current_level_and_info() {
        let voice = started(zone_with(vec![0.5; 8]), 60);
        assert!((voice.current_level() - 0.5f32.sqrt()).abs() < 1e-6);
        assert!(voice.is_playing_note_down());
        let info = voice.voice_info();
        assert!(info.starts_with("note 60, vel 127"));
        assert!(info.contains("eg sustain"));

        assert_eq!(Voice::new(RATE).voice_info(), "inactive\n");
        assert_eq!(Voice::new(RATE).current_level(), 0.0);
    }
}
