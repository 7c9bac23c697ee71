//! The resolved playable region shared by both definition formats.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::audio_engine::constants::{EG_MIN_SEGMENT_SECONDS, SF2_DEFAULT_TIMECENTS};
use crate::soundbank::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Attack,
    Release,
    First,
    Legato,
}

impl Trigger {
    pub fn name(self) -> &'static str {
        match self {
            Self::Attack => "attack",
            Self::Release => "release",
            Self::First => "first",
            Self::Legato => "legato",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Loop continuously when the sample file carries loop points, otherwise play once.
    SampleLoop,
    NoLoop,
    OneShot,
    Continuous,
    Sustain,
}

impl LoopMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::SampleLoop => "sample_loop",
            Self::NoLoop => "no_loop",
            Self::OneShot => "one_shot",
            Self::Continuous => "loop_continuous",
            Self::Sustain => "loop_sustain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffMode {
    Fast,
    Normal,
}

/// Amplitude envelope parameters. Times in seconds, `start` and `sustain` in percent.
///
/// The same shape is reused for velocity tracking, where each field is added per unit of
/// normalized velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EgParameters {
    pub delay: f32,
    pub start: f32,
    pub attack: f32,
    pub hold: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl EgParameters {
    pub fn sfz_default() -> Self {
        Self {
            sustain: 100.0,
            ..Self::default()
        }
    }

    /// Raw SF2 volume envelope values (timecents, sustain in centibels).
    pub fn sf2_default() -> Self {
        Self {
            delay: SF2_DEFAULT_TIMECENTS,
            start: 0.0,
            attack: SF2_DEFAULT_TIMECENTS,
            hold: SF2_DEFAULT_TIMECENTS,
            decay: SF2_DEFAULT_TIMECENTS,
            sustain: 0.0,
            release: SF2_DEFAULT_TIMECENTS,
        }
    }

    /// Returns the parameters with `velocity * tracking` added to each field.
    pub fn with_velocity(&self, velocity: f32, tracking: &EgParameters) -> Self {
        Self {
            delay: self.delay + velocity * tracking.delay,
            start: self.start + velocity * tracking.start,
            attack: self.attack + velocity * tracking.attack,
            hold: self.hold + velocity * tracking.hold,
            decay: self.decay + velocity * tracking.decay,
            sustain: self.sustain + velocity * tracking.sustain,
            release: self.release + velocity * tracking.release,
        }
    }
}

fn timecents_to_seconds(timecents: f32) -> f32 {
    let seconds = 2.0f32.powf(timecents / 1200.0);
    if seconds <= EG_MIN_SEGMENT_SECONDS {
        0.0
    } else {
        seconds
    }
}

fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// A playable region: key and velocity window, sample binding and playback parameters.
///
/// A bound of `-1` leaves that side of a key or velocity range unconstrained.
#[derive(Debug, Clone)]
pub struct Zone {
    pub sample: Option<Arc<Sample>>,
    pub lokey: i32,
    pub hikey: i32,
    pub lovel: i32,
    pub hivel: i32,
    pub trigger: Trigger,
    pub group: u32,
    pub off_by: u32,
    pub off_mode: OffMode,

    pub offset: i64,
    pub end: i64,
    pub negative_end: bool,
    pub loop_mode: LoopMode,
    pub loop_start: i64,
    pub loop_end: i64,

    pub transpose: i32,
    pub tune: i32,
    pub pitch_keycenter: i32,
    pub pitch_keytrack: i32,
    pub bend_up: i32,
    pub bend_down: i32,

    pub volume: f32,
    pub pan: f32,
    pub amp_veltrack: f32,

    pub ampeg: EgParameters,
    pub ampeg_veltrack: EgParameters,
}

impl Default for Zone {
    fn default() -> Self {
        Self {
            sample: None,
            lokey: 0,
            hikey: 127,
            lovel: 0,
            hivel: 127,
            trigger: Trigger::Attack,
            group: 0,
            off_by: 0,
            off_mode: OffMode::Fast,
            offset: 0,
            end: 0,
            negative_end: false,
            loop_mode: LoopMode::SampleLoop,
            loop_start: 0,
            loop_end: 0,
            transpose: 0,
            tune: 0,
            pitch_keycenter: 60,
            pitch_keytrack: 100,
            bend_up: 200,
            bend_down: -200,
            volume: 0.0,
            pan: 0.0,
            amp_veltrack: 100.0,
            ampeg: EgParameters::sfz_default(),
            ampeg_veltrack: EgParameters::default(),
        }
    }
}

impl Zone {
    /// Instrument-level SF2 defaults. The keycenter stays unset (`-1`) until a sample header
    /// provides one.
    pub fn sf2_instrument() -> Self {
        Self {
            pitch_keycenter: -1,
            loop_mode: LoopMode::NoLoop,
            ampeg: EgParameters::sf2_default(),
            ..Self::default()
        }
    }

    /// Preset-level SF2 accumulator. Every additive field starts at zero so that merging it
    /// onto an instrument zone is neutral.
    pub fn sf2_relative() -> Self {
        Self {
            pitch_keytrack: 0,
            amp_veltrack: 0.0,
            ampeg: EgParameters::default(),
            ..Self::default()
        }
    }

    /// Adds the preset-level relative values onto this instrument zone.
    pub fn merge_relative(&mut self, preset: &Zone) {
        self.offset += preset.offset;
        self.end += preset.end;
        self.loop_start += preset.loop_start;
        self.loop_end += preset.loop_end;
        self.transpose += preset.transpose;
        self.tune += preset.tune;
        self.pitch_keytrack += preset.pitch_keytrack;
        self.volume += preset.volume;
        self.pan += preset.pan;
        self.ampeg.delay += preset.ampeg.delay;
        self.ampeg.attack += preset.ampeg.attack;
        self.ampeg.hold += preset.ampeg.hold;
        self.ampeg.decay += preset.ampeg.decay;
        self.ampeg.sustain += preset.ampeg.sustain;
        self.ampeg.release += preset.ampeg.release;
    }

    /// Converts SF2 units to the normalized model: timecents to seconds, sustain attenuation
    /// to percent, pan pinned to +-100.
    pub fn normalize_sf2(&mut self) {
        self.ampeg.delay = timecents_to_seconds(self.ampeg.delay);
        self.ampeg.attack = timecents_to_seconds(self.ampeg.attack);
        self.ampeg.hold = timecents_to_seconds(self.ampeg.hold);
        self.ampeg.decay = timecents_to_seconds(self.ampeg.decay);
        self.ampeg.release = timecents_to_seconds(self.ampeg.release);

        self.pan = self.pan.clamp(-100.0, 100.0);

        self.ampeg.sustain = if self.ampeg.sustain <= 0.0 {
            100.0
        } else {
            100.0 * db_to_gain(-self.ampeg.sustain / 10.0)
        };
    }

    /// Whether this zone sounds for the given note, velocity and trigger class.
    ///
    /// Attack zones also answer to `First` and `Legato` triggers.
    pub fn matches(&self, note: i32, velocity: i32, trigger: Trigger) -> bool {
        let in_range = |value: i32, lo: i32, hi: i32| (lo < 0 || value >= lo) && (hi < 0 || value <= hi);

        let trigger_matches = self.trigger == trigger
            || (self.trigger == Trigger::Attack
                && matches!(trigger, Trigger::First | Trigger::Legato));

        in_range(note, self.lokey, self.hikey)
            && in_range(velocity, self.lovel, self.hivel)
            && trigger_matches
    }

    pub fn dump(&self) -> String {
        let mut info = String::new();
        let _ = write!(
            info,
            "{} - {}, vel {} - {}, trigger {}",
            self.lokey,
            self.hikey,
            self.lovel,
            self.hivel,
            self.trigger.name()
        );
        if let Some(sample) = &self.sample {
            let _ = write!(info, ", sample {}", sample.short_name());
        }
        let _ = writeln!(
            info,
            ", loop {} [{} - {}], keycenter {}, volume {:.1} dB, pan {:.1}",
            self.loop_mode.name(),
            self.loop_start,
            self.loop_end,
            self.pitch_keycenter,
            self.volume,
            self.pan
        );
        info
    }
}
