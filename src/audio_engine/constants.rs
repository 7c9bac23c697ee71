//! Audio engine configuration constants and limits.

/// Default number of voices in the synth pool.
pub const MAX_VOICES: usize = 32;

/// Silent frames appended past the end of every decoded sample.
pub const GUARD_FRAMES: usize = 4;

/// Number of 16-bit samples converted per step while reading SF2 sample data.
pub const SF2_READ_CHUNK: usize = 128_000;

/// Length of a forced release, in seconds.
pub const FAST_RELEASE_SECONDS: f32 = 0.01;

/// Exponent used for exponential decay and release segments (roughly -80 dB).
pub const EG_EXPONENTIAL_FLOOR: f64 = -9.226;

/// Envelope times at or below this many seconds are treated as zero after SF2 conversion.
pub const EG_MIN_SEGMENT_SECONDS: f32 = 0.01;

/// SF2 timecent value used for unset envelope times (about one millisecond).
pub const SF2_DEFAULT_TIMECENTS: f32 = -12000.0;

/// dB per centibel of SF2 initial attenuation.
pub const SF2_ATTENUATION_TO_DB: f32 = -0.05;

/// Highest zone gain accepted from SF2 attenuation, in dB.
pub const MAX_ZONE_GAIN_DB: f32 = 6.0;

/// Frames per SF2 coarse offset unit.
pub const SF2_COARSE_OFFSET: i64 = 32768;

/// Pitch wheel value with no bend applied.
pub const PITCH_WHEEL_CENTER: u16 = 8192;

/// Largest pitch wheel value.
pub const PITCH_WHEEL_MAX: u16 = 16383;

/// Default master volume controller value.
pub const DEFAULT_VOLUME_CC: u8 = 90;

/// Default master pan controller value (center).
pub const DEFAULT_PAN_CC: u8 = 64;

/// Default effect send controller value.
pub const DEFAULT_SEND_CC: u8 = 0;

/// Number of programs addressable in one bank.
pub const PROGRAMS_PER_BANK: u32 = 128;

/// Capacity of the control message ring buffer.
pub const CONTROL_QUEUE_CAPACITY: usize = 1024;

/// Fixed device buffer size requested from the host, in frames.
pub const DEVICE_BUFFER_FRAMES: u32 = 512;
