//! Audio-specific error types.

use thiserror::Error;

/// Errors that can occur while loading sample data.
#[derive(Debug, Error)]
pub enum SampleLoadError {
    /// Failed to open the audio file.
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode the audio file.
    #[error("failed to decode audio file: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    /// Audio file has no default track.
    #[error("audio file has no default track")]
    NoDefaultTrack,

    /// Audio file is missing sample rate information.
    #[error("audio file is missing a sample rate")]
    MissingSampleRate,

    /// Audio file is missing channel information.
    #[error("audio file is missing channel information")]
    MissingChannels,

    /// Only mono and stereo samples can be played.
    #[error("unsupported channel count: file has {file_channels} channels (only mono and stereo supported)")]
    UnsupportedChannels {
        /// Number of channels in the source file.
        file_channels: usize,
    },

    /// The soundbank has no `smpl` chunk inside its `sdta` list.
    #[error("SF2 is missing its \"smpl\" chunk")]
    MissingSampleChunk,

    /// The caller canceled the load.
    #[error("sample loading canceled")]
    Canceled,
}

/// Errors that can occur while decoding a binary soundbank.
#[derive(Debug, Error)]
pub enum SoundbankError {
    /// The file could not be opened or read.
    #[error("Couldn't open file: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with a `RIFF sfbk` container.
    #[error("not a SF2 soundbank")]
    NotASoundbank,

    /// One of the nine structural tables is absent.
    #[error("invalid soundbank (missing or incomplete hydra)")]
    IncompleteHydra,

    /// A table chunk length is not a whole number of records.
    #[error("invalid soundbank: {table} chunk has {len} bytes, not a multiple of {record_size}")]
    RecordSize {
        /// Four-character table name.
        table: String,
        /// Chunk payload length in bytes.
        len: u32,
        /// On-disk record size for the table.
        record_size: usize,
    },
}

/// Errors returned when restoring a parameter snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// The snapshot was taken from a synth on another channel.
    #[error("snapshot belongs to slot {found}, this synth is slot {expected}")]
    SlotMismatch { expected: i32, found: i32 },
}

/// Errors that can occur while opening the output stream.
#[derive(Debug, Error)]
pub enum AudioStreamError {
    /// No default output device exists.
    #[error("no audio device found")]
    NoDevice,

    /// The device did not report a default configuration.
    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    /// The stream could not be built.
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    /// The stream could not be started.
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    /// The control queue is full.
    #[error("control queue is full")]
    QueueFull,
}
