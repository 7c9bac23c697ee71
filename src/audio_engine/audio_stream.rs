//! Audio Stream Module
//!
//! This module handles CPAL audio stream management including:
//! - Stream initialization and configuration
//! - Draining queued control messages into the synth
//! - Rendering into preallocated planar buffers and interleaving to the device

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Stream, StreamConfig};
use env_logger::{Builder, Env};
use rtrb::{Producer, RingBuffer};
use std::sync::{Arc, Mutex, PoisonError};

use crate::audio_engine::channels::{interleave, planar_channels_for};
use crate::audio_engine::constants::{CONTROL_QUEUE_CAPACITY, DEVICE_BUFFER_FRAMES};
use crate::audio_engine::errors::AudioStreamError;
use crate::audio_engine::synth::Synth;
use crate::messages::ControlMessage;

/// Handle to the audio stream and the queue feeding it.
pub struct AudioStreamHandle {
    pub stream: Stream,
    pub producer: Arc<Mutex<Producer<ControlMessage>>>,
    pub output_channels: usize,
    pub output_sample_rate: u32,
}

impl AudioStreamHandle {
    /// Queues a message for the audio callback.
    pub fn send(&self, message: ControlMessage) -> Result<(), AudioStreamError> {
        push_message(&self.producer, message)
    }
}

fn push_message(
    producer: &Mutex<Producer<ControlMessage>>,
    message: ControlMessage,
) -> Result<(), AudioStreamError> {
    producer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(message)
        .map_err(|_| AudioStreamError::QueueFull)
}

/// Setup and configure the logger
pub fn setup_logger() {
    // Users can raise verbosity via `RUST_LOG`, e.g. `RUST_LOG=debug` to trace loading.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init()
        .unwrap_or(()); // Ignore initialization errors
}

/// Create and configure the audio stream
///
/// This function:
/// 1. Sets up the default audio device
/// 2. Retunes the synth to the device rate
/// 3. Creates the control ring buffer
/// 4. Builds and returns the audio stream (not yet playing)
pub fn create_audio_stream(synth: Arc<Synth>) -> Result<AudioStreamHandle, AudioStreamError> {
    setup_logger();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioStreamError::NoDevice)?;

    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate();
    let channels = config.channels();

    log::info!("Starting synth... ({} ch@{} Hz)", channels, sample_rate);
    synth.set_sample_rate(f64::from(sample_rate));

    let (producer, mut consumer) = RingBuffer::new(CONTROL_QUEUE_CAPACITY);

    let stream_config = StreamConfig {
        channels,
        sample_rate,
        buffer_size: BufferSize::Fixed(DEVICE_BUFFER_FRAMES),
    };

    let device_channels = usize::from(channels);
    let block_frames = DEVICE_BUFFER_FRAMES as usize;
    let mut scratch = vec![vec![0.0f32; block_frames]; planar_channels_for(device_channels)];

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            while let Ok(message) = consumer.pop() {
                synth.handle_message(message);
            }

            // Hosts may ignore the fixed size request, so render in scratch-sized blocks.
            let frames = data.len() / device_channels;
            let mut done = 0;
            while done < frames {
                let block = (frames - done).min(block_frames);
                synth.render(&mut scratch, 0, block);
                let out = &mut data[done * device_channels..(done + block) * device_channels];
                interleave(&scratch, block, out, device_channels);
                done += block;
            }
        },
        |err| {
            log::error!("Audio stream error: {}", err);
        },
        None,
    )?;

    Ok(AudioStreamHandle {
        stream,
        producer: Arc::new(Mutex::new(producer)),
        output_channels: device_channels,
        output_sample_rate: sample_rate,
    })
}

/// Start playing the audio stream
pub fn start_stream(stream: &Stream) -> Result<(), AudioStreamError> {
    stream.play()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::synth::SynthConfig;
    use crate::soundbank::shared::SharedSamples;

    #[test]
    fn test_logger_setup() {
        // Multiple calls should be safe (though only the first takes effect)
        setup_logger();
        setup_logger();
    }

    #[test]
    fn test_full_queue_is_reported() {
        let (producer, mut consumer) = RingBuffer::new(1);
        let producer = Mutex::new(producer);

        push_message(&producer, ControlMessage::NoteOff { note: 60 }).unwrap();
        let err = push_message(&producer, ControlMessage::NoteOff { note: 61 }).unwrap_err();
        assert!(matches!(err, AudioStreamError::QueueFull));

        assert_eq!(consumer.pop().ok(), Some(ControlMessage::NoteOff { note: 60 }));
    }

    #[test]
    fn test_audio_stream_creation() {
        // Actual stream creation requires audio hardware
        if cpal::default_host().default_output_device().is_none() {
            return;
        }

        let synth = Arc::new(Synth::new(SynthConfig::default(), SharedSamples::new()));
        if let Ok(handle) = create_audio_stream(Arc::clone(&synth)) {
            assert!(handle.output_channels > 0);
            assert!((synth.sample_rate() - f64::from(handle.output_sample_rate)).abs() < 1e-9);
            handle.send(ControlMessage::AllNotesOff { tail_off: false }).unwrap();
        }
    }
}
