//! Audio file loading and decoding functionality.
//!
//! Sample files referenced by text definitions are decoded into interleaved f32 buffers at
//! their native rate and channel count. Voices interpolate at play time, so nothing is
//! resampled here.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use symphonia::core::{
    audio::SampleBuffer as SymphoniaSampleBuffer, codecs::DecoderOptions,
    errors::Error as SymphoniaError, formats::FormatOptions, io::MediaSourceStream,
    meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::audio_engine::constants::GUARD_FRAMES;
use crate::audio_engine::errors::SampleLoadError;
use crate::messages::SampleBuffer;
use crate::soundbank::riff::{Chunk, ChunkKind, find_chunk};
use crate::soundbank::sample::SampleData;

/// Decodes an audio file into sample data, with guard frames appended.
///
/// Loop points come from a WAV `smpl` chunk when one is present.
///
/// # Errors
///
/// - File not found or cannot be opened
/// - Audio format not recognized or corrupted
/// - More than two channels
pub fn decode_sample_file(path: &Path) -> Result<SampleData, SampleLoadError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or(SampleLoadError::NoDefaultTrack)?;
    let file_rate_hz = track
        .codec_params
        .sample_rate
        .ok_or(SampleLoadError::MissingSampleRate)?;
    let file_channels = track
        .codec_params
        .channels
        .ok_or(SampleLoadError::MissingChannels)?
        .count();

    if !(1..=2).contains(&file_channels) {
        return Err(SampleLoadError::UnsupportedChannels { file_channels });
    }

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut decoded: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(SampleLoadError::Decode(err)),
        };

        let audio_buf = decoder.decode(&packet)?;
        let spec = *audio_buf.spec();
        let duration = audio_buf.capacity() as u64;

        let mut sample_buf = SymphoniaSampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        decoded.extend_from_slice(sample_buf.samples());
    }

    let frames = decoded.len() / file_channels;
    decoded.resize((frames + GUARD_FRAMES) * file_channels, 0.0);

    let (loop_start, loop_end) = read_wav_loop(path).unwrap_or((0, 0));

    log::debug!(
        "Decoded {} ({} frames, {} ch @ {} Hz, loop {}..{})",
        path.display(),
        frames,
        file_channels,
        file_rate_hz,
        loop_start,
        loop_end
    );

    Ok(SampleData {
        buffer: SampleBuffer::new(file_channels, decoded),
        sample_rate: f64::from(file_rate_hz),
        frames,
        loop_start,
        loop_end,
    })
}

/// First loop of a WAV `smpl` chunk, as `(start, end)` frames.
pub fn read_wav_loop(path: &Path) -> Option<(i64, i64)> {
    let mut reader = BufReader::new(File::open(path).ok()?);
    let riff = Chunk::read_from(&mut reader).ok()?;
    if riff.kind != ChunkKind::Riff || !riff.is(b"WAVE") {
        return None;
    }

    let smpl = find_chunk(&mut reader, riff.end(), b"smpl").ok()??;
    let payload = smpl.read_payload(&mut reader).ok()?;
    parse_smpl_loop(&payload)
}

fn parse_smpl_loop(payload: &[u8]) -> Option<(i64, i64)> {
    let word = |at: usize| -> Option<u32> {
        let bytes = payload.get(at..at + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    };

    if word(28)? == 0 {
        return None;
    }
    // loop records start after the 36-byte header; start and end sit at +8 and +12
    Some((i64::from(word(44)?), i64::from(word(48)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_file, write_wav};

    #[test]
    fn test_decode_wav_to_f32_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wav");

        let samples = [0i16, 16_384i16, -16_384i16, 32_767i16];
        write_wav(&path, 1, 44_100, &samples, None);

        let decoded = decode_sample_file(&path).unwrap();
        assert_eq!(decoded.buffer.channels, 1);
        assert_eq!(decoded.frames, samples.len());
        assert_eq!(decoded.buffer.frames(), samples.len() + GUARD_FRAMES);
        assert!((decoded.sample_rate - 44_100.0).abs() < 1e-9);
        assert!(decoded.buffer.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(!decoded.has_loop());
    }

    #[test]
    fn test_guard_frames_are_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stereo.wav");

        let samples = [16_384i16, -16_384, 16_384, -16_384];
        write_wav(&path, 2, 22_050, &samples, None);

        let decoded = decode_sample_file(&path).unwrap();
        assert_eq!(decoded.buffer.channels, 2);
        assert_eq!(decoded.frames, 2);
        for frame in decoded.frames..decoded.buffer.frames() {
            assert_eq!(decoded.buffer.sample(frame, 0), 0.0);
            assert_eq!(decoded.buffer.sample(frame, 1), 0.0);
        }
    }

    #[test]
    fn test_smpl_loop_is_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("looped.wav");

        let samples = vec![1_000i16; 64];
        write_wav(&path, 1, 44_100, &samples, Some((8, 40)));

        let decoded = decode_sample_file(&path).unwrap();
        assert_eq!((decoded.loop_start, decoded.loop_end), (8, 40));
        assert!(decoded.has_loop());
    }

    #[test]
    fn test_smpl_without_loops() {
        let mut payload = vec![0u8; 36];
        payload[28..32].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(parse_smpl_loop(&payload), None);
        assert_eq!(parse_smpl_loop(&[0u8; 10]), None);
    }

    #[test]
    fn test_decode_invalid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nonexistent.wav");

        let result = decode_sample_file(&path);
        assert!(matches!(result, Err(SampleLoadError::Io(_))));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("garbage.wav");
        write_file(&path, b"definitely not audio");

        assert!(decode_sample_file(&path).is_err());
        assert_eq!(read_wav_loop(&path), None);
    }
}
