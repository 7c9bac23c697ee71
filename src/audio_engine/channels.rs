use cpal::Sample;

/// Number of planar buffers the synth renders for a device: the stereo mix, plus the send
/// pair when the device has room for it.
pub fn planar_channels_for(device_channels: usize) -> usize {
    if device_channels >= 4 { 4 } else { 2 }
}

/// Writes `frames` frames of planar synth output into an interleaved device buffer.
///
/// - Mono device: averages channels 0 and 1
/// - Wider devices: copies planar channel `n` to device channel `n`; device channels with no
///   planar source are silenced
///
/// # Parameters
///
/// - `planar`: One buffer per rendered channel, each at least `frames` long
/// - `frames`: Number of frames to write
/// - `device`: Interleaved output, at least `frames * device_channels` long
/// - `device_channels`: Channel count of the device
pub fn interleave(planar: &[Vec<f32>], frames: usize, device: &mut [f32], device_channels: usize) {
    if device_channels == 0 {
        return;
    }

    let source = |channel: usize, frame: usize| {
        planar
            .get(channel)
            .and_then(|buffer| buffer.get(frame))
            .copied()
            .unwrap_or(f32::EQUILIBRIUM)
    };

    for (frame, out) in device.chunks_exact_mut(device_channels).take(frames).enumerate() {
        if device_channels == 1 {
            out[0] = if planar.len() > 1 {
                (source(0, frame) + source(1, frame)) * 0.5
            } else {
                source(0, frame)
            };
            continue;
        }
        for (channel, sample) in out.iter_mut().enumerate() {
            *sample = source(channel, frame);
        }
    }
}
