//! Sample rate conversion (rubato)

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioBuffer;

/// Zero frames appended so the filter tail flushes out the end of the clip
const FLUSH_FRAMES: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("resampler setup failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Convert `buffer` to `target_rate`. Output length is
/// `round(frames * target_rate / source_rate)`.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer, ResampleError> {
    let channels = buffer.channels as usize;
    let frames = buffer.frames();
    if buffer.sample_rate == target_rate || frames == 0 || channels == 0 {
        return Ok(AudioBuffer::new(
            buffer.samples.clone(),
            buffer.channels,
            target_rate,
        ));
    }

    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    let out_frames = (frames as f64 * ratio).round() as usize;

    // Deinterleave with flush padding
    let chunk = frames + FLUSH_FRAMES;
    let mut waves_in = vec![vec![0.0f32; chunk]; channels];
    for (i, frame) in buffer.samples.chunks_exact(channels).enumerate() {
        for (ch, &s) in frame.iter().enumerate() {
            waves_in[ch][i] = s;
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, channels)?;
    let delay = resampler.output_delay();
    let waves_out = resampler.process(&waves_in, None)?;

    let mut samples = vec![0.0f32; out_frames * channels];
    for (ch, wave) in waves_out.iter().enumerate() {
        for (i, &s) in wave.iter().skip(delay).take(out_frames).enumerate() {
            samples[i * channels + ch] = s;
        }
    }

    Ok(AudioBuffer::new(samples, buffer.channels, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_scales_with_ratio() {
        let input = AudioBuffer::new(vec![0.0; 44_100 * 5], 1, 44_100);
        let out = resample(&input, 48_000).unwrap();
        assert_eq!(out.frames(), 240_000);
        assert!((out.duration_secs() - 5.0).abs() < 0.01);
        assert_eq!(out.sample_rate, 48_000);
    }

    #[test]
    fn test_sine_keeps_its_level() {
        let sr = 44_100;
        let samples: Vec<f32> = (0..sr)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sr as f32).sin() * 0.5;
                [s, s]
            })
            .collect();
        let out = resample(&AudioBuffer::new(samples, 2, sr as u32), 48_000).unwrap();
        assert_eq!(out.channels, 2);

        // Ignore the edges where the filter ramps in/out
        let middle = &out.samples[20_000..out.samples.len() - 20_000];
        let peak = middle.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {}", peak);
    }

    #[test]
    fn test_same_rate_is_passthrough() {
        let input = AudioBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 2, 48_000);
        assert_eq!(resample(&input, 48_000).unwrap(), input);
    }
}
