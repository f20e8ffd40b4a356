//! Waveform overview for display

use super::AudioBuffer;

/// Split the clip into `resolution` buckets and return `[min, max]` of each,
/// across all channels. Non-finite samples count as silence.
pub fn compute_peaks(buffer: &AudioBuffer, resolution: usize) -> Vec<[f32; 2]> {
    let frames = buffer.frames();
    if resolution == 0 {
        return Vec::new();
    }
    if frames == 0 {
        return vec![[0.0, 0.0]; resolution];
    }

    let channels = buffer.channels as usize;
    (0..resolution)
        .map(|i| {
            let start = i * frames / resolution;
            let end = ((i + 1) * frames / resolution).max(start + 1).min(frames);
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for &s in &buffer.samples[start * channels..end * channels] {
                let s = if s.is_finite() { s } else { 0.0 };
                min = min.min(s);
                max = max.max(s);
            }
            [min, max]
        })
        .collect()
}
