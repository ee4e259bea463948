//! PCM conversion helpers for TTS providers

/// Converts float samples in `[-1, 1]` to interleaved int16 LE bytes.
pub fn f32_to_int16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

fn bytes_to_i16(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Linear-interpolation resampling of int16 mono PCM.
///
/// Lightweight by design; good enough for lip-sync level fidelity.
pub fn resample_linear(data: &[u8], source_rate: u32, target_rate: u32) -> Vec<u8> {
    if source_rate == target_rate || source_rate == 0 || target_rate == 0 {
        return data.to_vec();
    }

    let samples = bytes_to_i16(data);
    if samples.is_empty() {
        return Vec::new();
    }

    let duration = samples.len() as f64 / source_rate as f64;
    let target_len = (duration * target_rate as f64) as usize;
    if target_len == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(target_len * 2);
    let step = (samples.len() - 1) as f64 / (target_len.max(2) - 1) as f64;
    for i in 0..target_len {
        let pos = i as f64 * step;
        let left = pos.floor() as usize;
        let right = (left + 1).min(samples.len() - 1);
        let frac = pos - left as f64;
        let value = samples[left] as f64 * (1.0 - frac) + samples[right] as f64 * frac;
        out.extend_from_slice(&(value as i16).to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_conversion_clamps() {
        let bytes = f32_to_int16_bytes(&[0.0, 1.0, -1.0, 2.0]);
        let samples = bytes_to_i16(&bytes);
        assert_eq!(samples, vec![0, 32767, -32767, 32767]);
    }

    #[test]
    fn test_resample_identity() {
        let data = f32_to_int16_bytes(&[0.1, 0.2, 0.3]);
        assert_eq!(resample_linear(&data, 16_000, 16_000), data);
    }

    #[test]
    fn test_resample_halves_length() {
        let data = vec![0u8; 1600]; // 800 samples
        let out = resample_linear(&data, 16_000, 8_000);
        assert_eq!(out.len(), 800); // 400 samples
    }

    #[test]
    fn test_resample_empty() {
        assert!(resample_linear(&[], 16_000, 8_000).is_empty());
    }
}
