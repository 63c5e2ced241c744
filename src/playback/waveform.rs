//! Waveform peaks for take previews
//!
//! Peaks are the maximum absolute amplitude per time bucket, normalized to
//! the 0.0-1.0 range.

/// Compute `peaks_per_second` peaks over mono `samples`
pub fn compute_peaks(samples: &[f32], sample_rate: u32, peaks_per_second: u32) -> Vec<f32> {
    if sample_rate == 0 || peaks_per_second == 0 {
        return Vec::new();
    }

    let duration = samples.len() as f64 / sample_rate as f64;
    let total_peaks = (duration * peaks_per_second as f64).ceil() as usize;
    if total_peaks == 0 {
        return Vec::new();
    }

    let samples_per_peak = (sample_rate / peaks_per_second).max(1) as usize;
    let mut peaks: Vec<f32> = samples
        .chunks(samples_per_peak)
        .map(|chunk| {
            chunk
                .iter()
                .map(|s| s.abs())
                .fold(0.0f32, f32::max)
                .min(1.0)
        })
        .collect();

    // Pad or trim to exact size
    peaks.resize(total_peaks, 0.0);
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_peaks_empty() {
        assert!(compute_peaks(&[], 8_000, 50).is_empty());
        assert!(compute_peaks(&[0.5; 10], 0, 50).is_empty());
    }

    #[test]
    fn test_compute_peaks_rising_amplitude() {
        let samples: Vec<f32> = (0..8_000).map(|i| i as f32 / 16_000.0).collect();
        let peaks = compute_peaks(&samples, 8_000, 50);

        assert_eq!(peaks.len(), 50);
        assert!(peaks.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(peaks[45] > peaks[5]);
    }

    #[test]
    fn test_compute_peaks_normalization() {
        let peaks = compute_peaks(&[-1.0; 160], 8_000, 50);
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0] - 1.0).abs() < 0.01);
    }
}
