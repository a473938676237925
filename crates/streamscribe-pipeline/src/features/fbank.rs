//! Log-mel filterbank extraction
//!
//! Hann-windowed real FFT with triangular mel filters. Frames are
//! extracted in streaming fashion: samples accumulate in a sliding
//! buffer and only whole windows are emitted.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use streamscribe_config::FeatureConfig;

/// Streaming log-mel fbank extractor.
pub struct Fbank {
    frame_length: usize,
    frame_shift: usize,
    num_bins: usize,
    n_fft: usize,
    hann_window: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
    fft: Arc<dyn RealToComplex<f32>>,
    buffer: Vec<f32>,
}

impl Fbank {
    pub fn new(config: &FeatureConfig) -> Self {
        let frame_length = config.frame_length();
        let frame_shift = config.frame_shift();
        let n_fft = frame_length.next_power_of_two();

        // Hann window over the analysis frame
        let hann_window: Vec<f32> = (0..frame_length)
            .map(|i| {
                let x = std::f32::consts::PI * i as f32 / (frame_length - 1) as f32;
                0.5 * (1.0 - (2.0 * x).cos())
            })
            .collect();

        let mel_filters =
            Self::create_mel_filters(config.sample_rate as usize, n_fft, config.num_bins);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            frame_length,
            frame_shift,
            num_bins: config.num_bins,
            n_fft,
            hann_window,
            mel_filters,
            fft,
            buffer: Vec::new(),
        }
    }

    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }

    fn mel_to_hz(mel: f32) -> f32 {
        700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
    }

    fn create_mel_filters(sample_rate: usize, n_fft: usize, num_bins: usize) -> Vec<Vec<f32>> {
        let mel_min = Self::hz_to_mel(0.0);
        let mel_max = Self::hz_to_mel(sample_rate as f32 / 2.0);

        let mel_points: Vec<f32> = (0..num_bins + 2)
            .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (num_bins + 1) as f32)
            .collect();

        let bin_points: Vec<usize> = mel_points
            .iter()
            .map(|&m| ((n_fft + 1) as f32 * Self::mel_to_hz(m) / sample_rate as f32).floor() as usize)
            .collect();

        let n_bins = n_fft / 2 + 1;
        let mut filters = vec![vec![0.0f32; n_bins]; num_bins];

        for i in 0..num_bins {
            let start = bin_points[i];
            let center = bin_points[i + 1];
            let end = bin_points[i + 2];

            for j in start..center {
                if center > start && j < n_bins {
                    filters[i][j] = (j - start) as f32 / (center - start) as f32;
                }
            }
            for j in center..end {
                if end > center && j < n_bins {
                    filters[i][j] = (end - j) as f32 / (end - center) as f32;
                }
            }
        }

        filters
    }

    /// Accept samples and return every newly completed frame.
    pub fn accept(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_length {
            frames.push(self.compute_frame());
            self.buffer.drain(..self.frame_shift);
        }
        frames
    }

    fn compute_frame(&self) -> Vec<f32> {
        // window the frame and zero-pad to the FFT size
        let mut windowed = vec![0.0f32; self.n_fft];
        for i in 0..self.frame_length {
            windowed[i] = self.buffer[i] * self.hann_window[i];
        }

        let n_bins = self.n_fft / 2 + 1;
        let mut spectrum = vec![Complex::new(0.0f32, 0.0f32); n_bins];
        let magnitudes: Vec<f32> = if self.fft.process(&mut windowed, &mut spectrum).is_ok() {
            spectrum.iter().map(|c| c.norm()).collect()
        } else {
            vec![0.0f32; n_bins]
        };

        let mut frame = Vec::with_capacity(self.num_bins);
        for filter in &self.mel_filters {
            let mut mel_energy = 0.0f32;
            for (j, &mag) in magnitudes.iter().enumerate() {
                mel_energy += mag * filter[j];
            }
            frame.push((mel_energy + 1e-10).ln());
        }
        frame
    }

    /// Samples buffered but not yet emitted as a frame.
    pub fn pending_samples(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fbank() -> Fbank {
        Fbank::new(&FeatureConfig::default())
    }

    #[test]
    fn test_frame_geometry() {
        let fb = fbank();
        assert_eq!(fb.frame_length, 400);
        assert_eq!(fb.frame_shift, 160);
        assert_eq!(fb.n_fft, 512);
        assert_eq!(fb.hann_window.len(), 400);
        assert_eq!(fb.mel_filters.len(), 80);
    }

    #[test]
    fn test_streaming_frame_count() {
        let mut fb = fbank();
        // 1.28 s at 16 kHz
        let samples: Vec<f32> = (0..20480).map(|i| (i as f32 * 0.01).sin() * 1000.0).collect();
        let frames = fb.accept(&samples);
        assert_eq!(frames.len(), 126);
        assert!(frames.iter().all(|f| f.len() == 80));
        assert_eq!(fb.pending_samples(), 20480 - 126 * 160);
    }

    #[test]
    fn test_incremental_matches_batch() {
        let samples: Vec<f32> = (0..4800).map(|i| (i as f32 * 0.03).sin() * 500.0).collect();

        let mut batch = fbank();
        let expected = batch.accept(&samples);

        let mut streaming = fbank();
        let mut got = Vec::new();
        for piece in samples.chunks(100) {
            got.extend(streaming.accept(piece));
        }

        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(&expected) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut fb = fbank();
        fb.accept(&vec![0.0; 300]);
        assert_eq!(fb.pending_samples(), 300);
        fb.reset();
        assert_eq!(fb.pending_samples(), 0);
    }
}
