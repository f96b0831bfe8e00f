//! Audio-analysis provider: turns blocks of PCM samples into the byte
//! buffers carried by [`RawAudioSample`].

use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::AudioConfig, snapshot::RawAudioSample, BeatSyncError, Result};

pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;
pub const DEFAULT_SMOOTHING: f32 = 0.8;

/// Spectrum analyser with the byte conventions of browser analyser nodes:
/// frequency bytes span `MIN_DECIBELS..MAX_DECIBELS`, waveform bytes map
/// `-1..1` onto `0..255` with 128 as silence.
pub struct SpectrumAnalyser {
    fft_size: usize,
    frequency_bins: usize,
    waveform_samples: usize,
    smoothing: f32,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    last_rms: f32,
}

impl SpectrumAnalyser {
    pub fn new(config: &AudioConfig) -> Self {
        Self::with_sizes(config.frequency_bins, config.waveform_samples)
    }

    /// The FFT runs over twice as many samples as there are frequency bins.
    pub fn with_sizes(frequency_bins: usize, waveform_samples: usize) -> Self {
        let frequency_bins = frequency_bins.max(1);
        let fft_size = frequency_bins * 2;
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let window = (0..fft_size).map(|i| hann_value(i, fft_size)).collect();

        Self {
            fft_size,
            frequency_bins,
            waveform_samples,
            smoothing: DEFAULT_SMOOTHING,
            plan,
            input,
            spectrum,
            scratch,
            window,
            smoothed: vec![0.0; frequency_bins],
            last_rms: 0.0,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Temporal smoothing between consecutive blocks, clamped to `0..1`.
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = if smoothing.is_finite() {
            smoothing.clamp(0.0, 1.0)
        } else {
            DEFAULT_SMOOTHING
        };
    }

    /// RMS of the most recent block.
    pub fn last_rms(&self) -> f32 {
        self.last_rms
    }

    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|value| *value = 0.0);
        self.last_rms = 0.0;
    }

    /// Analyses the newest samples of `samples`. Shorter blocks than the FFT
    /// size are zero-padded at the front.
    pub fn process(&mut self, samples: &[f32]) -> Result<RawAudioSample> {
        if samples.len() < 2 {
            return Err(BeatSyncError::InvalidInput(
                "analysis requires blocks with at least two samples",
            ));
        }
        self.last_rms = compute_rms(samples);

        let frequency = self.frequency_bytes(samples)?;
        let waveform = self.waveform_bytes(samples);
        Ok(RawAudioSample {
            frequency,
            waveform,
        })
    }

    fn frequency_bytes(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        let tail = &samples[samples.len().saturating_sub(self.fft_size)..];
        let offset = self.fft_size - tail.len();
        self.input.iter_mut().for_each(|value| *value = 0.0);
        for (index, sample) in tail.iter().enumerate() {
            let slot = offset + index;
            self.input[slot] = sanitize(*sample) * self.window[slot];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let scale = 1.0 / self.fft_size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        let smoothing = self.smoothing;
        let bytes = self
            .smoothed
            .iter_mut()
            .zip(&self.spectrum)
            .map(|(previous, bin)| {
                let magnitude = bin.norm() * scale;
                *previous = smoothing * *previous + (1.0 - smoothing) * magnitude;
                let decibels = 20.0 * previous.log10();
                let level = 255.0 * (decibels - MIN_DECIBELS) / range;
                level.clamp(0.0, 255.0) as u8
            })
            .collect();
        Ok(bytes)
    }

    fn waveform_bytes(&self, samples: &[f32]) -> Vec<u8> {
        let tail = &samples[samples.len().saturating_sub(self.waveform_samples)..];
        let mut bytes = vec![128u8; self.waveform_samples - tail.len()];
        bytes.extend(
            tail.iter()
                .map(|sample| (128.0 * (1.0 + sanitize(*sample))).clamp(0.0, 255.0) as u8),
        );
        bytes
    }
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.fft_size)
            .field("frequency_bins", &self.frequency_bins)
            .field("waveform_samples", &self.waveform_samples)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

fn sanitize(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sanitize(*sample).powi(2)).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(bin: usize, fft_size: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * bin as f32 * i as f32 / fft_size as f32).sin())
            .collect()
    }

    #[test]
    fn silence_maps_to_floor_and_midline() {
        let mut analyser = SpectrumAnalyser::with_sizes(64, 32);
        let frame = analyser.process(&[0.0; 128]).unwrap();

        assert_eq!(frame.frequency, vec![0; 64]);
        assert_eq!(frame.waveform, vec![128; 32]);
        assert_eq!(analyser.last_rms(), 0.0);
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let mut analyser = SpectrumAnalyser::with_sizes(1024, 2048);
        let samples = sine(64, analyser.fft_size(), 2048);
        let frame = analyser.process(&samples).unwrap();

        assert_eq!(frame.frequency.len(), 1024);
        assert_eq!(frame.frequency[64], 255);
        assert!(frame.frequency[400] < 64, "leak {}", frame.frequency[400]);
        assert!(analyser.last_rms() > 0.6);
    }

    #[test]
    fn smoothing_decays_gradually() {
        let mut analyser = SpectrumAnalyser::with_sizes(256, 64);
        let loud = sine(32, analyser.fft_size(), 512);
        for _ in 0..4 {
            analyser.process(&loud).unwrap();
        }
        let after_silence = analyser.process(&[0.0; 512]).unwrap();
        assert!(after_silence.frequency[32] > 0);

        analyser.set_smoothing(0.0);
        let instant = analyser.process(&[0.0; 512]).unwrap();
        assert_eq!(instant.frequency[32], 0);
    }

    #[test]
    fn short_blocks_are_padded_and_tiny_blocks_rejected() {
        let mut analyser = SpectrumAnalyser::with_sizes(16, 8);
        let frame = analyser.process(&[1.0, -1.0, f32::NAN]).unwrap();
        assert_eq!(frame.waveform, vec![128, 128, 128, 128, 128, 255, 0, 128]);

        assert!(matches!(
            analyser.process(&[0.5]),
            Err(BeatSyncError::InvalidInput(_))
        ));
    }
}
