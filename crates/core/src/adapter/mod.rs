//! Unified data adapter: folds the latest upstream values into one
//! [`FrameSnapshot`] per tick.

use std::sync::Arc;

use crate::{
    config::AudioConfig,
    snapshot::{
        AudioData, FrameSnapshot, MusicAnalysis, MusicData, PlaybackData, PlaybackState,
        RawAudioSample, TimingData, DEFAULT_BPM,
    },
};

/// Waveform byte that represents a zero-amplitude sample.
pub const WAVEFORM_SILENCE: u8 = 128;

/// Borrowed view of whatever the producers published most recently. Any
/// source may be missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInputs<'a> {
    pub playback: Option<&'a PlaybackState>,
    pub analysis: Option<&'a Arc<MusicAnalysis>>,
    pub audio: Option<&'a RawAudioSample>,
}

#[derive(Debug)]
pub struct DataAdapter {
    frequency_bins: usize,
    waveform_samples: usize,
    default_delta_ms: f64,
    last_timestamp: Option<f64>,
    empty_analysis: Arc<MusicAnalysis>,
}

impl DataAdapter {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            frequency_bins: config.frequency_bins,
            waveform_samples: config.waveform_samples,
            default_delta_ms: config.default_delta_ms,
            last_timestamp: None,
            empty_analysis: Arc::default(),
        }
    }

    pub fn frequency_bins(&self) -> usize {
        self.frequency_bins
    }

    pub fn waveform_samples(&self) -> usize {
        self.waveform_samples
    }

    /// Forgets the previous timestamp so the next snapshot reports the
    /// default delta again.
    pub fn reset(&mut self) {
        self.last_timestamp = None;
    }

    pub fn build_snapshot(
        &mut self,
        inputs: FrameInputs<'_>,
        timestamp_ms: f64,
        fps_estimate: f64,
    ) -> FrameSnapshot {
        let playback = inputs.playback;
        FrameSnapshot {
            audio: self.audio(inputs.audio),
            music: self.music(playback, inputs.analysis),
            playback: playback.map(playback_data).unwrap_or_default(),
            timing: self.timing(timestamp_ms, fps_estimate),
        }
    }

    fn timing(&mut self, timestamp_ms: f64, fps_estimate: f64) -> TimingData {
        let timestamp_ms = if timestamp_ms.is_finite() {
            timestamp_ms
        } else {
            self.last_timestamp.unwrap_or(0.0)
        };

        let delta_ms = match self.last_timestamp {
            Some(previous) => (timestamp_ms - previous).max(0.0),
            None => self.default_delta_ms,
        };
        self.last_timestamp = Some(timestamp_ms);

        TimingData {
            timestamp_ms,
            delta_ms,
            fps: if fps_estimate.is_finite() {
                fps_estimate.max(0.0)
            } else {
                0.0
            },
        }
    }

    fn audio(&self, sample: Option<&RawAudioSample>) -> AudioData {
        let Some(sample) = sample.filter(|sample| sample.is_available()) else {
            return AudioData::default();
        };

        let frequency_bins = fit(&sample.frequency, self.frequency_bins, 0);
        let waveform_samples = fit(&sample.waveform, self.waveform_samples, WAVEFORM_SILENCE);
        let energy = mean_energy(&frequency_bins);

        AudioData {
            frequency_bins,
            waveform_samples,
            energy,
            available: true,
        }
    }

    fn music(
        &self,
        playback: Option<&PlaybackState>,
        analysis: Option<&Arc<MusicAnalysis>>,
    ) -> MusicData {
        let has_track = playback.and_then(PlaybackState::track_id).is_some();
        let analysis = analysis.filter(|analysis| {
            valid_tempo(analysis.tempo).is_some() || !analysis.beats.is_empty()
        });

        match analysis {
            Some(analysis) if has_track => MusicData::available(derive_bpm(analysis), analysis.clone()),
            _ => MusicData::unavailable(self.empty_analysis.clone()),
        }
    }
}

fn playback_data(state: &PlaybackState) -> PlaybackData {
    PlaybackData {
        is_playing: state.is_playing,
        position_ms: state.position_ms,
        duration_ms: state.duration_ms,
        track: state.track.clone(),
    }
}

/// Truncates or pads `source` to exactly `len` entries.
fn fit(source: &[u8], len: usize, pad: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    out.extend(source.iter().copied().take(len));
    out.resize(len, pad);
    out
}

pub(crate) fn mean_energy(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u64 = bins.iter().map(|&bin| u64::from(bin)).sum();
    (sum as f64 / bins.len() as f64 / 255.0).clamp(0.0, 1.0) as f32
}

fn valid_tempo(tempo: Option<f64>) -> Option<f64> {
    tempo.filter(|tempo| tempo.is_finite() && *tempo > 0.0)
}

fn derive_bpm(analysis: &MusicAnalysis) -> f64 {
    if let Some(tempo) = valid_tempo(analysis.tempo) {
        return tempo;
    }

    let durations: Vec<f64> = analysis
        .beats
        .iter()
        .map(|beat| beat.duration)
        .filter(|duration| duration.is_finite() && *duration > 0.0)
        .collect();
    if durations.is_empty() {
        return DEFAULT_BPM;
    }
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    let bpm = 60.0 / mean;
    if bpm.is_finite() {
        bpm
    } else {
        DEFAULT_BPM
    }
}
