//! Deterministic placeholder audio and analysis data.
//!
//! Everything here is a pure function of its arguments: pseudo-random detail
//! is seeded from the timestamp being generated, never from system entropy,
//! so two calls with the same inputs produce identical bytes.

mod sources;

use std::{borrow::Cow, f64::consts::TAU};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    adapter::WAVEFORM_SILENCE,
    config::AudioConfig,
    external::AudioSignal,
    snapshot::{Interval, MusicAnalysis, RawAudioSample, Section, Segment, DEFAULT_BPM, VECTOR_WIDTH},
};

pub use sources::{OfflineAuth, SimulatedPlayback, SyntheticAnalysisSource};

const BEATS_PER_BAR: usize = 4;
const BARS_PER_SECTION: usize = 8;
const JITTER: f64 = 6.0;

/// Tempo range the generator accepts; anything outside is clamped.
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;
/// Longest track the generator will lay a beat grid over.
const MAX_ANALYSIS_MS: u64 = 6 * 60 * 60 * 1000;

/// Position inside the current beat, in 0..1.
pub fn beat_phase(timestamp_ms: f64, bpm: f64) -> f64 {
    let beats = timestamp_ms.max(0.0) * sanitize_bpm(bpm) / 60_000.0;
    beats.fract()
}

/// Sawtooth envelope that peaks on the beat and decays until the next one.
pub fn beat_envelope(timestamp_ms: f64, bpm: f64) -> f64 {
    (1.0 - beat_phase(timestamp_ms, bpm)).powi(2)
}

fn sanitize_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm.clamp(MIN_BPM, MAX_BPM)
    } else {
        DEFAULT_BPM
    }
}

fn seed_for(timestamp_ms: f64, bpm: f64) -> u64 {
    timestamp_ms.to_bits() ^ bpm.to_bits().rotate_left(17)
}

fn to_byte(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    frequency_bins: usize,
    waveform_samples: usize,
}

impl SyntheticGenerator {
    pub fn new(config: &AudioConfig) -> Self {
        Self::with_sizes(config.frequency_bins, config.waveform_samples)
    }

    pub fn with_sizes(frequency_bins: usize, waveform_samples: usize) -> Self {
        Self {
            frequency_bins,
            waveform_samples,
        }
    }

    /// Frequency and waveform buffers shaped like analyser output. A paused
    /// player yields silent buffers of the same size.
    pub fn audio_frame(&self, timestamp_ms: f64, bpm: f64, is_playing: bool) -> RawAudioSample {
        if !is_playing {
            return RawAudioSample {
                frequency: vec![0; self.frequency_bins],
                waveform: vec![WAVEFORM_SILENCE; self.waveform_samples],
            };
        }

        RawAudioSample {
            frequency: self.frequency(timestamp_ms, bpm),
            waveform: self.waveform(timestamp_ms, bpm),
        }
    }

    /// Real audio wins whenever it is present; otherwise a synthetic frame
    /// is generated in its place.
    pub fn fallback_audio<'a>(
        &self,
        real: Option<&'a RawAudioSample>,
        timestamp_ms: f64,
        bpm: f64,
        is_playing: bool,
    ) -> Cow<'a, RawAudioSample> {
        match real {
            Some(sample) if sample.is_available() => Cow::Borrowed(sample),
            _ => Cow::Owned(self.audio_frame(timestamp_ms, bpm, is_playing)),
        }
    }

    /// Range of bins treated as bass by the generator.
    pub fn bass_bins(&self) -> std::ops::Range<usize> {
        0..(self.frequency_bins / 16).max(1).min(self.frequency_bins)
    }

    fn frequency(&self, timestamp_ms: f64, bpm: f64) -> Vec<u8> {
        let bpm = sanitize_bpm(bpm);
        let bins = self.frequency_bins;
        let bass_end = self.bass_bins().end;
        let mid_end = (bins / 2).max(bass_end);

        let pulse = beat_envelope(timestamp_ms, bpm);
        // Mids ride eighth notes, highs sixteenths, each with its own decay.
        let mid_env = 1.0 - beat_phase(timestamp_ms, bpm * 2.0);
        let high_env = (-4.0 * beat_phase(timestamp_ms, bpm * 4.0)).exp();

        let mut rng = StdRng::seed_from_u64(seed_for(timestamp_ms, bpm));
        let mut out = Vec::with_capacity(bins);
        for i in 0..bins {
            let position = i as f64 / bins as f64;
            let value = if i < bass_end {
                let falloff = 1.0 - 0.4 * (i as f64 / bass_end as f64);
                255.0 * (0.25 + 0.75 * pulse) * falloff
            } else if i < mid_end {
                let wobble = 0.5 + 0.5 * (timestamp_ms * 0.0021 + i as f64 * 0.09).sin();
                let level = 255.0 * (0.1 + 0.25 * wobble + 0.2 * mid_env) * (1.0 - 0.6 * position);
                level + rng.random_range(-JITTER..JITTER)
            } else {
                let shimmer = 0.5 + 0.5 * (timestamp_ms * 0.0067 + i as f64 * 0.21).sin();
                let level = 255.0 * (0.04 + 0.12 * shimmer + 0.15 * high_env) * (1.0 - 0.8 * position);
                level + rng.random_range(-JITTER..JITTER)
            };
            out.push(to_byte(value));
        }
        out
    }

    fn waveform(&self, timestamp_ms: f64, bpm: f64) -> Vec<u8> {
        let samples = self.waveform_samples;
        let amplitude = 40.0 + 80.0 * beat_envelope(timestamp_ms, bpm);
        (0..samples)
            .map(|j| {
                let x = j as f64 / samples as f64;
                let carrier = (TAU * 3.0 * x + timestamp_ms * 0.01).sin() * 0.7
                    + (TAU * 11.0 * x + timestamp_ms * 0.023).sin() * 0.3;
                to_byte(f64::from(WAVEFORM_SILENCE) + amplitude * carrier)
            })
            .collect()
    }

    /// Beat, bar, segment and section lists covering `duration_ms` at `bpm`.
    /// Both are clamped to the generator's supported range.
    pub fn analysis(&self, duration_ms: u64, bpm: f64) -> MusicAnalysis {
        let bpm = sanitize_bpm(bpm);
        let total = duration_ms.min(MAX_ANALYSIS_MS) as f64 / 1000.0;
        let beat = 60.0 / bpm;

        let beats = intervals(total, beat, |index| if index % BEATS_PER_BAR == 0 { 1.0 } else { 0.6 });
        let bars = intervals(total, beat * BEATS_PER_BAR as f64, |_| 0.8);
        let segments = intervals(total, beat / 2.0, |_| 0.5)
            .into_iter()
            .map(|slot| synthetic_segment(slot, bpm))
            .collect();
        let sections = intervals(total, beat * (BEATS_PER_BAR * BARS_PER_SECTION) as f64, |_| 1.0)
            .into_iter()
            .map(|slot| {
                let mut rng = StdRng::seed_from_u64(seed_for(slot.start * 1000.0, bpm));
                Section {
                    start: slot.start,
                    duration: slot.duration,
                    key: rng.random_range(0..12),
                    mode: rng.random_range(0..2),
                    time_signature: BEATS_PER_BAR as u32,
                    tempo: bpm,
                }
            })
            .collect();

        MusicAnalysis {
            tempo: Some(bpm),
            beats,
            bars,
            segments,
            sections,
        }
    }
}

fn intervals(total: f64, step: f64, confidence: impl Fn(usize) -> f64) -> Vec<Interval> {
    let mut out = Vec::new();
    if step.is_nan() || step <= 0.0 {
        return out;
    }
    let mut index = 0;
    loop {
        let start = index as f64 * step;
        if start >= total {
            break;
        }
        out.push(Interval {
            start,
            duration: step.min(total - start),
            confidence: confidence(index),
        });
        index += 1;
    }
    out
}

fn synthetic_segment(slot: Interval, bpm: f64) -> Segment {
    let mut rng = StdRng::seed_from_u64(seed_for(slot.start * 1000.0, bpm));
    let loudness_max = rng.random_range(-18.0..-4.0);

    let mut timbre = [0.0; VECTOR_WIDTH];
    timbre[0] = 60.0 + loudness_max;
    for value in timbre.iter_mut().skip(1) {
        *value = rng.random_range(-50.0..50.0);
    }

    let mut pitches = [0.0; VECTOR_WIDTH];
    for value in pitches.iter_mut() {
        *value = rng.random_range(0.0..0.8);
    }
    pitches[rng.random_range(0..VECTOR_WIDTH)] = 1.0;

    Segment {
        start: slot.start,
        duration: slot.duration,
        confidence: slot.confidence,
        loudness_start: loudness_max - rng.random_range(3.0..12.0),
        loudness_max,
        timbre,
        pitches,
    }
}

/// Beat-locked control signal for renderers that need something driving
/// them even when no real analysis node exists.
#[derive(Debug, Clone, Copy)]
pub struct BeatSignal {
    bpm: f64,
}

impl Default for BeatSignal {
    fn default() -> Self {
        Self { bpm: DEFAULT_BPM }
    }
}

impl BeatSignal {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm: sanitize_bpm(bpm),
        }
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = sanitize_bpm(bpm);
    }

    pub fn sample(&self, timestamp_ms: f64, is_playing: bool) -> AudioSignal {
        if !is_playing {
            return AudioSignal::default();
        }
        let pulse = beat_envelope(timestamp_ms, self.bpm) as f32;
        let mid = (1.0 - beat_phase(timestamp_ms, self.bpm * 2.0)) as f32;
        let treble = (-4.0 * beat_phase(timestamp_ms, self.bpm * 4.0)).exp() as f32;
        AudioSignal {
            bass: pulse,
            mid: 0.3 + 0.4 * mid,
            treble: 0.2 + 0.3 * treble,
            energy: (0.5 * pulse + 0.3 * mid + 0.2 * treble).clamp(0.0, 1.0),
            beat_phase: beat_phase(timestamp_ms, self.bpm) as f32,
        }
    }
}
