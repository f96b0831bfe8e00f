//! Per-frame data model shared by the adapter, the synthetic generator and
//! every plugin.
//!
//! Inputs (`PlaybackState`, `MusicAnalysis`, `RawAudioSample`) are whatever
//! the upstream producers last published. The [`FrameSnapshot`] is the
//! immutable, fully-defaulted view built from them once per tick.

use std::{cmp::Ordering, sync::Arc};

use serde::{Deserialize, Serialize};

/// Tempo reported while no analysis is available.
pub const DEFAULT_BPM: f64 = 120.0;

/// Width of the timbre and pitch vectors carried by every segment.
pub const VECTOR_WIDTH: usize = 12;

/// A timed interval of the analysis (beat, bar or tatum). Times are seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
}

impl Interval {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn contains(&self, seconds: f64) -> bool {
        seconds >= self.start && seconds < self.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub loudness_start: f64,
    #[serde(default)]
    pub loudness_max: f64,
    #[serde(default)]
    pub timbre: [f64; VECTOR_WIDTH],
    #[serde(default)]
    pub pitches: [f64; VECTOR_WIDTH],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub key: i32,
    #[serde(default)]
    pub mode: i32,
    #[serde(default = "default_time_signature")]
    pub time_signature: u32,
    #[serde(default)]
    pub tempo: f64,
}

fn default_time_signature() -> u32 {
    4
}

/// Precomputed analysis of one track, as returned by the analysis source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicAnalysis {
    pub tempo: Option<f64>,
    pub beats: Vec<Interval>,
    pub bars: Vec<Interval>,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
}

/// Identity and display metadata of a track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Latest state published by the playback source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub track: Option<Arc<TrackInfo>>,
    pub next_tracks: Vec<Arc<TrackInfo>>,
}

impl PlaybackState {
    pub fn track_id(&self) -> Option<&str> {
        self.track
            .as_deref()
            .map(|track| track.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Raw byte buffers produced by an audio-analysis provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAudioSample {
    pub frequency: Vec<u8>,
    pub waveform: Vec<u8>,
}

impl RawAudioSample {
    pub fn is_available(&self) -> bool {
        !self.frequency.is_empty() && !self.waveform.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioData {
    pub frequency_bins: Vec<u8>,
    pub waveform_samples: Vec<u8>,
    /// Mean bin magnitude normalised to 0..=1.
    pub energy: f32,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MusicData {
    pub bpm: f64,
    pub available: bool,
    analysis: Arc<MusicAnalysis>,
}

impl Default for MusicData {
    fn default() -> Self {
        Self::unavailable(Arc::default())
    }
}

impl MusicData {
    pub(crate) fn unavailable(empty: Arc<MusicAnalysis>) -> Self {
        Self {
            bpm: DEFAULT_BPM,
            available: false,
            analysis: empty,
        }
    }

    pub(crate) fn available(bpm: f64, analysis: Arc<MusicAnalysis>) -> Self {
        Self {
            bpm,
            available: true,
            analysis,
        }
    }

    pub fn beat_intervals(&self) -> &[Interval] {
        &self.analysis.beats
    }

    pub fn bar_intervals(&self) -> &[Interval] {
        &self.analysis.bars
    }

    pub fn segments(&self) -> &[Segment] {
        &self.analysis.segments
    }

    pub fn sections(&self) -> &[Section] {
        &self.analysis.sections
    }

    /// Index of the beat that contains `position_ms`, with the progress
    /// through it in 0..1.
    pub fn beat_at(&self, position_ms: u64) -> Option<(usize, f64)> {
        locate(self.beat_intervals(), position_ms)
    }

    pub fn bar_at(&self, position_ms: u64) -> Option<(usize, f64)> {
        locate(self.bar_intervals(), position_ms)
    }

    pub fn section_at(&self, position_ms: u64) -> Option<usize> {
        let seconds = position_ms as f64 / 1000.0;
        self.sections()
            .iter()
            .position(|section| seconds >= section.start && seconds < section.start + section.duration)
    }
}

fn locate(intervals: &[Interval], position_ms: u64) -> Option<(usize, f64)> {
    let seconds = position_ms as f64 / 1000.0;
    let index = match intervals
        .binary_search_by(|interval| interval.start.partial_cmp(&seconds).unwrap_or(Ordering::Equal))
    {
        Ok(index) => index,
        Err(0) => return None,
        Err(index) => index - 1,
    };
    let interval = intervals.get(index)?;
    if !interval.contains(seconds) || interval.duration <= 0.0 {
        return None;
    }
    Some((index, (seconds - interval.start) / interval.duration))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackData {
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub track: Option<Arc<TrackInfo>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingData {
    pub timestamp_ms: f64,
    pub delta_ms: f64,
    pub fps: f64,
}

/// The immutable per-frame aggregate handed to the active plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameSnapshot {
    pub audio: AudioData,
    pub music: MusicData,
    pub playback: PlaybackData,
    pub timing: TimingData,
}
