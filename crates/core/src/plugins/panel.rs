use serde_json::Value;

use crate::{
    plugin::{ParamSpec, ParameterSet, Plugin, PluginContext, PluginKind, PluginMetadata, Props, UiPlugin},
    snapshot::FrameSnapshot,
    synthetic::beat_envelope,
    Result,
};

use super::{builtin_metadata, TRACK_PANEL_ID};

pub const COMPONENT: &str = "track-panel";

/// Now-playing panel rendered by the host's component tree.
#[derive(Debug)]
pub struct TrackPanel {
    metadata: PluginMetadata,
    params: ParameterSet,
    title: Option<String>,
    artists: Vec<String>,
    is_playing: bool,
    progress: f64,
    pulse: f64,
    section: Option<usize>,
}

impl Default for TrackPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackPanel {
    pub fn new() -> Self {
        Self {
            metadata: builtin_metadata(TRACK_PANEL_ID, "Track Panel", PluginKind::StructuredUi),
            params: ParameterSet::new(vec![
                ParamSpec::choice("accent", &["beat", "bar"], "beat").with_label("Pulse on"),
            ]),
            title: None,
            artists: Vec::new(),
            is_playing: false,
            progress: 0.0,
            pulse: 0.0,
            section: None,
        }
    }

    fn accent_pulse(&self, snapshot: &FrameSnapshot) -> f64 {
        let playback = &snapshot.playback;
        if !playback.is_playing {
            return 0.0;
        }
        let music = &snapshot.music;
        if music.available {
            let located = match self.params.text("accent") {
                "bar" => music.bar_at(playback.position_ms),
                _ => music.beat_at(playback.position_ms),
            };
            return located.map_or(0.0, |(_, phase)| (1.0 - phase).powi(2));
        }
        // A four-beat bar is a beat at a quarter of the clock rate.
        let timestamp = match self.params.text("accent") {
            "bar" => snapshot.timing.timestamp_ms / 4.0,
            _ => snapshot.timing.timestamp_ms,
        };
        beat_envelope(timestamp, music.bpm)
    }
}

impl Plugin for TrackPanel {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn initialize(&mut self, context: &PluginContext) -> Result<()> {
        if context.container.is_none() {
            tracing::debug!("track panel initialised without a container");
        }
        Ok(())
    }

    fn update(&mut self, snapshot: &FrameSnapshot) -> Result<()> {
        let playback = &snapshot.playback;
        self.title = playback.track.as_ref().map(|track| track.name.clone());
        self.artists = playback
            .track
            .as_ref()
            .map(|track| track.artists.clone())
            .unwrap_or_default();
        self.is_playing = playback.is_playing;
        self.progress = if playback.duration_ms > 0 {
            (playback.position_ms as f64 / playback.duration_ms as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.pulse = self.accent_pulse(snapshot);
        self.section = snapshot
            .music
            .available
            .then(|| snapshot.music.section_at(playback.position_ms))
            .flatten();
        Ok(())
    }

    fn destroy(&mut self) {
        self.title = None;
        self.artists.clear();
    }
}

impl UiPlugin for TrackPanel {
    fn component(&self) -> &str {
        COMPONENT
    }

    fn props(&self) -> Props {
        let mut props = Props::new();
        props.insert("title".to_string(), self.title.clone().into());
        props.insert("artists".to_string(), self.artists.clone().into());
        props.insert("isPlaying".to_string(), Value::Bool(self.is_playing));
        props.insert("progress".to_string(), self.progress.into());
        props.insert("beatPulse".to_string(), self.pulse.into());
        props.insert("sectionIndex".to_string(), self.section.into());
        props
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        adapter::{DataAdapter, FrameInputs},
        config::AudioConfig,
        snapshot::{PlaybackState, TrackInfo},
        synthetic::SyntheticGenerator,
    };

    fn playback(position_ms: u64) -> PlaybackState {
        PlaybackState {
            is_playing: true,
            position_ms,
            duration_ms: 200_000,
            track: Some(Arc::new(TrackInfo {
                id: "track-1".to_string(),
                name: "Night Drive".to_string(),
                artists: vec!["Ana".to_string(), "Bo".to_string()],
                ..Default::default()
            })),
            next_tracks: Vec::new(),
        }
    }

    #[test]
    fn props_describe_current_track() {
        let mut adapter = DataAdapter::new(&AudioConfig::default());
        let analysis = Arc::new(SyntheticGenerator::new(&AudioConfig::default()).analysis(200_000, 120.0));
        let state = playback(50_000);
        let snapshot = adapter.build_snapshot(
            FrameInputs {
                playback: Some(&state),
                analysis: Some(&analysis),
                audio: None,
            },
            1_000.0,
            60.0,
        );

        let mut panel = TrackPanel::new();
        panel.update(&snapshot).unwrap();
        let props = panel.props();

        assert_eq!(props["title"], "Night Drive");
        assert_eq!(props["artists"], serde_json::json!(["Ana", "Bo"]));
        assert_eq!(props["progress"], 0.25);
        assert_eq!(props["isPlaying"], true);
        // 50 s at 120 bpm lands exactly on a beat.
        assert_eq!(props["beatPulse"], 1.0);
        assert_eq!(props["sectionIndex"], 3);
    }

    #[test]
    fn empty_snapshot_gives_neutral_props() {
        let mut panel = TrackPanel::new();
        panel.update(&FrameSnapshot::default()).unwrap();
        let props = panel.props();

        assert!(props["title"].is_null());
        assert_eq!(props["progress"], 0.0);
        assert_eq!(props["beatPulse"], 0.0);
        assert!(props["sectionIndex"].is_null());
    }
}
