use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use beatsync_core::{
    adapter::{DataAdapter, FrameInputs},
    catalog::{ActivationTarget, PluginCatalog},
    config::{AppConfig, AudioConfig},
    orchestrator::{HeadlessHost, Orchestrator},
    plugin::{
        ParameterSet, PixelPlugin, Plugin, PluginContext, PluginInstance, PluginKind,
        PluginMetadata, Props, UiPlugin,
    },
    snapshot::{FrameSnapshot, Interval, MusicAnalysis, PlaybackState, RawAudioSample, TrackInfo},
    surface::{DrawingContext, Layout},
    Result,
};
use proptest::prelude::*;

const IDS: [&str; 4] = ["alpha", "beta", "gamma", "deck"];

#[derive(Default)]
struct Ledger {
    events: Mutex<Vec<String>>,
    live: AtomicUsize,
    overlaps: AtomicUsize,
}

struct Tracked {
    metadata: PluginMetadata,
    params: ParameterSet,
    ledger: Arc<Ledger>,
}

impl Tracked {
    fn new(id: &str, kind: PluginKind, ledger: &Arc<Ledger>) -> Self {
        Self {
            metadata: PluginMetadata {
                id: id.to_string(),
                name: id.to_string(),
                author: "tests".to_string(),
                version: "1.0.0".to_string(),
                kind,
            },
            params: ParameterSet::empty(),
            ledger: ledger.clone(),
        }
    }
}

impl Plugin for Tracked {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn initialize(&mut self, _context: &PluginContext) -> Result<()> {
        if self.ledger.live.fetch_add(1, Ordering::SeqCst) > 0 {
            self.ledger.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.ledger
            .events
            .lock()
            .unwrap()
            .push(format!("init:{}", self.metadata.id));
        Ok(())
    }

    fn update(&mut self, _snapshot: &FrameSnapshot) -> Result<()> {
        Ok(())
    }

    fn destroy(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::SeqCst);
        self.ledger
            .events
            .lock()
            .unwrap()
            .push(format!("destroy:{}", self.metadata.id));
    }
}

impl PixelPlugin for Tracked {
    fn render(&mut self, target: &mut DrawingContext<'_>) -> Result<()> {
        target.clear([1, 2, 3, 255]);
        Ok(())
    }
}

impl UiPlugin for Tracked {
    fn component(&self) -> &str {
        "deck"
    }

    fn props(&self) -> Props {
        Props::new()
    }
}

fn catalog(ledger: &Arc<Ledger>) -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    for id in IDS.into_iter().take(3) {
        let ledger = ledger.clone();
        catalog
            .register(move || PluginInstance::pixel(Tracked::new(id, PluginKind::PixelSurface, &ledger)))
            .unwrap();
    }
    let ledger = ledger.clone();
    catalog
        .register(move || PluginInstance::ui(Tracked::new(IDS[3], PluginKind::StructuredUi, &ledger)))
        .unwrap();
    catalog
}

#[derive(Debug, Clone)]
enum Op {
    Request(usize),
    Tick(u16),
    Resize(u16, u16),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDS.len()).prop_map(Op::Request),
        (0u16..120).prop_map(Op::Tick),
        (0u16..400, 0u16..300).prop_map(|(w, h)| Op::Resize(w, h)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn latest_request_wins_and_instances_never_overlap(
        ops in prop::collection::vec(op(), 1..40),
        attach_after in 0u32..4,
    ) {
        let ledger = Arc::new(Ledger::default());
        let mut orchestrator = Orchestrator::new(
            &AppConfig::default(),
            catalog(&ledger),
            HeadlessHost::attaching_after(attach_after),
        );
        orchestrator.on_resize(Layout::new(320.0, 180.0, 1.0));

        let mut now = 0.0;
        let mut last = None;
        for op in ops {
            match op {
                Op::Request(index) => {
                    orchestrator
                        .request_activation(ActivationTarget::Plugin(IDS[index].to_string()))
                        .unwrap();
                    last = Some(index);
                }
                Op::Tick(gap) => {
                    now += f64::from(gap);
                    orchestrator.tick(now, FrameInputs::default());
                }
                Op::Resize(w, h) => {
                    orchestrator.on_resize(Layout::new(f64::from(w), f64::from(h), 1.0));
                }
            }
            prop_assert!(ledger.live.load(Ordering::SeqCst) <= 1);
            prop_assert!(orchestrator.surfaces().live() <= 2);
        }

        for _ in 0..20 {
            now += 60.0;
            orchestrator.tick(now, FrameInputs::default());
        }

        prop_assert_eq!(ledger.overlaps.load(Ordering::SeqCst), 0);
        prop_assert_eq!(orchestrator.pending_request(), None);
        if let Some(index) = last {
            prop_assert_eq!(orchestrator.active_plugin_id(), Some(IDS[index]));
            let expected_surfaces = usize::from(index < 3);
            prop_assert_eq!(orchestrator.surfaces().live(), expected_surfaces);
        }

        orchestrator.shutdown();
        prop_assert_eq!(ledger.live.load(Ordering::SeqCst), 0);

        let events = ledger.events.lock().unwrap();
        let inits = events.iter().filter(|e| e.starts_with("init")).count();
        let destroys = events.iter().filter(|e| e.starts_with("destroy")).count();
        prop_assert_eq!(inits, destroys);
    }

    #[test]
    fn snapshots_are_total(
        timestamps in prop::collection::vec(any::<f64>(), 1..6),
        frequency in prop::collection::vec(any::<u8>(), 0..64),
        waveform in prop::collection::vec(any::<u8>(), 0..64),
        playing in any::<bool>(),
        with_track in any::<bool>(),
        tempo in prop::option::of(any::<f64>()),
        beat_seconds in prop::collection::vec(-1.0f64..2.0, 0..8),
    ) {
        let config = AudioConfig {
            frequency_bins: 32,
            waveform_samples: 48,
            ..Default::default()
        };
        let mut adapter = DataAdapter::new(&config);

        let playback = PlaybackState {
            is_playing: playing,
            position_ms: 1_000,
            duration_ms: 10_000,
            track: with_track.then(|| {
                Arc::new(TrackInfo {
                    id: "t".to_string(),
                    ..Default::default()
                })
            }),
            next_tracks: Vec::new(),
        };
        let analysis = Arc::new(MusicAnalysis {
            tempo,
            beats: beat_seconds
                .iter()
                .enumerate()
                .map(|(i, duration)| Interval {
                    start: i as f64,
                    duration: *duration,
                    confidence: 1.0,
                })
                .collect(),
            ..Default::default()
        });
        let audio = RawAudioSample {
            frequency: frequency.clone(),
            waveform: waveform.clone(),
        };

        for timestamp in timestamps {
            let snapshot = adapter.build_snapshot(
                FrameInputs {
                    playback: Some(&playback),
                    analysis: Some(&analysis),
                    audio: Some(&audio),
                },
                timestamp,
                60.0,
            );

            prop_assert_eq!(
                snapshot.audio.available,
                !frequency.is_empty() && !waveform.is_empty()
            );
            if snapshot.audio.available {
                prop_assert_eq!(snapshot.audio.frequency_bins.len(), 32);
                prop_assert_eq!(snapshot.audio.waveform_samples.len(), 48);
                prop_assert!((0.0..=1.0).contains(&snapshot.audio.energy));
            } else {
                prop_assert!(snapshot.audio.frequency_bins.is_empty());
                prop_assert!(snapshot.audio.waveform_samples.is_empty());
                prop_assert_eq!(snapshot.audio.energy, 0.0);
            }
            prop_assert!(snapshot.timing.timestamp_ms.is_finite());
            prop_assert!(snapshot.timing.delta_ms >= 0.0);
            prop_assert!(snapshot.music.bpm.is_finite() && snapshot.music.bpm > 0.0);
            if snapshot.music.available {
                prop_assert!(with_track);
            }
            prop_assert_eq!(snapshot.playback.is_playing, playing);
        }
    }
}
