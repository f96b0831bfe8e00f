use std::{f32::consts::TAU, path::PathBuf, sync::Arc};

use beatsync_core::{
    adapter::{DataAdapter, FrameInputs},
    catalog::{ActivationTarget, PluginCatalog},
    external::{AnalysisCache, LightingSink, LightingWorker, PlaybackSource, RgbColor},
    orchestrator::{HeadlessHost, Orchestrator, TickOutcome},
    plugins::{self, SPECTRUM_BARS_ID},
    snapshot::{MusicAnalysis, TrackInfo},
    surface::Layout,
    synthetic::{OfflineAuth, SimulatedPlayback, SyntheticAnalysisSource, SyntheticGenerator},
    AppConfig, SpectrumAnalyser,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEMO_TRACK_MS: u64 = 180_000;

fn main() -> beatsync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plugin,
            preset,
            frames,
            fps,
            bpm,
            config,
        } => {
            let target = match (preset, plugin) {
                (Some(preset), _) => ActivationTarget::Preset(preset),
                (None, Some(plugin)) => ActivationTarget::Plugin(plugin),
                (None, None) => ActivationTarget::Plugin(SPECTRUM_BARS_ID.to_string()),
            };
            let config = load_config(config.as_ref())?;
            run(&config, target, frames, fps, bpm)
        }
        Commands::Plugins { config } => list_plugins(&load_config(config.as_ref())?),
        Commands::Mock { bpm, timestamp } => print_mock(bpm, timestamp),
    }
}

fn load_config(path: Option<&PathBuf>) -> beatsync_core::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn build_catalog(config: &AppConfig) -> beatsync_core::Result<PluginCatalog> {
    let mut catalog = PluginCatalog::new();
    plugins::register_builtins(&mut catalog)?;
    for preset in &config.presets {
        catalog.register_preset(preset.clone())?;
    }
    Ok(catalog)
}

fn run(
    config: &AppConfig,
    target: ActivationTarget,
    frames: u32,
    fps: f64,
    bpm: f64,
) -> beatsync_core::Result<()> {
    tracing::info!(%target, frames, fps, bpm, "starting headless run");

    let catalog = build_catalog(config)?;
    let mut orchestrator = Orchestrator::new(config, catalog, HeadlessHost::attaching_after(1));
    orchestrator.on_resize(Layout::new(960.0, 540.0, 1.0));

    let (forwarder, worker) = LightingWorker::spawn(&config.lighting, Box::new(LogSink::default()))?;
    orchestrator.attach_lighting(forwarder);

    let generator = SyntheticGenerator::new(&config.audio);
    let source = SyntheticAnalysisSource::new(generator.clone(), DEMO_TRACK_MS, bpm);
    let auth = OfflineAuth::new("local");
    let cache = AnalysisCache::new(config.analysis.capacity);
    let mut playback = SimulatedPlayback::new(TrackInfo {
        id: "demo-track".to_string(),
        name: "Demo Track".to_string(),
        artists: vec!["Beatsync".to_string()],
        album: None,
        duration_ms: DEMO_TRACK_MS,
    });
    let mut analyser = SpectrumAnalyser::new(&config.audio);
    let block = analyser.fft_size();

    orchestrator.request_activation(target)?;

    let frame_ms = 1000.0 / fps.max(1.0);
    let mut summary = RunSummary::default();
    for frame in 0..frames {
        let now = f64::from(frame) * frame_ms;
        playback.advance(now as u64);
        let state = playback.current();

        let analysis: Option<Arc<MusicAnalysis>> = state
            .as_ref()
            .and_then(|state| state.track_id())
            .and_then(|id| match cache.fetch(id, &auth, &source) {
                Ok(analysis) => Some(analysis),
                Err(err) => {
                    tracing::warn!(error = %err, "continuing without analysis");
                    None
                }
            });

        let pcm = synth_block(now, bpm, config.audio.sample_rate, block);
        let real = match analyser.process(&pcm) {
            Ok(sample) => Some(sample),
            Err(err) => {
                tracing::warn!(error = %err, "analyser rejected block");
                None
            }
        };
        let is_playing = state.as_ref().is_some_and(|state| state.is_playing);
        let audio = generator.fallback_audio(real.as_ref(), now, bpm, is_playing);

        let outcome = orchestrator.tick(
            now,
            FrameInputs {
                playback: state.as_ref(),
                analysis: analysis.as_ref(),
                audio: Some(&*audio),
            },
        );
        summary.record(outcome);
    }

    tracing::info!(
        state = ?orchestrator.state(),
        active = orchestrator.active_plugin_id().unwrap_or("none"),
        rendered = summary.rendered,
        published = summary.published,
        waiting = summary.waiting,
        faults = summary.faults,
        fps = orchestrator.fps(),
        analysis_fetches = source.fetches(),
        "run finished"
    );

    if let Some(forwarder) = orchestrator.detach_lighting() {
        tracing::debug!(dropped = forwarder.dropped(), "lighting colours dropped");
    }
    orchestrator.shutdown();
    worker.join()
}

fn list_plugins(config: &AppConfig) -> beatsync_core::Result<()> {
    let catalog = build_catalog(config)?;
    let presets: Vec<_> = catalog.presets().cloned().collect();
    let listing = json!({
        "plugins": catalog.list(),
        "presets": presets,
    });
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

fn print_mock(bpm: f64, timestamp: f64) -> beatsync_core::Result<()> {
    let config = AppConfig::default();
    let generator = SyntheticGenerator::new(&config.audio);
    let mut adapter = DataAdapter::new(&config.audio);
    let audio = generator.audio_frame(timestamp, bpm, true);

    let snapshot = adapter.build_snapshot(
        FrameInputs {
            audio: Some(&audio),
            ..Default::default()
        },
        timestamp,
        0.0,
    );
    let bass = &snapshot.audio.frequency_bins[generator.bass_bins()];
    let bass_level = bass.iter().map(|&b| f64::from(b)).sum::<f64>() / (bass.len() as f64 * 255.0);

    let report = json!({
        "timestamp_ms": timestamp,
        "bpm": bpm,
        "beat_phase": beatsync_core::synthetic::beat_phase(timestamp, bpm),
        "energy": snapshot.audio.energy,
        "bass": bass_level,
        "frequency_bins": snapshot.audio.frequency_bins.len(),
        "waveform_samples": snapshot.audio.waveform_samples.len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Kick on every beat over a steady tone, as mono PCM.
fn synth_block(now_ms: f64, bpm: f64, sample_rate: u32, len: usize) -> Vec<f32> {
    let rate = sample_rate.max(1) as f32;
    let envelope = beatsync_core::synthetic::beat_envelope(now_ms, bpm) as f32;
    (0..len)
        .map(|i| {
            let t = now_ms as f32 / 1000.0 + i as f32 / rate;
            0.6 * envelope * (TAU * 60.0 * t).sin() + 0.2 * (TAU * 440.0 * t).sin()
        })
        .collect()
}

#[derive(Debug, Default)]
struct RunSummary {
    rendered: u32,
    published: u32,
    waiting: u32,
    faults: u32,
}

impl RunSummary {
    fn record(&mut self, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Rendered { .. } => self.rendered += 1,
            TickOutcome::PropsPublished => self.published += 1,
            TickOutcome::Idle | TickOutcome::SurfaceNotReady => self.waiting += 1,
            TickOutcome::Faulted { .. } | TickOutcome::Deactivated => self.faults += 1,
            TickOutcome::Skipped | TickOutcome::Destroyed => {}
        }
    }
}

/// Lighting sink that only logs; stands in for a network bulb.
#[derive(Debug, Default)]
struct LogSink {
    sent: u64,
}

impl LightingSink for LogSink {
    fn send_color(&mut self, color: RgbColor) -> beatsync_core::Result<()> {
        self.sent += 1;
        tracing::trace!(sent = self.sent, r = color.r, g = color.g, b = color.b, "lighting colour");
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronised music visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the render loop headlessly with synthetic playback and audio.
    Run {
        /// Plugin to activate.
        #[arg(long, conflicts_with = "preset")]
        plugin: Option<String>,
        /// Preset to activate instead of a bare plugin.
        #[arg(long)]
        preset: Option<String>,
        /// Number of frames to simulate.
        #[arg(long, default_value_t = 600)]
        frames: u32,
        /// Simulated display refresh rate.
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
        /// Tempo of the synthetic track.
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the registered plugins and presets as JSON.
    Plugins {
        /// JSON configuration file with extra presets.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print a synthetic frame summary as JSON.
    Mock {
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        /// Timestamp in milliseconds.
        #[arg(long, default_value_t = 0.0)]
        timestamp: f64,
    },
}
