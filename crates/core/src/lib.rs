//! Core library for the Beatsync visualiser.
//!
//! The crate owns the render core: a data adapter that folds playback,
//! track analysis and live audio into one snapshot per frame, the plugin
//! contract and catalog, and the orchestrator that drives exactly one active
//! plugin through the host's animation ticks. Collaborators outside the core
//! (auth, playback, analysis fetching, preset renderers, lighting) are
//! described by the traits in [`external`]; deterministic stand-ins for all
//! of them live in [`synthetic`].

pub mod adapter;
pub mod analysis;
pub mod catalog;
pub mod config;
pub mod error;
pub mod external;
pub mod orchestrator;
pub mod plugin;
pub mod plugins;
pub mod snapshot;
pub mod surface;
pub mod synthetic;

pub use adapter::{DataAdapter, FrameInputs};
pub use analysis::SpectrumAnalyser;
pub use catalog::{ActivationTarget, PluginCatalog, PluginDescriptor, PresetDefinition};
pub use config::{AppConfig, AudioConfig, RenderConfig};
pub use error::{BeatSyncError, Result};
pub use orchestrator::{HeadlessHost, LoopState, Orchestrator, SurfaceHost, TickOutcome};
pub use plugin::{PixelPlugin, Plugin, PluginInstance, PluginKind, PluginMetadata, UiPlugin};
pub use snapshot::{FrameSnapshot, MusicAnalysis, PlaybackState, RawAudioSample, TrackInfo};
pub use surface::{DrawingContext, Layout, SurfaceGeneration};
pub use synthetic::SyntheticGenerator;
