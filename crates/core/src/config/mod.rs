use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{catalog::PresetDefinition, BeatSyncError, Result};

/// Frame delta reported on the very first tick, when no prior tick exists.
pub const DEFAULT_DELTA_MS: f64 = 1000.0 / 60.0;

/// Hard ceiling on how often colours are forwarded to a lighting sink.
pub const MAX_LIGHTING_RATE_HZ: f64 = 30.0;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub render: RenderConfig,
    pub analysis: AnalysisCacheConfig,
    pub lighting: LightingConfig,
    pub presets: Vec<PresetDefinition>,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.render.validate()
    }
}

/// Buffer geometry shared by the adapter, the analyser and the synthetic
/// generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frequency_bins: usize,
    pub waveform_samples: usize,
    pub default_delta_ms: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frequency_bins: 1024,
            waveform_samples: 2048,
            default_delta_ms: DEFAULT_DELTA_MS,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frequency_bins == 0 || self.waveform_samples == 0 {
            return Err(BeatSyncError::InvalidInput(
                "audio buffers must hold at least one sample",
            ));
        }
        if !(self.default_delta_ms.is_finite() && self.default_delta_ms > 0.0) {
            return Err(BeatSyncError::InvalidInput(
                "default frame delta must be positive",
            ));
        }
        Ok(())
    }
}

/// Render loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// How many times a pending activation polls for its surface.
    pub surface_wait_attempts: u32,
    /// Minimum spacing between two readiness polls.
    pub surface_wait_delay_ms: f64,
    /// Consecutive plugin faults that deactivate the plugin.
    pub fault_threshold: u32,
    /// Window of the rolling frame counter behind the fps estimate.
    pub fps_window_ms: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            surface_wait_attempts: 10,
            surface_wait_delay_ms: 50.0,
            fault_threshold: 3,
            fps_window_ms: 1000.0,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.surface_wait_attempts == 0 {
            return Err(BeatSyncError::InvalidInput(
                "surface wait needs at least one attempt",
            ));
        }
        if !(self.surface_wait_delay_ms.is_finite() && self.surface_wait_delay_ms >= 0.0) {
            return Err(BeatSyncError::InvalidInput(
                "surface wait delay must be a non-negative duration",
            ));
        }
        if !(self.fps_window_ms.is_finite() && self.fps_window_ms > 0.0) {
            return Err(BeatSyncError::InvalidInput("fps window must be positive"));
        }
        Ok(())
    }

    /// A zero threshold would let one transient fault kill the plugin.
    pub fn effective_fault_threshold(&self) -> u32 {
        self.fault_threshold.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisCacheConfig {
    pub capacity: usize,
}

impl Default for AnalysisCacheConfig {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub max_rate_hz: f64,
    /// Only every n-th pixel is averaged when sampling the surface colour.
    pub sample_stride: usize,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            max_rate_hz: MAX_LIGHTING_RATE_HZ,
            sample_stride: 16,
        }
    }
}

impl LightingConfig {
    pub fn effective_rate_hz(&self) -> f64 {
        if self.max_rate_hz.is_finite() {
            self.max_rate_hz.clamp(1.0, MAX_LIGHTING_RATE_HZ)
        } else {
            MAX_LIGHTING_RATE_HZ
        }
    }
}
