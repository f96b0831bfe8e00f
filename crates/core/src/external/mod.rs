//! Contracts for the collaborators that live outside the render core:
//! authentication, playback, analysis fetching, the preset renderer and
//! lighting.

mod cache;
mod lighting;

use serde::{Deserialize, Serialize};

use crate::{
    snapshot::{AudioData, MusicAnalysis, PlaybackState},
    surface::DrawingContext,
    Result,
};

pub use cache::AnalysisCache;
pub use lighting::{average_color, LightingForwarder, LightingWorker, RgbColor};

/// Bearer token handed out by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp in seconds.
    pub expires_at: u64,
}

impl AccessToken {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        now_secs >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedIn(UserIdentity),
    SignedOut,
}

pub type AuthCallback = Box<dyn Fn(&AuthState) + Send + Sync>;

pub trait AuthProvider: Send + Sync {
    fn token(&self) -> Result<AccessToken>;
    fn current_user(&self) -> Result<UserIdentity>;
    fn on_auth_state_change(&mut self, callback: AuthCallback);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(PlaybackState),
    Ready { device_id: String },
    NotReady { device_id: String },
}

pub type PlaybackListener = Box<dyn FnMut(&PlaybackEvent) + Send>;

/// Push/pull playback source: the render loop pulls `current` every tick,
/// connection logic may subscribe to events.
pub trait PlaybackSource {
    fn current(&self) -> Option<PlaybackState>;
    fn subscribe(&mut self, listener: PlaybackListener);
}

pub trait AnalysisSource: Send + Sync {
    fn fetch(&self, track_id: &str, bearer_token: &str) -> Result<MusicAnalysis>;
}

/// Compact audio-reactive control signal fed to the preset renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioSignal {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub energy: f32,
    pub beat_phase: f32,
}

impl AudioSignal {
    /// Band averages over the low, middle and top thirds of the spectrum.
    pub fn from_audio(audio: &AudioData) -> Self {
        if !audio.available {
            return Self::default();
        }
        let bins = &audio.frequency_bins;
        let third = (bins.len() / 3).max(1);
        let band = |range: &[u8]| {
            if range.is_empty() {
                0.0
            } else {
                range.iter().map(|&b| f32::from(b)).sum::<f32>() / (range.len() as f32 * 255.0)
            }
        };
        let low_end = third.min(bins.len());
        let mid_end = (2 * third).min(bins.len());
        Self {
            bass: band(&bins[..low_end]),
            mid: band(&bins[low_end..mid_end]),
            treble: band(&bins[mid_end..]),
            energy: audio.energy,
            beat_phase: 0.0,
        }
    }
}

/// Third-party preset renderer. Only ever attached to non-empty surfaces and
/// detached before its surface is reused.
pub trait PresetRenderer {
    fn attach(&mut self, width: u32, height: u32) -> Result<()>;
    fn load_preset(&mut self, name: &str, blend_seconds: f64) -> Result<()>;
    fn feed(&mut self, signal: &AudioSignal);
    fn render(&mut self, target: &mut DrawingContext<'_>) -> Result<()>;
    fn detach(&mut self);
}

pub trait LightingSink: Send {
    fn send_color(&mut self, color: RgbColor) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expiry_is_inclusive() {
        let token = AccessToken {
            access_token: "abc".to_string(),
            refresh_token: None,
            expires_at: 100,
        };
        assert!(!token.is_expired(99));
        assert!(token.is_expired(100));
    }

    #[test]
    fn signal_from_unavailable_audio_is_silent() {
        assert_eq!(AudioSignal::from_audio(&AudioData::default()), AudioSignal::default());
    }

    #[test]
    fn signal_bands_follow_spectrum() {
        let mut bins = vec![0u8; 9];
        bins[..3].fill(255);
        let audio = AudioData {
            frequency_bins: bins,
            waveform_samples: vec![128; 9],
            energy: 1.0 / 3.0,
            available: true,
        };
        let signal = AudioSignal::from_audio(&audio);
        assert_eq!(signal.bass, 1.0);
        assert_eq!(signal.mid, 0.0);
        assert_eq!(signal.treble, 0.0);
    }
}
