use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    external::{
        AccessToken, AnalysisSource, AuthCallback, AuthProvider, AuthState, PlaybackEvent,
        PlaybackListener, PlaybackSource, UserIdentity,
    },
    snapshot::{MusicAnalysis, PlaybackState, TrackInfo},
    BeatSyncError, Result,
};

use super::SyntheticGenerator;

/// Plays a single synthetic track on a loop, driven by the caller's clock.
pub struct SimulatedPlayback {
    state: PlaybackState,
    listeners: Vec<PlaybackListener>,
}

impl SimulatedPlayback {
    pub fn new(track: TrackInfo) -> Self {
        let duration_ms = track.duration_ms;
        Self {
            state: PlaybackState {
                is_playing: false,
                position_ms: 0,
                duration_ms,
                track: Some(Arc::new(track)),
                next_tracks: Vec::new(),
            },
            listeners: Vec::new(),
        }
    }

    /// Moves the playhead to `elapsed_ms` (wrapping at the track end) and
    /// starts playback.
    pub fn advance(&mut self, elapsed_ms: u64) {
        let position_ms = match self.state.duration_ms {
            0 => elapsed_ms,
            duration => elapsed_ms % duration,
        };
        let changed = !self.state.is_playing || position_ms < self.state.position_ms;
        self.state.is_playing = true;
        self.state.position_ms = position_ms;
        if changed {
            self.notify();
        }
    }

    pub fn pause(&mut self) {
        if self.state.is_playing {
            self.state.is_playing = false;
            self.notify();
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    fn notify(&mut self) {
        let event = PlaybackEvent::StateChanged(self.state.clone());
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}

impl PlaybackSource for SimulatedPlayback {
    fn current(&self) -> Option<PlaybackState> {
        Some(self.state.clone())
    }

    fn subscribe(&mut self, mut listener: PlaybackListener) {
        listener(&PlaybackEvent::Ready {
            device_id: "simulated".to_string(),
        });
        self.listeners.push(listener);
    }
}

impl std::fmt::Debug for SimulatedPlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPlayback")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Analysis source that generates beat grids instead of calling a web API.
#[derive(Debug)]
pub struct SyntheticAnalysisSource {
    generator: SyntheticGenerator,
    duration_ms: u64,
    bpm: f64,
    fetches: AtomicUsize,
}

impl SyntheticAnalysisSource {
    pub fn new(generator: SyntheticGenerator, duration_ms: u64, bpm: f64) -> Self {
        Self {
            generator,
            duration_ms,
            bpm,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl AnalysisSource for SyntheticAnalysisSource {
    fn fetch(&self, track_id: &str, bearer_token: &str) -> Result<MusicAnalysis> {
        if bearer_token.is_empty() {
            return Err(BeatSyncError::msg("missing bearer token"));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(track = track_id, bpm = self.bpm, "generating synthetic analysis");
        Ok(self.generator.analysis(self.duration_ms, self.bpm))
    }
}

/// Auth provider for offline sessions: always signed in as a local user.
pub struct OfflineAuth {
    user: UserIdentity,
    callbacks: Vec<AuthCallback>,
}

impl OfflineAuth {
    pub fn new(user_id: &str) -> Self {
        Self {
            user: UserIdentity {
                id: user_id.to_string(),
                display_name: None,
            },
            callbacks: Vec::new(),
        }
    }
}

impl AuthProvider for OfflineAuth {
    fn token(&self) -> Result<AccessToken> {
        Ok(AccessToken {
            access_token: format!("offline-{}", self.user.id),
            refresh_token: None,
            expires_at: u64::MAX,
        })
    }

    fn current_user(&self) -> Result<UserIdentity> {
        Ok(self.user.clone())
    }

    fn on_auth_state_change(&mut self, callback: AuthCallback) {
        callback(&AuthState::SignedIn(self.user.clone()));
        self.callbacks.push(callback);
    }
}

impl std::fmt::Debug for OfflineAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineAuth").field("user", &self.user).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::external::AnalysisCache;

    fn track() -> TrackInfo {
        TrackInfo {
            id: "sim-1".to_string(),
            name: "Simulated".to_string(),
            duration_ms: 10_000,
            ..Default::default()
        }
    }

    #[test]
    fn playback_wraps_and_notifies() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut playback = SimulatedPlayback::new(track());
        playback.subscribe(Box::new(move |event| sink.lock().unwrap().push(event.clone())));

        playback.advance(4_000);
        playback.advance(6_000);
        playback.advance(12_500);
        playback.pause();

        let state = playback.current().unwrap();
        assert_eq!(state.position_ms, 2_500);
        assert!(!state.is_playing);
        assert_eq!(state.track_id(), Some("sim-1"));
        // ready, start, wrap, pause
        assert_eq!(events.lock().unwrap().len(), 4);
    }

    #[test]
    fn cache_fetches_synthetic_analysis_once() {
        let source = SyntheticAnalysisSource::new(SyntheticGenerator::with_sizes(8, 8), 20_000, 90.0);
        let auth = OfflineAuth::new("local");
        let cache = AnalysisCache::new(4);

        let first = cache.fetch("sim-1", &auth, &source).unwrap();
        let second = cache.fetch("sim-1", &auth, &source).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.tempo, Some(90.0));
        assert_eq!(source.fetches(), 1);
    }
}
