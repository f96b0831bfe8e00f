use crate::{
    external::{AudioSignal, PresetRenderer},
    plugin::{
        ConfigMap, ParamSpec, ParameterSet, PixelPlugin, Plugin, PluginContext, PluginKind,
        PluginMetadata,
    },
    snapshot::{FrameSnapshot, DEFAULT_BPM},
    surface::{ContextKind, DrawingContext, PhysicalSize},
    synthetic::BeatSignal,
    BeatSyncError, Result,
};

use super::builtin_metadata;

pub const DEFAULT_BLEND_SECONDS: f64 = 2.0;

/// Hosts a third-party preset renderer on a GPU surface. The renderer is fed
/// every frame: real spectrum bands while audio is available, a beat-locked
/// synthetic signal otherwise.
pub struct PresetBridge<R: PresetRenderer> {
    metadata: PluginMetadata,
    params: ParameterSet,
    renderer: R,
    attached: Option<PhysicalSize>,
    loaded: Option<String>,
    beat: BeatSignal,
    signal: AudioSignal,
}

impl<R: PresetRenderer> PresetBridge<R> {
    /// `presets` must not be empty; the first entry is the default.
    pub fn new(id: &str, name: &str, renderer: R, presets: &[&str]) -> Self {
        let default = presets.first().copied().unwrap_or_default();
        Self {
            metadata: builtin_metadata(id, name, PluginKind::PixelSurface),
            params: ParameterSet::new(vec![
                ParamSpec::choice("preset", presets, default).with_label("Preset"),
                ParamSpec::float("blend", 0.0, 10.0, DEFAULT_BLEND_SECONDS).with_label("Blend (s)"),
            ]),
            renderer,
            attached: None,
            loaded: None,
            beat: BeatSignal::new(DEFAULT_BPM),
            signal: AudioSignal::default(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn signal(&self) -> AudioSignal {
        self.signal
    }

    pub fn loaded_preset(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    fn bind(&mut self, size: PhysicalSize) -> Result<()> {
        if self.attached.is_some() {
            self.renderer.detach();
            self.attached = None;
        }
        self.renderer.attach(size.width, size.height)?;
        self.attached = Some(size);
        self.loaded = None;
        self.sync_preset()
    }

    fn sync_preset(&mut self) -> Result<()> {
        if self.attached.is_none() {
            return Ok(());
        }
        let wanted = self.params.text("preset");
        if self.loaded.as_deref() == Some(wanted) {
            return Ok(());
        }
        let blend = if self.loaded.is_some() {
            self.params.float("blend")
        } else {
            0.0
        };
        let wanted = wanted.to_string();
        self.renderer.load_preset(&wanted, blend)?;
        tracing::debug!(preset = %wanted, blend, "preset loaded");
        self.loaded = Some(wanted);
        Ok(())
    }
}

impl<R: PresetRenderer> Plugin for PresetBridge<R> {
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
        match context.size {
            Some(size) => self.bind(size),
            None => Err(BeatSyncError::plugin(
                &self.metadata.id,
                "preset renderer needs a sized surface",
            )),
        }
    }

    fn update(&mut self, snapshot: &FrameSnapshot) -> Result<()> {
        let timestamp = snapshot.timing.timestamp_ms;
        self.signal = if snapshot.audio.available {
            let mut signal = AudioSignal::from_audio(&snapshot.audio);
            signal.beat_phase = snapshot
                .music
                .beat_at(snapshot.playback.position_ms)
                .map_or(0.0, |(_, phase)| phase as f32);
            signal
        } else {
            self.beat.set_bpm(snapshot.music.bpm);
            // No playback source at all still keeps the preset moving.
            let running = snapshot.playback.is_playing || snapshot.playback.track.is_none();
            self.beat.sample(timestamp, running)
        };
        self.renderer.feed(&self.signal);
        Ok(())
    }

    fn resize(&mut self, size: PhysicalSize) -> Result<()> {
        if self.attached == Some(size) {
            return Ok(());
        }
        self.bind(size)
    }

    fn set_config(&mut self, patch: &ConfigMap) -> Result<()> {
        self.params.merge(patch)?;
        self.sync_preset()
    }

    fn destroy(&mut self) {
        if self.attached.take().is_some() {
            self.renderer.detach();
        }
        self.loaded = None;
    }
}

impl<R: PresetRenderer> PixelPlugin for PresetBridge<R> {
    fn context_kind(&self) -> ContextKind {
        ContextKind::Gpu
    }

    fn render(&mut self, target: &mut DrawingContext<'_>) -> Result<()> {
        if self.attached.is_none() {
            return Err(BeatSyncError::plugin(&self.metadata.id, "renderer not attached"));
        }
        self.renderer.render(target)
    }
}

impl<R: PresetRenderer> std::fmt::Debug for PresetBridge<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresetBridge")
            .field("id", &self.metadata.id)
            .field("attached", &self.attached)
            .field("loaded", &self.loaded)
            .finish()
    }
}

/// Preset names understood by [`PulseRenderer`].
pub const PULSE_PRESETS: [&str; 3] = ["aurora", "ember", "tide"];

/// Small software stand-in for an external preset renderer: a colour wash
/// that breathes with the energy, plus a bass meter along the bottom edge.
#[derive(Debug, Default)]
pub struct PulseRenderer {
    size: Option<(u32, u32)>,
    palette: [f32; 3],
    target_palette: [f32; 3],
    blend_frames: f32,
    signal: AudioSignal,
}

impl PulseRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.size.is_some()
    }

    fn palette_for(name: &str) -> Option<[f32; 3]> {
        match name {
            "aurora" => Some([60.0, 220.0, 170.0]),
            "ember" => Some([240.0, 90.0, 30.0]),
            "tide" => Some([40.0, 110.0, 240.0]),
            _ => None,
        }
    }
}

impl PresetRenderer for PulseRenderer {
    fn attach(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(BeatSyncError::Surface("cannot attach to an empty surface".to_string()));
        }
        self.size = Some((width, height));
        Ok(())
    }

    fn load_preset(&mut self, name: &str, blend_seconds: f64) -> Result<()> {
        let palette = Self::palette_for(name)
            .ok_or_else(|| BeatSyncError::msg(format!("unknown pulse preset `{name}`")))?;
        self.target_palette = palette;
        // Blends are counted in frames at a nominal 60 fps.
        self.blend_frames = (blend_seconds.max(0.0) * 60.0) as f32;
        if self.blend_frames < 1.0 {
            self.palette = palette;
        }
        Ok(())
    }

    fn feed(&mut self, signal: &AudioSignal) {
        self.signal = *signal;
    }

    fn render(&mut self, target: &mut DrawingContext<'_>) -> Result<()> {
        if self.size.is_none() {
            return Err(BeatSyncError::Surface("renderer is detached".to_string()));
        }
        if self.blend_frames >= 1.0 {
            for (current, wanted) in self.palette.iter_mut().zip(self.target_palette) {
                *current += (wanted - *current) / self.blend_frames;
            }
            self.blend_frames -= 1.0;
        }

        let level = 0.2 + 0.8 * self.signal.energy.clamp(0.0, 1.0);
        let wash = self.palette.map(|channel| (channel * level) as u8);
        target.clear([wash[0], wash[1], wash[2], 255]);

        let (width, height) = (target.width(), target.height());
        let meter = (self.signal.bass.clamp(0.0, 1.0) * width as f32) as u32;
        let band = (height / 16).max(1);
        target.fill_rect(0, height - band, meter, band, [255, 255, 255, 255]);
        Ok(())
    }

    fn detach(&mut self) {
        self.size = None;
    }
}
