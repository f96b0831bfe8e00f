use crate::{
    plugin::{ParamSpec, ParameterSet, PixelPlugin, Plugin, PluginContext, PluginKind, PluginMetadata},
    snapshot::FrameSnapshot,
    surface::DrawingContext,
    Result,
};

use super::{builtin_metadata, SPECTRUM_BARS_ID};

pub const BACKGROUND: [u8; 4] = [12, 12, 18, 255];

/// Classic bar spectrum over the frequency bins.
#[derive(Debug)]
pub struct SpectrumBars {
    metadata: PluginMetadata,
    params: ParameterSet,
    levels: Vec<f32>,
    available: bool,
}

impl Default for SpectrumBars {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumBars {
    pub fn new() -> Self {
        Self {
            metadata: builtin_metadata(SPECTRUM_BARS_ID, "Spectrum Bars", PluginKind::PixelSurface),
            params: ParameterSet::new(vec![
                ParamSpec::int("bars", 8, 256, 64).with_label("Bars"),
                ParamSpec::float("smoothing", 0.0, 1.0, 0.7).with_label("Smoothing"),
                ParamSpec::float("gain", 0.0, 4.0, 1.0).with_label("Gain"),
                ParamSpec::boolean("mirror", false).with_label("Mirror"),
            ]),
            levels: Vec::new(),
            available: false,
        }
    }

    /// Current bar heights in 0..=1.
    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    fn bar_count(&self) -> usize {
        self.params.int("bars").max(1) as usize
    }
}

impl Plugin for SpectrumBars {
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
        self.levels = vec![0.0; self.bar_count()];
        Ok(())
    }

    fn update(&mut self, snapshot: &FrameSnapshot) -> Result<()> {
        let bars = self.bar_count();
        if self.levels.len() != bars {
            self.levels.resize(bars, 0.0);
        }

        let audio = &snapshot.audio;
        self.available = audio.available && !audio.frequency_bins.is_empty();
        if !self.available {
            self.levels.iter_mut().for_each(|level| *level = 0.0);
            return Ok(());
        }

        let smoothing = self.params.float("smoothing") as f32;
        let gain = self.params.float("gain") as f32;
        let bins = &audio.frequency_bins;
        for (index, level) in self.levels.iter_mut().enumerate() {
            let start = index * bins.len() / bars;
            let end = ((index + 1) * bins.len() / bars).clamp(start + 1, bins.len());
            let slice = &bins[start..end];
            let mean = slice.iter().map(|&b| f32::from(b)).sum::<f32>() / slice.len() as f32;
            let target = (mean / 255.0 * gain).clamp(0.0, 1.0);
            *level = smoothing * *level + (1.0 - smoothing) * target;
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.levels.clear();
        self.available = false;
    }
}

impl PixelPlugin for SpectrumBars {
    fn render(&mut self, target: &mut DrawingContext<'_>) -> Result<()> {
        target.clear(BACKGROUND);
        if !self.available || self.levels.is_empty() {
            return Ok(());
        }

        let (width, height) = (target.width(), target.height());
        let count = self.levels.len() as u32;
        let bar_width = (width / count).max(1);
        let gap = u32::from(bar_width > 2);
        let mirror = self.params.flag("mirror");

        for (index, level) in self.levels.iter().enumerate() {
            let bar_height = (level * height as f32).round() as u32;
            if bar_height == 0 {
                continue;
            }
            let x = index as u32 * width / count;
            let y = if mirror {
                (height - bar_height) / 2
            } else {
                height - bar_height
            };
            target.fill_rect(x, y, bar_width - gap, bar_height, bar_color(index, self.levels.len()));
        }
        Ok(())
    }
}

fn bar_color(index: usize, count: usize) -> [u8; 4] {
    let t = index as f32 / count.max(1) as f32;
    [
        (40.0 + 200.0 * t) as u8,
        (200.0 - 120.0 * t) as u8,
        (255.0 - 60.0 * t) as u8,
        255,
    ]
}
