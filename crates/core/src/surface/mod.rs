//! Drawing surfaces owned by the render loop.
//!
//! Surfaces live in an arena keyed by [`SurfaceGeneration`]. Replacing a
//! surface always allocates a new generation, so a plugin can never inherit
//! the drawing context another plugin left behind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BeatSyncError, Result};

pub const BYTES_PER_PIXEL: usize = 4;
/// Largest surface the arena will back with pixels (8192 x 8192).
pub const MAX_SURFACE_PIXELS: u64 = 8192 * 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurfaceGeneration(u64);

impl SurfaceGeneration {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SurfaceGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host container size in layout units plus the device pixel density.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub width: f64,
    pub height: f64,
    pub density: f64,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            density: 1.0,
        }
    }
}

impl Layout {
    pub fn new(width: f64, height: f64, density: f64) -> Self {
        Self {
            width,
            height,
            density,
        }
    }

    /// Physical pixel size, or `None` while the layout has no area or is
    /// larger than [`MAX_SURFACE_PIXELS`].
    pub fn physical(&self) -> Option<PhysicalSize> {
        Some(self.scaled()).filter(PhysicalSize::is_drawable)
    }

    /// Whether the layout has an area but too many pixels to back.
    pub fn is_oversized(&self) -> bool {
        let size = self.scaled();
        size.width > 0 && size.height > 0 && !size.is_drawable()
    }

    fn scaled(&self) -> PhysicalSize {
        let density = if self.density.is_finite() && self.density > 0.0 {
            self.density
        } else {
            1.0
        };
        let scale = |value: f64| {
            if value.is_finite() && value > 0.0 {
                (value * density).round().min(f64::from(u32::MAX)) as u32
            } else {
                0
            }
        };
        PhysicalSize {
            width: scale(self.width),
            height: scale(self.height),
            density,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub width: u32,
    pub height: u32,
    pub density: f64,
}

impl PhysicalSize {
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Non-empty and within [`MAX_SURFACE_PIXELS`].
    pub fn is_drawable(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixel_count() <= MAX_SURFACE_PIXELS
    }

    fn byte_len(&self) -> Option<usize> {
        if !self.is_drawable() {
            return None;
        }
        usize::try_from(self.pixel_count())
            .ok()?
            .checked_mul(BYTES_PER_PIXEL)
    }
}

/// Kind of drawing context a plugin asks for. A surface hands out one kind
/// for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    TwoD,
    Gpu,
}

#[derive(Debug)]
pub struct Surface {
    generation: SurfaceGeneration,
    size: Option<PhysicalSize>,
    pixels: Vec<u8>,
    context: Option<ContextKind>,
}

impl Surface {
    fn new(generation: SurfaceGeneration, size: Option<PhysicalSize>) -> Self {
        let mut surface = Self {
            generation,
            size: None,
            pixels: Vec::new(),
            context: None,
        };
        if let Some(size) = size {
            surface.resize(size);
        }
        surface
    }

    pub fn generation(&self) -> SurfaceGeneration {
        self.generation
    }

    pub fn size(&self) -> Option<PhysicalSize> {
        self.size
    }

    pub fn context_kind(&self) -> Option<ContextKind> {
        self.context
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Reallocates the backing store; contents are cleared, the context kind
    /// is kept. A size that is not drawable leaves the surface without area.
    pub fn resize(&mut self, size: PhysicalSize) {
        self.pixels.clear();
        match size.byte_len() {
            Some(len) => {
                self.pixels.resize(len, 0);
                self.size = Some(size);
            }
            None => {
                tracing::warn!(
                    generation = %self.generation,
                    width = size.width,
                    height = size.height,
                    "surface size not drawable; dropping backing store"
                );
                self.pixels.shrink_to_fit();
                self.size = None;
            }
        }
    }

    /// Acquires a drawing context of `kind`. Fails if the surface has no
    /// area yet or already handed out a different kind.
    pub fn context(&mut self, kind: ContextKind) -> Result<DrawingContext<'_>> {
        let size = self.size.ok_or_else(|| {
            BeatSyncError::Surface(format!("surface {} has no area", self.generation))
        })?;
        match self.context {
            Some(existing) if existing != kind => {
                return Err(BeatSyncError::Surface(format!(
                    "surface {} already bound to a {existing:?} context",
                    self.generation
                )))
            }
            _ => self.context = Some(kind),
        }
        Ok(DrawingContext {
            kind,
            width: size.width,
            height: size.height,
            pixels: &mut self.pixels,
        })
    }
}

/// Short-lived handle onto a surface's pixels, valid for one render call.
#[derive(Debug)]
pub struct DrawingContext<'a> {
    kind: ContextKind,
    width: u32,
    height: u32,
    pixels: &'a mut [u8],
}

impl DrawingContext<'_> {
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &*self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut *self.pixels
    }

    pub fn clear(&mut self, rgba: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.copy_from_slice(&rgba);
        }
    }

    /// Fills the rectangle, clipped to the surface bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y.min(y_end)..y_end {
            let start = (row as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
            let end = (row as usize * self.width as usize + x_end as usize) * BYTES_PER_PIXEL;
            if start >= end {
                continue;
            }
            for pixel in self.pixels[start..end].chunks_exact_mut(BYTES_PER_PIXEL) {
                pixel.copy_from_slice(&rgba);
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let mut out = [0; 4];
        out.copy_from_slice(&self.pixels[offset..offset + BYTES_PER_PIXEL]);
        Some(out)
    }
}

/// Arena of live surfaces indexed by generation.
#[derive(Debug, Default)]
pub struct SurfaceArena {
    next_generation: u64,
    slots: BTreeMap<SurfaceGeneration, Surface>,
}

impl SurfaceArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh surface under a new, strictly larger generation.
    pub fn create(&mut self, size: Option<PhysicalSize>) -> SurfaceGeneration {
        self.next_generation += 1;
        let generation = SurfaceGeneration(self.next_generation);
        self.slots.insert(generation, Surface::new(generation, size));
        generation
    }

    pub fn get(&self, generation: SurfaceGeneration) -> Option<&Surface> {
        self.slots.get(&generation)
    }

    pub fn get_mut(&mut self, generation: SurfaceGeneration) -> Option<&mut Surface> {
        self.slots.get_mut(&generation)
    }

    /// Drops the surface and with it any context it handed out.
    pub fn release(&mut self, generation: SurfaceGeneration) -> bool {
        self.slots.remove(&generation).is_some()
    }

    pub fn latest(&self) -> Option<SurfaceGeneration> {
        self.slots.keys().next_back().copied()
    }

    pub fn live(&self) -> usize {
        self.slots.len()
    }
}
