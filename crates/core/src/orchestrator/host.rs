use std::collections::{HashMap, HashSet};

use crate::surface::SurfaceGeneration;

/// The container that owns the visible surface nodes. Surface creation and
/// attachment happen on the host's schedule, not the render loop's.
pub trait SurfaceHost {
    /// A new surface generation was allocated and needs a node.
    fn surface_requested(&mut self, generation: SurfaceGeneration);
    /// Whether the node for `generation` is attached to the live tree.
    fn is_attached(&mut self, generation: SurfaceGeneration) -> bool;
    fn surface_released(&mut self, _generation: SurfaceGeneration) {}
}

/// Host without a real window. New surfaces attach after a fixed number of
/// readiness polls, or never when `attach_after` is `None`. Once attached a
/// surface stays attached until it is released.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    attach_after: Option<u32>,
    polls: HashMap<SurfaceGeneration, u32>,
    attached: HashSet<SurfaceGeneration>,
    requested: Vec<SurfaceGeneration>,
    released: Vec<SurfaceGeneration>,
}

impl HeadlessHost {
    /// Attaches on the first poll.
    pub fn immediate() -> Self {
        Self::attaching_after(0)
    }

    pub fn attaching_after(polls: u32) -> Self {
        Self {
            attach_after: Some(polls),
            ..Default::default()
        }
    }

    pub fn never_attaching() -> Self {
        Self::default()
    }

    pub fn set_attach_after(&mut self, polls: Option<u32>) {
        self.attach_after = polls;
    }

    pub fn requested(&self) -> &[SurfaceGeneration] {
        &self.requested
    }

    pub fn released(&self) -> &[SurfaceGeneration] {
        &self.released
    }
}

impl SurfaceHost for HeadlessHost {
    fn surface_requested(&mut self, generation: SurfaceGeneration) {
        self.requested.push(generation);
        self.polls.insert(generation, 0);
    }

    fn is_attached(&mut self, generation: SurfaceGeneration) -> bool {
        if self.attached.contains(&generation) {
            return true;
        }
        let Some(threshold) = self.attach_after else {
            return false;
        };
        match self.polls.get_mut(&generation) {
            Some(polls) if *polls >= threshold => {
                self.attached.insert(generation);
                true
            }
            Some(polls) => {
                *polls += 1;
                false
            }
            None => false,
        }
    }

    fn surface_released(&mut self, generation: SurfaceGeneration) {
        self.polls.remove(&generation);
        self.attached.remove(&generation);
        self.released.push(generation);
    }
}
