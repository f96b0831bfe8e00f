//! Render loop orchestration.
//!
//! The [`Orchestrator`] owns the catalog, the data adapter and the surface
//! arena, and drives exactly one active plugin per tick. It is strictly
//! single-threaded: the host calls [`Orchestrator::tick`] from its animation
//! callback and [`Orchestrator::on_resize`] from its resize notification,
//! never concurrently.
//!
//! Activation is split across ticks. A request resolves its target right
//! away (configuration errors go back to the caller), but a pixel-surface
//! plugin is only instantiated once its freshly allocated surface has been
//! attached by the host. While that happens the previously active plugin
//! keeps rendering. Requests are numbered; a newer request drops any older
//! pending one, so two plugins are never started concurrently.

mod fps;
mod host;

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

use crate::{
    adapter::{DataAdapter, FrameInputs},
    catalog::{ActivationTarget, PluginCatalog, ResolvedTarget},
    config::{AppConfig, AudioConfig, RenderConfig},
    external::LightingForwarder,
    plugin::{ConfigMap, PluginContext, PluginInstance, PluginKind, Props, UiContainer},
    surface::{Layout, PhysicalSize, SurfaceArena, SurfaceGeneration},
    BeatSyncError, Result,
};

pub use fps::FpsCounter;
pub use host::{HeadlessHost, SurfaceHost};

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Loading,
    Active,
    Resizing,
    SwappingPlugin,
    Destroyed,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No plugin is active.
    Idle,
    Rendered { generation: SurfaceGeneration },
    PropsPublished,
    /// The active plugin was updated but its surface is not attached.
    SurfaceNotReady,
    /// The plugin faulted; the frame was dropped.
    Faulted { consecutive: u32 },
    /// The plugin hit the fault threshold and was torn down.
    Deactivated,
    /// The timestamp was unusable, nothing ran.
    Skipped,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeOutcome {
    /// Zero-area or oversized layout, not forwarded.
    Ignored,
    Applied(PhysicalSize),
}

/// Latest props of an active structured-UI plugin, for the host to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiFrame {
    pub plugin_id: String,
    pub component: String,
    pub props: Props,
}

#[derive(Debug)]
struct ActivePlugin {
    request: RequestId,
    plugin_id: String,
    instance: PluginInstance,
    surface: Option<SurfaceGeneration>,
    consecutive_faults: u32,
    frames: u64,
}

#[derive(Debug)]
struct PendingActivation {
    request: RequestId,
    target: ActivationTarget,
    resolved: ResolvedTarget,
    surface: SurfaceGeneration,
    attempts: u32,
    next_poll_ms: Option<f64>,
}

pub struct Orchestrator<H: SurfaceHost> {
    render: RenderConfig,
    audio: AudioConfig,
    host: H,
    catalog: PluginCatalog,
    adapter: DataAdapter,
    surfaces: SurfaceArena,
    container: UiContainer,
    layout: Layout,
    state: LoopState,
    next_request: RequestId,
    latest_request: RequestId,
    active: Option<ActivePlugin>,
    pending: Option<PendingActivation>,
    fps: FpsCounter,
    last_tick_ms: Option<f64>,
    ui_frame: Option<UiFrame>,
    lighting: Option<LightingForwarder>,
    failed_loads: u64,
}

impl<H: SurfaceHost> Orchestrator<H> {
    pub fn new(config: &AppConfig, catalog: PluginCatalog, host: H) -> Self {
        Self {
            render: config.render.clone(),
            audio: config.audio.clone(),
            host,
            catalog,
            adapter: DataAdapter::new(&config.audio),
            surfaces: SurfaceArena::new(),
            container: UiContainer {
                id: "visualizer".to_string(),
            },
            layout: Layout::default(),
            state: LoopState::Idle,
            next_request: 0,
            latest_request: 0,
            active: None,
            pending: None,
            fps: FpsCounter::new(config.render.fps_window_ms),
            last_tick_ms: None,
            ui_frame: None,
            lighting: None,
            failed_loads: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut PluginCatalog {
        &mut self.catalog
    }

    pub fn surfaces(&self) -> &SurfaceArena {
        &self.surfaces
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn fps(&self) -> f64 {
        self.fps.estimate()
    }

    pub fn latest_request(&self) -> RequestId {
        self.latest_request
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending.as_ref().map(|pending| pending.request)
    }

    pub fn active_plugin_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.plugin_id.as_str())
    }

    pub fn active_request(&self) -> Option<RequestId> {
        self.active.as_ref().map(|active| active.request)
    }

    pub fn active_surface(&self) -> Option<SurfaceGeneration> {
        self.active.as_ref().and_then(|active| active.surface)
    }

    pub fn active_frames(&self) -> u64 {
        self.active.as_ref().map_or(0, |active| active.frames)
    }

    pub fn active_config(&self) -> Option<ConfigMap> {
        self.active.as_ref().map(|active| active.instance.config())
    }

    pub fn ui_frame(&self) -> Option<&UiFrame> {
        self.ui_frame.as_ref()
    }

    pub fn failed_loads(&self) -> u64 {
        self.failed_loads
    }

    pub fn set_container(&mut self, container: UiContainer) {
        self.container = container;
    }

    pub fn attach_lighting(&mut self, forwarder: LightingForwarder) {
        self.lighting = Some(forwarder);
    }

    pub fn detach_lighting(&mut self) -> Option<LightingForwarder> {
        self.lighting.take()
    }

    /// Requests a plugin or preset. Unknown ids and invalid preset values
    /// are returned as errors; everything after resolution happens on later
    /// ticks.
    pub fn request_activation(&mut self, target: ActivationTarget) -> Result<RequestId> {
        if self.state == LoopState::Destroyed {
            return Err(BeatSyncError::msg("render loop has been destroyed"));
        }
        let resolved = self.catalog.resolve(&target)?;

        self.next_request += 1;
        let request = self.next_request;
        self.latest_request = request;

        if let Some(stale) = self.pending.take() {
            tracing::debug!(
                request = stale.request,
                superseded_by = request,
                target = %stale.target,
                "pending activation superseded"
            );
            self.release_surface(stale.surface);
        }

        tracing::info!(request, target = %target, "activation requested");
        self.set_state(LoopState::Loading);

        let kind = resolved.kind;
        match kind {
            PluginKind::StructuredUi => {
                self.complete_activation(request, &target, resolved, None);
            }
            PluginKind::PixelSurface => {
                let surface = self.surfaces.create(self.layout.physical());
                self.host.surface_requested(surface);
                tracing::debug!(request, generation = %surface, "waiting for surface");
                self.pending = Some(PendingActivation {
                    request,
                    target,
                    resolved,
                    surface,
                    attempts: 0,
                    next_poll_ms: None,
                });
            }
        }
        Ok(request)
    }

    /// Tears the active plugin down and returns to idle. Pending requests are
    /// left alone.
    pub fn deactivate(&mut self) {
        self.teardown_active();
        self.settle_state();
    }

    /// Stops everything. No further ticks or requests are accepted.
    pub fn shutdown(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.release_surface(pending.surface);
        }
        self.teardown_active();
        self.lighting = None;
        self.set_state(LoopState::Destroyed);
    }

    /// Partial configuration update for the active plugin.
    pub fn set_active_config(&mut self, patch: &ConfigMap) -> Result<()> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| BeatSyncError::msg("no active plugin"))?;
        active.instance.set_config(patch)
    }

    /// Host resize notification. Zero-area and oversized layouts are ignored
    /// so that no renderer ever sees a surface without a backing store.
    pub fn on_resize(&mut self, layout: Layout) -> ResizeOutcome {
        let Some(size) = layout.physical() else {
            if layout.is_oversized() {
                tracing::warn!(?layout, "ignoring resize beyond the surface limit");
            } else {
                tracing::debug!(?layout, "ignoring zero-area resize");
            }
            return ResizeOutcome::Ignored;
        };
        self.layout = layout;

        if let Some(pending) = &self.pending {
            if let Some(surface) = self.surfaces.get_mut(pending.surface) {
                surface.resize(size);
            }
        }

        if self.active.is_some() && self.state != LoopState::Destroyed {
            let previous = self.state;
            self.set_state(LoopState::Resizing);
            self.resize_active(size);
            if self.state == LoopState::Resizing {
                self.set_state(previous);
            }
        }
        ResizeOutcome::Applied(size)
    }

    /// Recreates the active plugin's surface under a new generation. The
    /// plugin is told the size again and draws into the new surface from the
    /// next tick on.
    pub fn replace_surface(&mut self) -> Option<SurfaceGeneration> {
        let size = self.layout.physical();
        let active = self.active.as_mut()?;
        let old = active.surface?;

        let generation = self.surfaces.create(size);
        self.host.surface_requested(generation);
        active.surface = Some(generation);
        tracing::debug!(plugin = %active.plugin_id, from = %old, to = %generation, "surface replaced");
        self.release_surface(old);

        if let Some(size) = size {
            self.resize_active(size);
        }
        Some(generation)
    }

    /// One animation frame.
    pub fn tick(&mut self, now_ms: f64, inputs: FrameInputs<'_>) -> TickOutcome {
        if self.state == LoopState::Destroyed {
            return TickOutcome::Destroyed;
        }
        if !now_ms.is_finite() || self.last_tick_ms.is_some_and(|last| now_ms < last) {
            tracing::warn!(now_ms, "skipping tick with unusable timestamp");
            return TickOutcome::Skipped;
        }
        self.last_tick_ms = Some(now_ms);
        let fps = self.fps.record(now_ms);

        self.poll_pending(now_ms);

        if self.active.is_none() {
            return TickOutcome::Idle;
        }
        let snapshot = self.adapter.build_snapshot(inputs, now_ms, fps);
        let Some(active) = self.active.as_mut() else {
            return TickOutcome::Idle;
        };

        let plugin_id = active.plugin_id.clone();
        if let Err(err) = guarded(&plugin_id, || active.instance.update(&snapshot)) {
            return self.record_fault(err);
        }

        let outcome = match &mut active.instance {
            PluginInstance::Pixel(plugin) => {
                let Some(generation) = active.surface else {
                    return self.record_fault(BeatSyncError::Surface(
                        "pixel plugin has no surface".to_string(),
                    ));
                };
                if !self.host.is_attached(generation) {
                    return TickOutcome::SurfaceNotReady;
                }
                let Some(surface) = self.surfaces.get_mut(generation) else {
                    tracing::error!(plugin = %plugin_id, generation = %generation, "stale surface generation");
                    self.teardown_active();
                    self.settle_state();
                    return TickOutcome::Deactivated;
                };
                let kind = plugin.context_kind();
                let rendered = guarded(&plugin_id, || {
                    let mut target = surface.context(kind)?;
                    plugin.render(&mut target)
                });
                if let Err(err) = rendered {
                    return self.record_fault(err);
                }
                if let Some(lighting) = self.lighting.as_mut() {
                    lighting.offer(now_ms, surface.pixels());
                }
                TickOutcome::Rendered { generation }
            }
            PluginInstance::Ui(plugin) => {
                let frame = guarded(&plugin_id, || {
                    Ok(UiFrame {
                        plugin_id: plugin_id.clone(),
                        component: plugin.component().to_string(),
                        props: plugin.props(),
                    })
                });
                match frame {
                    Ok(frame) => self.ui_frame = Some(frame),
                    Err(err) => return self.record_fault(err),
                }
                TickOutcome::PropsPublished
            }
        };

        if let Some(active) = self.active.as_mut() {
            active.consecutive_faults = 0;
            active.frames += 1;
        }
        outcome
    }

    fn poll_pending(&mut self, now_ms: f64) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if pending.next_poll_ms.is_some_and(|next| now_ms < next) {
            return;
        }
        pending.attempts += 1;

        let generation = pending.surface;
        let has_area = self
            .surfaces
            .get(generation)
            .and_then(|surface| surface.size())
            .is_some();
        let ready = has_area && self.host.is_attached(generation);

        if ready {
            if let Some(pending) = self.pending.take() {
                tracing::debug!(
                    request = pending.request,
                    attempts = pending.attempts,
                    generation = %generation,
                    "surface ready"
                );
                self.complete_activation(
                    pending.request,
                    &pending.target,
                    pending.resolved,
                    Some(generation),
                );
            }
            return;
        }

        if pending.attempts >= self.render.surface_wait_attempts {
            let request = pending.request;
            let target = pending.target.clone();
            let attempts = pending.attempts;
            self.pending = None;
            self.failed_loads += 1;
            tracing::error!(request, target = %target, attempts, "surface never became ready; load abandoned");
            self.release_surface(generation);
            self.settle_state();
        } else {
            pending.next_poll_ms = Some(now_ms + self.render.surface_wait_delay_ms);
        }
    }

    /// Whether `request` may still start. Activation never yields between
    /// the surface wait and the start of the plugin, so a single check here
    /// covers every stage; `request_activation` drops superseded pending
    /// work before it can reach this point.
    fn is_current(&mut self, request: RequestId, surface: Option<SurfaceGeneration>) -> bool {
        if request == self.latest_request {
            return true;
        }
        tracing::debug!(request, latest = self.latest_request, "stale activation abandoned");
        if let Some(surface) = surface {
            self.release_surface(surface);
        }
        false
    }

    fn complete_activation(
        &mut self,
        request: RequestId,
        target: &ActivationTarget,
        resolved: ResolvedTarget,
        surface: Option<SurfaceGeneration>,
    ) {
        if !self.is_current(request, surface) {
            return;
        }

        let size = self.layout.physical();
        if let (Some(generation), Some(size)) = (surface, size) {
            if let Some(surface) = self.surfaces.get_mut(generation) {
                if surface.size() != Some(size) {
                    surface.resize(size);
                }
            }
        }

        self.set_state(LoopState::SwappingPlugin);
        self.teardown_active();

        let context = PluginContext {
            surface,
            size: surface
                .and_then(|generation| self.surfaces.get(generation))
                .and_then(|surface| surface.size()),
            container: (resolved.kind == PluginKind::StructuredUi).then(|| self.container.clone()),
            frequency_bins: self.audio.frequency_bins,
            waveform_samples: self.audio.waveform_samples,
        };
        let Some(instance) =
            self.catalog
                .create_instance(&resolved.plugin_id, &context, resolved.config.as_ref())
        else {
            self.failed_loads += 1;
            tracing::error!(request, target = %target, "activation failed; leaving the surface blank");
            if let Some(surface) = surface {
                self.release_surface(surface);
            }
            self.settle_state();
            return;
        };

        self.adapter.reset();
        tracing::info!(request, plugin = %resolved.plugin_id, "plugin active");
        self.active = Some(ActivePlugin {
            request,
            plugin_id: resolved.plugin_id,
            instance,
            surface,
            consecutive_faults: 0,
            frames: 0,
        });
        self.settle_state();
    }

    fn resize_active(&mut self, size: PhysicalSize) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Some(surface) = active.surface.and_then(|generation| self.surfaces.get_mut(generation)) {
            surface.resize(size);
        }
        let plugin_id = active.plugin_id.clone();
        if let Err(err) = guarded(&plugin_id, || active.instance.resize(size)) {
            self.record_fault(err);
        }
    }

    fn record_fault(&mut self, err: BeatSyncError) -> TickOutcome {
        let threshold = self.render.effective_fault_threshold();
        let Some(active) = self.active.as_mut() else {
            return TickOutcome::Idle;
        };
        active.consecutive_faults += 1;
        let consecutive = active.consecutive_faults;
        tracing::warn!(plugin = %active.plugin_id, consecutive, error = %err, "plugin fault");

        if consecutive >= threshold {
            tracing::error!(plugin = %active.plugin_id, consecutive, "fault threshold reached; deactivating plugin");
            self.teardown_active();
            self.settle_state();
            TickOutcome::Deactivated
        } else {
            TickOutcome::Faulted { consecutive }
        }
    }

    /// Synchronous teardown: destroy, then drop the surface and with it any
    /// context the plugin acquired.
    fn teardown_active(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        tracing::debug!(plugin = %active.plugin_id, request = active.request, "tearing down plugin");
        if catch_unwind(AssertUnwindSafe(|| active.instance.destroy())).is_err() {
            tracing::error!(plugin = %active.plugin_id, "plugin panicked during destroy");
        }
        if let Some(surface) = active.surface {
            self.release_surface(surface);
        }
        self.ui_frame = None;
    }

    fn release_surface(&mut self, generation: SurfaceGeneration) {
        if self.surfaces.release(generation) {
            self.host.surface_released(generation);
        }
    }

    fn settle_state(&mut self) {
        let next = if self.pending.is_some() {
            LoopState::Loading
        } else if self.active.is_some() {
            LoopState::Active
        } else {
            LoopState::Idle
        };
        self.set_state(next);
    }

    fn set_state(&mut self, next: LoopState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "render loop state");
            self.state = next;
        }
    }
}

impl<H: SurfaceHost + std::fmt::Debug> std::fmt::Debug for Orchestrator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("active", &self.active_plugin_id())
            .field("pending", &self.pending_request())
            .field("layout", &self.layout)
            .field("host", &self.host)
            .finish()
    }
}

/// Runs a plugin call, turning panics into plugin faults.
fn guarded<T>(plugin_id: &str, call: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(_) => Err(BeatSyncError::plugin(plugin_id, "panicked")),
    }
}
