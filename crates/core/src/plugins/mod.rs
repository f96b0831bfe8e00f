//! Built-in plugins shipped with the core.

mod panel;
mod preset;
mod spectrum;

use crate::{
    catalog::{PluginCatalog, PresetDefinition},
    plugin::{ConfigMap, ParamValue, PluginInstance, PluginKind, PluginMetadata},
    Result,
};

pub use panel::{TrackPanel, COMPONENT as TRACK_PANEL_COMPONENT};
pub use preset::{PresetBridge, PulseRenderer, DEFAULT_BLEND_SECONDS, PULSE_PRESETS};
pub use spectrum::{SpectrumBars, BACKGROUND as SPECTRUM_BACKGROUND};

pub const SPECTRUM_BARS_ID: &str = "spectrum-bars";
pub const TRACK_PANEL_ID: &str = "track-panel";
pub const PULSE_ID: &str = "pulse";

pub(crate) fn builtin_metadata(id: &str, name: &str, kind: PluginKind) -> PluginMetadata {
    PluginMetadata {
        id: id.to_string(),
        name: name.to_string(),
        author: "Beatsync Team".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        kind,
    }
}

/// Registers every built-in plugin plus a couple of stock presets.
pub fn register_builtins(catalog: &mut PluginCatalog) -> Result<()> {
    catalog.register(|| PluginInstance::pixel(SpectrumBars::new()))?;
    catalog.register(|| PluginInstance::ui(TrackPanel::new()))?;
    catalog.register(|| {
        PluginInstance::pixel(PresetBridge::new(
            PULSE_ID,
            "Pulse",
            PulseRenderer::new(),
            &PULSE_PRESETS,
        ))
    })?;

    catalog.register_preset(PresetDefinition {
        id: "mirror-bars".to_string(),
        plugin_id: SPECTRUM_BARS_ID.to_string(),
        name: Some("Mirrored bars".to_string()),
        config: ConfigMap::from([
            ("mirror".to_string(), ParamValue::Bool(true)),
            ("bars".to_string(), ParamValue::Int(96)),
        ]),
    })?;
    catalog.register_preset(PresetDefinition {
        id: "ember".to_string(),
        plugin_id: PULSE_ID.to_string(),
        name: Some("Ember".to_string()),
        config: ConfigMap::from([("preset".to_string(), ParamValue::Text("ember".to_string()))]),
    })?;

    tracing::debug!(plugins = catalog.list().len(), "built-in plugins registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::FrameInputs,
        catalog::ActivationTarget,
        config::AppConfig,
        orchestrator::{HeadlessHost, LoopState, Orchestrator, TickOutcome},
        snapshot::PlaybackState,
        surface::Layout,
        synthetic::SyntheticGenerator,
    };

    fn orchestrator() -> Orchestrator<HeadlessHost> {
        let mut catalog = PluginCatalog::new();
        register_builtins(&mut catalog).unwrap();
        let mut orchestrator =
            Orchestrator::new(&AppConfig::default(), catalog, HeadlessHost::immediate());
        orchestrator.on_resize(Layout::new(120.0, 60.0, 1.0));
        orchestrator
    }

    #[test]
    fn builtins_register_and_validate() {
        let mut catalog = PluginCatalog::new();
        register_builtins(&mut catalog).unwrap();
        let ids: Vec<_> = catalog.list().into_iter().map(|d| d.metadata.id).collect();
        assert_eq!(ids, vec![PULSE_ID, SPECTRUM_BARS_ID, TRACK_PANEL_ID]);
        for preset in ["mirror-bars", "ember"] {
            catalog
                .resolve(&ActivationTarget::Preset(preset.to_string()))
                .unwrap();
        }
    }

    #[test]
    fn idle_startup_renders_neutral_bars() {
        let mut orchestrator = orchestrator();
        orchestrator
            .request_activation(ActivationTarget::Plugin(SPECTRUM_BARS_ID.to_string()))
            .unwrap();

        for k in 0..3 {
            let outcome = orchestrator.tick(k as f64 * 16.0, FrameInputs::default());
            assert!(matches!(outcome, TickOutcome::Rendered { .. }), "{outcome:?}");
        }
        assert_eq!(orchestrator.state(), LoopState::Active);

        let generation = orchestrator.active_surface().unwrap();
        let pixels = orchestrator.surfaces().get(generation).unwrap().pixels();
        assert!(pixels.chunks(4).all(|pixel| pixel == SPECTRUM_BACKGROUND));
    }

    #[test]
    fn synthetic_audio_drives_bars() {
        let mut orchestrator = orchestrator();
        orchestrator
            .request_activation(ActivationTarget::Preset("mirror-bars".to_string()))
            .unwrap();
        let generator = SyntheticGenerator::new(&AppConfig::default().audio);
        let playback = PlaybackState {
            is_playing: true,
            ..Default::default()
        };

        for k in 0..10 {
            let now = k as f64 * 16.0;
            let audio = generator.audio_frame(now, 120.0, true);
            orchestrator.tick(
                now,
                FrameInputs {
                    playback: Some(&playback),
                    analysis: None,
                    audio: Some(&audio),
                },
            );
        }

        let generation = orchestrator.active_surface().unwrap();
        let pixels = orchestrator.surfaces().get(generation).unwrap().pixels();
        assert!(pixels.chunks(4).any(|pixel| pixel != SPECTRUM_BACKGROUND));
        assert_eq!(orchestrator.active_config().unwrap()["mirror"], ParamValue::Bool(true));
    }

    #[test]
    fn pulse_and_panel_swap_cleanly() {
        let mut orchestrator = orchestrator();
        orchestrator
            .request_activation(ActivationTarget::Preset("ember".to_string()))
            .unwrap();
        assert!(matches!(
            orchestrator.tick(0.0, FrameInputs::default()),
            TickOutcome::Rendered { .. }
        ));

        orchestrator
            .request_activation(ActivationTarget::Plugin(TRACK_PANEL_ID.to_string()))
            .unwrap();
        assert_eq!(orchestrator.surfaces().live(), 0);
        assert_eq!(
            orchestrator.tick(16.0, FrameInputs::default()),
            TickOutcome::PropsPublished
        );
        assert_eq!(
            orchestrator.ui_frame().unwrap().component,
            TRACK_PANEL_COMPONENT
        );
    }
}
