//! Renderer plugin contract.
//!
//! Every renderer implements [`Plugin`] plus exactly one specialisation:
//! [`PixelPlugin`] for renderers that draw into a surface, [`UiPlugin`] for
//! renderers that publish props for a host-side component. The closed
//! [`PluginInstance`] enum carries the tag, so there is no duck typing left
//! to check at runtime beyond the metadata and parameter schema.

mod params;

use serde::{Deserialize, Serialize};

use crate::{
    snapshot::FrameSnapshot,
    surface::{ContextKind, DrawingContext, PhysicalSize, SurfaceGeneration},
    BeatSyncError, Result,
};

pub use params::{ConfigMap, ParamKind, ParamSpec, ParamValue, ParameterSet};

/// Props published by a structured-UI plugin.
pub type Props = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginKind {
    PixelSurface,
    StructuredUi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub author: String,
    pub version: String,
    pub kind: PluginKind,
}

/// Host element a structured-UI plugin renders into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContainer {
    pub id: String,
}

/// Everything a plugin learns at initialisation.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Surface bound to a pixel plugin; `None` for structured-UI plugins.
    pub surface: Option<SurfaceGeneration>,
    pub size: Option<PhysicalSize>,
    pub container: Option<UiContainer>,
    pub frequency_bins: usize,
    pub waveform_samples: usize,
}

pub trait Plugin {
    fn metadata(&self) -> &PluginMetadata;
    fn parameters(&self) -> &ParameterSet;
    fn parameters_mut(&mut self) -> &mut ParameterSet;

    fn initialize(&mut self, context: &PluginContext) -> Result<()>;
    fn update(&mut self, snapshot: &FrameSnapshot) -> Result<()>;

    fn resize(&mut self, _size: PhysicalSize) -> Result<()> {
        Ok(())
    }

    fn config(&self) -> ConfigMap {
        self.parameters().values().clone()
    }

    /// Merges `patch` over the current values, clamping numbers into their
    /// declared range. Unknown names or mistyped values reject the whole
    /// patch.
    fn set_config(&mut self, patch: &ConfigMap) -> Result<()> {
        self.parameters_mut().merge(patch)
    }

    fn destroy(&mut self);
}

pub trait PixelPlugin: Plugin {
    fn context_kind(&self) -> ContextKind {
        ContextKind::TwoD
    }

    /// Draws the current state. The context is re-acquired from the surface
    /// for every call and must not be retained.
    fn render(&mut self, target: &mut DrawingContext<'_>) -> Result<()>;
}

pub trait UiPlugin: Plugin {
    /// Name of the host-side component that renders this plugin.
    fn component(&self) -> &str;
    fn props(&self) -> Props;
}

/// A live plugin, tagged by specialisation.
pub enum PluginInstance {
    Pixel(Box<dyn PixelPlugin>),
    Ui(Box<dyn UiPlugin>),
}

macro_rules! dispatch {
    ($self:expr, $plugin:ident => $call:expr) => {
        match $self {
            PluginInstance::Pixel($plugin) => $call,
            PluginInstance::Ui($plugin) => $call,
        }
    };
}

impl PluginInstance {
    pub fn pixel(plugin: impl PixelPlugin + 'static) -> Self {
        Self::Pixel(Box::new(plugin))
    }

    pub fn ui(plugin: impl UiPlugin + 'static) -> Self {
        Self::Ui(Box::new(plugin))
    }

    pub fn kind(&self) -> PluginKind {
        match self {
            Self::Pixel(_) => PluginKind::PixelSurface,
            Self::Ui(_) => PluginKind::StructuredUi,
        }
    }

    pub fn metadata(&self) -> &PluginMetadata {
        dispatch!(self, p => p.metadata())
    }

    pub fn id(&self) -> &str {
        &self.metadata().id
    }

    pub fn parameters(&self) -> &ParameterSet {
        dispatch!(self, p => p.parameters())
    }

    pub fn initialize(&mut self, context: &PluginContext) -> Result<()> {
        dispatch!(self, p => p.initialize(context))
    }

    pub fn update(&mut self, snapshot: &FrameSnapshot) -> Result<()> {
        dispatch!(self, p => p.update(snapshot))
    }

    pub fn resize(&mut self, size: PhysicalSize) -> Result<()> {
        dispatch!(self, p => p.resize(size))
    }

    pub fn config(&self) -> ConfigMap {
        dispatch!(self, p => p.config())
    }

    pub fn set_config(&mut self, patch: &ConfigMap) -> Result<()> {
        dispatch!(self, p => p.set_config(patch))
    }

    pub fn destroy(&mut self) {
        dispatch!(self, p => p.destroy())
    }

    /// Registration-time checks on metadata and parameter schema.
    pub fn validate(&self) -> Result<()> {
        let metadata = self.metadata();
        let reject = |reason: String| BeatSyncError::InvalidPlugin {
            id: metadata.id.clone(),
            reason,
        };

        if metadata.id.trim().is_empty() || metadata.id.chars().any(char::is_whitespace) {
            return Err(reject("id must be a non-empty token".to_string()));
        }
        if metadata.name.trim().is_empty() {
            return Err(reject("name is empty".to_string()));
        }
        if metadata.version.trim().is_empty() {
            return Err(reject("version is empty".to_string()));
        }
        if metadata.kind != self.kind() {
            return Err(reject(format!(
                "declared as {:?} but implements {:?}",
                metadata.kind,
                self.kind()
            )));
        }
        self.parameters().validate_schema().map_err(reject)
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        metadata: PluginMetadata,
        params: ParameterSet,
    }

    impl Dummy {
        fn new(id: &str, kind: PluginKind) -> Self {
            Self {
                metadata: PluginMetadata {
                    id: id.to_string(),
                    name: "Dummy".to_string(),
                    author: "tests".to_string(),
                    version: "1.0.0".to_string(),
                    kind,
                },
                params: ParameterSet::new(vec![ParamSpec::float("smoothing", 0.0, 1.0, 0.5)]),
            }
        }
    }

    impl Plugin for Dummy {
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
            Ok(())
        }

        fn update(&mut self, _snapshot: &FrameSnapshot) -> Result<()> {
            Ok(())
        }

        fn destroy(&mut self) {}
    }

    impl PixelPlugin for Dummy {
        fn render(&mut self, _target: &mut DrawingContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn set_config_clamps_to_schema() {
        let mut instance = PluginInstance::pixel(Dummy::new("dummy", PluginKind::PixelSurface));
        let patch = ConfigMap::from([("smoothing".to_string(), ParamValue::Float(999.0))]);
        instance.set_config(&patch).unwrap();
        assert_eq!(instance.config()["smoothing"], ParamValue::Float(1.0));
    }

    #[test]
    fn validation_checks_kind_tag() {
        let instance = PluginInstance::pixel(Dummy::new("dummy", PluginKind::StructuredUi));
        let err = instance.validate().unwrap_err();
        assert!(err.to_string().contains("dummy"));
    }

    #[test]
    fn validation_rejects_blank_ids() {
        let instance = PluginInstance::pixel(Dummy::new("  ", PluginKind::PixelSurface));
        assert!(instance.validate().is_err());
        let instance = PluginInstance::pixel(Dummy::new("two words", PluginKind::PixelSurface));
        assert!(instance.validate().is_err());
    }
}
