use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    plugin::{ConfigMap, ParamSpec, ParameterSet, PluginContext, PluginInstance, PluginKind, PluginMetadata},
    BeatSyncError, Result,
};

/// Builds a fresh, uninitialised plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> PluginInstance + Send + Sync>;

/// Named configuration bundle for a registered (or yet to be registered)
/// plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetDefinition {
    pub id: String,
    pub plugin_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: ConfigMap,
}

/// Metadata and schema of a registered plugin, as shown to UI chrome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDescriptor {
    pub metadata: PluginMetadata,
    pub parameters: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
}

/// What an activation request points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "kebab-case")]
pub enum ActivationTarget {
    Plugin(String),
    Preset(String),
}

impl std::fmt::Display for ActivationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plugin(id) => write!(f, "plugin `{id}`"),
            Self::Preset(id) => write!(f, "preset `{id}`"),
        }
    }
}

/// A target resolved against the catalog, ready to be instantiated.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub plugin_id: String,
    pub kind: PluginKind,
    pub config: Option<ConfigMap>,
}

struct CatalogEntry {
    factory: PluginFactory,
    descriptor: PluginDescriptor,
}

#[derive(Default)]
pub struct PluginCatalog {
    entries: BTreeMap<String, CatalogEntry>,
    presets: BTreeMap<String, PresetDefinition>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls the factory once for metadata, validates it and stores the
    /// factory under the declared id. Re-registering an id replaces the old
    /// entry.
    pub fn register<F>(&mut self, factory: F) -> Result<Registration>
    where
        F: Fn() -> PluginInstance + Send + Sync + 'static,
    {
        let sample = catch_unwind(AssertUnwindSafe(&factory)).map_err(|_| {
            BeatSyncError::InvalidPlugin {
                id: "<unknown>".to_string(),
                reason: "factory panicked".to_string(),
            }
        })?;
        sample.validate()?;

        let descriptor = PluginDescriptor {
            metadata: sample.metadata().clone(),
            parameters: sample.parameters().specs().to_vec(),
        };
        let id = descriptor.metadata.id.clone();
        let replaced = self
            .entries
            .insert(
                id.clone(),
                CatalogEntry {
                    factory: Arc::new(factory),
                    descriptor,
                },
            )
            .is_some();

        if replaced {
            tracing::warn!(plugin = %id, "plugin re-registered; previous factory replaced");
            Ok(Registration::Replaced)
        } else {
            tracing::debug!(plugin = %id, "plugin registered");
            Ok(Registration::Added)
        }
    }

    pub fn get(&self, id: &str) -> Option<PluginFactory> {
        self.entries.get(id).map(|entry| entry.factory.clone())
    }

    pub fn descriptor(&self, id: &str) -> Option<&PluginDescriptor> {
        self.entries.get(id).map(|entry| &entry.descriptor)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Instantiates and initialises a plugin. `config` is applied before
    /// `initialize`, so the plugin starts from those values rather than its
    /// defaults; a rejected config is logged and the defaults are kept.
    /// Failures are logged and yield `None`.
    pub fn create_instance(
        &self,
        id: &str,
        context: &PluginContext,
        config: Option<&ConfigMap>,
    ) -> Option<PluginInstance> {
        let Some(factory) = self.get(id) else {
            tracing::error!(plugin = id, "cannot create unknown plugin");
            return None;
        };
        let mut instance = match catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(instance) => instance,
            Err(_) => {
                tracing::error!(plugin = id, "plugin factory panicked");
                return None;
            }
        };
        if let Some(config) = config {
            if let Err(err) = instance.set_config(config) {
                tracing::warn!(plugin = id, error = %err, "preset values rejected; using defaults");
            }
        }
        match instance.initialize(context) {
            Ok(()) => Some(instance),
            Err(err) => {
                tracing::error!(plugin = id, error = %err, "plugin failed to initialise");
                instance.destroy();
                None
            }
        }
    }

    /// Stores a preset. The referenced plugin does not have to exist yet; it
    /// is checked when the preset is activated.
    pub fn register_preset(&mut self, preset: PresetDefinition) -> Result<Registration> {
        if preset.id.trim().is_empty() {
            return Err(BeatSyncError::InvalidInput("preset id must not be empty"));
        }
        let id = preset.id.clone();
        if self.presets.insert(id.clone(), preset).is_some() {
            tracing::warn!(preset = %id, "preset re-registered; previous definition replaced");
            Ok(Registration::Replaced)
        } else {
            Ok(Registration::Added)
        }
    }

    pub fn get_preset(&self, id: &str) -> Option<&PresetDefinition> {
        self.presets.get(id)
    }

    pub fn presets(&self) -> impl Iterator<Item = &PresetDefinition> {
        self.presets.values()
    }

    pub fn list(&self) -> Vec<PluginDescriptor> {
        self.entries
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Looks up the factory behind a target and checks preset values against
    /// the plugin's schema. Nothing is instantiated.
    pub fn resolve(&self, target: &ActivationTarget) -> Result<ResolvedTarget> {
        let (plugin_id, config) = match target {
            ActivationTarget::Plugin(id) => (id.as_str(), None),
            ActivationTarget::Preset(id) => {
                let preset = self
                    .get_preset(id)
                    .ok_or_else(|| BeatSyncError::UnknownPreset(id.clone()))?;
                (preset.plugin_id.as_str(), Some(preset.config.clone()))
            }
        };

        let entry = self
            .entries
            .get(plugin_id)
            .ok_or_else(|| BeatSyncError::UnknownPlugin(plugin_id.to_string()))?;

        if let Some(config) = &config {
            ParameterSet::new(entry.descriptor.parameters.clone()).merge(config)?;
        }

        Ok(ResolvedTarget {
            plugin_id: plugin_id.to_string(),
            kind: entry.descriptor.metadata.kind,
            config,
        })
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("plugins", &self.entries.keys().collect::<Vec<_>>())
            .field("presets", &self.presets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        plugin::{ParamValue, Plugin, PluginKind, Props, UiPlugin},
        snapshot::FrameSnapshot,
    };

    struct Panel {
        metadata: PluginMetadata,
        params: ParameterSet,
        fail_init: bool,
    }

    impl Panel {
        fn new(id: &str, version: &str) -> Self {
            Self {
                metadata: PluginMetadata {
                    id: id.to_string(),
                    name: "Panel".to_string(),
                    author: "tests".to_string(),
                    version: version.to_string(),
                    kind: PluginKind::StructuredUi,
                },
                params: ParameterSet::new(vec![ParamSpec::float("smoothing", 0.0, 1.0, 0.5)]),
                fail_init: false,
            }
        }
    }

    impl Plugin for Panel {
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
            if self.fail_init {
                return Err(BeatSyncError::plugin(&self.metadata.id, "no container"));
            }
            Ok(())
        }

        fn update(&mut self, _snapshot: &FrameSnapshot) -> Result<()> {
            Ok(())
        }

        fn destroy(&mut self) {}
    }

    impl UiPlugin for Panel {
        fn component(&self) -> &str {
            "panel"
        }

        fn props(&self) -> Props {
            Props::new()
        }
    }

    fn context() -> PluginContext {
        PluginContext {
            surface: None,
            size: None,
            container: None,
            frequency_bins: 8,
            waveform_samples: 8,
        }
    }

    #[test]
    fn re_registration_replaces_without_error() {
        let mut catalog = PluginCatalog::new();
        let first = catalog.register(|| PluginInstance::ui(Panel::new("panel", "1.0.0")));
        let second = catalog.register(|| PluginInstance::ui(Panel::new("panel", "2.0.0")));

        assert_eq!(first.unwrap(), Registration::Added);
        assert_eq!(second.unwrap(), Registration::Replaced);
        assert_eq!(catalog.list().len(), 1);
        assert_eq!(catalog.descriptor("panel").unwrap().metadata.version, "2.0.0");
    }

    #[test]
    fn invalid_plugins_are_reported() {
        let mut catalog = PluginCatalog::new();
        let result = catalog.register(|| PluginInstance::ui(Panel::new("panel", "")));
        assert!(matches!(result, Err(BeatSyncError::InvalidPlugin { .. })));
        assert!(catalog.get("panel").is_none());
    }

    #[test]
    fn create_instance_swallows_init_failures() {
        let mut catalog = PluginCatalog::new();
        catalog
            .register(|| {
                let mut panel = Panel::new("broken", "1.0.0");
                panel.fail_init = true;
                PluginInstance::ui(panel)
            })
            .unwrap();
        catalog
            .register(|| PluginInstance::ui(Panel::new("panel", "1.0.0")))
            .unwrap();

        assert!(catalog.create_instance("broken", &context(), None).is_none());
        assert!(catalog.create_instance("missing", &context(), None).is_none());
        assert!(catalog.create_instance("panel", &context(), None).is_some());
    }

    #[test]
    fn presets_defer_plugin_validation() {
        let mut catalog = PluginCatalog::new();
        catalog
            .register_preset(PresetDefinition {
                id: "calm".to_string(),
                plugin_id: "panel".to_string(),
                name: None,
                config: ConfigMap::from([("smoothing".to_string(), ParamValue::Float(0.9))]),
            })
            .unwrap();

        let target = ActivationTarget::Preset("calm".to_string());
        assert!(matches!(
            catalog.resolve(&target),
            Err(BeatSyncError::UnknownPlugin(_))
        ));

        catalog
            .register(|| PluginInstance::ui(Panel::new("panel", "1.0.0")))
            .unwrap();
        let resolved = catalog.resolve(&target).unwrap();
        assert_eq!(resolved.plugin_id, "panel");
        assert_eq!(resolved.kind, PluginKind::StructuredUi);
        assert!(resolved.config.is_some());
    }

    #[test]
    fn preset_values_are_checked_against_schema() {
        let mut catalog = PluginCatalog::new();
        catalog
            .register(|| PluginInstance::ui(Panel::new("panel", "1.0.0")))
            .unwrap();
        catalog
            .register_preset(PresetDefinition {
                id: "bad".to_string(),
                plugin_id: "panel".to_string(),
                name: None,
                config: ConfigMap::from([("glow".to_string(), ParamValue::Bool(true))]),
            })
            .unwrap();

        let result = catalog.resolve(&ActivationTarget::Preset("bad".to_string()));
        assert!(matches!(result, Err(BeatSyncError::InvalidParameter { .. })));
        assert!(matches!(
            catalog.resolve(&ActivationTarget::Preset("nope".to_string())),
            Err(BeatSyncError::UnknownPreset(_))
        ));
    }
}
