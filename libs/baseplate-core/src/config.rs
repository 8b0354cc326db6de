//! Typed access to the `modules.<name>` subtree of the global configuration.
//!
//! Each module's entry is `{enabled: bool, config: {...}}`; `enabled` is read
//! directly by the loader via [`is_enabled`], and `config` is the arbitrary,
//! module-owned sub-object the typed accessors below deserialize. Mirrors the
//! teacher's lenient/strict split: most modules should tolerate being absent
//! from the config file entirely (`config_or_default`), while a module that
//! genuinely cannot run without explicit configuration can demand it
//! (`config_required`).

use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("module '{module}' not found in configuration")]
    ModuleNotFound { module: String },
    #[error("module '{module}' configuration must be a JSON object")]
    InvalidModuleStructure { module: String },
    #[error("invalid configuration for module '{module}': {source}")]
    InvalidConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to load configuration file: {0}")]
    Load(String),
}

/// Supplies the raw `modules.<name>` JSON slice for each module. The core
/// never inspects any other section of the tree; everything outside
/// `modules` passes through untouched for modules/embedders to read directly.
pub trait ConfigProvider: Send + Sync {
    fn get_module_config(&self, module_name: &str) -> Option<&Value>;
}

/// Lenient accessor: missing module, non-object value, or absent field all
/// fall back to `T::default()`. Only a malformed-but-present config section
/// is an error.
///
/// # Errors
/// Returns [`ConfigError::InvalidConfig`] if the section exists but fails to
/// deserialize into `T`.
pub fn config_or_default<T: DeserializeOwned + Default>(
    provider: &dyn ConfigProvider,
    module_name: &str,
) -> Result<T, ConfigError> {
    let Some(raw) = provider.get_module_config(module_name) else {
        return Ok(T::default());
    };
    let Some(config_slice) = raw.get("config") else {
        return Ok(T::default());
    };
    if !config_slice.is_object() {
        return Ok(T::default());
    }
    serde_json::from_value(config_slice.clone()).map_err(|source| ConfigError::InvalidConfig {
        module: module_name.to_owned(),
        source,
    })
}

/// Strict accessor: the module must be present with a `config` object.
///
/// # Errors
/// Returns [`ConfigError::ModuleNotFound`], [`ConfigError::InvalidModuleStructure`],
/// or [`ConfigError::InvalidConfig`] as appropriate.
pub fn config_required<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    module_name: &str,
) -> Result<T, ConfigError> {
    let raw = provider
        .get_module_config(module_name)
        .ok_or_else(|| ConfigError::ModuleNotFound {
            module: module_name.to_owned(),
        })?;
    let config_slice = raw
        .get("config")
        .filter(|v| v.is_object())
        .ok_or_else(|| ConfigError::InvalidModuleStructure {
            module: module_name.to_owned(),
        })?;
    serde_json::from_value(config_slice.clone()).map_err(|source| ConfigError::InvalidConfig {
        module: module_name.to_owned(),
        source,
    })
}

/// Whether a module is enabled: `modules.<name>.enabled`, default `true`.
#[must_use]
pub fn is_enabled(provider: &dyn ConfigProvider, module_name: &str) -> bool {
    provider
        .get_module_config(module_name)
        .and_then(|v| v.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// A `ConfigProvider` backed by an already-parsed JSON tree, typically loaded
/// from YAML via `figment` at boot (see [`crate::osmanager::OsManager::construct`]).
pub struct TreeConfigProvider {
    modules: serde_json::Map<String, Value>,
}

impl TreeConfigProvider {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            modules: serde_json::Map::new(),
        }
    }

    /// Load a layered config: defaults merged with a YAML file (if it
    /// exists) and `BASEPLATE_` prefixed environment overrides, using
    /// `figment` exactly as the teacher's `AppConfig` does.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] if the file exists but fails to parse.
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        use figment::providers::{Env, Format, Yaml};
        use figment::Figment;

        let mut figment = Figment::new();
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("BASEPLATE_").split("__"));

        let root: Value = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let modules = root
            .get("modules")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(Self { modules })
    }
}

impl ConfigProvider for TreeConfigProvider {
    fn get_module_config(&self, module_name: &str) -> Option<&Value> {
        self.modules.get(module_name)
    }
}
