//! Per-module construction context: `(bus, config_slice)` plus identity.

use crate::bus::MessageBus;
use crate::config::{self, ConfigError, ConfigProvider};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

/// Passed to each module's factory at construction time. Holds a non-owning
/// `Arc<MessageBus>` reference (the bus is owned exclusively by
/// [`crate::osmanager::OsManager`]) and the module's own config slice.
#[derive(Clone)]
pub struct ModuleCtx {
    instance_id: Uuid,
    module_name: Arc<str>,
    bus: Arc<MessageBus>,
    config_provider: Arc<dyn ConfigProvider>,
}

impl ModuleCtx {
    #[must_use]
    pub fn new(
        instance_id: Uuid,
        module_name: impl Into<Arc<str>>,
        bus: Arc<MessageBus>,
        config_provider: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            instance_id,
            module_name: module_name.into(),
            bus,
            config_provider,
        }
    }

    /// Id of the hosting [`crate::osmanager::OsManager`] process instance,
    /// shared by every module it constructs.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Deserialize this module's config slice into `T`, defaulting if absent.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidConfig`] if the slice is present but
    /// malformed.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        config::config_or_default(self.config_provider.as_ref(), &self.module_name)
    }

    /// The raw `modules.<name>.config` object, or an empty object if absent.
    #[must_use]
    pub fn raw_config(&self) -> serde_json::Value {
        self.config_provider
            .get_module_config(&self.module_name)
            .and_then(|v| v.get("config"))
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }
}
