//! Turns a resolved [`ModuleRegistry`] into running module instances.
//!
//! Construction, enablement filtering, and boot/shutdown ordering live here;
//! the registry only knows about names and dependency edges.

use crate::bus::MessageBus;
use crate::config::{self, ConfigProvider};
use crate::context::ModuleCtx;
use crate::error::BaseplateError;
use crate::module::Module;
use crate::registry::ModuleRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// A constructed module paired with the name it was registered under.
pub struct LoadedModule {
    pub name: &'static str,
    pub module: Arc<dyn Module>,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Owns the constructed module instances and their boot order.
#[derive(Debug)]
pub struct ModuleLoader {
    modules: Vec<LoadedModule>,
}

impl ModuleLoader {
    /// Construct every enabled module in `registry` in dependency-first
    /// order. A module whose `modules.<name>.enabled` config is `false` is
    /// dropped by the enablement filter; dependencies are then re-validated
    /// against the surviving enabled set, so an enabled module that declares
    /// a dependency on a disabled (or otherwise missing) module fails here
    /// with [`BaseplateError::MissingDependency`] rather than being
    /// constructed with that dependency silently absent.
    ///
    /// # Errors
    /// [`BaseplateError::MissingDependency`] if an enabled module depends on
    /// a module that is disabled or not registered, [`BaseplateError::UnknownModule`]
    /// if the registry is inconsistent with its own boot order, and
    /// [`BaseplateError::ModuleLoad`] if any enabled module's factory
    /// returns an error.
    pub fn construct(
        registry: &ModuleRegistry,
        instance_id: Uuid,
        bus: &Arc<MessageBus>,
        config_provider: &Arc<dyn ConfigProvider>,
    ) -> Result<Self, BaseplateError> {
        let enabled: HashSet<&'static str> = registry
            .boot_order()
            .iter()
            .copied()
            .filter(|&name| config::is_enabled(config_provider.as_ref(), name))
            .collect();

        for &name in &enabled {
            let descriptor = registry
                .descriptor(name)
                .ok_or_else(|| BaseplateError::UnknownModule(name.to_owned()))?;
            for &dep in descriptor.dependencies {
                if !enabled.contains(dep) {
                    return Err(BaseplateError::MissingDependency {
                        module: name,
                        missing: dep,
                    });
                }
            }
        }

        let mut modules = Vec::with_capacity(enabled.len());
        for &name in registry.boot_order() {
            if !enabled.contains(name) {
                tracing::info!(module = name, "module disabled, skipping construction");
                continue;
            }
            let factory = registry
                .factory(name)
                .ok_or_else(|| BaseplateError::UnknownModule(name.to_owned()))?;
            let ctx = ModuleCtx::new(instance_id, name, bus.clone(), config_provider.clone());
            let module = factory(&ctx).map_err(|source| BaseplateError::ModuleLoad {
                module: name,
                source,
            })?;
            modules.push(LoadedModule { name, module });
        }
        Ok(Self { modules })
    }

    /// Start every loaded module in boot order. On the first failure, stop
    /// every module started so far in reverse order and return the original
    /// error — partial boot is never left running.
    ///
    /// # Errors
    /// [`BaseplateError::ModuleStart`] naming the module that failed.
    pub async fn start_all(&self) -> Result<(), BaseplateError> {
        let mut started = Vec::with_capacity(self.modules.len());
        for loaded in &self.modules {
            tracing::info!(module = loaded.name, "starting module");
            match loaded.module.start().await {
                Ok(()) => started.push(loaded),
                Err(source) => {
                    tracing::error!(module = loaded.name, error = %source, "module failed to start, rolling back");
                    for rollback in started.into_iter().rev() {
                        if let Err(stop_err) = rollback.module.stop().await {
                            tracing::error!(module = rollback.name, error = %stop_err, "rollback stop failed");
                        }
                    }
                    return Err(BaseplateError::ModuleStart {
                        module: loaded.name,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Stop every loaded module in reverse boot order. Continues past
    /// individual failures, logging each, so one stuck module can't prevent
    /// the rest from shutting down.
    pub async fn stop_all(&self) {
        for loaded in self.modules.iter().rev() {
            tracing::info!(module = loaded.name, "stopping module");
            if let Err(err) = loaded.module.stop().await {
                tracing::error!(module = loaded.name, error = %err, "module failed to stop");
            }
        }
    }

    #[must_use]
    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.module)
    }

    #[cfg(test)]
    fn from_loaded(modules: Vec<LoadedModule>) -> Self {
        Self { modules }
    }
}
