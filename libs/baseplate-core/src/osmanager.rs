//! `OSManager`: owns the bus and the loaded modules, drives the
//! construct -> boot -> run -> shutdown lifecycle, and answers
//! bus-addressable system check / shutdown requests.

use crate::bus::MessageBus;
use crate::config::{ConfigProvider, TreeConfigProvider};
use crate::error::BaseplateError;
use crate::loader::ModuleLoader;
use crate::registry::RegistryBuilder;
use crate::systemcheck::{self, AggregateHealth};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const TOPIC_SYSTEM_CHECK_REQUEST: &str = "system.check.request";
pub const TOPIC_SYSTEM_CHECK_RESPONSE: &str = "system.check.response";
pub const TOPIC_SHUTDOWN_REQUEST: &str = "system.shutdown.request";

/// Top-level handle to a running BasePlate instance.
pub struct OsManager {
    bus: Arc<MessageBus>,
    loader: ModuleLoader,
    shutdown: CancellationToken,
}

impl OsManager {
    /// Resolve the static registry, apply config, and construct every
    /// enabled module. Does not start anything yet.
    ///
    /// # Errors
    /// Any [`BaseplateError`] from registry resolution, config loading, or
    /// module construction.
    pub fn construct(config_path: Option<&std::path::Path>) -> Result<Self, BaseplateError> {
        let registry = RegistryBuilder::from_inventory().build()?;
        let config_provider: Arc<dyn ConfigProvider> =
            Arc::new(TreeConfigProvider::load(config_path)?);
        let bus = Arc::new(MessageBus::new());
        let loader = ModuleLoader::construct(&registry, Uuid::new_v4(), &bus, &config_provider)?;

        let manager = Self {
            bus,
            loader,
            shutdown: CancellationToken::new(),
        };
        manager.wire_system_topics();
        Ok(manager)
    }

    fn wire_system_topics(&self) {
        let bus = self.bus.clone();
        let health_bus = bus.clone();
        let modules: Vec<(String, Arc<dyn crate::module::Module>)> = self
            .loader
            .modules()
            .iter()
            .map(|m| (m.name.to_owned(), m.module.clone()))
            .collect();

        bus.subscribe(TOPIC_SYSTEM_CHECK_REQUEST, move |payload| {
            let modules = modules.clone();
            let bus = health_bus.clone();
            let request_id = payload.get("request_id").cloned();
            let timeout = payload
                .get("timeout_s")
                .and_then(serde_json::Value::as_f64)
                .map(Duration::from_secs_f64)
                .unwrap_or(systemcheck::DEFAULT_PROBE_TIMEOUT);
            tokio::spawn(async move {
                let result = systemcheck::check_all_with_timeout(&modules, timeout).await;
                let timestamp = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                if let Ok(results) = serde_json::to_value(&result) {
                    let mut response = serde_json::json!({
                        "results": results,
                        "timestamp": timestamp,
                    });
                    if let Some(request_id) = request_id {
                        response["request_id"] = request_id;
                    }
                    bus.publish(TOPIC_SYSTEM_CHECK_RESPONSE, response);
                }
            });
            Ok(())
        });

        let shutdown = self.shutdown.clone();
        bus.subscribe(TOPIC_SHUTDOWN_REQUEST, move |_payload| {
            shutdown.cancel();
            Ok(())
        });
    }

    /// Start every constructed module in dependency order.
    ///
    /// # Errors
    /// [`BaseplateError::ModuleStart`] if any module fails to start; already
    /// started modules are rolled back first.
    pub async fn boot(&self) -> Result<(), BaseplateError> {
        self.loader.start_all().await
    }

    /// Block until a shutdown is requested, either via the
    /// `system.shutdown.request` topic or an OS signal (SIGINT / SIGTERM on
    /// unix, Ctrl-C on windows).
    pub async fn run(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {
                tracing::info!("shutdown requested via bus");
            }
            () = wait_for_os_signal() => {
                tracing::info!("shutdown requested via OS signal");
                self.shutdown.cancel();
            }
        }
    }

    /// Stop every module in reverse dependency order. Idempotent to call
    /// after `run()` returns for any reason.
    pub async fn shutdown(&self) {
        self.loader.stop_all().await;
    }

    /// One-shot aggregate health snapshot, bypassing the bus round trip.
    pub async fn system_check(&self) -> AggregateHealth {
        let modules: Vec<(String, Arc<dyn crate::module::Module>)> = self
            .loader
            .modules()
            .iter()
            .map(|m| (m.name.to_owned(), m.module.clone()))
            .collect();
        systemcheck::check_all(&modules).await
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
