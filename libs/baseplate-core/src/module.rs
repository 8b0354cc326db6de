//! The `ModuleBase` contract every hosted module implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Static identity declared by a module, returned from a free `descriptor()`
/// function rather than reflected off a class attribute.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: &'static str,
    pub version: &'static str,
    pub dependencies: &'static [&'static str],
}

/// Per-module health, produced by [`Module::system_check`]. The aggregator
/// fills in `error` when a probe fails or times out; modules may carry
/// additional diagnostic fields in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HealthReport {
    #[must_use]
    pub fn running() -> Self {
        Self {
            healthy: true,
            status: "running".to_owned(),
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn stopped() -> Self {
        Self {
            healthy: false,
            status: "stopped".to_owned(),
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn error(status: &str, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status: status.to_owned(),
            error: Some(message.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// `{healthy: running, status: running ? "running" : "stopped"}` — the
    /// default body every module may fall back on.
    #[must_use]
    pub fn from_running_flag(running: bool) -> Self {
        if running {
            Self::running()
        } else {
            Self::stopped()
        }
    }
}

/// Every hosted module implements `start`/`stop`/`system_check`. Construction
/// happens through the per-module factory registered with
/// [`crate::registry::RegistryBuilder`], not through this trait, since Rust
/// has no uniform reflective constructor.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Perform side effects needed to enter operation. On success the loader
    /// marks the module `running`; on failure the loader rolls back
    /// previously started modules in reverse order and fails boot.
    async fn start(&self) -> anyhow::Result<()>;

    /// Idempotent shutdown: must succeed or fail softly (log and return).
    /// Called at most once per `start()` by the loader; a module's own
    /// `running` bookkeeping should tolerate being asked to stop twice.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Health probe. Must not block longer than a few hundred milliseconds
    /// under normal conditions — the aggregator enforces a hard timeout
    /// regardless. Default implementation derives from `running()`.
    fn system_check(&self) -> HealthReport {
        HealthReport::from_running_flag(self.running())
    }

    /// Whether `start()` has completed successfully and `stop()` has not yet
    /// completed.
    fn running(&self) -> bool;
}
