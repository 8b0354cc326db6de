//! Aggregated health probing across every running module.
//!
//! Each module's [`Module::system_check`] runs on its own `tokio` task, raced
//! against a shared timeout. A probe that does not return in time is marked
//! unhealthy and its task is abandoned (not awaited further) rather than
//! joined, so one wedged module can never stall the aggregate result.

use crate::module::{HealthReport, Module};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default per-module probe timeout, overridable via
/// [`check_all_with_timeout`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Aggregate result of a system check pass across all loaded modules.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AggregateHealth {
    pub overall_healthy: bool,
    pub modules: BTreeMap<String, HealthReport>,
}

/// Run `system_check` on every `(name, module)` pair concurrently, each
/// bounded by `timeout`. A module whose probe exceeds `timeout` is reported
/// with `healthy: false, status: "timeout"`.
pub async fn check_all_with_timeout(
    modules: &[(String, Arc<dyn Module>)],
    timeout: Duration,
) -> AggregateHealth {
    if timeout.is_zero() {
        // A zero deadline can never be met; synthesize timeouts directly
        // rather than racing it against a (possibly instant) probe.
        let reports = modules
            .iter()
            .map(|(name, _)| {
                (
                    name.clone(),
                    HealthReport::error("timeout", "system_check timed out"),
                )
            })
            .collect();
        return AggregateHealth {
            overall_healthy: modules.is_empty(),
            modules: reports,
        };
    }

    let tasks: Vec<_> = modules
        .iter()
        .map(|(name, module)| {
            let name = name.clone();
            let module = module.clone();
            tokio::spawn(async move {
                let report = tokio::time::timeout(
                    timeout,
                    tokio::task::spawn_blocking(move || module.system_check()),
                )
                .await;
                (name, report)
            })
        })
        .collect();

    let mut reports = BTreeMap::new();
    for task in tasks {
        match task.await {
            Ok((name, Ok(Ok(report)))) => {
                reports.insert(name, report);
            }
            Ok((name, Ok(Err(join_err)))) => {
                reports.insert(
                    name,
                    HealthReport::error("panicked", join_err.to_string()),
                );
            }
            Ok((name, Err(_elapsed))) => {
                reports.insert(name, HealthReport::error("timeout", "system_check timed out"));
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "system check supervisor task failed");
            }
        }
    }

    let overall_healthy = reports.values().all(|r| r.healthy);
    AggregateHealth {
        overall_healthy,
        modules: reports,
    }
}

/// Run with [`DEFAULT_PROBE_TIMEOUT`].
pub async fn check_all(modules: &[(String, Arc<dyn Module>)]) -> AggregateHealth {
    check_all_with_timeout(modules, DEFAULT_PROBE_TIMEOUT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Healthy;
    #[async_trait]
    impl Module for Healthy {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn running(&self) -> bool {
            true
        }
    }

    struct Unhealthy;
    #[async_trait]
    impl Module for Unhealthy {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn system_check(&self) -> HealthReport {
            HealthReport::error("degraded", "disk almost full")
        }
        fn running(&self) -> bool {
            true
        }
    }

    struct Wedged(Arc<AtomicBool>);
    #[async_trait]
    impl Module for Wedged {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn system_check(&self) -> HealthReport {
            std::thread::sleep(Duration::from_secs(5));
            self.0.store(true, Ordering::SeqCst);
            HealthReport::running()
        }
        fn running(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn aggregate_is_healthy_only_when_every_module_is() {
        let modules: Vec<(String, Arc<dyn Module>)> = vec![
            ("a".to_owned(), Arc::new(Healthy)),
            ("b".to_owned(), Arc::new(Healthy)),
        ];
        let result = check_all(&modules).await;
        assert!(result.overall_healthy);
        assert_eq!(result.modules.len(), 2);
    }

    #[tokio::test]
    async fn one_unhealthy_module_makes_the_aggregate_unhealthy() {
        let modules: Vec<(String, Arc<dyn Module>)> = vec![
            ("a".to_owned(), Arc::new(Healthy)),
            ("b".to_owned(), Arc::new(Unhealthy)),
        ];
        let result = check_all(&modules).await;
        assert!(!result.overall_healthy);
        assert!(!result.modules["b"].healthy);
    }

    #[tokio::test]
    async fn a_wedged_probe_is_reported_as_timeout_and_abandoned() {
        let completed = Arc::new(AtomicBool::new(false));
        let modules: Vec<(String, Arc<dyn Module>)> = vec![(
            "wedged".to_owned(),
            Arc::new(Wedged(completed.clone())),
        )];

        let result = check_all_with_timeout(&modules, Duration::from_millis(50)).await;
        assert!(!result.overall_healthy);
        assert_eq!(result.modules["wedged"].status, "timeout");
        assert!(!completed.load(Ordering::SeqCst));
    }
}
