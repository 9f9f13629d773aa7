use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use crate::catalog::ServiceCatalog;
use crate::config::{Timer, TimersConfig};
use crate::orchestrator::{MachineRefresh, Orchestrator};

/// First tick is one period out; the host refreshes once itself at startup
fn ticker(timer: &Timer) -> tokio::time::Interval {
    let period = timer.interval();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Periodic refresh loop. Each automatic timer fires its refresh on a
/// separate task; overlapping refreshes are collapsed by the orchestrator.
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    catalog: Arc<ServiceCatalog>,
    timers: TimersConfig,
    probe_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut machines = ticker(&timers.machines);
    let mut services = ticker(&timers.services);

    tracing::info!(
        "Scheduler started (machines: {}, services: {})",
        describe(&timers.machines),
        describe(&timers.services)
    );

    loop {
        tokio::select! {
            _ = machines.tick(), if timers.machines.automatic => {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    match orchestrator.update_machines().await {
                        Ok(MachineRefresh::AlreadyRunning) => {}
                        Ok(MachineRefresh::Updated { .. }) => {}
                        Err(e) => tracing::error!("Machine refresh failed: {}", e),
                    }
                });
            }
            _ = services.tick(), if timers.services.automatic => {
                let orchestrator = orchestrator.clone();
                let catalog = catalog.clone();
                tokio::spawn(async move {
                    let everything = HashSet::new();
                    if let Err(e) = orchestrator.scan_selection(&everything, &catalog, probe_timeout).await {
                        tracing::error!("Service scan failed: {}", e);
                    }
                });
            }
            _ = cancel.cancelled() => {
                tracing::info!("Scheduler shutting down");
                break;
            }
        }
    }
}

fn describe(timer: &Timer) -> String {
    if timer.automatic {
        format!("every {}s", timer.interval().as_secs())
    } else {
        "manual".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{MachineId, Service, Status};
    use crate::config::Config;
    use crate::scanner::testing::{Reply, ScriptedRunner};
    use crate::status::fixtures::{bytes, envelope, machine};
    use crate::table::TableHandle;

    fn orchestrator(runner: Arc<ScriptedRunner>) -> Arc<Orchestrator> {
        runner.set_status(0, bytes(&envelope(machine("n1", "laptop"), vec![machine("n2", "nas")])));
        Arc::new(Orchestrator::new(&Config::default(), runner, TableHandle::spawn()))
    }

    #[tokio::test]
    async fn test_automatic_timers_refresh() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply_all(Reply::Stderr("Connection to nas port 22 [tcp/ssh] succeeded!\n"));
        let orch = orchestrator(runner);
        let catalog = Arc::new(ServiceCatalog::new(vec![Service::new("SSH", "ssh", 22)]));

        let timers = TimersConfig {
            machines: Timer { automatic: true, interval_secs: 1 },
            services: Timer { automatic: true, interval_secs: 1 },
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(orch.clone(), catalog, timers, Duration::from_secs(1), cancel.clone()));

        let mut snapshots = orch.subscribe();
        snapshots.wait_for(|s| s.is_some()).await.unwrap();

        // the first service tick may race the first machine refresh; a later one scans
        let ssh = Service::new("SSH", "ssh", 22).key();
        let mut revisions = orch.table().subscribe();
        loop {
            if orch.table().get(&MachineId::new("n2"), &ssh).await.unwrap() == Status::Online {
                break;
            }
            revisions.changed().await.unwrap();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_refresh_before_first_period() {
        let runner = Arc::new(ScriptedRunner::default());
        let orch = orchestrator(runner.clone());
        let catalog = Arc::new(ServiceCatalog::default());

        let timers = TimersConfig {
            machines: Timer { automatic: true, interval_secs: 60 },
            services: Timer { automatic: true, interval_secs: 60 },
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(orch.clone(), catalog, timers, Duration::from_secs(1), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(orch.snapshot().is_none());
        assert_eq!(runner.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_manual_timers_do_nothing() {
        let runner = Arc::new(ScriptedRunner::default());
        let orch = orchestrator(runner.clone());
        let catalog = Arc::new(ServiceCatalog::default());

        let timers = TimersConfig {
            machines: Timer { automatic: false, interval_secs: 1 },
            services: Timer { automatic: false, interval_secs: 1 },
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(orch.clone(), catalog, timers, Duration::from_secs(1), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(orch.snapshot().is_none());
        assert_eq!(runner.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
