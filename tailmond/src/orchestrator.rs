//! Machine and service refreshes.
//!
//! A machine refresh replaces the whole [`Snapshot`] and clears the status
//! table. A service refresh only writes statuses. Each kind of refresh runs
//! at most once at a time per resource: one machine refresh overall, one
//! scan per machine ID.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::stream::{self, FuturesUnordered, StreamExt};
use tokio::sync::watch;
use shared::protocol::STATUS_ARGS;
use shared::types::{Machine, MachineId, Service, ServiceKey, Snapshot, Status};
use crate::cache::db::CachedStatus;
use crate::cache::handle::CacheHandle;
use crate::catalog::ServiceCatalog;
use crate::config::Config;
use crate::error::{Error, LaunchError, Result};
use crate::exec::{ExitState, ProcessRunner};
use crate::scanner::Scanner;
use crate::status::StatusParser;
use crate::table::{TableHandle, TableView};

/// A hung daemon must not wedge machine refreshes forever
const DAEMON_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineRefresh {
    Updated {
        machines: usize,
        topology_changed: bool,
    },
    /// Another machine refresh was in flight; nothing was done
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Machines whose results reached the table
    pub scanned: Vec<MachineId>,
    /// Machines already being scanned by another call
    pub skipped: Vec<MachineId>,
    /// Machines that left the snapshot before their results arrived
    pub dropped: Vec<MachineId>,
}

struct MachineOutcome {
    id: MachineId,
    published: bool,
    failure: Option<LaunchError>,
}

/// Machine IDs held by one `update_services` call, released on drop
struct ScanClaim<'a> {
    scanning: &'a Mutex<HashSet<MachineId>>,
    ids: HashSet<MachineId>,
}

impl Drop for ScanClaim<'_> {
    fn drop(&mut self) {
        let mut scanning = self.scanning.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            scanning.remove(id);
        }
    }
}

pub struct Orchestrator {
    runner: Arc<dyn ProcessRunner>,
    daemon_path: PathBuf,
    parser: StatusParser,
    scanner: Scanner,
    max_concurrent_machines: usize,
    table: TableHandle,
    snapshot: watch::Sender<Option<Arc<Snapshot>>>,
    refreshing_machines: tokio::sync::Mutex<()>,
    scanning: Mutex<HashSet<MachineId>>,
    cache: Option<CacheHandle>,
}

impl Orchestrator {
    pub fn new(config: &Config, runner: Arc<dyn ProcessRunner>, table: TableHandle) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            scanner: Scanner::new(runner.clone(), config.scanning.probe_program.clone()),
            runner,
            daemon_path: config.daemon.executable_path(),
            parser: StatusParser::new(config.scanning.subnet_expansion_limit)
                .with_names(config.names.clone()),
            max_concurrent_machines: config.scanning.max_concurrent_machines.max(1),
            table,
            snapshot,
            refreshing_machines: tokio::sync::Mutex::new(()),
            scanning: Mutex::new(HashSet::new()),
            cache: None,
        }
    }

    /// Persist every good status dump through `cache`
    pub fn with_cache(mut self, cache: CacheHandle) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.borrow().clone()
    }

    /// Fires whenever a machine refresh installs a new snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshot.subscribe()
    }

    pub fn table(&self) -> TableView {
        self.table.view()
    }

    /// Run the daemon and replace the snapshot. On any failure the previous
    /// snapshot and statuses stay as they were.
    pub async fn update_machines(&self) -> Result<MachineRefresh> {
        let Ok(_refreshing) = self.refreshing_machines.try_lock() else {
            tracing::debug!("Machine refresh already running");
            return Ok(MachineRefresh::AlreadyRunning);
        };

        tracing::info!("Refreshing machines via {}", self.daemon_path.display());

        let args: Vec<String> = STATUS_ARGS.iter().map(|a| a.to_string()).collect();
        let output = self
            .runner
            .execute(&self.daemon_path, &args, Some(DAEMON_DEADLINE))
            .await?;

        if !output.success() {
            let (code, stderr) = match output.exit {
                ExitState::Exited(code) => (code, output.stderr_lossy().trim().to_string()),
                ExitState::TimedOut => (None, format!("timed out after {:?}", DAEMON_DEADLINE)),
            };
            tracing::error!("Daemon status failed ({:?}): {}", code, stderr);
            return Err(Error::Daemon { code, stderr });
        }

        let snapshot = self.parser.parse(&output.stdout).map_err(|e| {
            tracing::error!("Keeping previous snapshot: {}", e);
            e
        })?;

        let topology_changed = self
            .snapshot
            .borrow()
            .as_ref()
            .map_or(true, |previous| previous.fingerprint != snapshot.fingerprint);

        self.remember(&output.stdout, &snapshot).await;

        let machines = snapshot.lookup.len();
        self.install(snapshot).await?;

        tracing::info!(
            "Installed snapshot with {} machines (topology {})",
            machines,
            if topology_changed { "changed" } else { "unchanged" }
        );

        Ok(MachineRefresh::Updated { machines, topology_changed })
    }

    /// Load the last good status dump from the cache, if nothing newer is installed.
    /// Returns true if a snapshot was restored.
    pub async fn restore(&self) -> Result<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        if self.snapshot.borrow().is_some() {
            return Ok(false);
        }

        let cached = match cache.load().await {
            Ok(Some(cached)) => cached,
            Ok(None) => return Ok(false),
            Err(e) => {
                tracing::warn!("Failed to read snapshot cache: {:#}", e);
                return Ok(false);
            }
        };

        let mut snapshot = match self.parser.parse(&cached.raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Ignoring cached status: {}", e);
                return Ok(false);
            }
        };
        snapshot.fetched_at = cached.fetched_at;

        tracing::info!(
            "Restored {} machines from cache (fetched {})",
            snapshot.lookup.len(),
            cached.fetched_at
        );
        self.install(snapshot).await?;
        Ok(true)
    }

    /// Probe every service on every given machine.
    ///
    /// All in-scope pairs are marked processing before the first probe starts.
    /// At most `max_concurrent_machines` machines are probed at once, each
    /// probing all its services concurrently, and each machine's statuses land
    /// in the table as one batch. If the probe program cannot be launched for a
    /// machine, that machine's unfinished probes are abandoned and their pairs
    /// become `Error`, finished probes keep their status, the remaining
    /// machines are still scanned, and the first such failure is returned.
    pub async fn update_services(
        &self,
        machines: &[Machine],
        services: &[Service],
        timeout: Duration,
    ) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let claim = self.claim(machines, &mut report.skipped);
        if !report.skipped.is_empty() {
            tracing::debug!("Already scanning {} machines, skipping them", report.skipped.len());
        }

        // A machine listed twice is still scanned once
        let mut unclaimed = claim.ids.clone();
        let targets: Vec<&Machine> = machines.iter().filter(|m| unclaimed.remove(&m.id)).collect();
        if targets.is_empty() || services.is_empty() {
            return Ok(report);
        }

        let keys: Vec<ServiceKey> = services.iter().map(Service::key).collect();
        let ids: Vec<MachineId> = targets.iter().map(|m| m.id.clone()).collect();
        let marked = self
            .table
            .mark_processing(ids, keys)
            .await
            .map_err(Error::Table)?;

        tracing::info!(
            "Scanning {} services on {} machines ({} pairs)",
            services.len(),
            targets.len(),
            marked
        );

        let scans: Vec<_> = targets
            .into_iter()
            .map(|machine| self.scan_machine(machine, services, timeout))
            .collect();
        let outcomes: Vec<MachineOutcome> = stream::iter(scans)
            .buffer_unordered(self.max_concurrent_machines)
            .collect()
            .await;
        drop(claim);

        let mut first_failure = None;
        for outcome in outcomes {
            if outcome.published {
                report.scanned.push(outcome.id);
            } else {
                report.dropped.push(outcome.id);
            }
            if first_failure.is_none() {
                first_failure = outcome.failure;
            }
        }

        tracing::info!(
            "Scan finished: {} published, {} dropped, {} skipped",
            report.scanned.len(),
            report.dropped.len(),
            report.skipped.len()
        );

        match first_failure {
            Some(e) => Err(Error::Launch(e)),
            None => Ok(report),
        }
    }

    /// Scan `selection` of the current snapshot (every machine when empty)
    pub async fn scan_selection(
        &self,
        selection: &HashSet<MachineId>,
        catalog: &ServiceCatalog,
        timeout: Duration,
    ) -> Result<ScanReport> {
        let Some(snapshot) = self.snapshot() else {
            tracing::debug!("No snapshot yet, nothing to scan");
            return Ok(ScanReport::default());
        };
        let machines = snapshot.machines_for(selection);
        self.update_services(&machines, catalog.services(), timeout).await
    }

    async fn scan_machine(&self, machine: &Machine, services: &[Service], timeout: Duration) -> MachineOutcome {
        let mut probes: FuturesUnordered<_> = services
            .iter()
            .map(|service| async move {
                (service.key(), self.scanner.probe(machine, service, timeout).await)
            })
            .collect();

        let mut finished = HashMap::new();
        let mut failure = None;
        while let Some((key, result)) = probes.next().await {
            match result {
                Ok(status) => {
                    finished.insert(key, status);
                }
                Err(e) => {
                    tracing::error!("Aborting scan of {}: {}", machine.id, e);
                    failure = Some(e);
                    break;
                }
            }
        }
        // Dropping the rest kills their processes; their pairs become errors
        drop(probes);

        let batch: Vec<(ServiceKey, Status)> = services
            .iter()
            .map(|service| {
                let key = service.key();
                let status = finished.get(&key).copied().unwrap_or(Status::Error);
                (key, status)
            })
            .collect();

        let published = match self.table.publish(machine.id.clone(), batch).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::error!("Failed to publish results for {}: {:#}", machine.id, e);
                false
            }
        };

        MachineOutcome {
            id: machine.id.clone(),
            published,
            failure,
        }
    }

    fn claim<'a>(&'a self, machines: &[Machine], skipped: &mut Vec<MachineId>) -> ScanClaim<'a> {
        let mut scanning = self.scanning.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids = HashSet::new();
        for machine in machines {
            if scanning.insert(machine.id.clone()) {
                ids.insert(machine.id.clone());
            } else if !ids.contains(&machine.id) {
                skipped.push(machine.id.clone());
            }
        }
        ScanClaim {
            scanning: &self.scanning,
            ids,
        }
    }

    /// Reset the table before publishing, so late results for machines that
    /// disappeared are dropped.
    async fn install(&self, snapshot: Snapshot) -> Result<()> {
        self.table.reset(snapshot.ids()).await.map_err(Error::Table)?;
        self.snapshot.send_replace(Some(Arc::new(snapshot)));
        Ok(())
    }

    async fn remember(&self, raw: &[u8], snapshot: &Snapshot) {
        let Some(cache) = &self.cache else {
            return;
        };
        let cached = CachedStatus {
            raw: raw.to_vec(),
            fingerprint: snapshot.fingerprint.clone(),
            fetched_at: snapshot.fetched_at,
        };
        match cache.store(cached).await {
            Ok(changed) => tracing::debug!("Cached status (fingerprint changed: {})", changed),
            Err(e) => tracing::warn!("Failed to cache status: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use serde_json::json;
    use crate::cache::db::SnapshotDb;
    use crate::scanner::testing::{Reply, ScriptedRunner};
    use crate::status::fixtures::{bytes, envelope, machine};

    const SUCCEEDED: &str = "Connection to host port [tcp/*] succeeded!\n";
    const REFUSED: &str = "nc: connect to host port (tcp) failed: Connection refused\n";
    const TIMED_OUT: &str = "nc: connectx to host port (tcp) failed: Operation timed out\n";

    fn ssh() -> Service {
        Service::new("SSH", "ssh", 22)
    }

    fn smb() -> Service {
        Service::new("SMB", "smb", 445)
    }

    fn url(host: &str) -> String {
        format!("{host}.example.ts.net.")
    }

    fn two_machines() -> Vec<u8> {
        bytes(&envelope(machine("n1", "laptop"), vec![machine("n2", "nas")]))
    }

    fn orchestrator(runner: Arc<ScriptedRunner>) -> Orchestrator {
        orchestrator_with(runner, Config::default())
    }

    fn orchestrator_with(runner: Arc<ScriptedRunner>, config: Config) -> Orchestrator {
        Orchestrator::new(&config, runner, TableHandle::spawn())
    }

    fn mid(raw: &str) -> MachineId {
        MachineId::new(raw)
    }

    async fn status(orch: &Orchestrator, id: &str, service: &Service) -> Status {
        orch.table().get(&mid(id), &service.key()).await.unwrap()
    }

    #[tokio::test]
    async fn test_machine_refresh_installs_snapshot() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());
        let orch = orchestrator(runner);

        let refresh = orch.update_machines().await.unwrap();
        assert_eq!(refresh, MachineRefresh::Updated { machines: 2, topology_changed: true });

        let snapshot = orch.snapshot().unwrap();
        let ids: Vec<&str> = snapshot.machines.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["n1", "n2"]);
        assert!(orch.table().all().await.unwrap().is_empty());

        let again = orch.update_machines().await.unwrap();
        assert_eq!(again, MachineRefresh::Updated { machines: 2, topology_changed: false });
    }

    #[tokio::test]
    async fn test_machine_refresh_clears_statuses() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());
        runner.reply_all(Reply::Stderr(SUCCEEDED));
        let orch = orchestrator(runner);

        orch.update_machines().await.unwrap();
        let machines = orch.snapshot().unwrap().all_machines();
        orch.update_services(&machines, &[ssh()], Duration::from_secs(3)).await.unwrap();
        assert_eq!(status(&orch, "n1", &ssh()).await, Status::Online);

        orch.update_machines().await.unwrap();
        assert_eq!(status(&orch, "n1", &ssh()).await, Status::Unknown);
    }

    #[tokio::test]
    async fn test_malformed_status_keeps_previous_snapshot() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());
        runner.reply_all(Reply::Stderr(REFUSED));
        let orch = orchestrator(runner.clone());

        orch.update_machines().await.unwrap();
        let before = orch.snapshot().unwrap();
        let machines = before.all_machines();
        orch.update_services(&machines, &[ssh()], Duration::from_secs(3)).await.unwrap();

        let mut broken = machine("n2", "nas");
        broken.as_object_mut().unwrap().remove("Created");
        runner.set_status(0, bytes(&envelope(machine("n1", "laptop"), vec![broken])));

        let err = orch.update_machines().await.unwrap_err();
        assert!(matches!(err, Error::MalformedStatus(_)), "{err}");

        let after = orch.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(status(&orch, "n2", &ssh()).await, Status::Offline);
    }

    #[tokio::test]
    async fn test_daemon_failure_is_surfaced() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(1, b"failed to connect to local tailscaled".to_vec());
        let orch = orchestrator(runner.clone());

        assert!(matches!(orch.update_machines().await, Err(Error::Daemon { code: Some(1), .. })));
        assert!(orch.snapshot().is_none());

        runner.status_fails_to_launch.store(true, Ordering::SeqCst);
        assert!(matches!(orch.update_machines().await, Err(Error::Launch(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_machine_refresh_runs_once() {
        let runner = Arc::new(ScriptedRunner {
            status_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        runner.set_status(0, two_machines());
        let orch = orchestrator(runner.clone());

        let (a, b) = tokio::join!(orch.update_machines(), orch.update_machines());
        let mut outcomes = [a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, MachineRefresh::AlreadyRunning));

        assert!(matches!(outcomes[0], MachineRefresh::Updated { machines: 2, .. }));
        assert_eq!(outcomes[1], MachineRefresh::AlreadyRunning);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_connect_does_not_block_other_machines() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());
        runner.reply(&url("nas"), 22, Reply::Hang);
        runner.reply(&url("nas"), 445, Reply::Stderr(REFUSED));
        runner.reply(&url("laptop"), 22, Reply::Stderr(SUCCEEDED));
        runner.reply(&url("laptop"), 445, Reply::Stderr(TIMED_OUT));
        let orch = Arc::new(orchestrator(runner));
        orch.update_machines().await.unwrap();

        let machines = orch.snapshot().unwrap().all_machines();
        let scan = {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.update_services(&machines, &[ssh(), smb()], Duration::from_secs(1)).await
            })
        };

        let mut laptop_done = false;
        for _ in 0..1000 {
            if status(&orch, "n1", &ssh()).await == Status::Online {
                laptop_done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(laptop_done, "laptop results should land while nas is still probing");
        assert_eq!(status(&orch, "n1", &smb()).await, Status::Error);
        // nas publishes as one batch, so its finished SMB probe is not visible yet
        assert_eq!(status(&orch, "n2", &ssh()).await, Status::Processing);
        assert_eq!(status(&orch, "n2", &smb()).await, Status::Processing);

        let report = scan.await.unwrap().unwrap();
        assert_eq!(report.scanned.len(), 2);
        assert_eq!(status(&orch, "n2", &ssh()).await, Status::Error);
        assert_eq!(status(&orch, "n2", &smb()).await, Status::Offline);
    }

    #[tokio::test]
    async fn test_rescans_leave_no_processing() {
        let runner = Arc::new(ScriptedRunner::default());
        let mut nas = machine("n2", "nas");
        nas["PrimaryRoutes"] = json!(["10.0.0.0/30"]);
        runner.set_status(0, bytes(&envelope(machine("n1", "laptop"), vec![nas])));
        runner.reply_all(Reply::Stderr(SUCCEEDED));
        let orch = orchestrator(runner.clone());
        orch.update_machines().await.unwrap();

        let machines = orch.snapshot().unwrap().all_machines();
        assert_eq!(machines.len(), 6);
        let services = [ssh(), smb()];

        orch.update_services(&machines, &services, Duration::from_secs(3)).await.unwrap();
        runner.reply(&url("nas"), 22, Reply::Stderr(REFUSED));
        let report = orch.update_services(&machines, &services, Duration::from_secs(3)).await.unwrap();
        assert_eq!(report.scanned.len(), 6);

        let all = orch.table().all().await.unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.values().flat_map(|row| row.values()).all(|s| s.is_terminal()));
        assert_eq!(status(&orch, "n2", &ssh()).await, Status::Offline);
        assert_eq!(status(&orch, "n2:10.0.0.2", &smb()).await, Status::Online);
    }

    #[tokio::test]
    async fn test_machine_concurrency_is_bounded() {
        let runner = Arc::new(ScriptedRunner {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let peers = (2..=7).map(|i| machine(&format!("n{i}"), &format!("host{i}"))).collect();
        runner.set_status(0, bytes(&envelope(machine("n1", "laptop"), peers)));
        runner.reply_all(Reply::Stderr(SUCCEEDED));

        let mut config = Config::default();
        config.scanning.max_concurrent_machines = 2;
        let orch = orchestrator_with(runner.clone(), config);
        orch.update_machines().await.unwrap();

        let machines = orch.snapshot().unwrap().all_machines();
        let report = orch.update_services(&machines, &[ssh()], Duration::from_secs(3)).await.unwrap();

        assert_eq!(report.scanned.len(), 7);
        let peak = runner.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency {peak}");
    }

    #[tokio::test]
    async fn test_machine_already_scanning_is_skipped() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let runner = Arc::new(ScriptedRunner {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        runner.set_status(0, two_machines());
        runner.reply_all(Reply::Stderr(SUCCEEDED));
        let orch = Arc::new(orchestrator(runner));
        orch.update_machines().await.unwrap();

        let snapshot = orch.snapshot().unwrap();
        let nas = vec![snapshot.machine(&mid("n2")).unwrap().clone()];
        let both = snapshot.all_machines();

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.update_services(&nas, &[ssh()], Duration::from_secs(3)).await })
        };
        while status(&orch, "n2", &ssh()).await != Status::Processing {
            tokio::task::yield_now().await;
        }

        let second = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.update_services(&both, &[ssh()], Duration::from_secs(3)).await })
        };
        while status(&orch, "n1", &ssh()).await != Status::Processing {
            tokio::task::yield_now().await;
        }
        gate.add_permits(2);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.scanned, [mid("n2")]);
        assert_eq!(second.scanned, [mid("n1")]);
        assert_eq!(second.skipped, [mid("n2")]);
        assert_eq!(status(&orch, "n2", &ssh()).await, Status::Online);
    }

    #[tokio::test]
    async fn test_results_for_vanished_machine_are_dropped() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let runner = Arc::new(ScriptedRunner {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        runner.set_status(0, two_machines());
        runner.reply_all(Reply::Stderr(SUCCEEDED));
        let orch = Arc::new(orchestrator(runner.clone()));
        orch.update_machines().await.unwrap();

        let nas = vec![orch.snapshot().unwrap().machine(&mid("n2")).unwrap().clone()];
        let scan = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.update_services(&nas, &[ssh()], Duration::from_secs(3)).await })
        };
        while status(&orch, "n2", &ssh()).await != Status::Processing {
            tokio::task::yield_now().await;
        }

        runner.set_status(0, bytes(&envelope(machine("n1", "laptop"), vec![])));
        orch.update_machines().await.unwrap();
        gate.add_permits(1);

        let report = scan.await.unwrap().unwrap();
        assert_eq!(report.dropped, [mid("n2")]);
        assert!(report.scanned.is_empty());
        assert!(orch.table().all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_launch_failure_aborts_only_that_machine() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());
        runner.reply_all(Reply::Stderr(SUCCEEDED));
        runner.reply(&url("nas"), 445, Reply::LaunchAfter(Duration::from_millis(50)));
        runner.reply(&url("nas"), 3389, Reply::Hang);
        let orch = orchestrator(runner);
        orch.update_machines().await.unwrap();

        let rdp = Service::new("RDP", "rdp", 3389);
        let services = [ssh(), smb(), rdp.clone()];
        let machines = orch.snapshot().unwrap().all_machines();
        let result = orch.update_services(&machines, &services, Duration::from_secs(3)).await;
        assert!(matches!(result, Err(Error::Launch(_))));

        for service in &services {
            assert_eq!(status(&orch, "n1", service).await, Status::Online);
        }
        // finished before the failure, so its result stands
        assert_eq!(status(&orch, "n2", &ssh()).await, Status::Online);
        assert_eq!(status(&orch, "n2", &smb()).await, Status::Error);
        // abandoned while still connecting
        assert_eq!(status(&orch, "n2", &rdp).await, Status::Error);
    }

    #[tokio::test]
    async fn test_machine_listed_twice_is_scanned_once() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());
        runner.reply_all(Reply::Stderr(SUCCEEDED));
        let orch = orchestrator(runner.clone());
        orch.update_machines().await.unwrap();

        let nas = orch.snapshot().unwrap().machine(&mid("n2")).unwrap().clone();
        let report = orch
            .update_services(&[nas.clone(), nas], &[ssh()], Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(report.scanned, [mid("n2")]);
        assert!(report.skipped.is_empty());
        // one status call plus one connect attempt
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scan_selection() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());
        runner.reply_all(Reply::Stderr(SUCCEEDED));
        let orch = orchestrator(runner);
        let catalog = ServiceCatalog::new(vec![ssh()]);

        let empty = orch.scan_selection(&HashSet::new(), &catalog, Duration::from_secs(3)).await.unwrap();
        assert_eq!(empty, ScanReport::default());

        orch.update_machines().await.unwrap();
        let selection: HashSet<MachineId> = [mid("n2")].into_iter().collect();
        let report = orch.scan_selection(&selection, &catalog, Duration::from_secs(3)).await.unwrap();
        assert_eq!(report.scanned, [mid("n2")]);
        assert_eq!(status(&orch, "n1", &ssh()).await, Status::Unknown);

        let report = orch.scan_selection(&HashSet::new(), &catalog, Duration::from_secs(3)).await.unwrap();
        assert_eq!(report.scanned.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_from_cache() {
        let path = std::env::temp_dir().join(format!("tailmon-restore-{}.db", std::process::id()));
        let runner = Arc::new(ScriptedRunner::default());
        runner.set_status(0, two_machines());

        let first = orchestrator(runner.clone()).with_cache(CacheHandle::spawn(SnapshotDb::open(&path).unwrap()));
        assert!(!first.restore().await.unwrap(), "empty cache restores nothing");
        first.update_machines().await.unwrap();
        let fingerprint = first.snapshot().unwrap().fingerprint.clone();
        drop(first);

        let second = orchestrator(runner).with_cache(CacheHandle::spawn(SnapshotDb::open(&path).unwrap()));
        assert!(second.restore().await.unwrap());
        let restored = second.snapshot().unwrap();
        assert_eq!(restored.fingerprint, fingerprint);
        assert!(restored.contains(&mid("n2")));
        assert!(!second.restore().await.unwrap(), "existing snapshot is kept");

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
