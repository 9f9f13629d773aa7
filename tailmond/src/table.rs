use std::collections::{HashMap, HashSet};
use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use shared::types::{MachineId, ServiceKey, Status, StatusMap};

/// Commands sent to the table thread
pub enum TableCommand {
    Reset(HashSet<MachineId>, oneshot::Sender<()>),
    MarkProcessing(Vec<MachineId>, Vec<ServiceKey>, oneshot::Sender<usize>),
    Set(MachineId, ServiceKey, Status, oneshot::Sender<bool>),
    Publish(MachineId, Vec<(ServiceKey, Status)>, oneshot::Sender<bool>),
    Get(MachineId, ServiceKey, oneshot::Sender<Status>),
    GetMachine(MachineId, oneshot::Sender<HashMap<ServiceKey, Status>>),
    GetAll(oneshot::Sender<StatusMap>),
    Shutdown,
}

/// Statuses plus the machine IDs of the snapshot they belong to.
/// Writes for machines outside that set are dropped.
#[derive(Default)]
struct TableState {
    known: HashSet<MachineId>,
    statuses: StatusMap,
}

impl TableState {
    fn reset(&mut self, known: HashSet<MachineId>) {
        self.known = known;
        self.statuses.clear();
    }

    fn mark_processing(&mut self, ids: Vec<MachineId>, keys: &[ServiceKey]) -> usize {
        let mut marked = 0;
        for id in ids {
            if !self.known.contains(&id) {
                continue;
            }
            let row = self.statuses.entry(id).or_default();
            for key in keys {
                row.insert(key.clone(), Status::Processing);
                marked += 1;
            }
        }
        marked
    }

    fn publish(&mut self, id: MachineId, batch: Vec<(ServiceKey, Status)>) -> bool {
        if !self.known.contains(&id) {
            tracing::debug!("Dropping results for {} (no longer in snapshot)", id);
            return false;
        }
        self.statuses.entry(id).or_default().extend(batch);
        true
    }

    fn get(&self, id: &MachineId, key: &ServiceKey) -> Status {
        self.statuses
            .get(id)
            .and_then(|row| row.get(key))
            .copied()
            .unwrap_or_default()
    }
}

/// Handle to the machine × service status table.
///
/// The map lives on its own thread; every mutation is one message, so a
/// per-machine batch becomes visible all at once. Each mutation bumps the
/// revision published on [`TableHandle::subscribe`].
#[derive(Clone)]
pub struct TableHandle {
    tx: mpsc::Sender<TableCommand>,
    revision: watch::Receiver<u64>,
}

impl TableHandle {
    /// Spawn a new table thread
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<TableCommand>(256);
        let (revision_tx, revision) = watch::channel(0u64);

        let bump = move |revision_tx: &watch::Sender<u64>| {
            revision_tx.send_modify(|r| *r += 1);
        };

        thread::spawn(move || {
            let mut state = TableState::default();
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    TableCommand::Reset(known, reply) => {
                        state.reset(known);
                        bump(&revision_tx);
                        let _ = reply.send(());
                    }
                    TableCommand::MarkProcessing(ids, keys, reply) => {
                        let marked = state.mark_processing(ids, &keys);
                        if marked > 0 {
                            bump(&revision_tx);
                        }
                        let _ = reply.send(marked);
                    }
                    TableCommand::Set(id, key, status, reply) => {
                        let applied = state.publish(id, vec![(key, status)]);
                        if applied {
                            bump(&revision_tx);
                        }
                        let _ = reply.send(applied);
                    }
                    TableCommand::Publish(id, batch, reply) => {
                        let applied = state.publish(id, batch);
                        if applied {
                            bump(&revision_tx);
                        }
                        let _ = reply.send(applied);
                    }
                    TableCommand::Get(id, key, reply) => {
                        let _ = reply.send(state.get(&id, &key));
                    }
                    TableCommand::GetMachine(id, reply) => {
                        let row = state.statuses.get(&id).cloned().unwrap_or_default();
                        let _ = reply.send(row);
                    }
                    TableCommand::GetAll(reply) => {
                        let _ = reply.send(state.statuses.clone());
                    }
                    TableCommand::Shutdown => {
                        tracing::info!("Status table thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx, revision }
    }

    /// Forget every status and accept writes only for `known` machines
    pub async fn reset(&self, known: HashSet<MachineId>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TableCommand::Reset(known, reply)).await?;
        Ok(rx.await?)
    }

    /// Mark every (machine, service) pair processing. Returns pairs marked.
    pub async fn mark_processing(&self, ids: Vec<MachineId>, keys: Vec<ServiceKey>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TableCommand::MarkProcessing(ids, keys, reply)).await?;
        Ok(rx.await?)
    }

    /// Set one status. Returns false if the machine is not in the current snapshot.
    pub async fn set(&self, id: MachineId, key: ServiceKey, status: Status) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TableCommand::Set(id, key, status, reply)).await?;
        Ok(rx.await?)
    }

    /// Apply all of one machine's results at once
    pub async fn publish(&self, id: MachineId, batch: Vec<(ServiceKey, Status)>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TableCommand::Publish(id, batch, reply)).await?;
        Ok(rx.await?)
    }

    pub fn view(&self) -> TableView {
        TableView { inner: self.clone() }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    /// Shutdown the table thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(TableCommand::Shutdown).await?;
        Ok(())
    }

    async fn get(&self, id: MachineId, key: ServiceKey) -> Result<Status> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TableCommand::Get(id, key, reply)).await?;
        Ok(rx.await?)
    }

    async fn machine(&self, id: MachineId) -> Result<HashMap<ServiceKey, Status>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TableCommand::GetMachine(id, reply)).await?;
        Ok(rx.await?)
    }

    async fn all(&self) -> Result<StatusMap> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TableCommand::GetAll(reply)).await?;
        Ok(rx.await?)
    }
}

/// Read-only side of the table, handed to presentation
#[derive(Clone)]
pub struct TableView {
    inner: TableHandle,
}

impl TableView {
    /// Status of one pair; `Unknown` if never scanned
    pub async fn get(&self, id: &MachineId, key: &ServiceKey) -> Result<Status> {
        self.inner.get(id.clone(), key.clone()).await
    }

    pub async fn machine(&self, id: &MachineId) -> Result<HashMap<ServiceKey, Status>> {
        self.inner.machine(id.clone()).await
    }

    pub async fn all(&self) -> Result<StatusMap> {
        self.inner.all().await
    }

    /// Revision counter bumped at least once per applied update
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.subscribe()
    }
}
