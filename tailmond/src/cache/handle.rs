use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use crate::cache::db::{CachedStatus, SnapshotDb};

/// Commands sent to the cache thread
pub enum CacheCommand {
    Store(CachedStatus, oneshot::Sender<Result<bool>>),
    Load(oneshot::Sender<Result<Option<CachedStatus>>>),
    Shutdown,
}

/// Handle to the snapshot database, which lives on its own thread so SQLite
/// never runs on a runtime worker.
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheCommand>,
}

impl CacheHandle {
    /// Spawn a new cache thread owning `db`
    pub fn spawn(db: SnapshotDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<CacheCommand>(16);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    CacheCommand::Store(status, reply) => {
                        let _ = reply.send(db.store(&status));
                    }
                    CacheCommand::Load(reply) => {
                        let _ = reply.send(db.load());
                    }
                    CacheCommand::Shutdown => {
                        tracing::info!("Cache thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Replace the stored status. Returns true if the fingerprint changed.
    pub async fn store(&self, status: CachedStatus) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Store(status, reply)).await?;
        rx.await?
    }

    pub async fn load(&self) -> Result<Option<CachedStatus>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Load(reply)).await?;
        rx.await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(CacheCommand::Shutdown).await?;
        Ok(())
    }
}
