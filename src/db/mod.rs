use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

use migrations::run_migrations;
use repositories::{EventRepository, RegistryRepository, SnapshotRepository};

use crate::tree::{AccessibleObjectRef, EventKind};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseInner {
    fn shutdown(&self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("failed to join DB thread: {join_err:?}");
            }
        }
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// SHA-256 hex digest of widget text, the snapshot dedup key. Empty text
/// produces the fixed empty-string digest, so "became empty" transitions
/// are recorded rather than skipped.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Everything one observed change writes, committed in a single
/// transaction: the registry upsert, the optional snapshot, and the event
/// row succeed or fail together.
#[derive(Debug, Clone)]
pub struct Observation {
    pub object: AccessibleObjectRef,
    pub text_capable: bool,
    /// Already-redacted text to snapshot; `None` means no snapshot attempt.
    pub text: Option<String>,
    /// Store the text body itself, not only its hash.
    pub store_content: bool,
    pub kind: EventKind,
    pub detail: Option<String>,
    /// Record the event row even when no new snapshot was inserted (live
    /// bus notifications). Walker-discovered observations only emit an
    /// event for genuinely new content.
    pub event_always: bool,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationOutcome {
    pub snapshot_inserted: bool,
    pub event_id: Option<i64>,
}

/// Handle to the store. A dedicated worker thread owns the single SQLite
/// connection; clones of this handle submit closures and await the reply,
/// which serializes every write.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    /// Open (or create) the datastore and bring the schema up to date.
    /// Fails if the path is unwritable or the existing schema is newer than
    /// this build supports.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("axwatch-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("database initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Commit everything one observation writes atomically. A reader never
    /// sees an event without its registry entry.
    pub async fn record_observation(&self, observation: Observation) -> Result<ObservationOutcome> {
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open observation transaction")?;

            let object_id = observation.object.object_id();
            RegistryRepository::new(&tx).upsert(
                &observation.object,
                observation.text_capable,
                observation.observed_at,
            )?;

            let mut snapshot_inserted = false;
            if let Some(text) = &observation.text {
                let text_hash = hash_text(text);
                let body = observation.store_content.then(|| text.as_str());
                snapshot_inserted = SnapshotRepository::new(&tx).record(
                    &object_id,
                    &text_hash,
                    body,
                    observation.observed_at,
                )?;
            }

            let mut event_id = None;
            if observation.event_always || snapshot_inserted {
                event_id = Some(EventRepository::new(&tx).record(
                    observation.kind.as_str(),
                    &object_id,
                    &observation.object.application,
                    observation.detail.as_deref(),
                    observation.observed_at,
                )?);
            }

            tx.commit().context("failed to commit observation")?;
            Ok(ObservationOutcome {
                snapshot_inserted,
                event_id,
            })
        })
        .await
    }

    /// Flush and stop the worker thread. Safe to call more than once; later
    /// calls and `Drop` become no-ops.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}
