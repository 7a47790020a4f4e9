use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::wal::Wal;

use super::EngineError;

/// Durable storage for ledger events. An event is committed once `append`
/// returns `Ok`; the engine applies it in memory only after that.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, event: &Event) -> Result<(), EngineError>;
}

// ── Group-commit WAL ─────────────────────────────────────

struct PendingAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// WAL-backed journal. A background task owns the file and batches
/// concurrent appends into a single fsync.
pub struct WalJournal {
    tx: mpsc::Sender<PendingAppend>,
}

impl WalJournal {
    /// Replay `path` and start the writer. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (wal, history) = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Ok((Self { tx }, history))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(PendingAppend {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Journal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))
    }
}

/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Commit the batch as one unit: one write, one sync.
/// 4. Respond to every sender with the shared outcome. A failed batch is
///    absent from the log, so every caller in it sees `Err`.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<PendingAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let events: Vec<&Event> = batch.iter().map(|pending| &pending.event).collect();
        let result = wal.commit(&events);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(
                path = %wal.path().display(),
                batch = batch.len(),
                "ledger commit failed: {e}"
            );
        }

        for pending in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = pending.response.send(r);
        }
    }
}

// ── In-memory journal ────────────────────────────────────

/// Keeps events in memory. `fail_appends` makes every append fail until
/// cleared, which is how tests exercise the storage-failure path.
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<Event>>,
    fail: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        // Give competing writers a chance to interleave, as a real fsync would.
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Journal("injected append failure".into()));
        }
        self.events
            .lock()
            .map_err(|_| EngineError::Journal("memory journal poisoned".into()))?
            .push(event.clone());
        Ok(())
    }
}
