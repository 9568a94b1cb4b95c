use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::*;
use crate::observability::{SLOTS_STORED, WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::EngineError;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then fsyncs once and answers every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                // Non-appends run after the current batch is durable.
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL commit of {} events failed: {e}", batch.len());
    }

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Apply an event to the table. Caller holds the write lock.
fn apply_event(table: &mut SlotTable, event: &Event) {
    match event {
        Event::SlotScheduled { slot } => table.insert_slot(slot.clone()),
        Event::SlotsReaped { ids } => {
            table.remove_slots(ids);
        }
    }
}

/// Durable slot storage: a start-sorted table in memory, every change logged
/// to the WAL before it is applied.
pub struct SlotStore {
    table: RwLock<SlotTable>,
    wal_tx: mpsc::Sender<WalCommand>,
    timeout: Duration,
}

impl SlotStore {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf, timeout: Duration) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut table = SlotTable::new();
        for event in &events {
            apply_event(&mut table, event);
        }
        tracing::info!(
            "replayed {} WAL events into {} slots from {}",
            events.len(),
            table.len(),
            wal_path.display()
        );
        metrics::gauge!(SLOTS_STORED).set(table.len() as f64);

        Ok(Self {
            table: RwLock::new(table),
            wal_tx,
            timeout,
        })
    }

    pub async fn read(&self) -> Result<RwLockReadGuard<'_, SlotTable>, EngineError> {
        tokio::time::timeout(self.timeout, self.table.read())
            .await
            .map_err(|_| EngineError::Storage("timed out waiting to read slots".into()))
    }

    /// Exclusive access to the table. Holding this guard is what makes
    /// check-then-insert atomic.
    pub async fn write(&self) -> Result<RwLockWriteGuard<'_, SlotTable>, EngineError> {
        tokio::time::timeout(self.timeout, self.table.write())
            .await
            .map_err(|_| EngineError::Storage("timed out waiting to write slots".into()))
    }

    async fn send(&self, cmd: WalCommand) -> Result<(), EngineError> {
        self.wal_tx
            .send_timeout(cmd, self.timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    EngineError::Storage("timed out queueing WAL write".into())
                }
                mpsc::error::SendTimeoutError::Closed(_) => {
                    EngineError::Storage("WAL writer shut down".into())
                }
            })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await?;
        // Once queued, the writer always answers. Abandoning the wait here
        // could leave an event on disk that memory never saw.
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append then apply. On error the table is untouched.
    pub async fn persist_and_apply(
        &self,
        table: &mut SlotTable,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(table, event);
        metrics::gauge!(SLOTS_STORED).set(table.len() as f64);
        Ok(())
    }

    /// Persist a new slot. Callers must have checked for conflicts under the
    /// same guard.
    pub async fn create(&self, table: &mut SlotTable, slot: Slot) -> Result<(), EngineError> {
        self.persist_and_apply(table, &Event::SlotScheduled { slot })
            .await
    }

    /// Delete a batch of slots with one WAL record and one fsync. Ids no
    /// longer stored are dropped first. Returns how many were removed.
    pub async fn delete_many(
        &self,
        table: &mut SlotTable,
        mut ids: Vec<ulid::Ulid>,
    ) -> Result<usize, EngineError> {
        let stored: HashSet<ulid::Ulid> = table.slots.iter().map(|s| s.id).collect();
        ids.retain(|id| stored.contains(id));
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len();
        self.persist_and_apply(table, &Event::SlotsReaped { ids })
            .await?;
        Ok(count)
    }

    /// Rewrite the WAL as one `SlotScheduled` per stored slot.
    pub async fn compact(&self) -> Result<(), EngineError> {
        // Read lock keeps writers out while the snapshot is taken; the writer
        // task orders the swap after any appends already queued.
        let table = self.read().await?;
        let events: Vec<Event> = table
            .slots
            .iter()
            .map(|slot| Event::SlotScheduled { slot: slot.clone() })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Compact { events, response: tx })
            .await?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()));
        drop(table);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
