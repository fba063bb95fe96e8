//! Authoritative in-memory record store.
//!
//! The store is built from the data file at startup and rewrites the whole
//! file after every accepted replacement. The in-memory collection stays
//! authoritative when a write fails.

mod persistence;

pub use persistence::*;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::models::Expediente;

/// A collection as of one accepted replacement.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Number of replacements accepted since the process started
    pub revision: u64,
    pub records: Arc<Vec<Expediente>>,
}

/// Ordered collection of records with replace-whole-collection semantics.
pub struct RecordStore {
    state: Mutex<Snapshot>,
    persistence: JsonFilePersistence,
}

impl RecordStore {
    /// Build the store from durable storage.
    pub async fn open(persistence: JsonFilePersistence) -> Self {
        let records = persistence.load().await;
        Self::with_records(persistence, records)
    }

    pub fn with_records(persistence: JsonFilePersistence, records: Vec<Expediente>) -> Self {
        Self {
            state: Mutex::new(Snapshot {
                revision: 0,
                records: Arc::new(records),
            }),
            persistence,
        }
    }

    /// Current collection in insertion/sync order.
    pub async fn get_all(&self) -> Arc<Vec<Expediente>> {
        self.state.lock().await.records.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.clone()
    }

    /// Discard the current collection and install `records`.
    ///
    /// The replacement and its file write happen under one lock, so
    /// concurrent callers never interleave partial writes. A failed write is
    /// logged and the replacement still stands.
    pub async fn replace_all(&self, records: Vec<Expediente>) -> Snapshot {
        let mut state = self.state.lock().await;
        state.records = Arc::new(records);
        state.revision += 1;

        if let Err(e) = self.persistence.save(&state.records).await {
            tracing::error!(
                revision = state.revision,
                "Error saving data file, in-memory state is ahead of disk: {}",
                e
            );
        }

        state.clone()
    }

    /// Write the current collection once more, used at shutdown.
    pub async fn flush(&self) {
        let state = self.state.lock().await;
        if let Err(e) = self.persistence.save(&state.records).await {
            tracing::error!("Final save failed: {}", e);
        }
    }
}
