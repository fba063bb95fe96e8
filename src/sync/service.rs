//! Commit and fan-out logic shared by the channel and the fallback API.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::hub::{ClientId, Frame, Hub};
use super::protocol::{decode_collection, ServerEvent};
use crate::errors::AppError;
use crate::models::{validate_collection, Expediente, SchemaVariant};
use crate::store::{RecordStore, Snapshot};

/// Where an accepted replacement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A channel client; it already holds what it sent and is not echoed.
    Channel(ClientId),
    /// A fallback write; every channel client is notified.
    Fallback,
}

impl Origin {
    fn excluded(&self) -> Option<ClientId> {
        match self {
            Origin::Channel(id) => Some(*id),
            Origin::Fallback => None,
        }
    }
}

/// A registered channel client.
pub struct Connection {
    pub id: ClientId,
    pub frames: mpsc::Receiver<Frame>,
}

/// Last-writer-wins synchronization over the record store.
pub struct SyncService {
    store: Arc<RecordStore>,
    hub: Hub,
    schema: SchemaVariant,
    // Serializes replace, save and broadcast so peers see commits in store order.
    commit: Mutex<()>,
}

impl SyncService {
    pub fn new(store: Arc<RecordStore>, schema: SchemaVariant) -> Self {
        Self {
            store,
            hub: Hub::new(),
            schema,
            commit: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub async fn client_count(&self) -> usize {
        self.hub.client_count().await
    }

    /// Register a client and queue `init` with the current collection for it alone.
    pub async fn connect(&self) -> Result<Connection, AppError> {
        // Holding the commit lock keeps a concurrent update from slipping
        // between the init snapshot and the registration.
        let _commit = self.commit.lock().await;
        let (id, frames) = self.hub.register().await;
        let records = self.store.get_all().await;
        let frame = ServerEvent::Init(&records).encode()?;
        self.hub.send_to(id, Frame::from(frame)).await;

        let clients = self.hub.client_count().await;
        tracing::info!(
            client_id = id,
            clients,
            records = records.len(),
            "Client connected"
        );
        Ok(Connection { id, frames })
    }

    pub async fn disconnect(&self, id: ClientId) {
        if self.hub.unregister(id).await {
            let clients = self.hub.client_count().await;
            tracing::info!(client_id = id, clients, "Client disconnected");
        }
    }

    /// Check a raw payload the way every write boundary does.
    pub fn accept(&self, payload: serde_json::Value) -> Result<Vec<Expediente>, AppError> {
        let records = decode_collection(payload)?;
        validate_collection(&records, self.schema)?;
        Ok(records)
    }

    /// Replace the whole collection and fan the result out.
    pub async fn commit(&self, origin: Origin, records: Vec<Expediente>) -> Snapshot {
        let _commit = self.commit.lock().await;
        let snapshot = self.store.replace_all(records).await;

        let notified = match ServerEvent::SyncExpedientes(&snapshot.records).encode() {
            Ok(frame) => {
                self.hub
                    .broadcast(Frame::from(frame), origin.excluded())
                    .await
            }
            Err(e) => {
                tracing::error!("Failed to encode sync frame: {}", e);
                0
            }
        };

        tracing::info!(
            origin = ?origin,
            revision = snapshot.revision,
            records = snapshot.records.len(),
            notified,
            "Collection replaced"
        );
        snapshot
    }

    /// `update_expedientes` from a channel client.
    pub async fn submit_update(
        &self,
        from: ClientId,
        payload: serde_json::Value,
    ) -> Result<Snapshot, AppError> {
        let records = self.accept(payload)?;
        tracing::info!(client_id = from, records = records.len(), "Update received");
        Ok(self.commit(Origin::Channel(from), records).await)
    }

    /// `get_latest` from a channel client: re-send the current collection to it alone.
    pub async fn request_latest(&self, id: ClientId) -> Result<(), AppError> {
        tracing::info!(client_id = id, "Manual sync requested");
        let records = self.store.get_all().await;
        let frame = ServerEvent::SyncExpedientes(&records).encode()?;
        self.hub.send_to(id, Frame::from(frame)).await;
        Ok(())
    }

    /// Tell one client its frame was rejected.
    pub async fn reject(&self, id: ClientId, error: &AppError) {
        let event = ServerEvent::Error {
            message: error.message(),
        };
        if let Ok(frame) = event.encode() {
            self.hub.send_to(id, Frame::from(frame)).await;
        }
    }
}
