//! Registry of connected channel clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

/// Identifier of one channel connection.
pub type ClientId = u64;

/// An encoded frame shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

/// Frames queued per client before it counts as too slow and is dropped.
const CLIENT_QUEUE: usize = 256;

/// Broadcast registry. Dropping a client's sender closes its writer.
#[derive(Default)]
pub struct Hub {
    clients: RwLock<HashMap<ClientId, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client, returning its id and the queue its writer drains.
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        self.clients.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister(&self, id: ClientId) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Queue a frame for one client.
    pub async fn send_to(&self, id: ClientId, frame: Frame) -> bool {
        let sent = match self.clients.read().await.get(&id) {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => return false,
        };
        if !sent {
            tracing::warn!(client_id = id, "Client queue full or closed, dropping client");
            self.unregister(id).await;
        }
        sent
    }

    /// Queue a frame for every client except `except`. Returns how many got it.
    pub async fn broadcast(&self, frame: Frame, except: Option<ClientId>) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        for (id, tx) in self.clients.read().await.iter() {
            if Some(*id) == except {
                continue;
            }
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => stale.push(*id),
            }
        }

        if !stale.is_empty() {
            let mut clients = self.clients.write().await;
            for id in stale {
                tracing::warn!(client_id = id, "Client queue full or closed, dropping client");
                clients.remove(&id);
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::from(text)
    }

    #[tokio::test]
    async fn test_register_assigns_unique_ids() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.register().await;
        let (b, _rx_b) = hub.register().await;
        assert_ne!(a, b);
        assert_eq!(hub.client_count().await, 2);

        assert!(hub.unregister(a).await);
        assert!(!hub.unregister(a).await);
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;
        let (_c, mut rx_c) = hub.register().await;

        assert_eq!(hub.broadcast(frame("hello"), Some(a)).await, 2);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(&*rx_b.try_recv().unwrap(), "hello");
        assert_eq!(&*rx_c.try_recv().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_broadcast_without_exclusion_reaches_all() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;

        assert_eq!(hub.broadcast(frame("all"), None).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_closed_client_is_dropped() {
        let hub = Hub::new();
        let (_a, rx_a) = hub.register().await;
        let (b, _rx_b) = hub.register().await;
        drop(rx_a);

        assert_eq!(hub.broadcast(frame("x"), None).await, 1);
        assert_eq!(hub.client_count().await, 1);
        assert!(hub.send_to(b, frame("y")).await);
    }

    #[tokio::test]
    async fn test_send_to_unknown_client() {
        let hub = Hub::new();
        assert!(!hub.send_to(99, frame("x")).await);
    }
}
