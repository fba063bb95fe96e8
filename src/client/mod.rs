//! Client reconciliation runtime.
//!
//! Keeps a local collection in step with the server. The channel is trusted
//! while it is up; when it drops, writes go through the REST fallback and
//! a bounded number of reconnects is attempted. Every local edit is applied
//! and cached immediately, then pushed as the full collection.

mod cache;
mod fallback;
mod state;

pub use cache::*;
pub use fallback::*;
pub use state::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::errors::AppError;
use crate::models::{DailyReport, Expediente, ExpedienteDraft, SchemaVariant};
use crate::status::today;
use crate::sync::protocol::{ClientCommand, ServerUpdate};

type ChannelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A frame queued for the channel writer.
#[derive(Debug)]
enum Outbound {
    /// `update_expedientes` carrying the full collection
    Update(String),
    Command(String),
}

impl Outbound {
    fn is_update(&self) -> bool {
        matches!(self, Outbound::Update(_))
    }

    fn into_text(self) -> String {
        match self {
            Outbound::Update(text) | Outbound::Command(text) => text,
        }
    }
}

/// Client runtime configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the sync server, e.g. `http://127.0.0.1:3000`
    pub server_url: Url,
    /// Directory holding the local cache
    pub cache_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Applies to channel (re)connection and to fallback requests
    pub connect_timeout: Duration,
    /// Record schema the server accepts; local edits are checked against it
    pub schema: SchemaVariant,
}

impl ClientConfig {
    pub fn new(server_url: Url, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_url,
            cache_dir: cache_dir.into(),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            schema: SchemaVariant::Multi,
        }
    }
}

/// Channel endpoint for a server base URL.
pub fn channel_url(server_url: &Url) -> Result<Url, AppError> {
    let mut url = server_url.clone();
    let scheme = match server_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(AppError::Internal(format!(
                "Unsupported server url scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AppError::Internal(format!("Cannot derive channel url from {}", server_url)))?;
    url.set_path("/ws");
    Ok(url)
}

/// A running synchronized client. Dropping it stops its background tasks.
pub struct SyncClient {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<ReconcileState>,
    // Serializes local edits so pushes leave in the order they were applied.
    writes: Mutex<()>,
    cache: LocalCache,
    fallback: FallbackClient,
    ws_url: Url,
    connect_timeout: Duration,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    retry_signal: Notify,
    changes: watch::Sender<u64>,
}

impl SyncClient {
    /// Seed from the cache, then read through the fallback while the
    /// channel connects.
    pub async fn start(config: ClientConfig) -> Result<Self, AppError> {
        let inner = Arc::new(Inner::open(&config).await?);

        let tasks = vec![
            tokio::spawn(inner.clone().initial_read()),
            tokio::spawn(inner.clone().run_channel()),
        ];

        Ok(Self { inner, tasks })
    }

    pub async fn records(&self) -> Vec<Expediente> {
        self.inner.state.lock().await.records().to_vec()
    }

    pub async fn report(&self, today: NaiveDate) -> DailyReport {
        self.inner.state.lock().await.report(today)
    }

    pub async fn connection(&self) -> ConnectionState {
        self.inner.state.lock().await.connection()
    }

    pub async fn synced(&self) -> bool {
        self.inner.state.lock().await.channel_synced()
    }

    pub async fn using_fallback(&self) -> bool {
        self.inner.state.lock().await.using_fallback()
    }

    /// Watch for state changes; the value increases on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Add a record. A draft the server would reject is refused here.
    pub async fn create(&self, draft: ExpedienteDraft) -> Result<Expediente, AppError> {
        let record = Expediente::from_draft(draft, Utc::now().timestamp_millis());
        self.inner.mutate(Mutation::Create(record.clone())).await?;
        Ok(record)
    }

    pub async fn edit(&self, id: &str, draft: ExpedienteDraft) -> Result<bool, AppError> {
        let pushed = self
            .inner
            .mutate(Mutation::Edit {
                id: id.to_string(),
                draft,
            })
            .await?;
        Ok(pushed.is_some())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let pushed = self
            .inner
            .mutate(Mutation::Delete { id: id.to_string() })
            .await?;
        Ok(pushed.is_some())
    }

    pub async fn toggle(&self, id: &str, area: Option<&str>) -> Result<bool, AppError> {
        let pushed = self
            .inner
            .mutate(Mutation::Toggle {
                id: id.to_string(),
                area: area.map(str::to_string),
                today: today(),
            })
            .await?;
        Ok(pushed.is_some())
    }

    /// Ask for the server's current collection over whichever transport is trusted.
    pub async fn refresh(&self) -> Result<Transport, AppError> {
        let transport = self.inner.state.lock().await.transport();
        if transport == Transport::Channel {
            let frame = ClientCommand::GetLatest.encode()?;
            if self.inner.send_frame(Outbound::Command(frame)).await {
                return Ok(Transport::Channel);
            }
        }

        let records = self.inner.fallback.fetch_all().await?;
        self.inner.install(records, Source::Fallback).await;
        Ok(Transport::Fallback)
    }

    /// Reconnect now and restore the automatic retry budget.
    pub async fn retry_now(&self) {
        self.inner.state.lock().await.reset_retries();
        self.inner.retry_signal.notify_one();
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Inner {
    async fn open(config: &ClientConfig) -> Result<Self, AppError> {
        let ws_url = channel_url(&config.server_url)?;
        let fallback = FallbackClient::new(config.server_url.clone(), config.connect_timeout)?;
        let cache = LocalCache::in_dir(&config.cache_dir);

        let mut state = ReconcileState::new(config.retry, config.schema);
        let seed = cache.load().await;
        tracing::debug!(records = seed.len(), "Seeded from local cache");
        state.apply_remote(seed, Source::Cache);

        let (changes, _) = watch::channel(0);
        Ok(Self {
            state: Mutex::new(state),
            writes: Mutex::new(()),
            cache,
            fallback,
            ws_url,
            connect_timeout: config.connect_timeout,
            outbound: Mutex::new(None),
            retry_signal: Notify::new(),
            changes,
        })
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Install a remote collection and mirror it into the cache.
    async fn install(&self, records: Vec<Expediente>, source: Source) -> bool {
        let mut state = self.state.lock().await;
        if !state.apply_remote(records, source) {
            tracing::debug!(source = ?source, "Ignoring collection from an untrusted source");
            return false;
        }
        if let Err(e) = self.cache.store(state.records()).await {
            tracing::warn!("Failed to write local cache: {}", e);
        }
        tracing::debug!(source = ?source, records = state.records().len(), "Collection replaced");
        drop(state);
        self.notify();
        true
    }

    /// Apply a local edit, cache it, then push the full collection.
    ///
    /// `Ok(None)` means the edit targeted a missing record.
    async fn mutate(&self, mutation: Mutation) -> Result<Option<Transport>, AppError> {
        let _writes = self.writes.lock().await;

        let records = {
            let mut state = self.state.lock().await;
            if !state.apply(mutation)? {
                return Ok(None);
            }
            if let Err(e) = self.cache.store(state.records()).await {
                tracing::warn!("Failed to write local cache: {}", e);
            }
            state.records().to_vec()
        };
        self.notify();

        Ok(Some(self.push(&records).await))
    }

    /// Propagate the collection; a failed push is logged, never rolled back.
    async fn push(&self, records: &[Expediente]) -> Transport {
        let transport = self.state.lock().await.transport();
        if transport == Transport::Channel {
            match ClientCommand::UpdateExpedientes(records).encode() {
                Ok(frame) => {
                    if self.send_frame(Outbound::Update(frame)).await {
                        return Transport::Channel;
                    }
                }
                Err(e) => tracing::error!("Failed to encode update: {}", e),
            }
        }

        match self.fallback.replace_all(records).await {
            Ok(count) => tracing::debug!(count, "Fallback write accepted"),
            Err(e) => tracing::warn!("Fallback write failed: {}", e),
        }
        Transport::Fallback
    }

    async fn send_frame(&self, frame: Outbound) -> bool {
        let tx = self.outbound.lock().await.clone();
        match tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Fast first paint from the fallback, superseded once the channel delivers.
    async fn initial_read(self: Arc<Self>) {
        match self.fallback.fetch_all().await {
            Ok(records) => {
                self.install(records, Source::Fallback).await;
            }
            Err(e) => tracing::warn!("Initial fallback read failed: {}", e),
        }
    }

    async fn run_channel(self: Arc<Self>) {
        loop {
            match tokio::time::timeout(self.connect_timeout, connect_async(self.ws_url.as_str()))
                .await
            {
                Ok(Ok((ws, _))) => {
                    self.state.lock().await.on_connected();
                    self.notify();
                    tracing::info!(url = %self.ws_url, "Channel connected");
                    self.session(ws).await;
                    tracing::warn!("Channel lost, writes go through the fallback");
                }
                Ok(Err(e)) => tracing::warn!("Channel connect failed: {}", e),
                Err(_) => tracing::warn!("Channel connect timed out"),
            }

            let delay = {
                let mut state = self.state.lock().await;
                state.on_channel_lost();
                state.next_retry()
            };
            self.notify();

            match delay {
                Some(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.retry_signal.notified() => {}
                    }
                }
                None => {
                    tracing::warn!("Automatic reconnects exhausted, waiting for manual retry");
                    self.retry_signal.notified().await;
                }
            }
        }
    }

    async fn session(&self, ws: ChannelStream) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::channel::<Outbound>(64);
        *self.outbound.lock().await = Some(tx);
        let mut unsent = false;

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("Channel read error: {}", e);
                        break;
                    }
                },
                Some(frame) = rx.recv() => {
                    let update = frame.is_update();
                    if let Err(e) = sink.send(Message::text(frame.into_text())).await {
                        tracing::warn!("Channel write error: {}", e);
                        unsent = update;
                        break;
                    }
                }
            }
        }

        self.finish_session(rx, unsent).await;
    }

    /// Close the outbound queue. When an update never reached the socket,
    /// the current collection is written through the fallback instead.
    async fn finish_session(&self, mut rx: mpsc::Receiver<Outbound>, mut unsent: bool) {
        *self.outbound.lock().await = None;
        // Closing fails any send still waiting for room, so its caller falls back itself.
        rx.close();
        while let Ok(frame) = rx.try_recv() {
            unsent |= frame.is_update();
        }
        drop(rx);

        if !unsent {
            return;
        }

        let _writes = self.writes.lock().await;
        let records = self.state.lock().await.records().to_vec();
        tracing::warn!(
            records = records.len(),
            "Channel closed before an update was written, resending through the fallback"
        );
        match self.fallback.replace_all(&records).await {
            Ok(count) => tracing::debug!(count, "Fallback write accepted"),
            Err(e) => tracing::warn!("Fallback write failed: {}", e),
        }
    }

    async fn handle_frame(&self, raw: &str) {
        match ServerUpdate::decode(raw) {
            Ok(ServerUpdate::Init(records)) | Ok(ServerUpdate::SyncExpedientes(records)) => {
                self.install(records, Source::Channel).await;
            }
            Ok(ServerUpdate::Error { message }) => {
                tracing::warn!("Server rejected an update: {}", message);
            }
            Err(e) => tracing::warn!("Ignoring frame: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{AreaStatus, AreaTracking};
    use crate::store::{JsonFilePersistence, RecordStore};
    use tempfile::TempDir;

    fn draft(numero: &str) -> ExpedienteDraft {
        ExpedienteDraft {
            numero: numero.to_string(),
            asunto: "Oficio".to_string(),
            tracking: AreaTracking::Multi {
                area_servicio: vec![AreaStatus {
                    area: "Compras".to_string(),
                    cumplido: false,
                    fecha_respuesta: String::new(),
                }],
            },
            fecha_inicio: "2024-05-02".to_string(),
            fecha_vencimiento: String::new(),
            observacion: String::new(),
        }
    }

    /// Fallback server backed by a fresh store.
    async fn serve(temp_dir: &TempDir) -> (Url, Arc<RecordStore>) {
        let store = Arc::new(RecordStore::with_records(
            JsonFilePersistence::new(temp_dir.path().join("server.json")),
            Vec::new(),
        ));
        let config = Config::from_lookup(|_| None).unwrap();
        let app = crate::create_router(crate::AppState::new(store.clone(), config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (Url::parse(&format!("http://{}/", addr)).unwrap(), store)
    }

    #[tokio::test]
    async fn test_queued_update_is_resent_when_session_ends() {
        let temp_dir = TempDir::new().unwrap();
        let (base, store) = serve(&temp_dir).await;
        let inner = Inner::open(&ClientConfig::new(base, temp_dir.path().join("cache")))
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        *inner.outbound.lock().await = Some(tx);
        inner.state.lock().await.on_connected();

        let record = Expediente::from_draft(draft("EXP-9"), 1);
        let pushed = inner.mutate(Mutation::Create(record.clone())).await.unwrap();
        assert_eq!(pushed, Some(Transport::Channel));
        assert!(store.get_all().await.is_empty());

        // The socket closed before the writer took the frame.
        inner.finish_session(rx, false).await;

        assert!(inner.outbound.lock().await.is_none());
        let stored = store.get_all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, record.id);
    }

    #[tokio::test]
    async fn test_queued_command_is_not_resent() {
        let temp_dir = TempDir::new().unwrap();
        let (base, store) = serve(&temp_dir).await;
        let inner = Inner::open(&ClientConfig::new(base, temp_dir.path().join("cache")))
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        *inner.outbound.lock().await = Some(tx);
        let frame = ClientCommand::GetLatest.encode().unwrap();
        assert!(inner.send_frame(Outbound::Command(frame)).await);

        inner.finish_session(rx, false).await;

        assert!(!inner.send_frame(Outbound::Command(String::new())).await);
        assert_eq!(store.snapshot().await.revision, 0);
    }

    #[test]
    fn test_channel_url() {
        let url = channel_url(&Url::parse("http://127.0.0.1:3000").unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:3000/ws");

        let url = channel_url(&Url::parse("https://example.org/app").unwrap()).unwrap();
        assert_eq!(url.as_str(), "wss://example.org/ws");

        assert!(channel_url(&Url::parse("ftp://example.org").unwrap()).is_err());
    }
}
