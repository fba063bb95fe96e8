//! Channel wire format.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::Expediente;

/// Server to client frame, encoded once and shared by every recipient.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent<'a> {
    /// Full collection, sent once right after connecting
    Init(&'a [Expediente]),
    /// Full collection, broadcast to peers or sent in reply to `get_latest`
    SyncExpedientes(&'a [Expediente]),
    /// A submitted frame was rejected
    Error { message: String },
}

impl ServerEvent<'_> {
    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to encode frame: {}", e)))
    }
}

/// Client to server frame as received.
///
/// The update payload stays raw here so the boundary can tell a non-array
/// payload apart from an array of malformed records.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UpdateExpedientes(serde_json::Value),
    GetLatest,
}

impl ClientEvent {
    pub fn decode(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("Unrecognized frame: {}", e)))
    }
}

/// Client to server frame as sent.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand<'a> {
    UpdateExpedientes(&'a [Expediente]),
    GetLatest,
}

impl ClientCommand<'_> {
    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to encode frame: {}", e)))
    }
}

/// Server to client frame as received.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerUpdate {
    Init(Vec<Expediente>),
    SyncExpedientes(Vec<Expediente>),
    Error { message: String },
}

impl ServerUpdate {
    pub fn decode(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("Unrecognized frame: {}", e)))
    }
}

/// Decode an update payload into records, rejecting anything but an array.
pub fn decode_collection(payload: serde_json::Value) -> Result<Vec<Expediente>, AppError> {
    if !payload.is_array() {
        return Err(AppError::BadRequest("Invalid data format".to_string()));
    }
    serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("Invalid expediente: {}", e)))
}
