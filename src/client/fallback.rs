//! Request/response client for the REST fallback.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use crate::api::{StatusResponse, WriteResponse};
use crate::errors::{AppError, ErrorResponse};
use crate::models::Expediente;

/// Thin wrapper over the `/api` fallback surface.
#[derive(Debug, Clone)]
pub struct FallbackClient {
    client: Client,
    base: Url,
}

impl FallbackClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn url(&self, path: &str) -> Result<Url, AppError> {
        self.base
            .join(path)
            .map_err(|e| AppError::Internal(format!("Invalid server url: {}", e)))
    }

    /// GET /api/expedientes
    pub async fn fetch_all(&self) -> Result<Vec<Expediente>, AppError> {
        let resp = self.client.get(self.url("/api/expedientes")?).send().await?;
        let resp = check(resp).await?;
        Ok(resp.json().await?)
    }

    /// POST /api/expedientes
    pub async fn replace_all(&self, records: &[Expediente]) -> Result<usize, AppError> {
        let resp = self
            .client
            .post(self.url("/api/expedientes")?)
            .json(records)
            .send()
            .await?;
        let body: WriteResponse = check(resp).await?.json().await?;
        Ok(body.count)
    }

    /// GET /api/status
    pub async fn status(&self) -> Result<StatusResponse, AppError> {
        let resp = self.client.get(self.url("/api/status")?).send().await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Turn a non-success response into the server's error.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error.message,
        Err(_) => format!("Server answered {}", status),
    };
    Err(match status {
        StatusCode::BAD_REQUEST => AppError::Validation(message),
        _ => AppError::Transport(message),
    })
}
