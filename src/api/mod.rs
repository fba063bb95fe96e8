//! REST API module.
//!
//! Request/response fallback for clients that cannot hold the channel open.

mod expedientes;
mod status;

pub use expedientes::*;
pub use status::*;

use axum::Json;

use crate::errors::AppError;

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<Json<T>, AppError>;

/// Create a successful API response.
pub fn success<T>(data: T) -> ApiResult<T> {
    Ok(Json(data))
}
