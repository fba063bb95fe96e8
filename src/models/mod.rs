//! Data models for the Expedientes application.
//!
//! Field names on the wire follow the browser client's records.

mod expediente;
mod report;

pub use expediente::*;
pub use report::*;
