//! Error types for omx-telemetry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging init failed: {0}")]
    Init(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
