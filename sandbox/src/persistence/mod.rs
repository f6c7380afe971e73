//! Saved positions on disk, one JSON file per record.

mod json_store;
mod position_store;

pub use position_store::{PositionStore, SavedPosition};

use std::time::{SystemTime, UNIX_EPOCH};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid position: {0}")]
    InvalidPosition(#[from] chess::GameError),
}

/// Generate a unique position ID: millisecond timestamp plus a random suffix,
/// so two saves in the same millisecond do not collide.
pub fn generate_position_id() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("pos_{}_{}", ts, &suffix[..8])
}

/// Get the current unix timestamp in milliseconds.
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
