use super::json_store::{JsonStore, Storable};
use super::{generate_position_id, now_timestamp, PersistenceError};
use crate::session::PositionRecord;
use chess::Position;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A named position saved by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedPosition {
    pub position_id: String,
    pub name: String,
    pub fen: String,
    /// Moves played to reach `fen`, as UCI strings. Informational only.
    #[serde(default)]
    pub moves: Vec<String>,
    /// Unix time in milliseconds.
    pub created_at: u64,
}

impl Storable for SavedPosition {
    fn id(&self) -> &str {
        &self.position_id
    }
}

/// Saved positions under `<data_dir>/positions`.
pub struct PositionStore {
    inner: JsonStore<SavedPosition>,
}

impl PositionStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            inner: JsonStore::new(data_dir.join("positions")),
        }
    }

    /// Save the session's current position under `name`.
    pub fn save(&self, name: &str, record: &PositionRecord) -> Result<SavedPosition, PersistenceError> {
        Position::from_fen(&record.fen)?;
        let data = SavedPosition {
            position_id: generate_position_id(),
            name: name.trim().to_string(),
            fen: record.fen.clone(),
            moves: record.moves.clone(),
            created_at: now_timestamp(),
        };
        self.inner.save(&data)?;
        tracing::info!(position_id = %data.position_id, "Saved position '{}'", data.name);
        Ok(data)
    }

    /// All saved positions, newest first.
    pub fn list(&self) -> Result<Vec<SavedPosition>, PersistenceError> {
        let mut positions = self.inner.load_all()?;
        positions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(positions)
    }

    pub fn load(&self, id: &str) -> Result<Option<SavedPosition>, PersistenceError> {
        self.inner.load(id)
    }

    /// Returns whether a position with that id existed.
    pub fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        self.inner.delete(id)
    }

    #[cfg(test)]
    fn insert(&self, data: &SavedPosition) {
        self.inner.save(data).unwrap();
    }
}
