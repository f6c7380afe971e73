use super::PersistenceError;
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Record that can live in a [`JsonStore`], keyed by a file-safe id.
pub trait Storable: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
}

/// One `<id>.json` file per record in a single directory.
pub struct JsonStore<T> {
    dir: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T: Storable> JsonStore<T> {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            _phantom: PhantomData,
        }
    }

    fn file_path(&self, id: &str) -> Result<PathBuf, PersistenceError> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !safe {
            return Err(PersistenceError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid record id '{}'", id),
            )));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Write a record, replacing any previous one with the same id.
    /// Returns the id.
    pub fn save(&self, data: &T) -> Result<String, PersistenceError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_path(data.id())?;
        let json = serde_json::to_string_pretty(data)?;
        // Readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(data.id().to_string())
    }

    /// Load a record by id. Returns None if not found.
    pub fn load(&self, id: &str) -> Result<Option<T>, PersistenceError> {
        let path = self.file_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Every record in the directory. Files that fail to read or parse are
    /// skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<T>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut items = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(PersistenceError::from)
                .and_then(|contents| serde_json::from_str::<T>(&contents).map_err(Into::into));
            match parsed {
                Ok(data) => items.push(data),
                Err(e) => tracing::warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }
        Ok(items)
    }

    /// Delete a record by id. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let path = self.file_path(id)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }
}
