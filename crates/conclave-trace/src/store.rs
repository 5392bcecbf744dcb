use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::TraceError;
use crate::snapshot::TraceSnapshot;

/// JSON file of trace snapshots keyed by task id.
///
/// Saving loads the whole file, replaces one entry and rewrites the whole
/// file through a temp file in the same directory. Entries this process did
/// not write are carried through untouched.
#[derive(Clone, Debug)]
pub struct TraceStore {
    path: PathBuf,
}

impl TraceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, task_id: &str, snapshot: &TraceSnapshot) -> Result<PathBuf, TraceError> {
        let mut entries = self.read_entries();
        entries.insert(task_id.to_string(), serde_json::to_value(snapshot)?);
        let content = serde_json::to_string_pretty(&Value::Object(entries))?;
        self.write_atomic(content.as_bytes())?;
        debug!(task_id, path = %self.path.display(), "trace saved");
        Ok(self.path.clone())
    }

    /// The stored snapshot for `task_id`. Entries that exist but do not
    /// parse as a snapshot are an error.
    pub fn load(&self, task_id: &str) -> Result<Option<TraceSnapshot>, TraceError> {
        match self.read_entries().remove(task_id) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Task ids already present in the file. A missing or unreadable file
    /// yields an empty set.
    pub fn completed_task_ids(&self) -> BTreeSet<String> {
        self.read_entries().keys().cloned().collect()
    }

    /// Drop the entries for `task_ids`, rewriting the file only when
    /// something was removed. Returns the ids that were present.
    pub fn remove<S: AsRef<str>>(&self, task_ids: &[S]) -> Result<Vec<String>, TraceError> {
        let mut entries = self.read_entries();
        let removed: Vec<String> = task_ids
            .iter()
            .filter_map(|id| entries.remove(id.as_ref()).map(|_| id.as_ref().to_string()))
            .collect();
        if !removed.is_empty() {
            let content = serde_json::to_string_pretty(&Value::Object(entries))?;
            self.write_atomic(content.as_bytes())?;
            debug!(removed = ?removed, path = %self.path.display(), "trace entries removed");
        }
        Ok(removed)
    }

    /// Remove the file if present.
    pub fn clear(&self) -> Result<(), TraceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_entries(&self) -> Map<String, Value> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "trace file unreadable, treating as empty");
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!(path = %self.path.display(), "trace file is not a JSON object, treating as empty");
                Map::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "trace file corrupt, treating as empty");
                Map::new()
            }
        }
    }

    fn write_atomic(&self, content: &[u8]) -> Result<(), TraceError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trace.json".to_string());
        let temp_path = parent.join(format!(".{file_name}.tmp"));

        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// Resume helper: the task ids recorded in the trace file at `path`.
pub fn completed_task_ids(path: impl AsRef<Path>) -> BTreeSet<String> {
    TraceStore::new(path.as_ref()).completed_task_ids()
}
