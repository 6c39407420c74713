//! Key/value persistence for settings and performance stats.
//!
//! Values are plain JSON. Callers load "default or saved" once at startup and
//! push every mutation straight back. A missing or malformed value is never an
//! error to the caller: it falls back to the default with a warning.

use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const KEY_NOTE_ACCURACIES: &str = "note_accuracies";
pub const KEY_NOTE_TIMES: &str = "note_times_to_correct";
pub const KEY_NOTE_INDEX_BUFFER: &str = "note_index_buffer";
pub const KEY_NOTE_INDEX_RANGE: &str = "note_index_range";
pub const KEY_INSTRUMENT: &str = "instrument";
pub const KEY_MIC_SENSITIVITY: &str = "mic_sensitivity_index";
pub const KEY_TIMER_SECS: &str = "timer_secs";
pub const KEY_COUNTDOWN_SECS: &str = "countdown_secs";
pub const KEY_SHOW_NOTE_NAME: &str = "show_note_name";
pub const KEY_CHANGE_NOTE_ON_MISTAKE: &str = "change_note_on_mistake";
pub const KEY_ENHARMONIC_SPELLINGS: &str = "enharmonic_spellings";
pub const KEY_DRAW_METHOD: &str = "draw_method";

/// Raw JSON key/value storage.
pub trait KeyValueStore {
    fn get_raw(&self, key: &str) -> Option<Value>;
    fn set_raw(&mut self, key: &str, value: Value);
}

/// Load `key`, falling back to `default` if absent or not the expected shape.
pub fn load_or<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str, default: T) -> T {
    match store.get_raw(key) {
        Some(raw) => match serde_json::from_value(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring malformed stored value for {:?}: {}", key, e);
                default
            }
        },
        None => default,
    }
}

/// Serialize and store `value` under `key`.
pub fn save<T: Serialize + ?Sized>(store: &mut dyn KeyValueStore, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => store.set_raw(key, v),
        Err(e) => error!("Failed to serialize {:?}: {}", key, e),
    }
}

/// In-process store with no backing file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: Map<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Option<Value> {
        self.map.get(key).cloned()
    }

    fn set_raw(&mut self, key: &str, value: Value) {
        self.map.insert(key.to_string(), value);
    }
}

/// Store backed by one JSON object file, rewritten on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    map: Map<String, Value>,
}

impl JsonFileStore {
    /// Open `path`. An absent file starts empty; a corrupt one is ignored
    /// (with a warning) and replaced on the next write.
    pub fn open(path: &Path) -> Self {
        let map = match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<Map<String, Value>>(&data) {
                Ok(m) => {
                    info!("Loaded {} stored values from {:?}", m.len(), path);
                    m
                }
                Err(e) => {
                    warn!("Failed to parse store file {:?}: {}", path, e);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            path: path.to_path_buf(),
            map,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) {
        let json = match serde_json::to_string_pretty(&self.map) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize store: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            error!("Failed to write store file {:?}: {}", self.path, e);
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_raw(&self, key: &str) -> Option<Value> {
        self.map.get(key).cloned()
    }

    fn set_raw(&mut self, key: &str, value: Value) {
        self.map.insert(key.to_string(), value);
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NoteStats;
    use serde_json::json;

    #[test]
    fn test_load_default_when_missing() {
        let store = MemoryStore::new();
        assert_eq!(load_or(&store, KEY_TIMER_SECS, 180u32), 180);
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let mut store = MemoryStore::new();
        store.set_raw(KEY_NOTE_ACCURACIES, json!("not a map"));
        let stats: NoteStats = load_or(&store, KEY_NOTE_ACCURACIES, NoteStats::new());
        assert!(stats.is_empty());
    }

    #[test]
    fn test_stats_shape_null_or_number() {
        let mut store = MemoryStore::new();
        let mut stats = NoteStats::new();
        stats.insert("c4".into(), Some(0.5));
        stats.insert("cs4".into(), None);
        save(&mut store, KEY_NOTE_ACCURACIES, &stats);
        assert_eq!(
            store.get_raw(KEY_NOTE_ACCURACIES),
            Some(json!({"c4": 0.5, "cs4": null}))
        );
        let loaded: NoteStats = load_or(&store, KEY_NOTE_ACCURACIES, NoteStats::new());
        assert_eq!(loaded, stats);
    }

    #[test]
    fn test_file_store_persists_and_survives_corruption() {
        let dir = std::env::temp_dir().join(format!("pitch_drill_store_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");

        let mut store = JsonFileStore::open(&path);
        save(&mut store, KEY_SHOW_NOTE_NAME, &true);
        let reopened = JsonFileStore::open(&path);
        assert!(load_or(&reopened, KEY_SHOW_NOTE_NAME, false));

        std::fs::write(&path, "{ not json").unwrap();
        let corrupt = JsonFileStore::open(&path);
        assert!(!load_or(&corrupt, KEY_SHOW_NOTE_NAME, false));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
