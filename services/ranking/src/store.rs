use crate::counter::{CounterMap, UserId};
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by the durable participation store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access participation record {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("participation record {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// Persistent, cross-restart tally of submissions per user
#[cfg_attr(test, mockall::automock)]
pub trait DurableStore: Send + Sync {
    /// Read the persisted tally; an absent record is an empty tally
    fn load(&self) -> Result<CounterMap, StoreError>;

    /// Replace the persisted tally with exactly `counters`
    fn save(&self, counters: &CounterMap) -> Result<(), StoreError>;

    /// Discard all history
    fn reset(&self) -> Result<(), StoreError>;

    /// Move an unreadable record out of the way so it can be inspected later.
    /// Returns where it was moved, or `None` if there was nothing to move.
    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError>;
}

/// Load the durable tally, treating a corrupt record as "no history yet"
pub fn load_or_empty(store: &dyn DurableStore) -> Result<CounterMap, StoreError> {
    match store.load() {
        Ok(counters) => Ok(counters),
        Err(StoreError::Corrupt { path, reason }) => {
            warn!(
                path = %path.display(),
                reason = %reason,
                "Participation record is unreadable, using an empty history"
            );
            metrics::counter!("tally.store.corrupt").increment(1);
            Ok(CounterMap::new())
        }
        Err(e) => Err(e),
    }
}

/// Participation record kept as a single JSON object on disk
///
/// Keys are decimal user ids, values are submission counts. The file is
/// replaced wholesale on every save through a temporary file in the same
/// directory, so readers never observe a partial write.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl DurableStore for JsonFileStore {
    fn load(&self) -> Result<CounterMap, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No participation record yet");
                return Ok(CounterMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let record: Record = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        debug!(
            path = %self.path.display(),
            users = record.0.len(),
            "Loaded participation record"
        );

        Ok(record.0)
    }

    fn save(&self, counters: &CounterMap) -> Result<(), StoreError> {
        let encoded =
            serde_json::to_vec(&RecordRef(counters)).map_err(|e| self.io_error(e.into()))?;

        let parent = self.parent_dir();
        fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;

        let mut temp_file =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| self.io_error(e))?;
        temp_file
            .write_all(&encoded)
            .map_err(|e| self.io_error(e))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| self.io_error(e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        debug!(
            path = %self.path.display(),
            users = counters.len(),
            "Saved participation record"
        );

        Ok(())
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.save(&CounterMap::new())?;
        info!(path = %self.path.display(), "Participation record reset");
        Ok(())
    }

    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "participation".to_string());
        let stem = format!(
            "{}.corrupt-{}",
            file_name,
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        // Never replace an earlier quarantined record from the same second
        let mut target = self.path.with_file_name(&stem);
        let mut attempt = 1;
        while target.exists() {
            target = self.path.with_file_name(format!("{}-{}", stem, attempt));
            attempt += 1;
        }

        fs::rename(&self.path, &target).map_err(|e| self.io_error(e))?;

        Ok(Some(target))
    }
}

/// Durable store held in memory, for embedding and tests
#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<CounterMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CounterMap) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }
}

impl DurableStore for MemoryStore {
    fn load(&self) -> Result<CounterMap, StoreError> {
        Ok(self.record.lock().clone())
    }

    fn save(&self, counters: &CounterMap) -> Result<(), StoreError> {
        *self.record.lock() = counters.clone();
        Ok(())
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.record.lock().clear();
        Ok(())
    }

    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        Ok(None)
    }
}

/// On-disk form of a tally. User ids become string keys here and only here.
struct RecordRef<'a>(&'a CounterMap);

impl Serialize for RecordRef<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (user, count) in self.0.iter() {
            map.serialize_entry(&user.to_string(), &count)?;
        }
        map.end()
    }
}

struct Record(CounterMap);

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object mapping user ids to submission counts")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut counters = CounterMap::new();
                while let Some((key, count)) = access.next_entry::<String, u64>()? {
                    let user: UserId = key.parse().map_err(|_| {
                        de::Error::custom(format!("invalid user id key {:?}", key))
                    })?;
                    counters.insert(user, count);
                }
                Ok(Record(counters))
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> JsonFileStore {
        JsonFileStore::new(dir.path().join("participation_data.json"))
    }

    #[test]
    fn test_missing_record_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_order_and_zeroes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let counters: CounterMap = [(UserId(30), 2), (UserId(10), 0), (UserId(20), 7)]
            .into_iter()
            .collect();

        store.save(&counters).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, counters);
        assert!(loaded.contains(UserId(10)));
    }

    #[test]
    fn test_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let counters: CounterMap = [(UserId(123456789), 3), (UserId(42), 0)]
            .into_iter()
            .collect();

        store.save(&counters).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"123456789":3,"42":0}"#);
    }

    #[test]
    fn test_save_of_load_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let counters: CounterMap = [(UserId(5), 1), (UserId(3), 9), (UserId(4), 0)]
            .into_iter()
            .collect();
        store.save(&counters).unwrap();
        let before = fs::read(store.path()).unwrap();

        store.save(&store.load().unwrap()).unwrap();

        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_loads_record_written_by_hand() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"111": 4, "222": 0, "333": 12}"#).unwrap();

        let loaded = store.load().unwrap();

        let order: Vec<(UserId, u64)> = loaded.iter().collect();
        assert_eq!(
            order,
            vec![(UserId(111), 4), (UserId(222), 0), (UserId(333), 12)]
        );
    }

    #[test]
    fn test_corrupt_records_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        for raw in [
            "",
            "not json",
            "[1, 2, 3]",
            r#"{"abc": 1}"#,
            r#"{"1": -4}"#,
            r#"{"1": 2.5}"#,
            r#"{"1": "two"}"#,
        ] {
            fs::write(store.path(), raw).unwrap();
            match store.load() {
                Err(StoreError::Corrupt { .. }) => {}
                other => panic!("expected Corrupt for {:?}, got {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_load_or_empty_swallows_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{broken").unwrap();

        assert!(load_or_empty(&store).unwrap().is_empty());
    }

    #[test]
    fn test_reset_empties_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&[(UserId(1), 3)].into_iter().collect())
            .unwrap();

        store.reset().unwrap();

        assert!(store.load().unwrap().is_empty());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{}");
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state").join("data.json"));
        store
            .save(&[(UserId(1), 1)].into_iter().collect())
            .unwrap();
        assert_eq!(store.load().unwrap().get(UserId(1)), 1);
    }

    #[test]
    fn test_quarantine_moves_record_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.quarantine().unwrap().is_none());

        fs::write(store.path(), "garbage").unwrap();
        let moved = store.quarantine().unwrap().expect("record should be moved");

        assert!(!store.path().exists());
        assert_eq!(fs::read_to_string(&moved).unwrap(), "garbage");
        assert!(moved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("participation_data.json.corrupt-"));
    }

    #[test]
    fn test_quarantine_keeps_every_moved_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut moved = Vec::new();
        for content in ["first", "second", "third"] {
            fs::write(store.path(), content).unwrap();
            moved.push(store.quarantine().unwrap().unwrap());
        }

        assert_eq!(fs::read_to_string(&moved[0]).unwrap(), "first");
        assert_eq!(fs::read_to_string(&moved[1]).unwrap(), "second");
        assert_eq!(fs::read_to_string(&moved[2]).unwrap(), "third");
        let count = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(count, 3);
    }
}
