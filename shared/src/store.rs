//! Telemetry Store
//!
//! Holds the flight record of one session and persists it through a
//! pluggable backend. The record is replaced whole on every commit, so a
//! reader never sees a partially applied tick.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::limits;
use crate::protocol::Telemetry;

/// Errors raised by the telemetry store and its backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid session id: {0:?}")]
    InvalidId(String),

    #[error("Malformed telemetry record for {session_id}: {reason}")]
    Malformed { session_id: String, reason: String },

    #[error("Telemetry record for {0} is not valid JSON: {1}")]
    Corrupt(String, #[source] serde_json::Error),

    #[error("Telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telemetry encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Telemetry backend lock poisoned")]
    Poisoned,
}

/// Persistence backend for telemetry records
pub trait TelemetryBackend: Send + Sync {
    /// Load the record for a session, `None` if nothing was persisted
    fn load(&self, session_id: &str) -> Result<Option<Telemetry>, StoreError>;

    /// Replace the record for a session
    fn save(&self, session_id: &str, telemetry: &Telemetry) -> Result<(), StoreError>;

    /// Drop the record for a session; removing a missing record is not an error
    fn remove(&self, session_id: &str) -> Result<(), StoreError>;

    /// Whether records outlive the session that wrote them
    fn retains_records(&self) -> bool {
        true
    }
}

/// In-process backend; records are dropped when their session ends
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, Telemetry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetryBackend for MemoryBackend {
    fn load(&self, session_id: &str) -> Result<Option<Telemetry>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(session_id).cloned())
    }

    fn save(&self, session_id: &str, telemetry: &Telemetry) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(session_id.to_string(), telemetry.clone());
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.remove(session_id);
        Ok(())
    }

    fn retains_records(&self) -> bool {
        false
    }
}

/// One `telemetry_<id>.json` file per session inside a directory
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Create the backend, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for a session
    pub fn path_for(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(session_id.to_string()));
        }
        Ok(self.dir.join(format!("telemetry_{}.json", session_id)))
    }
}

impl TelemetryBackend for JsonFileBackend {
    fn load(&self, session_id: &str) -> Result<Option<Telemetry>, StoreError> {
        let path = self.path_for(session_id)?;
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // An empty file counts as nothing persisted
        if data.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(session_id.to_string(), e))
    }

    fn save(&self, session_id: &str, telemetry: &Telemetry) -> Result<(), StoreError> {
        let path = self.path_for(session_id)?;
        let tmp = path.with_extension("json.tmp");

        let encoded = serde_json::to_vec(telemetry)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(session_id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The flight record of one session
pub struct TelemetryStore {
    session_id: String,
    current: Telemetry,
    restored: bool,
    backend: Arc<dyn TelemetryBackend>,
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("session_id", &self.session_id)
            .field("current", &self.current)
            .field("restored", &self.restored)
            .finish()
    }
}

impl TelemetryStore {
    /// Load the persisted record for a session, or start a fresh one
    pub fn open(session_id: impl Into<String>, backend: Arc<dyn TelemetryBackend>) -> Result<Self, StoreError> {
        let session_id = session_id.into();
        let (current, restored) = match backend.load(&session_id)? {
            Some(record) => {
                check_record(&session_id, &record)?;
                debug!(session = %session_id, iterations = record.iterations, "restored telemetry");
                (record, true)
            }
            None => (Telemetry::default(), false),
        };

        Ok(Self {
            session_id,
            current,
            restored,
            backend,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the record came from the backend rather than defaults
    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Borrow the current record
    pub fn current(&self) -> &Telemetry {
        &self.current
    }

    /// Immutable copy of the current record for reporting
    pub fn snapshot(&self) -> Telemetry {
        self.current.clone()
    }

    /// Replace the record with the result of a tick
    ///
    /// The record is persisted first; on failure the in-memory record keeps
    /// the previous tick.
    pub fn commit(&mut self, next: Telemetry) -> Result<(), StoreError> {
        check_record(&self.session_id, &next)?;
        if next.iterations < self.current.iterations || next.total_distance < self.current.total_distance {
            return Err(StoreError::Malformed {
                session_id: self.session_id.clone(),
                reason: "append-only counters went backwards".into(),
            });
        }

        self.backend.save(&self.session_id, &next)?;
        self.current = next;
        Ok(())
    }
}

fn check_record(session_id: &str, t: &Telemetry) -> Result<(), StoreError> {
    let reason = if !t.battery.is_finite() || !(0.0..=limits::BATTERY_FULL).contains(&t.battery) {
        Some(format!("battery {} outside [0, {}]", t.battery, limits::BATTERY_FULL))
    } else if !t.total_distance.is_finite() || t.total_distance < 0.0 {
        Some(format!("total_distance {} is not a non-negative number", t.total_distance))
    } else if t.gyroscope.iter().any(|v| !v.is_finite()) {
        Some("gyroscope contains a non-finite value".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::Malformed {
            session_id: session_id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
