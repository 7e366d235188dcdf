use std::{
    fs,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use tempfile::env::temp_dir;

use crate::{
    connection::{Connection, OpenOptions},
    storage::wal::wal_path_for,
    types::error::Result,
};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn get_unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Unique path in the temp directory. Tests run in parallel, so the
/// timestamp alone is not enough.
pub fn create_temp_db_path_with_prefix(prefix: &str) -> PathBuf {
    let mut temp_path = temp_dir();
    temp_path.push(format!(
        "{}_{}_{}_{}.db",
        prefix,
        std::process::id(),
        get_unix_timestamp_millis(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));
    temp_path
}

pub fn create_temp_db_path() -> PathBuf {
    create_temp_db_path_with_prefix("lumbung_test")
}

/// Scratch database removed together with its WAL on drop.
pub struct TempDatabase {
    pub path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Self {
        Self {
            path: create_temp_db_path(),
        }
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            path: create_temp_db_path_with_prefix(prefix),
        }
    }

    pub fn open(&self) -> Result<Connection> {
        Connection::open(&self.path)
    }

    pub fn open_with(&self, options: &OpenOptions) -> Result<Connection> {
        Connection::open_with(&self.path, options)
    }

    pub fn wal_path(&self) -> PathBuf {
        wal_path_for(&self.path)
    }
}

impl Default for TempDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for path in [self.path.clone(), self.wal_path()] {
            if path.exists() {
                let _ = fs::remove_file(&path);
            }
        }
    }
}
