//! JSON-file position store so open positions survive restarts.
//!
//! The whole book is one pretty-printed JSON document. A missing file is an
//! empty book; a corrupt one is logged and treated as empty so the engine
//! can still start.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use updown_core::{Position, PositionStatus, PositionStore, StoreError};

/// On-disk format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedBook {
    pub positions: BTreeMap<String, Position>,
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct JsonPositionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl JsonPositionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read_book(&self) -> Result<PersistedBook, StoreError> {
        if !self.path.exists() {
            return Ok(PersistedBook::default());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        serde_json::from_reader(reader).map_err(|e| StoreError::Format(e.to_string()))
    }

    /// Like `read_book`, but a corrupt file yields an empty book.
    fn read_book_lenient(&self) -> Result<PersistedBook, StoreError> {
        match self.read_book() {
            Ok(book) => Ok(book),
            Err(StoreError::Format(e)) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "position file is corrupt, starting fresh"
                );
                Ok(PersistedBook::default())
            }
            Err(e) => Err(e),
        }
    }

    fn write_book(&self, mut book: PersistedBook) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        book.saved_at = Some(Utc::now());
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(writer, &book).map_err(|e| StoreError::Format(e.to_string()))?;
        debug!(
            path = %self.path.display(),
            positions = book.positions.len(),
            "saved position book"
        );
        Ok(())
    }

    /// Deletes the file if it exists.
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl PositionStore for JsonPositionStore {
    fn load_open(&self) -> Result<Vec<Position>, StoreError> {
        let _guard = self.lock.lock();
        let book = self.read_book_lenient()?;
        let open: Vec<Position> = book
            .positions
            .into_values()
            .filter(|p| matches!(p.status, PositionStatus::Open | PositionStatus::Exiting))
            .collect();
        info!(
            path = %self.path.display(),
            positions = open.len(),
            "loaded persisted positions"
        );
        Ok(open)
    }

    /// Upserts a position. Closed positions are removed instead.
    fn save(&self, position: &Position) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut book = self.read_book_lenient()?;
        if position.status == PositionStatus::Closed {
            book.positions.remove(&position.id);
        } else {
            book.positions.insert(position.id.clone(), position.clone());
        }
        self.write_book(book)
    }

    fn remove(&self, position_id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut book = self.read_book_lenient()?;
        if book.positions.remove(position_id).is_some() {
            self.write_book(book)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::TempDir;
    use updown_core::{Asset, Outcome, PendingEntry};

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        (dir, path)
    }

    fn open_position(id: &str) -> Position {
        let now = Utc::now();
        let mut p = Position::pending(PendingEntry {
            id: id.to_string(),
            window_id: "btc-updown-15m-1769860800".to_string(),
            asset: Asset::Btc,
            outcome: Outcome::Up,
            token_id: "111".to_string(),
            window_end: now + chrono::Duration::minutes(10),
            reference_price: dec!(90000),
            entry_move: dec!(0.0025),
            limit_price: dec!(0.42),
            size: dec!(10),
            created_at: now,
        });
        p.confirm_entry(dec!(10), dec!(0.40), dec!(0.32), now).unwrap();
        p
    }

    #[test]
    fn missing_file_is_empty() {
        let (_dir, path) = temp_path();
        let store = JsonPositionStore::new(&path);
        assert!(store.load_open().unwrap().is_empty());
        assert!(!store.exists());
    }

    #[test]
    fn save_then_load_round_trip() {
        let (_dir, path) = temp_path();
        let store = JsonPositionStore::new(&path);
        store.save(&open_position("a")).unwrap();
        store.save(&open_position("b")).unwrap();

        let loaded = JsonPositionStore::new(&path).load_open().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].entry_price, dec!(0.40));
        assert_eq!(loaded[0].reference_price, dec!(90000));
    }

    #[test]
    fn closed_positions_are_dropped() {
        let (_dir, path) = temp_path();
        let store = JsonPositionStore::new(&path);
        let mut p = open_position("a");
        store.save(&p).unwrap();

        p.record_exit_fill(dec!(10), dec!(0.50)).unwrap();
        store.save(&p).unwrap();
        assert!(store.load_open().unwrap().is_empty());
    }

    #[test]
    fn remove_deletes_one_entry() {
        let (_dir, path) = temp_path();
        let store = JsonPositionStore::new(&path);
        store.save(&open_position("a")).unwrap();
        store.save(&open_position("b")).unwrap();
        store.remove("a").unwrap();
        store.remove("missing").unwrap();

        let ids: Vec<String> = store.load_open().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let (_dir, path) = temp_path();
        let mut file = File::create(&path).unwrap();
        file.write_all(b"{ not json").unwrap();

        let store = JsonPositionStore::new(&path);
        assert!(store.load_open().unwrap().is_empty());
        store.save(&open_position("a")).unwrap();
        assert_eq!(store.load_open().unwrap().len(), 1);
    }

    #[test]
    fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("positions.json");
        let store = JsonPositionStore::new(&path);
        store.save(&open_position("a")).unwrap();
        assert!(path.exists());

        store.clear().unwrap();
        assert!(!path.exists());
    }
}
