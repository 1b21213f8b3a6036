use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    io::ErrorKind,
    path::PathBuf,
    time::Instant,
};

use crate::lock::{lock_path_for, FileLock};
use crate::storage::write_atomic;

/// A canonical tag as persisted by a [`TagStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTag {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TagStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("corrupt tag record at line {line}: {reason}")]
    Corrupt { line: u64, reason: String },

    #[error("invalid tag name {0:?}")]
    InvalidName(String),
}

/// Durable set of canonical tags.
///
/// Implementations must enforce uniqueness on the tag name: `bulk_insert`
/// silently skips names that already exist and reports only the names it
/// actually inserted.
pub trait TagStore: Send + Sync {
    /// All tags in insertion order.
    fn list(&self) -> Result<Vec<StoredTag>, TagStoreError>;

    fn list_names(&self) -> Result<Vec<String>, TagStoreError> {
        Ok(self.list()?.into_iter().map(|tag| tag.name).collect())
    }

    fn bulk_insert(&self, names: &[String]) -> Result<Vec<String>, TagStoreError>;
}

const CSV_HEADERS: [&str; 2] = ["id", "name"];

/// CSV-backed tag store.
///
/// The file is re-read on every call so that a daemon and a CLI sharing the
/// same base directory both see a fresh vocabulary. Every read-merge-write
/// holds an flock on `tags.csv.lock`, so concurrent writers (threads, a daemon
/// and a CLI) never overwrite each other's inserts.
#[derive(Debug)]
pub struct BackendCsv {
    path: PathBuf,
    lock_path: PathBuf,
}

impl BackendCsv {
    pub fn load(path: &str) -> Result<Self, TagStoreError> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new tag database at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let path = PathBuf::from(path);
        Ok(BackendCsv {
            lock_path: lock_path_for(&path),
            path,
        })
    }

    fn read_all(&self) -> Result<Vec<StoredTag>, TagStoreError> {
        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(&self.path)?;

        let mut tags = vec![];
        for record in csv_reader.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            let id = record
                .get(0)
                .ok_or_else(|| TagStoreError::Corrupt {
                    line,
                    reason: "missing id".to_string(),
                })?
                .parse::<u64>()
                .map_err(|err| TagStoreError::Corrupt {
                    line,
                    reason: err.to_string(),
                })?;
            let name = record
                .get(1)
                .ok_or_else(|| TagStoreError::Corrupt {
                    line,
                    reason: "missing name".to_string(),
                })?
                .to_string();

            tags.push(StoredTag { id, name });
        }

        log::debug!(
            "took {}ms to read {} tags",
            now.elapsed().as_micros() as f64 / 1000.0,
            tags.len()
        );

        Ok(tags)
    }

    fn save(&self, tags: &[StoredTag]) -> Result<(), TagStoreError> {
        let mut csv_wrt = csv::Writer::from_writer(vec![]);
        csv_wrt.write_record(CSV_HEADERS)?;
        for tag in tags {
            csv_wrt.write_record([tag.id.to_string().as_str(), tag.name.as_str()])?;
        }
        let data = csv_wrt
            .into_inner()
            .map_err(|err| TagStoreError::Io(err.into_error()))?;

        write_atomic(&self.path, &data)?;
        Ok(())
    }
}

impl TagStore for BackendCsv {
    fn list(&self) -> Result<Vec<StoredTag>, TagStoreError> {
        self.read_all()
    }

    fn bulk_insert(&self, names: &[String]) -> Result<Vec<String>, TagStoreError> {
        if let Some(name) = names.iter().find(|name| name.trim().is_empty()) {
            return Err(TagStoreError::InvalidName(name.clone()));
        }

        let _lock = FileLock::acquire_blocking(&self.lock_path)?;

        let mut tags = self.read_all()?;
        let mut seen: HashSet<String> = tags.iter().map(|t| t.name.clone()).collect();
        let mut next_id = tags.iter().map(|t| t.id + 1).max().unwrap_or(0);

        let mut inserted = vec![];
        for name in names {
            if !seen.insert(name.clone()) {
                log::debug!("tag {name:?} already stored, skipping");
                continue;
            }
            tags.push(StoredTag {
                id: next_id,
                name: name.clone(),
            });
            next_id += 1;
            inserted.push(name.clone());
        }

        if !inserted.is_empty() {
            self.save(&tags)?;
            log::info!("stored {} new tags", inserted.len());
        }

        Ok(inserted)
    }
}
