//! Record tables shared by the sealing components
//!
//! Each component exclusively owns one [`Table`]. Rows are independent, so
//! per-row atomicity from `DashMap` is all the concurrency control needed.
//! Tables can be snapshotted to a vault directory as JSON and reloaded.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};

pub mod sequence;

pub use sequence::DailySequence;

/// A row persisted in a [`Table`]
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Snapshot file stem
    const TABLE: &'static str;

    fn key(&self) -> &str;

    fn expires_at(&self) -> DateTime<Utc>;

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() > now
    }
}

pub struct Table<R: Record> {
    rows: DashMap<String, R>,
}

impl<R: Record> Table<R> {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn insert(&self, record: R) -> Result<()> {
        match self.rows.entry(record.key().to_string()) {
            Entry::Occupied(entry) => Err(StoreError::DuplicateKey(entry.key().clone()).into()),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<R> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    /// Row by key, only if it has not expired
    pub fn get_live(&self, key: &str, now: DateTime<Utc>) -> Option<R> {
        self.get(key).filter(|row| row.is_live(now))
    }

    /// Applies `f` to the row in place; returns false when absent
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut R),
    {
        match self.rows.get_mut(key) {
            Some(mut row) => {
                f(row.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<R>
    where
        P: Fn(&R) -> bool,
    {
        self.rows
            .iter()
            .filter(|row| predicate(row.value()))
            .map(|row| row.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, row| row.is_live(now));
        before - self.rows.len()
    }

    /// Writes `<dir>/<TABLE>.json` atomically through a uniquely named temp file
    #[instrument(skip(self), fields(table = R::TABLE))]
    pub async fn save_to(&self, dir: &Path) -> Result<()> {
        let mut rows: Vec<R> = self.rows.iter().map(|row| row.value().clone()).collect();
        rows.sort_by(|a, b| a.key().cmp(b.key()));
        let json = serde_json::to_vec_pretty(&rows).map_err(|e| snapshot_error::<R>(e))?;

        write_snapshot(dir, &format!("{}.json", R::TABLE), json).await?;

        debug!(rows = rows.len(), "table snapshot written");
        Ok(())
    }

    /// Loads `<dir>/<TABLE>.json`; a missing file yields an empty table
    #[instrument(fields(table = R::TABLE))]
    pub async fn load_from(dir: &Path) -> Result<Self> {
        let table = Self::new();
        let path = dir.join(format!("{}.json", R::TABLE));
        if !tokio::fs::try_exists(&path).await? {
            return Ok(table);
        }

        let raw = tokio::fs::read(&path).await?;
        let rows: Vec<R> = serde_json::from_slice(&raw).map_err(|e| snapshot_error::<R>(e))?;
        for row in rows {
            table.insert(row)?;
        }
        debug!(rows = table.len(), "table snapshot loaded");
        Ok(table)
    }
}

impl<R: Record> Default for Table<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stages `contents` in a fresh temp file inside `dir`, then persists it
/// over `<dir>/<file_name>`; concurrent writers never share a staging path
pub(crate) async fn write_snapshot(dir: &Path, file_name: &str, contents: Vec<u8>) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let dir: PathBuf = dir.to_path_buf();
    let target = dir.join(file_name);
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut staging = NamedTempFile::new_in(&dir)?;
        staging.write_all(&contents)?;
        staging.as_file().sync_all()?;
        staging.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await?
}

fn snapshot_error<R: Record>(e: serde_json::Error) -> StoreError {
    StoreError::Snapshot {
        table: R::TABLE.to_string(),
        reason: e.to_string(),
    }
}
