use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::common::error::SpoolError;

pub const FIELD_SPOOLNAME: &str = "spoolname";
pub const FIELD_COMPLETE: &str = "complete";
pub const FIELD_TIME: &str = "time";
pub const FIELD_COUNT: &str = "count";
pub const FIELD_FILES: &str = "files";

const OPEN_RETRY_PAUSE: Duration = Duration::from_millis(250);

/// Tri-state completeness of a spool unit as recorded in the cache.
/// Absence of the field means the unit has not been inspected yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every input has a valid output.
    Complete,
    /// Some or all inputs still lack valid outputs.
    Incomplete,
    /// The retry cap was exhausted; terminal until the cache is deleted.
    Abandoned,
}

impl Completion {
    pub fn as_str(self) -> &'static str {
        match self {
            Completion::Complete => "1",
            Completion::Incomplete => "0",
            Completion::Abandoned => "-1",
        }
    }

    fn parse(value: &str) -> Option<Completion> {
        match value {
            "1" => Some(Completion::Complete),
            "0" => Some(Completion::Incomplete),
            "-1" => Some(Completion::Abandoned),
            _ => None,
        }
    }
}

/// Durable record of per-unit progress, keyed by `(spoolname, field)`.
///
/// Single writer by contract: one controller process owns the file.
/// Every write is a committed SQLite transaction, so a crash between
/// decision passes loses nothing.
pub struct CompletionCache {
    conn: Connection,
    path: PathBuf,
}

impl CompletionCache {
    /// Open-or-create; idempotent. `tries` guards against a leftover lock
    /// from a dying predecessor.
    pub fn open(path: &Path, tries: u32) -> crate::Result<CompletionCache> {
        let attempts = tries.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match Self::try_open(path) {
                Ok(cache) => return Ok(cache),
                Err(e) => {
                    log::warn!(
                        "Cache open attempt {attempt}/{attempts} failed for {}: {e}",
                        path.display()
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(OPEN_RETRY_PAUSE);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            SpoolError::GenericError(format!("cannot open cache {}", path.display()))
        }))
    }

    fn try_open(path: &Path) -> crate::Result<CompletionCache> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spools (
                 spoolname TEXT NOT NULL,
                 field     TEXT NOT NULL,
                 value     TEXT NOT NULL,
                 PRIMARY KEY (spoolname, field)
             )",
            [],
        )?;
        Ok(CompletionCache {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fetch(&self, key: &Path, field: &str) -> crate::Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM spools WHERE spoolname = ?1 AND field = ?2",
                params![key_str(key), field],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upsert; immediately visible to subsequent reads.
    pub fn add(&self, key: &Path, field: &str, value: &str) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO spools (spoolname, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(spoolname, field) DO UPDATE SET value = excluded.value",
            params![key_str(key), field, value],
        )?;
        Ok(())
    }

    /// Atomically increments the submission count, initializing to 1, and
    /// returns the new value.
    pub fn counter(&self, key: &Path) -> crate::Result<u32> {
        self.conn.execute(
            "INSERT INTO spools (spoolname, field, value) VALUES (?1, ?2, '1')
             ON CONFLICT(spoolname, field)
             DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)",
            params![key_str(key), FIELD_COUNT],
        )?;
        self.count(key)
    }

    /// All keys whose completeness equals `state`.
    pub fn fetch_complete(&self, state: Completion) -> crate::Result<Vec<PathBuf>> {
        let mut stmt = self.conn.prepare(
            "SELECT spoolname FROM spools WHERE field = ?1 AND value = ?2 ORDER BY spoolname",
        )?;
        let rows = stmt.query_map(params![FIELD_COMPLETE, state.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(PathBuf::from(row?));
        }
        Ok(keys)
    }

    // Typed accessors over the raw fields.

    pub fn completion(&self, key: &Path) -> crate::Result<Option<Completion>> {
        Ok(self
            .fetch(key, FIELD_COMPLETE)?
            .as_deref()
            .and_then(Completion::parse))
    }

    pub fn set_completion(&self, key: &Path, state: Completion) -> crate::Result<()> {
        self.add(key, FIELD_COMPLETE, state.as_str())
    }

    pub fn time(&self, key: &Path) -> crate::Result<Option<u64>> {
        Ok(self
            .fetch(key, FIELD_TIME)?
            .and_then(|v| v.parse().ok()))
    }

    pub fn set_time(&self, key: &Path, epoch_secs: u64) -> crate::Result<()> {
        self.add(key, FIELD_TIME, &epoch_secs.to_string())
    }

    pub fn count(&self, key: &Path) -> crate::Result<u32> {
        Ok(self
            .fetch(key, FIELD_COUNT)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn files(&self, key: &Path) -> crate::Result<Vec<String>> {
        Ok(self
            .fetch(key, FIELD_FILES)?
            .map(|v| {
                v.split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn set_files(&self, key: &Path, names: &[String]) -> crate::Result<()> {
        self.add(key, FIELD_FILES, &names.join(","))
    }

    /// Marks the record as born; the key stored under its own name doubles
    /// as an existence sentinel.
    pub fn touch_record(&self, key: &Path) -> crate::Result<()> {
        self.add(key, FIELD_SPOOLNAME, &key_str(key))
    }

    pub fn contains(&self, key: &Path) -> crate::Result<bool> {
        Ok(self.fetch(key, FIELD_SPOOLNAME)?.is_some())
    }
}

fn key_str(key: &Path) -> String {
    key.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempdir::TempDir;

    use super::{Completion, CompletionCache, FIELD_FILES};

    fn open(dir: &TempDir) -> CompletionCache {
        CompletionCache::open(&dir.path().join("spool.cache"), 3).unwrap()
    }

    #[test]
    fn open_is_idempotent() {
        let tmp = TempDir::new("cache").unwrap();
        let cache = open(&tmp);
        cache.add(Path::new("/s/u"), FIELD_FILES, "u-1").unwrap();
        drop(cache);
        // Second open must keep existing rows.
        let cache = open(&tmp);
        assert_eq!(
            cache.fetch(Path::new("/s/u"), FIELD_FILES).unwrap(),
            Some("u-1".to_string())
        );
    }

    #[test]
    fn fetch_absent_field() {
        let tmp = TempDir::new("cache").unwrap();
        let cache = open(&tmp);
        assert_eq!(cache.fetch(Path::new("/s/u"), FIELD_FILES).unwrap(), None);
        assert_eq!(cache.count(Path::new("/s/u")).unwrap(), 0);
        assert!(cache.completion(Path::new("/s/u")).unwrap().is_none());
    }

    #[test]
    fn add_is_upsert() {
        let tmp = TempDir::new("cache").unwrap();
        let cache = open(&tmp);
        let key = Path::new("/s/u");
        cache.set_time(key, 100).unwrap();
        cache.set_time(key, 200).unwrap();
        assert_eq!(cache.time(key).unwrap(), Some(200));
    }

    #[test]
    fn counter_initializes_and_increments() {
        let tmp = TempDir::new("cache").unwrap();
        let cache = open(&tmp);
        let key = Path::new("/s/u");
        assert_eq!(cache.counter(key).unwrap(), 1);
        assert_eq!(cache.counter(key).unwrap(), 2);
        assert_eq!(cache.count(key).unwrap(), 2);
    }

    #[test]
    fn fetch_complete_filters_by_state() {
        let tmp = TempDir::new("cache").unwrap();
        let cache = open(&tmp);
        cache
            .set_completion(Path::new("/s/u-1"), Completion::Incomplete)
            .unwrap();
        cache
            .set_completion(Path::new("/s/u-2"), Completion::Complete)
            .unwrap();
        cache
            .set_completion(Path::new("/s/u-3"), Completion::Abandoned)
            .unwrap();

        let incomplete = cache.fetch_complete(Completion::Incomplete).unwrap();
        assert_eq!(incomplete, vec![Path::new("/s/u-1").to_path_buf()]);
        let abandoned = cache.fetch_complete(Completion::Abandoned).unwrap();
        assert_eq!(abandoned, vec![Path::new("/s/u-3").to_path_buf()]);
    }

    #[test]
    fn files_roundtrip_csv() {
        let tmp = TempDir::new("cache").unwrap();
        let cache = open(&tmp);
        let key = Path::new("/s/u");
        cache
            .set_files(key, &["u-1".to_string(), "u-3".to_string()])
            .unwrap();
        assert_eq!(cache.files(key).unwrap(), vec!["u-1", "u-3"]);

        cache.set_files(key, &[]).unwrap();
        assert!(cache.files(key).unwrap().is_empty());
    }

    #[test]
    fn record_sentinel() {
        let tmp = TempDir::new("cache").unwrap();
        let cache = open(&tmp);
        let key = Path::new("/s/u");
        assert!(!cache.contains(key).unwrap());
        cache.touch_record(key).unwrap();
        assert!(cache.contains(key).unwrap());
    }
}
