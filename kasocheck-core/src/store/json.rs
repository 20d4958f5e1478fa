//! JSON document event store
//!
//! Layout on disk:
//!
//! ```json
//! { "<guild_id>": { "<channel_id>": ["2025-11-27T12:34:56.123456", "..."] } }
//! ```
//!
//! The whole document lives in memory behind one mutex and is written with a
//! temp-file + rename so a crash never leaves a half-written file. Suitable
//! for small deployments; the SQLite backend scales further.
//!
//! The backfill ledger lives in a sidecar next to the document
//! (`kaso_data.json` -> `kaso_data.backfill.json`) so the document keeps the
//! layout the legacy bot reads.

use super::EventStore;
use crate::error::{Error, Result};
use crate::format::{format_timestamp, parse_timestamp};
use crate::types::{Event, StoreStats};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

type RawDocument = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// In-memory form of the JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    groups: BTreeMap<String, BTreeMap<String, Vec<NaiveDateTime>>>,
}

impl Document {
    /// Parse a document, normalizing legacy timestamp forms.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawDocument = serde_json::from_str(content)?;
        let mut doc = Document::default();
        for (group_id, channels) in raw {
            for (scope_id, stamps) in channels {
                for stamp in stamps {
                    doc.push(&group_id, &scope_id, parse_timestamp(&stamp)?);
                }
            }
        }
        Ok(doc)
    }

    /// Serialize with canonical timestamps.
    pub fn to_json_string(&self) -> Result<String> {
        let raw: RawDocument = self
            .groups
            .iter()
            .map(|(group_id, channels)| {
                let channels = channels
                    .iter()
                    .map(|(scope_id, stamps)| {
                        (
                            scope_id.clone(),
                            stamps.iter().copied().map(format_timestamp).collect(),
                        )
                    })
                    .collect();
                (group_id.clone(), channels)
            })
            .collect();
        Ok(serde_json::to_string_pretty(&raw)?)
    }

    /// Load from disk. A missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_json_str(&content)
    }

    /// Write atomically to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_json_string()?)
    }

    /// Append one timestamp, creating the guild and channel as needed.
    pub fn push(&mut self, scope_group_id: &str, scope_id: &str, occurred_at: NaiveDateTime) {
        self.groups
            .entry(scope_group_id.to_string())
            .or_default()
            .entry(scope_id.to_string())
            .or_default()
            .push(occurred_at);
    }

    /// Every event in the document, guild by guild.
    pub fn events(&self) -> impl Iterator<Item = Event> + '_ {
        self.groups.iter().flat_map(|(group_id, channels)| {
            channels.iter().flat_map(move |(scope_id, stamps)| {
                stamps
                    .iter()
                    .map(move |ts| Event::new(group_id.clone(), scope_id.clone(), *ts))
            })
        })
    }

    /// Total number of timestamps.
    pub fn event_count(&self) -> usize {
        self.groups
            .values()
            .flat_map(|channels| channels.values())
            .map(Vec::len)
            .sum()
    }

    /// Guild ids present in the document, sorted
    pub fn groups(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Overall counts and time range
    pub fn stats(&self) -> StoreStats {
        let all = self
            .groups
            .values()
            .flat_map(|channels| channels.values())
            .flatten();
        StoreStats {
            event_count: self.event_count() as u64,
            group_count: self.groups.len() as u64,
            scope_count: self.groups.values().map(|c| c.len() as u64).sum(),
            oldest: all.clone().min().copied(),
            newest: all.max().copied(),
        }
    }

    fn stamps(&self, scope_group_id: &str, scope_id: &str) -> &[NaiveDateTime] {
        self.groups
            .get(scope_group_id)
            .and_then(|channels| channels.get(scope_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn remove_last(&mut self, scope_group_id: &str, scope_id: &str) {
        if let Some(stamps) = self
            .groups
            .get_mut(scope_group_id)
            .and_then(|channels| channels.get_mut(scope_id))
        {
            stamps.pop();
        }
        self.drop_empty();
    }

    fn prune_before(&mut self, cutoff: NaiveDateTime, scope_group_id: Option<&str>) -> usize {
        let mut removed = 0;
        for (group_id, channels) in self.groups.iter_mut() {
            if scope_group_id.is_some_and(|g| g != group_id) {
                continue;
            }
            for stamps in channels.values_mut() {
                let before = stamps.len();
                stamps.retain(|ts| *ts >= cutoff);
                removed += before - stamps.len();
            }
        }
        self.drop_empty();
        removed
    }

    fn drop_empty(&mut self) {
        for channels in self.groups.values_mut() {
            channels.retain(|_, stamps| !stamps.is_empty());
        }
        self.groups.retain(|_, channels| !channels.is_empty());
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Backfill state of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    boundary: Option<NaiveDateTime>,
    #[serde(default)]
    imported: BTreeSet<u64>,
}

/// guild -> channel -> backfill state
type Ledger = BTreeMap<String, BTreeMap<String, LedgerScope>>;

fn ledger_path(path: &Path) -> PathBuf {
    path.with_extension("backfill.json")
}

fn load_ledger(path: &Path) -> Result<Ledger> {
    if !path.exists() {
        return Ok(Ledger::default());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Ledger::default());
    }
    Ok(serde_json::from_str(&content)?)
}

/// When the JSON store writes to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Every mutation is persisted before returning
    #[default]
    WriteThrough,
    /// Mutations stay in memory until [`EventStore::flush`]
    Deferred,
}

struct Inner {
    doc: Document,
    dirty: bool,
    ledger: Ledger,
    ledger_dirty: bool,
}

/// Event store backed by a single JSON document.
pub struct JsonFileStore {
    path: PathBuf,
    mode: SaveMode,
    inner: Mutex<Inner>,
}

impl JsonFileStore {
    /// Open (or create on first write) a write-through store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_mode(path, SaveMode::WriteThrough)
    }

    /// Open a store with an explicit save mode.
    pub fn open_with_mode(path: impl Into<PathBuf>, mode: SaveMode) -> Result<Self> {
        let path = path.into();
        let doc = Document::load(&path)?;
        let ledger = load_ledger(&ledger_path(&path))?;
        tracing::debug!(
            path = %path.display(),
            events = doc.event_count(),
            ?mode,
            "Opened JSON event store"
        );
        Ok(Self {
            path,
            mode,
            inner: Mutex::new(Inner {
                doc,
                dirty: false,
                ledger,
                ledger_dirty: false,
            }),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current document.
    pub fn document(&self) -> Result<Document> {
        Ok(self.lock()?.doc.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("JSON store lock poisoned".to_string()))
    }

    fn persist(&self, inner: &mut Inner) -> Result<()> {
        match self.mode {
            SaveMode::WriteThrough => {
                inner.doc.save(&self.path)?;
                inner.dirty = false;
            }
            SaveMode::Deferred => inner.dirty = true,
        }
        Ok(())
    }

    fn persist_ledger(&self, inner: &mut Inner) -> Result<()> {
        match self.mode {
            SaveMode::WriteThrough => {
                save_ledger(&self.path, &inner.ledger)?;
                inner.ledger_dirty = false;
            }
            SaveMode::Deferred => inner.ledger_dirty = true,
        }
        Ok(())
    }
}

fn save_ledger(path: &Path, ledger: &Ledger) -> Result<()> {
    write_atomic(&ledger_path(path), &serde_json::to_string_pretty(ledger)?)
}

impl EventStore for JsonFileStore {
    fn append(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        occurred_at: NaiveDateTime,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner.doc.push(scope_group_id, scope_id, occurred_at);
        if let Err(e) = self.persist(&mut inner) {
            inner.doc.remove_last(scope_group_id, scope_id);
            return Err(e);
        }
        Ok(())
    }

    fn count_in_window(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u64> {
        let inner = self.lock()?;
        let count = inner
            .doc
            .stamps(scope_group_id, scope_id)
            .iter()
            .filter(|ts| **ts >= start && **ts <= end)
            .count();
        Ok(count as u64)
    }

    fn list_scopes(&self, scope_group_id: &str) -> Result<BTreeSet<String>> {
        let inner = self.lock()?;
        Ok(inner
            .doc
            .groups
            .get(scope_group_id)
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn prune_before(&self, cutoff: NaiveDateTime, scope_group_id: Option<&str>) -> Result<usize> {
        let mut inner = self.lock()?;
        let removed = inner.doc.prune_before(cutoff, scope_group_id);
        if removed > 0 {
            self.persist(&mut inner)?;
        }
        Ok(removed)
    }

    fn earliest(&self, scope_group_id: &str, scope_id: &str) -> Result<Option<NaiveDateTime>> {
        let inner = self.lock()?;
        Ok(inner.doc.stamps(scope_group_id, scope_id).iter().min().copied())
    }

    fn backfill_boundary(
        &self,
        scope_group_id: &str,
        scope_id: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let inner = self.lock()?;
        Ok(inner
            .ledger
            .get(scope_group_id)
            .and_then(|channels| channels.get(scope_id))
            .and_then(|scope| scope.boundary))
    }

    fn set_backfill_boundary(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        boundary: NaiveDateTime,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .ledger
            .entry(scope_group_id.to_string())
            .or_default()
            .entry(scope_id.to_string())
            .or_default()
            .boundary = Some(boundary);
        self.persist_ledger(&mut inner)
    }

    fn append_backfilled(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        message_id: u64,
        occurred_at: NaiveDateTime,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        let fresh = inner
            .ledger
            .entry(scope_group_id.to_string())
            .or_default()
            .entry(scope_id.to_string())
            .or_default()
            .imported
            .insert(message_id);
        if !fresh {
            return Ok(false);
        }

        inner.doc.push(scope_group_id, scope_id, occurred_at);
        let saved = self
            .persist(&mut inner)
            .and_then(|()| self.persist_ledger(&mut inner));
        if let Err(e) = saved {
            inner.doc.remove_last(scope_group_id, scope_id);
            if let Some(scope) = inner
                .ledger
                .get_mut(scope_group_id)
                .and_then(|channels| channels.get_mut(scope_id))
            {
                scope.imported.remove(&message_id);
            }
            return Err(e);
        }
        Ok(true)
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.dirty {
            inner.doc.save(&self.path)?;
            inner.dirty = false;
            tracing::debug!(path = %self.path.display(), "Flushed JSON event store");
        }
        if inner.ledger_dirty {
            save_ledger(&self.path, &inner.ledger)?;
            inner.ledger_dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 27)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_legacy_document_is_normalized() {
        let legacy = r#"{
  "111": {
    "222": ["2025-11-27T12:34:56", "2025-11-27T12:34:57.250000+00:00"]
  }
}"#;
        let doc = Document::from_json_str(legacy).unwrap();
        assert_eq!(doc.event_count(), 2);

        let out = doc.to_json_string().unwrap();
        assert!(out.contains("2025-11-27T12:34:56.000000"));
        assert!(out.contains("2025-11-27T12:34:57.250000"));
    }

    #[test]
    fn test_write_through_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kaso_data.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.append("g", "c1", base()).unwrap();
        store.append("g", "c1", base()).unwrap();
        store.append("g", "c2", base()).unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened
                .count_in_window("g", "c1", base(), base())
                .unwrap(),
            2
        );
        assert_eq!(reopened.list_scopes("g").unwrap().len(), 2);
    }

    #[test]
    fn test_deferred_mode_writes_on_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kaso_data.json");

        let store = JsonFileStore::open_with_mode(&path, SaveMode::Deferred).unwrap();
        store.append("g", "c", base()).unwrap();
        assert!(!path.exists());

        store.flush().unwrap();
        assert!(path.exists());
        assert_eq!(Document::load(&path).unwrap().event_count(), 1);
    }

    #[test]
    fn test_prune_drops_emptied_channels() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("d.json")).unwrap();
        store.append("g", "old", base() - Duration::days(40)).unwrap();
        store.append("g", "new", base()).unwrap();
        store.append("h", "old", base() - Duration::days(40)).unwrap();

        let removed = store
            .prune_before(base() - Duration::days(30), Some("g"))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            store.list_scopes("g").unwrap().into_iter().collect::<Vec<_>>(),
            vec!["new".to_string()]
        );
        assert_eq!(store.list_scopes("h").unwrap().len(), 1);
    }

    #[test]
    fn test_earliest_and_unknown_scope() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("d.json")).unwrap();
        store.append("g", "c", base()).unwrap();
        store.append("g", "c", base() - Duration::hours(3)).unwrap();

        assert_eq!(
            store.earliest("g", "c").unwrap(),
            Some(base() - Duration::hours(3))
        );
        assert_eq!(store.earliest("g", "missing").unwrap(), None);
        assert_eq!(
            store
                .count_in_window("nope", "missing", base(), base())
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_failed_write_rolls_back_append() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = JsonFileStore::open(blocker.join("d.json")).unwrap();

        assert!(store.append("g", "c", base()).is_err());
        assert!(store.list_scopes("g").unwrap().is_empty());
        assert_eq!(store.document().unwrap().event_count(), 0);
        assert_eq!(store.earliest("g", "c").unwrap(), None);
    }

    #[test]
    fn test_backfill_ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kaso_data.json");
        let at = base() - Duration::hours(1);
        {
            let store = JsonFileStore::open_with_mode(&path, SaveMode::Deferred).unwrap();
            store.set_backfill_boundary("g", "c", base()).unwrap();
            assert!(store.append_backfilled("g", "c", 7, at).unwrap());
            assert!(!store.append_backfilled("g", "c", 7, at).unwrap());
            store.flush().unwrap();
        }

        assert!(dir.path().join("kaso_data.backfill.json").exists());
        // The document keeps the plain legacy layout
        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.event_count(), 1);

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.backfill_boundary("g", "c").unwrap(), Some(base()));
        assert!(!store.append_backfilled("g", "c", 7, at).unwrap());
        assert!(store.append_backfilled("g", "c", 8, at).unwrap());
        assert_eq!(store.count_in_window("g", "c", at, at).unwrap(), 2);
    }

    #[test]
    fn test_count_since_unbounded_lookback() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("d.json")).unwrap();
        store.append("g", "c", base() - Duration::days(3650)).unwrap();
        store.append("g", "c", base()).unwrap();

        assert_eq!(store.count_since("g", "c", u32::MAX).unwrap(), 2);
    }

    #[test]
    fn test_document_stats() {
        let mut doc = Document::default();
        assert_eq!(doc.stats().oldest, None);

        doc.push("g", "a", base());
        doc.push("g", "b", base() - Duration::days(2));
        doc.push("h", "a", base() + Duration::hours(1));

        let stats = doc.stats();
        assert_eq!(stats.event_count, 3);
        assert_eq!(stats.group_count, 2);
        assert_eq!(stats.scope_count, 3);
        assert_eq!(stats.oldest, Some(base() - Duration::days(2)));
        assert_eq!(stats.newest, Some(base() + Duration::hours(1)));
        assert_eq!(doc.groups(), vec!["g".to_string(), "h".to_string()]);
    }
}
