//! Storage backend selected by `storage.backend`.

use anyhow::{Context, Result};
use kasocheck_core::config::{StorageBackend, StorageConfig};
use kasocheck_core::store::{Document, SaveMode};
use kasocheck_core::{Database, EventStore, JsonFileStore, StoreStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub enum Backend {
    Sqlite(Arc<Database>),
    Json(Arc<JsonFileStore>),
}

impl Backend {
    /// Open the configured store.
    ///
    /// `deferred` keeps JSON writes in memory until a flush, for long runs
    /// that checkpoint on their own.
    pub fn open(config: &StorageConfig, deferred: bool) -> Result<(Self, PathBuf)> {
        let path = config.resolved_path();
        tracing::info!(path = %path.display(), backend = ?config.backend, "Opening store");

        let backend = match config.backend {
            StorageBackend::Sqlite => {
                let db = Database::open(&path).context("failed to open database")?;
                db.migrate().context("failed to run database migrations")?;
                Backend::Sqlite(Arc::new(db))
            }
            StorageBackend::Json => {
                let mode = if deferred {
                    SaveMode::Deferred
                } else {
                    SaveMode::WriteThrough
                };
                let store = JsonFileStore::open_with_mode(&path, mode)
                    .context("failed to open JSON store")?;
                Backend::Json(Arc::new(store))
            }
        };
        Ok((backend, path))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sqlite(_) => "sqlite",
            Backend::Json(_) => "json",
        }
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        match self {
            Backend::Sqlite(db) => db.clone(),
            Backend::Json(store) => store.clone(),
        }
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(match self {
            Backend::Sqlite(db) => db.stats()?,
            Backend::Json(store) => store.document()?.stats(),
        })
    }

    pub fn groups(&self) -> Result<Vec<String>> {
        Ok(match self {
            Backend::Sqlite(db) => db.list_groups()?,
            Backend::Json(store) => store.document()?.groups(),
        })
    }

    /// Every stored event as a JSON document.
    pub fn export(&self) -> Result<Document> {
        Ok(match self {
            Backend::Sqlite(db) => db.export_document()?,
            Backend::Json(store) => store.document()?,
        })
    }

    /// Add every event of a legacy document. Returns the number added.
    pub fn import(&self, doc: &Document) -> Result<usize> {
        match self {
            Backend::Sqlite(db) => Ok(db.import_document(doc)?),
            Backend::Json(store) => {
                let mut added = 0;
                for event in doc.events() {
                    store.append(&event.scope_group_id, &event.scope_id, event.occurred_at)?;
                    added += 1;
                }
                store.flush()?;
                Ok(added)
            }
        }
    }
}

/// Load a legacy `kaso_data.json` document.
pub fn load_legacy(path: &Path) -> Result<Document> {
    if !path.exists() {
        anyhow::bail!("legacy file not found: {}", path.display());
    }
    Document::load(path).with_context(|| format!("failed to read {}", path.display()))
}
