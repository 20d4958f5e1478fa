//! Exported channel history as a backfill source.
//!
//! A history directory holds one `<channel_id>.jsonl` file per channel, each
//! line a message:
//!
//! ```json
//! {"id": 1181234567890123456, "created_at": "2025-11-20T10:15:30.123456", "author_bot": false}
//! ```

use async_trait::async_trait;
use kasocheck_core::format::parse_timestamp;
use kasocheck_core::ingest::{HistoryRequest, MessageSource};
use kasocheck_core::{Error, HistoricalMessage, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Deserialize)]
struct ExportedMessage {
    id: u64,
    created_at: String,
    #[serde(default)]
    author_bot: bool,
}

/// Reads channel history from a directory of JSONL exports.
pub struct ExportDirSource {
    dir: PathBuf,
    /// Parsed channels, oldest first
    cache: Mutex<HashMap<String, Arc<Vec<HistoricalMessage>>>>,
}

impl ExportDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn channel_path(&self, scope_id: &str) -> PathBuf {
        self.dir.join(format!("{scope_id}.jsonl"))
    }

    fn cached(&self, scope_id: &str) -> Option<Arc<Vec<HistoricalMessage>>> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(scope_id).cloned())
    }

    async fn load_channel(&self, scope_id: &str) -> Result<Arc<Vec<HistoricalMessage>>> {
        if let Some(messages) = self.cached(scope_id) {
            return Ok(messages);
        }

        let path = self.channel_path(scope_id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| source_error(scope_id, format!("{}: {}", path.display(), e)))?;
        let messages = Arc::new(parse_export(scope_id, &content)?);
        tracing::debug!(
            scope_id,
            messages = messages.len(),
            path = %path.display(),
            "Loaded exported history"
        );

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(scope_id.to_string(), messages.clone());
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessageSource for ExportDirSource {
    async fn readable_scopes(&self, _scope_group_id: &str) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut scopes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                scopes.push(stem.to_string());
            }
        }
        scopes.sort();
        Ok(scopes)
    }

    async fn fetch_page(&self, request: &HistoryRequest) -> Result<Vec<HistoricalMessage>> {
        let messages = self.load_channel(&request.scope_id).await?;
        Ok(messages
            .iter()
            .filter(|m| request.cursor.map_or(true, |cursor| m.id > cursor))
            .filter(|m| request.after.map_or(true, |after| m.created_at >= after))
            .take(request.limit)
            .cloned()
            .collect())
    }
}

fn source_error(scope_id: &str, message: String) -> Error {
    Error::Source {
        scope_id: scope_id.to_string(),
        message,
    }
}

/// Parse one export file, sorted by message id.
fn parse_export(scope_id: &str, content: &str) -> Result<Vec<HistoricalMessage>> {
    let mut messages = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: ExportedMessage = serde_json::from_str(line)
            .map_err(|e| source_error(scope_id, format!("line {}: {}", line_no + 1, e)))?;
        let created_at = parse_timestamp(&raw.created_at)
            .map_err(|e| source_error(scope_id, format!("line {}: {}", line_no + 1, e)))?;
        messages.push(HistoricalMessage {
            id: raw.id,
            created_at,
            author_is_bot: raw.author_bot,
        });
    }
    messages.sort_by_key(|m| m.id);
    Ok(messages)
}
