//! Integration tests for the kasocheck store, reports and backfill
//!
//! `tests/fixtures/legacy_kaso_data.json` is a document from the legacy bot,
//! with its mix of timestamp forms.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use kasocheck_core::config::{BackfillConfig, OverlapPolicy, ReportConfig};
use kasocheck_core::ingest::{BackfillImporter, BackfillOptions, HistoryRequest, MessageSource};
use kasocheck_core::store::{Document, JsonFileStore, SaveMode};
use kasocheck_core::{
    Database, EventStore, HistoricalMessage, ReportAggregator, Result, RetentionManager,
    ThresholdLadder,
};
use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const GUILD: &str = "412345678901234567";

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 11, 27)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn memory_db() -> Arc<Database> {
    let db = Database::open_in_memory().expect("open in-memory db");
    db.migrate().expect("migrate");
    Arc::new(db)
}

/// Spread `n` events over the `days` days before `now()`.
fn spread(store: &dyn EventStore, scope_id: &str, n: u64, days: i64) {
    let step = Duration::days(days).num_seconds() / n as i64;
    for i in 0..n as i64 {
        store
            .append(GUILD, scope_id, now() - Duration::seconds(i * step))
            .unwrap();
    }
}

// ============================================
// Report scenarios
// ============================================

#[test]
fn test_single_busy_channel_end_to_end() {
    let db = memory_db();
    spread(db.as_ref(), "general", 7500, 7);

    let report = ReportAggregator::new(db.clone(), ThresholdLadder::default())
        .summarize_at(GUILD, 7, 10, now())
        .unwrap();

    assert_eq!(report.total_count, 7500);
    assert_eq!(report.scope_count, 1);
    assert_eq!(report.entries[0].scope_id, "general");
    assert_eq!(report.entries[0].count, 7500);
    assert!((report.entries[0].percent - 100.0).abs() < 1e-9);
    // 7500 / 7 = 1071 per day: below 2000, at least 1000
    assert_eq!(report.group_level, 3);
    assert_eq!(report.per_channel_avg_level, 3);
    assert_eq!(report.activity_score, 8);
    assert_eq!(report.title(), "Active community! (Level 3)");
    assert!(report.top_list.contains("7,500 (100.0%) - Level 3"));
    assert!(report.render().ends_with("Total: 7,500 messages"));
}

#[test]
fn test_many_channels_are_truncated_visibly() {
    let db = memory_db();
    for i in 0..60 {
        db.append(GUILD, &format!("5123456789012345{:02}", i), now() - Duration::hours(1))
            .unwrap();
    }

    let report = ReportAggregator::new(db.clone(), ThresholdLadder::default())
        .summarize_at(GUILD, 7, 10, now())
        .unwrap();

    assert_eq!(report.scope_count, 60);
    assert_eq!(report.entries.len(), 60);
    assert_eq!(report.top.len(), 10);
    assert_eq!(report.top_list.lines().count(), 10);
    // Ties keep channel id order
    assert_eq!(report.top[0].scope_id, "512345678901234500");
    assert_eq!(report.top[9].scope_id, "512345678901234509");

    assert!(report.channel_list.chars().count() <= 1024);
    let last = report.channel_list.lines().last().unwrap();
    let listed = report.channel_list.lines().count() - 1;
    assert_eq!(last, format!("...and {} more", 60 - listed));
}

#[test]
fn test_field_limit_is_configurable() {
    let db = memory_db();
    for i in 0..20 {
        db.append(GUILD, &format!("channel-{:02}", i), now()).unwrap();
    }
    let config = ReportConfig {
        field_limit: 100,
        ..ReportConfig::default()
    };

    let report = ReportAggregator::with_config(db, ThresholdLadder::default(), &config)
        .summarize_at(GUILD, 7, 20, now())
        .unwrap();
    assert!(report.top_list.chars().count() <= 100);
    assert!(report.channel_list.chars().count() <= 100);
    assert!(report.channel_list.ends_with("more"));
}

#[test]
fn test_empty_guild_report() {
    let db = memory_db();
    let report = ReportAggregator::new(db, ThresholdLadder::default())
        .summarize_at("unknown-guild", 7, 10, now())
        .unwrap();

    assert_eq!(report.total_count, 0);
    assert_eq!(report.group_level, 10);
    assert_eq!(report.activity_score, 1);
    assert!(report.entries.is_empty());
    assert!(report.channel_list.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_report_conserves_counts(counts in prop::collection::vec(0u64..40, 1..8)) {
        let db = memory_db();
        for (i, n) in counts.iter().enumerate() {
            let scope = format!("c{}", i);
            // Every channel keeps one event outside the window so it stays listed.
            db.append(GUILD, &scope, now() - Duration::days(20)).unwrap();
            for k in 0..*n {
                db.append(GUILD, &scope, now() - Duration::minutes(k as i64)).unwrap();
            }
        }

        let report = ReportAggregator::new(db, ThresholdLadder::default())
            .summarize_at(GUILD, 7, 10, now())
            .unwrap();

        let expected: u64 = counts.iter().sum();
        prop_assert_eq!(report.total_count, expected);
        prop_assert_eq!(report.entries.iter().map(|e| e.count).sum::<u64>(), expected);
        prop_assert_eq!(report.scope_count, counts.len());

        let percent: f64 = report.entries.iter().map(|e| e.percent).sum();
        if expected > 0 {
            prop_assert!((percent - 100.0).abs() < 1e-6);
        } else {
            prop_assert_eq!(percent, 0.0);
        }
        prop_assert!(report.entries.windows(2).all(|w| w[0].count >= w[1].count));
    }
}

// ============================================
// Backends
// ============================================

#[test]
fn test_backends_produce_identical_reports() {
    let temp = TempDir::new().unwrap();
    let db = memory_db();
    let json: Arc<dyn EventStore> = Arc::new(
        JsonFileStore::open_with_mode(temp.path().join("kaso_data.json"), SaveMode::Deferred)
            .unwrap(),
    );

    for store in [db.clone() as Arc<dyn EventStore>, json.clone()] {
        spread(store.as_ref(), "general", 300, 7);
        spread(store.as_ref(), "memes", 120, 7);
        spread(store.as_ref(), "archive", 50, 30);
        store.flush().unwrap();
    }

    let sqlite_report = ReportAggregator::new(db, ThresholdLadder::default())
        .summarize_at(GUILD, 7, 10, now())
        .unwrap();
    let json_report = ReportAggregator::new(json, ThresholdLadder::default())
        .summarize_at(GUILD, 7, 10, now())
        .unwrap();

    assert_eq!(sqlite_report.entries, json_report.entries);
    assert_eq!(sqlite_report.total_count, json_report.total_count);
    assert_eq!(sqlite_report.group_level, json_report.group_level);
    assert_eq!(sqlite_report.channel_list, json_report.channel_list);
}

#[test]
fn test_legacy_document_migrates_into_sqlite() {
    let doc = Document::load(&fixture_path("legacy_kaso_data.json")).unwrap();
    assert_eq!(doc.event_count(), 6);

    let temp = TempDir::new().unwrap();
    let db = Database::open(&temp.path().join("activity.db")).unwrap();
    db.migrate().unwrap();
    assert_eq!(db.import_document(&doc).unwrap(), 6);

    let stats = db.stats().unwrap();
    assert_eq!(stats.event_count, 6);
    assert_eq!(stats.group_count, 2);
    assert_eq!(stats.scope_count, 3);
    assert_eq!(
        stats.oldest,
        Some(
            NaiveDate::from_ymd_opt(2025, 11, 19)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        )
    );

    // Offsets were converted to UTC, so both legacy entries land on 12:00.
    let noon = stats.oldest.unwrap();
    assert_eq!(
        db.count_in_window("412345678901230000", "612345678901234567", noon, noon)
            .unwrap(),
        2
    );

    assert_eq!(db.export_document().unwrap(), doc);
}

#[test]
fn test_retention_sweep_over_json_backend() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("kaso_data.json");
    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    store.append(GUILD, "old", now() - Duration::days(31)).unwrap();
    store.append(GUILD, "fresh", now() - Duration::days(29)).unwrap();

    let manager = RetentionManager::new(store.clone(), &Default::default());
    assert_eq!(manager.sweep_at(now()).unwrap().removed, 1);

    let reopened = JsonFileStore::open(&path).unwrap();
    let scopes: Vec<String> = reopened.list_scopes(GUILD).unwrap().into_iter().collect();
    assert_eq!(scopes, vec!["fresh".to_string()]);
}

// ============================================
// Backfill
// ============================================

/// One channel of history served in pages.
struct ScriptedSource {
    messages: Vec<HistoricalMessage>,
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn readable_scopes(&self, _: &str) -> Result<Vec<String>> {
        Ok(vec!["general".to_string()])
    }

    async fn fetch_page(&self, request: &HistoryRequest) -> Result<Vec<HistoricalMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| request.cursor.map_or(true, |c| m.id > c))
            .take(request.limit)
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn test_backfill_then_realtime_then_report() {
    let db = memory_db();
    let base = kasocheck_core::format::now_utc() - Duration::days(3);
    let source = ScriptedSource {
        messages: (1..=500)
            .map(|i| HistoricalMessage {
                id: i,
                created_at: base + Duration::minutes(i as i64),
                author_is_bot: i % 10 == 0,
            })
            .collect(),
    };
    let config = BackfillConfig {
        pause_ms: 0,
        overlap: OverlapPolicy::BeforeEarliest,
        ..BackfillConfig::default()
    };
    let importer = BackfillImporter::new(db.clone(), config);

    let summary = importer
        .backfill_group(
            &source,
            GUILD,
            BackfillOptions::default(),
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();
    assert_eq!(summary.imported, 450);
    assert_eq!(summary.scopes_done, 1);
    assert_eq!(summary.failed(), 0);

    // A second run sees the stored history and adds nothing.
    let again = importer
        .backfill_group(
            &source,
            GUILD,
            BackfillOptions::default(),
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();
    assert_eq!(again.imported, 0);

    let report = ReportAggregator::new(db, ThresholdLadder::default())
        .summarize(GUILD, 7, 10)
        .unwrap();
    assert_eq!(report.total_count, 450);
}

#[tokio::test]
async fn test_interrupted_backfill_resumes_over_json_backend() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("kaso_data.json");
    let base = kasocheck_core::format::now_utc() - Duration::days(2);
    let source = ScriptedSource {
        messages: (1..=100)
            .map(|i| HistoricalMessage {
                id: i,
                created_at: base + Duration::minutes(i as i64),
                author_is_bot: false,
            })
            .collect(),
    };
    let config = BackfillConfig {
        pause_ms: 0,
        ..BackfillConfig::default()
    };

    {
        let store = Arc::new(JsonFileStore::open_with_mode(&path, SaveMode::Deferred).unwrap());
        let cancel = CancellationToken::new();
        let outcome = BackfillImporter::new(store, config.clone())
            .import_history(
                &source,
                GUILD,
                "general",
                BackfillOptions {
                    max_items: Some(30),
                    since_days: None,
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome.imported, 30);
    }

    // A fresh process picks up where the first walk stopped.
    let store = Arc::new(JsonFileStore::open_with_mode(&path, SaveMode::Deferred).unwrap());
    let outcome = BackfillImporter::new(store.clone(), config)
        .import_history(
            &source,
            GUILD,
            "general",
            BackfillOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.already_imported, 30);
    assert_eq!(outcome.imported, 70);
    assert_eq!(store.count_since(GUILD, "general", 7).unwrap(), 100);
}
