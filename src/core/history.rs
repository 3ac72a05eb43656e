use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

use crate::core::models::history::{DailyRecord, HistorySummary, UtilizationAverages};
use crate::core::models::usage::UsageSnapshot;

/// Retention cap: at most this many days are kept.
pub const MAX_RECORDS: usize = 400;
/// Five-hour utilization at or above this counts as a limit hit.
pub const LIMIT_HIT_UTILIZATION: f64 = 100.0;

const HISTORY_VERSION: u64 = 1;
const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// On-disk form of the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDocument {
    /// Documents written before versioning count as version 1.
    #[serde(default = "current_version")]
    pub version: u64,
    #[serde(default)]
    pub daily_records: Vec<DailyRecord>,
}

fn current_version() -> u64 {
    HISTORY_VERSION
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Rolling per-day usage log, keyed by local calendar date.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: BTreeMap<String, DailyRecord>,
}

impl HistoryStore {
    /// `$XDG_DATA_HOME/claudemon/usage_history.json`, defaulting to `~/.local/share`
    pub fn default_path() -> PathBuf {
        let base = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".local")
                    .join("share")
            });
        base.join("claudemon").join("usage_history.json")
    }

    /// Load the store from `path`. A missing, unreadable or corrupt file
    /// yields an empty store.
    pub fn load(path: PathBuf) -> Self {
        let loaded = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HistoryDocument>(&content) {
                Ok(doc) if doc.version == HISTORY_VERSION => doc.daily_records,
                Ok(doc) => {
                    log::warn!(
                        "[history] {} has version {}, expected {}; starting empty",
                        path.display(),
                        doc.version,
                        HISTORY_VERSION
                    );
                    Vec::new()
                }
                Err(e) => {
                    log::warn!("[history] {} is corrupt ({}); starting empty", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[history] no history at {}", path.display());
                Vec::new()
            }
            Err(e) => {
                log::warn!("[history] failed to read {}: {}; starting empty", path.display(), e);
                Vec::new()
            }
        };

        let mut records = BTreeMap::new();
        for record in loaded {
            if NaiveDate::parse_from_str(&record.date_key, DATE_KEY_FORMAT).is_err() {
                log::warn!("[history] skipping record with bad date '{}'", record.date_key);
                continue;
            }
            records.insert(record.date_key.clone(), record);
        }

        let mut store = Self { path, records };
        store.evict_overflow();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, date_key: &str) -> Option<&DailyRecord> {
        self.records.get(date_key)
    }

    /// All records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &DailyRecord> {
        self.records.values()
    }

    /// Fold a snapshot into today's record. Persisting is left to the caller,
    /// usually through [`HistoryWriter`].
    pub fn record(&mut self, snapshot: &UsageSnapshot) {
        self.record_on(today(), snapshot);
    }

    /// Fold a snapshot into the record for `date`.
    pub fn record_on(&mut self, date: NaiveDate, snapshot: &UsageSnapshot) {
        let five_hour = snapshot.five_hour.as_ref().map_or(0.0, |w| w.utilization);
        let seven_day = snapshot.seven_day.as_ref().map_or(0.0, |w| w.utilization);
        let opus = snapshot.seven_day_opus.as_ref().map(|w| w.utilization);
        let hit_limit = five_hour >= LIMIT_HIT_UTILIZATION;
        let key = date_key(date);

        match self.records.get_mut(&key) {
            Some(record) => {
                record.peak_five_hour = record.peak_five_hour.max(five_hour);
                record.peak_seven_day = record.peak_seven_day.max(seven_day);
                if let Some(opus) = opus {
                    record.peak_opus = Some(record.peak_opus.unwrap_or(0.0).max(opus));
                }
                if hit_limit {
                    record.limit_hit_count += 1;
                }
                record.sample_count += 1;
            }
            None => {
                self.records.insert(
                    key.clone(),
                    DailyRecord {
                        date_key: key,
                        peak_five_hour: five_hour,
                        peak_seven_day: seven_day,
                        peak_opus: opus,
                        limit_hit_count: u32::from(hit_limit),
                        sample_count: 1,
                    },
                );
            }
        }

        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        while self.records.len() > MAX_RECORDS {
            if let Some((key, _)) = self.records.pop_first() {
                log::debug!("[history] evicted {}", key);
            }
        }
    }

    pub fn records_for_last_days(&self, days: u32) -> Vec<DailyRecord> {
        self.records_since(today(), days)
    }

    /// Records dated on or after `today - days`, oldest first.
    pub fn records_since(&self, today: NaiveDate, days: u32) -> Vec<DailyRecord> {
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        // Fixed-width ISO keys sort the same as the dates they encode.
        self.records
            .range(date_key(cutoff)..)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn average_utilization(&self, days: u32) -> UtilizationAverages {
        averages(&self.records_for_last_days(days))
    }

    pub fn days_limit_hit(&self, days: u32) -> usize {
        count_limit_days(&self.records_for_last_days(days))
    }

    pub fn summary(&self, days: u32) -> HistorySummary {
        HistorySummary {
            days,
            averages: self.average_utilization(days),
            days_limit_hit: self.days_limit_hit(days),
            records: self.records_for_last_days(days),
        }
    }

    pub fn to_document(&self) -> HistoryDocument {
        HistoryDocument {
            version: HISTORY_VERSION,
            daily_records: self.records().cloned().collect(),
        }
    }
}

fn averages(records: &[DailyRecord]) -> UtilizationAverages {
    if records.is_empty() {
        return UtilizationAverages::default();
    }
    let count = records.len() as f64;
    let five_hour = records.iter().map(|r| r.peak_five_hour).sum::<f64>() / count;
    let seven_day = records.iter().map(|r| r.peak_seven_day).sum::<f64>() / count;
    let opus_values: Vec<f64> = records.iter().filter_map(|r| r.peak_opus).collect();
    let opus = if opus_values.is_empty() {
        None
    } else {
        Some(opus_values.iter().sum::<f64>() / opus_values.len() as f64)
    };
    UtilizationAverages {
        five_hour,
        seven_day,
        opus,
    }
}

fn count_limit_days(records: &[DailyRecord]) -> usize {
    records.iter().filter(|r| r.limit_hit_count > 0).count()
}

/// Serialize to a sibling temp file, fsync, then rename over `path`, so a
/// reader only ever sees the previous or the new document.
pub fn write_document(path: &Path, document: &HistoryDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create history directory: {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(document).context("Failed to serialize usage history")?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("Failed to create {}", temp_path.display()))?;
    file.write_all(&json)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", temp_path.display()))?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
    Ok(())
}

enum WriterMessage {
    Save(HistoryDocument),
    Flush(oneshot::Sender<()>),
}

/// Background persister for the history document.
///
/// Documents are written in submission order by a single task; a document
/// still queued when a newer one arrives is skipped.
#[derive(Clone)]
pub struct HistoryWriter {
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl HistoryWriter {
    /// Must be called from within a tokio runtime.
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path, rx));
        Self { tx }
    }

    pub fn submit(&self, document: HistoryDocument) {
        if self.tx.send(WriterMessage::Save(document)).is_err() {
            log::warn!("[history] writer has stopped, dropping save");
        }
    }

    /// Resolves once every document submitted before this call is on disk.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
    while let Some(message) = rx.recv().await {
        let mut document = match message {
            WriterMessage::Save(document) => document,
            WriterMessage::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        let mut acks = Vec::new();
        while let Ok(next) = rx.try_recv() {
            match next {
                WriterMessage::Save(newer) => document = newer,
                WriterMessage::Flush(ack) => acks.push(ack),
            }
        }

        let target = path.clone();
        let count = document.daily_records.len();
        match tokio::task::spawn_blocking(move || write_document(&target, &document)).await {
            Ok(Ok(())) => log::debug!("[history] saved {} records to {}", count, path.display()),
            Ok(Err(e)) => log::warn!("[history] {:#}", e),
            Err(e) => log::warn!("[history] save task failed: {}", e),
        }

        for ack in acks {
            let _ = ack.send(());
        }
    }
}
