use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One persisted chat message. Created once, appended to its day
/// partition, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub ts: DateTime<Utc>,
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub author_id: String,
    pub author: String,
    pub content: String,
    pub urls: Vec<String>,
}

/// Append-only, day-partitioned JSONL store: one file per channel per UTC
/// calendar day under `<base>/<YYYY-MM-DD>/<channel_id>.jsonl`.
///
/// Appends are at-least-once: re-running ingestion over an overlapping
/// window duplicates records, and nothing downstream deduplicates them.
#[derive(Debug, Clone)]
pub struct DayStore {
    base: PathBuf,
}

impl DayStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Append one record to the partition addressed by the record's UTC
    /// calendar date and channel id. Each record goes out as a single
    /// write of one serialized line, so concurrent appenders never
    /// interleave within a line.
    pub fn append(&self, record: &MessageRecord) -> anyhow::Result<()> {
        let day_dir = self.base.join(record.ts.date_naive().to_string());
        fs::create_dir_all(&day_dir)
            .with_context(|| format!("creating day dir {}", day_dir.display()))?;

        let path = day_dir.join(format!("{}.jsonl", record.channel_id));
        let mut line = serde_json::to_string(record).context("serializing message record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening partition {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to partition {}", path.display()))?;
        Ok(())
    }

    /// All channel partition files for a date, sorted by file name.
    pub fn partitions_for(&self, date: NaiveDate) -> anyhow::Result<Vec<PathBuf>> {
        let day_dir = self.base.join(date.to_string());
        if !day_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&day_dir)
            .with_context(|| format!("reading day dir {}", day_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Every record across all of a date's partitions. Partition files are
    /// visited in name order; within a partition, records come back in
    /// append order. Malformed lines are skipped with a warning.
    pub fn read_day(&self, date: NaiveDate) -> anyhow::Result<Vec<MessageRecord>> {
        let mut records = Vec::new();
        for path in self.partitions_for(date)? {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading partition {}", path.display()))?;
            records.extend(parse_jsonl(&content, &path.display().to_string()));
        }
        Ok(records)
    }

    /// All day directories currently buffered, sorted by date name.
    pub fn day_dirs(&self) -> anyhow::Result<Vec<PathBuf>> {
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.base)
            .with_context(|| format!("reading ingest dir {}", self.base.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }
}

/// Parse newline-delimited records, warning on (and skipping) bad lines.
pub fn parse_jsonl(content: &str, source: &str) -> Vec<MessageRecord> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<MessageRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Failed to parse line in {}: {}", source, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(ts: DateTime<Utc>, channel_id: &str, content: &str) -> MessageRecord {
        MessageRecord {
            ts,
            channel_id: channel_id.to_string(),
            channel_name: Some("general".to_string()),
            author_id: "1".to_string(),
            author: "trader#0001".to_string(),
            content: content.to_string(),
            urls: Vec::new(),
        }
    }

    #[test]
    fn appends_to_one_file_per_channel_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::new(dir.path());
        let day = Utc.with_ymd_and_hms(2025, 9, 20, 14, 0, 0).unwrap();

        store.append(&record(day, "111", "first $GME")).unwrap();
        store.append(&record(day, "111", "second")).unwrap();
        store.append(&record(day, "222", "other channel")).unwrap();

        let partitions = store.partitions_for(day.date_naive()).unwrap();
        assert_eq!(partitions.len(), 2);
        assert!(partitions[0].ends_with("111.jsonl"));
        assert!(partitions[1].ends_with("222.jsonl"));

        let records = store.read_day(day.date_naive()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].content, "first $GME");
        assert_eq!(records[1].content, "second");
    }

    #[test]
    fn partitions_by_utc_calendar_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::new(dir.path());

        let late = Utc.with_ymd_and_hms(2025, 9, 20, 23, 59, 0).unwrap();
        let early_next = Utc.with_ymd_and_hms(2025, 9, 21, 0, 1, 0).unwrap();
        store.append(&record(late, "111", "yesterday")).unwrap();
        store.append(&record(early_next, "111", "today")).unwrap();

        assert_eq!(store.read_day(late.date_naive()).unwrap().len(), 1);
        assert_eq!(store.read_day(early_next.date_naive()).unwrap().len(), 1);
        assert_eq!(store.day_dirs().unwrap().len(), 2);
    }

    #[test]
    fn concurrent_appends_never_tear_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::new(dir.path());
        let day = Utc.with_ymd_and_hms(2025, 9, 20, 10, 0, 0).unwrap();

        let writers = 8;
        let per_writer = 50;
        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let store = store.clone();
                std::thread::spawn(move || {
                    // Long payloads make a torn write far more likely to
                    // land mid-line if appends ever interleave.
                    let padding = "x".repeat(512);
                    for i in 0..per_writer {
                        store
                            .append(&record(day, "111", &format!("w{w} m{i} {padding}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let partitions = store.partitions_for(day.date_naive()).unwrap();
        assert_eq!(partitions.len(), 1);

        // Every physical line must parse back as a record; parse_jsonl
        // drops torn lines, so any interleaving shows up as a count drop.
        let content = std::fs::read_to_string(&partitions[0]).unwrap();
        assert_eq!(content.lines().count(), writers * per_writer);
        let records = parse_jsonl(&content, "concurrent");
        assert_eq!(records.len(), writers * per_writer);
    }

    #[test]
    fn missing_day_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(store.read_day(date).unwrap().is_empty());
        assert!(store.partitions_for(date).unwrap().is_empty());
        assert!(store.day_dirs().unwrap().is_empty());
    }

    #[test]
    fn round_trips_records_and_skips_garbage_lines() {
        let day = Utc.with_ymd_and_hms(2025, 9, 20, 8, 30, 0).unwrap();
        let rec = MessageRecord {
            urls: vec!["https://x.test/chart".to_string()],
            ..record(day, "111", "watch $NVDA")
        };
        let mut content = serde_json::to_string(&rec).unwrap();
        content.push_str("\nnot json\n\n");

        let parsed = parse_jsonl(&content, "test");
        assert_eq!(parsed, vec![rec]);
    }
}
