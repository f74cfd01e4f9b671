//! JSONL journal of refresh events, one file per UTC day.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use briefing::RefreshEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

const DEFAULT_JOURNAL_DIR: &str = "journal";

pub fn resolve_journal_dir() -> PathBuf {
    if let Ok(raw) = std::env::var("JOURNAL_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_JOURNAL_DIR)
}

pub struct RefreshJournal {
    dir: PathBuf,
    day_key: String,
    file: File,
}

impl RefreshJournal {
    pub fn open(dir: PathBuf, now: DateTime<Utc>) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        let day_key = now.format("%Y-%m-%d").to_string();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self { dir, day_key, file })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("refresh-{}.jsonl", day_key)))
    }

    fn rotate_if_needed(&mut self, now: DateTime<Utc>) -> std::io::Result<()> {
        let today = now.format("%Y-%m-%d").to_string();
        if today != self.day_key {
            self.file = Self::open_day_file(&self.dir, &today)?;
            self.day_key = today;
        }
        Ok(())
    }

    /// Append `event` with a `ts` field. Write failures are logged, not returned.
    pub fn write_event(&mut self, mut event: serde_json::Value, now: DateTime<Utc>) {
        if let Some(obj) = event.as_object_mut() {
            obj.insert(
                "ts".into(),
                json!(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }

        let result = (|| -> std::io::Result<()> {
            self.rotate_if_needed(now)?;
            let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            writeln!(self.file, "{}", line)?;
            self.file.flush()?;
            Ok(())
        })();

        if let Err(e) = result {
            tracing::warn!("Refresh journal write failed: {}", e);
        }
    }

    pub fn record(&mut self, event: &RefreshEvent, now: DateTime<Utc>) {
        match serde_json::to_value(event) {
            Ok(value) => self.write_event(value, now),
            Err(e) => tracing::warn!("Refresh event not serializable: {}", e),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use common::CycleKey;

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .expect("journal readable")
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid json line"))
            .collect()
    }

    #[test]
    fn test_events_are_appended_as_jsonl() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let now = utc("2026-02-13T05:01:00Z");
        let mut journal = RefreshJournal::open(tmp.path().to_path_buf(), now).expect("journal opens");

        let event = RefreshEvent::BuildStarted {
            build_id: uuid::Uuid::nil(),
            cycle: CycleKey::new(
                NaiveDate::from_ymd_opt(2026, 2, 13).expect("valid date"),
                NaiveTime::from_hms_opt(6, 0, 0).expect("valid time"),
            ),
            at: now,
        };
        journal.record(&event, now);
        journal.write_event(json!({ "kind": "service_stop" }), now);

        let lines = read_lines(&tmp.path().join("refresh-2026-02-13.jsonl"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "build_started");
        assert_eq!(lines[0]["ts"], "2026-02-13T05:01:00.000Z");
        assert_eq!(lines[1]["kind"], "service_stop");
    }

    #[test]
    fn test_journal_rotates_at_day_change() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut journal = RefreshJournal::open(tmp.path().to_path_buf(), utc("2026-02-13T23:59:00Z"))
            .expect("journal opens");

        journal.write_event(json!({ "kind": "a" }), utc("2026-02-13T23:59:30Z"));
        journal.write_event(json!({ "kind": "b" }), utc("2026-02-14T00:00:10Z"));

        assert_eq!(read_lines(&tmp.path().join("refresh-2026-02-13.jsonl")).len(), 1);
        assert_eq!(read_lines(&tmp.path().join("refresh-2026-02-14.jsonl")).len(), 1);
        assert_eq!(journal.dir(), tmp.path());
    }
}
