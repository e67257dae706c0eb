use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

pub type EventPayload = Map<String, Value>;

/// Fields every line carries; a payload cannot replace them.
pub const RESERVED_FIELDS: [&str; 3] = ["type", "session_id", "ts"];

/// Everything an editing session records in `events.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    SessionStarted,
    ImageImported,
    SettingsUpdated,
    MaskSet,
    MaskCleared,
    GenerationStarted,
    GenerationCommitted,
    VariationsReady,
    GenerationFailed,
    GenerationStale,
    UsageLimitReached,
    PreviewSelected,
    VariationAccepted,
    VariationCancelled,
    HistoryUndo,
    HistoryRedo,
    ImageExported,
    FeedbackSubmitted,
    SessionFinished,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::SessionStarted,
        EventKind::ImageImported,
        EventKind::SettingsUpdated,
        EventKind::MaskSet,
        EventKind::MaskCleared,
        EventKind::GenerationStarted,
        EventKind::GenerationCommitted,
        EventKind::VariationsReady,
        EventKind::GenerationFailed,
        EventKind::GenerationStale,
        EventKind::UsageLimitReached,
        EventKind::PreviewSelected,
        EventKind::VariationAccepted,
        EventKind::VariationCancelled,
        EventKind::HistoryUndo,
        EventKind::HistoryRedo,
        EventKind::ImageExported,
        EventKind::FeedbackSubmitted,
        EventKind::SessionFinished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::ImageImported => "image_imported",
            EventKind::SettingsUpdated => "settings_updated",
            EventKind::MaskSet => "mask_set",
            EventKind::MaskCleared => "mask_cleared",
            EventKind::GenerationStarted => "generation_started",
            EventKind::GenerationCommitted => "generation_committed",
            EventKind::VariationsReady => "variations_ready",
            EventKind::GenerationFailed => "generation_failed",
            EventKind::GenerationStale => "generation_stale",
            EventKind::UsageLimitReached => "usage_limit_reached",
            EventKind::PreviewSelected => "preview_selected",
            EventKind::VariationAccepted => "variation_accepted",
            EventKind::VariationCancelled => "variation_cancelled",
            EventKind::HistoryUndo => "history_undo",
            EventKind::HistoryRedo => "history_redo",
            EventKind::ImageExported => "image_exported",
            EventKind::FeedbackSubmitted => "feedback_submitted",
            EventKind::SessionFinished => "session_finished",
        }
    }

    /// Whether the event moved the edit history cursor.
    pub fn moves_cursor(self) -> bool {
        matches!(
            self,
            EventKind::ImageImported
                | EventKind::GenerationCommitted
                | EventKind::VariationAccepted
                | EventKind::HistoryUndo
                | EventKind::HistoryRedo
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownEventKind(value.to_string()))
    }
}

/// Append-only writer for a session's `events.jsonl`.
///
/// - every line is one compact JSON object
/// - `type`, `session_id` and `ts` are always the writer's own
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event: Map<String, Value> = payload
            .into_iter()
            .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
            .collect();
        event.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// One parsed line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub session_id: String,
    pub ts: String,
    pub payload: EventPayload,
}

/// Reads a whole event log. A missing file is an empty log; blank lines are
/// skipped; anything else that does not parse is an error naming the line.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<EventRecord>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };

    let mut records = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_event_line(line)
            .with_context(|| format!("{}:{}: bad event line", path.display(), index + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn parse_event_line(line: &str) -> anyhow::Result<EventRecord> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut payload) = value else {
        anyhow::bail!("event is not a JSON object");
    };
    let mut take_str = |key: &str| match payload.remove(key) {
        Some(Value::String(text)) => Ok(text),
        _ => Err(anyhow::anyhow!("missing '{key}'")),
    };
    let kind = take_str("type")?.parse::<EventKind>()?;
    let session_id = take_str("session_id")?;
    let ts = take_str("ts")?;
    Ok(EventRecord {
        kind,
        session_id,
        ts,
        payload,
    })
}

pub fn count_by_kind(records: &[EventRecord]) -> BTreeMap<EventKind, u64> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.kind).or_insert(0) += 1;
    }
    counts
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("cursor".to_string(), Value::from(2));
        let emitted = writer.emit(EventKind::HistoryUndo, payload)?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 1);
        let parsed: Value = serde_json::from_str(content.trim_end())?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::from("history_undo"));
        assert_eq!(parsed["session_id"], Value::from("session-123"));
        assert_eq!(parsed["cursor"], Value::from(2));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_cannot_replace_reserved_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::from("override"));
        payload.insert("session_id".to_string(), Value::from("other"));
        payload.insert("bytes".to_string(), Value::from(42));
        let emitted = writer.emit(EventKind::ImageImported, payload)?;

        assert_eq!(emitted["type"], Value::from("image_imported"));
        assert_eq!(emitted["session_id"], Value::from("session-123"));
        assert_eq!(emitted["bytes"], Value::from(42));

        let records = read_events(&path)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::ImageImported);
        assert_eq!(records[0].payload.len(), 1);
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");
        let shared = writer.clone();

        writer.emit(EventKind::SessionStarted, EventPayload::new())?;
        shared.emit(EventKind::HistoryUndo, EventPayload::new())?;
        writer.emit(EventKind::HistoryUndo, EventPayload::new())?;

        let records = read_events(&path)?;
        let kinds: Vec<EventKind> = records.iter().map(|record| record.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::SessionStarted,
                EventKind::HistoryUndo,
                EventKind::HistoryUndo
            ]
        );
        assert!(records.iter().all(|record| record.session_id == "session-123"));

        let counts = count_by_kind(&records);
        assert_eq!(counts.get(&EventKind::HistoryUndo), Some(&2));
        assert_eq!(counts.get(&EventKind::HistoryRedo), None);
        Ok(())
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert_eq!(
            "teleported".parse::<EventKind>(),
            Err(UnknownEventKind("teleported".to_string()))
        );
        assert!(EventKind::HistoryRedo.moves_cursor());
        assert!(!EventKind::VariationsReady.moves_cursor());
    }

    #[test]
    fn read_events_reports_bad_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        assert!(read_events(&path)?.is_empty());

        fs::write(
            &path,
            "{\"type\":\"history_redo\",\"session_id\":\"s\",\"ts\":\"t\"}\n\n{\"type\":\"warp\",\"session_id\":\"s\",\"ts\":\"t\"}\n",
        )?;
        let err = read_events(&path)
            .err()
            .ok_or_else(|| anyhow::anyhow!("unknown type should fail"))?;
        let text = format!("{err:#}");
        assert!(text.contains("events.jsonl:3"));
        assert!(text.contains("unknown event type 'warp'"));
        Ok(())
    }
}
