use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::error::SessionError;

pub const ADMIN_MODE_FLAG: &str = "is_admin";
pub const UPDATE_NOTICE_FLAG: &str = "studio_update_1_0_6";
pub const FEEDBACK_SUBMITTED_FLAG: &str = "studio_feedback_submitted";

pub const USAGE_KEY: &str = "studio_usage";
pub const DEFAULT_DAILY_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagScope {
    /// Lives as long as the process.
    Session,
    /// Written through to the JSON file.
    Persistent,
}

/// Boolean UI flags keyed by fixed identifiers: admin unlock, one-time
/// notice dismissals.
///
/// Persistent flags are re-read from disk on every lookup and only the
/// changed key is merged back, so two stores on the same file do not clobber
/// each other.
#[derive(Debug, Clone)]
pub struct FlagStore {
    path: PathBuf,
    session: BTreeSet<String>,
}

impl FlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_set(&self, key: &str) -> bool {
        if self.session.contains(key) {
            return true;
        }
        read_json_object(&self.path)
            .and_then(|payload| payload.get(key).and_then(Value::as_bool))
            .unwrap_or(false)
    }

    pub fn set(&mut self, key: &str, scope: FlagScope) -> anyhow::Result<()> {
        match scope {
            FlagScope::Session => {
                self.session.insert(key.to_string());
                Ok(())
            }
            FlagScope::Persistent => self.write_key(key, Value::Bool(true)),
        }
    }

    pub fn clear(&mut self, key: &str) -> anyhow::Result<()> {
        self.session.remove(key);
        if read_json_object(&self.path)
            .map(|payload| payload.contains_key(key))
            .unwrap_or(false)
        {
            self.write_key(key, Value::Bool(false))?;
        }
        Ok(())
    }

    fn write_key(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        if on_disk.get(key) == Some(&value) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), value);
        write_json_object(&self.path, &on_disk)
    }
}

/// Per-day count of generated images, stored under [`USAGE_KEY`] in the
/// same JSON file as the flags: `{"date": "YYYY-MM-DD", "count": n}`.
///
/// A stored date other than the current UTC day reads as zero.
#[derive(Debug, Clone)]
pub struct UsageQuota {
    path: PathBuf,
    limit: u32,
}

impl UsageQuota {
    pub fn new(path: impl Into<PathBuf>, limit: u32) -> Self {
        Self {
            path: path.into(),
            limit,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used_today(&self) -> u32 {
        self.used_on(today())
    }

    pub fn used_on(&self, day: NaiveDate) -> u32 {
        let Some(payload) = read_json_object(&self.path) else {
            return 0;
        };
        let Some(usage) = payload.get(USAGE_KEY) else {
            return 0;
        };
        if usage.get("date").and_then(Value::as_str) != Some(day.to_string().as_str()) {
            return 0;
        }
        usage
            .get("count")
            .and_then(Value::as_u64)
            .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    /// Blocks new work once today's count has reached the limit.
    pub fn check(&self) -> Result<(), SessionError> {
        self.check_on(today())
    }

    pub fn check_on(&self, day: NaiveDate) -> Result<(), SessionError> {
        let used = self.used_on(day);
        if used >= self.limit {
            return Err(SessionError::UsageLimitReached {
                used,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Adds `images` to today's count and returns the new total.
    pub fn record(&self, images: u32) -> anyhow::Result<u32> {
        self.record_on(today(), images)
    }

    pub fn record_on(&self, day: NaiveDate, images: u32) -> anyhow::Result<u32> {
        let total = self.used_on(day).saturating_add(images);
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        on_disk.insert(
            USAGE_KEY.to_string(),
            json!({ "date": day.to_string(), "count": total }),
        );
        write_json_object(&self.path, &on_disk)?;
        Ok(total)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
