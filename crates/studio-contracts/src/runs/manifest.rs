use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    Upload,
    Generation,
    Variation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEntry {
    pub step_id: String,
    pub parent_step_id: Option<String>,
    pub source: StepSource,
    pub prompt: Option<String>,
    pub prompt_diff: Option<Vec<String>>,
    pub settings: Value,
    pub image_file: String,
    pub image_sha256: String,
    pub created_at: String,
}

/// New step to record; ids, diffs and timestamps are filled in by the
/// manifest.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub source: StepSource,
    pub prompt: Option<String>,
    pub settings: Value,
    pub image_file: String,
    pub image_sha256: String,
}

/// `session.json`: every history step the session ever committed, including
/// steps later dropped from the redo branch. Parent links follow the cursor
/// at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionManifest {
    pub path: PathBuf,
    pub schema_version: u64,
    pub session_id: String,
    pub created_at: String,
    pub steps: Vec<StepEntry>,
}

impl SessionManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: 1,
            session_id: Uuid::new_v4().to_string(),
            created_at: now_utc_iso(),
            steps: Vec::new(),
        }
    }

    /// Loads a manifest, keeping whatever fields parse.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manifest = Self::new(path.clone());
        let payload = read_json(&path).unwrap_or(Value::Object(Map::new()));
        let Some(obj) = payload.as_object() else {
            return manifest;
        };

        manifest.schema_version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(manifest.schema_version);
        manifest.session_id = obj
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.session_id);
        manifest.created_at = obj
            .get("created_at")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.created_at);

        if let Some(steps) = obj.get("steps").and_then(Value::as_array) {
            for item in steps {
                if let Ok(parsed) = serde_json::from_value::<StepEntry>(item.clone()) {
                    manifest.steps.push(parsed);
                }
            }
        }
        manifest
    }

    pub fn add_step(&mut self, record: StepRecord, parent_step_id: Option<String>) -> StepEntry {
        let prev_prompt = self
            .get_step(parent_step_id.as_deref())
            .and_then(|entry| entry.prompt.clone());
        let prompt_diff = match (prev_prompt.as_deref(), record.prompt.as_deref()) {
            (Some(prev), Some(curr)) => Some(prompt_diff(prev, curr)),
            _ => None,
        };
        let step = StepEntry {
            step_id: self.next_step_id(),
            parent_step_id,
            source: record.source,
            prompt: record.prompt,
            prompt_diff,
            settings: record.settings,
            image_file: record.image_file,
            image_sha256: record.image_sha256,
            created_at: now_utc_iso(),
        };
        self.steps.push(step.clone());
        step
    }

    pub fn get_step(&self, step_id: Option<&str>) -> Option<&StepEntry> {
        let id = step_id?;
        self.steps.iter().find(|entry| entry.step_id == id)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(self.schema_version.into()),
        );
        payload.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        payload.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        payload.insert(
            "steps".to_string(),
            Value::Array(
                self.steps
                    .iter()
                    .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                    .collect(),
            ),
        );

        write_json(&self.path, Value::Object(payload))
    }

    fn next_step_id(&self) -> String {
        format!("s{}", self.steps.len() + 1)
    }
}

fn prompt_diff(prev: &str, curr: &str) -> Vec<String> {
    let diff = TextDiff::from_lines(prev, curr);
    diff.unified_diff()
        .header("parent", "step")
        .to_string()
        .lines()
        .map(str::to_string)
        .collect()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json(path: &Path, payload: Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{SessionManifest, StepRecord, StepSource};

    fn record(source: StepSource, prompt: Option<&str>, file: &str) -> StepRecord {
        StepRecord {
            source,
            prompt: prompt.map(str::to_string),
            settings: json!({"intensity": "standard"}),
            image_file: file.to_string(),
            image_sha256: "00".repeat(32),
        }
    }

    #[test]
    fn manifest_steps_roundtrip() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("session.json");
        let mut manifest = SessionManifest::new(&path);

        let upload = manifest.add_step(record(StepSource::Upload, None, "step-01.png"), None);
        let first = manifest.add_step(
            record(StepSource::Generation, Some("Be subtle."), "step-02.png"),
            Some(upload.step_id.clone()),
        );
        let second = manifest.add_step(
            record(StepSource::Variation, Some("Be bold."), "step-03.png"),
            Some(first.step_id.clone()),
        );
        assert!(first.prompt_diff.is_none());
        assert!(second.prompt_diff.is_some());
        manifest.save()?;

        let loaded = SessionManifest::load(&path);
        assert_eq!(loaded.session_id, manifest.session_id);
        assert_eq!(loaded.steps.len(), 3);
        assert_eq!(loaded.steps[0].source, StepSource::Upload);
        assert_eq!(loaded.steps[2].parent_step_id.as_deref(), Some("s2"));
        assert_eq!(loaded.steps[2].image_file, "step-03.png");
        let diff = loaded.steps[2].prompt_diff.clone().unwrap_or_default().join("\n");
        assert!(diff.contains("-Be subtle."));
        assert!(diff.contains("+Be bold."));
        Ok(())
    }

    #[test]
    fn missing_file_loads_empty_manifest() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let loaded = SessionManifest::load(tmp.path().join("absent.json"));
        assert!(loaded.steps.is_empty());
        assert_eq!(loaded.schema_version, 1);
        Ok(())
    }
}
