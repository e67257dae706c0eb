use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Request side of a generation group, without image payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub token: u64,
    pub editor: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub count: usize,
    pub source_sha256: String,
    pub reference_sha256: Option<String>,
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Committed { cursor: usize },
    Ready { count: usize },
    Failed { cause: String },
    Stale,
}

pub fn build_receipt(
    request: &GenerationRequest,
    outcome: &GenerationOutcome,
    elapsed_s: f64,
    warnings: &[String],
    extra: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&serde_json::to_value(request).unwrap_or(Value::Null)),
    );
    root.insert(
        "outcome".to_string(),
        serde_json::to_value(outcome).unwrap_or(Value::Null),
    );
    root.insert(
        "elapsed_s".to_string(),
        serde_json::Number::from_f64(elapsed_s)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    );
    root.insert(
        "warnings".to_string(),
        Value::Array(warnings.iter().cloned().map(Value::String).collect()),
    );
    root.insert(
        "extra".to_string(),
        sanitize_payload(&Value::Object(extra.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Replaces inline image payloads so receipts stay small.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data" | "inline_data" | "inlinedata"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        build_receipt, write_receipt, GenerationOutcome, GenerationRequest,
        RECEIPT_SCHEMA_VERSION,
    };

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let receipt_path = temp.path().join("receipts").join("receipt-1.json");

        let request = GenerationRequest {
            token: 1,
            editor: "dryrun".to_string(),
            prompt: "Edit this image.".to_string(),
            aspect_ratio: "16:9".to_string(),
            count: 2,
            source_sha256: "ab".repeat(32),
            reference_sha256: None,
            settings: json!({"intensity": "gentle"}),
        };
        let mut extra = Map::new();
        extra.insert(
            "parts".to_string(),
            json!([{"inlineData": {"data": "AAAA"}}, {"text": "hi"}]),
        );
        let payload = build_receipt(
            &request,
            &GenerationOutcome::Ready { count: 2 },
            0.25,
            &["note".to_string()],
            &extra,
        );
        write_receipt(&receipt_path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&receipt_path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["aspect_ratio"], json!("16:9"));
        assert_eq!(parsed["outcome"], json!({"status": "ready", "count": 2}));
        assert_eq!(parsed["warnings"], json!(["note"]));
        assert_eq!(parsed["extra"]["parts"][0]["inlineData"], json!("<omitted>"));
        assert_eq!(parsed["extra"]["parts"][1]["text"], json!("hi"));
        Ok(())
    }

    #[test]
    fn failed_outcome_keeps_cause() {
        let outcome = GenerationOutcome::Failed {
            cause: "No image generated in the response.".to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap_or(Value::Null);
        assert_eq!(value["status"], json!("failed"));
        assert_eq!(value["cause"], json!("No image generated in the response."));
    }
}
