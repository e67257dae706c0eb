use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgba};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use studio_contracts::{AspectRatio, ImageBuffer};

use crate::config::EditorConfig;

pub const SYSTEM_INSTRUCTION: &str = "You are a professional photo editor. Your task is to modify the input image according to the user's prompt. Return ONLY the modified image. Maintain high quality and realistic lighting.";
pub const NO_IMAGE_MESSAGE: &str = "No image generated in the response.";

/// One image-edit call.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub source_image: ImageBuffer,
    pub reference_image: Option<ImageBuffer>,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
}

pub trait ImageEditor: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, request: &EditRequest) -> Result<ImageBuffer>;
}

#[derive(Default)]
pub struct ImageEditorRegistry {
    editors: BTreeMap<String, Arc<dyn ImageEditor>>,
}

impl ImageEditorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: ImageEditor + 'static>(&mut self, editor: E) {
        self.editors
            .insert(editor.name().to_string(), Arc::new(editor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageEditor>> {
        self.editors.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.editors.keys().cloned().collect()
    }
}

pub fn default_editor_registry(config: &EditorConfig) -> Result<ImageEditorRegistry> {
    let mut registry = ImageEditorRegistry::new();
    registry.register(DryrunEditor::new());
    registry.register(GeminiEditor::new(config.clone())?);
    Ok(registry)
}

/// Offline editor: returns the source tinted by a colour derived from the
/// prompt and a per-call counter, so every variation differs.
#[derive(Debug, Default)]
pub struct DryrunEditor {
    calls: AtomicU64,
}

impl DryrunEditor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageEditor for DryrunEditor {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, request: &EditRequest) -> Result<ImageBuffer> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut canvas = image::load_from_memory(request.source_image.bytes())
            .context("dryrun editor could not decode the source image")?
            .to_rgba8();
        let (r, g, b) = tint_from_prompt(&request.prompt, call);
        for pixel in canvas.pixels_mut() {
            let Rgba([pr, pg, pb, pa]) = *pixel;
            *pixel = Rgba([blend(pr, r), blend(pg, g), blend(pb, b), pa]);
        }

        let mut out = Cursor::new(Vec::new());
        canvas
            .write_to(&mut out, ImageFormat::Png)
            .context("dryrun editor failed to encode PNG")?;
        Ok(ImageBuffer::new(out.into_inner(), "image/png"))
    }
}

fn tint_from_prompt(prompt: &str, call: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(call.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn blend(base: u8, tint: u8) -> u8 {
    ((base as u16 * 3 + tint as u16) / 4) as u8
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Credential {
    ApiKey(String),
    Bearer(String),
}

/// `generateContent` against the Generative Language API. One request per
/// call; API keys rotate round-robin across calls.
pub struct GeminiEditor {
    config: EditorConfig,
    http: HttpClient,
    next_key: AtomicUsize,
}

impl GeminiEditor {
    pub fn new(config: EditorConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs_f64(config.request_timeout_s))
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            config,
            http,
            next_key: AtomicUsize::new(0),
        })
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.config.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn credential(&self) -> Option<Credential> {
        if !self.config.api_keys.is_empty() {
            let idx = self.next_key.fetch_add(1, Ordering::SeqCst) % self.config.api_keys.len();
            return Some(Credential::ApiKey(self.config.api_keys[idx].clone()));
        }
        self.config.access_token.clone().map(Credential::Bearer)
    }

    pub fn build_payload(request: &EditRequest) -> Value {
        let mut parts = vec![inline_part(&request.source_image)];
        if let Some(reference) = request.reference_image.as_ref() {
            parts.push(inline_part(reference));
        }
        parts.push(json!({ "text": request.prompt }));

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "systemInstruction": {
                "parts": [{ "text": SYSTEM_INSTRUCTION }],
            },
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio.as_str(),
                },
            },
        })
    }

    /// First inline image of the first candidate.
    pub fn extract_image(response_payload: &Value) -> Result<ImageBuffer> {
        let parts = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or("image/png");
            return Ok(ImageBuffer::new(bytes, mime_type));
        }

        bail!(NO_IMAGE_MESSAGE)
    }
}

impl ImageEditor for GeminiEditor {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(&self, request: &EditRequest) -> Result<ImageBuffer> {
        let Some(credential) = self.credential() else {
            bail!("no API key available: set API_KEY_1..API_KEY_4, API_KEY, GEMINI_API_KEY or STUDIO_ACCESS_TOKEN");
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request);

        let mut call = self.http.post(&endpoint).json(&payload);
        call = match &credential {
            Credential::ApiKey(key) => call.query(&[("key", key.as_str())]),
            Credential::Bearer(token) => call.header(AUTHORIZATION, format!("Bearer {token}")),
        };
        let response = call
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::extract_image(&response_payload)
    }
}

fn inline_part(image: &ImageBuffer) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type(),
            "data": image.to_base64(),
        }
    })
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
