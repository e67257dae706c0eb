use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;

/// Key variables in lookup order. Duplicates are dropped, order kept.
const API_KEY_VARS: &[&str] = &[
    "API_KEY_1",
    "API_KEY_2",
    "API_KEY_3",
    "API_KEY_4",
    "API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
];

/// Settings for the remote editor, resolved from the environment.
#[derive(Clone, PartialEq)]
pub struct EditorConfig {
    pub api_base: String,
    pub model: String,
    pub api_keys: Vec<String>,
    pub access_token: Option<String>,
    pub request_timeout_s: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            api_keys: Vec::new(),
            access_token: None,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl fmt::Debug for EditorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorConfig")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_keys", &self.api_keys.len())
            .field("access_token", &self.access_token.is_some())
            .field("request_timeout_s", &self.request_timeout_s)
            .finish()
    }
}

impl EditorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Process environment first, then the `.env` file.
    pub fn from_env_with_dotenv(path: &Path) -> Self {
        let file_vars = parse_dotenv(path);
        Self::from_lookup(|key| {
            env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut api_keys: Vec<String> = Vec::new();
        for var in API_KEY_VARS {
            if let Some(key) = non_empty(var) {
                if !api_keys.contains(&key) {
                    api_keys.push(key);
                }
            }
        }

        let defaults = Self::default();
        Self {
            api_base: non_empty("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            model: non_empty("STUDIO_IMAGE_MODEL").unwrap_or(defaults.model),
            api_keys,
            access_token: non_empty("STUDIO_ACCESS_TOKEN"),
            request_timeout_s: non_empty("STUDIO_REQUEST_TIMEOUT")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .map(|value| value.clamp(15.0, 300.0))
                .unwrap_or(defaults.request_timeout_s),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_keys.is_empty() || self.access_token.is_some()
    }
}

pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    parse_dotenv_str(&content)
}

pub fn parse_dotenv_str(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}
