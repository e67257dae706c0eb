use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: String) -> Self {
        if !key.is_empty() {
            self.command_args.insert(key.to_string(), Value::String(value));
        }
        self
    }

    /// String argument stored under `key`, if non-empty.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Maps one line of session input to an action.
///
/// Slash commands resolve through the command registry; any other non-empty
/// text becomes custom instructions for an immediate generation.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        let mut intent = Intent::new("generate_with_instructions", text);
        intent.prompt = Some(raw_trimmed.to_string());
        return intent;
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return Intent::new("unknown", text);
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let remainder = slash_tail[command_len..].trim();

    if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
        return Intent::new(spec.action, text).with_arg(spec.arg, remainder.to_string());
    }
    if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
        return Intent::new(spec.action, text).with_arg(spec.arg, parse_single_path_arg(remainder));
    }
    if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
        return Intent::new(spec.action, text);
    }

    Intent::new("unknown", text).with_arg("command", command)
}
