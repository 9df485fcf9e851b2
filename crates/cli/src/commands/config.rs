use std::env;
use std::fs;
use std::path::Path;

use leadforge_core::config::{resolve_config_path, AppConfig};
use toml::Value;

use crate::commands::{CommandContext, CommandResult};

const COMMAND: &str = "config";

pub fn run(context: &CommandContext) -> CommandResult {
    let config = match context.load_config() {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error(COMMAND, &error),
    };
    CommandResult::text(render(&config, context.config_path.as_deref()))
}

pub fn render(config: &AppConfig, explicit_path: Option<&Path>) -> String {
    let config_file_path = resolve_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "engine.locale",
        config.engine.locale.as_str(),
        source("engine.locale", &["LEADFORGE_ENGINE_LOCALE"]),
    ));
    lines.push(render_line(
        "engine.currency_symbol",
        config
            .engine
            .currency_symbol
            .as_deref()
            .unwrap_or(&config.engine.number_locale().currency_symbol),
        source("engine.currency_symbol", &["LEADFORGE_ENGINE_CURRENCY_SYMBOL"]),
    ));
    lines.push(render_line(
        "engine.placeholder",
        &config.engine.placeholder,
        source("engine.placeholder", &["LEADFORGE_ENGINE_PLACEHOLDER"]),
    ));
    lines.push(render_line(
        "engine.max_calculations",
        &config.engine.max_calculations.to_string(),
        source("engine.max_calculations", &["LEADFORGE_ENGINE_MAX_CALCULATIONS"]),
    ));
    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["LEADFORGE_LOGGING_LEVEL", "LEADFORGE_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format).to_ascii_lowercase(),
        source("logging.format", &["LEADFORGE_LOGGING_FORMAT", "LEADFORGE_LOG_FORMAT"]),
    ));

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    for env_key in env_keys {
        let set = env::var(env_key).map(|value| !value.trim().is_empty()).unwrap_or(false);
        if set {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
