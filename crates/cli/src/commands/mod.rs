pub mod config;
pub mod evaluate;
pub mod order;
pub mod validate;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use leadforge_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use leadforge_core::{ApplicationError, LeadMagnet, MagnetDefinition, Value, ValueStore};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome<T: Serialize> {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<T>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None::<()>)
    }

    pub fn success_with<T: Serialize>(
        command: &str,
        message: impl Into<String>,
        details: Option<T>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn text(output: impl Into<String>) -> Self {
        Self { exit_code: 0, output: output.into() }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::failure_with(command, error_class, message, exit_code, None::<()>)
    }

    pub fn failure_with<T: Serialize>(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
        details: Option<T>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_error(command: &str, error: &ApplicationError) -> Self {
        match error {
            ApplicationError::Definition(definition) => Self::failure_with(
                command,
                error.error_class(),
                error.to_string(),
                error.exit_code(),
                Some(&definition.issues),
            ),
            _ => Self::failure(command, error.error_class(), error.to_string(), error.exit_code()),
        }
    }
}

fn serialize_payload<T: Serialize>(payload: CommandOutcome<T>) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Settings every command shares.
#[derive(Clone, Debug, Default)]
pub struct CommandContext {
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

impl CommandContext {
    pub fn load_config(&self) -> Result<AppConfig, ApplicationError> {
        AppConfig::load(LoadOptions {
            config_path: self.config_path.clone(),
            require_file: self.config_path.is_some(),
            overrides: self.overrides.clone(),
        })
        .map_err(ApplicationError::from)
    }
}

pub fn read_definition(path: &Path) -> anyhow::Result<MagnetDefinition> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read definition `{}`", path.display()))?;
    MagnetDefinition::from_json(&raw)
        .with_context(|| format!("could not parse definition `{}`", path.display()))
}

/// Reads and compiles a definition. Unreadable files count as definition failures.
pub fn load_magnet(path: &Path, config: &AppConfig) -> Result<LeadMagnet, ApplicationError> {
    let definition = read_definition(path).map_err(|error| {
        ApplicationError::Definition(leadforge_core::DefinitionError {
            magnet_id: path.display().to_string(),
            issues: vec![leadforge_core::DefinitionIssue::new(
                "UNREADABLE_DEFINITION",
                path.display().to_string(),
                format!("{error:#}"),
            )],
        })
    })?;
    Ok(LeadMagnet::compile_with(definition, config.engine.compile_options())?)
}

/// Reads a flat JSON object of answers. Numbers, strings and booleans map onto store values;
/// anything else is rejected rather than guessed at.
pub fn read_answers(path: &Path) -> anyhow::Result<ValueStore> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read answers `{}`", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("could not parse answers `{}`", path.display()))?;
    answers_from_json(document)
}

pub fn answers_from_json(document: serde_json::Value) -> anyhow::Result<ValueStore> {
    let serde_json::Value::Object(fields) = document else {
        bail!("answers must be a JSON object of field name to value");
    };

    let mut store = ValueStore::new();
    for (name, value) in fields {
        let value = match value {
            serde_json::Value::Number(number) => match number.as_f64() {
                Some(number) if number.is_finite() => Value::Number(number),
                _ => bail!("answer `{name}` is not a representable number"),
            },
            serde_json::Value::String(text) => Value::Text(text),
            serde_json::Value::Bool(flag) => Value::Bool(flag),
            serde_json::Value::Null => bail!("answer `{name}` is null; omit unanswered fields"),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                bail!("answer `{name}` must be a number, string or boolean")
            }
        };
        store.set(name, value);
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{answers_from_json, CommandResult};
    use leadforge_core::{ApplicationError, DefinitionError, DefinitionIssue, Value};

    #[test]
    fn answers_map_scalar_json_values() {
        let store = answers_from_json(json!({"seats": 5, "plan": "pro", "vip": true}))
            .expect("scalars are accepted");

        assert_eq!(store.get("seats"), Some(&Value::Number(5.0)));
        assert_eq!(store.get("plan"), Some(&Value::from("pro")));
        assert_eq!(store.get("vip"), Some(&Value::Bool(true)));
    }

    #[test]
    fn answers_reject_null_and_nested_values() {
        for document in [json!({"seats": null}), json!({"seats": [1]}), json!({"a": {"b": 1}}), json!([1])]
        {
            assert!(answers_from_json(document).is_err());
        }
    }

    #[test]
    fn definition_failures_carry_issues() {
        let error = ApplicationError::Definition(DefinitionError {
            magnet_id: "broken".to_string(),
            issues: vec![DefinitionIssue::new("EMPTY_ID", "id", "lead magnet id must not be empty")],
        });
        let result = CommandResult::from_error("validate", &error);
        let payload: serde_json::Value =
            serde_json::from_str(&result.output).expect("payload should be JSON");

        assert_eq!(result.exit_code, 3);
        assert_eq!(payload["error_class"], "definition_invalid");
        assert_eq!(payload["details"][0]["code"], "EMPTY_ID");
    }

    #[test]
    fn input_failures_exit_with_four() {
        let result = CommandResult::from_error(
            "evaluate",
            &ApplicationError::Input("answers must be an object".to_string()),
        );
        assert_eq!(result.exit_code, 4);
        assert!(result.output.contains("\"input_invalid\""));
    }
}
