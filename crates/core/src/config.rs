use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::lead_magnet::{CompileOptions, DEFAULT_MAX_CALCULATIONS};
use crate::engine::output::{LocaleFormat, DEFAULT_PLACEHOLDER};

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["leadforge.toml", "config/leadforge.toml"];
const MAX_CALCULATIONS_LIMIT: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub locale: LocaleId,
    /// Replaces the locale's own currency symbol when set.
    pub currency_symbol: Option<String>,
    pub placeholder: String,
    pub max_calculations: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Deserializes through `FromStr`, so files accept the same spellings as env and CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum LocaleId {
    #[serde(rename = "de-DE")]
    DeDe,
    #[serde(rename = "en-US")]
    EnUs,
}

impl LocaleId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeDe => "de-DE",
            Self::EnUs => "en-US",
        }
    }

    pub fn format(self) -> LocaleFormat {
        match self {
            Self::DeDe => LocaleFormat::de_de(),
            Self::EnUs => LocaleFormat::en_us(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub locale: Option<LocaleId>,
    pub placeholder: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                locale: LocaleId::DeDe,
                currency_symbol: None,
                placeholder: DEFAULT_PLACEHOLDER.to_string(),
                max_calculations: DEFAULT_MAX_CALCULATIONS,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LocaleId {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "de-de" | "de" => Ok(Self::DeDe),
            "en-us" | "en" => Ok(Self::EnUs),
            other => Err(ConfigError::Validation(format!(
                "unsupported locale `{other}` (expected de-DE|en-US)"
            ))),
        }
    }
}

impl TryFrom<String> for LocaleId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl EngineConfig {
    pub fn number_locale(&self) -> LocaleFormat {
        let format = self.locale.format();
        match &self.currency_symbol {
            Some(symbol) => format.with_currency_symbol(symbol.clone()),
            None => format,
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions { max_calculations: self.max_calculations }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(engine) = patch.engine {
            if let Some(locale) = engine.locale {
                self.engine.locale = locale;
            }
            if let Some(currency_symbol) = engine.currency_symbol {
                self.engine.currency_symbol = Some(currency_symbol);
            }
            if let Some(placeholder) = engine.placeholder {
                self.engine.placeholder = placeholder;
            }
            if let Some(max_calculations) = engine.max_calculations {
                self.engine.max_calculations = max_calculations;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADFORGE_ENGINE_LOCALE") {
            self.engine.locale = value.parse()?;
        }
        if let Some(value) = read_env("LEADFORGE_ENGINE_CURRENCY_SYMBOL") {
            self.engine.currency_symbol = Some(value);
        }
        if let Some(value) = read_env("LEADFORGE_ENGINE_PLACEHOLDER") {
            self.engine.placeholder = value;
        }
        if let Some(value) = read_env("LEADFORGE_ENGINE_MAX_CALCULATIONS") {
            self.engine.max_calculations =
                parse_usize("LEADFORGE_ENGINE_MAX_CALCULATIONS", &value)?;
        }

        let log_level =
            read_env("LEADFORGE_LOGGING_LEVEL").or_else(|| read_env("LEADFORGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADFORGE_LOGGING_FORMAT").or_else(|| read_env("LEADFORGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(locale) = overrides.locale {
            self.engine.locale = locale;
        }
        if let Some(placeholder) = overrides.placeholder {
            self.engine.placeholder = placeholder;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.placeholder.trim().is_empty() {
        return Err(ConfigError::Validation(
            "engine.placeholder must not be empty; visitors would see a blank result".to_string(),
        ));
    }

    if let Some(symbol) = &engine.currency_symbol {
        if symbol.trim().is_empty() {
            return Err(ConfigError::Validation(
                "engine.currency_symbol must not be blank (remove it to use the locale default)"
                    .to_string(),
            ));
        }
    }

    if engine.max_calculations == 0 || engine.max_calculations > MAX_CALCULATIONS_LIMIT {
        return Err(ConfigError::Validation(format!(
            "engine.max_calculations must be in range 1..={MAX_CALCULATIONS_LIMIT}"
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    engine: Option<EnginePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    locale: Option<LocaleId>,
    currency_symbol: Option<String>,
    placeholder: Option<String>,
    max_calculations: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LocaleId, LogFormat};
    use crate::engine::output::NumberLocale;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const ENGINE_VARS: [&str; 8] = [
        "LEADFORGE_ENGINE_LOCALE",
        "LEADFORGE_ENGINE_CURRENCY_SYMBOL",
        "LEADFORGE_ENGINE_PLACEHOLDER",
        "LEADFORGE_ENGINE_MAX_CALCULATIONS",
        "LEADFORGE_LOGGING_LEVEL",
        "LEADFORGE_LOG_LEVEL",
        "LEADFORGE_LOGGING_FORMAT",
        "LEADFORGE_LOG_FORMAT",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        let config = AppConfig::default();
        config.validate().map_err(|err| format!("defaults should validate: {err}"))?;
        ensure(config.engine.locale == LocaleId::DeDe, "default locale should be de-DE")?;
        ensure(config.engine.placeholder == "—", "default placeholder should be an em dash")?;
        ensure(config.engine.max_calculations == 256, "default calculation limit should be 256")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        env::set_var("TEST_LEADFORGE_SYMBOL", "CHF");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadforge.toml");
            fs::write(
                &path,
                r#"
[engine]
locale = "de-DE"
currency_symbol = "${TEST_LEADFORGE_SYMBOL}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.engine.currency_symbol.as_deref() == Some("CHF"),
                "currency symbol should be interpolated from the environment",
            )?;
            ensure(
                config.engine.number_locale().format_currency(1000.0).as_deref()
                    == Some("1.000,00 CHF"),
                "locale should render with the overridden symbol",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_LEADFORGE_SYMBOL"]);
        result
    }

    #[test]
    fn file_locale_accepts_the_same_spellings_as_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let loose = dir.path().join("loose.toml");
        fs::write(&loose, "[engine]\nlocale = \"en_us\"\n").map_err(|err| err.to_string())?;
        let config =
            AppConfig::load(LoadOptions { config_path: Some(loose), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;
        ensure(config.engine.locale == LocaleId::EnUs, "en_us should select en-US")?;

        let unknown = dir.path().join("unknown.toml");
        fs::write(&unknown, "[engine]\nlocale = \"fr-FR\"\n").map_err(|err| err.to_string())?;
        let error = match AppConfig::load(LoadOptions {
            config_path: Some(unknown),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("unsupported locale should be rejected".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::ParseFile { .. })
                && error.to_string().contains("unsupported locale"),
            "file error should name the unsupported locale",
        )
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);
        clear_vars(&["TEST_LEADFORGE_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("leadforge.toml");
        fs::write(&path, "[engine]\nplaceholder = \"${TEST_LEADFORGE_UNSET}\"\n")
            .map_err(|err| err.to_string())?;

        let error = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .err()
            .ok_or_else(|| "expected interpolation failure".to_string())?;
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_LEADFORGE_UNSET"),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        env::set_var("LEADFORGE_LOG_LEVEL", "warn");
        env::set_var("LEADFORGE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADFORGE_LOG_LEVEL", "LEADFORGE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        env::set_var("LEADFORGE_ENGINE_PLACEHOLDER", "n/a");
        env::set_var("LEADFORGE_ENGINE_MAX_CALCULATIONS", "64");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadforge.toml");
            fs::write(
                &path,
                r#"
[engine]
locale = "en-US"
placeholder = "-"
max_calculations = 32

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    locale: Some(LocaleId::DeDe),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.engine.locale == LocaleId::DeDe, "override locale should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.engine.placeholder == "n/a", "env placeholder should win over file")?;
            ensure(config.engine.max_calculations == 64, "env limit should win over file")?;
            ensure(
                config.engine.compile_options().max_calculations == 64,
                "compile options should carry the limit",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADFORGE_ENGINE_PLACEHOLDER", "LEADFORGE_ENGINE_MAX_CALCULATIONS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        env::set_var("LEADFORGE_ENGINE_MAX_CALCULATIONS", "100000");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("engine.max_calculations")
            );
            ensure(has_message, "validation failure should mention engine.max_calculations")
        })();

        clear_vars(&["LEADFORGE_ENGINE_MAX_CALCULATIONS"]);
        result
    }

    #[test]
    fn invalid_env_values_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        env::set_var("LEADFORGE_ENGINE_MAX_CALCULATIONS", "many");
        let numeric = AppConfig::load(LoadOptions::default());
        clear_vars(&["LEADFORGE_ENGINE_MAX_CALCULATIONS"]);

        env::set_var("LEADFORGE_ENGINE_LOCALE", "fr-FR");
        let locale = AppConfig::load(LoadOptions::default());
        clear_vars(&["LEADFORGE_ENGINE_LOCALE"]);

        ensure(
            matches!(numeric, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "LEADFORGE_ENGINE_MAX_CALCULATIONS"),
            "non-numeric limit should be an invalid override",
        )?;
        ensure(
            matches!(locale, Err(ConfigError::Validation(ref message)) if message.contains("fr-fr")),
            "unknown locale should be rejected",
        )
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&ENGINE_VARS);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(ref missing)) if missing == &path),
            "missing required file should be reported with its path",
        )
    }

    #[test]
    fn locale_ids_parse_loosely() -> Result<(), String> {
        ensure("en_US".parse::<LocaleId>().ok() == Some(LocaleId::EnUs), "underscore form")?;
        ensure(" de ".parse::<LocaleId>().ok() == Some(LocaleId::DeDe), "language-only form")?;
        ensure(LocaleId::EnUs.as_str() == "en-US", "canonical form")
    }
}
