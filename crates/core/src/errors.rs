use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("price table `{table}` has no entry for key `{key}`")]
    PriceKeyNotFound { table: String, key: String },
    #[error("price table `{0}` is not declared")]
    UnknownPriceTable(String),
    #[error("price table `{table}` is {mode} and cannot be queried by {selector}")]
    PriceSelectorMismatch { table: String, mode: &'static str, selector: &'static str },
    #[error("variable `{0}` is not set")]
    MissingVariable(String),
    #[error("variable `{name}` holds a {found} value where a number is required")]
    NonNumericVariable { name: String, found: &'static str },
    #[error("variable `{0}` is not a number")]
    NotANumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic produced a non-finite result")]
    NonFiniteResult,
    #[error("cyclic dependency between calculations: {}", .ids.join(" -> "))]
    CyclicDependency { ids: Vec<String> },
    #[error("calculation `{calculation}` depends on unknown calculation `{dependency}`")]
    UnknownDependency { calculation: String, dependency: String },
    #[error("invalid expression `{expression}` at position {position}: {message}")]
    InvalidExpressionSyntax { expression: String, position: usize, message: String },
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

impl EngineError {
    /// Errors that can only come from a broken lead-magnet definition. They belong on the
    /// builder surface; everything else degrades to a placeholder for the visitor.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::UnknownDependency { .. }
                | Self::InvalidExpressionSyntax { .. }
                | Self::UnknownPriceTable(_)
                | Self::PriceSelectorMismatch { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PriceKeyNotFound { .. } => "PRICE_KEY_NOT_FOUND",
            Self::UnknownPriceTable(_) => "UNKNOWN_PRICE_TABLE",
            Self::PriceSelectorMismatch { .. } => "PRICE_SELECTOR_MISMATCH",
            Self::MissingVariable(_) => "MISSING_VARIABLE",
            Self::NonNumericVariable { .. } => "NON_NUMERIC_VARIABLE",
            Self::NotANumber(_) => "NOT_A_NUMBER",
            Self::DivisionByZero => "DIVISION_BY_ZERO",
            Self::NonFiniteResult => "NON_FINITE_RESULT",
            Self::CyclicDependency { .. } => "CYCLIC_DEPENDENCY",
            Self::UnknownDependency { .. } => "UNKNOWN_DEPENDENCY",
            Self::InvalidExpressionSyntax { .. } => "INVALID_EXPRESSION_SYNTAX",
            Self::TypeMismatch(_) => "TYPE_MISMATCH",
        }
    }
}

/// One problem found while compiling a lead-magnet definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DefinitionIssue {
    pub code: String,
    /// Path into the definition document, e.g. `calculations[2].formula`.
    pub location: String,
    pub message: String,
}

impl DefinitionIssue {
    pub fn new(code: &str, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), location: location.into(), message: message.into() }
    }

    pub fn from_engine(location: impl Into<String>, error: &EngineError) -> Self {
        Self::new(error.code(), location, error.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("lead magnet `{magnet_id}` has {} invalid declaration(s); first: {}", .issues.len(), first_issue(.issues))]
pub struct DefinitionError {
    pub magnet_id: String,
    pub issues: Vec<DefinitionIssue>,
}

fn first_issue(issues: &[DefinitionIssue]) -> String {
    issues
        .first()
        .map(|issue| format!("{}: {}", issue.location, issue.message))
        .unwrap_or_else(|| "none".to_string())
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApplicationError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("invalid input: {0}")]
    Input(String),
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Engine(error) if error.is_configuration_error() => "definition_invalid",
            Self::Engine(_) => "evaluation_failed",
            Self::Definition(_) => "definition_invalid",
            Self::Configuration(_) => "config_validation",
            Self::Input(_) => "input_invalid",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::Definition(_) => 3,
            Self::Engine(error) if error.is_configuration_error() => 3,
            Self::Engine(_) | Self::Input(_) => 4,
        }
    }
}
