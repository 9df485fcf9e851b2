use serde::{Deserialize, Serialize};

use crate::domain::value::Value;

/// Persisted lead-magnet configuration as the builder stores it.
///
/// This is the raw, unvalidated shape. `LeadMagnet::compile` turns it into the immutable,
/// validated form the engine evaluates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MagnetDefinition {
    pub id: String,
    #[serde(default)]
    pub price_tables: Vec<PriceTableDefinition>,
    #[serde(default)]
    pub prices: Vec<PriceBinding>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub calculations: Vec<Calculation>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl MagnetDefinition {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceTableMode {
    Keyed,
    Tiered,
}

impl PriceTableMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyed => "keyed",
            Self::Tiered => "tiered",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceTableDefinition {
    pub id: String,
    pub mode: PriceTableMode,
    #[serde(default)]
    pub entries: Vec<PriceEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceEntry {
    Keyed {
        key: String,
        value: f64,
    },
    /// `range_end: None` is an open-ended tier.
    Tiered {
        range_start: f64,
        range_end: Option<f64>,
        value: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSelector {
    /// Exact lookup in a keyed table.
    Key(String),
    /// Tiered lookup on the numeric value of a store variable.
    Variable(String),
}

/// Writes a looked-up price into the value store before calculations run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBinding {
    pub variable: String,
    pub table: String,
    pub selector: PriceSelector,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub when: String,
    pub then: Vec<Assignment>,
    #[serde(default)]
    pub otherwise: Vec<Assignment>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignment {
    Set { variable: String, value: Literal },
    Copy { variable: String, from: String },
    Formula { variable: String, expression: String },
    Price { variable: String, table: String, selector: PriceSelector },
}

impl Assignment {
    pub fn variable(&self) -> &str {
        match self {
            Self::Set { variable, .. }
            | Self::Copy { variable, .. }
            | Self::Formula { variable, .. }
            | Self::Price { variable, .. } => variable,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl From<Literal> for Value {
    fn from(value: Literal) -> Self {
        match value {
            Literal::Number(number) => Value::Number(number),
            Literal::Bool(flag) => Value::Bool(flag),
            Literal::Text(text) => Value::Text(text),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    pub id: String,
    pub formula: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Calculation {
    pub fn new(id: impl Into<String>, formula: impl Into<String>) -> Self {
        Self { id: id.into(), formula: formula.into(), label: None, depends_on: Vec::new() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl Output {
    pub fn new(id: impl Into<String>, label: impl Into<String>, format: OutputFormat) -> Self {
        Self { id: id.into(), label: label.into(), format, placeholder: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum OutputFormat {
    Currency,
    Percentage {
        /// The stored value is a fraction (0.25) and is scaled by 100 for display.
        #[serde(default)]
        ratio: bool,
        #[serde(default)]
        decimals: Option<u32>,
    },
    Number {
        #[serde(default)]
        decimals: Option<u32>,
    },
    Text,
}
