use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::domain::magnet::{Output, OutputFormat};
use crate::domain::value::Value;
use crate::engine::store::ValueStore;

pub const DEFAULT_PLACEHOLDER: &str = "—";
const CURRENCY_DECIMALS: u32 = 2;
const MAX_DECIMALS: u32 = 10;

/// Renders already-rounded figures for one locale. Returns `None` when the value cannot be
/// represented, which the formatter turns into the placeholder.
pub trait NumberLocale: Send + Sync {
    fn format_number(&self, value: f64, decimals: u32) -> Option<String>;
    fn format_currency(&self, value: f64) -> Option<String>;
    fn format_percentage(&self, value: f64, decimals: u32) -> Option<String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolPosition {
    Prefix,
    Suffix,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocaleFormat {
    pub decimal_separator: char,
    pub thousands_separator: char,
    pub currency_symbol: String,
    pub symbol_position: SymbolPosition,
    /// Space between amount and currency symbol.
    pub symbol_spacing: bool,
    /// Space between amount and `%`.
    pub percent_spacing: bool,
}

impl LocaleFormat {
    /// `1.234,50 €`, `12,5 %`.
    pub fn de_de() -> Self {
        Self {
            decimal_separator: ',',
            thousands_separator: '.',
            currency_symbol: "€".to_string(),
            symbol_position: SymbolPosition::Suffix,
            symbol_spacing: true,
            percent_spacing: true,
        }
    }

    /// `$1,234.50`, `12.5%`.
    pub fn en_us() -> Self {
        Self {
            decimal_separator: '.',
            thousands_separator: ',',
            currency_symbol: "$".to_string(),
            symbol_position: SymbolPosition::Prefix,
            symbol_spacing: false,
            percent_spacing: false,
        }
    }

    pub fn with_currency_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.currency_symbol = symbol.into();
        self
    }

    fn digits(&self, value: f64, decimals: u32) -> Option<(bool, String)> {
        let rounded = round_half_away(value, decimals)?;
        let negative = rounded.is_sign_negative();
        let plain = rounded.abs().to_string();
        let (integer, fraction) = match plain.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (plain.as_str(), None),
        };

        let mut rendered = group_thousands(integer, self.thousands_separator);
        if let Some(fraction) = fraction {
            rendered.push(self.decimal_separator);
            rendered.push_str(fraction);
        }
        Some((negative, rendered))
    }
}

impl Default for LocaleFormat {
    fn default() -> Self {
        Self::de_de()
    }
}

impl NumberLocale for LocaleFormat {
    fn format_number(&self, value: f64, decimals: u32) -> Option<String> {
        let (negative, digits) = self.digits(value, decimals)?;
        Some(if negative { format!("-{digits}") } else { digits })
    }

    fn format_currency(&self, value: f64) -> Option<String> {
        let (negative, digits) = self.digits(value, CURRENCY_DECIMALS)?;
        let sign = if negative { "-" } else { "" };
        let space = if self.symbol_spacing { " " } else { "" };
        Some(match self.symbol_position {
            SymbolPosition::Prefix => format!("{sign}{}{space}{digits}", self.currency_symbol),
            SymbolPosition::Suffix => format!("{sign}{digits}{space}{}", self.currency_symbol),
        })
    }

    fn format_percentage(&self, value: f64, decimals: u32) -> Option<String> {
        let number = self.format_number(value, decimals)?;
        let space = if self.percent_spacing { " " } else { "" };
        Some(format!("{number}{space}%"))
    }
}

/// Rounds half away from zero to exactly `decimals` places. Negative zero collapses to zero so
/// `-0.004` never renders as `-0,00`.
///
/// Returns `None` for non-finite values and for magnitudes beyond `Decimal`'s range (about
/// 7.9e28), which then render as the placeholder.
pub fn round_half_away(value: f64, decimals: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    let decimals = decimals.min(MAX_DECIMALS);
    let mut rounded = Decimal::from_f64(value)?
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(decimals);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    Some(rounded)
}

fn group_thousands(integer: &str, separator: char) -> String {
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(digit);
    }
    grouped
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormattedOutput {
    pub id: String,
    pub label: String,
    pub value: String,
    pub raw: Value,
    /// The placeholder was rendered instead of a value.
    pub degraded: bool,
}

/// Turns store values into display strings. The only place in the engine that rounds.
pub struct OutputFormatter<'a> {
    locale: &'a dyn NumberLocale,
    placeholder: &'a str,
}

impl<'a> OutputFormatter<'a> {
    pub fn new(locale: &'a dyn NumberLocale) -> Self {
        Self { locale, placeholder: DEFAULT_PLACEHOLDER }
    }

    pub fn with_placeholder(mut self, placeholder: &'a str) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Missing, failed or wrongly typed values render the output's placeholder; this never fails.
    pub fn format(&self, output: &Output, store: &ValueStore) -> FormattedOutput {
        let raw = store.get(&output.id).cloned().unwrap_or(Value::NotANumber);
        let rendered = match (&output.format, &raw) {
            (OutputFormat::Text, Value::NotANumber) => None,
            (OutputFormat::Text, value) => Some(value.to_string()),
            (format, Value::Number(number)) => self.format_number(format, *number),
            _ => None,
        };

        let degraded = rendered.is_none();
        let value = rendered.unwrap_or_else(|| {
            output.placeholder.as_deref().unwrap_or(self.placeholder).to_string()
        });
        FormattedOutput {
            id: output.id.clone(),
            label: output.label.clone(),
            value,
            raw,
            degraded,
        }
    }

    pub fn format_all(&self, outputs: &[Output], store: &ValueStore) -> Vec<FormattedOutput> {
        outputs.iter().map(|output| self.format(output, store)).collect()
    }

    fn format_number(&self, format: &OutputFormat, number: f64) -> Option<String> {
        match format {
            OutputFormat::Currency => self.locale.format_currency(number),
            OutputFormat::Percentage { ratio, decimals } => {
                let scaled = if *ratio { number * 100.0 } else { number };
                self.locale.format_percentage(scaled, decimals.unwrap_or(0))
            }
            OutputFormat::Number { decimals } => {
                self.locale.format_number(number, decimals.unwrap_or(0))
            }
            OutputFormat::Text => Some(number.to_string()),
        }
    }
}
