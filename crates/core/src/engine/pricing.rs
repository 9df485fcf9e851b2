use std::collections::BTreeMap;

use crate::domain::magnet::{PriceEntry, PriceSelector, PriceTableDefinition, PriceTableMode};
use crate::engine::store::ValueStore;
use crate::errors::{DefinitionIssue, EngineError};

/// Selector passed to [`PriceResolver::get_price`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PriceQuery<'a> {
    Key(&'a str),
    Quantity(f64),
}

impl PriceQuery<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Key(_) => "key",
            Self::Quantity(_) => "quantity",
        }
    }
}

/// Half-open tier `[start, end)`; `end: None` is unbounded.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceTier {
    pub start: f64,
    pub end: Option<f64>,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PriceTable {
    Keyed(BTreeMap<String, f64>),
    Tiered(Vec<PriceTier>),
}

impl PriceTable {
    pub fn mode(&self) -> PriceTableMode {
        match self {
            Self::Keyed(_) => PriceTableMode::Keyed,
            Self::Tiered(_) => PriceTableMode::Tiered,
        }
    }

    /// Validates a declared table. Keyed tables need unique keys; tiered tables need sorted,
    /// contiguous, non-empty ranges where only the last tier may be open-ended.
    pub fn compile(
        definition: &PriceTableDefinition,
        location: &str,
    ) -> Result<Self, Vec<DefinitionIssue>> {
        let mut issues = Vec::new();
        if definition.entries.is_empty() {
            issues.push(DefinitionIssue::new(
                "EMPTY_PRICE_TABLE",
                format!("{location}.entries"),
                format!("price table `{}` has no entries", definition.id),
            ));
            return Err(issues);
        }

        let table = match definition.mode {
            PriceTableMode::Keyed => {
                let mut entries = BTreeMap::new();
                for (index, entry) in definition.entries.iter().enumerate() {
                    let entry_location = format!("{location}.entries[{index}]");
                    match entry {
                        PriceEntry::Keyed { key, value } => {
                            if !value.is_finite() {
                                issues.push(non_finite_price(&entry_location));
                            }
                            if entries.insert(key.clone(), *value).is_some() {
                                issues.push(DefinitionIssue::new(
                                    "DUPLICATE_PRICE_KEY",
                                    entry_location,
                                    format!("key `{key}` appears more than once"),
                                ));
                            }
                        }
                        PriceEntry::Tiered { .. } => {
                            issues.push(mixed_entry(&entry_location, PriceTableMode::Keyed))
                        }
                    }
                }
                Self::Keyed(entries)
            }
            PriceTableMode::Tiered => {
                let mut tiers: Vec<PriceTier> = Vec::new();
                for (index, entry) in definition.entries.iter().enumerate() {
                    let entry_location = format!("{location}.entries[{index}]");
                    let PriceEntry::Tiered { range_start, range_end, value } = entry else {
                        issues.push(mixed_entry(&entry_location, PriceTableMode::Tiered));
                        continue;
                    };
                    if !value.is_finite() {
                        issues.push(non_finite_price(&entry_location));
                    }
                    if let Some(end) = range_end {
                        if !(end > range_start) {
                            issues.push(DefinitionIssue::new(
                                "EMPTY_PRICE_TIER",
                                entry_location.clone(),
                                format!("range_end {end} must be greater than range_start {range_start}"),
                            ));
                        }
                    }
                    if let Some(previous) = tiers.last() {
                        match previous.end {
                            None => issues.push(DefinitionIssue::new(
                                "OPEN_TIER_NOT_LAST",
                                entry_location.clone(),
                                "only the last tier may omit range_end",
                            )),
                            Some(previous_end) if previous_end != *range_start => {
                                issues.push(DefinitionIssue::new(
                                    "NON_CONTIGUOUS_TIERS",
                                    entry_location.clone(),
                                    format!(
                                        "tier starts at {range_start} but the previous tier ends at {previous_end}"
                                    ),
                                ))
                            }
                            Some(_) => {}
                        }
                    }
                    tiers.push(PriceTier { start: *range_start, end: *range_end, value: *value });
                }
                Self::Tiered(tiers)
            }
        };

        if issues.is_empty() {
            Ok(table)
        } else {
            Err(issues)
        }
    }

    fn lookup(&self, table_id: &str, query: PriceQuery<'_>) -> Result<f64, EngineError> {
        match (self, query) {
            (Self::Keyed(entries), PriceQuery::Key(key)) => {
                entries.get(key).copied().ok_or_else(|| EngineError::PriceKeyNotFound {
                    table: table_id.to_string(),
                    key: key.to_string(),
                })
            }
            (Self::Tiered(tiers), PriceQuery::Quantity(quantity)) => {
                if quantity.is_nan() {
                    return Err(EngineError::NotANumber(format!("{table_id} quantity")));
                }
                // Tiers are contiguous, so the last tier starting at or below the quantity holds
                // it. Quantities outside the declared ranges clamp to the first or last tier.
                let index = tiers.partition_point(|tier| tier.start <= quantity);
                tiers
                    .get(index.saturating_sub(1))
                    .map(|tier| tier.value)
                    .ok_or_else(|| EngineError::NotANumber(format!("{table_id} has no tiers")))
            }
            (table, query) => Err(EngineError::PriceSelectorMismatch {
                table: table_id.to_string(),
                mode: table.mode().as_str(),
                selector: query.kind(),
            }),
        }
    }
}

fn non_finite_price(location: &str) -> DefinitionIssue {
    DefinitionIssue::new("NON_FINITE_PRICE", location, "price value must be a finite number")
}

fn mixed_entry(location: &str, mode: PriceTableMode) -> DefinitionIssue {
    DefinitionIssue::new(
        "MIXED_PRICE_TABLE",
        location,
        format!("entry shape does not match the table's `{}` mode", mode.as_str()),
    )
}

/// Read-only access to the price tables of one lead magnet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PriceResolver {
    tables: BTreeMap<String, PriceTable>,
}

impl PriceResolver {
    pub fn new(tables: BTreeMap<String, PriceTable>) -> Self {
        Self { tables }
    }

    pub fn table(&self, table_id: &str) -> Option<&PriceTable> {
        self.tables.get(table_id)
    }

    /// Keys look up exact entries; quantities look up the tier whose `[start, end)` holds them.
    /// Never multiplies: `tier price * quantity` is the caller's formula.
    pub fn get_price(&self, table_id: &str, query: PriceQuery<'_>) -> Result<f64, EngineError> {
        self.tables
            .get(table_id)
            .ok_or_else(|| EngineError::UnknownPriceTable(table_id.to_string()))?
            .lookup(table_id, query)
    }

    /// Resolves a declared selector: keys directly, variables through their numeric value.
    pub fn resolve(
        &self,
        table_id: &str,
        selector: &PriceSelector,
        store: &ValueStore,
    ) -> Result<f64, EngineError> {
        match selector {
            PriceSelector::Key(key) => self.get_price(table_id, PriceQuery::Key(key)),
            PriceSelector::Variable(name) => {
                self.get_price(table_id, PriceQuery::Quantity(store.number(name)?))
            }
        }
    }

    /// Checks that a selector can ever succeed against the table: the table exists and its mode
    /// matches the selector kind.
    pub fn check_selector(&self, table_id: &str, selector: &PriceSelector) -> Result<(), EngineError> {
        let table = self
            .tables
            .get(table_id)
            .ok_or_else(|| EngineError::UnknownPriceTable(table_id.to_string()))?;
        let (expected, kind) = match selector {
            PriceSelector::Key(_) => (PriceTableMode::Keyed, "key"),
            PriceSelector::Variable(_) => (PriceTableMode::Tiered, "quantity"),
        };
        if table.mode() == expected {
            Ok(())
        } else {
            Err(EngineError::PriceSelectorMismatch {
                table: table_id.to_string(),
                mode: table.mode().as_str(),
                selector: kind,
            })
        }
    }
}
