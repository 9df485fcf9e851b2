use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::magnet::{MagnetDefinition, Output, OutputFormat, PriceBinding, PriceSelector};
use crate::engine::conditions::{Rule, RuleAssignment};
use crate::engine::expression::Expression;
use crate::engine::pricing::{PriceResolver, PriceTable};
use crate::engine::scheduler::{CalculationNode, DependencyScheduler};
use crate::errors::{DefinitionError, DefinitionIssue, EngineError};

pub const DEFAULT_MAX_CALCULATIONS: usize = 256;
const MAX_OUTPUT_DECIMALS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub max_calculations: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { max_calculations: DEFAULT_MAX_CALCULATIONS }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledCalculation {
    pub id: String,
    pub label: Option<String>,
    pub formula: Expression,
    pub depends_on: Vec<String>,
}

/// A validated, immutable lead magnet. Shared by reference across any number of evaluations.
#[derive(Clone, Debug, PartialEq)]
pub struct LeadMagnet {
    id: String,
    prices: PriceResolver,
    bindings: Vec<PriceBinding>,
    rules: Vec<Rule>,
    calculations: Vec<CompiledCalculation>,
    order: Vec<usize>,
    outputs: Vec<Output>,
}

impl LeadMagnet {
    pub fn compile(definition: MagnetDefinition) -> Result<Self, DefinitionError> {
        Self::compile_with(definition, CompileOptions::default())
    }

    /// Validates the whole definition and reports every problem at once.
    pub fn compile_with(
        definition: MagnetDefinition,
        options: CompileOptions,
    ) -> Result<Self, DefinitionError> {
        let mut issues = Vec::new();
        if definition.id.trim().is_empty() {
            issues.push(DefinitionIssue::new("EMPTY_ID", "id", "lead magnet id must not be empty"));
        }

        let (prices, declared_tables) = compile_price_tables(&definition, &mut issues);
        let calculations = compile_calculations(&definition, options, &mut issues);
        let calculation_ids: HashSet<&str> =
            definition.calculations.iter().map(|calculation| calculation.id.as_str()).collect();

        for (index, binding) in definition.prices.iter().enumerate() {
            let location = format!("prices[{index}]");
            if binding.variable.trim().is_empty() {
                issues.push(DefinitionIssue::new(
                    "EMPTY_VARIABLE_NAME",
                    format!("{location}.variable"),
                    "price binding target must not be empty",
                ));
            }
            check_price_source(
                &prices,
                &declared_tables,
                &binding.table,
                &binding.selector,
                &location,
                &mut issues,
            );
            if let PriceSelector::Variable(name) = &binding.selector {
                if calculation_ids.contains(name.as_str()) {
                    issues.push(DefinitionIssue::new(
                        "BINDING_READS_CALCULATION",
                        format!("{location}.selector"),
                        format!("price bindings run before calculations and cannot read `{name}`"),
                    ));
                }
            }
            check_not_shadowed(&binding.variable, &calculation_ids, &location, &mut issues);
        }

        let rules = compile_rules(&definition, &prices, &declared_tables, &calculation_ids, &mut issues);
        let order = schedule(&calculations, definition.calculations.len(), &mut issues);
        check_outputs(&definition.outputs, &mut issues);

        if !issues.is_empty() {
            return Err(DefinitionError { magnet_id: definition.id, issues });
        }

        Ok(Self {
            id: definition.id,
            prices,
            bindings: definition.prices,
            rules,
            calculations,
            order,
            outputs: definition.outputs,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn prices(&self) -> &PriceResolver {
        &self.prices
    }

    pub fn bindings(&self) -> &[PriceBinding] {
        &self.bindings
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Calculations in declaration order.
    pub fn calculations(&self) -> &[CompiledCalculation] {
        &self.calculations
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Calculation ids in the order they are evaluated.
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.order.iter().map(|&index| self.calculations[index].id.as_str()).collect()
    }

    pub fn calculation_nodes(&self) -> Vec<CalculationNode<'_>> {
        self.calculations
            .iter()
            .map(|calculation| CalculationNode {
                id: &calculation.id,
                depends_on: calculation.depends_on.iter().map(String::as_str).collect(),
                references: calculation.formula.references(),
            })
            .collect()
    }
}

fn compile_price_tables(
    definition: &MagnetDefinition,
    issues: &mut Vec<DefinitionIssue>,
) -> (PriceResolver, BTreeSet<String>) {
    let mut tables = BTreeMap::new();
    let mut declared = BTreeSet::new();
    for (index, table) in definition.price_tables.iter().enumerate() {
        let location = format!("price_tables[{index}]");
        if table.id.trim().is_empty() {
            issues.push(DefinitionIssue::new(
                "EMPTY_ID",
                format!("{location}.id"),
                "price table id must not be empty",
            ));
            continue;
        }
        if !declared.insert(table.id.clone()) {
            issues.push(DefinitionIssue::new(
                "DUPLICATE_PRICE_TABLE",
                format!("{location}.id"),
                format!("price table `{}` is declared more than once", table.id),
            ));
            continue;
        }
        match PriceTable::compile(table, &location) {
            Ok(compiled) => {
                tables.insert(table.id.clone(), compiled);
            }
            Err(table_issues) => issues.extend(table_issues),
        }
    }
    (PriceResolver::new(tables), declared)
}

fn compile_calculations(
    definition: &MagnetDefinition,
    options: CompileOptions,
    issues: &mut Vec<DefinitionIssue>,
) -> Vec<CompiledCalculation> {
    if definition.calculations.len() > options.max_calculations {
        issues.push(DefinitionIssue::new(
            "TOO_MANY_CALCULATIONS",
            "calculations",
            format!(
                "{} calculations declared, the limit is {}",
                definition.calculations.len(),
                options.max_calculations
            ),
        ));
    }

    let mut seen = HashSet::new();
    let mut compiled = Vec::with_capacity(definition.calculations.len());
    for (index, calculation) in definition.calculations.iter().enumerate() {
        let location = format!("calculations[{index}]");
        if calculation.id.trim().is_empty() {
            issues.push(DefinitionIssue::new(
                "EMPTY_ID",
                format!("{location}.id"),
                "calculation id must not be empty",
            ));
        } else if !seen.insert(calculation.id.as_str()) {
            issues.push(DefinitionIssue::new(
                "DUPLICATE_CALCULATION",
                format!("{location}.id"),
                format!("calculation `{}` is declared more than once", calculation.id),
            ));
        }

        match Expression::formula(&calculation.formula) {
            Ok(formula) => compiled.push(CompiledCalculation {
                id: calculation.id.clone(),
                label: calculation.label.clone(),
                formula,
                depends_on: calculation.depends_on.clone(),
            }),
            Err(error) => {
                issues.push(DefinitionIssue::from_engine(format!("{location}.formula"), &error))
            }
        }
    }
    compiled
}

fn compile_rules(
    definition: &MagnetDefinition,
    prices: &PriceResolver,
    declared_tables: &BTreeSet<String>,
    calculation_ids: &HashSet<&str>,
    issues: &mut Vec<DefinitionIssue>,
) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(definition.conditions.len());
    for (index, condition) in definition.conditions.iter().enumerate() {
        let location = format!("conditions[{index}]");
        let rule = match Rule::compile(condition, &location) {
            Ok(rule) => rule,
            Err(rule_issues) => {
                issues.extend(rule_issues);
                continue;
            }
        };

        for name in rule.when.references() {
            check_not_calculation(name, calculation_ids, &format!("{location}.when"), issues);
        }
        for (branch, assignments) in [("then", &rule.then), ("otherwise", &rule.otherwise)] {
            for (position, assignment) in assignments.iter().enumerate() {
                let assignment_location = format!("{location}.{branch}[{position}]");
                for name in assignment.reads() {
                    check_not_calculation(name, calculation_ids, &assignment_location, issues);
                }
                check_not_shadowed(
                    assignment.variable(),
                    calculation_ids,
                    &assignment_location,
                    issues,
                );
                if let RuleAssignment::Price { table, selector, .. } = assignment {
                    check_price_source(
                        prices,
                        declared_tables,
                        table,
                        selector,
                        &assignment_location,
                        issues,
                    );
                }
            }
        }
        rules.push(rule);
    }
    rules
}

fn check_price_source(
    prices: &PriceResolver,
    declared_tables: &BTreeSet<String>,
    table: &str,
    selector: &PriceSelector,
    location: &str,
    issues: &mut Vec<DefinitionIssue>,
) {
    if !declared_tables.contains(table) {
        let error = EngineError::UnknownPriceTable(table.to_string());
        issues.push(DefinitionIssue::from_engine(format!("{location}.table"), &error));
        return;
    }
    // A declared table that failed to compile already has its own issues.
    if prices.table(table).is_none() {
        return;
    }
    if let Err(error) = prices.check_selector(table, selector) {
        issues.push(DefinitionIssue::from_engine(format!("{location}.selector"), &error));
    }
}

fn check_not_calculation(
    name: &str,
    calculation_ids: &HashSet<&str>,
    location: &str,
    issues: &mut Vec<DefinitionIssue>,
) {
    if calculation_ids.contains(name) {
        issues.push(DefinitionIssue::new(
            "CONDITION_READS_CALCULATION",
            location,
            format!("conditions run before calculations and cannot read calculation `{name}`"),
        ));
    }
}

fn check_not_shadowed(
    variable: &str,
    calculation_ids: &HashSet<&str>,
    location: &str,
    issues: &mut Vec<DefinitionIssue>,
) {
    if calculation_ids.contains(variable) {
        issues.push(DefinitionIssue::new(
            "SHADOWED_BY_CALCULATION",
            format!("{location}.variable"),
            format!("`{variable}` is overwritten by the calculation with the same id"),
        ));
    }
}

fn schedule(
    calculations: &[CompiledCalculation],
    declared: usize,
    issues: &mut Vec<DefinitionIssue>,
) -> Vec<usize> {
    // Ordering is only meaningful once every formula parsed and every id is unique.
    let known = calculations.iter().map(|calculation| calculation.id.as_str()).collect::<HashSet<_>>();
    if calculations.len() != declared || known.len() != declared {
        return Vec::new();
    }

    let mut unknown = false;
    for (index, calculation) in calculations.iter().enumerate() {
        for dependency in &calculation.depends_on {
            if !known.contains(dependency.as_str()) {
                unknown = true;
                let error = EngineError::UnknownDependency {
                    calculation: calculation.id.clone(),
                    dependency: dependency.clone(),
                };
                issues.push(DefinitionIssue::from_engine(
                    format!("calculations[{index}].depends_on"),
                    &error,
                ));
            }
        }
    }
    if unknown {
        return Vec::new();
    }

    let nodes = calculations
        .iter()
        .map(|calculation| CalculationNode {
            id: &calculation.id,
            depends_on: calculation.depends_on.iter().map(String::as_str).collect(),
            references: calculation.formula.references(),
        })
        .collect::<Vec<_>>();
    match DependencyScheduler::new().order_nodes(&nodes) {
        Ok(order) => order,
        Err(error) => {
            issues.push(DefinitionIssue::from_engine("calculations", &error));
            Vec::new()
        }
    }
}

fn check_outputs(outputs: &[Output], issues: &mut Vec<DefinitionIssue>) {
    let mut seen = HashSet::new();
    for (index, output) in outputs.iter().enumerate() {
        let location = format!("outputs[{index}]");
        if output.id.trim().is_empty() {
            issues.push(DefinitionIssue::new(
                "EMPTY_ID",
                format!("{location}.id"),
                "output id must not be empty",
            ));
        } else if !seen.insert(output.id.as_str()) {
            issues.push(DefinitionIssue::new(
                "DUPLICATE_OUTPUT",
                format!("{location}.id"),
                format!("output `{}` is declared more than once", output.id),
            ));
        }
        if output.label.trim().is_empty() {
            issues.push(DefinitionIssue::new(
                "MISSING_LABEL",
                format!("{location}.label"),
                format!("output `{}` needs a label", output.id),
            ));
        }
        let decimals = match output.format {
            OutputFormat::Percentage { decimals, .. } | OutputFormat::Number { decimals } => decimals,
            OutputFormat::Currency | OutputFormat::Text => None,
        };
        if decimals.is_some_and(|decimals| decimals > MAX_OUTPUT_DECIMALS) {
            issues.push(DefinitionIssue::new(
                "DECIMALS_OUT_OF_RANGE",
                format!("{location}.decimals"),
                format!("decimals must be in range 0..={MAX_OUTPUT_DECIMALS}"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CompileOptions, LeadMagnet};
    use crate::domain::magnet::MagnetDefinition;

    fn definition(raw: &str) -> MagnetDefinition {
        MagnetDefinition::from_json(raw).expect("fixture should decode")
    }

    fn codes(raw: &str) -> Vec<String> {
        LeadMagnet::compile(definition(raw))
            .expect_err("definition should be rejected")
            .issues
            .into_iter()
            .map(|issue| issue.code)
            .collect()
    }

    #[test]
    fn compiles_valid_definition_with_dependency_order() {
        let magnet = LeadMagnet::compile(definition(
            r#"{
                "id": "vm-costs",
                "price_tables": [{"id": "vm", "mode": "tiered", "entries": [
                    {"range_start": 0, "range_end": 10, "value": 40},
                    {"range_start": 10, "range_end": null, "value": 30}
                ]}],
                "prices": [{"variable": "vmPrice", "table": "vm", "selector": {"variable": "servers"}}],
                "calculations": [
                    {"id": "yearly", "formula": "monthly * 12"},
                    {"id": "monthly", "formula": "vmPrice * servers"}
                ],
                "outputs": [{"id": "yearly", "label": "Per year", "format": "currency"}]
            }"#,
        ))
        .expect("definition is valid");

        assert_eq!(magnet.id(), "vm-costs");
        assert_eq!(magnet.evaluation_order(), vec!["monthly", "yearly"]);
        assert!(magnet.prices().table("vm").is_some());
    }

    #[test]
    fn collects_every_problem_in_one_pass() {
        let codes = codes(
            r#"{
                "id": "broken",
                "price_tables": [
                    {"id": "plans", "mode": "keyed", "entries": [{"key": "pro", "value": 20}]},
                    {"id": "plans", "mode": "keyed", "entries": [{"key": "basic", "value": 10}]}
                ],
                "prices": [{"variable": "x", "table": "missing", "selector": {"key": "pro"}}],
                "calculations": [
                    {"id": "total", "formula": "seats *"},
                    {"id": "total", "formula": "1"}
                ],
                "outputs": [{"id": "total", "label": " ", "format": "currency"}]
            }"#,
        );

        assert_eq!(
            codes,
            vec![
                "DUPLICATE_PRICE_TABLE",
                "INVALID_EXPRESSION_SYNTAX",
                "DUPLICATE_CALCULATION",
                "UNKNOWN_PRICE_TABLE",
                "MISSING_LABEL"
            ]
        );
    }

    #[test]
    fn reports_cycles_with_their_ids() {
        let error = LeadMagnet::compile(definition(
            r#"{"id": "loop", "calculations": [
                {"id": "A", "formula": "B"},
                {"id": "B", "formula": "A"}
            ]}"#,
        ))
        .expect_err("cycle must be rejected");

        assert_eq!(error.issues.len(), 1);
        assert_eq!(error.issues[0].code, "CYCLIC_DEPENDENCY");
        assert!(error.issues[0].message.contains("A -> B -> A"));
    }

    #[test]
    fn reports_every_unknown_dependency() {
        let codes = codes(
            r#"{"id": "deps", "calculations": [
                {"id": "a", "formula": "1", "depends_on": ["ghost"]},
                {"id": "b", "formula": "2", "depends_on": ["phantom"]}
            ]}"#,
        );
        assert_eq!(codes, vec!["UNKNOWN_DEPENDENCY", "UNKNOWN_DEPENDENCY"]);
    }

    #[test]
    fn conditions_may_not_read_or_write_calculations() {
        let error = LeadMagnet::compile(definition(
            r#"{
                "id": "layering",
                "conditions": [{
                    "when": "total > 100",
                    "then": [{"kind": "formula", "variable": "total", "expression": "total * 0.9"}]
                }],
                "calculations": [{"id": "total", "formula": "seats * 10"}]
            }"#,
        ))
        .expect_err("layering violation");

        let found = error
            .issues
            .iter()
            .map(|issue| (issue.code.as_str(), issue.location.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            found,
            vec![
                ("CONDITION_READS_CALCULATION", "conditions[0].when"),
                ("CONDITION_READS_CALCULATION", "conditions[0].then[0]"),
                ("SHADOWED_BY_CALCULATION", "conditions[0].then[0].variable"),
            ]
        );
    }

    #[test]
    fn selectors_must_match_the_table_mode() {
        let codes = codes(
            r#"{
                "id": "modes",
                "price_tables": [{"id": "plans", "mode": "keyed", "entries": [{"key": "pro", "value": 20}]}],
                "prices": [{"variable": "price", "table": "plans", "selector": {"variable": "seats"}}]
            }"#,
        );
        assert_eq!(codes, vec!["PRICE_SELECTOR_MISMATCH"]);
    }

    #[test]
    fn invalid_tables_do_not_cascade_into_binding_issues() {
        let codes = codes(
            r#"{
                "id": "tiers",
                "price_tables": [{"id": "seats", "mode": "tiered", "entries": [
                    {"range_start": 0, "range_end": 10, "value": 100},
                    {"range_start": 20, "range_end": null, "value": 60}
                ]}],
                "prices": [{"variable": "seatPrice", "table": "seats", "selector": {"variable": "seats"}}]
            }"#,
        );
        assert_eq!(codes, vec!["NON_CONTIGUOUS_TIERS"]);
    }

    #[test]
    fn enforces_calculation_limit() {
        let error = LeadMagnet::compile_with(
            definition(
                r#"{"id": "big", "calculations": [
                    {"id": "a", "formula": "1"},
                    {"id": "b", "formula": "2"},
                    {"id": "c", "formula": "3"}
                ]}"#,
            ),
            CompileOptions { max_calculations: 2 },
        )
        .expect_err("limit exceeded");

        assert_eq!(error.issues[0].code, "TOO_MANY_CALCULATIONS");
    }

    #[test]
    fn rejects_duplicate_outputs_and_excessive_decimals() {
        let codes = codes(
            r#"{"id": "outputs", "outputs": [
                {"id": "total", "label": "Total", "format": "number", "decimals": 12},
                {"id": "total", "label": "Again", "format": "text"}
            ]}"#,
        );
        assert_eq!(codes, vec!["DECIMALS_OUT_OF_RANGE", "DUPLICATE_OUTPUT"]);
    }

    #[test]
    fn bindings_may_not_select_by_calculation() {
        let error = LeadMagnet::compile(definition(
            r#"{
                "id": "vm-costs",
                "price_tables": [{"id": "vm", "mode": "tiered", "entries": [
                    {"range_start": 0, "range_end": 10, "value": 40},
                    {"range_start": 10, "range_end": null, "value": 30}
                ]}],
                "prices": [{"variable": "vmPrice", "table": "vm", "selector": {"variable": "servers"}}],
                "calculations": [
                    {"id": "servers", "formula": "users / 10"},
                    {"id": "cost", "formula": "vmPrice * servers"}
                ]
            }"#,
        ))
        .expect_err("binding reads a calculation");

        assert_eq!(error.issues.len(), 1);
        assert_eq!(error.issues[0].code, "BINDING_READS_CALCULATION");
        assert_eq!(error.issues[0].location, "prices[0].selector");
        assert!(error.issues[0].message.contains("`servers`"));
    }

    #[test]
    fn deeply_nested_formulas_are_definition_issues() {
        let formula = format!("{}seats{}", "(".repeat(5_000), ")".repeat(5_000));
        let raw = serde_json::json!({
            "id": "nested",
            "conditions": [{"when": format!("{}true", "(".repeat(100)), "then": [
                {"kind": "set", "variable": "flag", "value": 1}
            ]}],
            "calculations": [{"id": "total", "formula": formula}]
        })
        .to_string();

        let error = LeadMagnet::compile(definition(&raw)).expect_err("nesting rejected");
        let found = error
            .issues
            .iter()
            .map(|issue| (issue.code.as_str(), issue.location.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            found,
            vec![
                ("INVALID_EXPRESSION_SYNTAX", "calculations[0].formula"),
                ("INVALID_EXPRESSION_SYNTAX", "conditions[0].when"),
            ]
        );
    }
}
