use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::magnet::{Assignment, Condition, PriceSelector};
use crate::domain::value::Value;
use crate::engine::expression::Expression;
use crate::engine::formula::{evaluate_bool, evaluate_number};
use crate::engine::pricing::PriceResolver;
use crate::engine::store::ValueStore;
use crate::errors::{DefinitionIssue, EngineError};

/// A condition with its predicate and formula assignments already parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub when: Expression,
    pub then: Vec<RuleAssignment>,
    pub otherwise: Vec<RuleAssignment>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuleAssignment {
    Set { variable: String, value: Value },
    Copy { variable: String, from: String },
    Formula { variable: String, expression: Expression },
    Price { variable: String, table: String, selector: PriceSelector },
}

impl RuleAssignment {
    /// Parses formula assignments; every other kind maps over unchanged.
    pub fn from_assignment(assignment: &Assignment) -> Result<Self, EngineError> {
        Ok(match assignment {
            Assignment::Set { variable, value } => {
                Self::Set { variable: variable.clone(), value: value.clone().into() }
            }
            Assignment::Copy { variable, from } => {
                Self::Copy { variable: variable.clone(), from: from.clone() }
            }
            Assignment::Formula { variable, expression } => Self::Formula {
                variable: variable.clone(),
                expression: Expression::formula(expression)?,
            },
            Assignment::Price { variable, table, selector } => Self::Price {
                variable: variable.clone(),
                table: table.clone(),
                selector: selector.clone(),
            },
        })
    }

    pub fn variable(&self) -> &str {
        match self {
            Self::Set { variable, .. }
            | Self::Copy { variable, .. }
            | Self::Formula { variable, .. }
            | Self::Price { variable, .. } => variable,
        }
    }

    /// Names this assignment reads from the store.
    pub fn reads(&self) -> Vec<&str> {
        match self {
            Self::Set { .. } => Vec::new(),
            Self::Copy { from, .. } => vec![from.as_str()],
            Self::Formula { expression, .. } => expression.references(),
            Self::Price { selector: PriceSelector::Variable(name), .. } => vec![name.as_str()],
            Self::Price { selector: PriceSelector::Key(_), .. } => Vec::new(),
        }
    }
}

impl Rule {
    pub fn compile(condition: &Condition, location: &str) -> Result<Self, Vec<DefinitionIssue>> {
        let mut issues = Vec::new();

        let when = Expression::predicate(&condition.when)
            .map_err(|error| issues.push(DefinitionIssue::from_engine(format!("{location}.when"), &error)))
            .ok();
        if condition.then.is_empty() {
            issues.push(DefinitionIssue::new(
                "EMPTY_CONDITION",
                format!("{location}.then"),
                "a condition needs at least one assignment",
            ));
        }
        let then = compile_assignments(&condition.then, &format!("{location}.then"), &mut issues);
        let otherwise =
            compile_assignments(&condition.otherwise, &format!("{location}.otherwise"), &mut issues);

        match when {
            Some(when) if issues.is_empty() => Ok(Self { when, then, otherwise }),
            _ => Err(issues),
        }
    }

    pub fn assignments(&self) -> impl Iterator<Item = &RuleAssignment> {
        self.then.iter().chain(&self.otherwise)
    }
}

fn compile_assignments(
    assignments: &[Assignment],
    location: &str,
    issues: &mut Vec<DefinitionIssue>,
) -> Vec<RuleAssignment> {
    let mut compiled = Vec::with_capacity(assignments.len());
    for (index, assignment) in assignments.iter().enumerate() {
        if assignment.variable().trim().is_empty() {
            issues.push(DefinitionIssue::new(
                "EMPTY_VARIABLE_NAME",
                format!("{location}[{index}].variable"),
                "assignment target must not be empty",
            ));
            continue;
        }
        match RuleAssignment::from_assignment(assignment) {
            Ok(rule_assignment) => compiled.push(rule_assignment),
            Err(error) => issues.push(DefinitionIssue::from_engine(
                format!("{location}[{index}].expression"),
                &error,
            )),
        }
    }
    compiled
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOutcome {
    Then,
    Otherwise,
    /// The predicate could not be evaluated (e.g. an unanswered field); nothing was assigned.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignmentFailure {
    pub variable: String,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConditionTrace {
    pub index: usize,
    pub outcome: ConditionOutcome,
    pub assigned: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<AssignmentFailure>,
}

/// Applies if/then rules to the store before any calculation runs.
///
/// Rules run in declaration order and write straight into the store, so a later rule sees and
/// may overwrite what an earlier one assigned.
#[derive(Clone, Debug, Default)]
pub struct ConditionEngine;

impl ConditionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Parses and applies raw conditions. Syntax errors abort before anything is written.
    pub fn apply_conditions(
        &self,
        conditions: &[Condition],
        store: &mut ValueStore,
        prices: &PriceResolver,
    ) -> Result<Vec<ConditionTrace>, EngineError> {
        let mut rules = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let when = Expression::predicate(&condition.when)?;
            let then = parse_assignments(&condition.then)?;
            let otherwise = parse_assignments(&condition.otherwise)?;
            rules.push(Rule { when, then, otherwise });
        }
        Ok(self.apply(&rules, store, prices))
    }

    pub fn apply(
        &self,
        rules: &[Rule],
        store: &mut ValueStore,
        prices: &PriceResolver,
    ) -> Vec<ConditionTrace> {
        rules.iter().enumerate().map(|(index, rule)| apply_rule(index, rule, store, prices)).collect()
    }
}

fn parse_assignments(assignments: &[Assignment]) -> Result<Vec<RuleAssignment>, EngineError> {
    assignments.iter().map(RuleAssignment::from_assignment).collect()
}

fn apply_rule(
    index: usize,
    rule: &Rule,
    store: &mut ValueStore,
    prices: &PriceResolver,
) -> ConditionTrace {
    let (outcome, branch) = match evaluate_bool(&rule.when, store) {
        Ok(true) => (ConditionOutcome::Then, rule.then.as_slice()),
        Ok(false) => (ConditionOutcome::Otherwise, rule.otherwise.as_slice()),
        Err(error) => {
            warn!(
                event_name = "engine.condition.skipped",
                condition_index = index,
                predicate = rule.when.source(),
                error = %error,
                "condition skipped because its predicate could not be evaluated"
            );
            return ConditionTrace {
                index,
                outcome: ConditionOutcome::Skipped,
                assigned: Vec::new(),
                error: Some(error.to_string()),
                failures: Vec::new(),
            };
        }
    };

    let mut assigned = Vec::with_capacity(branch.len());
    let mut failures = Vec::new();
    for assignment in branch {
        let variable = assignment.variable();
        let value = match assign(assignment, store, prices) {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    event_name = "engine.condition.assignment_degraded",
                    condition_index = index,
                    variable,
                    error = %error,
                    "condition assignment fell back to not-a-number"
                );
                failures.push(AssignmentFailure {
                    variable: variable.to_string(),
                    error: error.to_string(),
                });
                Value::NotANumber
            }
        };
        store.set(variable, value);
        assigned.push(variable.to_string());
    }

    debug!(
        event_name = "engine.condition.applied",
        condition_index = index,
        outcome = ?outcome,
        assigned = assigned.len(),
        "condition applied"
    );
    ConditionTrace { index, outcome, assigned, error: None, failures }
}

fn assign(
    assignment: &RuleAssignment,
    store: &ValueStore,
    prices: &PriceResolver,
) -> Result<Value, EngineError> {
    match assignment {
        RuleAssignment::Set { value, .. } => Ok(value.clone()),
        RuleAssignment::Copy { from, .. } => match store.get(from) {
            Some(Value::NotANumber) => Err(EngineError::NotANumber(from.clone())),
            Some(value) => Ok(value.clone()),
            None => Err(EngineError::MissingVariable(from.clone())),
        },
        RuleAssignment::Formula { expression, .. } => {
            evaluate_number(expression, store).map(Value::Number)
        }
        RuleAssignment::Price { table, selector, .. } => {
            prices.resolve(table, selector, store).map(Value::Number)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{ConditionEngine, ConditionOutcome, Rule, RuleAssignment};
    use crate::domain::magnet::{
        Assignment, Condition, Literal, PriceEntry, PriceSelector, PriceTableDefinition,
        PriceTableMode,
    };
    use crate::domain::value::Value;
    use crate::engine::pricing::{PriceResolver, PriceTable};
    use crate::engine::store::ValueStore;
    use crate::errors::EngineError;

    fn set(variable: &str, value: f64) -> Assignment {
        Assignment::Set { variable: variable.to_string(), value: Literal::Number(value) }
    }

    fn plans() -> PriceResolver {
        let table = PriceTable::compile(
            &PriceTableDefinition {
                id: "plans".to_string(),
                mode: PriceTableMode::Keyed,
                entries: vec![
                    PriceEntry::Keyed { key: "basic".to_string(), value: 10.0 },
                    PriceEntry::Keyed { key: "pro".to_string(), value: 20.0 },
                ],
            },
            "price_tables[0]",
        )
        .expect("valid table");
        PriceResolver::new(BTreeMap::from([("plans".to_string(), table)]))
    }

    #[test]
    fn then_and_otherwise_branches_assign() {
        let conditions = vec![Condition {
            when: "plan == 'pro'".to_string(),
            then: vec![set("seatPrice", 20.0)],
            otherwise: vec![set("seatPrice", 10.0)],
        }];
        let engine = ConditionEngine::new();

        let mut pro: ValueStore = [("plan", "pro")].into_iter().collect();
        let traces =
            engine.apply_conditions(&conditions, &mut pro, &PriceResolver::default()).expect("ok");
        assert_eq!(pro.get("seatPrice"), Some(&Value::Number(20.0)));
        assert_eq!(traces[0].outcome, ConditionOutcome::Then);

        let mut basic: ValueStore = [("plan", "basic")].into_iter().collect();
        let traces = engine
            .apply_conditions(&conditions, &mut basic, &PriceResolver::default())
            .expect("ok");
        assert_eq!(basic.get("seatPrice"), Some(&Value::Number(10.0)));
        assert_eq!(traces[0].outcome, ConditionOutcome::Otherwise);
    }

    #[test]
    fn later_conditions_overwrite_earlier_assignments() {
        let conditions = vec![
            Condition {
                when: "seats > 0".to_string(),
                then: vec![set("discount", 0.05)],
                otherwise: Vec::new(),
            },
            Condition {
                when: "seats >= 50".to_string(),
                then: vec![set("discount", 0.15)],
                otherwise: Vec::new(),
            },
        ];
        let mut store: ValueStore = [("seats", 80.0)].into_iter().collect();

        ConditionEngine::new()
            .apply_conditions(&conditions, &mut store, &PriceResolver::default())
            .expect("ok");
        assert_eq!(store.get("discount"), Some(&Value::Number(0.15)));
    }

    #[test]
    fn later_conditions_see_earlier_assignments() {
        let conditions = vec![
            Condition {
                when: "region == 'eu'".to_string(),
                then: vec![Assignment::Set {
                    variable: "vatApplies".to_string(),
                    value: Literal::Bool(true),
                }],
                otherwise: Vec::new(),
            },
            Condition {
                when: "vatApplies".to_string(),
                then: vec![Assignment::Formula {
                    variable: "vatRate".to_string(),
                    expression: "19 / 100".to_string(),
                }],
                otherwise: Vec::new(),
            },
        ];
        let mut store: ValueStore = [("region", "eu")].into_iter().collect();

        ConditionEngine::new()
            .apply_conditions(&conditions, &mut store, &PriceResolver::default())
            .expect("ok");
        assert_eq!(store.get("vatRate"), Some(&Value::Number(0.19)));
    }

    #[test]
    fn price_and_copy_assignments_pick_table_rows() {
        let conditions = vec![Condition {
            when: "plan != ''".to_string(),
            then: vec![
                Assignment::Price {
                    variable: "seatPrice".to_string(),
                    table: "plans".to_string(),
                    selector: PriceSelector::Key("pro".to_string()),
                },
                Assignment::Copy { variable: "listPrice".to_string(), from: "seatPrice".to_string() },
            ],
            otherwise: Vec::new(),
        }];
        let mut store: ValueStore = [("plan", "pro")].into_iter().collect();

        ConditionEngine::new().apply_conditions(&conditions, &mut store, &plans()).expect("ok");
        assert_eq!(store.get("seatPrice"), Some(&Value::Number(20.0)));
        assert_eq!(store.get("listPrice"), Some(&Value::Number(20.0)));
    }

    #[test]
    fn unevaluable_predicate_skips_without_assigning() {
        let conditions = vec![Condition {
            when: "plan == 'pro'".to_string(),
            then: vec![set("seatPrice", 20.0)],
            otherwise: vec![set("seatPrice", 10.0)],
        }];
        let mut store = ValueStore::new();

        let traces = ConditionEngine::new()
            .apply_conditions(&conditions, &mut store, &PriceResolver::default())
            .expect("syntax is valid");
        assert_eq!(traces[0].outcome, ConditionOutcome::Skipped);
        assert!(traces[0].error.as_deref().is_some_and(|error| error.contains("plan")));
        assert!(store.get("seatPrice").is_none());
    }

    #[test]
    fn failed_assignment_degrades_only_its_variable() {
        let conditions = vec![Condition {
            when: "true".to_string(),
            then: vec![
                Assignment::Price {
                    variable: "seatPrice".to_string(),
                    table: "plans".to_string(),
                    selector: PriceSelector::Key("enterprise".to_string()),
                },
                set("setupFee", 99.0),
            ],
            otherwise: Vec::new(),
        }];
        let mut store = ValueStore::new();

        let traces =
            ConditionEngine::new().apply_conditions(&conditions, &mut store, &plans()).expect("ok");
        assert_eq!(store.get("seatPrice"), Some(&Value::NotANumber));
        assert_eq!(store.get("setupFee"), Some(&Value::Number(99.0)));
        assert_eq!(traces[0].failures.len(), 1);
        assert_eq!(traces[0].failures[0].variable, "seatPrice");
    }

    #[test]
    fn syntax_errors_abort_before_any_write() {
        let conditions = vec![
            Condition {
                when: "true".to_string(),
                then: vec![set("a", 1.0)],
                otherwise: Vec::new(),
            },
            Condition { when: "plan ==".to_string(), then: vec![set("b", 1.0)], otherwise: Vec::new() },
        ];
        let mut store = ValueStore::new();

        let result = ConditionEngine::new().apply_conditions(
            &conditions,
            &mut store,
            &PriceResolver::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidExpressionSyntax { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn compile_collects_every_issue() {
        let issues = Rule::compile(
            &Condition {
                when: "plan = 'pro'".to_string(),
                then: Vec::new(),
                otherwise: vec![Assignment::Formula {
                    variable: "x".to_string(),
                    expression: "seats >".to_string(),
                }],
            },
            "conditions[0]",
        )
        .expect_err("invalid condition");

        let locations = issues.iter().map(|issue| issue.location.as_str()).collect::<Vec<_>>();
        assert_eq!(
            locations,
            vec!["conditions[0].when", "conditions[0].then", "conditions[0].otherwise[0].expression"]
        );
    }

    #[test]
    fn assignments_convert_once_for_both_entry_points() {
        let converted = RuleAssignment::from_assignment(&Assignment::Formula {
            variable: "net".to_string(),
            expression: "gross / 1.19".to_string(),
        })
        .expect("valid formula");
        assert_eq!(converted.variable(), "net");
        assert_eq!(converted.reads(), vec!["gross"]);

        assert_eq!(
            RuleAssignment::from_assignment(&set("fee", 9.0)),
            Ok(RuleAssignment::Set { variable: "fee".to_string(), value: Value::Number(9.0) })
        );
        assert!(matches!(
            RuleAssignment::from_assignment(&Assignment::Formula {
                variable: "net".to_string(),
                expression: "gross /".to_string(),
            }),
            Err(EngineError::InvalidExpressionSyntax { .. })
        ));
    }

    #[test]
    fn deeply_nested_predicates_fail_as_syntax_errors() {
        let conditions = vec![Condition {
            when: format!("{}true{}", "(".repeat(3_000), ")".repeat(3_000)),
            then: vec![set("a", 1.0)],
            otherwise: Vec::new(),
        }];
        let mut store = ValueStore::new();

        let result = ConditionEngine::new().apply_conditions(
            &conditions,
            &mut store,
            &PriceResolver::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidExpressionSyntax { .. })));
        assert!(store.is_empty());
    }
}
