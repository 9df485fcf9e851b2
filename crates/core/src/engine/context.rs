use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::value::Value;
use crate::engine::conditions::ConditionTrace;
use crate::engine::lead_magnet::LeadMagnet;
use crate::engine::output::{FormattedOutput, NumberLocale, DEFAULT_PLACEHOLDER};
use crate::engine::store::ValueStore;
use crate::engine::{CalculationRuntime, DeterministicCalculationRuntime, EvaluationInput};
use crate::errors::EngineError;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalculationTrace {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub formula: String,
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceTrace {
    pub variable: String,
    pub table: String,
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one evaluation produced, in the order it happened.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub magnet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub order: Vec<String>,
    pub conditions: Vec<ConditionTrace>,
    pub prices: Vec<PriceTrace>,
    pub calculations: Vec<CalculationTrace>,
    pub outputs: Vec<FormattedOutput>,
    /// Some value fell back to not-a-number or a placeholder.
    pub degraded: bool,
    pub snapshot: BTreeMap<String, Value>,
}

impl EvaluationReport {
    pub fn output(&self, id: &str) -> Option<&FormattedOutput> {
        self.outputs.iter().find(|output| output.id == id)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.snapshot.get(name)
    }
}

/// One wizard submission, admin preview or report render against a compiled lead magnet.
///
/// Owns its answers; the magnet is shared read-only, so contexts never observe each other.
/// Evaluating does not modify the answers, which makes repeated evaluation idempotent.
#[derive(Clone, Debug)]
pub struct EvaluationContext<'m> {
    magnet: &'m LeadMagnet,
    answers: ValueStore,
    correlation_id: Option<String>,
}

impl<'m> EvaluationContext<'m> {
    pub fn new(magnet: &'m LeadMagnet) -> Self {
        Self { magnet, answers: ValueStore::new(), correlation_id: None }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn magnet(&self) -> &'m LeadMagnet {
        self.magnet
    }

    pub fn answers(&self) -> &ValueStore {
        &self.answers
    }

    pub fn answers_mut(&mut self) -> &mut ValueStore {
        &mut self.answers
    }

    pub fn set_answers<I, K, V>(&mut self, answers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.answers.set_many(answers);
    }

    pub fn evaluate(&self, locale: &dyn NumberLocale) -> Result<EvaluationReport, EngineError> {
        self.evaluate_with(&DeterministicCalculationRuntime::default(), locale, DEFAULT_PLACEHOLDER)
    }

    pub fn evaluate_with(
        &self,
        runtime: &dyn CalculationRuntime,
        locale: &dyn NumberLocale,
        placeholder: &str,
    ) -> Result<EvaluationReport, EngineError> {
        runtime.evaluate(EvaluationInput {
            magnet: self.magnet,
            answers: &self.answers,
            locale,
            placeholder,
            correlation_id: self.correlation_id.as_deref(),
        })
    }
}
