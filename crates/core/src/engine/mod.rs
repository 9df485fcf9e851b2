pub mod conditions;
pub mod context;
pub mod expression;
pub mod formula;
pub mod lead_magnet;
pub mod output;
pub mod pricing;
pub mod scheduler;
pub mod store;

use tracing::{debug, info, warn};

use crate::domain::value::Value;
use crate::errors::EngineError;

use self::{
    conditions::ConditionEngine,
    context::{CalculationTrace, EvaluationReport, PriceTrace},
    formula::evaluate_number,
    lead_magnet::LeadMagnet,
    output::{NumberLocale, OutputFormatter},
    scheduler::DependencyScheduler,
    store::ValueStore,
};

pub struct EvaluationInput<'a> {
    pub magnet: &'a LeadMagnet,
    pub answers: &'a ValueStore,
    pub locale: &'a dyn NumberLocale,
    pub placeholder: &'a str,
    pub correlation_id: Option<&'a str>,
}

pub trait CalculationRuntime: Send + Sync {
    /// Fails only for definition-level errors; anything a visitor's answers can cause degrades to
    /// a placeholder inside the report.
    fn evaluate(&self, input: EvaluationInput<'_>) -> Result<EvaluationReport, EngineError>;
}

/// Conditions, then price bindings, then calculations in dependency order, then outputs.
#[derive(Clone, Debug, Default)]
pub struct DeterministicCalculationRuntime {
    conditions: ConditionEngine,
    scheduler: DependencyScheduler,
}

impl DeterministicCalculationRuntime {
    pub fn new(conditions: ConditionEngine, scheduler: DependencyScheduler) -> Self {
        Self { conditions, scheduler }
    }
}

impl CalculationRuntime for DeterministicCalculationRuntime {
    fn evaluate(&self, input: EvaluationInput<'_>) -> Result<EvaluationReport, EngineError> {
        let magnet = input.magnet;
        let correlation_id = input.correlation_id.unwrap_or("-");
        let mut store = input.answers.clone();

        let conditions = self.conditions.apply(magnet.rules(), &mut store, magnet.prices());

        let mut prices = Vec::with_capacity(magnet.bindings().len());
        for binding in magnet.bindings() {
            let (value, error) =
                match magnet.prices().resolve(&binding.table, &binding.selector, &store) {
                    Ok(price) => {
                        store.set(binding.variable.as_str(), price);
                        (Some(price), None)
                    }
                    Err(error) => {
                        warn!(
                            event_name = "engine.price.degraded",
                            magnet_id = magnet.id(),
                            correlation_id,
                            variable = %binding.variable,
                            table = %binding.table,
                            error = %error,
                            "price binding fell back to not-a-number"
                        );
                        store.set(binding.variable.as_str(), Value::NotANumber);
                        (None, Some(error.to_string()))
                    }
                };
            prices.push(PriceTrace {
                variable: binding.variable.clone(),
                table: binding.table.clone(),
                value,
                error,
            });
        }

        // Compilation already rejected cycles; a failure here means a hand-built magnet.
        let order = self.scheduler.order_nodes(&magnet.calculation_nodes())?;

        let mut calculations = Vec::with_capacity(order.len());
        for index in order {
            let calculation = &magnet.calculations()[index];
            let (value, error) = match evaluate_number(&calculation.formula, &store) {
                Ok(value) => {
                    debug!(
                        event_name = "engine.calculation.evaluated",
                        magnet_id = magnet.id(),
                        correlation_id,
                        calculation_id = %calculation.id,
                        value,
                        "calculation evaluated"
                    );
                    store.set(calculation.id.as_str(), value);
                    (Some(value), None)
                }
                Err(error) => {
                    warn!(
                        event_name = "engine.calculation.degraded",
                        magnet_id = magnet.id(),
                        correlation_id,
                        calculation_id = %calculation.id,
                        error_code = error.code(),
                        error = %error,
                        "calculation fell back to not-a-number"
                    );
                    store.set(calculation.id.as_str(), Value::NotANumber);
                    (None, Some(error.to_string()))
                }
            };
            calculations.push(CalculationTrace {
                id: calculation.id.clone(),
                label: calculation.label.clone(),
                formula: calculation.formula.source().to_string(),
                value,
                error,
            });
        }

        let outputs = OutputFormatter::new(input.locale)
            .with_placeholder(input.placeholder)
            .format_all(magnet.outputs(), &store);

        let degraded = conditions.iter().any(|trace| !trace.failures.is_empty())
            || prices.iter().any(|trace| trace.error.is_some())
            || calculations.iter().any(|trace| trace.error.is_some())
            || outputs.iter().any(|output| output.degraded);

        info!(
            event_name = "engine.evaluation.completed",
            magnet_id = magnet.id(),
            correlation_id,
            calculations = calculations.len(),
            outputs = outputs.len(),
            degraded,
            "lead magnet evaluated"
        );

        Ok(EvaluationReport {
            magnet_id: magnet.id().to_string(),
            correlation_id: input.correlation_id.map(str::to_string),
            order: calculations.iter().map(|trace| trace.id.clone()).collect(),
            conditions,
            prices,
            calculations,
            outputs,
            degraded,
            snapshot: store.snapshot().clone(),
        })
    }
}
