pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;

pub use config::{AppConfig, ConfigError, LocaleId, LogFormat};
pub use domain::magnet::{
    Assignment, Calculation, Condition, Literal, MagnetDefinition, Output, OutputFormat,
    PriceBinding, PriceEntry, PriceSelector, PriceTableDefinition, PriceTableMode,
};
pub use domain::value::Value;
pub use engine::conditions::{ConditionEngine, ConditionOutcome, ConditionTrace};
pub use engine::context::{CalculationTrace, EvaluationContext, EvaluationReport, PriceTrace};
pub use engine::formula::{evaluate, evaluate_predicate};
pub use engine::lead_magnet::{CompileOptions, LeadMagnet};
pub use engine::output::{FormattedOutput, LocaleFormat, NumberLocale, OutputFormatter};
pub use engine::pricing::{PriceQuery, PriceResolver};
pub use engine::scheduler::DependencyScheduler;
pub use engine::store::ValueStore;
pub use engine::{CalculationRuntime, DeterministicCalculationRuntime, EvaluationInput};
pub use errors::{ApplicationError, DefinitionError, DefinitionIssue, EngineError};
