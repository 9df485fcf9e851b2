use std::path::PathBuf;

use leadforge_core::{ApplicationError, EvaluationContext, EvaluationReport};
use tracing::info;

use crate::commands::{load_magnet, read_answers, CommandContext, CommandResult};

const COMMAND: &str = "evaluate";

#[derive(Clone, Debug)]
pub struct EvaluateArgs {
    pub definition: PathBuf,
    pub answers: PathBuf,
    pub json: bool,
    pub correlation_id: Option<String>,
}

pub fn run(context: &CommandContext, args: &EvaluateArgs) -> CommandResult {
    match evaluate(context, args) {
        Ok(report) if args.json => CommandResult::success_with(
            COMMAND,
            summary(&report),
            Some(&report),
        ),
        Ok(report) => CommandResult::text(render_human(&report)),
        Err(error) => CommandResult::from_error(COMMAND, &error),
    }
}

fn evaluate(
    context: &CommandContext,
    args: &EvaluateArgs,
) -> Result<EvaluationReport, ApplicationError> {
    let config = context.load_config()?;
    let magnet = load_magnet(&args.definition, &config)?;
    let answers = read_answers(&args.answers)
        .map_err(|error| ApplicationError::Input(format!("{error:#}")))?;

    info!(
        event_name = "cli.evaluate.started",
        magnet_id = magnet.id(),
        answers = answers.len(),
        locale = config.engine.locale.as_str(),
        "evaluating lead magnet"
    );

    let mut evaluation = EvaluationContext::new(&magnet);
    if let Some(correlation_id) = &args.correlation_id {
        evaluation = evaluation.with_correlation_id(correlation_id.clone());
    }
    evaluation.set_answers(answers.snapshot().clone());

    let locale = config.engine.number_locale();
    let runtime = leadforge_core::DeterministicCalculationRuntime::default();
    Ok(evaluation.evaluate_with(&runtime, &locale, &config.engine.placeholder)?)
}

fn summary(report: &EvaluationReport) -> String {
    let degraded = report.outputs.iter().filter(|output| output.degraded).count();
    format!(
        "evaluated {} calculation(s) into {} output(s), {} degraded",
        report.calculations.len(),
        report.outputs.len(),
        degraded
    )
}

fn render_human(report: &EvaluationReport) -> String {
    let mut lines = vec![format!("lead magnet `{}`:", report.magnet_id)];
    for output in &report.outputs {
        lines.push(format!("- {} = {}", output.label, output.value));
    }
    if report.degraded {
        lines.push("some values could not be computed:".to_string());
        for calculation in &report.calculations {
            if let Some(error) = &calculation.error {
                lines.push(format!("  - {}: {error}", calculation.id));
            }
        }
        for price in &report.prices {
            if let Some(error) = &price.error {
                lines.push(format!("  - {} (price table {}): {error}", price.variable, price.table));
            }
        }
    }
    lines.join("\n")
}
