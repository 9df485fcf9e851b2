use std::path::Path;

use serde::Serialize;

use crate::commands::{load_magnet, CommandContext, CommandResult};

const COMMAND: &str = "validate";

#[derive(Debug, Serialize)]
struct ValidationSummary<'a> {
    magnet_id: &'a str,
    calculations: usize,
    conditions: usize,
    price_bindings: usize,
    outputs: usize,
}

/// Compiles a definition the way the builder does and reports every problem found.
pub fn run(context: &CommandContext, definition: &Path) -> CommandResult {
    let outcome = context
        .load_config()
        .and_then(|config| load_magnet(definition, &config));

    match outcome {
        Ok(magnet) => {
            let summary = ValidationSummary {
                magnet_id: magnet.id(),
                calculations: magnet.calculations().len(),
                conditions: magnet.rules().len(),
                price_bindings: magnet.bindings().len(),
                outputs: magnet.outputs().len(),
            };
            CommandResult::success_with(
                COMMAND,
                format!("lead magnet `{}` is valid", magnet.id()),
                Some(summary),
            )
        }
        Err(error) => CommandResult::from_error(COMMAND, &error),
    }
}
