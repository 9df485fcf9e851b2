use std::path::Path;

use crate::commands::{load_magnet, CommandContext, CommandResult};

const COMMAND: &str = "order";

/// Prints calculation ids in the order every surface evaluates them.
pub fn run(context: &CommandContext, definition: &Path) -> CommandResult {
    let magnet = match context.load_config().and_then(|config| load_magnet(definition, &config)) {
        Ok(magnet) => magnet,
        Err(error) => return CommandResult::from_error(COMMAND, &error),
    };

    let order = magnet.evaluation_order();
    CommandResult::success_with(
        COMMAND,
        format!("{} calculation(s): {}", order.len(), order.join(" -> ")),
        Some(order),
    )
}
