pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use leadforge_core::config::{AppConfig, LoadOptions, LocaleId};
use leadforge_core::ApplicationError;
use tracing_subscriber::EnvFilter;

use crate::commands::evaluate::EvaluateArgs;
use crate::commands::CommandContext;

#[derive(Debug, Parser)]
#[command(
    name = "leadforge",
    about = "Leadforge calculation engine CLI",
    long_about = "Evaluate, validate and inspect lead-magnet calculation definitions.",
    after_help = "Examples:\n  leadforge evaluate --definition magnet.json --answers answers.json\n  leadforge validate --definition magnet.json\n  leadforge order --definition magnet.json\n  leadforge config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Explicit config file (default: leadforge.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Evaluate a lead magnet against a JSON object of answers")]
    Evaluate {
        #[arg(long, help = "Lead-magnet definition JSON file")]
        definition: PathBuf,
        #[arg(long, help = "Answers JSON file (flat object of field name to value)")]
        answers: PathBuf,
        #[arg(long, help = "Output locale (de-DE|en-US), overrides configuration")]
        locale: Option<String>,
        #[arg(long, help = "Correlation id attached to log events and the report")]
        correlation_id: Option<String>,
        #[arg(long, help = "Emit the full evaluation report as JSON")]
        json: bool,
    },
    #[command(about = "Compile a definition and report every problem found")]
    Validate {
        #[arg(long, help = "Lead-magnet definition JSON file")]
        definition: PathBuf,
    },
    #[command(about = "Print the deterministic calculation order")]
    Order {
        #[arg(long, help = "Lead-magnet definition JSON file")]
        definition: PathBuf,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

/// `RUST_LOG` takes precedence over the configured level.
pub fn log_filter(config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
}

pub fn init_logging(config: &AppConfig) {
    use leadforge_core::config::LogFormat::*;

    // stdout carries command output, so logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(log_filter(config))
        .with_writer(std::io::stderr);
    let result = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
    if let Err(error) = result {
        eprintln!("logging was already initialized: {error}");
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let mut context = CommandContext { config_path: cli.config, ..CommandContext::default() };

    if let Command::Evaluate { locale: Some(locale), .. } = &cli.command {
        match locale.parse::<LocaleId>() {
            Ok(locale) => context.overrides.locale = Some(locale),
            Err(error) => {
                let error = ApplicationError::Input(error.to_string());
                let result = commands::CommandResult::from_error("evaluate", &error);
                println!("{}", result.output);
                return ExitCode::from(result.exit_code);
            }
        }
    }

    if let Ok(config) = AppConfig::load(LoadOptions {
        config_path: context.config_path.clone(),
        require_file: false,
        overrides: context.overrides.clone(),
    }) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Evaluate { definition, answers, correlation_id, json, .. } => {
            commands::evaluate::run(
                &context,
                &EvaluateArgs { definition, answers, json, correlation_id },
            )
        }
        Command::Validate { definition } => commands::validate::run(&context, &definition),
        Command::Order { definition } => commands::order::run(&context, &definition),
        Command::Config => commands::config::run(&context),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
