use std::process::ExitCode;

fn main() -> ExitCode {
    leadforge_cli::run()
}
