use std::process::ExitCode;

fn main() -> ExitCode {
    opsgate_cli::run()
}
