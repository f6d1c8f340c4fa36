pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "opsgate",
    about = "Opsgate operator CLI",
    long_about = "Inspect gateway configuration, run readiness checks, list the read-only operation catalog, and dry-run message classification.",
    after_help = "Examples:\n  opsgate doctor --json\n  opsgate config\n  opsgate catalog\n  opsgate classify \"list hsps pods\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(
        about = "Validate config, operation registry, guardrails, router and language backend setup"
    )]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List the read-only operations with their parameters and upstream binding")]
    Catalog {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Run the guardrail and intent router on a message without calling any upstream"
    )]
    Classify {
        #[arg(help = "Message text to classify")]
        text: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Catalog { json } => commands::catalog::run(json),
        Command::Classify { text } => commands::classify::run(&text),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_classify_text() {
        let cli = Cli::parse_from(["opsgate", "classify", "list hsps pods"]);
        assert!(matches!(cli.command, Command::Classify { ref text } if text == "list hsps pods"));
    }

    #[test]
    fn parses_doctor_json_flag() {
        let cli = Cli::parse_from(["opsgate", "doctor", "--json"]);
        assert!(matches!(cli.command, Command::Doctor { json: true }));
    }
}
