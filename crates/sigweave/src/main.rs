mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sigweave", version, about = "Run and inspect sensor pipelines")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "sigweave",
            "run",
            "/tmp/pipeline.json",
            "--duration",
            "3s",
        ])
        .expect("run args should parse");

        match cli.command {
            Command::Run(args) => assert_eq!(args.duration.as_deref(), Some("3s")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_requires_description() {
        let err = Cli::try_parse_from(["sigweave", "run"]).expect_err("missing path should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_inspect_with_global_format() {
        let cli = Cli::try_parse_from(["sigweave", "inspect", "/tmp/a.stream", "--format", "json"])
            .expect("inspect args should parse");
        assert!(matches!(cli.command, Command::Inspect(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }
}
