mod cmd;
mod exit;
mod logging;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "netpipefs", version, about = "Network pipe filesystem peer")]
struct Cli {
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

    match cmd::run(cli.command) {
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
    fn parses_write_subcommand() {
        let cli = Cli::try_parse_from([
            "netpipefs",
            "write",
            "/jobs",
            "--port",
            "7000",
            "--host-port",
            "8000",
        ])
        .expect("write args should parse");

        assert!(matches!(cli.command, Command::Write(_)));
    }

    #[test]
    fn parses_read_subcommand_with_link_options() {
        let cli = Cli::try_parse_from([
            "netpipefs",
            "read",
            "/jobs",
            "--port",
            "8000",
            "--host",
            "10.0.0.7",
            "--host-port",
            "7000",
            "--capacity",
            "4096",
            "--timeout",
            "3s",
        ])
        .expect("read args should parse");

        match cli.command {
            Command::Read(args) => {
                assert_eq!(args.path, "/jobs");
                assert_eq!(args.link.host, "10.0.0.7");
                assert_eq!(args.link.capacity, 4096);
            }
            other => panic!("expected read command, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_ports() {
        let err = Cli::try_parse_from(["netpipefs", "write", "/jobs"])
            .expect_err("missing link options should fail");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn parses_version_subcommand() {
        let cli = Cli::try_parse_from(["netpipefs", "version", "--extended"])
            .expect("version args should parse");
        assert!(matches!(cli.command, Command::Version(_)));
    }
}
