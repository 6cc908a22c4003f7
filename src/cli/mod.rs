//! `sipp-test` command line
//!
//! Runs every SIPp scenario found under one or more nodes of a scenario
//! database, one test case per scenario directory. [`commands`] assembles
//! the session from the parsed arguments and either lists or runs it.
//!
//! Nothing below [`run`] exits the process: session assembly and execution
//! report through [`CliResult`], and [`run`] maps the outcome to an exit
//! status.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use thiserror::Error;

use crate::config::{DEFAULT_SIP_PORT, DEFAULT_SIPP_BINARY, HarnessConfig};

// ============================================================================
// Exit status
// ============================================================================

/// Process exit status, following pytest's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// Some test failed or errored.
    pub const FAILURE: ExitCode = ExitCode(1);
    /// Bad arguments or collection errors.
    pub const USAGE: ExitCode = ExitCode(4);
    pub const NO_TESTS: ExitCode = ExitCode(5);
}

/// A message for stderr plus the status to exit with.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CliError {
    pub message: String,
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Bad command-line input.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::USAGE)
    }
}

pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Run SIPp scenarios as test cases
#[derive(Parser, Debug)]
#[command(name = "sipp-test")]
#[command(version = VERSION)]
#[command(about = "Run SIPp scenarios as test cases", long_about = None)]
pub struct Cli {
    /// Scenario nodes to run (relative to the scenario root, or existing directories)
    #[arg(value_name = "NODE")]
    pub nodes: Vec<String>,

    /// Scenario database root (repeatable)
    #[arg(long = "sipp-scen", alias = "sippscen", value_name = "PATH")]
    pub sipp_scen: Vec<PathBuf>,

    /// SIP port of the device under test
    #[arg(long = "sip-port", value_name = "PORT", default_value_t = DEFAULT_SIP_PORT)]
    pub sip_port: u16,

    /// Address of the device under test
    #[arg(long = "dut-ip", value_name = "IP", default_value = "127.0.0.1")]
    pub dut_ip: String,

    /// SIPp executable to probe and spawn
    #[arg(long = "sipp-binary", value_name = "BINARY", default_value = DEFAULT_SIPP_BINARY)]
    pub sipp_binary: String,

    /// Skip scenarios whose path, relative to the scenario root or in full,
    /// starts with a match of this expression
    #[arg(long = "exclude", value_name = "EXPR")]
    pub exclude: Option<String>,

    /// Per-scenario timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Stop on first failure
    #[arg(short = 'x', long = "exitfirst")]
    pub exitfirst: bool,

    /// Filter tests by keyword expression
    #[arg(short = 'k', value_name = "EXPR")]
    pub keyword: Option<String>,

    /// List collected test ids without running them
    #[arg(long = "collect-only")]
    pub collect_only: bool,
}

impl Cli {
    /// Harness configuration described by the arguments.
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::new()
            .with_sip_port(self.sip_port)
            .with_dut_ip(self.dut_ip.clone())
            .with_sipp_binary(self.sipp_binary.clone())
            .with_verbose(self.verbose)
            .with_exitfirst(self.exitfirst);
        for root in &self.sipp_scen {
            config = config.with_sipp_scen(root.clone());
        }
        if let Some(keyword) = &self.keyword {
            config = config.with_keyword(keyword.clone());
        }
        config
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse arguments, run, and exit with the resulting status.
pub fn run() {
    let status = execute(Cli::parse()).unwrap_or_else(|err| {
        if !err.message.is_empty() {
            eprintln!("{err}");
        }
        err.exit_code
    });
    if status != ExitCode::SUCCESS {
        process::exit(status.0);
    }
}

/// Execute the parsed command line and return the exit code.
pub fn execute(cli: Cli) -> CliResult<ExitCode> {
    let session = commands::build_session(&cli)?;
    if cli.collect_only {
        commands::collect_only(&session)
    } else {
        commands::run_session(&session, cli.verbose)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::try_parse_from(["sipp-test"]).unwrap();
        assert!(cli.nodes.is_empty());
        assert_eq!(cli.sip_port, 5060);
        assert_eq!(cli.dut_ip, "127.0.0.1");
        assert_eq!(cli.sipp_binary, "sipp");
        assert!(!cli.collect_only);
    }

    #[test]
    fn test_cli_parse_repeatable_roots() {
        let cli = Cli::try_parse_from(["sipp-test", "--sipp-scen", "/a", "--sippscen", "/b", "refer"]).unwrap();
        assert_eq!(cli.sipp_scen, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(cli.nodes, vec!["refer".to_string()]);
    }

    #[test]
    fn test_cli_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "sipp-test",
            "-v",
            "-x",
            "-k",
            "blind",
            "--exclude",
            "refer/attended",
            "--timeout",
            "2.5",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.exitfirst);
        assert_eq!(cli.keyword.as_deref(), Some("blind"));
        assert_eq!(cli.exclude.as_deref(), Some("refer/attended"));
        assert_eq!(cli.timeout, Some(2.5));
    }

    #[test]
    fn test_cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["sipp-test", "--sip-port", "70000"]).is_err());
    }

    #[test]
    fn test_config_from_cli() {
        let cli = Cli::try_parse_from(["sipp-test", "--dut-ip", "10.1.1.1", "--sip-port", "5070", "--sippscen", "/s", "-k", "x"])
            .unwrap();
        let config = cli.config();
        assert_eq!(config.proxy_socket(), ("10.1.1.1".to_string(), 5070));
        assert_eq!(config.sipp_scen, vec![PathBuf::from("/s")]);
        assert_eq!(config.keyword.as_deref(), Some("x"));
    }
}
