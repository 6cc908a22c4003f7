//! Command implementations for the CLI.
//!
//! The CLI builds one module per scenario root. Each module holds one
//! scenario test per requested node (or a single default-scenario test when
//! no node is given), and every test forwards `sipp_proxyaddr` so client
//! agents target the device under test.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::RunContext;
use crate::descriptor::{SippTest, TwoPhase, sipp_test};
use crate::host::runner::{ConsoleReporter, Session};
use crate::host::{Marker, Module};
use crate::scenario::PatternFilter;
use crate::scenario::sipp::SippDiscovery;
use crate::settings::SippConf;

use super::{Cli, CliError, CliResult, ExitCode};

/// Module name used when no (or a single) `--sipp-scen` root is given.
const DEFAULT_MODULE: &str = "sipp";

/// Assemble the session described by `cli`.
pub fn build_session(cli: &Cli) -> CliResult<Session> {
    let settings = module_settings(cli)?;
    let config = cli.config();
    let discovery = Arc::new(SippDiscovery::new(config.sipp_binary.clone()));
    let ctx = RunContext::new(config, discovery);

    let modules: Vec<Module> = if cli.sipp_scen.len() > 1 {
        cli.sipp_scen
            .iter()
            .map(|root| {
                let settings = rooted_exclude(settings.clone(), Some(root)).scen_root(root.clone());
                scenario_module(&root.to_string_lossy(), settings, &cli.nodes)
            })
            .collect()
    } else {
        let settings = rooted_exclude(settings, cli.sipp_scen.first().map(PathBuf::as_path));
        vec![scenario_module(DEFAULT_MODULE, settings, &cli.nodes)]
    };

    Ok(modules.into_iter().fold(Session::new(ctx), Session::with_module))
}

fn module_settings(cli: &Cli) -> CliResult<SippConf> {
    let mut settings = SippConf::new();
    if let Some(expr) = &cli.exclude {
        PatternFilter::new(expr).map_err(|e| CliError::usage(format!("Error: {e}")))?;
        settings = settings.exclude_expr(expr.clone());
    }
    if let Some(timeout) = cli.timeout {
        if !(timeout.is_finite() && timeout > 0.0) {
            return Err(CliError::usage(format!(
                "Error: --timeout must be a positive number of seconds, got {timeout}"
            )));
        }
        settings = settings.timeout(timeout);
    }
    Ok(settings)
}

/// Candidates are matched with their root joined on, so `--exclude` also
/// accepts paths relative to `root`.
fn rooted_exclude(settings: SippConf, root: Option<&Path>) -> SippConf {
    let root = root.map(|r| r.to_string_lossy().trim_end_matches('/').to_string());
    match (settings.exclude_expr.clone(), root) {
        (Some(expr), Some(root)) if !root.is_empty() => {
            settings.exclude_expr(format!("(?:{}/)?(?:{})", regex::escape(&root), expr))
        }
        _ => settings,
    }
}

fn scenario_module(name: &str, settings: SippConf, nodes: &[String]) -> Module {
    let module = Module::new(name).mark(Marker::SippConf(settings));
    if nodes.is_empty() {
        return module.add(scenario_test("test_sipp", None));
    }
    nodes
        .iter()
        .fold(module, |module, node| module.add(scenario_test(&test_name(node), Some(node.as_str()))))
}

fn scenario_test(name: &str, node: Option<&str>) -> SippTest {
    let test = sipp_test(name, TwoPhase::new).arg("sipp_proxyaddr");
    match node {
        Some(node) => test.scen_node(node),
        None => test,
    }
}

/// `test_<node>` with every non-alphanumeric run collapsed to `_`.
fn test_name(node: &str) -> String {
    let leaf = Path::new(node).file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let source = if Path::new(node).is_absolute() { leaf.as_str() } else { node };
    let mut name = String::from("test_");
    let mut pending_sep = false;
    for ch in source.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !name.ends_with('_') {
                name.push('_');
            }
            name.push(ch);
            pending_sep = false;
        } else {
            pending_sep = true;
        }
    }
    name
}

/// Print collected node ids.
pub fn collect_only(session: &Session) -> CliResult<ExitCode> {
    let collection = session.collect();
    for item in &collection.items {
        println!("{}", item.nodeid);
    }
    if !collection.errors.is_empty() {
        let message = collection
            .errors
            .iter()
            .map(|e| format!("ERROR collecting {}\n{}", e.nodeid, e.error))
            .collect::<Vec<_>>()
            .join("\n");
        return Err(CliError::usage(message));
    }
    println!();
    println!("{} item(s) collected", collection.items.len());
    if collection.items.is_empty() {
        return Ok(ExitCode::NO_TESTS);
    }
    Ok(ExitCode::SUCCESS)
}

/// Run the session with the console reporter.
pub fn run_session(session: &Session, verbose: bool) -> CliResult<ExitCode> {
    let mut reporter = ConsoleReporter::new(verbose);
    let report = session.run(&mut reporter);
    if !report.collect_errors.is_empty() {
        return Ok(ExitCode::USAGE);
    }
    if report.summary.total == 0 {
        return Ok(ExitCode::NO_TESTS);
    }
    Ok(if report.success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    fn scripts() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for case in ["refer/blind", "refer/attended", "siprelay/notify"] {
            let path = dir.path().join(case);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join("uac.xml"), "<scenario/>").unwrap();
        }
        dir
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sipp-test").chain(args.iter().copied())).unwrap()
    }

    fn nodeids(session: &Session) -> Vec<String> {
        session.collect().items.into_iter().map(|i| i.nodeid).collect()
    }

    #[test]
    fn test_test_names() {
        assert_eq!(test_name("refer"), "test_refer");
        assert_eq!(test_name("refer/attended-2call"), "test_refer_attended_2call");
        assert_eq!(test_name("/abs/path/siprelay"), "test_siprelay");
    }

    #[test]
    fn test_session_per_node() {
        let dir = scripts();
        let root = dir.path().to_string_lossy().into_owned();
        let session = build_session(&cli(&["--sipp-scen", &root, "refer", "siprelay"])).unwrap();
        assert_eq!(
            nodeids(&session),
            vec![
                "sipp::test_refer[attended]",
                "sipp::test_refer[blind]",
                "sipp::test_siprelay[notify]"
            ]
        );
    }

    #[test]
    fn test_default_scenario_without_nodes() {
        let session = build_session(&cli(&[])).unwrap();
        assert_eq!(nodeids(&session), vec!["sipp::test_sipp[default_sippscen]"]);
    }

    #[test]
    fn test_one_module_per_root() {
        let first = scripts();
        let second = scripts();
        let roots: Vec<String> = [&first, &second]
            .iter()
            .map(|d| d.path().to_string_lossy().into_owned())
            .collect();
        let session = build_session(&cli(&["--sipp-scen", &roots[0], "--sipp-scen", &roots[1], "siprelay"])).unwrap();
        let ids = nodeids(&session);
        assert_eq!(ids.len(), 2);
        assert!(ids[0].starts_with(&roots[0]));
        assert!(ids[1].starts_with(&roots[1]));
    }

    #[test]
    fn test_exclude_relative_to_root() {
        let dir = scripts();
        let root = dir.path().to_string_lossy().into_owned();
        let session = build_session(&cli(&["--sipp-scen", &root, "--exclude", "refer/attended", "refer"])).unwrap();
        assert_eq!(nodeids(&session), vec!["sipp::test_refer[blind]"]);
    }

    #[test]
    fn test_exclude_with_full_path() {
        let dir = scripts();
        let root = dir.path().to_string_lossy().into_owned();
        let expr = format!("{}/refer/blind", regex::escape(&root));
        let session = build_session(&cli(&["--sipp-scen", &root, "--exclude", &expr, "refer"])).unwrap();
        assert_eq!(nodeids(&session), vec!["sipp::test_refer[attended]"]);
    }

    #[test]
    fn test_invalid_exclude_is_usage_error() {
        let err = build_session(&cli(&["--exclude", "("])).err().unwrap();
        assert_eq!(err.exit_code, ExitCode::USAGE);
    }

    #[test]
    fn test_invalid_timeout_is_usage_error() {
        let err = build_session(&cli(&["--timeout", "0"])).err().unwrap();
        assert_eq!(err.exit_code, ExitCode::USAGE);
    }

    #[test]
    fn test_collect_only_reports_missing_node() {
        let dir = scripts();
        let root = dir.path().to_string_lossy().into_owned();
        let session = build_session(&cli(&["--sipp-scen", &root, "nothing-here"])).unwrap();
        let err = collect_only(&session).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::USAGE);
        assert!(err.message.contains("No SIPp scenarios could be found under"));
    }
}
