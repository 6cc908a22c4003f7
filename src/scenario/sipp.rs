//! Filesystem scenario database backed by the `sipp` binary.
//!
//! A scenario is any directory holding SIPp XML scripts. Scripts whose file
//! name starts with `uas` are server agents and are started first; every
//! other script is a client agent pointed at the destination taken from the
//! pass-through options.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{
    FailureKind, Options, Scenario, ScenarioDiscovery, ScenarioError, ScenarioFilter, Walk, WalkOptions, rejected,
};
use crate::error::HarnessError;

const SCRIPT_EXTENSION: &str = "xml";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Options translated into `sipp` arguments that take a value.
const VALUE_OPTIONS: &[(&str, &str)] = &[
    ("local_host", "-i"),
    ("local_port", "-p"),
    ("calls", "-m"),
    ("rate", "-r"),
    ("rate_period", "-rp"),
    ("call_limit", "-l"),
    ("transport", "-t"),
    ("media_addr", "-mi"),
    ("media_port", "-mp"),
    ("recv_timeout", "-recv_timeout"),
];

/// Options translated into bare `sipp` switches when true.
const SWITCH_OPTIONS: &[(&str, &str)] = &[
    ("trace_msg", "-trace_msg"),
    ("trace_err", "-trace_err"),
    ("trace_stat", "-trace_stat"),
];

/// Walks a SIPp script database on disk.
#[derive(Debug, Clone)]
pub struct SippDiscovery {
    binary: String,
}

impl SippDiscovery {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl ScenarioDiscovery for SippDiscovery {
    fn default_scenario(&self, opts: WalkOptions) -> Box<dyn Scenario> {
        Box::new(SippScenario::builtin(&self.binary, opts))
    }

    fn walk<'a>(
        &'a self,
        path: &Path,
        filters: &'a [Arc<dyn ScenarioFilter>],
        opts: WalkOptions,
    ) -> Result<Walk<'a>, HarnessError> {
        if !path.is_dir() {
            tracing::warn!(path = %path.display(), "scenario path is not a directory");
        }
        Ok(Box::new(ScenarioWalk {
            stack: vec![path.to_path_buf()],
            filters,
            binary: &self.binary,
            opts,
        }))
    }
}

struct ScenarioWalk<'a> {
    stack: Vec<PathBuf>,
    filters: &'a [Arc<dyn ScenarioFilter>],
    binary: &'a str,
    opts: WalkOptions,
}

impl Iterator for ScenarioWalk<'_> {
    type Item = Result<(PathBuf, Box<dyn Scenario>), HarnessError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let dir = self.stack.pop()?;
            if !dir.is_dir() {
                continue;
            }
            let listing = match fs::read_dir(&dir) {
                Ok(rd) => rd,
                Err(e) => return Some(Err(e.into())),
            };
            let mut entries = Vec::new();
            for entry in listing {
                match entry {
                    Ok(entry) => entries.push(entry.path()),
                    Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "unreadable directory entry"),
                }
            }
            entries.sort();

            let mut subdirs = Vec::new();
            let mut scripts = Vec::new();
            for entry in entries {
                if entry.is_dir() {
                    subdirs.push(entry);
                } else if entry.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
                    scripts.push(entry);
                }
            }
            self.stack.extend(subdirs.into_iter().rev());

            // Only scenario directories are candidates; their parents are
            // always descended.
            if scripts.is_empty() {
                continue;
            }
            if rejected(self.filters, &dir) {
                tracing::debug!(path = %dir.display(), "scenario directory rejected");
            } else {
                let scenario = SippScenario::new(dir.clone(), scripts, self.binary, self.opts);
                return Some(Ok((dir, Box::new(scenario))));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Script {
    File(PathBuf),
    Builtin(&'static str),
}

#[derive(Debug, Clone)]
struct Agent {
    role: Role,
    script: Script,
}

impl Agent {
    fn label(&self) -> String {
        match &self.script {
            Script::File(path) => path.display().to_string(),
            Script::Builtin(name) => name.to_string(),
        }
    }
}

/// One scenario directory and the agents it runs.
#[derive(Debug, Clone)]
pub struct SippScenario {
    dirpath: PathBuf,
    scripts: Vec<PathBuf>,
    binary: String,
    autolocalsocks: bool,
    agents: OnceLock<Vec<Agent>>,
}

impl SippScenario {
    pub fn new(dirpath: PathBuf, scripts: Vec<PathBuf>, binary: &str, opts: WalkOptions) -> Self {
        let scenario = Self {
            dirpath,
            scripts,
            binary: binary.to_string(),
            autolocalsocks: opts.autolocalsocks,
            agents: OnceLock::new(),
        };
        if !opts.deferred_construction {
            scenario.agents();
        }
        scenario
    }

    /// SIPp's built-in `uas`/`uac` pair.
    pub fn builtin(binary: &str, opts: WalkOptions) -> Self {
        let scenario = Self::new(PathBuf::new(), Vec::new(), binary, opts);
        let _ = scenario.agents.set(vec![
            Agent {
                role: Role::Server,
                script: Script::Builtin("uas"),
            },
            Agent {
                role: Role::Client,
                script: Script::Builtin("uac"),
            },
        ]);
        scenario
    }

    fn agents(&self) -> &[Agent] {
        self.agents.get_or_init(|| {
            let mut agents: Vec<Agent> = self
                .scripts
                .iter()
                .map(|path| {
                    let stem = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                    let role = if stem.starts_with("uas") { Role::Server } else { Role::Client };
                    Agent {
                        role,
                        script: Script::File(path.clone()),
                    }
                })
                .collect();
            agents.sort_by_key(|a| a.role == Role::Client);
            agents
        })
    }

    fn command_line(&self, agent: &Agent, options: &Options) -> Vec<String> {
        let mut argv = vec![self.binary.clone()];
        match &agent.script {
            Script::File(path) => argv.extend(["-sf".to_string(), path.display().to_string()]),
            Script::Builtin(name) => argv.extend(["-sn".to_string(), name.to_string()]),
        }
        if !options.contains_key("calls") {
            argv.extend(["-m".to_string(), "1".to_string()]);
        }

        for (key, value) in options {
            if let Some((_, flag)) = VALUE_OPTIONS.iter().find(|(k, _)| k == key) {
                if let Some(v) = scalar(value) {
                    argv.extend([flag.to_string(), v]);
                }
            } else if let Some((_, flag)) = SWITCH_OPTIONS.iter().find(|(k, _)| k == key) {
                if value.as_bool() == Some(true) {
                    argv.push(flag.to_string());
                }
            }
        }

        if !self.autolocalsocks && agent.role == Role::Server && !options.contains_key("local_port") {
            tracing::debug!(agent = %agent.label(), "server agent without an explicit local port");
        }

        if agent.role == Role::Client {
            if let Some(dest) = destination(options) {
                argv.push(dest);
            }
        }
        argv
    }

    fn spawn(&self, agent: &Agent, options: &Options) -> Result<Child, ScenarioError> {
        let argv = self.command_line(agent, options);
        Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ScenarioError::new(FailureKind::Spawn, format!("{}: {}", agent.label(), e)))
    }
}

impl Scenario for SippScenario {
    fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    fn pformat_cmds(&self) -> String {
        let options = Options::new();
        self.agents()
            .iter()
            .map(|agent| self.command_line(agent, &options).join(" "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn run(&mut self, timeout: Duration, options: &Options) -> Result<(), ScenarioError> {
        let deadline = Instant::now() + timeout;
        let agents = self.agents().to_vec();
        let mut servers: Vec<(String, Child)> = Vec::new();

        for agent in agents.iter().filter(|a| a.role == Role::Server) {
            match self.spawn(agent, options) {
                Ok(child) => servers.push((agent.label(), child)),
                Err(e) => {
                    reap(&mut servers);
                    return Err(e);
                }
            }
        }

        for agent in agents.iter().filter(|a| a.role == Role::Client) {
            let mut child = match self.spawn(agent, options) {
                Ok(child) => child,
                Err(e) => {
                    reap(&mut servers);
                    return Err(e);
                }
            };
            let label = agent.label();
            let status = wait_until(&mut child, deadline, &label);
            if let Err(e) = check_exit(status, &label, timeout) {
                let _ = child.kill();
                let _ = child.wait();
                reap(&mut servers);
                return Err(e);
            }
        }

        let mut result = Ok(());
        for (label, child) in servers.iter_mut() {
            let status = wait_until(child, deadline, label);
            if let Err(e) = check_exit(status, label, timeout) {
                result = Err(e);
                break;
            }
        }
        reap(&mut servers);
        result
    }

    fn clone_box(&self) -> Box<dyn Scenario> {
        Box::new(self.clone())
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Client destination: `sipp_proxyaddr`/`proxyaddr` as `"host:port"` or
/// `[host, port]`, else `remote_host` with an optional `remote_port`.
fn destination(options: &Options) -> Option<String> {
    let proxy = options.get("sipp_proxyaddr").or_else(|| options.get("proxyaddr"));
    if let Some(value) = proxy {
        return match value {
            Value::Array(parts) if parts.len() == 2 => {
                Some(format!("{}:{}", scalar(&parts[0])?, scalar(&parts[1])?))
            }
            other => scalar(other),
        };
    }
    let host = options.get("remote_host").and_then(scalar)?;
    match options.get("remote_port").and_then(scalar) {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

fn wait_until(child: &mut Child, deadline: Instant, label: &str) -> Result<Option<ExitStatus>, ScenarioError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if Instant::now() >= deadline => return Ok(None),
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(ScenarioError::new(FailureKind::Spawn, format!("{}: {}", label, e))),
        }
    }
}

fn check_exit(
    status: Result<Option<ExitStatus>, ScenarioError>,
    label: &str,
    timeout: Duration,
) -> Result<(), ScenarioError> {
    match status? {
        Some(status) if status.success() => Ok(()),
        Some(status) => Err(ScenarioError::new(
            FailureKind::ExitStatus,
            format!("{} exited with {}", label, status),
        )),
        None => Err(ScenarioError::new(
            FailureKind::Timeout,
            format!("{} did not finish within {:.1}s", label, timeout.as_secs_f64()),
        )),
    }
}

fn reap(children: &mut [(String, Child)]) {
    for (label, child) in children.iter_mut() {
        if let Ok(None) = child.try_wait() {
            tracing::debug!(agent = %label, "killing agent");
            let _ = child.kill();
        }
        let _ = child.wait();
    }
}
