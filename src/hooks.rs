//! Extension points around scenario collection and invocation.
//!
//! [`SippHooks`] is implemented by collaborators that want to provide the
//! default scenario root, replace the scenario invocation (for mocking), or
//! observe finished scenarios. [`HookRegistry`] dispatches to them in
//! registration order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::HarnessConfig;
use crate::scenario::{Options, Scenario, ScenarioError};
use crate::settings::TIMEOUT_KEY;

/// Timeout applied when no `timeout` option is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Identity of the test case a hook is called for.
#[derive(Debug, Clone, Copy)]
pub struct CaseInfo<'a> {
    /// Fully qualified node id (`module::Class::name[id]`)
    pub nodeid: &'a str,
    /// Item name (`name[id]`)
    pub name: &'a str,
    /// Parametrization id, empty when not parametrized
    pub case_id: &'a str,
}

/// Hooks a collaborator can implement. Every method has a no-op default.
pub trait SippHooks: Send + Sync {
    /// Default root of the scenario database. First `Some` wins.
    fn collect_scripts(&self, _config: &HarnessConfig) -> Option<PathBuf> {
        None
    }

    /// Run `scenario` for `item`. Returning `Some` suppresses the default
    /// invocation and every later hook.
    fn run_scenario(
        &self,
        _item: &CaseInfo<'_>,
        _scenario: &mut dyn Scenario,
        _options: &mut Options,
    ) -> Option<Result<(), ScenarioError>> {
        None
    }

    /// Notified after a scenario test body finished successfully.
    fn run_scenario_post(&self, _item: &CaseInfo<'_>, _scenario: &dyn Scenario) {}
}

/// Ordered set of registered hooks.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn SippHooks>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn SippHooks>) {
        self.hooks.push(hook);
    }

    pub fn with(mut self, hook: Arc<dyn SippHooks>) -> Self {
        self.register(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn collect_scripts(&self, config: &HarnessConfig) -> Option<PathBuf> {
        self.hooks.iter().find_map(|h| h.collect_scripts(config))
    }

    pub fn run_scenario(
        &self,
        item: &CaseInfo<'_>,
        scenario: &mut dyn Scenario,
        mut options: Options,
    ) -> Result<(), ScenarioError> {
        for hook in &self.hooks {
            if let Some(result) = hook.run_scenario(item, scenario, &mut options) {
                return result;
            }
        }
        default_run_scenario(scenario, options)
    }

    pub fn run_scenario_post(&self, item: &CaseInfo<'_>, scenario: &dyn Scenario) {
        for hook in &self.hooks {
            hook.run_scenario_post(item, scenario);
        }
    }
}

/// Log the scenario and its commands, then run it with the resolved timeout.
pub fn default_run_scenario(scenario: &mut dyn Scenario, mut options: Options) -> Result<(), ScenarioError> {
    tracing::info!("Launching SIPp scenario {}...", scenario.dirpath().display());
    tracing::info!("Running commands:\n{}", scenario.pformat_cmds());

    let timeout = resolve_timeout(options.remove(TIMEOUT_KEY));
    scenario.run(timeout, &options)
}

fn resolve_timeout(value: Option<serde_json::Value>) -> Duration {
    value
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_TIMEOUT)
}
