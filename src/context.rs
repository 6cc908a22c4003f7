//! Per-run context threaded through collection and execution.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::config::HarnessConfig;
use crate::hooks::{HookRegistry, SippHooks};
use crate::scenario::ScenarioDiscovery;

/// Everything a run needs: configuration, hooks, the discovery collaborator,
/// and the default scenario root (computed at most once).
pub struct RunContext {
    config: HarnessConfig,
    hooks: HookRegistry,
    discovery: Arc<dyn ScenarioDiscovery>,
    default_root: OnceLock<PathBuf>,
}

impl RunContext {
    pub fn new(config: HarnessConfig, discovery: Arc<dyn ScenarioDiscovery>) -> Self {
        Self {
            config,
            hooks: HookRegistry::new(),
            discovery,
            default_root: OnceLock::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn SippHooks>) -> Self {
        self.hooks.register(hook);
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn discovery(&self) -> &dyn ScenarioDiscovery {
        self.discovery.as_ref()
    }

    /// Default scenario root: the first hook answer, then the discovery
    /// collaborator, then the first `--sipp-scen` path, then empty.
    pub fn default_root(&self) -> &Path {
        self.default_root.get_or_init(|| {
            let root = self
                .hooks
                .collect_scripts(&self.config)
                .or_else(|| self.discovery.collect_default_root(&self.config))
                .or_else(|| self.config.sipp_scen.first().cloned())
                .unwrap_or_default();
            tracing::debug!(root = %root.display(), "resolved default scenario root");
            root
        })
    }
}
