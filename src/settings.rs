//! Scenario settings carried by the `sipp_conf` marker and by declarations.
//!
//! Merging is last-writer-wins per key and never deep: a later plugin list
//! replaces an earlier one, a later option value replaces an earlier one.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::scenario::{Options, ScenarioFilter};

/// Option key for the pass-through invocation timeout, in seconds.
pub const TIMEOUT_KEY: &str = "timeout";

/// Scenario settings for one scope (declaration, module, class or function).
#[derive(Clone, Default)]
pub struct SippConf {
    /// Scenario database root; falls back to the run's default root.
    pub scen_root: Option<PathBuf>,
    /// Scenario node relative to the root.
    pub scen_node: Option<String>,
    /// Extra candidate filters, run before `exclude_expr`.
    pub pysipp_plugins: Option<Vec<Arc<dyn ScenarioFilter>>>,
    /// Expression rejecting candidate paths (anchored at the start).
    pub exclude_expr: Option<String>,
    /// Pass-through invocation options.
    pub options: Options,
}

impl fmt::Debug for SippConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SippConf")
            .field("scen_root", &self.scen_root)
            .field("scen_node", &self.scen_node)
            .field("pysipp_plugins", &self.pysipp_plugins.as_ref().map(Vec::len))
            .field("exclude_expr", &self.exclude_expr)
            .field("options", &self.options)
            .finish()
    }
}

impl SippConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scen_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scen_root = Some(root.into());
        self
    }

    pub fn scen_node(mut self, node: impl Into<String>) -> Self {
        self.scen_node = Some(node.into());
        self
    }

    /// Append a candidate filter.
    pub fn plugin(mut self, filter: Arc<dyn ScenarioFilter>) -> Self {
        self.pysipp_plugins.get_or_insert_with(Vec::new).push(filter);
        self
    }

    pub fn exclude_expr(mut self, expr: impl Into<String>) -> Self {
        self.exclude_expr = Some(expr.into());
        self
    }

    /// Set a pass-through invocation option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn timeout(self, seconds: f64) -> Self {
        self.option(TIMEOUT_KEY, seconds)
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(mut self, other: &SippConf) -> SippConf {
        if other.scen_root.is_some() {
            self.scen_root.clone_from(&other.scen_root);
        }
        if other.scen_node.is_some() {
            self.scen_node.clone_from(&other.scen_node);
        }
        if other.pysipp_plugins.is_some() {
            self.pysipp_plugins.clone_from(&other.pysipp_plugins);
        }
        if other.exclude_expr.is_some() {
            self.exclude_expr.clone_from(&other.exclude_expr);
        }
        for (key, value) in &other.options {
            self.options.insert(key.clone(), value.clone());
        }
        self
    }

    /// Merge layers in increasing precedence.
    pub fn layered<'a>(layers: impl IntoIterator<Item = &'a SippConf>) -> SippConf {
        layers.into_iter().fold(SippConf::default(), |acc, layer| acc.merge(layer))
    }

    /// The requested scenario node, treating an empty string as absent.
    pub fn node(&self) -> Option<&str> {
        self.scen_node.as_deref().filter(|n| !n.is_empty())
    }
}
