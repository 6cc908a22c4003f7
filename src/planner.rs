//! Scenario parametrization planning.
//!
//! Decides, for one test function, whether it runs against the default
//! scenario or against every scenario discovered under a node, and registers
//! the result as an indirect `sippscen` parametrization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::HarnessError;
use crate::host::metafunc::{Metafunc, ParamValue};
use crate::locator::{self, DEFAULT_CASE_ID, LocateRequest};
use crate::scenario::{PatternFilter, ScenarioFilter, WalkOptions};
use crate::settings::SippConf;

/// Argument (and fixture) name the scenario is bound to.
pub const SIPPSCEN: &str = "sippscen";

/// How a function's scenarios are chosen.
#[derive(Debug)]
pub enum Plan {
    /// A single synthetic scenario with id `default_sippscen`.
    Default,
    /// Everything under `root/node` that survives `filters`.
    Discover {
        root: PathBuf,
        node: String,
        filters: Vec<Arc<dyn ScenarioFilter>>,
    },
}

/// Candidate filters in application order: `pysipp_plugins`, then
/// `exclude_expr`.
pub fn assemble_filters(settings: &SippConf) -> Result<Vec<Arc<dyn ScenarioFilter>>, HarnessError> {
    let mut filters: Vec<Arc<dyn ScenarioFilter>> = settings.pysipp_plugins.clone().unwrap_or_default();
    if let Some(expr) = &settings.exclude_expr {
        filters.push(Arc::new(PatternFilter::new(expr)?));
    }
    Ok(filters)
}

/// Choose a plan. An explicit `scen_node` beats one from the settings.
pub fn plan(scen_node: Option<&str>, settings: &SippConf, default_root: &Path) -> Result<Plan, HarnessError> {
    let node = scen_node.filter(|n| !n.is_empty()).or_else(|| settings.node());
    let Some(node) = node else {
        return Ok(Plan::Default);
    };
    Ok(Plan::Discover {
        root: settings
            .scen_root
            .clone()
            .unwrap_or_else(|| default_root.to_path_buf()),
        node: node.to_string(),
        filters: assemble_filters(settings)?,
    })
}

/// Parametrize `sippscen` on `metafunc`.
///
/// `declared` holds declaration-time settings; marker settings on the
/// function (and its class and module) are layered on top.
#[tracing::instrument(skip_all, fields(function = metafunc.function()))]
pub fn generate_sipp_tests(
    metafunc: &mut Metafunc<'_>,
    scen_node: Option<&str>,
    declared: &SippConf,
) -> Result<(), HarnessError> {
    let settings = SippConf::layered([declared, &metafunc.sipp_conf()]);
    let ctx = metafunc.ctx();

    let (ids, values): (Vec<String>, Vec<ParamValue>) =
        match plan(scen_node, &settings, ctx.default_root())? {
            Plan::Default => (
                vec![DEFAULT_CASE_ID.to_string()],
                vec![ParamValue::Scenario(
                    ctx.discovery().default_scenario(WalkOptions::default()),
                )],
            ),
            Plan::Discover { root, node, filters } => {
                let request = LocateRequest {
                    root: &root,
                    node: Some(&node),
                    function: metafunc.function(),
                    filters: &filters,
                };
                locator::locate(ctx.discovery(), request)?
                    .into_iter()
                    .map(|c| (c.id, ParamValue::Scenario(c.scenario)))
                    .unzip()
            }
        };
    tracing::debug!(cases = ids.len(), "scenario cases planned");
    metafunc.parametrize(SIPPSCEN, values, Some(ids), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_node_plans_default() {
        let plan = plan(None, &SippConf::default(), Path::new("/root")).unwrap();
        assert!(matches!(plan, Plan::Default));
        let plan = super::plan(Some(""), &SippConf::new().scen_node(""), Path::new("/root")).unwrap();
        assert!(matches!(plan, Plan::Default));
    }

    #[test]
    fn test_explicit_node_beats_settings() {
        let settings = SippConf::new().scen_node("siprelay");
        match plan(Some("refer"), &settings, Path::new("/root")).unwrap() {
            Plan::Discover { node, root, .. } => {
                assert_eq!(node, "refer");
                assert_eq!(root, PathBuf::from("/root"));
            }
            Plan::Default => panic!("expected discovery"),
        }
    }

    #[test]
    fn test_settings_root_overrides_default() {
        let settings = SippConf::new().scen_node("refer").scen_root("");
        match plan(None, &settings, Path::new("/root")).unwrap() {
            Plan::Discover { root, .. } => assert_eq!(root, PathBuf::new()),
            Plan::Default => panic!("expected discovery"),
        }
    }

    #[test]
    fn test_filters_plugins_then_pattern() {
        struct Everything;
        impl ScenarioFilter for Everything {
            fn reject(&self, _path: &Path) -> bool {
                true
            }
        }
        let settings = SippConf::new().plugin(Arc::new(Everything)).exclude_expr("refer/");
        let filters = assemble_filters(&settings).unwrap();
        assert_eq!(filters.len(), 2);
        assert!(filters[0].reject(Path::new("x")));
        assert!(!filters[1].reject(Path::new("x")));
        assert!(filters[1].reject(Path::new("refer/a")));
    }

    #[test]
    fn test_bad_exclude_expr_surfaces() {
        let settings = SippConf::new().scen_node("refer").exclude_expr("(");
        assert!(matches!(
            plan(None, &settings, Path::new("")),
            Err(HarnessError::InvalidPattern { .. })
        ));
    }
}
