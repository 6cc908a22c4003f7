//! Expansion of scenario test descriptors into concrete items.

use crate::context::RunContext;
use crate::descriptor::{Introspect, SippTest};
use crate::error::HarnessError;
use crate::host::fixtures::FixtureRegistry;
use crate::host::metafunc::Metafunc;
use crate::host::{Item, ItemKind, Scope, build_items, merged_sipp_conf};
use crate::planner::SIPPSCEN;
use crate::settings::SippConf;

/// Expand `descriptor` into one item per planned scenario.
///
/// `sippscen` is always part of the fixture closure so the planner can bind
/// it, whether or not the body asked for the scenario. Scope generate hooks
/// run afterwards and may multiply the cases further.
#[tracing::instrument(skip_all, fields(name = descriptor.name()))]
pub fn expand(
    descriptor: &SippTest,
    scope: &Scope<'_>,
    ctx: &RunContext,
    fixtures: &FixtureRegistry,
) -> Result<Vec<Item>, HarnessError> {
    let markers = scope.inherit_markers(descriptor.markers());
    let mut fixturenames = fixtures.closure(descriptor.argnames());
    if !fixturenames.iter().any(|n| n == SIPPSCEN) {
        fixturenames.push(SIPPSCEN.to_string());
    }

    let mut metafunc = Metafunc::new(descriptor.name(), &fixturenames, &markers, ctx);
    descriptor.generate_tests(&mut metafunc)?;
    scope.run_generate_hooks(&mut metafunc)?;
    let calls = metafunc.into_calls();

    let settings = SippConf::layered([descriptor.declared_settings(), &merged_sipp_conf(&markers)]);
    let items = build_items(
        descriptor.name(),
        scope,
        ItemKind::Sipp(descriptor.clone()),
        calls,
        &fixturenames,
        &markers,
        settings,
    );
    tracing::debug!(count = items.len(), "expanded scenario test");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::descriptor::{TwoPhase, declare, sipp_test};
    use crate::host::{Marker, Module};
    use crate::scenario::sipp::SippDiscovery;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;

    fn scripts() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for case in ["refer/blind", "refer/attended", "siprelay/notify"] {
            let path = dir.path().join(case);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join("uac.xml"), "<scenario/>").unwrap();
        }
        dir
    }

    fn expand_in(module: &Module, test: &SippTest, root: &std::path::Path) -> Result<Vec<Item>, HarnessError> {
        let ctx = RunContext::new(
            HarnessConfig::new().with_sipp_scen(root),
            Arc::new(SippDiscovery::new("sipp")),
        );
        let scope = Scope { module, class: None };
        expand(test, &scope, &ctx, &FixtureRegistry::with_builtins())
    }

    #[test]
    fn test_one_item_per_scenario() {
        let dir = scripts();
        let test = sipp_test("test_refer", TwoPhase::new).scen_node("refer");
        let items = expand_in(&Module::new("m"), &test, dir.path()).unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["test_refer[attended]", "test_refer[blind]"]);
        assert!(items.iter().all(|i| i.keywords.contains(&i.case_id)));
    }

    #[test]
    fn test_items_keep_declaration_and_marker_settings() {
        let dir = scripts();
        let test = declare(Some("siprelay"), SippConf::new().option("rate", 1).option("calls", 3))
            .wrap("test_relay", TwoPhase::new)
            .mark(Marker::SippConf(SippConf::new().option("rate", 5)));
        let items = expand_in(&Module::new("m"), &test, dir.path()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].settings.options.get("rate"), Some(&json!(5)));
        assert_eq!(items[0].settings.options.get("calls"), Some(&json!(3)));
    }

    #[test]
    fn test_scenarios_are_not_shared_across_generate_hook_copies() {
        let dir = scripts();
        let module = Module::new("m").generate_hook(|metafunc| {
            if metafunc.fixturenames().iter().any(|n| n == "rate") {
                metafunc.parametrize("rate", vec![json!(1).into(), json!(2).into()], None, false)?;
            }
            Ok(())
        });
        let test = sipp_test("test_refer", TwoPhase::new).scen_node("refer").arg("rate");
        let items = expand_in(&module, &test, dir.path()).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.case_id.as_str()).collect();
        assert_eq!(ids, vec!["attended-1", "attended-2", "blind-1", "blind-2"]);
    }

    #[test]
    fn test_leaf_scenario_node_keeps_empty_id() {
        let dir = scripts();
        let test = sipp_test("test_blind", TwoPhase::new).scen_node("refer/blind");
        let items = expand_in(&Module::new("m"), &test, dir.path()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "test_blind[]");
        assert_eq!(items[0].nodeid, "m::test_blind[]");
        assert_eq!(items[0].case_id, "");
        assert!(items[0].keywords.contains(""));
    }

    #[test]
    fn test_exclude_matching_only_an_ancestor_keeps_scenarios() {
        let dir = scripts();
        let test = sipp_test("test_refer", TwoPhase::new)
            .scen_node("refer")
            .mark(Marker::SippConf(SippConf::new().exclude_expr(".*/refer$")));
        let items = expand_in(&Module::new("m"), &test, dir.path()).unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["test_refer[attended]", "test_refer[blind]"]);
    }

    #[test]
    fn test_missing_node_is_discovery_error() {
        let dir = scripts();
        let test = sipp_test("test_nothing", TwoPhase::new).scen_node("nonexistent");
        let err = expand_in(&Module::new("m"), &test, dir.path()).unwrap_err();
        assert!(matches!(err, HarnessError::Discovery { .. }));
    }
}
