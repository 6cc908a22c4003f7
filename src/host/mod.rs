//! Test host: modules, classes and functions, their collection into items,
//! and the session that runs them.
//!
//! Collection follows the usual naming rules: functions whose name starts
//! with `test` and classes whose name starts with `Test` are collected,
//! everything else is ignored. Scenario tests ([`SippTest`]) are expanded by
//! [`crate::synth`]; plain functions that request `sippscen` are parametrized
//! the same way, with the node taken from markers only.

pub mod fixtures;
pub mod metafunc;
pub mod runner;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::context::RunContext;
use crate::descriptor::{Introspect, SippTest, TestArgs};
use crate::error::HarnessError;
use crate::hooks::CaseInfo;
use crate::planner::{self, SIPPSCEN};
use crate::settings::SippConf;
use crate::synth;

use fixtures::FixtureRegistry;
use metafunc::{CallSpec, Metafunc};

/// Markers attachable to functions, classes and modules.
#[derive(Debug, Clone)]
pub enum Marker {
    /// Scenario settings (`sipp_conf`).
    SippConf(SippConf),
    /// Skip with a reason.
    Skip(String),
    /// Extra keyword for `-k` selection.
    Keyword(String),
}

impl Marker {
    pub fn name(&self) -> &str {
        match self {
            Marker::SippConf(_) => "sipp_conf",
            Marker::Skip(_) => "skip",
            Marker::Keyword(_) => "keyword",
        }
    }
}

/// Merge every `sipp_conf` marker of a closest-first marker list; closer
/// markers win.
pub fn merged_sipp_conf(markers: &[Marker]) -> SippConf {
    SippConf::layered(markers.iter().rev().filter_map(|m| match m {
        Marker::SippConf(conf) => Some(conf),
        _ => None,
    }))
}

/// Module- or class-level generate hook.
pub type GenerateHook = Arc<dyn Fn(&mut Metafunc<'_>) -> Result<(), HarnessError> + Send + Sync>;

/// Body of an ordinary test function.
pub type PlainFn = Arc<dyn Fn(&mut TestArgs<'_>) -> Result<(), String> + Send + Sync>;

/// An ordinary test function.
#[derive(Clone)]
pub struct PlainTest {
    name: String,
    argnames: Vec<String>,
    markers: Vec<Marker>,
    function: PlainFn,
}

impl std::fmt::Debug for PlainTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTest")
            .field("name", &self.name)
            .field("argnames", &self.argnames)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

impl PlainTest {
    pub fn new<F>(name: &str, function: F) -> Self
    where
        F: Fn(&mut TestArgs<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            argnames: Vec::new(),
            markers: Vec::new(),
            function: Arc::new(function),
        }
    }

    pub fn arg(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.argnames.contains(&name) {
            self.argnames.push(name);
        }
        self
    }

    pub fn mark(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn call(&self, args: &mut TestArgs<'_>) -> Result<(), String> {
        (self.function)(args)
    }
}

impl Introspect for PlainTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn markers(&self) -> &[Marker] {
        &self.markers
    }

    fn argnames(&self) -> &[String] {
        &self.argnames
    }
}

/// Something defined in a module or class body.
#[derive(Debug, Clone)]
pub enum Definition {
    Function(PlainTest),
    Sipp(SippTest),
    Class(Class),
}

impl From<PlainTest> for Definition {
    fn from(test: PlainTest) -> Self {
        Definition::Function(test)
    }
}

impl From<SippTest> for Definition {
    fn from(test: SippTest) -> Self {
        Definition::Sipp(test)
    }
}

impl From<Class> for Definition {
    fn from(class: Class) -> Self {
        Definition::Class(class)
    }
}

macro_rules! container {
    ($ty:ident) => {
        impl $ty {
            pub fn new(name: &str) -> Self {
                Self {
                    name: name.to_string(),
                    markers: Vec::new(),
                    definitions: Vec::new(),
                    generate: None,
                }
            }

            pub fn name(&self) -> &str {
                &self.name
            }

            pub fn mark(mut self, marker: Marker) -> Self {
                self.markers.push(marker);
                self
            }

            pub fn add(mut self, definition: impl Into<Definition>) -> Self {
                self.definitions.push(definition.into());
                self
            }

            /// Hook called for every function collected in this scope.
            pub fn generate_hook<F>(mut self, hook: F) -> Self
            where
                F: Fn(&mut Metafunc<'_>) -> Result<(), HarnessError> + Send + Sync + 'static,
            {
                self.generate = Some(Arc::new(hook));
                self
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("name", &self.name)
                    .field("markers", &self.markers)
                    .field("definitions", &self.definitions)
                    .field("generate", &self.generate.is_some())
                    .finish()
            }
        }
    };
}

/// A test class. Its methods receive `self` when they ask for it.
#[derive(Clone)]
pub struct Class {
    name: String,
    markers: Vec<Marker>,
    definitions: Vec<Definition>,
    generate: Option<GenerateHook>,
}

/// A test module.
#[derive(Clone)]
pub struct Module {
    name: String,
    markers: Vec<Marker>,
    definitions: Vec<Definition>,
    generate: Option<GenerateHook>,
}

container!(Class);
container!(Module);

/// What an item runs.
#[derive(Debug, Clone)]
pub enum ItemKind {
    Sipp(SippTest),
    Plain(PlainTest),
}

/// A collected, runnable test case.
#[derive(Debug, Clone)]
pub struct Item {
    /// `name[id]`, or the bare name when not parametrized
    pub name: String,
    /// `module::Class::name[id]`
    pub nodeid: String,
    /// Parametrization id, empty when not parametrized
    pub case_id: String,
    pub kind: ItemKind,
    pub callspec: CallSpec,
    pub fixturenames: Vec<String>,
    pub keywords: BTreeSet<String>,
    /// Closest-first
    pub markers: Vec<Marker>,
    /// Effective scenario settings (declaration, then markers)
    pub settings: SippConf,
}

impl Item {
    pub fn is_sipp_test(&self) -> bool {
        matches!(self.kind, ItemKind::Sipp(_))
    }

    /// Scenario tests and anything bound to a scenario need the SIPp binary.
    pub fn requires_sipp(&self) -> bool {
        self.is_sipp_test() || self.fixturenames.iter().any(|n| n == SIPPSCEN)
    }

    pub fn info(&self) -> CaseInfo<'_> {
        CaseInfo {
            nodeid: &self.nodeid,
            name: &self.name,
            case_id: &self.case_id,
        }
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.markers.iter().find_map(|m| match m {
            Marker::Skip(reason) => Some(reason.as_str()),
            _ => None,
        })
    }

    /// `-k` matching: substring of the node id or a keyword, with an
    /// optional leading `not `.
    pub fn matches_keyword(&self, expr: &str) -> bool {
        let expr = expr.trim();
        if let Some(rest) = expr.strip_prefix("not ") {
            return !self.matches_keyword(rest);
        }
        self.nodeid.contains(expr) || self.keywords.iter().any(|k| k.contains(expr))
    }
}

/// Where a definition lives.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub module: &'a Module,
    pub class: Option<&'a Class>,
}

impl<'a> Scope<'a> {
    pub fn nodeid_prefix(&self) -> String {
        match self.class {
            Some(class) => format!("{}::{}", self.module.name, class.name),
            None => self.module.name.clone(),
        }
    }

    /// `own` markers followed by the class's and the module's.
    pub fn inherit_markers(&self, own: &[Marker]) -> Vec<Marker> {
        let class = self.class.map(|c| c.markers.as_slice()).unwrap_or_default();
        own.iter()
            .chain(class)
            .chain(&self.module.markers)
            .cloned()
            .collect()
    }

    /// Module hook first, then the class hook.
    pub fn run_generate_hooks(&self, metafunc: &mut Metafunc<'_>) -> Result<(), HarnessError> {
        if let Some(hook) = &self.module.generate {
            hook(metafunc)?;
        }
        if let Some(hook) = self.class.and_then(|c| c.generate.as_ref()) {
            hook(metafunc)?;
        }
        Ok(())
    }
}

/// A definition that failed to collect.
#[derive(Debug)]
pub struct CollectError {
    pub nodeid: String,
    pub error: HarnessError,
}

/// Result of collecting one or more modules.
#[derive(Debug, Default)]
pub struct Collection {
    pub items: Vec<Item>,
    pub errors: Vec<CollectError>,
}

impl Collection {
    fn absorb(&mut self, nodeid: String, result: Result<Vec<Item>, HarnessError>) {
        match result {
            Ok(items) => self.items.extend(items),
            Err(error) => {
                tracing::warn!(%nodeid, %error, "collection failed");
                self.errors.push(CollectError { nodeid, error });
            }
        }
    }
}

/// Collect every test in `module`.
#[tracing::instrument(skip_all, fields(module = %module.name))]
pub fn collect_module(module: &Module, ctx: &RunContext, fixtures: &FixtureRegistry) -> Collection {
    let mut collection = Collection::default();
    let scope = Scope { module, class: None };
    for definition in &module.definitions {
        collect_definition(definition, scope, ctx, fixtures, &mut collection);
    }
    collection
}

fn collect_definition(
    definition: &Definition,
    scope: Scope<'_>,
    ctx: &RunContext,
    fixtures: &FixtureRegistry,
    out: &mut Collection,
) {
    match definition {
        Definition::Class(class) if class.name.starts_with("Test") && scope.class.is_none() => {
            let inner = Scope {
                module: scope.module,
                class: Some(class),
            };
            for definition in &class.definitions {
                collect_definition(definition, inner, ctx, fixtures, out);
            }
        }
        Definition::Sipp(test) if test.name().starts_with("test") => {
            let nodeid = format!("{}::{}", scope.nodeid_prefix(), test.name());
            out.absorb(nodeid, synth::expand(test, &scope, ctx, fixtures));
        }
        Definition::Function(test) if test.name().starts_with("test") => {
            let nodeid = format!("{}::{}", scope.nodeid_prefix(), test.name());
            out.absorb(nodeid, collect_function(test, &scope, ctx, fixtures));
        }
        _ => {}
    }
}

fn collect_function(
    test: &PlainTest,
    scope: &Scope<'_>,
    ctx: &RunContext,
    fixtures: &FixtureRegistry,
) -> Result<Vec<Item>, HarnessError> {
    let markers = scope.inherit_markers(test.markers());
    let fixturenames = fixtures.closure(test.argnames());
    let mut metafunc = Metafunc::new(test.name(), &fixturenames, &markers, ctx);
    if fixturenames.iter().any(|n| n == SIPPSCEN) {
        planner::generate_sipp_tests(&mut metafunc, None, &SippConf::default())?;
    }
    scope.run_generate_hooks(&mut metafunc)?;
    let calls = metafunc.into_calls();
    let settings = merged_sipp_conf(&markers);
    Ok(build_items(
        test.name(),
        scope,
        ItemKind::Plain(test.clone()),
        calls,
        &fixturenames,
        &markers,
        settings,
    ))
}

/// One item per call spec, or a single unparametrized item when there are
/// none. A parametrized item is always named `base[id]`, even for an empty
/// id.
pub(crate) fn build_items(
    base: &str,
    scope: &Scope<'_>,
    kind: ItemKind,
    calls: Vec<CallSpec>,
    fixturenames: &[String],
    markers: &[Marker],
    settings: SippConf,
) -> Vec<Item> {
    let prefix = scope.nodeid_prefix();
    let calls = if calls.is_empty() { vec![CallSpec::default()] } else { calls };
    calls
        .into_iter()
        .map(|callspec| {
            let parametrized = !callspec.ids().is_empty();
            let case_id = callspec.id();
            let name = if parametrized {
                format!("{base}[{case_id}]")
            } else {
                base.to_string()
            };
            let mut keywords: BTreeSet<String> = markers
                .iter()
                .filter_map(|m| match m {
                    Marker::Keyword(k) => Some(k.clone()),
                    _ => None,
                })
                .collect();
            if parametrized {
                keywords.insert(case_id.clone());
            }
            Item {
                nodeid: format!("{prefix}::{name}"),
                name,
                case_id,
                kind: kind.clone(),
                callspec,
                fixturenames: fixturenames.to_vec(),
                keywords,
                markers: markers.to_vec(),
                settings: settings.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::descriptor::{TwoPhase, sipp_test};
    use crate::scenario::sipp::SippDiscovery;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::new(HarnessConfig::default(), Arc::new(SippDiscovery::new("sipp")))
    }

    fn collect(module: &Module) -> Collection {
        collect_module(module, &ctx(), &FixtureRegistry::with_builtins())
    }

    #[test]
    fn test_naming_rules() {
        let module = Module::new("m")
            .add(PlainTest::new("test_a", |_| Ok(())))
            .add(PlainTest::new("helper", |_| Ok(())))
            .add(Class::new("Helper").add(PlainTest::new("test_b", |_| Ok(()))))
            .add(Class::new("TestThing").add(PlainTest::new("test_c", |_| Ok(()))));
        let collected = collect(&module);
        let ids: Vec<&str> = collected.items.iter().map(|i| i.nodeid.as_str()).collect();
        assert_eq!(ids, vec!["m::test_a", "m::TestThing::test_c"]);
    }

    #[test]
    fn test_scope_markers_closest_first() {
        let module = Module::new("m").mark(Marker::SippConf(SippConf::new().option("rate", 1)));
        let class = Class::new("TestX").mark(Marker::SippConf(SippConf::new().option("rate", 2)));
        let scope = Scope {
            module: &module,
            class: Some(&class),
        };
        let own = [Marker::Skip("later".into())];
        let markers = scope.inherit_markers(&own);
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0].name(), "skip");
        assert_eq!(merged_sipp_conf(&markers).options.get("rate"), Some(&json!(2)));
    }

    #[test]
    fn test_generate_hook_parametrizes_plain_function() {
        let module = Module::new("m")
            .generate_hook(|metafunc| {
                if metafunc.fixturenames().iter().any(|n| n == "x") {
                    metafunc.parametrize("x", vec![json!(1).into(), json!(2).into()], None, false)?;
                }
                Ok(())
            })
            .add(PlainTest::new("test_x", |_| Ok(())).arg("x"));
        let collected = collect(&module);
        let names: Vec<&str> = collected.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["test_x[1]", "test_x[2]"]);
        assert!(collected.items[0].keywords.contains("1"));
    }

    #[test]
    fn test_parametrize_error_becomes_collect_error() {
        let module = Module::new("m")
            .generate_hook(|metafunc| metafunc.parametrize("missing", vec![json!(1).into()], None, false))
            .add(PlainTest::new("test_x", |_| Ok(())));
        let collected = collect(&module);
        assert!(collected.items.is_empty());
        assert_eq!(collected.errors[0].nodeid, "m::test_x");
    }

    #[test]
    fn test_sipp_items_require_binary() {
        let module = Module::new("m").add(sipp_test("test_sipp", TwoPhase::new));
        let collected = collect(&module);
        assert_eq!(collected.items.len(), 1);
        assert!(collected.items[0].requires_sipp());
        assert_eq!(collected.items[0].name, "test_sipp[default_sippscen]");
    }

    #[test]
    fn test_keyword_matching() {
        let module = Module::new("m").add(PlainTest::new("test_alpha", |_| Ok(())).mark(Marker::Keyword("slow".into())));
        let collected = collect(&module);
        let item = &collected.items[0];
        assert!(item.matches_keyword("alpha"));
        assert!(item.matches_keyword("slow"));
        assert!(item.matches_keyword("not beta"));
        assert!(!item.matches_keyword("not slow"));
    }
}
