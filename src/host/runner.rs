//! Session runner (pytest-style)
//!
//! ## TestReporter Trait
//!
//! Reporting is separated from execution through [`TestReporter`], so other
//! output formats can be plugged in. [`ConsoleReporter`] prints the familiar
//! `PASSED`/`FAILED` lines and a summary.
//!
//! ## Missing binary
//!
//! Items that need SIPp are probed before they run. When the binary cannot be
//! found the item is reported as [`TestResult::MissingDependency`] and never
//! reaches its fixtures or body.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::RunContext;
use crate::descriptor::TestArgs;
use crate::dispatch::{self, Invocation};
use crate::error::{HarnessError, SippNotFound};
use crate::guard::{self, BinaryProbe, PathProbe};
use crate::planner::SIPPSCEN;

use super::fixtures::{FixtureDef, FixtureRegistry};
use super::{CollectError, Collection, Item, ItemKind, Module, collect_module};

/// Trait for reporting session progress and results.
pub trait TestReporter {
    /// Called once collection (and `-k` selection) is done
    fn on_collection_complete(&mut self, item_count: usize, errors: &[CollectError]);

    /// Called before an item runs
    fn on_test_start(&mut self, _item: &Item) {}

    /// Called when an item completes
    fn on_test_complete(&mut self, item: &Item, result: &TestResult);

    /// Called when the session ends
    fn on_run_complete(&mut self, summary: &TestSummary);
}

/// Summary of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub deselected: usize,
    pub duration: Duration,
}

impl TestSummary {
    fn record(&mut self, result: &TestResult) {
        self.total += 1;
        match result {
            TestResult::Passed(_) => self.passed += 1,
            TestResult::Failed(..) => self.failed += 1,
            TestResult::Error(..) | TestResult::MissingDependency(_) => self.errors += 1,
            TestResult::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Result of running a single item
#[derive(Debug)]
pub enum TestResult {
    Passed(Duration),
    Failed(Duration, String),
    /// Setup problem or broken test body rather than a scenario outcome
    Error(Duration, String),
    Skipped(String),
    MissingDependency(SippNotFound),
}

impl TestResult {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TestResult::Failed(..) | TestResult::Error(..) | TestResult::MissingDependency(_)
        )
    }

    /// Plain-text failure report, if any.
    pub fn longrepr(&self) -> Option<String> {
        match self {
            TestResult::Failed(_, msg) | TestResult::Error(_, msg) => Some(msg.clone()),
            TestResult::MissingDependency(err) => Some(guard::render_report(err, false)),
            TestResult::Passed(_) | TestResult::Skipped(_) => None,
        }
    }
}

/// Default console reporter
#[derive(Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TestReporter for ConsoleReporter {
    fn on_collection_complete(&mut self, item_count: usize, errors: &[CollectError]) {
        println!("\x1b[1m=================== test session starts ===================\x1b[0m");
        println!("collected {} item(s)", item_count);
        for err in errors {
            println!("\x1b[31mERROR collecting {}\x1b[0m", err.nodeid);
            println!("{}", err.error);
        }
        println!();
    }

    fn on_test_start(&mut self, item: &Item) {
        if self.verbose {
            print!("{} ", item.nodeid);
        }
    }

    fn on_test_complete(&mut self, item: &Item, result: &TestResult) {
        let status = match result {
            TestResult::Passed(d) => format!("\x1b[32mPASSED\x1b[0m ({:.0}ms)", d.as_millis()),
            TestResult::Failed(d, _) => format!("\x1b[31mFAILED\x1b[0m ({:.0}ms)", d.as_millis()),
            TestResult::Error(d, _) => format!("\x1b[31mERROR\x1b[0m ({:.0}ms)", d.as_millis()),
            TestResult::MissingDependency(_) => "\x1b[31mERROR\x1b[0m".to_string(),
            TestResult::Skipped(reason) if reason.is_empty() => "\x1b[33mSKIPPED\x1b[0m".to_string(),
            TestResult::Skipped(reason) => format!("\x1b[33mSKIPPED\x1b[0m ({})", reason),
        };
        if self.verbose {
            println!("{}", status);
        } else {
            println!("{} {}", item.nodeid, status);
        }

        match result {
            TestResult::Failed(_, msg) | TestResult::Error(_, msg) => println!("    {}", msg),
            TestResult::MissingDependency(err) => print!("{}", guard::render_report(err, true)),
            _ => {}
        }
    }

    fn on_run_complete(&mut self, summary: &TestSummary) {
        println!();
        let mut parts = Vec::new();
        if summary.passed > 0 {
            parts.push(format!("{} passed", summary.passed));
        }
        if summary.failed > 0 {
            parts.push(format!("{} failed", summary.failed));
        }
        if summary.errors > 0 {
            parts.push(format!("{} error(s)", summary.errors));
        }
        if summary.skipped > 0 {
            parts.push(format!("{} skipped", summary.skipped));
        }
        if summary.deselected > 0 {
            parts.push(format!("{} deselected", summary.deselected));
        }
        if parts.is_empty() {
            parts.push("no tests ran".to_string());
        }
        let color = if summary.failed > 0 || summary.errors > 0 {
            "\x1b[1;31m"
        } else {
            "\x1b[1;32m"
        };
        println!(
            "{}=================== {} in {:.2}s ===================\x1b[0m",
            color,
            parts.join(", "),
            summary.duration.as_secs_f64()
        );
    }
}

/// Reporter that prints nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuietReporter;

impl TestReporter for QuietReporter {
    fn on_collection_complete(&mut self, _item_count: usize, _errors: &[CollectError]) {}

    fn on_test_complete(&mut self, _item: &Item, _result: &TestResult) {}

    fn on_run_complete(&mut self, _summary: &TestSummary) {}
}

/// Outcome of one item.
#[derive(Debug)]
pub struct ItemReport {
    pub nodeid: String,
    pub result: TestResult,
}

/// Everything a session produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub reports: Vec<ItemReport>,
    pub collect_errors: Vec<CollectError>,
    pub summary: TestSummary,
}

impl RunReport {
    pub fn outcome(&self, nodeid: &str) -> Option<&TestResult> {
        self.reports.iter().find(|r| r.nodeid == nodeid).map(|r| &r.result)
    }

    pub fn success(&self) -> bool {
        self.collect_errors.is_empty() && !self.reports.iter().any(|r| r.result.is_failure())
    }
}

/// A test session: modules to collect, fixtures to resolve, and the probe
/// used to locate SIPp.
pub struct Session {
    ctx: RunContext,
    fixtures: FixtureRegistry,
    modules: Vec<Module>,
    probe: Arc<dyn BinaryProbe>,
}

impl Session {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            fixtures: FixtureRegistry::with_builtins(),
            modules: Vec::new(),
            probe: Arc::new(PathProbe),
        }
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_fixture(mut self, fixture: FixtureDef) -> Self {
        self.fixtures.register(fixture);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn BinaryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn ctx(&self) -> &RunContext {
        &self.ctx
    }

    /// Collect every module.
    pub fn collect(&self) -> Collection {
        let mut collection = Collection::default();
        for module in &self.modules {
            let collected = collect_module(module, &self.ctx, &self.fixtures);
            collection.items.extend(collected.items);
            collection.errors.extend(collected.errors);
        }
        collection
    }

    /// Collect, select and run.
    pub fn run(&self, reporter: &mut dyn TestReporter) -> RunReport {
        let start = Instant::now();
        let config = self.ctx.config();
        let Collection { items, errors } = self.collect();

        let total = items.len();
        let items: Vec<Item> = match config.keyword.as_deref() {
            Some(expr) => items.into_iter().filter(|item| item.matches_keyword(expr)).collect(),
            None => items,
        };

        let mut summary = TestSummary {
            deselected: total - items.len(),
            errors: errors.len(),
            ..TestSummary::default()
        };
        reporter.on_collection_complete(items.len(), &errors);

        let mut reports = Vec::new();
        for item in items {
            reporter.on_test_start(&item);
            let result = match item.skip_reason() {
                Some(reason) => TestResult::Skipped(reason.to_string()),
                None => self.run_item(&item),
            };
            reporter.on_test_complete(&item, &result);
            summary.record(&result);

            let stop = config.exitfirst && result.is_failure();
            reports.push(ItemReport {
                nodeid: item.nodeid,
                result,
            });
            if stop {
                tracing::info!("stopping after first failure");
                break;
            }
        }

        summary.duration = start.elapsed();
        reporter.on_run_complete(&summary);
        RunReport {
            reports,
            collect_errors: errors,
            summary,
        }
    }

    #[tracing::instrument(skip_all, fields(nodeid = %item.nodeid))]
    fn run_item(&self, item: &Item) -> TestResult {
        let start = Instant::now();
        if item.requires_sipp() {
            if let Err(err) = guard::check(self.probe.as_ref(), &self.ctx.config().sipp_binary) {
                return TestResult::MissingDependency(err);
            }
        }

        let mut callspec = item.callspec.clone();
        let scenario = callspec.take_scenario(SIPPSCEN);
        let funcargs = match self.fixtures.setup(item, &self.ctx, &[SIPPSCEN]) {
            Ok(values) => values,
            Err(err) => return TestResult::Error(start.elapsed(), format!("setup failed: {err}")),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.call(item, &funcargs, scenario)));
        let elapsed = start.elapsed();
        match outcome {
            Ok(Ok(())) => TestResult::Passed(elapsed),
            Ok(Err(err)) if err.is_internal() => TestResult::Error(elapsed, err.to_string()),
            Ok(Err(err)) => TestResult::Failed(elapsed, err.to_string()),
            Err(payload) => TestResult::Failed(elapsed, format!("panicked: {}", panic_message(&*payload))),
        }
    }

    fn call(
        &self,
        item: &Item,
        funcargs: &crate::scenario::Options,
        scenario: Option<Box<dyn crate::scenario::Scenario>>,
    ) -> Result<(), HarnessError> {
        match &item.kind {
            ItemKind::Sipp(test) => {
                let mut scenario = scenario.ok_or_else(|| HarnessError::Fixture {
                    name: SIPPSCEN.to_string(),
                    message: "no scenario bound".to_string(),
                })?;
                dispatch::run_sipp_test(Invocation {
                    ctx: &self.ctx,
                    item,
                    test,
                    funcargs,
                    scenario: &mut scenario,
                })
            }
            ItemKind::Plain(test) => {
                let mut scenario = scenario;
                let mut args = TestArgs::new(funcargs, scenario.as_mut());
                test.call(&mut args).map_err(HarnessError::TestFailure)
            }
        }
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{payload:?}")
    }
}
