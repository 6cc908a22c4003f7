//! Execution of one scenario test case.
//!
//! The body goes through three states, each a distinct type so the order
//! cannot be violated:
//!
//! ```text
//! Primed ──invoke──▶ Invoked ──finalize──▶ done
//! ```
//!
//! Priming runs the setup half and captures the expectation. Invoking runs
//! the scenario through the hooks and checks the outcome against the
//! expectation, catching panics. Finalizing always runs the teardown half,
//! then surfaces (in order of precedence) a protocol violation from the
//! teardown, a panic from the invocation, or the invocation's own result.

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use crate::context::RunContext;
use crate::descriptor::{Introspect, SELF_ARG, SippTest, Suspend, TestArgs, TestBody};
use crate::error::{HarnessError, ProtocolViolation};
use crate::hooks::CaseInfo;
use crate::host::Item;
use crate::planner::SIPPSCEN;
use crate::scenario::{FailureKind, Options, Scenario, ScenarioError};
use crate::settings::SippConf;

/// Everything needed to run one case.
pub struct Invocation<'a> {
    pub ctx: &'a RunContext,
    pub item: &'a Item,
    pub test: &'a SippTest,
    /// Resolved fixture values
    pub funcargs: &'a Options,
    pub scenario: &'a mut Box<dyn Scenario>,
}

/// Arguments split between the body and the scenario.
struct Bound {
    testargs: Options,
    sippargs: Options,
    wants_scenario: bool,
}

impl Bound {
    fn new(test: &SippTest, settings: &SippConf, funcargs: &Options) -> Self {
        let mut testargs = Options::new();
        let mut wants_scenario = false;
        for name in test.argnames() {
            match name.as_str() {
                SIPPSCEN => wants_scenario = true,
                // Called outside an instance: bind a placeholder.
                SELF_ARG => {
                    testargs.insert(name.clone(), funcargs.get(name).cloned().unwrap_or(Value::Null));
                }
                _ => {
                    if let Some(value) = funcargs.get(name) {
                        testargs.insert(name.clone(), value.clone());
                    }
                }
            }
        }

        let mut sippargs = settings.options.clone();
        for (name, value) in funcargs {
            if name != SIPPSCEN && name != SELF_ARG {
                sippargs.insert(name.clone(), value.clone());
            }
        }

        Self {
            testargs,
            sippargs,
            wants_scenario,
        }
    }

    fn args<'s>(&'s self, scenario: &'s mut Box<dyn Scenario>) -> TestArgs<'s> {
        TestArgs::new(&self.testargs, self.wants_scenario.then_some(scenario))
    }
}

struct Primed {
    body: Box<dyn TestBody>,
    expectation: Option<FailureKind>,
}

struct Invoked {
    body: Box<dyn TestBody>,
    outcome: std::thread::Result<Result<(), HarnessError>>,
}

impl Primed {
    fn new(test: &SippTest, bound: &Bound, scenario: &mut Box<dyn Scenario>) -> Result<Self, HarnessError> {
        let mut body = test.call();
        match body.prime(&mut bound.args(scenario)) {
            Suspend::Yielded(expectation) => Ok(Self { body, expectation }),
            Suspend::Completed => Err(ProtocolViolation::DidNotYield.into()),
        }
    }

    fn invoke(self, ctx: &RunContext, info: &CaseInfo<'_>, scenario: &mut Box<dyn Scenario>, sippargs: Options) -> Invoked {
        let expectation = self.expectation;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let result = ctx.hooks().run_scenario(info, &mut **scenario, sippargs);
            check_expectation(expectation, result)
        }));
        Invoked {
            body: self.body,
            outcome,
        }
    }
}

impl Invoked {
    fn finalize(self, bound: &Bound, scenario: &mut Box<dyn Scenario>) -> Result<(), HarnessError> {
        let mut body = self.body;
        if let Suspend::Yielded(_) = body.resume(&mut bound.args(scenario)) {
            return Err(ProtocolViolation::DidNotStop.into());
        }
        match self.outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Compare the scenario outcome with the declared expectation.
pub fn check_expectation(
    expectation: Option<FailureKind>,
    result: Result<(), ScenarioError>,
) -> Result<(), HarnessError> {
    match (expectation, result) {
        (None, Ok(())) => Ok(()),
        (None, Err(err)) => Err(HarnessError::ScenarioFailure(err)),
        (Some(expected), Err(err)) if err.kind() == expected => {
            tracing::debug!(%err, "scenario failed as expected");
            Ok(())
        }
        (Some(expected), actual) => Err(HarnessError::ExpectationMismatch {
            expected,
            actual: actual.err(),
        }),
    }
}

/// Run one scenario test case: prime the body, run the scenario, finalize
/// the body, and notify post hooks on success.
#[tracing::instrument(skip_all, fields(nodeid = %invocation.item.nodeid))]
pub fn run_sipp_test(invocation: Invocation<'_>) -> Result<(), HarnessError> {
    let Invocation {
        ctx,
        item,
        test,
        funcargs,
        scenario,
    } = invocation;
    let bound = Bound::new(test, &item.settings, funcargs);
    let info = item.info();

    let primed = Primed::new(test, &bound, scenario)?;
    let invoked = primed.invoke(ctx, &info, scenario, bound.sippargs.clone());
    invoked.finalize(&bound, scenario)?;

    ctx.hooks().run_scenario_post(&info, &**scenario);
    Ok(())
}
