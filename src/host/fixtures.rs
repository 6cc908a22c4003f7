//! Fixture registry
//!
//! Fixtures are named value providers resolved per item. The builtin set
//! exposes the run configuration to tests and scenarios:
//!
//! | name             | value                                   |
//! |------------------|-----------------------------------------|
//! | `dut_ip`         | device-under-test address               |
//! | `sipp_proxyaddr` | `[dut_ip, sip_port]`                    |
//! | `scen_db_path`   | effective scenario root of the item     |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::HarnessConfig;
use crate::context::RunContext;
use crate::error::HarnessError;
use crate::host::Item;
use crate::host::metafunc::ParamValue;
use crate::scenario::Options;
use crate::settings::SippConf;

/// Fixture function: resolved dependencies in, value out.
pub type FixtureFn = Arc<dyn Fn(&FixtureRequest<'_>) -> Result<Value, String> + Send + Sync>;

/// A registered fixture.
#[derive(Clone)]
pub struct FixtureDef {
    name: String,
    deps: Vec<String>,
    autouse: bool,
    func: FixtureFn,
}

impl FixtureDef {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&FixtureRequest<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            deps: Vec::new(),
            autouse: false,
            func: Arc::new(func),
        }
    }

    pub fn depends_on(mut self, name: &str) -> Self {
        self.deps.push(name.to_string());
        self
    }

    /// Resolve for every item whether requested or not.
    pub fn autouse(mut self) -> Self {
        self.autouse = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// What a fixture function can see.
pub struct FixtureRequest<'a> {
    pub item: &'a Item,
    pub ctx: &'a RunContext,
    /// Indirect parameter for this fixture, if the item was parametrized so.
    pub param: Option<&'a ParamValue>,
    values: &'a Options,
}

impl FixtureRequest<'_> {
    /// Value of an already resolved dependency.
    pub fn getfixturevalue(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn config(&self) -> &HarnessConfig {
        self.ctx.config()
    }

    pub fn sipp_conf(&self) -> &SippConf {
        &self.item.settings
    }
}

/// Named fixtures available to a session.
#[derive(Clone, Default)]
pub struct FixtureRegistry {
    defs: BTreeMap<String, FixtureDef>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `dut_ip`, `sipp_proxyaddr` and `scen_db_path`.
    pub fn with_builtins() -> Self {
        Self::new()
            .with(FixtureDef::new("dut_ip", |req| Ok(Value::String(req.config().dut_ip.clone()))))
            .with(
                FixtureDef::new("sipp_proxyaddr", |req| {
                    let ip = req
                        .getfixturevalue("dut_ip")
                        .cloned()
                        .ok_or_else(|| "dut_ip unresolved".to_string())?;
                    Ok(json!([ip, req.config().sip_port]))
                })
                .depends_on("dut_ip"),
            )
            .with(FixtureDef::new("scen_db_path", |req| {
                let root = match &req.sipp_conf().scen_root {
                    Some(root) => root.clone(),
                    None => req.ctx.default_root().to_path_buf(),
                };
                Ok(Value::String(root.to_string_lossy().into_owned()))
            }))
    }

    pub fn register(&mut self, def: FixtureDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn with(mut self, def: FixtureDef) -> Self {
        self.register(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FixtureDef> {
        self.defs.get(name)
    }

    /// Every fixture name an item needs: autouse fixtures, then `argnames`,
    /// then transitive dependencies. `self` is never a fixture.
    pub fn closure(&self, argnames: &[String]) -> Vec<String> {
        let mut names: Vec<String> = self.defs.values().filter(|d| d.autouse).map(|d| d.name.clone()).collect();
        for name in argnames {
            if name != crate::descriptor::SELF_ARG && !names.contains(name) {
                names.push(name.clone());
            }
        }
        let mut idx = 0;
        while idx < names.len() {
            if let Some(def) = self.defs.get(&names[idx]) {
                for dep in &def.deps {
                    if !names.contains(dep) {
                        names.push(dep.clone());
                    }
                }
            }
            idx += 1;
        }
        names
    }

    /// Resolve every fixture of `item` except `skip` (parameters handled by
    /// the caller, such as the scenario).
    pub fn setup(&self, item: &Item, ctx: &RunContext, skip: &[&str]) -> Result<Options, HarnessError> {
        let mut values = Options::new();
        let mut resolving = BTreeSet::new();
        for name in &item.fixturenames {
            if skip.contains(&name.as_str()) {
                continue;
            }
            self.resolve(name, item, ctx, &mut values, &mut resolving)?;
        }
        Ok(values)
    }

    fn resolve(
        &self,
        name: &str,
        item: &Item,
        ctx: &RunContext,
        values: &mut Options,
        resolving: &mut BTreeSet<String>,
    ) -> Result<(), HarnessError> {
        if values.contains_key(name) {
            return Ok(());
        }
        let param = item.callspec.param(name);
        if let Some(ParamValue::Value(value)) = param {
            if !item.callspec.is_indirect(name) {
                values.insert(name.to_string(), value.clone());
                return Ok(());
            }
        }
        let Some(def) = self.defs.get(name) else {
            return Err(HarnessError::UnknownFixture {
                name: name.to_string(),
                requested_by: item.name.clone(),
            });
        };
        if !resolving.insert(name.to_string()) {
            return Err(HarnessError::Fixture {
                name: name.to_string(),
                message: "recursive dependency".to_string(),
            });
        }
        for dep in &def.deps {
            self.resolve(dep, item, ctx, values, resolving)?;
        }
        let request = FixtureRequest {
            item,
            ctx,
            param,
            values,
        };
        let value = (def.func)(&request).map_err(|message| HarnessError::Fixture {
            name: name.to_string(),
            message,
        })?;
        resolving.remove(name);
        values.insert(name.to_string(), value);
        Ok(())
    }
}
