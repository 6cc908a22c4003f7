//! Parametrization of a single test function.
//!
//! A [`Metafunc`] is handed to generate hooks while a function is collected.
//! Every [`Metafunc::parametrize`] call multiplies the existing call specs by
//! the new values (cartesian product), so two parametrized arguments with 2
//! and 3 values yield 6 calls.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::context::RunContext;
use crate::error::HarnessError;
use crate::host::{Marker, merged_sipp_conf};
use crate::scenario::Scenario;
use crate::settings::SippConf;

/// A parameter value: either a scenario object or plain data.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Scenario(Box<dyn Scenario>),
    Value(Value),
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::Value(value)
    }
}

impl From<Box<dyn Scenario>> for ParamValue {
    fn from(scenario: Box<dyn Scenario>) -> Self {
        ParamValue::Scenario(scenario)
    }
}

/// One concrete combination of parameter values.
#[derive(Debug, Clone, Default)]
pub struct CallSpec {
    params: BTreeMap<String, ParamValue>,
    indirect: BTreeSet<String>,
    ids: Vec<String>,
}

impl CallSpec {
    /// Combined id, parameter ids joined with `-` in parametrize order.
    pub fn id(&self) -> String {
        self.ids.join("-")
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Indirect parameters are handed to a fixture rather than to the test.
    pub fn is_indirect(&self, name: &str) -> bool {
        self.indirect.contains(name)
    }

    /// Take ownership of the scenario bound to `name`, if any.
    pub fn take_scenario(&mut self, name: &str) -> Option<Box<dyn Scenario>> {
        match self.params.remove(name) {
            Some(ParamValue::Scenario(scenario)) => Some(scenario),
            Some(other) => {
                self.params.insert(name.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// Directly parametrized plain values.
    pub fn direct_values(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.params.iter().filter_map(|(name, param)| match param {
            ParamValue::Value(value) if !self.indirect.contains(name) => Some((name, value)),
            _ => None,
        })
    }

    fn extended(&self, argname: &str, value: ParamValue, id: &str, indirect: bool) -> CallSpec {
        let mut call = self.clone();
        call.params.insert(argname.to_string(), value);
        if indirect {
            call.indirect.insert(argname.to_string());
        }
        call.ids.push(id.to_string());
        call
    }
}

/// Collection-time view of one test function.
pub struct Metafunc<'a> {
    function: &'a str,
    fixturenames: &'a [String],
    markers: &'a [Marker],
    ctx: &'a RunContext,
    calls: Vec<CallSpec>,
    parametrized: BTreeSet<String>,
}

impl<'a> Metafunc<'a> {
    pub fn new(function: &'a str, fixturenames: &'a [String], markers: &'a [Marker], ctx: &'a RunContext) -> Self {
        Self {
            function,
            fixturenames,
            markers,
            ctx,
            calls: Vec::new(),
            parametrized: BTreeSet::new(),
        }
    }

    pub fn function(&self) -> &'a str {
        self.function
    }

    pub fn fixturenames(&self) -> &'a [String] {
        self.fixturenames
    }

    /// Markers in closest-first order (function, class, module).
    pub fn markers(&self) -> &'a [Marker] {
        self.markers
    }

    pub fn ctx(&self) -> &'a RunContext {
        self.ctx
    }

    /// Marker-supplied settings, closest scope winning.
    pub fn sipp_conf(&self) -> SippConf {
        merged_sipp_conf(self.markers)
    }

    pub fn calls(&self) -> &[CallSpec] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<CallSpec> {
        self.calls
    }

    /// Multiply the current calls by `values` for `argname`.
    ///
    /// Without explicit `ids`, scalars are rendered as their value and
    /// everything else as `{argname}{index}`. Duplicate ids get their index
    /// appended.
    pub fn parametrize(
        &mut self,
        argname: &str,
        values: Vec<ParamValue>,
        ids: Option<Vec<String>>,
        indirect: bool,
    ) -> Result<(), HarnessError> {
        if !self.fixturenames.iter().any(|n| n == argname) {
            return Err(self.error(format!("function uses no argument '{argname}'")));
        }
        if self.parametrized.contains(argname) {
            return Err(self.error(format!("duplicate parametrization of '{argname}'")));
        }
        if values.is_empty() {
            return Err(self.error(format!("empty parameter set for '{argname}'")));
        }
        let ids = match ids {
            Some(ids) if ids.len() != values.len() => {
                return Err(self.error(format!(
                    "{} ids given for {} values of '{argname}'",
                    ids.len(),
                    values.len()
                )));
            }
            Some(ids) => ids,
            None => values
                .iter()
                .enumerate()
                .map(|(idx, value)| default_id(argname, idx, value))
                .collect(),
        };
        let ids = disambiguate(ids);

        let base = if self.calls.is_empty() {
            vec![CallSpec::default()]
        } else {
            std::mem::take(&mut self.calls)
        };
        self.calls = base
            .iter()
            .flat_map(|call| {
                values
                    .iter()
                    .zip(&ids)
                    .map(move |(value, id)| call.extended(argname, value.clone(), id, indirect))
            })
            .collect();
        self.parametrized.insert(argname.to_string());
        tracing::trace!(function = self.function, argname, calls = self.calls.len(), "parametrized");
        Ok(())
    }

    fn error(&self, message: String) -> HarnessError {
        HarnessError::Parametrize {
            function: self.function.to_string(),
            message,
        }
    }
}

fn default_id(argname: &str, idx: usize, value: &ParamValue) -> String {
    match value {
        ParamValue::Value(Value::String(s)) => s.clone(),
        ParamValue::Value(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v.to_string(),
        _ => format!("{argname}{idx}"),
    }
}

fn disambiguate(ids: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in &ids {
        *counts.entry(id.as_str()).or_default() += 1;
    }
    let duplicated: BTreeSet<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id.to_string())
        .collect();
    ids.into_iter()
        .enumerate()
        .map(|(idx, id)| if duplicated.contains(&id) { format!("{id}{idx}") } else { id })
        .collect()
}
