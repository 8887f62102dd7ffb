//! jq expression evaluation over Kubernetes objects

use std::collections::BTreeMap;

use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

use crate::error::{Error, Result};

/// Evaluates query expressions against JSON objects
///
/// Implementations must be pure: the same expression and object always give
/// the same result.
#[cfg_attr(test, automock)]
pub trait QueryEvaluator: Send + Sync {
    /// Evaluate to the first output value, `null` when there is none
    fn evaluate_to_value(&self, expr: &str, obj: &Value) -> Result<Value>;

    /// Evaluate to a string, failing on any other type
    fn evaluate_to_string(&self, expr: &str, obj: &Value) -> Result<String> {
        match self.evaluate_to_value(expr, obj)? {
            Value::String(s) => Ok(s),
            other => Err(Error::query(format!(
                "'{}' evaluated to {} instead of a string",
                expr,
                type_name(&other)
            ))),
        }
    }

    /// Evaluate to a boolean, failing on any other type
    fn evaluate_to_bool(&self, expr: &str, obj: &Value) -> Result<bool> {
        match self.evaluate_to_value(expr, obj)? {
            Value::Bool(b) => Ok(b),
            other => Err(Error::query(format!(
                "'{}' evaluated to {} instead of a boolean",
                expr,
                type_name(&other)
            ))),
        }
    }

    /// Evaluate every expression of a map; the first failure fails the map
    fn evaluate_map_to_values(
        &self,
        exprs: &BTreeMap<String, String>,
        obj: &Value,
    ) -> Result<BTreeMap<String, Value>> {
        exprs
            .iter()
            .map(|(key, expr)| Ok((key.clone(), self.evaluate_to_value(expr, obj)?)))
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// jq evaluator backed by jaq, with the jq standard library loaded
#[derive(Debug, Default, Clone, Copy)]
pub struct JqEvaluator;

impl JqEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Run an expression and collect every output
    pub fn run(&self, expr: &str, obj: &Value) -> Result<Vec<Value>> {
        let mut defs = ParseCtx::new(Vec::new());
        defs.insert_natives(jaq_core::core());
        defs.insert_defs(jaq_std::std());

        let (main, errs) = jaq_parse::parse(expr, jaq_parse::main());
        if !errs.is_empty() {
            return Err(Error::query(format!(
                "failed to parse '{}': {:?}",
                expr, errs
            )));
        }
        let main = main.ok_or_else(|| Error::query(format!("failed to parse '{}'", expr)))?;

        let filter = defs.compile(main);
        if !defs.errs.is_empty() {
            return Err(Error::query(format!(
                "failed to compile '{}': {} undefined symbol(s)",
                expr,
                defs.errs.len()
            )));
        }

        let inputs = RcIter::new(core::iter::empty());
        let outputs = filter.run((Ctx::new([], &inputs), Val::from(obj.clone())));

        let mut values = Vec::new();
        for output in outputs {
            let val = output
                .map_err(|e| Error::query(format!("failed to evaluate '{}': {}", expr, e)))?;
            values.push(Value::from(val));
        }
        Ok(values)
    }
}

impl QueryEvaluator for JqEvaluator {
    fn evaluate_to_value(&self, expr: &str, obj: &Value) -> Result<Value> {
        Ok(self.run(expr, obj)?.into_iter().next().unwrap_or(Value::Null))
    }
}
