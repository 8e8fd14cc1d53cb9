//! Call arguments and argument binding
//!
//! [`ArgumentsDescriptor`] describes the shape of a call site: how many arguments are
//! passed, how many of them are positional, and the names of the named ones. The same
//! descriptor is materialized by the code generator for compiled call sites, and
//! [`bind_arguments`] is the single routine that matches a descriptor against a
//! function's parameter list.

use serde::{Deserialize, Serialize};

use crate::vm::program::{FunctionEntity, ParameterDetails, ParameterKind};
use crate::vm::value::Value;

/// Arguments of a call (implicit arguments excluded)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    /// Positional arguments in call order
    pub positional: Vec<Value>,
    /// Named arguments in call order
    pub named: Vec<(String, Value)>,
}

impl Arguments {
    /// No arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional arguments only
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            named: Vec::new(),
        }
    }

    /// Add a named argument
    pub fn with_named(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named.push((name.into(), value));
        self
    }

    /// Total argument count
    pub fn count(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    /// Names of the named arguments
    pub fn names(&self) -> Vec<String> {
        self.named.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Descriptor of this argument list
    pub fn descriptor(&self) -> ArgumentsDescriptor {
        ArgumentsDescriptor::new(self.positional.len(), self.names())
    }
}

/// Shape of a call site
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgumentsDescriptor {
    /// Total argument count
    pub count: usize,
    /// Positional argument count
    pub positional_count: usize,
    /// Named argument names in call order; the i-th name is argument
    /// `positional_count + i`
    pub names: Vec<String>,
}

impl ArgumentsDescriptor {
    /// Create a descriptor
    pub fn new(positional_count: usize, names: Vec<String>) -> Self {
        Self {
            count: positional_count + names.len(),
            positional_count,
            names,
        }
    }

    /// Descriptor of a call with positional arguments only
    pub fn positional(count: usize) -> Self {
        Self::new(count, Vec::new())
    }

    /// Named argument count
    pub fn named_count(&self) -> usize {
        self.names.len()
    }

    /// Argument index of a named argument
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.positional_count + i)
    }

    /// Whether a call of this shape can bind to `func`
    pub fn matches(&self, func: &FunctionEntity) -> bool {
        let fixed = func.num_fixed_parameters();
        let optional = func.num_optional_positional_parameters();
        if self.positional_count < fixed || self.positional_count > fixed + optional {
            return false;
        }
        self.names.iter().enumerate().all(|(i, name)| {
            !self.names[..i].contains(name)
                && func
                    .parameters
                    .iter()
                    .any(|p| p.kind == ParameterKind::Named && p.name == *name)
        })
    }
}

/// Lay out `args` in parameter declaration order, filling defaults
///
/// Returns `None` when the arguments do not fit the parameter list.
pub fn bind_arguments(
    func: &FunctionEntity,
    details: &[ParameterDetails],
    args: &Arguments,
) -> Option<Vec<Value>> {
    if !args.descriptor().matches(func) {
        return None;
    }
    let mut positional = args.positional.iter();
    let bound = func
        .parameters
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let default = || {
                details
                    .get(i)
                    .and_then(|d| d.default_value.clone())
                    .unwrap_or(Value::Null)
            };
            match param.kind {
                ParameterKind::Required | ParameterKind::OptionalPositional => {
                    positional.next().cloned().unwrap_or_else(default)
                }
                ParameterKind::Named => args
                    .named
                    .iter()
                    .find(|(n, _)| *n == param.name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(default),
            }
        })
        .collect();
    Some(bound)
}
