//! Runtime values
//!
//! Heap values (instances, closures, lists, types) are reference counted and compare
//! by identity. Scalars compare by value; doubles compare by bit pattern so that
//! `identical(NaN, NaN)` holds the way the language defines it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::program::{ClassId, FunctionId, Type};

/// A runtime value
#[derive(Clone)]
pub enum Value {
    /// The null object
    Null,
    /// Boolean
    Bool(bool),
    /// Small integer
    Int(i64),
    /// Double
    Double(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Class instance
    Instance(Arc<Instance>),
    /// Closure object
    Closure(Arc<Closure>),
    /// Growable list
    List(Arc<RwLock<Vec<Value>>>),
    /// Reified type
    Type(Arc<Type>),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Create a list value
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Instance payload
    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Value::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Closure payload
    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// Identity comparison (`identical` in the language)
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }

    /// Short name of the value's variant, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "String",
            Value::Instance(_) => "Instance",
            Value::Closure(_) => "Closure",
            Value::List(_) => "List",
            Value::Type(_) => "Type",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.identical(other)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Instance(i) => write!(f, "Instance({})", i.class),
            Value::Closure(c) => write!(f, "Closure({})", c.function),
            Value::List(l) => write!(f, "List(len={})", l.read().len()),
            Value::Type(t) => write!(f, "Type({:?})", t),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            other => write!(f, "{:?}", other),
        }
    }
}

// ============================================================================
// Heap objects
// ============================================================================

/// An instance of a user or core class
#[derive(Debug)]
pub struct Instance {
    /// Class of the instance
    pub class: ClassId,
    /// Type arguments; `None` means all `dynamic`
    pub type_arguments: Option<Vec<Type>>,
    fields: RwLock<Vec<Value>>,
}

impl Instance {
    /// Create an instance with `field_count` null-initialized slots
    pub fn new(class: ClassId, type_arguments: Option<Vec<Type>>, field_count: usize) -> Self {
        Self {
            class,
            type_arguments,
            fields: RwLock::new(vec![Value::Null; field_count]),
        }
    }

    /// Read a field slot
    pub fn field(&self, slot: usize) -> Option<Value> {
        self.fields.read().get(slot).cloned()
    }

    /// Write a field slot
    pub fn set_field(&self, slot: usize, value: Value) -> bool {
        match self.fields.write().get_mut(slot) {
            Some(dst) => {
                *dst = value;
                true
            }
            None => false,
        }
    }

    /// Number of field slots
    pub fn field_count(&self) -> usize {
        self.fields.read().len()
    }
}

/// A closure object: a function plus its captured environment
#[derive(Debug)]
pub struct Closure {
    /// Function invoked when the closure is called
    pub function: FunctionId,
    /// Bound receiver for method tear-offs
    pub receiver: Option<Value>,
    /// Captured lexical context
    pub context: Option<Arc<Context>>,
}

impl Closure {
    /// A closure over a lexical context
    pub fn new(function: FunctionId, context: Option<Arc<Context>>) -> Self {
        Self {
            function,
            receiver: None,
            context,
        }
    }

    /// A method tear-off bound to `receiver`
    pub fn tear_off(function: FunctionId, receiver: Option<Value>) -> Self {
        Self {
            function,
            receiver,
            context: None,
        }
    }
}

/// Name of the context slot holding a captured receiver
pub const THIS_VARIABLE: &str = "this";

/// A captured variable in a context
#[derive(Debug, Clone)]
pub struct ContextVariable {
    /// Variable name
    pub name: String,
    /// Current value
    pub value: Value,
}

/// A chain of closure-captured variable slots
#[derive(Debug, Default)]
pub struct Context {
    parent: Option<Arc<Context>>,
    variables: RwLock<Vec<ContextVariable>>,
}

impl Context {
    /// Create a context with the given parent
    pub fn new(parent: Option<Arc<Context>>) -> Self {
        Self {
            parent,
            variables: RwLock::new(Vec::new()),
        }
    }

    /// Create a context with initial variables
    pub fn with_variables(
        parent: Option<Arc<Context>>,
        variables: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        let vars = variables
            .into_iter()
            .map(|(name, value)| ContextVariable { name, value })
            .collect();
        Self {
            parent,
            variables: RwLock::new(vars),
        }
    }

    /// Parent context
    pub fn parent(&self) -> Option<&Arc<Context>> {
        self.parent.as_ref()
    }

    /// Define or overwrite a variable in this context level
    pub fn define(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut vars = self.variables.write();
        match vars.iter_mut().find(|v| v.name == name) {
            Some(var) => var.value = value,
            None => vars.push(ContextVariable { name, value }),
        }
    }

    /// Look up a variable in this level only
    pub fn local(&self, name: &str) -> Option<Value> {
        self.variables
            .read()
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.clone())
    }

    /// Snapshot of this level's variables
    pub fn variables(&self) -> Vec<ContextVariable> {
        self.variables.read().clone()
    }

    /// Number of levels from this context to the outermost one
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = self.parent.as_ref();
        while let Some(ctx) = cur {
            depth += 1;
            cur = ctx.parent.as_ref();
        }
        depth
    }

    /// Context `levels` steps outward from this one
    pub fn ancestor(self: &Arc<Self>, levels: usize) -> Option<Arc<Context>> {
        let mut cur = Arc::clone(self);
        for _ in 0..levels {
            cur = Arc::clone(cur.parent.as_ref()?);
        }
        Some(cur)
    }
}
