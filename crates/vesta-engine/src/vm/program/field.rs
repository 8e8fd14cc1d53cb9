//! Field entities

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use super::function::{NativeBody, Owner};
use super::ids::{FieldId, FunctionId, TokenPos};
use super::types::Type;
use crate::vm::value::Value;

/// Value slot of a static field
#[derive(Debug, Clone)]
pub enum StaticState {
    /// Initializer has not run; reads must go through the implicit getter
    Uninitialized,
    /// Initializer is running
    Initializing,
    /// Holds a value
    Initialized(Value),
}

/// A field
#[derive(Debug)]
pub struct FieldEntity {
    /// Field id
    pub id: FieldId,
    /// Field name
    pub name: String,
    /// Owning class or library
    pub owner: Owner,
    /// Declared type
    pub ty: Type,
    /// Static (or top-level) field
    pub is_static: bool,
    /// `final` field
    pub is_final: bool,
    /// `const` field
    pub is_const: bool,
    /// Declaration position
    pub token_pos: Option<TokenPos>,
    /// Metadata annotations
    pub metadata: Vec<Value>,
    /// Initial value of an instance field in a freshly allocated object
    pub initial_value: Option<Value>,
    /// Implicit getter
    pub getter: Option<FunctionId>,
    /// Implicit setter (absent for final and const fields)
    pub setter: Option<FunctionId>,
    pub(crate) initializer: Option<NativeBody>,
    pub(crate) static_state: RwLock<StaticState>,
    pub(crate) slot: OnceCell<usize>,
}

impl FieldEntity {
    /// Instance slot, assigned when the owning class is finalized
    pub fn slot(&self) -> Option<usize> {
        self.slot.get().copied()
    }

    /// Current static state
    pub fn static_state(&self) -> StaticState {
        self.static_state.read().clone()
    }

    /// Static value if initialized
    pub fn static_value(&self) -> Option<Value> {
        match &*self.static_state.read() {
            StaticState::Initialized(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Whether the static value still needs its initializer
    pub fn is_uninitialized(&self) -> bool {
        matches!(*self.static_state.read(), StaticState::Uninitialized)
    }

    pub(crate) fn store_static(&self, value: Value) {
        *self.static_state.write() = StaticState::Initialized(value);
    }

    /// Field cannot be assigned
    pub fn is_read_only(&self) -> bool {
        self.is_final || self.is_const
    }
}
