//! Subtype test caches
//!
//! Type tests the code generator cannot decide with a few inline class-id compares
//! call a stub that consults the test site's cache before doing the full subtype
//! check. The cache is keyed by (instance class, instance type arguments,
//! instantiator type arguments) and only grows.

use parking_lot::RwLock;

use crate::vm::program::{ClassId, Program, Type};

/// One cached answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtypeTestEntry {
    /// Class of the tested instance
    pub class: ClassId,
    /// Type arguments of the tested instance
    pub type_arguments: Option<Vec<Type>>,
    /// Type arguments binding the tested type's parameters
    pub instantiator: Option<Vec<Type>>,
    /// Whether the instance is a subtype
    pub result: bool,
}

/// The cache of one type test site
#[derive(Debug)]
pub struct SubtypeTestCache {
    ty: Type,
    entries: RwLock<Vec<SubtypeTestEntry>>,
}

impl SubtypeTestCache {
    /// Empty cache for tests against `ty`
    pub fn new(ty: Type) -> Self {
        SubtypeTestCache {
            ty,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// The tested type
    pub fn tested_type(&self) -> &Type {
        &self.ty
    }

    /// Cached answer for a key
    pub fn lookup(
        &self,
        class: ClassId,
        type_arguments: Option<&[Type]>,
        instantiator: Option<&[Type]>,
    ) -> Option<bool> {
        self.entries
            .read()
            .iter()
            .find(|e| {
                e.class == class
                    && e.type_arguments.as_deref() == type_arguments
                    && e.instantiator.as_deref() == instantiator
            })
            .map(|e| e.result)
    }

    /// Append an answer; a key already present is left untouched
    pub fn add(
        &self,
        class: ClassId,
        type_arguments: Option<Vec<Type>>,
        instantiator: Option<Vec<Type>>,
        result: bool,
    ) {
        let mut entries = self.entries.write();
        let present = entries.iter().any(|e| {
            e.class == class && e.type_arguments == type_arguments && e.instantiator == instantiator
        });
        if !present {
            entries.push(SubtypeTestEntry {
                class,
                type_arguments,
                instantiator,
                result,
            });
        }
    }

    /// Answer a test, computing and caching it on a miss
    pub fn test(
        &self,
        program: &Program,
        class: ClassId,
        type_arguments: Option<&[Type]>,
        instantiator: Option<&[Type]>,
    ) -> bool {
        if let Some(hit) = self.lookup(class, type_arguments, instantiator) {
            return hit;
        }
        let result = program.is_subtype_of(class, type_arguments, &self.ty, instantiator);
        log::trace!(
            "subtype cache miss: {} against {:?} -> {}",
            program.class(class).name,
            self.ty,
            result
        );
        self.add(
            class,
            type_arguments.map(<[Type]>::to_vec),
            instantiator.map(<[Type]>::to_vec),
            result,
        );
        result
    }

    /// Snapshot of the entries
    pub fn entries(&self) -> Vec<SubtypeTestEntry> {
        self.entries.read().clone()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
