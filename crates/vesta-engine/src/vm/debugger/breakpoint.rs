//! Breakpoint bookkeeping
//!
//! A [`SourceBreakpoint`] is what the user asked for: a function and a token
//! position. Each compiled code object of that function gets its own
//! [`CodeBreakpoint`] at the matching pc descriptor. Breakpoints requested at
//! different positions can resolve to the same stop, so a code breakpoint may have
//! several owners. Stepping installs code breakpoints with no owner at all; those
//! are internal and disappear on the next pause.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::jit::code_space::CodeId;
use crate::vm::program::{FunctionId, TokenPos};

/// Stable id of a source breakpoint; ids are never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BreakpointId(pub u32);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bp#{}", self.0)
    }
}

/// A user breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceBreakpoint {
    /// Id
    pub id: BreakpointId,
    /// Function the breakpoint is in
    pub function: FunctionId,
    /// Requested position
    pub requested_pos: TokenPos,
    /// Position of the pc descriptor it resolved to
    pub resolved_pos: Option<TokenPos>,
    /// Whether hitting it pauses
    pub enabled: bool,
    /// Script URL
    pub url: String,
    /// Line of the resolved position, or of the requested one while pending
    pub line: usize,
}

impl SourceBreakpoint {
    /// Resolved against compiled code
    pub fn is_resolved(&self) -> bool {
        self.resolved_pos.is_some()
    }

    /// Position used for matching: the resolved one, else the requested one
    pub fn position(&self) -> TokenPos {
        self.resolved_pos.unwrap_or(self.requested_pos)
    }
}

/// Physical location of a code breakpoint
pub type CodeLocation = (CodeId, u32);

/// A patch site in installed code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBreakpoint {
    /// Code object
    pub code: CodeId,
    /// Return address offset of the patched call
    pub pc_offset: u32,
    /// Function of the code
    pub function: FunctionId,
    /// Owning source breakpoints, ordered by id
    pub sources: Vec<BreakpointId>,
    /// Installed by stepping
    pub internal: bool,
    /// Original bytes while the patch is applied
    pub saved_bytes: Option<Vec<u8>>,
}

impl CodeBreakpoint {
    /// Location key
    pub fn location(&self) -> CodeLocation {
        (self.code, self.pc_offset)
    }

    /// Whether the breakpoint call is currently patched in
    pub fn is_patched(&self) -> bool {
        self.saved_bytes.is_some()
    }

    /// Whether `id` is one of the owners
    pub fn is_owned_by(&self, id: BreakpointId) -> bool {
        self.sources.contains(&id)
    }
}

/// Source breakpoints, code breakpoints and the multimap between them
#[derive(Debug, Default)]
pub(crate) struct BreakpointTable {
    sources: FxHashMap<BreakpointId, SourceBreakpoint>,
    code: FxHashMap<CodeLocation, CodeBreakpoint>,
    by_source: FxHashMap<BreakpointId, FxHashSet<CodeLocation>>,
    next_id: u32,
}

impl BreakpointTable {
    pub(crate) fn next_id(&mut self) -> BreakpointId {
        self.next_id += 1;
        BreakpointId(self.next_id)
    }

    pub(crate) fn insert_source(&mut self, bp: SourceBreakpoint) {
        self.by_source.entry(bp.id).or_default();
        self.sources.insert(bp.id, bp);
    }

    pub(crate) fn source(&self, id: BreakpointId) -> Option<&SourceBreakpoint> {
        self.sources.get(&id)
    }

    pub(crate) fn source_mut(&mut self, id: BreakpointId) -> Option<&mut SourceBreakpoint> {
        self.sources.get_mut(&id)
    }

    /// Source breakpoints ordered by id
    pub(crate) fn sources(&self) -> Vec<SourceBreakpoint> {
        let mut all: Vec<SourceBreakpoint> = self.sources.values().cloned().collect();
        all.sort_by_key(|bp| bp.id);
        all
    }

    pub(crate) fn sources_for(&self, function: FunctionId) -> Vec<BreakpointId> {
        let mut ids: Vec<BreakpointId> = self
            .sources
            .values()
            .filter(|bp| bp.function == function)
            .map(|bp| bp.id)
            .collect();
        ids.sort();
        ids
    }

    /// An existing breakpoint of `function` at `pos`
    pub(crate) fn find_source(&self, function: FunctionId, pos: TokenPos) -> Option<BreakpointId> {
        self.sources
            .values()
            .find(|bp| bp.function == function && (bp.requested_pos == pos || bp.resolved_pos == Some(pos)))
            .map(|bp| bp.id)
    }

    pub(crate) fn remove_source(&mut self, id: BreakpointId) -> Option<(SourceBreakpoint, Vec<CodeLocation>)> {
        let bp = self.sources.remove(&id)?;
        let mut locations: Vec<CodeLocation> = self
            .by_source
            .remove(&id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        locations.sort();
        Some((bp, locations))
    }

    pub(crate) fn locations_of(&self, id: BreakpointId) -> Vec<CodeLocation> {
        let mut locations: Vec<CodeLocation> = self
            .by_source
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        locations.sort();
        locations
    }

    pub(crate) fn code(&self, location: CodeLocation) -> Option<&CodeBreakpoint> {
        self.code.get(&location)
    }

    pub(crate) fn code_mut(&mut self, location: CodeLocation) -> Option<&mut CodeBreakpoint> {
        self.code.get_mut(&location)
    }

    /// Code breakpoint at `location`, creating an unpatched one if absent
    pub(crate) fn code_entry(&mut self, location: CodeLocation, function: FunctionId) -> &mut CodeBreakpoint {
        self.code.entry(location).or_insert_with(|| CodeBreakpoint {
            code: location.0,
            pc_offset: location.1,
            function,
            sources: Vec::new(),
            internal: false,
            saved_bytes: None,
        })
    }

    /// Add source breakpoint `id` to the owners of `location`
    pub(crate) fn link(&mut self, id: BreakpointId, location: CodeLocation) {
        if let Some(code) = self.code.get_mut(&location) {
            if let Err(at) = code.sources.binary_search(&id) {
                code.sources.insert(at, id);
            }
        }
        self.by_source.entry(id).or_default().insert(location);
    }

    /// Drop `id` from the owners of `location`; other owners keep it
    pub(crate) fn unlink(&mut self, id: BreakpointId, location: CodeLocation) {
        if let Some(code) = self.code.get_mut(&location) {
            code.sources.retain(|owner| *owner != id);
        }
        if let Some(set) = self.by_source.get_mut(&id) {
            set.remove(&location);
        }
    }

    pub(crate) fn remove_code(&mut self, location: CodeLocation) -> Option<CodeBreakpoint> {
        let code = self.code.remove(&location)?;
        for id in &code.sources {
            if let Some(set) = self.by_source.get_mut(id) {
                set.remove(&location);
            }
        }
        Some(code)
    }

    pub(crate) fn code_locations(&self) -> Vec<CodeLocation> {
        let mut all: Vec<CodeLocation> = self.code.keys().copied().collect();
        all.sort();
        all
    }

    pub(crate) fn locations_in(&self, code: CodeId) -> Vec<CodeLocation> {
        let mut all: Vec<CodeLocation> = self.code.keys().filter(|l| l.0 == code).copied().collect();
        all.sort();
        all
    }

    pub(crate) fn internal_locations(&self) -> Vec<CodeLocation> {
        let mut all: Vec<CodeLocation> = self
            .code
            .values()
            .filter(|c| c.internal)
            .map(CodeBreakpoint::location)
            .collect();
        all.sort();
        all
    }

    /// First enabled owner of the code breakpoint at `location`
    pub(crate) fn enabled_owner(&self, location: CodeLocation) -> Option<BreakpointId> {
        self.code.get(&location).and_then(|c| {
            c.sources
                .iter()
                .copied()
                .find(|id| self.sources.get(id).is_some_and(|bp| bp.enabled))
        })
    }

    /// Whether a code breakpoint should have its patch applied
    pub(crate) fn wants_patch(&self, location: CodeLocation) -> bool {
        self.code.get(&location).is_some_and(|c| c.internal) || self.enabled_owner(location).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(table: &mut BreakpointTable, function: u32, pos: u32) -> BreakpointId {
        let id = table.next_id();
        table.insert_source(SourceBreakpoint {
            id,
            function: FunctionId(function),
            requested_pos: TokenPos(pos),
            resolved_pos: None,
            enabled: true,
            url: "file:///a.vs".to_string(),
            line: 1,
        });
        id
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut table = BreakpointTable::default();
        let a = source(&mut table, 0, 10);
        table.remove_source(a);
        let b = source(&mut table, 0, 10);
        assert_ne!(a, b);
        assert_eq!(table.find_source(FunctionId(0), TokenPos(10)), Some(b));
    }

    #[test]
    fn test_link_and_unlink() {
        let mut table = BreakpointTable::default();
        let id = source(&mut table, 1, 5);
        for loc in [(CodeId(0), 20), (CodeId(1), 44)] {
            table.code_entry(loc, FunctionId(1));
            table.link(id, loc);
        }
        assert_eq!(table.locations_of(id), vec![(CodeId(0), 20), (CodeId(1), 44)]);
        assert!(table.wants_patch((CodeId(0), 20)));

        table.source_mut(id).unwrap().enabled = false;
        assert!(!table.wants_patch((CodeId(0), 20)));

        table.remove_code((CodeId(1), 44));
        assert_eq!(table.locations_of(id), vec![(CodeId(0), 20)]);

        let (_, locations) = table.remove_source(id).unwrap();
        assert_eq!(locations, vec![(CodeId(0), 20)]);
        assert!(table.source(id).is_none());
    }

    #[test]
    fn test_shared_location_keeps_remaining_owner() {
        let mut table = BreakpointTable::default();
        let a = source(&mut table, 1, 5);
        let b = source(&mut table, 1, 9);
        let loc = (CodeId(0), 20);
        table.code_entry(loc, FunctionId(1));
        table.link(b, loc);
        table.link(a, loc);
        table.link(a, loc);
        assert_eq!(table.code(loc).unwrap().sources, vec![a, b]);

        table.source_mut(a).unwrap().enabled = false;
        assert_eq!(table.enabled_owner(loc), Some(b));

        table.remove_source(b);
        table.unlink(b, loc);
        assert_eq!(table.code(loc).unwrap().sources, vec![a]);
        assert_eq!(table.locations_of(a), vec![loc]);
        assert!(!table.wants_patch(loc));

        table.source_mut(a).unwrap().enabled = true;
        assert!(table.wants_patch(loc));
    }

    #[test]
    fn test_internal_breakpoints_patch_without_source() {
        let mut table = BreakpointTable::default();
        table.code_entry((CodeId(2), 8), FunctionId(3)).internal = true;
        assert!(table.wants_patch((CodeId(2), 8)));
        assert_eq!(table.internal_locations(), vec![(CodeId(2), 8)]);
        assert_eq!(table.locations_in(CodeId(2)).len(), 1);
        assert!(table.locations_in(CodeId(3)).is_empty());
    }
}
