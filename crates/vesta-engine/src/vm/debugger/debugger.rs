//! The per-isolate debugger
//!
//! Breakpoints are calls to the breakpoint stub patched over the call or return
//! sequence a pc descriptor points at. The runtime reports each hit through
//! [`Debugger::signal_breakpoint_reached`] with its raw frames; the debugger decides
//! whether that is a pause and, if so, delivers an event to the handler. The
//! handler chooses how to resume through [`Debugger::set_resume_action`].
//!
//! Lock order is debugger state, then code space. The handler is always called
//! with no debugger lock held.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use super::breakpoint::{BreakpointId, BreakpointTable, CodeBreakpoint, CodeLocation, SourceBreakpoint};
use super::error::{DebuggerError, DebuggerResult};
use super::event::{DebuggerEvent, EventHandler};
use super::object_cache::{ObjectCache, ObjectId};
use super::stack::{DebuggerStackTrace, RawFrame};
use super::stepping::{ExceptionPauseInfo, ResumeAction, SteppingState};
use crate::config::DebuggerOptions;
use crate::jit::backend::traits::StubKind;
use crate::jit::code_space::{CodeEntry, CodeId, CodeSpace};
use crate::jit::descriptors::PATCHABLE_CALL_LEN;
use crate::vm::invoke::Invoker;
use crate::vm::program::{Accessor, ClassId, FieldId, FunctionEntity, FunctionId, LibraryId, Program, TokenPos};
use crate::vm::value::Value;

struct DebuggerState {
    breakpoints: BreakpointTable,
    stepping: SteppingState,
    exception_pause: ExceptionPauseInfo,
    // Functions waiting for code to get a one-time entry break
    entry_breaks: FxHashSet<FunctionId>,
}

/// Breakpoints, stepping and stack inspection for one isolate
pub struct Debugger {
    program: Arc<Program>,
    code_space: Arc<CodeSpace>,
    options: DebuggerOptions,
    state: Mutex<DebuggerState>,
    handler: RwLock<Option<Arc<EventHandler>>>,
    objects: ObjectCache,
    ignore_count: AtomicUsize,
    in_event_notification: AtomicBool,
    single_step: AtomicBool,
    pause_stack: Mutex<Option<DebuggerStackTrace>>,
}

impl fmt::Debug for Debugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Debugger")
            .field("breakpoints", &state.breakpoints.sources().len())
            .field("resume_action", &state.stepping.action)
            .field("exception_pause", &state.exception_pause)
            .field("paused", &self.in_event_notification.load(Ordering::Relaxed))
            .finish()
    }
}

/// Scoped suppression of breakpoints and pauses; see [`Debugger::ignore_breakpoints`]
#[must_use = "breakpoints are only ignored while the guard is alive"]
pub struct IgnoreBreakpoints<'a> {
    debugger: &'a Debugger,
}

impl Drop for IgnoreBreakpoints<'_> {
    fn drop(&mut self) {
        self.debugger.ignore_count.fetch_sub(1, Ordering::AcqRel);
    }
}

// Marks an event delivery; cleared on every exit path, unwinding included
struct NotificationScope<'a> {
    debugger: &'a Debugger,
}

impl Drop for NotificationScope<'_> {
    fn drop(&mut self) {
        *self.debugger.pause_stack.lock() = None;
        self.debugger.in_event_notification.store(false, Ordering::Release);
    }
}

impl Debugger {
    /// Create a debugger over an isolate's program and code space
    pub fn new(program: Arc<Program>, code_space: Arc<CodeSpace>, options: DebuggerOptions) -> Self {
        let exception_pause = options.exception_pause;
        Debugger {
            program,
            code_space,
            options,
            state: Mutex::new(DebuggerState {
                breakpoints: BreakpointTable::default(),
                stepping: SteppingState::default(),
                exception_pause,
                entry_breaks: FxHashSet::default(),
            }),
            handler: RwLock::new(None),
            objects: ObjectCache::new(),
            ignore_count: AtomicUsize::new(0),
            in_event_notification: AtomicBool::new(false),
            single_step: AtomicBool::new(false),
            pause_stack: Mutex::new(None),
        }
    }

    /// Options
    pub fn options(&self) -> &DebuggerOptions {
        &self.options
    }

    /// Program being debugged
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Install the event handler, replacing any previous one
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(&Debugger, &DebuggerEvent) + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Remove the event handler
    pub fn clear_event_handler(&self) {
        *self.handler.write() = None;
    }

    fn deliver(&self, event: &DebuggerEvent) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(self, event);
        }
    }

    /// Enter a pause: reset stepping, drop internal breakpoints and hand the event
    /// to the handler
    fn pause(&self, event: DebuggerEvent) -> bool {
        {
            let mut state = self.state.lock();
            state.stepping.reset();
            self.remove_internal_breakpoints(&mut state);
        }
        self.single_step.store(false, Ordering::Release);
        *self.pause_stack.lock() = event.stack().cloned();
        self.in_event_notification.store(true, Ordering::Release);
        let _scope = NotificationScope { debugger: self };
        log::debug!("pause: {}", event.name());
        self.deliver(&event);
        true
    }

    fn can_pause(&self) -> bool {
        !self.is_ignoring_breakpoints() && !self.in_event_notification.load(Ordering::Acquire)
    }

    /// Suppress breakpoints and pauses until the guard is dropped; used around
    /// reflective calls into user code
    pub fn ignore_breakpoints(&self) -> IgnoreBreakpoints<'_> {
        self.ignore_count.fetch_add(1, Ordering::AcqRel);
        IgnoreBreakpoints { debugger: self }
    }

    /// Whether an [`IgnoreBreakpoints`] guard is alive
    pub fn is_ignoring_breakpoints(&self) -> bool {
        self.ignore_count.load(Ordering::Acquire) > 0
    }

    /// Whether an event is being delivered right now
    pub fn is_paused(&self) -> bool {
        self.in_event_notification.load(Ordering::Acquire)
    }

    /// Report isolate start-up
    pub fn notify_isolate_created(&self, isolate: &str) {
        self.deliver(&DebuggerEvent::IsolateCreated {
            isolate: isolate.to_string(),
        });
    }

    /// Report isolate shutdown
    pub fn notify_isolate_shutdown(&self, isolate: &str) {
        {
            let mut state = self.state.lock();
            state.stepping.reset();
            self.remove_internal_breakpoints(&mut state);
        }
        self.deliver(&DebuggerEvent::IsolateShutdown {
            isolate: isolate.to_string(),
        });
    }

    // ========================================================================
    // Code
    // ========================================================================

    fn valid_code_of(&self, function: FunctionId) -> Vec<Arc<CodeEntry>> {
        self.code_space
            .entries()
            .into_iter()
            .filter(|e| e.function() == function && e.is_valid())
            .collect()
    }

    fn breakpoint_bytes() -> Vec<u8> {
        CodeSpace::call_sequence(CodeSpace::stub_address(StubKind::Breakpoint))
    }

    /// Apply or lift the patch at `location` to match what the table wants, and
    /// drop code breakpoints nothing refers to any more
    fn sync_patch(&self, state: &mut DebuggerState, location: CodeLocation) -> DebuggerResult<()> {
        let wants = state.breakpoints.wants_patch(location);
        let Some(bp) = state.breakpoints.code_mut(location) else {
            return Ok(());
        };
        let offset = (bp.pc_offset - PATCHABLE_CALL_LEN) as usize;
        match (wants, bp.saved_bytes.take()) {
            (true, None) => {
                let saved = self.code_space.patch(location.0, offset, &Self::breakpoint_bytes())?;
                bp.saved_bytes = Some(saved);
                log::trace!("breakpoint patched at {}+{:#x}", location.0, location.1);
            }
            (false, Some(saved)) => {
                let expected = self.options.verify_patches.then(Self::breakpoint_bytes);
                if let Err(err) = self.code_space.restore(location.0, offset, &saved, expected.as_deref()) {
                    bp.saved_bytes = Some(saved);
                    return Err(err.into());
                }
                log::trace!("breakpoint lifted at {}+{:#x}", location.0, location.1);
            }
            (_, saved) => bp.saved_bytes = saved,
        }
        let unused = !bp.internal && bp.sources.is_empty();
        if unused {
            state.breakpoints.remove_code(location);
        }
        Ok(())
    }

    fn remove_internal_breakpoints(&self, state: &mut DebuggerState) {
        for location in state.breakpoints.internal_locations() {
            if let Some(bp) = state.breakpoints.code_mut(location) {
                bp.internal = false;
            }
            if let Err(err) = self.sync_patch(state, location) {
                log::warn!("failed to remove stepping breakpoint at {}+{:#x}: {}", location.0, location.1, err);
            }
        }
    }

    /// Unlink every code breakpoint in `code`; called before the code goes away
    pub fn notify_code_invalidated(&self, code: CodeId) {
        let mut state = self.state.lock();
        for location in state.breakpoints.locations_in(code) {
            if let Some(bp) = state.breakpoints.remove_code(location) {
                if let Some(saved) = bp.saved_bytes {
                    let offset = (bp.pc_offset - PATCHABLE_CALL_LEN) as usize;
                    if let Err(err) = self.code_space.restore(code, offset, &saved, None) {
                        log::warn!("failed to restore {}+{:#x}: {}", code, bp.pc_offset, err);
                    }
                }
            }
        }
        log::debug!("unlinked breakpoints of {}", code);
    }

    /// Invalidate all optimized code so breakpoints and stepping only deal with
    /// unoptimized code; returns the number of code objects invalidated
    pub fn deoptimize_world(&self) -> usize {
        let invalidated = self.code_space.invalidate_optimized();
        for code in &invalidated {
            self.notify_code_invalidated(*code);
        }
        if !invalidated.is_empty() {
            log::debug!("deoptimized {} code objects", invalidated.len());
        }
        invalidated.len()
    }

    /// Install breakpoints into code newly compiled for `function`, resolving
    /// pending ones
    pub fn notify_compilation(&self, function: FunctionId) -> DebuggerResult<()> {
        let codes = self.valid_code_of(function);
        if codes.is_empty() {
            return Ok(());
        }
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            for id in state.breakpoints.sources_for(function) {
                let pending = state.breakpoints.source(id).filter(|bp| !bp.is_resolved()).map(|bp| bp.requested_pos);
                if let Some(requested) = pending {
                    match self.resolve_position(&codes, function, requested) {
                        Ok(pos) => events.push(self.mark_resolved(&mut state, id, function, pos)),
                        Err(err) => {
                            log::warn!("breakpoint {} stays pending: {}", id, err);
                            continue;
                        }
                    }
                }
                self.install_code_breakpoints(&mut state, id, &codes)?;
            }
            if state.entry_breaks.remove(&function) {
                self.install_entry_break(&mut state, function, &codes)?;
            }
        }
        for event in &events {
            self.deliver(event);
        }
        Ok(())
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    fn check_function(&self, function: FunctionId) -> DebuggerResult<&FunctionEntity> {
        if function.index() >= self.program.functions().len() {
            return Err(DebuggerError::UnknownFunction(function.to_string()));
        }
        if !self.program.is_debuggable(function) {
            return Err(DebuggerError::NotDebuggable(self.program.qualified_function_name(function)));
        }
        Ok(self.program.function(function))
    }

    /// Earliest debugger stop at or after `requested` within the function
    fn resolve_position(
        &self,
        codes: &[Arc<CodeEntry>],
        function: FunctionId,
        requested: TokenPos,
    ) -> DebuggerResult<TokenPos> {
        let end = self.program.function(function).end_token_pos;
        codes
            .iter()
            .flat_map(|c| c.compiled().pc_descriptors.iter())
            .filter(|d| d.is_debugger_stop())
            .filter_map(|d| d.token_pos)
            .filter(|pos| *pos >= requested && end.map_or(true, |e| *pos <= e))
            .min()
            .ok_or_else(|| {
                DebuggerError::UnresolvedLocation(format!(
                    "{} at {}",
                    self.program.qualified_function_name(function),
                    requested
                ))
            })
    }

    fn line_of(&self, function: FunctionId, pos: TokenPos) -> (String, usize) {
        match self.program.function_script(function) {
            Some(script) => (script.url.clone(), script.line_number(pos)),
            None => (String::new(), 0),
        }
    }

    fn mark_resolved(
        &self,
        state: &mut DebuggerState,
        id: BreakpointId,
        function: FunctionId,
        pos: TokenPos,
    ) -> DebuggerEvent {
        let (url, line) = self.line_of(function, pos);
        if let Some(bp) = state.breakpoints.source_mut(id) {
            bp.resolved_pos = Some(pos);
            bp.line = line;
        }
        log::debug!("breakpoint {} resolved to {}:{}", id, url, line);
        DebuggerEvent::BreakpointResolved {
            breakpoint: id,
            function,
            token_pos: pos,
            url,
            line,
        }
    }

    /// Code breakpoints for every stop of a resolved source breakpoint
    fn install_code_breakpoints(
        &self,
        state: &mut DebuggerState,
        id: BreakpointId,
        codes: &[Arc<CodeEntry>],
    ) -> DebuggerResult<()> {
        let Some((function, pos)) = state
            .breakpoints
            .source(id)
            .and_then(|bp| bp.resolved_pos.map(|pos| (bp.function, pos)))
        else {
            return Ok(());
        };
        for code in codes {
            for desc in &code.compiled().pc_descriptors {
                if desc.is_debugger_stop() && desc.token_pos == Some(pos) {
                    let location = (code.id(), desc.pc_offset);
                    state.breakpoints.code_entry(location, function);
                    state.breakpoints.link(id, location);
                    self.sync_patch(state, location)?;
                }
            }
        }
        Ok(())
    }

    fn set_breakpoint(&self, function: FunctionId, requested: TokenPos) -> DebuggerResult<BreakpointId> {
        self.deoptimize_world();
        let codes = self.valid_code_of(function);
        let resolved = if codes.is_empty() {
            None
        } else {
            Some(self.resolve_position(&codes, function, requested)?)
        };

        let (id, event) = {
            let mut state = self.state.lock();
            let existing = state
                .breakpoints
                .find_source(function, requested)
                .or_else(|| resolved.and_then(|pos| state.breakpoints.find_source(function, pos)));
            if let Some(existing) = existing {
                return Ok(existing);
            }

            let id = state.breakpoints.next_id();
            let (url, line) = self.line_of(function, requested);
            state.breakpoints.insert_source(SourceBreakpoint {
                id,
                function,
                requested_pos: requested,
                resolved_pos: None,
                enabled: true,
                url,
                line,
            });
            match resolved {
                Some(pos) => {
                    let event = self.mark_resolved(&mut state, id, function, pos);
                    if let Err(err) = self.install_code_breakpoints(&mut state, id, &codes) {
                        self.discard_source(&mut state, id);
                        return Err(err);
                    }
                    (id, Some(event))
                }
                None => {
                    log::debug!("breakpoint {} pending until {} is compiled", id, function);
                    (id, None)
                }
            }
        };
        if let Some(event) = &event {
            self.deliver(event);
        }
        Ok(id)
    }

    fn discard_source(&self, state: &mut DebuggerState, id: BreakpointId) {
        if let Some((_, locations)) = state.breakpoints.remove_source(id) {
            for location in locations {
                state.breakpoints.unlink(id, location);
                if let Err(err) = self.sync_patch(state, location) {
                    log::warn!("failed to lift breakpoint {} at {}+{:#x}: {}", id, location.0, location.1, err);
                }
            }
        }
    }

    /// Break at the first stop of a function
    pub fn set_breakpoint_at_entry(&self, function: FunctionId) -> DebuggerResult<BreakpointId> {
        let func = self.check_function(function)?;
        let pos = func
            .token_pos
            .ok_or_else(|| DebuggerError::NotDebuggable(self.program.qualified_function_name(function)))?;
        self.set_breakpoint(function, pos)
    }

    /// Break at the first stop on or after a line of a script
    pub fn set_breakpoint_at_line(&self, url: &str, line: usize) -> DebuggerResult<BreakpointId> {
        let script = self
            .program
            .script_by_url(url)
            .ok_or_else(|| DebuggerError::UnknownScript(url.to_string()))?;
        let unresolved = || DebuggerError::UnresolvedLocation(format!("{}:{}", url, line));
        let (first, last) = script.line_range(line).ok_or_else(unresolved)?;

        // The function containing the line start, else the first one starting on it
        let function = self.program.innermost_function_at(script.id, first).or_else(|| {
            self.program
                .functions_in_script(script.id)
                .into_iter()
                .filter(|&f| self.program.is_debuggable(f))
                .filter(|&f| self.program.function(f).token_pos.is_some_and(|p| first <= p && p <= last))
                .min_by_key(|&f| self.program.function(f).token_pos)
        });
        let function = function.ok_or_else(unresolved)?;
        let start = self.program.function(function).token_pos.unwrap_or(first);
        self.set_breakpoint(function, first.max(start))
    }

    /// Pause the next time `function` is entered; the break is internal, so it is
    /// gone after the next pause
    pub fn one_time_break_at_entry(&self, function: FunctionId) -> DebuggerResult<()> {
        self.check_function(function)?;
        self.deoptimize_world();
        let codes = self.valid_code_of(function);
        let mut state = self.state.lock();
        if codes.is_empty() {
            state.entry_breaks.insert(function);
            return Ok(());
        }
        self.install_entry_break(&mut state, function, &codes)
    }

    fn install_entry_break(
        &self,
        state: &mut DebuggerState,
        function: FunctionId,
        codes: &[Arc<CodeEntry>],
    ) -> DebuggerResult<()> {
        let start = self
            .program
            .function(function)
            .token_pos
            .unwrap_or(TokenPos(0));
        let pos = self.resolve_position(codes, function, start)?;
        for code in codes {
            for desc in &code.compiled().pc_descriptors {
                if desc.is_debugger_stop() && desc.token_pos == Some(pos) {
                    let location = (code.id(), desc.pc_offset);
                    state.breakpoints.code_entry(location, function).internal = true;
                    self.sync_patch(state, location)?;
                }
            }
        }
        Ok(())
    }

    /// Remove a breakpoint; other breakpoints and stepping breakpoints at the same
    /// locations stay
    pub fn remove_breakpoint(&self, id: BreakpointId) -> DebuggerResult<()> {
        let mut state = self.state.lock();
        let (bp, locations) = state
            .breakpoints
            .remove_source(id)
            .ok_or(DebuggerError::UnknownBreakpoint(id))?;
        for location in locations {
            state.breakpoints.unlink(id, location);
            self.sync_patch(&mut state, location)?;
        }
        log::debug!("removed breakpoint {} in {}", id, self.program.qualified_function_name(bp.function));
        Ok(())
    }

    /// Enable or disable a breakpoint without forgetting it
    pub fn set_breakpoint_enabled(&self, id: BreakpointId, enabled: bool) -> DebuggerResult<()> {
        let mut state = self.state.lock();
        let bp = state
            .breakpoints
            .source_mut(id)
            .ok_or(DebuggerError::UnknownBreakpoint(id))?;
        bp.enabled = enabled;
        for location in state.breakpoints.locations_of(id) {
            self.sync_patch(&mut state, location)?;
        }
        Ok(())
    }

    /// Breakpoint by id
    pub fn breakpoint_by_id(&self, id: BreakpointId) -> Option<SourceBreakpoint> {
        self.state.lock().breakpoints.source(id).cloned()
    }

    /// All breakpoints, ordered by id
    pub fn breakpoints(&self) -> Vec<SourceBreakpoint> {
        self.state.lock().breakpoints.sources()
    }

    /// All code breakpoints, internal ones included
    pub fn code_breakpoints(&self) -> Vec<CodeBreakpoint> {
        let state = self.state.lock();
        state
            .breakpoints
            .code_locations()
            .into_iter()
            .filter_map(|l| state.breakpoints.code(l).cloned())
            .collect()
    }

    /// Code breakpoints owned by a breakpoint
    pub fn code_breakpoints_of(&self, id: BreakpointId) -> Vec<CodeBreakpoint> {
        let state = self.state.lock();
        state
            .breakpoints
            .locations_of(id)
            .into_iter()
            .filter_map(|l| state.breakpoints.code(l).cloned())
            .collect()
    }

    /// Whether a breakpoint call is patched in at a return address
    pub fn has_breakpoint(&self, code: CodeId, pc_offset: u32) -> bool {
        self.state
            .lock()
            .breakpoints
            .code((code, pc_offset))
            .is_some_and(CodeBreakpoint::is_patched)
    }

    // ========================================================================
    // Pausing and stepping
    // ========================================================================

    /// Current resume action
    pub fn resume_action(&self) -> ResumeAction {
        self.state.lock().stepping.action
    }

    /// Choose how execution continues; stepping requests made during a pause are
    /// relative to the paused frame
    pub fn set_resume_action(&self, action: ResumeAction) -> DebuggerResult<()> {
        match action {
            ResumeAction::Continue => {
                let mut state = self.state.lock();
                state.stepping.reset();
                self.remove_internal_breakpoints(&mut state);
                self.single_step.store(false, Ordering::Release);
            }
            ResumeAction::SingleStep => {
                self.state.lock().stepping = SteppingState { action, height: None };
                self.single_step.store(true, Ordering::Release);
            }
            ResumeAction::StepOver | ResumeAction::StepOut => {
                self.deoptimize_world();
                let stack = self.pause_stack.lock().clone();
                let mut state = self.state.lock();
                self.single_step.store(false, Ordering::Release);
                let Some(stack) = stack else {
                    state.stepping = SteppingState { action, height: None };
                    return Ok(());
                };
                let Some(top) = stack.top() else {
                    state.stepping = SteppingState { action, height: None };
                    return Ok(());
                };
                state.stepping = SteppingState {
                    action,
                    height: Some(stack.height_of(top)),
                };
                if action == ResumeAction::StepOver {
                    self.instrument_function(&mut state, top.function())?;
                }
                // The nearest debuggable caller, past any hidden trampoline frames
                if let Some(caller) = stack.frame(1) {
                    self.instrument_function(&mut state, caller.function())?;
                }
            }
        }
        log::debug!("resume action {:?}", action);
        Ok(())
    }

    /// Internal breakpoints at every stop of a function's code
    fn instrument_function(&self, state: &mut DebuggerState, function: FunctionId) -> DebuggerResult<()> {
        for code in self.valid_code_of(function) {
            for desc in code.compiled().pc_descriptors.iter().filter(|d| d.is_debugger_stop()) {
                let location = (code.id(), desc.pc_offset);
                state.breakpoints.code_entry(location, function).internal = true;
                self.sync_patch(state, location)?;
            }
        }
        Ok(())
    }

    /// A breakpoint call was hit; `stack[0]` is the frame that made it. Returns
    /// whether execution paused.
    pub fn signal_breakpoint_reached(&self, stack: &[RawFrame]) -> DebuggerResult<bool> {
        if !self.can_pause() {
            return Ok(false);
        }
        let Some((entry, pc_offset)) = stack.first().and_then(|top| self.code_space.lookup_pc(top.pc)) else {
            return Ok(false);
        };
        let (user, internal, stepping) = {
            let state = self.state.lock();
            let location = (entry.id(), pc_offset);
            let Some(bp) = state.breakpoints.code(location) else {
                return Ok(false);
            };
            let user = state.breakpoints.enabled_owner(location);
            (user, bp.internal, state.stepping)
        };

        let trace = DebuggerStackTrace::build(&self.program, &self.code_space, stack);
        let Some(frame) = trace.top().filter(|f| f.depth() == 0) else {
            return Ok(false);
        };
        let step_stop = internal && stepping.stops_at(trace.height_of(frame));
        if user.is_none() && !step_stop {
            return Ok(false);
        }
        log::debug!(
            "{} reached in {} at line {:?}",
            user.map_or_else(|| "step".to_string(), |id| id.to_string()),
            frame.function_name(),
            frame.line_number()
        );
        Ok(self.pause(DebuggerEvent::BreakpointReached {
            breakpoint: user,
            stack: trace,
        }))
    }

    /// Poll from a debug step check; pauses when single stepping
    pub fn debug_step_check(&self, stack: &[RawFrame]) -> bool {
        if !self.can_pause() || !self.single_step.load(Ordering::Acquire) {
            return false;
        }
        let trace = DebuggerStackTrace::build(&self.program, &self.code_space, stack);
        if !trace.top().is_some_and(|f| f.depth() == 0) {
            return false;
        }
        self.pause(DebuggerEvent::BreakpointReached {
            breakpoint: None,
            stack: trace,
        })
    }

    /// An exception is being thrown; pauses according to the exception policy
    pub fn signal_exception_thrown(&self, stack: &[RawFrame], exception: &Value) -> bool {
        if !self.can_pause() {
            return false;
        }
        let policy = self.state.lock().exception_pause;
        if policy == ExceptionPauseInfo::NoPauseOnExceptions {
            return false;
        }
        let trace = DebuggerStackTrace::build(&self.program, &self.code_space, stack);
        if trace.is_empty() {
            return false;
        }
        let handled = trace.handler_frame(exception).is_some();
        if !policy.should_pause(handled) {
            return false;
        }
        self.pause(DebuggerEvent::ExceptionThrown {
            exception: exception.clone(),
            stack: trace,
        })
    }

    /// Pause on an interrupt request
    pub fn interrupt(&self, stack: &[RawFrame]) -> bool {
        if !self.can_pause() {
            return false;
        }
        let trace = DebuggerStackTrace::build(&self.program, &self.code_space, stack);
        self.pause(DebuggerEvent::IsolateInterrupted { stack: trace })
    }

    /// Exception pause policy
    pub fn exception_pause_info(&self) -> ExceptionPauseInfo {
        self.state.lock().exception_pause
    }

    /// Change the exception pause policy
    pub fn set_exception_pause_info(&self, info: ExceptionPauseInfo) {
        self.state.lock().exception_pause = info;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Reconstruct a stack trace from raw frames
    pub fn stack_trace(&self, stack: &[RawFrame]) -> DebuggerStackTrace {
        DebuggerStackTrace::build(&self.program, &self.code_space, stack)
    }

    /// Stack of the current pause; `None` outside the event handler
    pub fn current_stack_trace(&self) -> Option<DebuggerStackTrace> {
        self.pause_stack.lock().clone()
    }

    /// Handle for a value
    pub fn cache_object(&self, value: Value) -> ObjectId {
        self.objects.add(value)
    }

    /// Value behind a handle
    pub fn cached_object(&self, id: ObjectId) -> Option<Value> {
        self.objects.get(id)
    }

    /// Whether a handle is valid
    pub fn is_valid_object_id(&self, id: ObjectId) -> bool {
        self.objects.is_valid(id)
    }

    /// Instance fields of a value, superclass fields first
    pub fn instance_fields(&self, value: &Value) -> Vec<(String, Value)> {
        let Value::Instance(instance) = value else {
            return Vec::new();
        };
        let chain: Vec<ClassId> = self.program.super_chain(instance.class).collect();
        chain
            .iter()
            .rev()
            .flat_map(|&class| self.program.class(class).fields.iter().copied())
            .map(|f| self.program.field(f))
            .filter(|f| !f.is_static)
            .filter_map(|f| {
                let slot = f.slot()?;
                Some((f.name.clone(), instance.field(slot).unwrap_or(Value::Null)))
            })
            .collect()
    }

    fn read_statics(&self, fields: &[FieldId]) -> DebuggerResult<Vec<(String, Value)>> {
        let _guard = self.ignore_breakpoints();
        let invoker = Invoker::new(&self.program);
        fields
            .iter()
            .map(|&f| {
                let field = self.program.field(f);
                Ok((field.name.clone(), invoker.get_static_field(f)?))
            })
            .collect()
    }

    /// Static fields of a class; uninitialized ones run their initializer
    pub fn static_fields(&self, class: ClassId) -> DebuggerResult<Vec<(String, Value)>> {
        let fields: Vec<FieldId> = self
            .program
            .class(class)
            .fields
            .iter()
            .copied()
            .filter(|&f| self.program.field(f).is_static)
            .collect();
        self.read_statics(&fields)
    }

    /// Top-level fields of a library
    pub fn library_fields(&self, library: LibraryId) -> DebuggerResult<Vec<(String, Value)>> {
        self.read_statics(&self.program.library(library).fields)
    }

    /// Top-level fields visible in a library: its own, then those of its unprefixed
    /// imports not shadowed by an earlier name
    pub fn global_fields(&self, library: LibraryId) -> DebuggerResult<Vec<(String, Value)>> {
        let mut all = self.library_fields(library)?;
        for import in self.program.imported_libraries(library) {
            for (name, value) in self.library_fields(import)? {
                if !all.iter().any(|(n, _)| *n == name) {
                    all.push((name, value));
                }
            }
        }
        Ok(all)
    }

    /// Function by library URL, class name (empty for top-level) and name
    pub fn resolve_function(&self, library_url: &str, class_name: &str, name: &str) -> DebuggerResult<FunctionId> {
        let lib = self
            .program
            .library_by_url(library_url)
            .ok_or_else(|| DebuggerError::UnknownScript(library_url.to_string()))?;
        let unknown = || DebuggerError::UnknownFunction(if class_name.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", class_name, name)
        });
        let accessors = [Accessor::Method, Accessor::Getter, Accessor::Setter];
        if class_name.is_empty() {
            return accessors
                .iter()
                .find_map(|&a| self.program.library_function(lib, name, a))
                .ok_or_else(unknown);
        }
        let class = self.program.library_class(lib, class_name).ok_or_else(unknown)?;
        accessors
            .iter()
            .find_map(|&a| self.program.class_function(class, name, a))
            .or_else(|| self.program.class_constructor(class, name))
            .ok_or_else(unknown)
    }

    /// `Class.name` or `name`
    pub fn qualified_function_name(&self, function: FunctionId) -> String {
        self.program.qualified_function_name(function)
    }
}
