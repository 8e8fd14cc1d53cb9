//! Debugger integration tests: breakpoints, stepping, exceptions and frames

mod common;

use std::sync::Arc;

use common::{at, debuggee, positions, run, APP_URL};
use parking_lot::Mutex;
use vesta_engine::jit::ir::{Constant, FlowGraphBuilder};
use vesta_engine::jit::PcKind;
use vesta_engine::vm::debugger::{DebuggerEvent, ExceptionPauseInfo, RawFrame, ResumeAction};
use vesta_engine::vm::program::{FunctionDecl, Owner, TokenPos};
use vesta_engine::{DebuggerError, Isolate, IsolateOptions, ProgramBuilder, Value};

// ============================================================================
// Breakpoints
// ============================================================================

#[test]
fn test_line_breakpoint_resolves_to_first_stop_on_line() {
    let d = debuggee();
    let debugger = d.isolate.debugger();
    let id = debugger.set_breakpoint_at_line(APP_URL, 9).unwrap();
    let bp = debugger.breakpoint_by_id(id).unwrap();
    assert_eq!(bp.function, d.b);
    assert_eq!(bp.resolved_pos, Some(TokenPos(common::pos(9, 2))));
    assert_eq!(bp.line, 9);

    let pauses = run(&d, vec![]);
    assert_eq!(positions(&pauses), vec![at("b", 9, 3)]);
    assert!(pauses[0].breakpoint);
}

#[test]
fn test_line_inside_closure_picks_the_closure() {
    let d = debuggee();
    let id = d.isolate.debugger().set_breakpoint_at_line(APP_URL, 7).unwrap();
    assert_eq!(d.isolate.debugger().breakpoint_by_id(id).unwrap().function, d.f);
}

#[test]
fn test_remove_breakpoint_leaves_others_intact() {
    let d = debuggee();
    let debugger = d.isolate.debugger();
    let removed = debugger.set_breakpoint_at_line(APP_URL, 9).unwrap();
    let kept = debugger.set_breakpoint_at_line(APP_URL, 13).unwrap();
    let disabled = debugger.set_breakpoint_at_line(APP_URL, 2).unwrap();
    debugger.set_breakpoint_enabled(disabled, false).unwrap();

    let removed_location = debugger.code_breakpoints_of(removed)[0].location();
    debugger.remove_breakpoint(removed).unwrap();

    assert!(debugger.code_breakpoints_of(removed).is_empty());
    assert!(debugger.code_breakpoints().iter().all(|bp| !bp.is_owned_by(removed)));
    assert!(!debugger.has_breakpoint(removed_location.0, removed_location.1));

    let ids: Vec<_> = debugger.breakpoints().iter().map(|bp| bp.id).collect();
    assert_eq!(ids, vec![kept, disabled]);
    assert!(debugger.breakpoint_by_id(kept).unwrap().enabled);
    assert!(!debugger.breakpoint_by_id(disabled).unwrap().enabled);
    let kept_location = debugger.code_breakpoints_of(kept)[0].location();
    assert!(debugger.has_breakpoint(kept_location.0, kept_location.1));

    assert_eq!(
        debugger.remove_breakpoint(removed),
        Err(DebuggerError::UnknownBreakpoint(removed))
    );
}

#[test]
fn test_disabled_breakpoint_does_not_pause() {
    let d = debuggee();
    let id = d.isolate.debugger().set_breakpoint_at_line(APP_URL, 13).unwrap();
    d.isolate.debugger().set_breakpoint_enabled(id, false).unwrap();
    assert!(run(&d, vec![]).is_empty());

    d.isolate.debugger().set_breakpoint_enabled(id, true).unwrap();
    assert_eq!(positions(&run(&d, vec![])), vec![at("c", 13, 3)]);
}

#[test]
fn test_invalidated_code_drops_its_breakpoints() {
    let d = debuggee();
    let debugger = d.isolate.debugger();
    let id = debugger.set_breakpoint_at_line(APP_URL, 13).unwrap();
    assert_eq!(debugger.code_breakpoints_of(id).len(), 1);

    d.isolate.invalidate(d.code_of(d.c)).unwrap();
    assert!(debugger.code_breakpoints_of(id).is_empty());
    assert!(debugger.breakpoint_by_id(id).is_some());
}

#[test]
fn test_breakpoint_waits_for_code_and_deoptimizes() {
    let mut b = ProgramBuilder::new();
    let lib = b.add_library("app", APP_URL);
    let script = b.add_script(APP_URL, "hot() {\n  return 1;\n}\n");
    b.set_library_script(lib, script);
    let hot = b.add_function(
        Owner::Library(lib),
        FunctionDecl::method("hot").at(script, TokenPos(0), TokenPos(21)),
    );
    let isolate = Isolate::new(b.build().unwrap(), IsolateOptions::default());
    let graph = |optimized: bool| {
        let mut g = FlowGraphBuilder::new(hot, 0);
        if optimized {
            g = g.optimized();
        }
        g.at(10).step_check();
        let one = g.constant(Constant::Int(1));
        g.at(19).ret(one);
        g.build()
    };

    let fast = isolate.compile(&graph(true)).unwrap();
    let resolved = Arc::new(Mutex::new(Vec::new()));
    let sink = resolved.clone();
    isolate.debugger().set_event_handler(move |_, event| {
        if let DebuggerEvent::BreakpointResolved { breakpoint, line, .. } = event {
            sink.lock().push((*breakpoint, *line));
        }
    });

    let id = isolate.debugger().set_breakpoint_at_entry(hot).unwrap();
    assert!(!isolate.code_space().entry(fast).unwrap().is_valid());
    assert!(!isolate.debugger().breakpoint_by_id(id).unwrap().is_resolved());
    assert!(resolved.lock().is_empty());

    isolate.compile(&graph(false)).unwrap();
    assert_eq!(*resolved.lock(), vec![(id, 2)]);
    assert_eq!(isolate.debugger().code_breakpoints_of(id).len(), 1);
}

#[test]
fn test_resolve_function_by_name() {
    let d = debuggee();
    let debugger = d.isolate.debugger();
    assert_eq!(debugger.resolve_function(APP_URL, "", "c").unwrap(), d.c);
    assert!(matches!(
        debugger.resolve_function(APP_URL, "", "nope"),
        Err(DebuggerError::UnknownFunction(_))
    ));
    assert!(matches!(
        debugger.set_breakpoint_at_entry(d.trampoline),
        Err(DebuggerError::NotDebuggable(_))
    ));
}

// ============================================================================
// Stepping
// ============================================================================

#[test]
fn test_single_step_follows_program_order_into_calls() {
    let d = debuggee();
    d.isolate.debugger().set_breakpoint_at_line(APP_URL, 2).unwrap();
    let pauses = run(&d, vec![ResumeAction::SingleStep; 3]);
    assert_eq!(
        positions(&pauses),
        vec![
            at("main", 2, 3),
            at("b", 6, 3),
            at("b", 9, 3),
            at("b.<anonymous closure>", 7, 5),
        ]
    );
    assert!(pauses[0].breakpoint);
    assert!(pauses[1..].iter().all(|p| !p.breakpoint));
}

#[test]
fn test_step_over_stays_in_function_then_returns_to_caller() {
    let d = debuggee();
    d.isolate.debugger().set_breakpoint_at_line(APP_URL, 9).unwrap();
    let pauses = run(&d, vec![ResumeAction::StepOver; 4]);
    assert_eq!(
        positions(&pauses),
        vec![
            at("b", 9, 3),
            at("b", 9, 11),
            at("b", 10, 3),
            at("b", 11, 1),
            at("main", 3, 3),
        ]
    );
}

#[test]
fn test_step_over_from_closure_skips_trampoline_frame() {
    // The closure is entered through a hidden trampoline frame. Stepping over its
    // return lands in the nearest visible caller.
    let d = debuggee();
    d.isolate.debugger().set_breakpoint_at_line(APP_URL, 7).unwrap();
    let pauses = run(&d, vec![ResumeAction::StepOver; 3]);
    assert_eq!(
        positions(&pauses),
        vec![
            at("b.<anonymous closure>", 7, 5),
            at("b.<anonymous closure>", 7, 12),
            at("b.<anonymous closure>", 8, 3),
            at("b", 10, 3),
        ]
    );
}

#[test]
fn test_step_out_pauses_in_caller() {
    let d = debuggee();
    d.isolate.debugger().set_breakpoint_at_line(APP_URL, 13).unwrap();
    let pauses = run(&d, vec![ResumeAction::StepOut]);
    assert_eq!(
        positions(&pauses),
        vec![at("c", 13, 3), at("b.<anonymous closure>", 8, 3)]
    );
}

#[test]
fn test_continue_clears_stepping_breakpoints() {
    let d = debuggee();
    let debugger = d.isolate.debugger();
    debugger.set_breakpoint_at_line(APP_URL, 9).unwrap();
    let pauses = run(&d, vec![ResumeAction::StepOver, ResumeAction::Continue]);
    assert_eq!(pauses.len(), 2);
    assert!(debugger.code_breakpoints().iter().all(|bp| !bp.internal));
    assert_eq!(debugger.resume_action(), ResumeAction::Continue);
}

#[test]
fn test_ignore_breakpoints_suppresses_pauses() {
    let d = debuggee();
    d.isolate.debugger().set_breakpoint_at_line(APP_URL, 13).unwrap();
    let _guard = d.isolate.debugger().ignore_breakpoints();
    assert!(run(&d, vec![]).is_empty());
}

// ============================================================================
// Exceptions
// ============================================================================

struct Guarded {
    isolate: Isolate,
    frames: Vec<RawFrame>,
}

// `outer` calls `inner` from inside a try block; `inner` throws
fn guarded(caught: bool) -> Guarded {
    let mut b = ProgramBuilder::new();
    let lib = b.add_library("app", APP_URL);
    let script = b.add_script(APP_URL, "inner() {\n  throw 1;\n}\nouter() {\n  try { inner(); } catch (e) {}\n}\n");
    b.set_library_script(lib, script);
    let inner = b.add_function(Owner::Library(lib), FunctionDecl::method("inner").at(script, TokenPos(0), TokenPos(21)));
    let outer = b.add_function(Owner::Library(lib), FunctionDecl::method("outer").at(script, TokenPos(22), TokenPos(68)));
    let isolate = Isolate::new(b.build().unwrap(), IsolateOptions::default());

    let mut g = FlowGraphBuilder::new(inner, 0);
    g.at(11).step_check();
    let one = g.constant(Constant::Int(1));
    g.at(20).ret(one);
    let inner_code = isolate.compile(&g.build()).unwrap();

    let mut g = FlowGraphBuilder::new(outer, 0);
    if caught {
        g.set_try_index(0);
    }
    let r = g.at(40).static_call(inner, vec![]);
    g.at(67).ret(r);
    let outer_code = isolate.compile(&g.build()).unwrap();

    let pc = |code, kind: PcKind| {
        let entry = isolate.code_space().entry(code).unwrap();
        let desc = entry.compiled().pc_descriptors.iter().find(|d| d.kind == kind).unwrap();
        RawFrame::at(entry.base() + desc.pc_offset as u64)
    };
    let frames = vec![pc(inner_code, PcKind::DebugStepCheck), pc(outer_code, PcKind::StaticCall)];
    Guarded { isolate, frames }
}

fn exception_pauses(g: &Guarded, info: ExceptionPauseInfo) -> usize {
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    g.isolate.debugger().set_event_handler(move |_, event| {
        if let DebuggerEvent::ExceptionThrown { exception, stack } = event {
            assert_eq!(*exception, Value::string("boom"));
            assert_eq!(stack.top().unwrap().function_name(), "inner");
            *sink.lock() += 1;
        }
    });
    g.isolate.debugger().set_exception_pause_info(info);
    g.isolate.debugger().signal_exception_thrown(&g.frames, &Value::string("boom"));
    let result = *count.lock();
    result
}

#[test]
fn test_exception_pause_policy() {
    let uncaught = guarded(false);
    let caught = guarded(true);
    assert_eq!(exception_pauses(&uncaught, ExceptionPauseInfo::NoPauseOnExceptions), 0);
    assert_eq!(exception_pauses(&uncaught, ExceptionPauseInfo::PauseOnUnhandled), 1);
    assert_eq!(exception_pauses(&caught, ExceptionPauseInfo::PauseOnUnhandled), 0);
    assert_eq!(exception_pauses(&caught, ExceptionPauseInfo::PauseOnAll), 1);

    let stack = caught.isolate.debugger().stack_trace(&caught.frames);
    assert_eq!(stack.handler_frame(&Value::Null).unwrap().function_name(), "outer");
}

#[test]
fn test_handler_frame_ignores_exception_value() {
    let caught = guarded(true);
    let stack = caught.isolate.debugger().stack_trace(&caught.frames);
    for exception in [Value::Null, Value::string("boom"), Value::Int(7)] {
        assert_eq!(stack.handler_frame(&exception).unwrap().function_name(), "outer");
    }

    let uncaught = guarded(false);
    let stack = uncaught.isolate.debugger().stack_trace(&uncaught.frames);
    assert!(stack.handler_frame(&Value::string("boom")).is_none());
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn test_deoptimized_frame_reads_materialized_values() {
    let mut b = ProgramBuilder::new();
    let lib = b.add_library("app", APP_URL);
    let script = b.add_script(APP_URL, "calc(n) {\n  return n;\n}\n");
    b.set_library_script(lib, script);
    let calc = b.add_function(
        Owner::Library(lib),
        FunctionDecl::method("calc").param("n").at(script, TokenPos(0), TokenPos(22)),
    );
    let isolate = Isolate::new(b.build().unwrap(), IsolateOptions::default());
    let mut g = FlowGraphBuilder::new(calc, 1);
    let total = g.local("total");
    g.at(12).step_check();
    g.at(21).ret(total);
    let code = isolate.compile(&g.build()).unwrap();

    let entry = isolate.code_space().entry(code).unwrap();
    let desc = entry.compiled().pc_descriptors.iter().find(|d| d.kind == PcKind::DebugStepCheck).unwrap();
    let raw = RawFrame::at(entry.base() + desc.pc_offset as u64).with_slots(vec![Value::Int(1), Value::Int(2)]);

    let live = isolate.debugger().stack_trace(std::slice::from_ref(&raw));
    let frame = live.top().unwrap();
    assert!(!frame.is_deoptimized());
    assert_eq!(frame.line_number(), Some(2));
    assert_eq!(
        frame.local_variables(),
        vec![("n".to_string(), Value::Int(1)), ("total".to_string(), Value::Int(2))]
    );

    let deopt = raw.with_deopt(vec![Value::Int(41), Value::Int(42)]);
    let stack = isolate.debugger().stack_trace(std::slice::from_ref(&deopt));
    let frame = stack.top().unwrap();
    assert!(frame.is_deoptimized());
    assert_eq!(frame.variable_at(1), Some(("total".to_string(), Value::Int(42))));
    assert_eq!(frame.num_local_variables(), 2);
}

#[test]
fn test_stack_trace_skips_hidden_frames() {
    let d = debuggee();
    let point = d.trace().into_iter().nth(8).unwrap();
    let stack = d.isolate.debugger().stack_trace(&point.stack);
    let names: Vec<_> = stack.frames().iter().map(|f| f.function_name().to_string()).collect();
    assert_eq!(names, vec!["c", "b.<anonymous closure>", "b", "main"]);
    let depths: Vec<_> = stack.frames().iter().map(|f| f.depth()).collect();
    assert_eq!(depths, vec![0, 1, 3, 4]);
    assert_eq!(stack.physical_len(), 5);
    assert_eq!(stack.summaries()[0].url.as_deref(), Some(APP_URL));
}
