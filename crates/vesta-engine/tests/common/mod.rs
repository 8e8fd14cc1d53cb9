//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use vesta_engine::jit::ir::{Constant, FlowGraphBuilder};
use vesta_engine::jit::PcKind;
use vesta_engine::vm::debugger::{DebuggerEvent, RawFrame, ResumeAction};
use vesta_engine::vm::program::{ClassDecl, FieldDecl, FunctionDecl, Owner, TokenPos};
use vesta_engine::{ClassId, CodeId, FunctionId, Isolate, IsolateOptions, LibraryId, ProgramBuilder, Value};

pub const APP_URL: &str = "file:///app.vs";
pub const GEO_URL: &str = "file:///geo.vs";

/// Token position of a column on a line of the app script; every line is 100
/// positions wide
pub fn pos(line: u32, col: u32) -> u32 {
    (line - 1) * 100 + col
}

// ============================================================================
// Object model fixture
// ============================================================================

pub struct Geometry {
    pub isolate: Isolate,
    pub lib: LibraryId,
    pub point: ClassId,
    pub pair: ClassId,
    pub shift: FunctionId,
    pub twice: FunctionId,
    /// Closure declared inside `twice`
    pub inner: FunctionId,
}

/// `Point` with fields, a method and a constructor, a generic `Pair<A, B>` and a
/// few top-level members
pub fn geometry() -> Geometry {
    let mut b = ProgramBuilder::new();
    let lib = b.add_library("geo", GEO_URL);
    b.set_root_library(lib);

    let point = b.add_class(lib, ClassDecl::new("Point"));
    b.add_field(Owner::Class(point), FieldDecl::instance("x").value(Value::Int(0)));
    b.add_field(Owner::Class(point), FieldDecl::instance("id").final_().value(Value::Int(7)));
    b.add_field(Owner::Class(point), FieldDecl::static_("unit").final_().value(Value::Int(1)));
    b.add_field(Owner::Class(point), FieldDecl::static_("count").value(Value::Int(0)));
    let shift = b.add_function(
        Owner::Class(point),
        FunctionDecl::method("shift").param("dx").optional("dy", Some(Value::Int(0))).body(|inv, args| {
            let x = inv.get(&args[0], "x")?.as_int().unwrap_or(0);
            let dx = args[1].as_int().unwrap_or(0);
            let dy = args[2].as_int().unwrap_or(0);
            Ok(Value::Int(x + dx + dy))
        }),
    );
    b.add_constructor(
        point,
        FunctionDecl::constructor("at").param("x").body(|inv, args| {
            inv.set(&args[0], "x", args[2].clone())?;
            Ok(Value::Null)
        }),
    );

    let pair = b.add_class(lib, ClassDecl::new("Pair"));
    let object = b.object_type();
    b.add_type_parameter(pair, "A", object.clone());
    b.add_type_parameter(pair, "B", object);

    b.add_field(Owner::Library(lib), FieldDecl::static_("scale").value(Value::Int(3)));
    b.add_field(Owner::Library(lib), FieldDecl::static_("label").final_().value(Value::string("geo")));
    let twice = b.add_function(
        Owner::Library(lib),
        FunctionDecl::method("twice").param("n").body(|_, args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))),
    );
    let inner = b.add_closure(twice, FunctionDecl::closure("<anonymous closure>"));

    let program = b.build().expect("geometry program");
    program.finalize_all().expect("finalize");
    Geometry {
        isolate: Isolate::new(program, IsolateOptions::default()),
        lib,
        point,
        pair,
        shift,
        twice,
        inner,
    }
}

// ============================================================================
// Debugger fixture
// ============================================================================
//
//  1  main() {
//  2    b();
//  3    print();
//  4  }
//  5  b() {
//  6    var f = () {
//  7      return c();
//  8    };
//  9    f();
// 10    return;
// 11  }
// 12  c() {
// 13    return 1;
// 14  }

pub struct Debuggee {
    pub isolate: Isolate,
    pub main: FunctionId,
    pub b: FunctionId,
    pub f: FunctionId,
    pub c: FunctionId,
    pub trampoline: FunctionId,
    pub code: Vec<(FunctionId, CodeId)>,
}

pub fn debuggee() -> Debuggee {
    debuggee_with(IsolateOptions::default())
}

pub fn debuggee_with(options: IsolateOptions) -> Debuggee {
    let mut b = ProgramBuilder::new();
    let lib = b.add_library("app", APP_URL);
    let line_starts = (0..14).map(|l| l * 100).collect();
    let script = b.add_script_lines(APP_URL, line_starts, 1400);
    b.set_library_script(lib, script);
    let at = |decl: FunctionDecl, first: u32, last: u32| decl.at(script, TokenPos(pos(first, 0)), TokenPos(pos(last, 1)));

    let main = b.add_function(Owner::Library(lib), at(FunctionDecl::method("main"), 1, 4));
    let bf = b.add_function(Owner::Library(lib), at(FunctionDecl::method("b"), 5, 11));
    let c = b.add_function(Owner::Library(lib), at(FunctionDecl::method("c"), 12, 14));
    let f = b.add_closure(bf, at(FunctionDecl::closure("<anonymous closure>"), 6, 8));
    let trampoline = b.add_function(Owner::Library(lib), FunctionDecl::method(":call").synthetic());
    let program = b.build().expect("debuggee program");

    let isolate = Isolate::new(program, options);
    let mut code = Vec::new();

    let mut g = FlowGraphBuilder::new(main, 0);
    g.at(pos(2, 2)).step_check();
    let r = g.at(pos(2, 10)).static_call(bf, vec![]);
    g.at(pos(3, 2)).step_check();
    g.at(pos(4, 0)).ret(r);
    code.push((main, isolate.compile(&g.build()).expect("main")));

    let mut g = FlowGraphBuilder::new(bf, 0);
    g.at(pos(6, 2)).step_check();
    g.at(pos(9, 2)).step_check();
    let closure = g.constant(Constant::Null);
    let r = g.at(pos(9, 10)).static_call(trampoline, vec![closure]);
    g.at(pos(10, 2)).step_check();
    g.at(pos(11, 0)).ret(r);
    code.push((bf, isolate.compile(&g.build()).expect("b")));

    let mut g = FlowGraphBuilder::new(trampoline, 1);
    let r = g.static_call(f, vec![g.param(0)]);
    g.ret(r);
    code.push((trampoline, isolate.compile(&g.build()).expect("trampoline")));

    let mut g = FlowGraphBuilder::new(f, 1);
    g.at(pos(7, 4)).step_check();
    let r = g.at(pos(7, 11)).static_call(c, vec![]);
    g.at(pos(8, 2)).ret(r);
    code.push((f, isolate.compile(&g.build()).expect("closure")));

    let mut g = FlowGraphBuilder::new(c, 0);
    g.at(pos(13, 2)).step_check();
    let one = g.constant(Constant::Int(1));
    g.at(pos(14, 0)).ret(one);
    code.push((c, isolate.compile(&g.build()).expect("c")));

    Debuggee {
        isolate,
        main,
        b: bf,
        f,
        c,
        trampoline,
        code,
    }
}

impl Debuggee {
    pub fn code_of(&self, function: FunctionId) -> CodeId {
        self.code
            .iter()
            .find(|(f, _)| *f == function)
            .map(|(_, c)| *c)
            .expect("function has code")
    }

    /// Raw frame stopped at the descriptor of `kind` at `token_pos` (or the first
    /// one of that kind when `None`)
    pub fn frame(&self, function: FunctionId, kind: PcKind, token_pos: Option<u32>) -> RawFrame {
        let entry = self
            .isolate
            .code_space()
            .entry(self.code_of(function))
            .expect("code entry");
        let desc = entry
            .compiled()
            .pc_descriptors
            .iter()
            .find(|d| d.kind == kind && token_pos.map_or(true, |p| d.token_pos == Some(TokenPos(p))))
            .expect("descriptor");
        RawFrame::at(entry.base() + desc.pc_offset as u64)
    }

    /// The program points `main()` passes through, innermost frame first in each
    /// stack
    pub fn trace(&self) -> Vec<Point> {
        use PcKind::*;
        let (main, b, t, f, c) = (self.main, self.b, self.trampoline, self.f, self.c);
        let p = |stack: &[(FunctionId, PcKind, Option<u32>)]| Point {
            kind: stack[0].1,
            stack: stack.iter().map(|&(func, kind, at)| self.frame(func, kind, at)).collect(),
        };
        let in_main = (main, StaticCall, Some(pos(2, 10)));
        let in_b = (b, StaticCall, Some(pos(9, 10)));
        let in_t = (t, StaticCall, None);
        let in_f = (f, StaticCall, Some(pos(7, 11)));
        vec![
            p(&[(main, DebugStepCheck, Some(pos(2, 2)))]),
            p(&[in_main]),
            p(&[(b, DebugStepCheck, Some(pos(6, 2))), in_main]),
            p(&[(b, DebugStepCheck, Some(pos(9, 2))), in_main]),
            p(&[in_b, in_main]),
            p(&[in_t, in_b, in_main]),
            p(&[(f, DebugStepCheck, Some(pos(7, 4))), in_t, in_b, in_main]),
            p(&[in_f, in_t, in_b, in_main]),
            p(&[(c, DebugStepCheck, Some(pos(13, 2))), in_f, in_t, in_b, in_main]),
            p(&[(c, Return, None), in_f, in_t, in_b, in_main]),
            p(&[(f, Return, None), in_t, in_b, in_main]),
            p(&[(t, Return, None), in_b, in_main]),
            p(&[(b, DebugStepCheck, Some(pos(10, 2))), in_main]),
            p(&[(b, Return, None), in_main]),
            p(&[(main, DebugStepCheck, Some(pos(3, 2)))]),
            p(&[(main, Return, None)]),
        ]
    }
}

/// One program point: the stack when execution reaches it
pub struct Point {
    pub kind: PcKind,
    pub stack: Vec<RawFrame>,
}

/// A pause seen by the handler
#[derive(Debug, Clone, PartialEq)]
pub struct Pause {
    pub function: String,
    pub line: usize,
    pub column: usize,
    pub breakpoint: bool,
}

/// Plays program points against the debugger the way the runtime would: a patched
/// call reports a breakpoint, a step check polls single stepping. The handler
/// answers each pause with the next scripted resume action.
pub fn run(debuggee: &Debuggee, actions: Vec<ResumeAction>) -> Vec<Pause> {
    let pauses = Arc::new(Mutex::new(Vec::new()));
    let script = Arc::new(Mutex::new(actions.into_iter()));
    let sink = pauses.clone();
    debuggee.isolate.debugger().set_event_handler(move |debugger, event| {
        if let DebuggerEvent::BreakpointReached { breakpoint, stack } = event {
            let top = stack.top().expect("paused frame");
            sink.lock().push(Pause {
                function: top.function_name().to_string(),
                line: top.line_number().unwrap_or(0),
                column: top.column_number().unwrap_or(0),
                breakpoint: breakpoint.is_some(),
            });
            let action = script.lock().next().unwrap_or(ResumeAction::Continue);
            debugger.set_resume_action(action).expect("resume action");
        }
    });

    let debugger = debuggee.isolate.debugger();
    for point in debuggee.trace() {
        let top = &point.stack[0];
        let (entry, offset) = debuggee.isolate.code_space().lookup_pc(top.pc).expect("mapped pc");
        let paused = debugger.has_breakpoint(entry.id(), offset)
            && debugger.signal_breakpoint_reached(&point.stack).expect("breakpoint");
        if !paused && point.kind == PcKind::DebugStepCheck {
            debugger.debug_step_check(&point.stack);
        }
    }
    debugger.clear_event_handler();
    let result = pauses.lock().clone();
    result
}

/// Where a pause is expected
pub fn at(function: &str, line: usize, column: usize) -> (String, usize, usize) {
    (function.to_string(), line, column)
}

pub fn positions(pauses: &[Pause]) -> Vec<(String, usize, usize)> {
    pauses.iter().map(|p| (p.function.clone(), p.line, p.column)).collect()
}
