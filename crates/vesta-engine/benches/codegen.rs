use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vesta_engine::jit::ir::{Constant, FlowGraph, FlowGraphBuilder};
use vesta_engine::vm::program::{FunctionDecl, FunctionId, Owner, TokenPos};
use vesta_engine::{CodegenBackend, Isolate, IsolateOptions, Program, ProgramBuilder, X64Backend};

fn program() -> (Program, FunctionId, FunctionId) {
    let mut b = ProgramBuilder::new();
    let lib = b.add_library("bench", "file:///bench.vs");
    let source: String = (0..512).map(|i| format!("  call{}();\n", i)).collect();
    let script = b.add_script("file:///bench.vs", &format!("main() {{\n{}}}\n", source));
    b.set_library_script(lib, script);
    let leaf = b.add_function(Owner::Library(lib), FunctionDecl::method("leaf").param("x"));
    let main = b.add_function(
        Owner::Library(lib),
        FunctionDecl::method("main").at(script, TokenPos(0), TokenPos(source.len() as u32 + 10)),
    );
    (b.build().expect("bench program"), main, leaf)
}

// `calls` static calls, each preceded by a step check, one per source line
fn straight_line(main: FunctionId, leaf: FunctionId, calls: u32) -> FlowGraph {
    let mut b = FlowGraphBuilder::new(main, 0);
    let mut last = b.constant(Constant::Null);
    for i in 0..calls {
        let pos = 9 + i * 12;
        b.at(pos + 2).step_check();
        let arg = b.constant(Constant::Int(i as i64));
        last = b.at(pos + 2).static_call(leaf, vec![arg]);
    }
    b.ret(last);
    b.build()
}

fn bench_compile(c: &mut Criterion) {
    let (program, main, leaf) = program();
    let backend = X64Backend::default();
    let mut group = c.benchmark_group("compile");
    for calls in [16u32, 128, 512] {
        let graph = straight_line(main, leaf, calls);
        group.bench_with_input(BenchmarkId::new("static_calls", calls), &graph, |b, graph| {
            b.iter(|| backend.compile(&program, black_box(graph)).expect("compile"));
        });
    }
    group.finish();
}

fn bench_breakpoints(c: &mut Criterion) {
    let (program, main, leaf) = program();
    let isolate = Isolate::new(program, IsolateOptions::default());
    isolate.compile(&straight_line(main, leaf, 512)).expect("compile");
    let debugger = isolate.debugger();

    c.bench_function("set_remove_line_breakpoint", |b| {
        b.iter(|| {
            let id = debugger
                .set_breakpoint_at_line("file:///bench.vs", black_box(300))
                .expect("set");
            debugger.remove_breakpoint(id).expect("remove");
        });
    });
}

criterion_group!(benches, bench_compile, bench_breakpoints);
criterion_main!(benches);
