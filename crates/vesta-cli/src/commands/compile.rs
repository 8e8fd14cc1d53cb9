//! `vesta compile`: generate code for one flow graph, resolving any breakpoints
//! requested on the command line against it.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde_json::json;
use vesta_engine::jit::FlowGraph;
use vesta_engine::vm::debugger::Debugger;
use vesta_engine::{FunctionId, Isolate};

pub struct CompileArgs {
    pub image: PathBuf,
    pub graph: PathBuf,
    pub config: Option<PathBuf>,
    pub function: Option<String>,
    pub library: Option<String>,
    pub breakpoints: Vec<String>,
    pub json: bool,
}

pub fn execute(args: CompileArgs) -> anyhow::Result<()> {
    let options = super::load_options(args.config.as_deref())?;
    let isolate = super::load_isolate(&args.image, options)?;

    let text = std::fs::read_to_string(&args.graph)
        .with_context(|| format!("Failed to read graph {}", args.graph.display()))?;
    let mut graph: FlowGraph = serde_json::from_str(&text)
        .with_context(|| format!("Invalid flow graph {}", args.graph.display()))?;
    if let Some(name) = &args.function {
        graph.function = lookup_function(&isolate, args.library.as_deref(), name)?;
    }
    if graph.function.index() >= isolate.program().functions().len() {
        return Err(anyhow!("Graph targets unknown function {}", graph.function));
    }

    let debugger = isolate.debugger();
    for spec in &args.breakpoints {
        let (url, line) = parse_location(spec)?;
        let id = debugger
            .set_breakpoint_at_line(url, line)
            .with_context(|| format!("Cannot set breakpoint at {}", spec))?;
        log::info!("breakpoint {} requested at {}:{}", id.0, url, line);
    }

    let code = isolate.compile(&graph)?;
    let entry = isolate
        .code_space()
        .entry(code)
        .ok_or_else(|| anyhow!("Code {} was not installed", code))?;
    let compiled = entry.compiled();

    if args.json {
        let breakpoints: Vec<_> = debugger
            .breakpoints()
            .into_iter()
            .map(|bp| {
                let sites = debugger.code_breakpoints_of(bp.id).len();
                json!({ "breakpoint": bp, "code_sites": sites })
            })
            .collect();
        let out = json!({
            "function": isolate.program().qualified_function_name(graph.function),
            "code": code.to_string(),
            "base": entry.base(),
            "size": compiled.size(),
            "optimized": compiled.is_optimized,
            "frame_size": compiled.frame_size,
            "descriptors": compiled.pc_descriptors,
            "breakpoints": breakpoints,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", compiled.listing(Some(isolate.program().as_ref())));
        print_breakpoints(debugger);
    }
    Ok(())
}

/// `name` or `Class.name`, looked up in `library` or the root library
fn lookup_function(isolate: &Isolate, library: Option<&str>, name: &str) -> anyhow::Result<FunctionId> {
    let program = isolate.program();
    let url = match library {
        Some(url) => url.to_string(),
        None => {
            let root = program
                .root_library()
                .ok_or_else(|| anyhow!("Image has no root library; pass --library"))?;
            program.library(root).url.clone()
        }
    };
    let (class, name) = name.split_once('.').unwrap_or(("", name));
    Ok(isolate.debugger().resolve_function(&url, class, name)?)
}

/// `url:line`; the URL itself may contain colons
fn parse_location(spec: &str) -> anyhow::Result<(&str, usize)> {
    let (url, line) = spec
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Breakpoint '{}' is not of the form url:line", spec))?;
    let line = line
        .parse()
        .map_err(|_| anyhow!("Breakpoint '{}' has an invalid line number", spec))?;
    Ok((url, line))
}

fn print_breakpoints(debugger: &Debugger) {
    let breakpoints = debugger.breakpoints();
    if breakpoints.is_empty() {
        return;
    }
    println!("Breakpoints:");
    for bp in breakpoints {
        let state = if bp.is_resolved() { "resolved" } else { "pending" };
        println!(
            "  #{} {}:{} {} ({} code sites){}",
            bp.id.0,
            bp.url,
            bp.line,
            state,
            debugger.code_breakpoints_of(bp.id).len(),
            if bp.enabled { "" } else { " disabled" }
        );
    }
}
