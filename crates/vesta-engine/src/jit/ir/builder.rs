//! Flow graph builder
//!
//! Utilities for constructing flow graphs by hand: tests, benchmarks and frontends
//! that do not produce JSON.

use super::instr::{
    Block, BlockId, Constant, DeoptReason, FlowGraph, InstrKind, Instruction, LocalVariable, Slot,
    Terminator,
};
use crate::vm::program::{FunctionId, TokenPos, Type};

/// Builder that appends instructions to a current block
pub struct FlowGraphBuilder {
    graph: FlowGraph,
    current: usize,
    pending_pos: Option<TokenPos>,
}

impl FlowGraphBuilder {
    /// Start a graph for `function` whose first `num_params` slots hold parameters
    pub fn new(function: FunctionId, num_params: u32) -> Self {
        FlowGraphBuilder {
            graph: FlowGraph {
                function,
                num_slots: num_params,
                optimized: false,
                blocks: vec![Block {
                    id: BlockId(0),
                    try_index: None,
                    instructions: Vec::new(),
                    terminator: Terminator::Goto { target: BlockId(0) },
                }],
                locals: Vec::new(),
            },
            current: 0,
            pending_pos: None,
        }
    }

    /// Mark the graph as an optimizing compilation
    pub fn optimized(mut self) -> Self {
        self.graph.optimized = true;
        self
    }

    /// Parameter slot `index`
    pub fn param(&self, index: u32) -> Slot {
        Slot(index)
    }

    /// Allocate a fresh temporary slot
    pub fn alloc_slot(&mut self) -> Slot {
        let slot = Slot(self.graph.num_slots);
        self.graph.num_slots += 1;
        slot
    }

    /// Allocate a named local
    pub fn local(&mut self, name: &str) -> Slot {
        let slot = self.alloc_slot();
        self.graph.locals.push(LocalVariable {
            name: name.to_string(),
            slot,
            begin_pos: None,
            end_pos: None,
        });
        slot
    }

    /// Create a new block
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.graph.blocks.len() as u32);
        self.graph.blocks.push(Block {
            id,
            try_index: None,
            instructions: Vec::new(),
            terminator: Terminator::Goto { target: id },
        });
        id
    }

    /// Switch to emitting into `block`
    pub fn switch_to_block(&mut self, block: BlockId) {
        if let Some(index) = self.graph.blocks.iter().position(|b| b.id == block) {
            self.current = index;
        }
    }

    /// Current block
    pub fn current_block(&self) -> BlockId {
        self.graph.blocks[self.current].id
    }

    /// Put the current block inside try block `index`
    pub fn set_try_index(&mut self, index: u32) {
        self.graph.blocks[self.current].try_index = Some(index);
    }

    /// Source position attached to the next emitted instruction
    pub fn at(&mut self, pos: u32) -> &mut Self {
        self.pending_pos = Some(TokenPos(pos));
        self
    }

    /// Emit an instruction into the current block
    pub fn emit(&mut self, kind: InstrKind) {
        let token_pos = self.pending_pos.take();
        self.graph.blocks[self.current].instructions.push(Instruction {
            token_pos,
            deopt_id: None,
            kind,
        });
    }

    /// Emit a constant and return its slot
    pub fn constant(&mut self, value: Constant) -> Slot {
        let dst = self.alloc_slot();
        self.emit(InstrKind::Constant { dst, value });
        dst
    }

    /// Emit a static call and return the result slot
    pub fn static_call(&mut self, function: FunctionId, args: Vec<Slot>) -> Slot {
        let dst = self.alloc_slot();
        self.emit(InstrKind::StaticCall {
            dst,
            function,
            args,
            argument_names: Vec::new(),
        });
        dst
    }

    /// Emit an instance call and return the result slot
    pub fn instance_call(&mut self, name: &str, args: Vec<Slot>, argument_names: Vec<String>) -> Slot {
        let dst = self.alloc_slot();
        self.emit(InstrKind::InstanceCall {
            dst,
            name: name.to_string(),
            args,
            argument_names,
            checked_args: 1,
        });
        dst
    }

    /// Emit `value is ty` and return the result slot
    pub fn instance_of(&mut self, value: Slot, ty: Type, negate: bool) -> Slot {
        let dst = self.alloc_slot();
        self.emit(InstrKind::InstanceOf {
            dst,
            value,
            ty,
            negate,
            instantiator: None,
        });
        dst
    }

    /// Emit a debug step check
    pub fn step_check(&mut self) {
        self.emit(InstrKind::DebugStepCheck);
    }

    /// Set the terminator of the current block
    pub fn terminate(&mut self, terminator: Terminator) {
        self.graph.blocks[self.current].terminator = terminator;
    }

    /// Terminate with a return of `value`
    pub fn ret(&mut self, value: Slot) {
        let token_pos = self.pending_pos.take();
        self.terminate(Terminator::Return { value, token_pos });
    }

    /// Terminate with a deoptimization
    pub fn deoptimize(&mut self, reason: DeoptReason, deopt_id: u32) {
        let token_pos = self.pending_pos.take();
        self.terminate(Terminator::Deoptimize {
            reason,
            deopt_id,
            token_pos,
        });
    }

    /// Finish building
    pub fn build(self) -> FlowGraph {
        self.graph
    }
}
