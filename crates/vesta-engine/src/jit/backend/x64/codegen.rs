//! Flow graph to x86-64 lowering
//!
//! Frame layout after the prologue:
//!
//! ```text
//!   [rbp + 16 + 8*k]  incoming arguments, last argument nearest
//!   [rbp + 8]         return address
//!   [rbp]             caller's rbp
//!   [rbp - 8*(i+1)]   slot i (parameters first, then locals and temporaries)
//! ```
//!
//! Values are tagged words: small integers are shifted left by one with a zero tag
//! bit, heap objects carry a one tag bit, and everything that is not a small integer
//! is loaded from the object pool through `PP`.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::assembler::{Assembler, Label};
use super::registers::{
    Address, Condition, Register, Scale, ARGS_DESC_REG, FP, IC_DATA_REG, PP, RESULT_REG, SP, TMP,
};
use crate::config::CompilerOptions;
use crate::jit::backend::traits::{
    CodegenBackend, CodegenError, CodegenResult, CompiledCode, Relocation, RelocationTarget,
    StubKind, TargetArch, TargetInfo,
};
use crate::jit::descriptors::{
    ArgumentsDescriptorLayout as ArgsLayout, DeoptInfo, ICData, ObjectPool, PcDescriptor, PcKind,
    PoolEntry, PATCHABLE_CALL_LEN,
};
use crate::jit::ir::{
    Block, BlockId, DeoptReason, FlowGraph, InstrKind, Instruction, LocalVariable, RuntimeEntry,
    Slot, Terminator,
};
use crate::jit::subtype_cache::SubtypeTestCache;
use crate::vm::invoke::ArgumentsDescriptor;
use crate::vm::program::{
    ClassId, FunctionEntity, FunctionKind, ParameterKind, Program, TokenPos, Type,
};
use crate::vm::value::{Value, THIS_VARIABLE};

/// Tag bit of heap object pointers
pub const HEAP_OBJECT_TAG: i32 = 1;
/// Mask selecting the small-integer tag bit
pub const SMI_TAG_MASK: i32 = 1;
/// Offset of the class id word in an object header, untagged
pub const CLASS_ID_OFFSET: i32 = 8;

const SMI_MIN: i64 = -(1 << 62);
const SMI_MAX: i64 = (1 << 62) - 1;

/// The x86-64 code generator
#[derive(Debug, Clone, Default)]
pub struct X64Backend {
    options: CompilerOptions,
}

impl X64Backend {
    /// Create a backend with the given options
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    /// Compiler options
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }
}

impl CodegenBackend for X64Backend {
    fn name(&self) -> &str {
        "x64"
    }

    fn compile(&self, program: &Program, graph: &FlowGraph) -> CodegenResult<CompiledCode> {
        validate(program, graph)?;
        let code = FlowGraphCompiler::new(program, graph, &self.options).compile()?;
        log::trace!(
            "compiled {} to {} bytes, {} descriptors",
            program.qualified_function_name(graph.function),
            code.size(),
            code.pc_descriptors.len()
        );
        Ok(code)
    }

    fn target_info(&self) -> TargetInfo {
        TargetInfo {
            arch: TargetArch::X86_64,
            pointer_size: 8,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate(program: &Program, graph: &FlowGraph) -> CodegenResult<()> {
    if graph.function.index() >= program.functions().len() {
        return Err(CodegenError::UnknownFunction(graph.function));
    }
    if graph.blocks.is_empty() {
        return Err(CodegenError::Unsupported("empty flow graph".to_string()));
    }

    let mut ids = FxHashSet::default();
    for block in &graph.blocks {
        if !ids.insert(block.id) {
            return Err(CodegenError::Unsupported(format!("duplicate block {}", block.id)));
        }
    }

    let check_slot = |slot: Slot| {
        if slot.0 < graph.num_slots {
            Ok(())
        } else {
            Err(CodegenError::InvalidSlot {
                slot,
                num_slots: graph.num_slots,
            })
        }
    };

    let func = program.function(graph.function);
    let num_params = func.num_implicit_parameters() + func.parameters.len();
    if num_params > 0 {
        check_slot(Slot(num_params as u32 - 1))?;
    }
    if func.num_optional_positional_parameters() > 0 && func.num_named_parameters() > 0 {
        return Err(CodegenError::Unsupported(
            "optional positional and named parameters in one function".to_string(),
        ));
    }

    for block in &graph.blocks {
        for instr in &block.instructions {
            for slot in instr.kind.slots() {
                check_slot(slot)?;
            }
            match &instr.kind {
                InstrKind::StaticCall {
                    function,
                    args,
                    argument_names,
                    ..
                } => {
                    if function.index() >= program.functions().len() {
                        return Err(CodegenError::UnknownFunction(*function));
                    }
                    check_names(args.len(), argument_names)?;
                }
                InstrKind::InstanceCall {
                    name,
                    args,
                    argument_names,
                    checked_args,
                    ..
                } => {
                    if args.is_empty() {
                        return Err(CodegenError::Unsupported(format!(
                            "instance call '{}' without a receiver",
                            name
                        )));
                    }
                    if !(1..=2).contains(checked_args) || *checked_args > args.len() {
                        return Err(CodegenError::Unsupported(format!(
                            "instance call '{}' checking {} arguments",
                            name, checked_args
                        )));
                    }
                    check_names(args.len() - 1, argument_names)?;
                }
                InstrKind::LoadField { offset, .. } | InstrKind::StoreField { offset, .. }
                    if *offset > i32::MAX as u32 =>
                {
                    return Err(CodegenError::Unsupported(format!("field offset {}", offset)));
                }
                _ => {}
            }
        }
        for slot in block.terminator.slots() {
            check_slot(slot)?;
        }
        for target in block.terminator.successors() {
            if !ids.contains(&target) {
                return Err(CodegenError::UnknownBlock(target));
            }
        }
        if matches!(block.terminator, Terminator::Deoptimize { .. }) && !graph.optimized {
            return Err(CodegenError::Unsupported(
                "deoptimization exit in unoptimized code".to_string(),
            ));
        }
    }
    Ok(())
}

fn check_names(available: usize, names: &[String]) -> CodegenResult<()> {
    if names.len() > available {
        return Err(CodegenError::Unsupported(format!(
            "{} argument names for {} arguments",
            names.len(),
            available
        )));
    }
    Ok(())
}

// =============================================================================
// Lowering
// =============================================================================

struct FlowGraphCompiler<'a> {
    program: &'a Program,
    graph: &'a FlowGraph,
    options: &'a CompilerOptions,
    asm: Assembler,
    pool: ObjectPool,
    descriptors: Vec<PcDescriptor>,
    ic_data: Vec<Arc<ICData>>,
    subtype_caches: Vec<Arc<SubtypeTestCache>>,
    deopt_info: Vec<DeoptInfo>,
    relocations: Vec<Relocation>,
    block_labels: FxHashMap<BlockId, Label>,
    nsm_label: Label,
    nsm_used: bool,
    current_try: Option<u32>,
}

impl<'a> FlowGraphCompiler<'a> {
    fn new(program: &'a Program, graph: &'a FlowGraph, options: &'a CompilerOptions) -> Self {
        let mut asm = Assembler::new();
        let block_labels = graph.blocks.iter().map(|b| (b.id, asm.new_label())).collect();
        let nsm_label = asm.new_label();
        FlowGraphCompiler {
            program,
            graph,
            options,
            asm,
            pool: ObjectPool::new(),
            descriptors: Vec::new(),
            ic_data: Vec::new(),
            subtype_caches: Vec::new(),
            deopt_info: Vec::new(),
            relocations: Vec::new(),
            block_labels,
            nsm_label,
            nsm_used: false,
            current_try: None,
        }
    }

    fn function(&self) -> &'a FunctionEntity {
        self.program.function(self.graph.function)
    }

    fn compile(mut self) -> CodegenResult<CompiledCode> {
        let frame_bytes = i32::try_from(self.graph.num_slots as u64 * 8)
            .map_err(|_| CodegenError::Unsupported(format!("{} frame slots", self.graph.num_slots)))?;

        self.asm.comment("Enter frame");
        self.asm.push(FP);
        self.asm.mov(FP, SP);
        if frame_bytes > 0 {
            self.asm.sub_imm(SP, frame_bytes);
        }
        self.copy_parameters()?;
        self.initialize_locals();

        let graph = self.graph;
        for (index, block) in graph.blocks.iter().enumerate() {
            self.visit_block(block, graph.blocks.get(index + 1).map(|b| b.id))?;
        }

        if self.nsm_used {
            self.asm.bind(self.nsm_label);
            self.asm.comment("Argument mismatch");
            self.asm.mov(SP, FP);
            self.asm.pop(FP);
            let imm = self.asm.jmp_patchable();
            self.relocate(imm, RelocationTarget::Stub(StubKind::CallClosureNoSuchMethod));
        }

        if self.descriptors.len() > self.options.max_pc_descriptors {
            return Err(CodegenError::DescriptorOverflow {
                count: self.descriptors.len(),
                limit: self.options.max_pc_descriptors,
            });
        }

        let var_descriptors = self.var_descriptors();
        let (instructions, comments) = self.asm.finish()?;
        Ok(CompiledCode {
            function: self.graph.function,
            is_optimized: self.graph.optimized,
            instructions,
            entry_offset: 0,
            frame_size: self.graph.num_slots,
            pc_descriptors: self.descriptors,
            ic_data: self.ic_data,
            subtype_caches: self.subtype_caches,
            deopt_info: self.deopt_info,
            object_pool: self.pool,
            relocations: self.relocations,
            comments,
            var_descriptors,
        })
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn slot(slot: Slot) -> Address {
        Address::new(FP, slot.frame_offset())
    }

    fn relocate(&mut self, code_offset: usize, target: RelocationTarget) {
        self.relocations.push(Relocation { code_offset, target });
    }

    fn add_descriptor(&mut self, kind: PcKind, pc_offset: usize, deopt_id: Option<u32>, token_pos: Option<TokenPos>) {
        self.descriptors.push(PcDescriptor {
            kind,
            pc_offset: pc_offset as u32,
            deopt_id,
            token_pos,
            try_index: self.current_try,
        });
    }

    fn pool_address(&mut self, entry: PoolEntry) -> Address {
        let index = self.pool.add(entry);
        Address::new(PP, ObjectPool::offset(index))
    }

    /// Load a tagged constant
    fn load_object(&mut self, dst: Register, value: &Value) {
        match value {
            Value::Int(i) if (SMI_MIN..=SMI_MAX).contains(i) => self.asm.load_immediate(dst, i << 1),
            _ => {
                let addr = self.pool_address(PoolEntry::Object(value.clone()));
                self.asm.load(dst, addr);
            }
        }
    }

    /// `mov TMP, imm64; call TMP` against a stub, with a descriptor at the return address
    fn call_stub(&mut self, stub: StubKind, kind: PcKind, deopt_id: Option<u32>, pos: Option<TokenPos>) -> usize {
        let (imm, ret) = self.asm.call_patchable();
        self.relocate(imm, RelocationTarget::Stub(stub));
        self.add_descriptor(kind, ret, deopt_id, pos);
        ret
    }

    fn push_arguments(&mut self, args: &[Slot]) {
        for arg in args {
            self.asm.push_mem(Self::slot(*arg));
        }
    }

    fn drop_arguments(&mut self, count: usize) {
        if count > 0 {
            self.asm.add_imm(SP, (count * 8) as i32);
        }
    }

    fn jump_to(&mut self, target: BlockId, next: Option<BlockId>) {
        if next != Some(target) {
            let label = self.block_labels[&target];
            self.asm.jmp(label);
        }
    }

    fn mismatch_if(&mut self, cond: Condition) {
        self.nsm_used = true;
        self.asm.jcc(cond, self.nsm_label);
    }

    // -------------------------------------------------------------------------
    // Prologue
    // -------------------------------------------------------------------------

    /// Copy incoming arguments into parameter slots, checking their shape against
    /// the arguments descriptor and filling defaults for missing optional ones
    fn copy_parameters(&mut self) -> CodegenResult<()> {
        let func = self.function();
        let implicit = func.num_implicit_parameters();
        let fixed = implicit + func.num_fixed_parameters();
        let num_optional = func.num_optional_positional_parameters();
        let num_named = func.num_named_parameters();
        let details = self
            .program
            .ensure_parameters_parsed(self.graph.function)
            .map_err(|e| CodegenError::Unsupported(format!("parameters of {}: {}", func.name, e)))?;
        let default_of = |i: usize| {
            details
                .get(i)
                .and_then(|d| d.default_value.clone())
                .unwrap_or(Value::Null)
        };

        self.asm.comment("CopyParameters");
        let count_addr = Address::new(ARGS_DESC_REG, ArgsLayout::COUNT_OFFSET);
        let positional_addr = Address::new(ARGS_DESC_REG, ArgsLayout::POSITIONAL_COUNT_OFFSET);
        let (rax, rcx, rdx, rsi, rdi) = (
            Register::Rax,
            Register::Rcx,
            Register::Rdx,
            Register::Rsi,
            Register::Rdi,
        );

        if num_optional == 0 && num_named == 0 {
            self.asm.load(rax, count_addr);
            self.asm.cmp_imm(rax, fixed as i32);
            self.mismatch_if(Condition::NotEqual);
            self.asm.load(rax, positional_addr);
            self.asm.cmp_imm(rax, fixed as i32);
            self.mismatch_if(Condition::NotEqual);
            for i in 0..fixed {
                let incoming = Address::new(FP, 16 + 8 * (fixed - 1 - i) as i32);
                self.asm.load(rax, incoming);
                self.asm.store(Self::slot(Slot(i as u32)), rax);
            }
            return Ok(());
        }

        // rcx points one word past the first argument; argument i is at [rcx - 8*i]
        self.asm.load(rax, positional_addr);
        if num_named == 0 {
            self.asm.cmp_imm(rax, fixed as i32);
            self.mismatch_if(Condition::Less);
            self.asm.cmp_imm(rax, (fixed + num_optional) as i32);
            self.mismatch_if(Condition::Greater);
            self.asm.load(rdx, count_addr);
            self.asm.cmp(rdx, rax);
            self.mismatch_if(Condition::NotEqual);
            self.asm.lea(rcx, Address::indexed(FP, rax, Scale::Times8, 8));
        } else {
            self.asm.cmp_imm(rax, fixed as i32);
            self.mismatch_if(Condition::NotEqual);
            self.asm.load(rdx, count_addr);
            self.asm.lea(rcx, Address::indexed(FP, rdx, Scale::Times8, 8));
        }
        for i in 0..fixed {
            self.asm.load(rdx, Address::new(rcx, -8 * i as i32));
            self.asm.store(Self::slot(Slot(i as u32)), rdx);
        }

        if num_named == 0 {
            for j in 0..num_optional {
                let i = fixed + j;
                let (missing, next) = (self.asm.new_label(), self.asm.new_label());
                self.asm.cmp_imm(rax, i as i32 + 1);
                self.asm.jcc(Condition::Less, missing);
                self.asm.load(rdx, Address::new(rcx, -8 * i as i32));
                self.asm.store(Self::slot(Slot(i as u32)), rdx);
                self.asm.jmp(next);
                self.asm.bind(missing);
                self.load_object(rdx, &default_of(j + func.num_fixed_parameters()));
                self.asm.store(Self::slot(Slot(i as u32)), rdx);
                self.asm.bind(next);
            }
            return Ok(());
        }

        // Named parameters in name order, matched against the sorted descriptor names
        let mut named: Vec<(usize, &str)> = func
            .parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == ParameterKind::Named)
            .map(|(k, p)| (k, p.name.as_str()))
            .collect();
        named.sort_by(|a, b| a.1.cmp(b.1));

        self.asm.lea(rdi, Address::new(ARGS_DESC_REG, ArgsLayout::FIRST_NAMED_OFFSET));
        for (k, name) in named {
            let slot = Self::slot(Slot((implicit + k) as u32));
            let (missing, next) = (self.asm.new_label(), self.asm.new_label());
            let symbol = self.pool_address(PoolEntry::Symbol(name.to_string()));
            self.asm.load(rsi, Address::new(rdi, 0));
            self.asm.load(TMP, symbol);
            self.asm.cmp(rsi, TMP);
            self.asm.jcc(Condition::NotEqual, missing);
            self.asm.load(rsi, Address::new(rdi, ArgsLayout::POSITION_OFFSET));
            self.asm.neg(rsi);
            self.asm.load(rdx, Address::indexed(rcx, rsi, Scale::Times8, 0));
            self.asm.store(slot, rdx);
            self.asm.add_imm(rdi, ArgsLayout::NAMED_ENTRY_SIZE);
            self.asm.jmp(next);
            self.asm.bind(missing);
            self.load_object(rdx, &default_of(k));
            self.asm.store(slot, rdx);
            self.asm.bind(next);
        }
        // Any name left over matched no parameter
        self.asm.cmp_mem_imm8(Address::new(rdi, 0), 0);
        self.mismatch_if(Condition::NotEqual);
        Ok(())
    }

    fn initialize_locals(&mut self) {
        let func = self.function();
        let first_local = func.num_implicit_parameters() + func.parameters.len();
        if (first_local as u32) < self.graph.num_slots {
            self.asm.comment("Initialize locals");
            self.load_object(RESULT_REG, &Value::Null);
            for i in first_local as u32..self.graph.num_slots {
                self.asm.store(Self::slot(Slot(i)), RESULT_REG);
            }
        }
    }

    fn var_descriptors(&self) -> Vec<LocalVariable> {
        let func = self.function();
        let implicit: &[&str] = match func.kind {
            FunctionKind::Constructor => &[THIS_VARIABLE, ":phase"],
            FunctionKind::Factory => &[":type_arguments"],
            FunctionKind::Closure | FunctionKind::ImplicitClosure => &[":closure"],
            _ if func.num_implicit_parameters() == 1 => &[THIS_VARIABLE],
            _ => &[],
        };
        implicit
            .iter()
            .map(|n| n.to_string())
            .chain(func.parameters.iter().map(|p| p.name.clone()))
            .enumerate()
            .map(|(i, name)| LocalVariable {
                name,
                slot: Slot(i as u32),
                begin_pos: func.token_pos,
                end_pos: func.end_token_pos,
            })
            .chain(self.graph.locals.iter().cloned())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Blocks and instructions
    // -------------------------------------------------------------------------

    fn visit_block(&mut self, block: &Block, next: Option<BlockId>) -> CodegenResult<()> {
        self.asm.bind(self.block_labels[&block.id]);
        self.current_try = block.try_index;
        for instr in &block.instructions {
            self.emit_instruction_prologue(instr);
            self.visit_instruction(instr)?;
        }
        self.visit_terminator(&block.terminator, next);
        Ok(())
    }

    fn emit_instruction_prologue(&mut self, instr: &Instruction) {
        if self.options.emit_comments {
            let pos = instr.token_pos.map_or_else(|| "-".to_string(), |p| p.to_string());
            let text = format!("{} {}", pos, self.describe(&instr.kind));
            self.asm.comment(text);
        }
    }

    fn describe(&self, kind: &InstrKind) -> String {
        match kind {
            InstrKind::StaticCall { function, .. } => format!(
                "StaticCall {}",
                self.program.qualified_function_name(*function)
            ),
            InstrKind::InstanceCall { name, .. } => format!("InstanceCall {}", name),
            InstrKind::InstanceOf { ty, negate, .. } => {
                format!("InstanceOf {}{:?}", if *negate { "!" } else { "" }, ty)
            }
            InstrKind::CallRuntime { entry, .. } => format!("CallRuntime {:?}", entry),
            other => other.mnemonic().to_string(),
        }
    }

    fn visit_instruction(&mut self, instr: &Instruction) -> CodegenResult<()> {
        let pos = instr.token_pos;
        let deopt_id = instr.deopt_id;
        match &instr.kind {
            InstrKind::Constant { dst, value } => {
                self.load_object(RESULT_REG, &value.to_value());
                self.asm.store(Self::slot(*dst), RESULT_REG);
            }
            InstrKind::Move { dst, src } => {
                self.asm.load(RESULT_REG, Self::slot(*src));
                self.asm.store(Self::slot(*dst), RESULT_REG);
            }
            InstrKind::StaticCall {
                dst,
                function,
                args,
                argument_names,
            } => {
                let desc = ArgumentsDescriptor::new(args.len() - argument_names.len(), argument_names.clone());
                self.push_arguments(args);
                let desc_addr = self.pool_address(PoolEntry::ArgumentsDescriptor(ArgsLayout::new(&desc, 0)));
                self.asm.load(ARGS_DESC_REG, desc_addr);
                let (imm, ret) = self.asm.call_patchable();
                self.relocate(imm, RelocationTarget::Function(*function));
                self.add_descriptor(PcKind::StaticCall, ret, deopt_id, pos);
                self.drop_arguments(args.len());
                self.asm.store(Self::slot(*dst), RESULT_REG);
            }
            InstrKind::InstanceCall {
                dst,
                name,
                args,
                argument_names,
                checked_args,
            } => {
                let desc = ArgumentsDescriptor::new(
                    args.len() - 1 - argument_names.len(),
                    argument_names.clone(),
                );
                let ic = Arc::new(ICData::new(name.clone(), *checked_args, desc.clone(), deopt_id));
                self.ic_data.push(ic);
                let ic_addr = self.pool_address(PoolEntry::ICData(self.ic_data.len() - 1));
                let desc_addr = self.pool_address(PoolEntry::ArgumentsDescriptor(ArgsLayout::new(&desc, 1)));
                self.push_arguments(args);
                self.asm.load(IC_DATA_REG, ic_addr);
                self.asm.load(ARGS_DESC_REG, desc_addr);
                let stub = if *checked_args == 2 {
                    StubKind::TwoArgsCheckInlineCache
                } else {
                    StubKind::OneArgCheckInlineCache
                };
                self.call_stub(stub, PcKind::InstanceCall, deopt_id, pos);
                self.drop_arguments(args.len());
                self.asm.store(Self::slot(*dst), RESULT_REG);
            }
            InstrKind::CallRuntime { dst, entry, args } => {
                self.call_runtime(*entry, args, deopt_id, pos);
                if let Some(dst) = dst {
                    self.asm.store(Self::slot(*dst), RESULT_REG);
                }
            }
            InstrKind::InstanceOf {
                dst,
                value,
                ty,
                negate,
                instantiator,
            } => {
                let (is_instance, is_not_instance, done) =
                    (self.asm.new_label(), self.asm.new_label(), self.asm.new_label());
                self.generate_type_test(*value, ty, *instantiator, is_instance, is_not_instance, pos);
                self.asm.bind(is_instance);
                self.load_object(RESULT_REG, &Value::Bool(!negate));
                self.asm.jmp(done);
                self.asm.bind(is_not_instance);
                self.load_object(RESULT_REG, &Value::Bool(*negate));
                self.asm.bind(done);
                self.asm.store(Self::slot(*dst), RESULT_REG);
            }
            InstrKind::AssertAssignable {
                value,
                ty,
                name,
                instantiator,
            } => self.generate_assert_assignable(*value, ty, name, *instantiator, deopt_id, pos),
            InstrKind::LoadField { dst, object, offset } => {
                self.asm.load(RESULT_REG, Self::slot(*object));
                self.asm.load(RESULT_REG, Address::new(RESULT_REG, *offset as i32 - HEAP_OBJECT_TAG));
                self.asm.store(Self::slot(*dst), RESULT_REG);
            }
            InstrKind::StoreField { object, offset, value } => {
                self.asm.load(RESULT_REG, Self::slot(*object));
                self.asm.load(Register::Rcx, Self::slot(*value));
                self.asm
                    .store(Address::new(RESULT_REG, *offset as i32 - HEAP_OBJECT_TAG), Register::Rcx);
            }
            InstrKind::DebugStepCheck => {
                if self.options.emit_debug_checks {
                    self.call_stub(StubKind::DebugStepCheck, PcKind::DebugStepCheck, deopt_id, pos);
                }
            }
        }
        Ok(())
    }

    /// Push arguments, then call `entry` through the call-to-runtime stub
    fn call_runtime(&mut self, entry: RuntimeEntry, args: &[Slot], deopt_id: Option<u32>, pos: Option<TokenPos>) {
        self.push_arguments(args);
        let imm = self.asm.load_relocated(IC_DATA_REG);
        self.relocate(imm, RelocationTarget::Runtime(entry));
        self.asm.load_immediate(ARGS_DESC_REG, args.len() as i64);
        self.call_stub(StubKind::CallToRuntime, PcKind::RuntimeCall, deopt_id, pos);
        self.drop_arguments(args.len());
    }

    // -------------------------------------------------------------------------
    // Type tests
    // -------------------------------------------------------------------------

    /// Concrete classes whose instances satisfy `ty`, if the test needs no type
    /// arguments and the set is small enough to compare inline
    fn inline_class_ids(&self, ty: &Type) -> Option<Vec<ClassId>> {
        let needs_arguments = match ty {
            Type::Interface { arguments, .. } => arguments
                .as_ref()
                .is_some_and(|args| args.iter().any(|a| !a.is_top())),
            _ => true,
        };
        if needs_arguments {
            return None;
        }
        let core = self.program.core();
        let mut ids = Vec::new();
        for class in self.program.classes() {
            if class.is_abstract
                || class.is_signature_class()
                || !class.is_finalized()
                || class.id == core.null
                || class.id == core.dynamic
            {
                continue;
            }
            if self.program.is_subtype_of(class.id, None, ty, None) {
                ids.push(class.id);
                if ids.len() > self.options.max_inline_class_checks {
                    return None;
                }
            }
        }
        Some(ids)
    }

    /// Jump to `is_instance` or `is_not_instance` depending on whether the value in
    /// `value` is an instance of `ty`
    fn generate_type_test(
        &mut self,
        value: Slot,
        ty: &Type,
        instantiator: Option<Slot>,
        is_instance: Label,
        is_not_instance: Label,
        pos: Option<TokenPos>,
    ) {
        let core = *self.program.core();
        let is_object = matches!(ty, Type::Interface { class, .. } if *class == core.object);
        if ty.is_top() || is_object {
            self.asm.jmp(is_instance);
            return;
        }

        let rax = RESULT_REG;
        self.asm.load(rax, Self::slot(value));
        let null_addr = self.pool_address(PoolEntry::Object(Value::Null));
        self.asm.load(TMP, null_addr);
        self.asm.cmp(rax, TMP);
        let null_passes = matches!(ty, Type::Interface { class, .. } if *class == core.null);
        self.asm.jcc(Condition::Equal, if null_passes { is_instance } else { is_not_instance });

        if let Some(class_ids) = self.inline_class_ids(ty) {
            let smi_target = if class_ids.contains(&core.int) {
                is_instance
            } else {
                is_not_instance
            };
            self.asm.test_imm(rax, SMI_TAG_MASK);
            self.asm.jcc(Condition::Equal, smi_target);
            self.asm.load(Register::Rcx, Address::new(rax, CLASS_ID_OFFSET - HEAP_OBJECT_TAG));
            for cid in class_ids {
                self.asm.cmp_imm(Register::Rcx, cid.0 as i32);
                self.asm.jcc(Condition::Equal, is_instance);
            }
            self.asm.jmp(is_not_instance);
            return;
        }

        // Slow path: rax = instance, rdx = instantiator, rcx = cache; result in rax
        let cache = Arc::new(SubtypeTestCache::new(ty.clone()));
        self.subtype_caches.push(cache);
        let cache_addr = self.pool_address(PoolEntry::SubtypeTestCache(self.subtype_caches.len() - 1));
        match instantiator {
            Some(slot) => self.asm.load(Register::Rdx, Self::slot(slot)),
            None => self.load_object(Register::Rdx, &Value::Null),
        }
        self.asm.load(Register::Rcx, cache_addr);
        self.call_stub(StubKind::SubtypeTestCache, PcKind::Other, None, pos);
        let true_addr = self.pool_address(PoolEntry::Object(Value::Bool(true)));
        self.asm.load(TMP, true_addr);
        self.asm.cmp(rax, TMP);
        self.asm.jcc(Condition::Equal, is_instance);
        self.asm.jmp(is_not_instance);
    }

    fn generate_assert_assignable(
        &mut self,
        value: Slot,
        ty: &Type,
        name: &str,
        instantiator: Option<Slot>,
        deopt_id: Option<u32>,
        pos: Option<TokenPos>,
    ) {
        let (done, fail) = (self.asm.new_label(), self.asm.new_label());
        // null is assignable to every type
        self.asm.load(RESULT_REG, Self::slot(value));
        let null_addr = self.pool_address(PoolEntry::Object(Value::Null));
        self.asm.load(TMP, null_addr);
        self.asm.cmp(RESULT_REG, TMP);
        self.asm.jcc(Condition::Equal, done);
        self.generate_type_test(value, ty, instantiator, done, fail, pos);

        self.asm.bind(fail);
        let type_addr = self.pool_address(PoolEntry::Type(ty.clone()));
        let name_addr = self.pool_address(PoolEntry::Symbol(name.to_string()));
        self.asm.push_mem(Self::slot(value));
        self.asm.push_mem(type_addr);
        self.asm.push_mem(name_addr);
        let imm = self.asm.load_relocated(IC_DATA_REG);
        self.relocate(imm, RelocationTarget::Runtime(RuntimeEntry::TypeCheck));
        self.asm.load_immediate(ARGS_DESC_REG, 3);
        self.call_stub(StubKind::CallToRuntime, PcKind::RuntimeCall, deopt_id, pos);
        self.drop_arguments(3);
        self.asm.bind(done);
    }

    // -------------------------------------------------------------------------
    // Terminators
    // -------------------------------------------------------------------------

    fn visit_terminator(&mut self, terminator: &Terminator, next: Option<BlockId>) {
        match terminator {
            Terminator::Goto { target } => self.jump_to(*target, next),
            Terminator::Branch {
                condition,
                if_true,
                if_false,
            } => {
                self.asm.load(RESULT_REG, Self::slot(*condition));
                let true_addr = self.pool_address(PoolEntry::Object(Value::Bool(true)));
                self.asm.load(TMP, true_addr);
                self.asm.cmp(RESULT_REG, TMP);
                if next == Some(*if_true) {
                    self.asm.jcc(Condition::NotEqual, self.block_labels[if_false]);
                } else {
                    self.asm.jcc(Condition::Equal, self.block_labels[if_true]);
                    self.jump_to(*if_false, next);
                }
            }
            Terminator::Return { value, token_pos } => {
                if self.options.emit_comments {
                    let pos = token_pos.map_or_else(|| "-".to_string(), |p| p.to_string());
                    self.asm.comment(format!("{} Return", pos));
                }
                self.asm.load(RESULT_REG, Self::slot(*value));
                self.emit_return_sequence(*token_pos);
            }
            Terminator::Throw { exception, token_pos } => {
                if self.options.emit_comments {
                    let pos = token_pos.map_or_else(|| "-".to_string(), |p| p.to_string());
                    self.asm.comment(format!("{} Throw", pos));
                }
                self.call_runtime(RuntimeEntry::Throw, &[*exception], None, *token_pos);
                self.asm.int3();
            }
            Terminator::Deoptimize {
                reason,
                deopt_id,
                token_pos,
            } => self.emit_deoptimize(*reason, *deopt_id, *token_pos),
        }
    }

    /// `mov rsp, rbp; pop rbp; ret` padded to the length of a patchable call
    fn emit_return_sequence(&mut self, token_pos: Option<TokenPos>) {
        let start = self.asm.offset();
        self.asm.mov(SP, FP);
        self.asm.pop(FP);
        self.asm.ret();
        let used = self.asm.offset() - start;
        self.asm.nops(PATCHABLE_CALL_LEN as usize - used);
        let end = self.asm.offset();
        self.add_descriptor(PcKind::Return, end, None, token_pos);
    }

    fn emit_deoptimize(&mut self, reason: DeoptReason, deopt_id: u32, token_pos: Option<TokenPos>) {
        if self.options.emit_comments {
            self.asm.comment(format!("Deoptimize {:?} (deopt id {})", reason, deopt_id));
        }
        let ret = self.call_stub(StubKind::Deoptimize, PcKind::Deopt, Some(deopt_id), token_pos);
        self.deopt_info.push(DeoptInfo {
            deopt_id,
            pc_offset: ret as u32,
            reason,
            token_pos,
            frame: (0..self.graph.num_slots).map(Slot).collect(),
        });
        self.asm.int3();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::backend::x64::encoder::{NOP, RET};
    use crate::jit::ir::{Constant, FlowGraphBuilder};
    use crate::vm::program::{ClassDecl, FunctionDecl, FunctionId, Owner, ProgramBuilder};

    struct Fixture {
        program: Program,
        shape: ClassId,
        square: ClassId,
        main: FunctionId,
        helper: FunctionId,
        greet: FunctionId,
        pad: FunctionId,
    }

    fn fixture() -> Fixture {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("app", "file:///app.vs");
        let shape = b.add_class(lib, ClassDecl::new("Shape").abstract_());
        let square = b.add_class(lib, ClassDecl::new("Square").extends(Type::rare(shape)));
        b.add_class(lib, ClassDecl::new("Circle").extends(Type::rare(shape)));
        let main = b.add_function(Owner::Library(lib), FunctionDecl::method("main"));
        let helper = b.add_function(Owner::Library(lib), FunctionDecl::method("helper").param("x"));
        let greet = b.add_function(
            Owner::Library(lib),
            FunctionDecl::method("greet")
                .param("a")
                .named("loud", Some(Value::Bool(false)))
                .named("times", Some(Value::Int(1))),
        );
        let pad = b.add_function(
            Owner::Library(lib),
            FunctionDecl::method("pad").param("s").optional("width", Some(Value::Int(8))),
        );
        let program = b.build().unwrap();
        program.finalize_all().unwrap();
        Fixture {
            program,
            shape,
            square,
            main,
            helper,
            greet,
            pad,
        }
    }

    fn compile(f: &Fixture, graph: &FlowGraph) -> CodegenResult<CompiledCode> {
        X64Backend::default().compile(&f.program, graph)
    }

    #[test]
    fn test_static_call_records_descriptor_and_relocation() {
        let f = fixture();
        let mut b = FlowGraphBuilder::new(f.main, 0);
        let arg = b.at(5).constant(Constant::Int(2));
        let result = b.at(7).static_call(f.helper, vec![arg]);
        b.at(9).ret(result);
        let code = compile(&f, &b.build()).unwrap();

        let call = code.pc_descriptors.iter().find(|d| d.kind == PcKind::StaticCall).unwrap();
        assert_eq!(call.token_pos, Some(TokenPos(7)));
        let patch = call.patch_offset() as usize;
        // mov r11, imm64; call r11
        assert_eq!(&code.instructions[patch..patch + 2], &[0x49, 0xBB]);
        assert_eq!(&code.instructions[patch + 10..patch + 13], &[0x41, 0xFF, 0xD3]);
        assert!(code.relocations.iter().any(|r| r.code_offset == patch + 2
            && r.target == RelocationTarget::Function(f.helper)));

        // The return sequence is padded to a patchable call; the argument mismatch
        // trailer may follow it
        let ret = code.pc_descriptors.iter().find(|d| d.kind == PcKind::Return).unwrap();
        assert_eq!(ret.token_pos, Some(TokenPos(9)));
        let end = ret.pc_offset as usize;
        assert!(end <= code.size());
        let sequence = &code.instructions[end - PATCHABLE_CALL_LEN as usize..end];
        let ret_at = sequence.iter().position(|&byte| byte == RET).unwrap();
        assert_eq!(sequence[ret_at - 1], 0x5D); // pop rbp
        assert!(sequence[ret_at + 1..].iter().all(|&byte| byte == NOP));
    }

    #[test]
    fn test_every_instruction_gets_a_comment() {
        let f = fixture();
        let mut b = FlowGraphBuilder::new(f.main, 0);
        let x = b.at(1).constant(Constant::Null);
        b.at(2).step_check();
        b.at(3).ret(x);
        let code = compile(&f, &b.build()).unwrap();
        let texts: Vec<&str> = code.comments.iter().map(|c| c.text.as_str()).collect();
        assert!(texts.contains(&"@1 Constant"));
        assert!(texts.contains(&"@2 DebugStepCheck"));
        assert!(texts.contains(&"@3 Return"));

        let quiet = X64Backend::new(CompilerOptions {
            emit_comments: false,
            emit_debug_checks: false,
            ..CompilerOptions::default()
        });
        let mut b = FlowGraphBuilder::new(f.main, 0);
        b.at(2).step_check();
        let x = b.constant(Constant::Null);
        b.ret(x);
        let code = quiet.compile(&f.program, &b.build()).unwrap();
        assert!(!code.comments.iter().any(|c| c.text.contains("DebugStepCheck")));
        assert!(!code.pc_descriptors.iter().any(|d| d.kind == PcKind::DebugStepCheck));
    }

    #[test]
    fn test_instance_call_records_ic_data() {
        let f = fixture();
        let mut b = FlowGraphBuilder::new(f.helper, 1);
        let one = b.constant(Constant::Int(1));
        let p0 = b.param(0);
        let sum = b.at(4).instance_call("add", vec![p0, one], vec![]);
        b.set_try_index(2);
        b.ret(sum);
        let code = compile(&f, &b.build()).unwrap();
        assert_eq!(code.ic_data.len(), 1);
        let ic = &code.ic_data[0];
        assert_eq!(ic.target_name, "add");
        assert_eq!(ic.num_args_tested, 1);
        assert_eq!(ic.arguments_descriptor, ArgumentsDescriptor::positional(1));
        let call = code.pc_descriptors.iter().find(|d| d.kind == PcKind::InstanceCall).unwrap();
        assert_eq!(call.try_index, Some(2));
        assert!(code
            .relocations
            .iter()
            .any(|r| r.target == RelocationTarget::Stub(StubKind::OneArgCheckInlineCache)));
    }

    #[test]
    fn test_type_test_inline_versus_cache() {
        let f = fixture();
        let mut b = FlowGraphBuilder::new(f.helper, 1);
        let is_shape = b.instance_of(b.param(0), Type::rare(f.shape), false);
        b.ret(is_shape);
        let code = compile(&f, &b.build()).unwrap();
        assert!(code.subtype_caches.is_empty());
        // cmp rcx, <Square id>
        let needle = [0x48, 0x83, 0xF9, f.square.0 as u8];
        assert!(code.instructions.windows(4).any(|w| w == needle));

        let tight = X64Backend::new(CompilerOptions {
            max_inline_class_checks: 1,
            ..CompilerOptions::default()
        });
        let mut b = FlowGraphBuilder::new(f.helper, 1);
        let is_shape = b.instance_of(b.param(0), Type::rare(f.shape), true);
        b.ret(is_shape);
        let code = tight.compile(&f.program, &b.build()).unwrap();
        assert_eq!(code.subtype_caches.len(), 1);
        assert_eq!(code.subtype_caches[0].tested_type(), &Type::rare(f.shape));
        assert!(code.subtype_caches[0].is_empty());
    }

    #[test]
    fn test_generic_type_test_uses_cache() {
        let f = fixture();
        let core = *f.program.core();
        let list_of_int = Type::generic(core.list, vec![Type::rare(core.int)]);
        let mut b = FlowGraphBuilder::new(f.helper, 1);
        let r = b.instance_of(b.param(0), list_of_int, false);
        b.ret(r);
        let code = compile(&f, &b.build()).unwrap();
        assert_eq!(code.subtype_caches.len(), 1);
    }

    #[test]
    fn test_prologue_checks_optional_and_named() {
        let f = fixture();
        let mut b = FlowGraphBuilder::new(f.greet, 3);
        b.ret(b.param(2));
        let code = compile(&f, &b.build()).unwrap();
        assert!(code
            .relocations
            .iter()
            .any(|r| r.target == RelocationTarget::Stub(StubKind::CallClosureNoSuchMethod)));
        let symbols: Vec<String> = code
            .object_pool
            .entries()
            .iter()
            .filter_map(|e| match e {
                PoolEntry::Symbol(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(symbols, vec!["loud".to_string(), "times".to_string()]);
        let names: Vec<&str> = code.var_descriptors.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "loud", "times"]);

        let mut b = FlowGraphBuilder::new(f.pad, 2);
        b.ret(b.param(1));
        assert!(compile(&f, &b.build()).is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let f = fixture();
        let mut b = FlowGraphBuilder::new(f.main, 0);
        b.ret(Slot(3));
        assert_eq!(
            compile(&f, &b.build()).unwrap_err(),
            CodegenError::InvalidSlot {
                slot: Slot(3),
                num_slots: 0
            }
        );

        let mut b = FlowGraphBuilder::new(f.main, 0);
        b.terminate(Terminator::Goto { target: BlockId(9) });
        assert_eq!(compile(&f, &b.build()).unwrap_err(), CodegenError::UnknownBlock(BlockId(9)));

        let mut b = FlowGraphBuilder::new(f.main, 0);
        b.deoptimize(DeoptReason::CheckClass, 1);
        assert!(matches!(compile(&f, &b.build()), Err(CodegenError::Unsupported(_))));

        // helper has one parameter, so its graph needs at least one slot
        let b = FlowGraphBuilder::new(f.helper, 0);
        assert!(matches!(compile(&f, &b.build()), Err(CodegenError::InvalidSlot { .. })));
    }

    #[test]
    fn test_descriptor_overflow() {
        let f = fixture();
        let backend = X64Backend::new(CompilerOptions {
            max_pc_descriptors: 2,
            ..CompilerOptions::default()
        });
        let mut b = FlowGraphBuilder::new(f.main, 0);
        b.at(1).step_check();
        b.at(2).step_check();
        let x = b.constant(Constant::Null);
        b.ret(x);
        assert_eq!(
            backend.compile(&f.program, &b.build()).unwrap_err(),
            CodegenError::DescriptorOverflow { count: 3, limit: 2 }
        );
    }

    #[test]
    fn test_deopt_info_in_optimized_code() {
        let f = fixture();
        let mut b = FlowGraphBuilder::new(f.helper, 1).optimized();
        b.alloc_slot();
        b.at(6).deoptimize(DeoptReason::CheckSmi, 12);
        let code = compile(&f, &b.build()).unwrap();
        assert!(code.is_optimized);
        let info = &code.deopt_info[0];
        assert_eq!(info.deopt_id, 12);
        assert_eq!(info.frame, vec![Slot(0), Slot(1)]);
        let desc = code.descriptor_at(info.pc_offset).unwrap();
        assert_eq!(desc.kind, PcKind::Deopt);
        assert!(code.listing(Some(&f.program)).contains("Deopt info:"));
    }
}
