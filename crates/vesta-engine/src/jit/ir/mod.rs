//! Flow graph IR consumed by the code generator

pub mod builder;
pub mod instr;

pub use builder::FlowGraphBuilder;
pub use instr::{
    Block, BlockId, Constant, DeoptReason, FlowGraph, InstrKind, Instruction, LocalVariable,
    RuntimeEntry, Slot, Terminator,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::program::{FunctionId, TokenPos};

    #[test]
    fn test_builder_allocates_slots_after_params() {
        let mut b = FlowGraphBuilder::new(FunctionId(3), 2);
        let c = b.constant(Constant::Int(1));
        assert_eq!(c, Slot(2));
        let r = b.static_call(FunctionId(1), vec![b.param(0), c]);
        b.ret(r);
        let graph = b.build();
        assert_eq!(graph.num_slots, 4);
        assert_eq!(graph.blocks.len(), 1);
        assert_eq!(graph.instructions().count(), 2);
    }

    #[test]
    fn test_positions_attach_to_next_instruction() {
        let mut b = FlowGraphBuilder::new(FunctionId(0), 0);
        b.at(10).step_check();
        b.step_check();
        let graph = b.build();
        let positions: Vec<_> = graph.instructions().map(|(_, i)| i.token_pos).collect();
        assert_eq!(positions, vec![Some(TokenPos(10)), None]);
    }

    #[test]
    fn test_graph_json_shape() {
        let json = r#"{
            "function": 1,
            "num_slots": 2,
            "blocks": [{
                "id": 0,
                "try_index": 0,
                "instructions": [
                    {"op": "Constant", "dst": 1, "value": {"Int": 7}, "token_pos": 4},
                    {"op": "InstanceCall", "dst": 1, "name": "foo", "args": [0, 1]}
                ],
                "terminator": {"op": "Return", "value": 1, "token_pos": 9}
            }]
        }"#;
        let graph: FlowGraph = serde_json::from_str(json).unwrap();
        let (block, call) = graph.instructions().nth(1).unwrap();
        assert_eq!(block.try_index, Some(0));
        match &call.kind {
            InstrKind::InstanceCall { checked_args, .. } => assert_eq!(*checked_args, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(graph.blocks[0].terminator.slots(), vec![Slot(1)]);
    }
}
