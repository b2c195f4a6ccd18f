use rspirv::dr::{Function, Instruction, Module, Operand, load_words};
use rspirv::spirv::{Op, Word};

use super::compile;
use crate::ir::builder::ShaderBuilder;
use crate::ir::*;
use crate::options::CompileOptions;

fn lower(shader: &Shader) -> Module {
    let spirv = compile(shader, &CompileOptions::default()).unwrap();
    load_words(&spirv.words).unwrap()
}

fn main_fn(module: &Module) -> &Function {
    module.functions.last().unwrap()
}

fn insts<'a>(func: &'a Function, op: Op) -> Vec<&'a Instruction> {
    func.blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .filter(|i| i.class.opcode == op)
        .collect()
}

fn id_operand(inst: &Instruction, index: usize) -> Word {
    match inst.operands[index] {
        Operand::IdRef(id) => id,
        ref other => panic!("operand {} is {:?}", index, other),
    }
}

fn label_of(block: &rspirv::dr::Block) -> Word {
    block.label.as_ref().and_then(|l| l.result_id).unwrap()
}

/// Every block ends in exactly one terminator and nothing follows it.
fn assert_terminated(func: &Function) {
    for block in &func.blocks {
        let terminators = block
            .instructions
            .iter()
            .filter(|i| {
                matches!(
                    i.class.opcode,
                    Op::Branch | Op::BranchConditional | Op::Return | Op::Kill | Op::Unreachable
                )
            })
            .count();
        assert_eq!(terminators, 1, "block %{} has {} terminators", label_of(block), terminators);
        let last = block.instructions.last().unwrap().class.opcode;
        assert!(
            matches!(last, Op::Branch | Op::BranchConditional | Op::Return | Op::Kill),
            "block %{} ends in {:?}",
            label_of(block),
            last
        );
    }
}

fn compute() -> ShaderBuilder {
    ShaderBuilder::new(StageInfo::compute([1, 1, 1]))
}

#[test]
fn test_if_else() {
    let mut b = compute();
    let cond = b.imm_bool(true).unwrap();
    b.begin_if(cond).unwrap();
    b.imm_u32(1).unwrap();
    b.begin_else().unwrap();
    b.imm_u32(2).unwrap();
    b.end_if().unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    let merges = insts(main, Op::SelectionMerge);
    let branches = insts(main, Op::BranchConditional);
    assert_eq!(merges.len(), 1);
    assert_eq!(branches.len(), 1);

    let merge = id_operand(merges[0], 0);
    assert_ne!(id_operand(branches[0], 1), merge);
    assert_ne!(id_operand(branches[0], 2), merge);
    assert!(main.blocks.iter().any(|b| label_of(b) == merge));
}

#[test]
fn test_if_without_else_branches_to_merge() {
    let mut b = compute();
    let cond = b.imm_bool(false).unwrap();
    b.begin_if(cond).unwrap();
    b.imm_u32(1).unwrap();
    b.end_if().unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    let merge = id_operand(insts(main, Op::SelectionMerge)[0], 0);
    let branch = insts(main, Op::BranchConditional)[0];
    assert_eq!(id_operand(branch, 2), merge);
}

#[test]
fn test_loop_with_break() {
    let mut b = compute();
    let cond = b.imm_bool(true).unwrap();
    b.begin_loop().unwrap();
    b.begin_if(cond).unwrap();
    b.jump(JumpKind::Break).unwrap();
    b.end_if().unwrap();
    b.end_loop().unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    let loop_merges = insts(main, Op::LoopMerge);
    assert_eq!(loop_merges.len(), 1);
    let merge = id_operand(loop_merges[0], 0);
    let cont = id_operand(loop_merges[0], 1);

    let branch_targets = insts(main, Op::Branch).iter().map(|i| id_operand(i, 0)).collect::<Vec<_>>();
    assert!(branch_targets.contains(&merge), "no break to the merge block");
    assert!(branch_targets.contains(&cont), "body does not fall into the continue block");

    // The continue block jumps back to the loop header.
    let header = main
        .blocks
        .iter()
        .find(|b| b.instructions.iter().any(|i| i.class.opcode == Op::LoopMerge))
        .map(label_of)
        .unwrap();
    let cont_block = main.blocks.iter().find(|b| label_of(b) == cont).unwrap();
    let back_edge = cont_block.instructions.last().unwrap();
    assert_eq!(back_edge.class.opcode, Op::Branch);
    assert_eq!(id_operand(back_edge, 0), header);
}

#[test]
fn test_continue_targets_continue_block() {
    let mut b = compute();
    let cond = b.imm_bool(true).unwrap();
    b.begin_loop().unwrap();
    b.begin_if(cond).unwrap();
    b.jump(JumpKind::Continue).unwrap();
    b.end_if().unwrap();
    b.jump(JumpKind::Break).unwrap();
    b.end_loop().unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    let cont = id_operand(insts(main, Op::LoopMerge)[0], 1);
    let to_cont = insts(main, Op::Branch).iter().filter(|i| id_operand(i, 0) == cont).count();
    assert_eq!(to_cont, 1);
}

#[test]
fn test_nested_loops_break_to_innermost() {
    let mut b = compute();
    b.begin_loop().unwrap();
    b.begin_loop().unwrap();
    b.jump(JumpKind::Break).unwrap();
    b.end_loop().unwrap();
    b.jump(JumpKind::Break).unwrap();
    b.end_loop().unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    let merges = insts(main, Op::LoopMerge);
    assert_eq!(merges.len(), 2);
    let outer_merge = id_operand(merges[0], 0);
    let inner_merge = id_operand(merges[1], 0);
    let targets = insts(main, Op::Branch).iter().map(|i| id_operand(i, 0)).collect::<Vec<_>>();
    assert!(targets.contains(&inner_merge));
    assert!(targets.contains(&outer_merge));
}

#[test]
fn test_counter_loop_through_register() {
    let mut b = compute();
    let counter = b.add_register(32, 1);
    let zero = b.imm_u32(0).unwrap();
    b.store_reg(counter, zero).unwrap();
    b.begin_loop().unwrap();
    let i = b.load_reg(counter).unwrap();
    let limit = b.imm_u32(4).unwrap();
    let done = b.alu_values(AluOp::Uge, &[i, limit], 1, 1).unwrap();
    b.begin_if(done).unwrap();
    b.jump(JumpKind::Break).unwrap();
    b.end_if().unwrap();
    let one = b.imm_u32(1).unwrap();
    let next = b.alu_values(AluOp::Iadd, &[i, one], 32, 1).unwrap();
    b.store_reg(counter, next).unwrap();
    b.end_loop().unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    assert_eq!(insts(main, Op::UGreaterThanEqual).len(), 1);
    assert_eq!(insts(main, Op::IAdd).len(), 1);
    assert_eq!(insts(main, Op::Store).len(), 2);
    assert_eq!(insts(main, Op::Return).len(), 1);
}

#[test]
#[should_panic(expected = "BUG:")]
fn test_jump_outside_loop_is_fatal() {
    // The builder refuses this shape, so assemble it by hand.
    let shader = Shader {
        name: None,
        info: StageInfo::compute([1, 1, 1]),
        variables: Vec::new(),
        registers: Vec::new(),
        body: vec![CfNode::Block(Block {
            id: BlockId(0),
            insts: vec![Inst {
                dest: None,
                kind: InstKind::Jump(JumpKind::Break),
            }],
        })],
        num_values: 0,
        num_blocks: 1,
        scratch_size: 0,
        streamout: Vec::new(),
    };
    let _ = compile(&shader, &CompileOptions::default());
}

#[test]
fn test_branches_store_to_the_same_register() {
    let mut b = compute();
    let reg = b.add_register(32, 1);
    let cond = b.imm_bool(true).unwrap();
    b.begin_if(cond).unwrap();
    let one = b.imm_u32(1).unwrap();
    b.store_reg(reg, one).unwrap();
    b.begin_else().unwrap();
    let two = b.imm_u32(2).unwrap();
    b.store_reg(reg, two).unwrap();
    b.end_if().unwrap();
    b.load_reg(reg).unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    let stores = insts(main, Op::Store);
    assert_eq!(stores.len(), 2);
    let target = id_operand(stores[0], 0);
    assert_eq!(id_operand(stores[1], 0), target);
    let load = insts(main, Op::Load)[0];
    assert_eq!(id_operand(load, 0), target);
}

#[test]
fn test_if_inside_loop_inside_if() {
    let mut b = compute();
    let outer = b.imm_bool(true).unwrap();
    b.begin_if(outer).unwrap();
    b.begin_loop().unwrap();
    let inner = b.imm_bool(false).unwrap();
    b.begin_if(inner).unwrap();
    b.jump(JumpKind::Break).unwrap();
    b.end_if().unwrap();
    b.end_loop().unwrap();
    b.end_if().unwrap();
    let module = lower(&b.finish().unwrap());

    let main = main_fn(&module);
    assert_terminated(main);
    let selection_merges = insts(main, Op::SelectionMerge);
    let loop_merges = insts(main, Op::LoopMerge);
    assert_eq!(selection_merges.len(), 2);
    assert_eq!(loop_merges.len(), 1);

    // Every merge names a distinct block that exists.
    let mut targets = selection_merges
        .iter()
        .chain(loop_merges.iter())
        .map(|i| id_operand(i, 0))
        .collect::<Vec<_>>();
    targets.sort_unstable();
    targets.dedup();
    assert_eq!(targets.len(), 3);
    for target in targets {
        assert!(main.blocks.iter().any(|b| label_of(b) == target));
    }
}

#[test]
#[should_panic(expected = "written twice")]
fn test_value_written_twice_is_fatal() {
    let def = Def {
        value: ValueId(0),
        bit_size: 32,
        components: 1,
    };
    let shader = Shader {
        name: None,
        info: StageInfo::compute([1, 1, 1]),
        variables: Vec::new(),
        registers: Vec::new(),
        body: vec![CfNode::Block(Block {
            id: BlockId(0),
            insts: vec![
                Inst {
                    dest: Some(def),
                    kind: InstKind::LoadConst(vec![1]),
                },
                Inst {
                    dest: Some(def),
                    kind: InstKind::LoadConst(vec![2]),
                },
            ],
        })],
        num_values: 1,
        num_blocks: 1,
        scratch_size: 0,
        streamout: Vec::new(),
    };
    let _ = compile(&shader, &CompileOptions::default());
}

#[test]
#[should_panic(expected = "never declared")]
fn test_undeclared_register_is_fatal() {
    let shader = Shader {
        name: None,
        info: StageInfo::compute([1, 1, 1]),
        variables: Vec::new(),
        registers: Vec::new(),
        body: vec![CfNode::Block(Block {
            id: BlockId(0),
            insts: vec![Inst {
                dest: Some(Def {
                    value: ValueId(0),
                    bit_size: 32,
                    components: 1,
                }),
                kind: InstKind::LoadReg(RegisterId(0)),
            }],
        })],
        num_values: 1,
        num_blocks: 1,
        scratch_size: 0,
        streamout: Vec::new(),
    };
    let _ = compile(&shader, &CompileOptions::default());
}
