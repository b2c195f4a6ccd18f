use crate::ir::builder::*;
use crate::ir::*;

fn compute() -> StageInfo {
    StageInfo::compute([1, 1, 1])
}

fn count_blocks(nodes: &[CfNode]) -> usize {
    nodes
        .iter()
        .map(|n| match n {
            CfNode::Block(_) => 1,
            CfNode::If(i) => count_blocks(&i.then_body) + count_blocks(&i.else_body),
            CfNode::Loop(l) => count_blocks(&l.body),
        })
        .sum()
}

#[test]
fn test_straight_line_shader() {
    let mut b = ShaderBuilder::new(compute());
    let out = b.add_variable(Variable::new("out", VariableMode::ShaderOut, Type::uint(32)));
    let c = b.imm_u32(42).unwrap();
    let ptr = b.deref_var(out).unwrap();
    b.store_deref(ptr, c, 0x1).unwrap();
    let shader = b.finish().unwrap();

    assert_eq!(shader.body.len(), 1);
    assert_eq!(shader.num_values, 2);
    let CfNode::Block(block) = &shader.body[0] else {
        panic!("expected a block");
    };
    assert_eq!(block.insts.len(), 3);
    assert!(matches!(block.insts[0].kind, InstKind::LoadConst(ref v) if v == &[42]));
}

#[test]
fn test_if_else_structure() {
    let mut b = ShaderBuilder::new(compute());
    let cond = b.imm_bool(true).unwrap();
    b.begin_if(cond).unwrap();
    b.imm_u32(1).unwrap();
    b.begin_else().unwrap();
    b.imm_u32(2).unwrap();
    b.end_if().unwrap();
    let shader = b.finish().unwrap();

    // entry block, if, block after the if
    assert_eq!(shader.body.len(), 3);
    let CfNode::If(if_node) = &shader.body[1] else {
        panic!("expected an if");
    };
    assert_eq!(if_node.condition, cond);
    assert!(matches!(if_node.then_body[0], CfNode::Block(_)));
    assert!(matches!(if_node.else_body[0], CfNode::Block(_)));
    assert!(matches!(shader.body[2], CfNode::Block(_)));
}

#[test]
fn test_if_without_else_has_empty_else_body() {
    let mut b = ShaderBuilder::new(compute());
    let cond = b.imm_bool(false).unwrap();
    b.begin_if(cond).unwrap();
    b.end_if().unwrap();
    let shader = b.finish().unwrap();

    let CfNode::If(if_node) = &shader.body[1] else {
        panic!("expected an if");
    };
    assert_eq!(if_node.then_body.len(), 1);
    assert!(if_node.else_body.is_empty());
}

#[test]
fn test_block_ids_are_dense_and_unique() {
    let mut b = ShaderBuilder::new(compute());
    let cond = b.imm_bool(true).unwrap();
    b.begin_loop().unwrap();
    b.begin_if(cond).unwrap();
    b.jump(JumpKind::Break).unwrap();
    b.end_if().unwrap();
    b.end_loop().unwrap();
    let shader = b.finish().unwrap();

    assert_eq!(count_blocks(&shader.body) as u32, shader.num_blocks);
}

#[test]
fn test_jump_outside_loop_rejected() {
    let mut b = ShaderBuilder::new(compute());
    assert_eq!(b.jump(JumpKind::Break), Err(BuilderError::JumpOutsideLoop));
}

#[test]
fn test_inst_after_jump_rejected() {
    let mut b = ShaderBuilder::new(compute());
    b.begin_loop().unwrap();
    b.jump(JumpKind::Continue).unwrap();
    let result = b.imm_u32(3);
    assert!(matches!(result, Err(BuilderError::InstAfterJump(_))));
}

#[test]
fn test_unclosed_constructs_rejected() {
    let mut b = ShaderBuilder::new(compute());
    let cond = b.imm_bool(true).unwrap();
    b.begin_loop().unwrap();
    b.begin_if(cond).unwrap();
    assert!(matches!(b.finish(), Err(BuilderError::UnclosedConstructs(2))));
}

#[test]
fn test_mismatched_close_rejected() {
    let mut b = ShaderBuilder::new(compute());
    b.begin_loop().unwrap();
    assert_eq!(b.end_if(), Err(BuilderError::NotInIf));
    assert_eq!(b.begin_else(), Err(BuilderError::NotInIf));
    b.end_loop().unwrap();
    assert_eq!(b.end_loop(), Err(BuilderError::NotInLoop));
}

#[test]
fn test_duplicate_else_rejected() {
    let mut b = ShaderBuilder::new(compute());
    let cond = b.imm_bool(true).unwrap();
    b.begin_if(cond).unwrap();
    b.begin_else().unwrap();
    assert_eq!(b.begin_else(), Err(BuilderError::DuplicateElse));
}

#[test]
fn test_deref_chain_types() {
    let mut b = ShaderBuilder::new(compute());
    let ty = Type::Struct {
        name: None,
        fields: vec![
            StructField {
                ty: Type::array(Type::vector(BaseType::Float, 32, 4), 8),
                offset: Some(0),
            },
            StructField {
                ty: Type::uint(32),
                offset: Some(128),
            },
        ],
        block: false,
    };
    let var = b.add_variable(Variable::new("s", VariableMode::FunctionTemp, ty));
    let root = b.deref_var(var).unwrap();
    let field = b.deref_struct(root, 0).unwrap();
    let idx = b.imm_u32(3).unwrap();
    let elem = b.deref_array(field, idx).unwrap();
    let comp = b.deref_array(elem, idx).unwrap();

    assert!(matches!(b.deref_struct(root, 7), Err(BuilderError::InvalidDeref { .. })));
    assert!(matches!(b.deref_struct(comp, 0), Err(BuilderError::InvalidDeref { .. })));
    assert_eq!(b.deref_array(idx, idx), Err(BuilderError::NotADeref(idx)));

    let shader = b.finish().unwrap();
    let mut deref_types = Vec::new();
    shader.for_each_inst(|inst| {
        if let InstKind::Deref(d) = &inst.kind {
            deref_types.push(d.ty.clone());
        }
    });
    assert_eq!(deref_types.len(), 4);
    assert_eq!(deref_types[2], Type::vector(BaseType::Float, 32, 4));
    assert_eq!(deref_types[3], Type::float(32));
}

#[test]
fn test_register_shapes() {
    let mut b = ShaderBuilder::new(compute());
    let reg = b.add_register(32, 3);
    let v = b.load_reg(reg).unwrap();
    b.store_reg(reg, v).unwrap();
    assert_eq!(b.store_reg(RegisterId(9), v), Err(BuilderError::UnknownRegister(RegisterId(9))));
    let shader = b.finish().unwrap();

    let mut shapes = Vec::new();
    shader.for_each_inst(|inst| {
        if let Some(def) = inst.dest {
            shapes.push((def.bit_size, def.components));
        }
    });
    assert_eq!(shapes, vec![(32, 3)]);
}

#[test]
fn test_shader_round_trips_through_json() {
    let mut b = ShaderBuilder::new(StageInfo::fragment());
    let color = b.add_variable(Variable {
        driver_location: 0,
        ..Variable::new("color", VariableMode::ShaderOut, Type::vector(BaseType::Float, 32, 4))
    });
    let v = b.load_const(32, &[0, 0, 0, 0x3f80_0000]).unwrap();
    let ptr = b.deref_var(color).unwrap();
    b.store_deref(ptr, v, 0xf).unwrap();
    let shader = b.finish().unwrap();

    let json = serde_json::to_string(&shader).unwrap();
    let back: Shader = serde_json::from_str(&json).unwrap();
    assert_eq!(back.stage(), Stage::Fragment);
    assert_eq!(back.num_values, shader.num_values);
    assert_eq!(back.variables[0].ty, shader.variables[0].ty);
}

#[test]
fn test_stream_output_needs_a_known_source() {
    let mut b = ShaderBuilder::new(StageInfo::Vertex);
    let so = StreamOutput {
        source: VariableId(0),
        start_component: 0,
        num_components: 4,
        buffer: 0,
        offset: 0,
        stride: 16,
        stream: 0,
    };
    assert!(matches!(b.add_stream_output(so), Err(BuilderError::UnknownVariable(VariableId(0)))));

    let pos = b.add_variable(Variable::new(
        "pos",
        VariableMode::ShaderOut,
        Type::vector(BaseType::Float, 32, 4),
    ));
    b.add_stream_output(StreamOutput { source: pos, ..so }).unwrap();
    let shader = b.finish().unwrap();
    assert_eq!(shader.streamout.len(), 1);
    assert_eq!(shader.streamout[0].source, pos);
}
