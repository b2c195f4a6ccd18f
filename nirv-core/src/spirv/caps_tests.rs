use rspirv::dr::{Instruction, Module, Operand, load_words};
use rspirv::spirv::{AddressingModel, Capability, Decoration, ExecutionMode, MemoryModel, Op, Word};

use super::{SpirvShader, compile};
use crate::error::CompilerError;
use crate::ir::builder::ShaderBuilder;
use crate::ir::*;
use crate::options::CompileOptions;

fn compile_with(b: ShaderBuilder, options: &CompileOptions) -> (SpirvShader, Module) {
    let spirv = compile(&b.finish().unwrap(), options).unwrap();
    let module = load_words(&spirv.words).unwrap();
    (spirv, module)
}

fn lower(b: ShaderBuilder) -> Module {
    compile_with(b, &CompileOptions::default()).1
}

fn has_cap(module: &Module, cap: Capability) -> bool {
    module.capabilities.iter().any(|c| c.operands[0] == Operand::Capability(cap))
}

fn has_ext(module: &Module, name: &str) -> bool {
    module
        .extensions
        .iter()
        .any(|e| e.operands[0] == Operand::LiteralString(name.to_string()))
}

/// Literals of `mode`, if the entry point declares it.
fn exec_mode(module: &Module, mode: ExecutionMode) -> Option<Vec<u32>> {
    module
        .execution_modes
        .iter()
        .find(|m| m.operands[1] == Operand::ExecutionMode(mode))
        .map(|m| {
            m.operands[2..]
                .iter()
                .map(|op| match op {
                    Operand::LiteralBit32(v) => *v,
                    other => panic!("unexpected literal {:?}", other),
                })
                .collect()
        })
}

fn memory_model(module: &Module) -> (Operand, Operand) {
    let inst = module.memory_model.as_ref().unwrap();
    (inst.operands[0].clone(), inst.operands[1].clone())
}

fn builtin_out(name: &str, slot: BuiltinSlot, ty: Type) -> Variable {
    let mut var = Variable::new(name, VariableMode::ShaderOut, ty);
    var.slot = Slot::BuiltIn(slot);
    var
}

fn fragment() -> ShaderBuilder {
    ShaderBuilder::new(StageInfo::fragment())
}

#[test]
fn test_fragment_origin_upper_left() {
    let module = lower(fragment());
    assert_eq!(exec_mode(&module, ExecutionMode::OriginUpperLeft), Some(vec![]));
    assert!(exec_mode(&module, ExecutionMode::DepthReplacing).is_none());
}

#[test]
fn test_depth_layout_mode() {
    let mut b = ShaderBuilder::new(StageInfo::Fragment {
        depth_layout: DepthLayout::Greater,
        early_fragment_tests: true,
        post_depth_coverage: false,
        uses_sample_shading: false,
        interlock: None,
    });
    b.add_variable(builtin_out("depth", BuiltinSlot::FragDepth, Type::float(32)));
    let module = lower(b);
    assert!(exec_mode(&module, ExecutionMode::DepthGreater).is_some());
    assert!(exec_mode(&module, ExecutionMode::EarlyFragmentTests).is_some());
}

#[test]
fn test_stencil_export() {
    let mut b = fragment();
    b.add_variable(builtin_out("stencil", BuiltinSlot::StencilRef, Type::int(32)));
    let module = lower(b);
    assert!(has_ext(&module, "SPV_EXT_shader_stencil_export"));
    assert!(has_cap(&module, Capability::StencilExportEXT));
    assert!(exec_mode(&module, ExecutionMode::StencilRefReplacingEXT).is_some());
}

#[test]
fn test_fragment_primitive_id_needs_geometry() {
    let mut b = fragment();
    b.load_system_value(SystemValue::PrimitiveId, 32, 1).unwrap();
    let module = lower(b);
    assert!(has_cap(&module, Capability::Geometry));
}

fn vertex_writing_layer() -> ShaderBuilder {
    let mut b = ShaderBuilder::new(StageInfo::Vertex);
    b.add_variable(builtin_out("layer", BuiltinSlot::Layer, Type::int(32)));
    b
}

#[test]
fn test_vertex_layer_is_core_in_1_5() {
    let (_, module) = compile_with(vertex_writing_layer(), &CompileOptions::with_version(1, 5));
    assert!(has_cap(&module, Capability::ShaderLayer));
    assert!(!has_ext(&module, "SPV_EXT_shader_viewport_index_layer"));
}

#[test]
fn test_vertex_layer_needs_extension_before_1_5() {
    let (_, module) = compile_with(vertex_writing_layer(), &CompileOptions::with_version(1, 3));
    assert!(has_cap(&module, Capability::ShaderViewportIndexLayerEXT));
    assert!(has_ext(&module, "SPV_EXT_shader_viewport_index_layer"));
    assert!(!has_cap(&module, Capability::ShaderLayer));
}

#[test]
fn test_draw_parameters() {
    let build = || {
        let mut b = ShaderBuilder::new(StageInfo::Vertex);
        b.load_system_value(SystemValue::BaseVertex, 32, 1).unwrap();
        b
    };
    let (_, old) = compile_with(build(), &CompileOptions::with_version(1, 2));
    assert!(has_cap(&old, Capability::DrawParameters));
    assert!(has_ext(&old, "SPV_KHR_shader_draw_parameters"));

    let (_, new) = compile_with(build(), &CompileOptions::with_version(1, 3));
    assert!(has_cap(&new, Capability::DrawParameters));
    assert!(!has_ext(&new, "SPV_KHR_shader_draw_parameters"));
}

#[test]
fn test_tess_control_vertices_out_is_patchable() {
    let b = ShaderBuilder::new(StageInfo::TessControl { vertices_out: 4 });
    let (spirv, module) = compile_with(b, &CompileOptions::default());

    assert!(has_cap(&module, Capability::Tessellation));
    assert_eq!(exec_mode(&module, ExecutionMode::OutputVertices), Some(vec![4]));
    let offset = spirv.tcs_vertices_out_word as usize;
    assert_ne!(offset, 0);
    assert_eq!(spirv.words[offset], 4);
}

#[test]
fn test_tess_eval_modes() {
    let mut b = ShaderBuilder::new(StageInfo::TessEval {
        primitive: TessPrimitive::Quads,
        vertex_order_ccw: true,
        spacing: TessSpacing::FractionalOdd,
        point_mode: true,
    });
    b.add_variable(builtin_out("psize", BuiltinSlot::PointSize, Type::float(32)));
    let module = lower(b);

    for mode in [
        ExecutionMode::Quads,
        ExecutionMode::VertexOrderCcw,
        ExecutionMode::SpacingFractionalOdd,
        ExecutionMode::PointMode,
    ] {
        assert!(exec_mode(&module, mode).is_some(), "missing {:?}", mode);
    }
    assert!(exec_mode(&module, ExecutionMode::VertexOrderCw).is_none());
    assert!(has_cap(&module, Capability::TessellationPointSize));
}

#[test]
fn test_geometry_modes() {
    let b = ShaderBuilder::new(StageInfo::Geometry {
        input: GeometryInput::Triangles,
        output: GeometryOutput::TriangleStrip,
        invocations: 0,
        vertices_out: 3,
        active_stream_mask: 0b11,
    });
    let module = lower(b);

    assert!(has_cap(&module, Capability::Geometry));
    assert!(has_cap(&module, Capability::GeometryStreams));
    assert!(exec_mode(&module, ExecutionMode::Triangles).is_some());
    assert!(exec_mode(&module, ExecutionMode::OutputTriangleStrip).is_some());
    assert_eq!(exec_mode(&module, ExecutionMode::Invocations), Some(vec![1]));
    assert_eq!(exec_mode(&module, ExecutionMode::OutputVertices), Some(vec![3]));
}

#[test]
fn test_fixed_local_size() {
    let module = lower(ShaderBuilder::new(StageInfo::compute([8, 4, 1])));
    assert_eq!(exec_mode(&module, ExecutionMode::LocalSize), Some(vec![8, 4, 1]));
}

#[test]
fn test_variable_local_size_uses_spec_constants() {
    let mut b = ShaderBuilder::new(StageInfo::Compute {
        local_size: None,
        ptr_size: 0,
        shared_size: 0,
    });
    b.load_system_value(SystemValue::WorkgroupSize, 32, 3).unwrap();
    let module = lower(b);

    assert!(exec_mode(&module, ExecutionMode::LocalSize).is_none());
    let spec_ids = module
        .annotations
        .iter()
        .filter(|a| a.operands.get(1) == Some(&Operand::Decoration(Decoration::SpecId)))
        .map(|a| a.operands[2].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        spec_ids,
        [Operand::LiteralBit32(1), Operand::LiteralBit32(2), Operand::LiteralBit32(3)]
    );
}

#[test]
fn test_vulkan_memory_model() {
    let options = CompileOptions {
        vulkan_memory_model: true,
        ..CompileOptions::default()
    };
    let (_, module) = compile_with(ShaderBuilder::new(StageInfo::Vertex), &options);
    assert!(has_cap(&module, Capability::VulkanMemoryModel));
    assert!(has_cap(&module, Capability::VulkanMemoryModelDeviceScope));
    assert_eq!(
        memory_model(&module),
        (
            Operand::AddressingModel(AddressingModel::Logical),
            Operand::MemoryModel(MemoryModel::Vulkan)
        )
    );
}

#[test]
fn test_compute_ignores_vulkan_memory_model() {
    let options = CompileOptions {
        vulkan_memory_model: true,
        ..CompileOptions::default()
    };
    let (_, module) = compile_with(ShaderBuilder::new(StageInfo::compute([1, 1, 1])), &options);
    assert_eq!(memory_model(&module).1, Operand::MemoryModel(MemoryModel::GLSL450));
}

#[test]
fn test_physical_32_addressing() {
    let b = ShaderBuilder::new(StageInfo::Compute {
        local_size: Some([1, 1, 1]),
        ptr_size: 32,
        shared_size: 0,
    });
    let module = lower(b);
    assert!(has_cap(&module, Capability::Addresses));
    assert_eq!(
        memory_model(&module).0,
        Operand::AddressingModel(AddressingModel::Physical32)
    );
}

#[test]
fn test_transform_feedback() {
    let mut b = ShaderBuilder::new(StageInfo::Vertex);
    let mut out = Variable::new("pos", VariableMode::ShaderOut, Type::vector(BaseType::Float, 32, 4));
    out.xfb = Some(XfbInfo {
        buffer: 0,
        stride: 16,
        offset: 0,
        stream: 0,
    });
    b.add_variable(out);
    let module = lower(b);

    assert!(has_cap(&module, Capability::TransformFeedback));
    assert!(exec_mode(&module, ExecutionMode::Xfb).is_some());
}

#[test]
fn test_storage_buffer_extension_before_1_1() {
    let mut b = ShaderBuilder::new(StageInfo::compute([1, 1, 1]));
    let block = Type::Struct {
        name: None,
        fields: vec![StructField {
            ty: Type::runtime_array(Type::uint(32)),
            offset: Some(0),
        }],
        block: true,
    };
    b.add_variable(Variable::new("data", VariableMode::Ssbo, block));
    let (spirv, module) = compile_with(b, &CompileOptions::with_version(1, 0));

    assert!(has_ext(&module, "SPV_KHR_storage_buffer_storage_class"));
    assert!(
        spirv
            .interface()
            .extensions
            .iter()
            .any(|e| e == "SPV_KHR_storage_buffer_storage_class")
    );
}

#[test]
fn test_unsupported_pointer_size_is_an_error() {
    let b = ShaderBuilder::new(StageInfo::Compute {
        local_size: Some([1, 1, 1]),
        ptr_size: 16,
        shared_size: 0,
    });
    let result = compile(&b.finish().unwrap(), &CompileOptions::default());
    assert!(matches!(result, Err(CompilerError::SpirvError(_))));
}

fn main_insts(module: &Module) -> Vec<&Instruction> {
    module
        .functions
        .last()
        .unwrap()
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .collect()
}

fn named(module: &Module, name: &str) -> Option<Word> {
    module
        .debug_names
        .iter()
        .find(|n| n.class.opcode == Op::Name && n.operands[1] == Operand::LiteralString(name.to_string()))
        .and_then(|n| match n.operands[0] {
            Operand::IdRef(id) => Some(id),
            _ => None,
        })
}

fn decoration(module: &Module, target: Word, decoration: Decoration) -> Option<u32> {
    module
        .annotations
        .iter()
        .find(|a| a.operands[0] == Operand::IdRef(target) && a.operands[1] == Operand::Decoration(decoration))
        .map(|a| match a.operands.get(2) {
            Some(Operand::LiteralBit32(v)) => *v,
            _ => 0,
        })
}

fn interlocked(mode: InterlockMode) -> Module {
    let mut b = ShaderBuilder::new(StageInfo::Fragment {
        depth_layout: DepthLayout::Any,
        early_fragment_tests: false,
        post_depth_coverage: false,
        uses_sample_shading: false,
        interlock: Some(mode),
    });
    b.intrinsic_void(Intrinsic::BeginInvocationInterlock).unwrap();
    b.intrinsic_void(Intrinsic::EndInvocationInterlock).unwrap();
    lower(b)
}

#[test]
fn test_pixel_interlock() {
    let module = interlocked(InterlockMode::PixelOrdered);
    assert!(has_ext(&module, "SPV_EXT_fragment_shader_interlock"));
    assert!(has_cap(&module, Capability::FragmentShaderPixelInterlockEXT));
    assert!(!has_cap(&module, Capability::FragmentShaderSampleInterlockEXT));
    assert!(exec_mode(&module, ExecutionMode::PixelInterlockOrderedEXT).is_some());

    let ops = main_insts(&module).iter().map(|i| i.class.opcode).collect::<Vec<_>>();
    let begin = ops.iter().position(|&op| op == Op::BeginInvocationInterlockEXT).unwrap();
    let end = ops.iter().position(|&op| op == Op::EndInvocationInterlockEXT).unwrap();
    assert!(begin < end);
}

#[test]
fn test_sample_interlock() {
    let module = interlocked(InterlockMode::SampleUnordered);
    assert!(has_cap(&module, Capability::FragmentShaderSampleInterlockEXT));
    assert!(!has_cap(&module, Capability::FragmentShaderPixelInterlockEXT));
    assert!(exec_mode(&module, ExecutionMode::SampleInterlockUnorderedEXT).is_some());
    assert!(exec_mode(&module, ExecutionMode::PixelInterlockOrderedEXT).is_none());
}

#[test]
fn test_no_interlock_by_default() {
    let module = lower(fragment());
    assert!(!has_ext(&module, "SPV_EXT_fragment_shader_interlock"));
    assert!(!has_cap(&module, Capability::FragmentShaderPixelInterlockEXT));
    assert!(!has_cap(&module, Capability::FragmentShaderSampleInterlockEXT));
}

fn vec4_output(name: &str, location: u32) -> Variable {
    let mut var = Variable::new(name, VariableMode::ShaderOut, Type::vector(BaseType::Float, 32, 4));
    var.driver_location = location;
    var
}

/// Writes a constant vec4 to `color` and captures two of its components.
fn capture_color(b: &mut ShaderBuilder) -> VariableId {
    let color = b.add_variable(vec4_output("color", 2));
    b.add_stream_output(StreamOutput {
        source: color,
        start_component: 1,
        num_components: 2,
        buffer: 1,
        offset: 8,
        stride: 16,
        stream: 0,
    })
    .unwrap();
    let one = 1.0f32.to_bits() as u64;
    let value = b.load_const(32, &[one, one, one, one]).unwrap();
    let ptr = b.deref_var(color).unwrap();
    b.store_deref(ptr, value, 0xf).unwrap();
    color
}

#[test]
fn test_stream_output_declaration() {
    let mut b = ShaderBuilder::new(StageInfo::Vertex);
    capture_color(&mut b);
    let module = lower(b);

    assert!(has_cap(&module, Capability::TransformFeedback));
    assert!(exec_mode(&module, ExecutionMode::Xfb).is_some());

    let xfb = named(&module, "xfb0").expect("no transform feedback variable");
    assert_eq!(decoration(&module, xfb, Decoration::Location), Some(3));
    assert_eq!(decoration(&module, xfb, Decoration::Component), Some(1));
    assert_eq!(decoration(&module, xfb, Decoration::Offset), Some(8));
    assert_eq!(decoration(&module, xfb, Decoration::XfbBuffer), Some(1));
    assert_eq!(decoration(&module, xfb, Decoration::XfbStride), Some(16));
    assert_eq!(decoration(&module, xfb, Decoration::Stream), None);
    assert!(module.entry_points[0].operands[3..].contains(&Operand::IdRef(xfb)));
}

#[test]
fn test_vertex_copies_stream_output_before_return() {
    let mut b = ShaderBuilder::new(StageInfo::Vertex);
    capture_color(&mut b);
    let module = lower(b);

    let xfb = named(&module, "xfb0").unwrap();
    let insts = main_insts(&module);
    let n = insts.len();
    assert_eq!(insts[n - 1].class.opcode, Op::Return);
    assert_eq!(insts[n - 2].class.opcode, Op::Store);
    assert_eq!(insts[n - 2].operands[0], Operand::IdRef(xfb));
    // Components 1 and 2 of the loaded vec4.
    assert_eq!(insts[n - 3].class.opcode, Op::VectorShuffle);
    assert_eq!(
        insts[n - 3].operands[2..],
        [Operand::LiteralBit32(1), Operand::LiteralBit32(2)]
    );
}

#[test]
fn test_geometry_copies_stream_output_at_each_vertex() {
    let mut b = ShaderBuilder::new(StageInfo::Geometry {
        input: GeometryInput::Points,
        output: GeometryOutput::Points,
        invocations: 1,
        vertices_out: 2,
        active_stream_mask: 0b1,
    });
    capture_color(&mut b);
    b.intrinsic_void(Intrinsic::EmitVertex { stream: 0 }).unwrap();
    b.intrinsic_void(Intrinsic::EmitVertex { stream: 0 }).unwrap();
    let module = lower(b);

    let xfb = named(&module, "xfb0").unwrap();
    let insts = main_insts(&module);
    let emits = insts
        .iter()
        .enumerate()
        .filter(|(_, i)| i.class.opcode == Op::EmitVertex)
        .map(|(pos, _)| pos)
        .collect::<Vec<_>>();
    assert_eq!(emits.len(), 2);
    for pos in emits {
        assert_eq!(insts[pos - 1].class.opcode, Op::Store);
        assert_eq!(insts[pos - 1].operands[0], Operand::IdRef(xfb));
    }
    // Nothing is copied again on return.
    let stores = insts.iter().filter(|i| i.class.opcode == Op::Store).count();
    assert_eq!(stores, 3);
}

#[test]
fn test_stream_output_of_missing_components_is_an_error() {
    let mut b = ShaderBuilder::new(StageInfo::Vertex);
    let color = b.add_variable(vec4_output("color", 0));
    b.add_stream_output(StreamOutput {
        source: color,
        start_component: 3,
        num_components: 2,
        buffer: 0,
        offset: 0,
        stride: 8,
        stream: 0,
    })
    .unwrap();
    let result = compile(&b.finish().unwrap(), &CompileOptions::default());
    assert!(matches!(result, Err(CompilerError::SpirvError(_))));
}

fn shared_compute() -> ShaderBuilder {
    ShaderBuilder::new(StageInfo::Compute {
        local_size: Some([1, 1, 1]),
        ptr_size: 0,
        shared_size: 64,
    })
}

fn shared_atomic(bits: u8) -> Module {
    let mut b = shared_compute();
    let offset = b.imm_u32(0).unwrap();
    let data = b.load_const(bits, &[1]).unwrap();
    b.intrinsic(
        Intrinsic::SharedAtomic {
            op: AtomicOp::Add,
            offset,
            data,
            compare: None,
        },
        bits,
        1,
    )
    .unwrap();
    lower(b)
}

#[test]
fn test_int64_atomics_only_for_64_bit_atomics() {
    assert!(has_cap(&shared_atomic(64), Capability::Int64Atomics));
    assert!(!has_cap(&shared_atomic(32), Capability::Int64Atomics));
}

#[test]
fn test_ballot_capability_only_when_used() {
    let mut b = shared_compute();
    let value = b.imm_bool(true).unwrap();
    b.intrinsic(Intrinsic::Ballot { value }, 32, 4).unwrap();
    let module = lower(b);
    assert!(has_cap(&module, Capability::SubgroupBallotKHR));
    assert!(has_ext(&module, "SPV_KHR_shader_ballot"));

    let module = lower(shared_compute());
    assert!(!has_cap(&module, Capability::SubgroupBallotKHR));
    assert!(!has_ext(&module, "SPV_KHR_shader_ballot"));
}
