use rspirv::dr::{Instruction, Module, Operand, load_words};
use rspirv::spirv::{Capability, Op, StorageClass, Word};

use super::compile;
use crate::ir::builder::ShaderBuilder;
use crate::ir::*;
use crate::options::CompileOptions;

fn lower_with(b: ShaderBuilder, options: &CompileOptions) -> Module {
    let spirv = compile(&b.finish().unwrap(), options).unwrap();
    load_words(&spirv.words).unwrap()
}

fn lower(b: ShaderBuilder) -> Module {
    lower_with(b, &CompileOptions::default())
}

fn sparse_options() -> CompileOptions {
    CompileOptions {
        sparse_residency: true,
        ..Default::default()
    }
}

fn compute() -> ShaderBuilder {
    ShaderBuilder::new(StageInfo::compute([1, 1, 1]))
}

fn main_insts(module: &Module, op: Op) -> Vec<&Instruction> {
    module
        .functions
        .last()
        .unwrap()
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .filter(|i| i.class.opcode == op)
        .collect()
}

fn global(module: &Module, id: Word) -> &Instruction {
    module
        .types_global_values
        .iter()
        .find(|i| i.result_id == Some(id))
        .unwrap_or_else(|| panic!("%{} is not a global", id))
}

fn id_ref(operand: &Operand) -> Word {
    match operand {
        Operand::IdRef(id) => *id,
        other => panic!("{:?} is not an id", other),
    }
}

/// The literal of the constant an operand refers to.
fn constant_value(module: &Module, operand: &Operand) -> Operand {
    let constant = global(module, id_ref(operand));
    assert_eq!(constant.class.opcode, Op::Constant);
    constant.operands[0].clone()
}

/// Width of the integer type `id`.
fn int_width(module: &Module, id: Word) -> u32 {
    let ty = global(module, id);
    assert_eq!(ty.class.opcode, Op::TypeInt);
    match ty.operands[0] {
        Operand::LiteralBit32(width) => width,
        ref other => panic!("unexpected width {:?}", other),
    }
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

// -----------------------------------------------------------------------------
// Buffer atomics
// -----------------------------------------------------------------------------

fn storage_buffer(bits: u8) -> Variable {
    let block = Type::Struct {
        name: None,
        fields: vec![StructField {
            ty: Type::runtime_array(Type::uint(bits)),
            offset: Some(0),
        }],
        block: true,
    };
    Variable::new("data", VariableMode::Ssbo, block)
}

/// Deref of element 1 of a storage buffer holding `bits`-wide integers.
fn buffer_element(b: &mut ShaderBuilder, bits: u8) -> ValueId {
    let data = b.add_variable(storage_buffer(bits));
    let block = b.deref_var(data).unwrap();
    let member = b.deref_struct(block, 0).unwrap();
    let index = b.imm_u32(1).unwrap();
    b.deref_array(member, index).unwrap()
}

#[test]
fn test_buffer_atomic_add() {
    let mut b = compute();
    let deref = buffer_element(&mut b, 32);
    let data = b.imm_u32(5).unwrap();
    b.intrinsic(
        Intrinsic::DerefAtomic {
            op: AtomicOp::Add,
            deref,
            data,
            compare: None,
        },
        32,
        1,
    )
    .unwrap();
    let module = lower(b);

    let element = main_insts(&module, Op::AccessChain).last().unwrap().result_id.unwrap();
    let adds = main_insts(&module, Op::AtomicIAdd);
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].operands[0], Operand::IdRef(element));
    assert_eq!(constant_value(&module, &adds[0].operands[3]), Operand::LiteralBit32(5));
    assert!(!has_cap(&module, Capability::Int64Atomics));
}

#[test]
fn test_compare_swap_puts_value_before_comparator() {
    let mut b = compute();
    let deref = buffer_element(&mut b, 32);
    let data = b.imm_u32(7).unwrap();
    let compare = b.imm_u32(3).unwrap();
    b.intrinsic(
        Intrinsic::DerefAtomic {
            op: AtomicOp::CompSwap,
            deref,
            data,
            compare: Some(compare),
        },
        32,
        1,
    )
    .unwrap();
    let module = lower(b);

    let swaps = main_insts(&module, Op::AtomicCompareExchange);
    assert_eq!(swaps.len(), 1);
    let operands = &swaps[0].operands;
    assert_eq!(operands.len(), 6);
    assert_eq!(constant_value(&module, &operands[4]), Operand::LiteralBit32(7));
    assert_eq!(constant_value(&module, &operands[5]), Operand::LiteralBit32(3));
}

#[test]
fn test_64_bit_buffer_atomic() {
    let mut b = compute();
    let deref = buffer_element(&mut b, 64);
    let data = b.load_const(64, &[1 << 40]).unwrap();
    b.intrinsic(
        Intrinsic::DerefAtomic {
            op: AtomicOp::Umax,
            deref,
            data,
            compare: None,
        },
        64,
        1,
    )
    .unwrap();
    let module = lower(b);

    let atomics = main_insts(&module, Op::AtomicUMax);
    assert_eq!(atomics.len(), 1);
    assert_eq!(int_width(&module, atomics[0].result_type.unwrap()), 64);
    assert!(has_cap(&module, Capability::Int64Atomics));
}

// -----------------------------------------------------------------------------
// Storage images
// -----------------------------------------------------------------------------

fn storage_image(format: TexelFormat) -> Variable {
    let mut var = Variable::new(
        "img",
        VariableMode::Image,
        Type::Image(ImageType {
            dim: ImageDim::D2,
            arrayed: false,
            result: BaseType::Uint,
            shadow: false,
        }),
    );
    var.format = Some(format);
    var
}

/// Deref of a 2D storage image and a constant coordinate into it.
fn image_and_coord(b: &mut ShaderBuilder, format: TexelFormat) -> (ValueId, ValueId) {
    let img = b.add_variable(storage_image(format));
    let image = b.deref_var(img).unwrap();
    let coord = b.load_const(32, &[3, 4]).unwrap();
    (image, coord)
}

#[test]
fn test_image_load_and_store() {
    let mut b = compute();
    let (image, coord) = image_and_coord(&mut b, TexelFormat::Rgba32ui);
    let texel = b
        .intrinsic(
            Intrinsic::ImageLoad {
                image,
                coord,
                sample: None,
                residency: None,
            },
            32,
            4,
        )
        .unwrap();
    b.intrinsic_void(Intrinsic::ImageStore {
        image,
        coord,
        sample: None,
        texel,
    })
    .unwrap();
    let module = lower(b);

    let reads = main_insts(&module, Op::ImageRead);
    let writes = main_insts(&module, Op::ImageWrite);
    assert_eq!(reads.len(), 1);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].operands[2], Operand::IdRef(reads[0].result_id.unwrap()));
    assert!(!has_cap(&module, Capability::SparseResidency));
    assert!(!has_cap(&module, Capability::StorageImageExtendedFormats));
}

fn image_atomic(bits: u8, format: TexelFormat) -> Module {
    let mut b = compute();
    let (image, coord) = image_and_coord(&mut b, format);
    let data = b.load_const(bits, &[1]).unwrap();
    b.intrinsic(
        Intrinsic::ImageAtomic {
            op: AtomicOp::Add,
            image,
            coord,
            sample: None,
            data,
            compare: None,
        },
        bits,
        1,
    )
    .unwrap();
    lower(b)
}

/// Width of the integer the texel pointer of the single image atomic points to.
fn texel_pointer_width(module: &Module) -> u32 {
    let pointers = main_insts(module, Op::ImageTexelPointer);
    assert_eq!(pointers.len(), 1);
    let pointer_type = global(module, pointers[0].result_type.unwrap());
    assert_eq!(pointer_type.operands[0], Operand::StorageClass(StorageClass::Image));
    int_width(module, id_ref(&pointer_type.operands[1]))
}

#[test]
fn test_image_atomic_texel_pointer() {
    let module = image_atomic(32, TexelFormat::R32ui);
    assert_eq!(texel_pointer_width(&module), 32);
    assert_eq!(main_insts(&module, Op::AtomicIAdd).len(), 1);
    assert!(!has_cap(&module, Capability::Int64ImageEXT));
    assert!(!has_ext(&module, "SPV_EXT_shader_image_int64"));
}

#[test]
fn test_64_bit_image_atomic() {
    let module = image_atomic(64, TexelFormat::R64ui);
    assert_eq!(texel_pointer_width(&module), 64);
    assert!(has_cap(&module, Capability::Int64ImageEXT));
    assert!(has_cap(&module, Capability::Int64Atomics));
    assert!(has_ext(&module, "SPV_EXT_shader_image_int64"));

    let image = module
        .types_global_values
        .iter()
        .find(|i| i.class.opcode == Op::TypeImage)
        .unwrap();
    assert_eq!(int_width(&module, id_ref(&image.operands[0])), 64);
    assert!(!has_cap(&module, Capability::StorageImageExtendedFormats));
}

#[test]
fn test_sparse_image_load() {
    let mut b = compute();
    let (image, coord) = image_and_coord(&mut b, TexelFormat::Rgba32ui);
    let code = b.alloc_value();
    b.intrinsic(
        Intrinsic::ImageLoad {
            image,
            coord,
            sample: None,
            residency: Some(code),
        },
        32,
        4,
    )
    .unwrap();
    b.intrinsic(Intrinsic::IsSparseTexelsResident { code }, 1, 1).unwrap();
    let module = lower_with(b, &sparse_options());

    assert_eq!(main_insts(&module, Op::ImageSparseRead).len(), 1);
    assert_eq!(main_insts(&module, Op::ImageRead).len(), 0);
    let resident = main_insts(&module, Op::ImageSparseTexelsResident);
    assert_eq!(resident.len(), 1);
    let code = main_insts(&module, Op::CompositeExtract)[0].result_id.unwrap();
    assert_eq!(resident[0].operands[0], Operand::IdRef(code));
    assert!(has_cap(&module, Capability::SparseResidency));
}

#[test]
#[should_panic(expected = "sparse_residency")]
fn test_sparse_load_requires_option() {
    let mut b = compute();
    let (image, coord) = image_and_coord(&mut b, TexelFormat::Rgba32ui);
    let code = b.alloc_value();
    b.intrinsic(
        Intrinsic::ImageLoad {
            image,
            coord,
            sample: None,
            residency: Some(code),
        },
        32,
        4,
    )
    .unwrap();
    lower(b);
}

// -----------------------------------------------------------------------------
// Textures
// -----------------------------------------------------------------------------

fn sampler(shadow: bool) -> Variable {
    let mut var = Variable::new(
        "tex",
        VariableMode::Uniform,
        Type::Sampler(ImageType {
            dim: ImageDim::D2,
            arrayed: false,
            result: BaseType::Float,
            shadow,
        }),
    );
    var.driver_location = 0;
    var
}

/// A fragment shader with one sampler and a constant coordinate.
fn textured(shadow: bool) -> (ShaderBuilder, TexInst) {
    let mut b = ShaderBuilder::new(StageInfo::fragment());
    b.add_variable(sampler(shadow));
    let half = 0.5f32.to_bits() as u64;
    let coord = b.load_const(32, &[half, half]).unwrap();
    let mut tex = TexInst::new(TexOp::Tex, 0, BaseType::Float);
    tex.coord = Some(coord);
    (b, tex)
}

#[test]
fn test_sparse_sample() {
    let (mut b, mut tex) = textured(false);
    tex.residency = Some(b.alloc_value());
    b.tex(tex, 32, 4).unwrap();
    let module = lower_with(b, &sparse_options());

    assert_eq!(main_insts(&module, Op::ImageSparseSampleImplicitLod).len(), 1);
    assert_eq!(main_insts(&module, Op::ImageSampleImplicitLod).len(), 0);
    assert!(has_cap(&module, Capability::SparseResidency));
}

#[test]
fn test_plain_sample_is_not_sparse() {
    let (mut b, tex) = textured(false);
    b.tex(tex, 32, 4).unwrap();
    let module = lower_with(b, &sparse_options());
    assert!(!has_cap(&module, Capability::SparseResidency));
}

#[test]
fn test_gather_component() {
    let (mut b, mut tex) = textured(false);
    tex.op = TexOp::Tg4;
    tex.component = 2;
    b.tex(tex, 32, 4).unwrap();
    let module = lower(b);

    let gathers = main_insts(&module, Op::ImageGather);
    assert_eq!(gathers.len(), 1);
    assert_eq!(constant_value(&module, &gathers[0].operands[2]), Operand::LiteralBit32(2));
}

#[test]
fn test_depth_compare_sample() {
    let (mut b, mut tex) = textured(true);
    tex.comparator = Some(b.imm_f32(0.25).unwrap());
    b.tex(tex, 32, 1).unwrap();
    let module = lower(b);

    let samples = main_insts(&module, Op::ImageSampleDrefImplicitLod);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].operands.len(), 3);
    assert_eq!(main_insts(&module, Op::ImageSampleImplicitLod).len(), 0);
}

#[test]
fn test_depth_compare_gather() {
    let (mut b, mut tex) = textured(true);
    tex.op = TexOp::Tg4;
    tex.comparator = Some(b.imm_f32(0.25).unwrap());
    b.tex(tex, 32, 4).unwrap();
    let module = lower(b);

    assert_eq!(main_insts(&module, Op::ImageDrefGather).len(), 1);
    assert_eq!(main_insts(&module, Op::ImageGather).len(), 0);
}

// -----------------------------------------------------------------------------
// Partial stores
// -----------------------------------------------------------------------------

#[test]
fn test_partial_store_ignores_mask_bits_past_the_destination() {
    let mut b = compute();
    let tmp = b.add_variable(Variable::new(
        "tmp",
        VariableMode::FunctionTemp,
        Type::vector(BaseType::Uint, 32, 3),
    ));
    let value = b.load_const(32, &[1, 2, 3]).unwrap();
    let ptr = b.deref_var(tmp).unwrap();
    b.store_deref(ptr, value, 0b1101).unwrap();
    let module = lower(b);

    assert_eq!(main_insts(&module, Op::Store).len(), 2);
    let extracted = main_insts(&module, Op::CompositeExtract)
        .iter()
        .map(|i| i.operands[1].clone())
        .collect::<Vec<_>>();
    assert_eq!(extracted, [Operand::LiteralBit32(0), Operand::LiteralBit32(2)]);
}
