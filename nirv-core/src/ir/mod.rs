//! Structured SSA shader IR.
//!
//! This is the input of the SPIR-V backend:
//! - **SSA values** (`ValueId`) are produced exactly once by an instruction's `dest`
//! - **Registers** (`RegisterId`) are mutable slots, read and written explicitly
//! - **Structured control flow**: a tree of blocks, `if` and `loop` nodes
//!
//! Values carry no numeric type, only a bit size and a component count. Each
//! operation decides how to interpret the bits of its operands.
//!
//! ```text
//! bb0:
//!     %0 = load_const 0x2a          (32 bits x 1)
//!     %1 = deref var0
//!     store_deref %1, %0
//! if %2 {
//!     bb1: ...
//! } else {
//!     bb2: ...
//! }
//! bb3: ...
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod builder;
mod ops;

#[cfg(test)]
mod builder_tests;

pub use ops::*;

// =============================================================================
// ID Types
// =============================================================================

/// SSA value - defined exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ValueId {
    fn from(id: u32) -> Self {
        ValueId(id)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Basic block. Dense within a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for BlockId {
    fn from(id: u32) -> Self {
        BlockId(id)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Mutable register, lowered to a function-local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterId(pub u32);

impl RegisterId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for RegisterId {
    fn from(id: u32) -> Self {
        RegisterId(id)
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Index into `Shader::variables`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(pub u32);

impl VariableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for VariableId {
    fn from(id: u32) -> Self {
        VariableId(id)
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Bool,
    Int,
    Uint,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageDim {
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "2d")]
    D2,
    #[serde(rename = "3d")]
    D3,
    Cube,
    Rect,
    Buffer,
    External,
    Ms,
    Subpass,
    SubpassMs,
}

/// Shape of a sampled image or storage image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageType {
    pub dim: ImageDim,
    #[serde(default)]
    pub arrayed: bool,
    pub result: BaseType,
    #[serde(default)]
    pub shadow: bool,
}

impl ImageType {
    /// Number of coordinate components used to address a texel.
    pub fn coordinate_components(&self) -> u8 {
        let base = match self.dim {
            ImageDim::D1 | ImageDim::Buffer => 1,
            ImageDim::D2 | ImageDim::Rect | ImageDim::Ms | ImageDim::External => 2,
            ImageDim::Subpass | ImageDim::SubpassMs => 2,
            ImageDim::D3 | ImageDim::Cube => 3,
        };
        base + self.arrayed as u8
    }

    pub fn is_multisampled(&self) -> bool {
        matches!(self.dim, ImageDim::Ms | ImageDim::SubpassMs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub ty: Type,
    /// Explicit byte offset; fields without one get no `Offset` decoration.
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    Scalar {
        base: BaseType,
        bits: u8,
    },
    Vector {
        base: BaseType,
        bits: u8,
        components: u8,
    },
    /// Column-major float matrix.
    Matrix {
        bits: u8,
        columns: u8,
        rows: u8,
    },
    /// `length: None` is a runtime-sized array. A zero stride is derived from
    /// the element's bit width for scalar elements.
    Array {
        element: Box<Type>,
        #[serde(default)]
        length: Option<u32>,
        #[serde(default)]
        stride: u32,
    },
    /// `block` marks an interface block (uniform/storage/push-constant).
    Struct {
        #[serde(default)]
        name: Option<String>,
        fields: Vec<StructField>,
        #[serde(default)]
        block: bool,
    },
    Sampler(ImageType),
    Image(ImageType),
}

impl Type {
    pub fn scalar(base: BaseType, bits: u8) -> Type {
        Type::Scalar { base, bits }
    }

    pub fn vector(base: BaseType, bits: u8, components: u8) -> Type {
        if components == 1 {
            Type::Scalar { base, bits }
        } else {
            Type::Vector {
                base,
                bits,
                components,
            }
        }
    }

    pub fn uint(bits: u8) -> Type {
        Type::scalar(BaseType::Uint, bits)
    }

    pub fn int(bits: u8) -> Type {
        Type::scalar(BaseType::Int, bits)
    }

    pub fn float(bits: u8) -> Type {
        Type::scalar(BaseType::Float, bits)
    }

    pub fn bool() -> Type {
        Type::scalar(BaseType::Bool, 1)
    }

    pub fn array(element: Type, length: u32) -> Type {
        Type::Array {
            element: Box::new(element),
            length: Some(length),
            stride: 0,
        }
    }

    pub fn runtime_array(element: Type) -> Type {
        Type::Array {
            element: Box::new(element),
            length: None,
            stride: 0,
        }
    }

    /// Strip every array level.
    pub fn without_array(&self) -> &Type {
        match self {
            Type::Array { element, .. } => element.without_array(),
            other => other,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct { .. })
    }

    /// Product of all array lengths (runtime arrays count as 1).
    pub fn aoa_size(&self) -> u32 {
        match self {
            Type::Array { element, length, .. } => length.unwrap_or(1) * element.aoa_size(),
            _ => 1,
        }
    }

    /// Component count of a scalar or vector type.
    pub fn vector_components(&self) -> u8 {
        match self {
            Type::Scalar { .. } => 1,
            Type::Vector { components, .. } => *components,
            Type::Matrix { rows, .. } => *rows,
            _ => 1,
        }
    }

    /// Bit width of the scalar elements, if any.
    pub fn bit_size(&self) -> Option<u8> {
        match self {
            Type::Scalar { bits, .. } | Type::Vector { bits, .. } | Type::Matrix { bits, .. } => Some(*bits),
            Type::Array { element, .. } => element.bit_size(),
            _ => None,
        }
    }

    pub fn base_type(&self) -> Option<BaseType> {
        match self {
            Type::Scalar { base, .. } | Type::Vector { base, .. } => Some(*base),
            Type::Matrix { .. } => Some(BaseType::Float),
            Type::Array { element, .. } => element.base_type(),
            _ => None,
        }
    }

    pub fn image_type(&self) -> Option<&ImageType> {
        match self.without_array() {
            Type::Sampler(image) | Type::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self.without_array(), Type::Sampler(_))
    }

    pub fn is_image(&self) -> bool {
        matches!(self.without_array(), Type::Image(_))
    }
}

// =============================================================================
// Variables
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableMode {
    #[default]
    FunctionTemp,
    ShaderIn,
    ShaderOut,
    /// Samplers (sampled images).
    Uniform,
    /// Storage images.
    Image,
    Ubo,
    Ssbo,
    PushConst,
}

/// Well-known varying and fragment-result slots that map to SPIR-V builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinSlot {
    Position,
    PointSize,
    ClipDistance,
    CullDistance,
    Layer,
    ViewportIndex,
    PrimitiveId,
    FragCoord,
    PointCoord,
    FrontFacing,
    TessLevelOuter,
    TessLevelInner,
    FragDepth,
    SampleMask,
    StencilRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Generic varying addressed by `driver_location`.
    #[default]
    Location,
    BuiltIn(BuiltinSlot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Smooth,
    Flat,
    NoPerspective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Access {
    pub restrict: bool,
    pub non_readable: bool,
    pub non_writable: bool,
    pub coherent: bool,
    pub volatile: bool,
    pub non_uniform: bool,
}

/// Storage image texel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TexelFormat {
    Rgba32f,
    Rgba16f,
    R32f,
    Rgba8,
    Rgba8Snorm,
    Rgba32i,
    Rgba16i,
    Rgba8i,
    R32i,
    Rgba32ui,
    Rgba16ui,
    Rgba8ui,
    R32ui,
    Rg32f,
    Rg16f,
    R11fG11fB10f,
    R16f,
    Rgba16,
    Rgb10A2,
    Rg16,
    Rg8,
    R16,
    R8,
    Rg32i,
    Rg16i,
    R16i,
    R8i,
    Rg32ui,
    Rg16ui,
    R16ui,
    R8ui,
    R64ui,
    R64i,
}

impl TexelFormat {
    /// Formats outside the base Shader capability set.
    pub fn is_extended(self) -> bool {
        !matches!(
            self,
            TexelFormat::Rgba32f
                | TexelFormat::Rgba16f
                | TexelFormat::R32f
                | TexelFormat::Rgba8
                | TexelFormat::Rgba8Snorm
                | TexelFormat::Rgba32i
                | TexelFormat::Rgba16i
                | TexelFormat::Rgba8i
                | TexelFormat::R32i
                | TexelFormat::Rgba32ui
                | TexelFormat::Rgba16ui
                | TexelFormat::Rgba8ui
                | TexelFormat::R32ui
                | TexelFormat::R64ui
                | TexelFormat::R64i
        )
    }

    pub fn is_64bit(self) -> bool {
        matches!(self, TexelFormat::R64ui | TexelFormat::R64i)
    }
}

/// Transform feedback capture of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct XfbInfo {
    pub buffer: u32,
    pub stride: u32,
    pub offset: u32,
    #[serde(default)]
    pub stream: u32,
}

/// Components of an output captured into their own transform feedback
/// variable. The output is copied into it when the vertex is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOutput {
    /// A `ShaderOut` variable.
    pub source: VariableId,
    #[serde(default)]
    pub start_component: u8,
    pub num_components: u8,
    pub buffer: u32,
    /// Byte offset within the buffer.
    pub offset: u32,
    /// Byte stride of the buffer.
    pub stride: u32,
    #[serde(default)]
    pub stream: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Variable {
    pub name: Option<String>,
    pub mode: VariableMode,
    pub ty: Option<Type>,
    pub slot: Slot,
    pub driver_location: u32,
    pub component: u32,
    /// Dual-source blend index for fragment outputs.
    pub index: u32,
    pub descriptor_set: u32,
    pub binding: u32,
    pub interpolation: Interpolation,
    pub centroid: bool,
    pub sample: bool,
    pub patch: bool,
    pub mediump: bool,
    pub access: Access,
    pub format: Option<TexelFormat>,
    pub xfb: Option<XfbInfo>,
}

impl Variable {
    pub fn new(name: &str, mode: VariableMode, ty: Type) -> Self {
        Variable {
            name: Some(name.to_string()),
            mode,
            ty: Some(ty),
            ..Default::default()
        }
    }

    /// Declared type. Every variable in a built shader has one.
    pub fn ty(&self) -> &Type {
        match &self.ty {
            Some(ty) => ty,
            None => panic!("BUG: variable {:?} has no type.", self.name),
        }
    }

    pub fn builtin(&self) -> Option<BuiltinSlot> {
        match self.slot {
            Slot::BuiltIn(b) => Some(b),
            Slot::Location => None,
        }
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// Destination of an instruction: a fresh SSA value and its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Def {
    pub value: ValueId,
    pub bit_size: u8,
    pub components: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpKind {
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerefKind {
    Var,
    Array { parent: ValueId, index: ValueId },
    Struct { parent: ValueId, field: u32 },
}

/// Pointer into a variable. `ty` is the type of the pointee after this step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deref {
    pub var: VariableId,
    pub ty: Type,
    pub kind: DerefKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum InstKind {
    /// One literal per component, low bits significant.
    LoadConst(Vec<u64>),
    Undef,
    Alu(AluInst),
    Intrinsic(Intrinsic),
    Tex(Box<TexInst>),
    Deref(Deref),
    LoadReg(RegisterId),
    StoreReg { reg: RegisterId, value: ValueId },
    Jump(JumpKind),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inst {
    #[serde(default)]
    pub dest: Option<Def>,
    pub kind: InstKind,
}

impl Inst {
    pub fn is_jump(&self) -> bool {
        matches!(self.kind, InstKind::Jump(_))
    }
}

// =============================================================================
// Control flow
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub insts: Vec<Inst>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfNode {
    pub condition: ValueId,
    pub then_body: Vec<CfNode>,
    /// Empty when the `if` has no else branch.
    #[serde(default)]
    pub else_body: Vec<CfNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopNode {
    pub body: Vec<CfNode>,
}

/// A node of the structured control-flow tree. Every non-empty list of nodes
/// starts with a `Block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CfNode {
    Block(Block),
    If(IfNode),
    Loop(LoopNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDecl {
    pub bit_size: u8,
    pub components: u8,
}

// =============================================================================
// Stage metadata
// =============================================================================

/// Shader stages in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TessPrimitive {
    Triangles,
    Quads,
    Isolines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TessSpacing {
    Equal,
    FractionalOdd,
    FractionalEven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryInput {
    Points,
    Lines,
    LinesAdjacency,
    Triangles,
    TrianglesAdjacency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryOutput {
    Points,
    LineStrip,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthLayout {
    #[default]
    Any,
    Greater,
    Less,
    Unchanged,
}

/// Fragment shader interlock ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterlockMode {
    PixelOrdered,
    PixelUnordered,
    SampleOrdered,
    SampleUnordered,
}

impl InterlockMode {
    pub fn is_pixel(self) -> bool {
        matches!(self, InterlockMode::PixelOrdered | InterlockMode::PixelUnordered)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageInfo {
    Vertex,
    TessControl {
        vertices_out: u32,
    },
    TessEval {
        primitive: TessPrimitive,
        #[serde(default)]
        vertex_order_ccw: bool,
        spacing: TessSpacing,
        #[serde(default)]
        point_mode: bool,
    },
    Geometry {
        input: GeometryInput,
        output: GeometryOutput,
        #[serde(default)]
        invocations: u32,
        vertices_out: u32,
        #[serde(default)]
        active_stream_mask: u8,
    },
    Fragment {
        #[serde(default)]
        depth_layout: DepthLayout,
        #[serde(default)]
        early_fragment_tests: bool,
        #[serde(default)]
        post_depth_coverage: bool,
        #[serde(default)]
        uses_sample_shading: bool,
        #[serde(default)]
        interlock: Option<InterlockMode>,
    },
    Compute {
        /// `None` makes the workgroup size a set of specialization constants.
        #[serde(default)]
        local_size: Option<[u32; 3]>,
        /// Pointer width in bits; 0 selects the logical addressing model.
        #[serde(default)]
        ptr_size: u32,
        /// Bytes of workgroup-shared memory.
        #[serde(default)]
        shared_size: u32,
    },
}

impl StageInfo {
    pub fn stage(&self) -> Stage {
        match self {
            StageInfo::Vertex => Stage::Vertex,
            StageInfo::TessControl { .. } => Stage::TessControl,
            StageInfo::TessEval { .. } => Stage::TessEval,
            StageInfo::Geometry { .. } => Stage::Geometry,
            StageInfo::Fragment { .. } => Stage::Fragment,
            StageInfo::Compute { .. } => Stage::Compute,
        }
    }

    pub fn fragment() -> StageInfo {
        StageInfo::Fragment {
            depth_layout: DepthLayout::Any,
            early_fragment_tests: false,
            post_depth_coverage: false,
            uses_sample_shading: false,
            interlock: None,
        }
    }

    pub fn compute(local_size: [u32; 3]) -> StageInfo {
        StageInfo::Compute {
            local_size: Some(local_size),
            ptr_size: 0,
            shared_size: 0,
        }
    }
}

// =============================================================================
// Shader
// =============================================================================

/// One shader: a single entry function plus its declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shader {
    #[serde(default)]
    pub name: Option<String>,
    pub info: StageInfo,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub registers: Vec<RegisterDecl>,
    pub body: Vec<CfNode>,
    /// Upper bound on `ValueId`s used by the body.
    pub num_values: u32,
    /// Upper bound on `BlockId`s used by the body.
    pub num_blocks: u32,
    /// Bytes of per-invocation scratch memory.
    #[serde(default)]
    pub scratch_size: u32,
    /// Transform feedback captures of the last vertex-processing stage.
    #[serde(default)]
    pub streamout: Vec<StreamOutput>,
}

impl Shader {
    pub fn stage(&self) -> Stage {
        self.info.stage()
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.index()]
    }

    pub fn variables_with_mode(&self, mode: VariableMode) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .filter(move |(_, v)| v.mode == mode)
            .map(|(i, v)| (VariableId(i as u32), v))
    }

    /// Visit every instruction in source order.
    pub fn for_each_inst(&self, mut f: impl FnMut(&Inst)) {
        fn walk(nodes: &[CfNode], f: &mut dyn FnMut(&Inst)) {
            for node in nodes {
                match node {
                    CfNode::Block(block) => block.insts.iter().for_each(&mut *f),
                    CfNode::If(if_node) => {
                        walk(&if_node.then_body, f);
                        walk(&if_node.else_body, f);
                    }
                    CfNode::Loop(loop_node) => walk(&loop_node.body, f),
                }
            }
        }
        walk(&self.body, &mut f);
    }

    pub fn any_inst(&self, mut pred: impl FnMut(&Inst) -> bool) -> bool {
        let mut found = false;
        self.for_each_inst(|inst| found |= pred(inst));
        found
    }
}
