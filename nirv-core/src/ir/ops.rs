//! Operation sets of the IR: ALU opcodes, intrinsics and texture instructions.

use serde::{Deserialize, Serialize};

use super::{Access, BaseType, ValueId};

// =============================================================================
// ALU
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AluOp {
    Mov,

    // Unary arithmetic
    Ineg,
    Fneg,
    Inot,
    Iabs,
    Fabs,
    Isign,
    Fsign,
    Fsqrt,
    Frsq,
    Frcp,
    Flog2,
    Fexp2,
    Ffract,
    Ffloor,
    Fceil,
    Ftrunc,
    FroundEven,
    Fsin,
    Fcos,
    BitfieldReverse,
    BitCount,
    UfindMsb,
    IfindMsb,
    FindLsb,

    // Derivatives
    Fddx,
    FddxCoarse,
    FddxFine,
    Fddy,
    FddyCoarse,
    FddyFine,

    // Conversions
    F2i,
    F2u,
    I2f,
    U2f,
    I2i,
    U2u,
    F2f,
    F2f16Rtz,
    B2i,
    B2f,
    F2b1,
    I2b1,

    // Packing
    PackHalf2x16,
    UnpackHalf2x16,
    #[serde(rename = "pack_64_2x32")]
    Pack64_2x32,
    #[serde(rename = "unpack_64_2x32")]
    Unpack64_2x32,
    PackHalf2x16Split,
    #[serde(rename = "pack_32_2x16_split")]
    Pack32_2x16Split,
    #[serde(rename = "pack_64_2x32_split")]
    Pack64_2x32Split,
    #[serde(rename = "unpack_32_2x16_split_x")]
    Unpack32_2x16SplitX,
    #[serde(rename = "unpack_32_2x16_split_y")]
    Unpack32_2x16SplitY,
    #[serde(rename = "unpack_64_2x32_split_x")]
    Unpack64_2x32SplitX,
    #[serde(rename = "unpack_64_2x32_split_y")]
    Unpack64_2x32SplitY,

    // Binary arithmetic
    Iadd,
    Isub,
    Imul,
    Idiv,
    Udiv,
    Umod,
    Imod,
    Irem,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fmod,
    Frem,
    Fmin,
    Fmax,
    Imin,
    Imax,
    Umin,
    Umax,
    Fdot,

    // Bitwise / logical
    Iand,
    Ior,
    Ixor,
    Ishl,
    Ishr,
    Ushr,

    // Comparisons
    Ilt,
    Ige,
    Ult,
    Uge,
    Ieq,
    Ine,
    Flt,
    Fge,
    Feq,
    Fneu,

    // Ternary and wider
    Flrp,
    Bcsel,
    UbitfieldExtract,
    IbitfieldExtract,
    BitfieldInsert,
    /// Builds a vector from one scalar per source.
    Vec,

    // Never valid here: decomposed before reaching the backend.
    Fdph,
    Seq,
    Sne,
    Slt,
    Sge,
}

impl AluOp {
    /// Numeric interpretation of source `src`.
    pub fn input_type(self, src: usize) -> BaseType {
        use AluOp::*;
        match self {
            Mov | Vec | BitfieldReverse | BitCount | UfindMsb | U2f | U2u | Udiv | Umod | Umin | Umax | Iand
            | Ior | Ixor | Ushr | Ult | Uge | UnpackHalf2x16 | Pack64_2x32 | Pack32_2x16Split
            | Pack64_2x32Split | Unpack32_2x16SplitX | Unpack32_2x16SplitY | Unpack64_2x32SplitX
            | Unpack64_2x32SplitY => BaseType::Uint,

            Ineg | Inot | Iabs | Isign | IfindMsb | FindLsb | I2f | I2i | I2b1 | Iadd | Isub | Imul | Idiv
            | Imod | Irem | Imin | Imax | Ilt | Ige | Ieq | Ine | Ishr => BaseType::Int,

            Fneg | Fabs | Fsign | Fsqrt | Frsq | Frcp | Flog2 | Fexp2 | Ffract | Ffloor | Fceil | Ftrunc
            | FroundEven | Fsin | Fcos | Fddx | FddxCoarse | FddxFine | Fddy | FddyCoarse | FddyFine | F2i
            | F2u | F2f | F2f16Rtz | F2b1 | PackHalf2x16 | Unpack64_2x32 | PackHalf2x16Split | Fadd | Fsub
            | Fmul | Fdiv | Fmod | Frem | Fmin | Fmax | Fdot | Flt | Fge | Feq | Fneu | Flrp | Fdph | Seq
            | Sne | Slt | Sge => BaseType::Float,

            B2i | B2f => BaseType::Bool,

            Ishl => match src {
                0 => BaseType::Int,
                _ => BaseType::Uint,
            },
            Bcsel => match src {
                0 => BaseType::Bool,
                _ => BaseType::Uint,
            },
            UbitfieldExtract | BitfieldInsert => match (self, src) {
                (UbitfieldExtract, 0) | (BitfieldInsert, 0 | 1) => BaseType::Uint,
                _ => BaseType::Int,
            },
            IbitfieldExtract => BaseType::Int,
        }
    }

    /// Numeric interpretation of the result.
    pub fn output_type(self) -> BaseType {
        use AluOp::*;
        match self {
            Mov | Vec | BitfieldReverse | BitCount | F2u | U2u | Udiv | Umod | Umin | Umax | Iand | Ior | Ixor
            | Ushr | Bcsel | UbitfieldExtract | BitfieldInsert | PackHalf2x16 | Unpack64_2x32
            | PackHalf2x16Split | Pack32_2x16Split | Pack64_2x32Split | Unpack32_2x16SplitX
            | Unpack32_2x16SplitY | Unpack64_2x32SplitX | Unpack64_2x32SplitY => BaseType::Uint,

            Ineg | Inot | Iabs | Isign | UfindMsb | IfindMsb | FindLsb | F2i | I2i | B2i | Iadd | Isub
            | Imul | Idiv | Imod | Irem | Imin | Imax | Ishl | Ishr | IbitfieldExtract => BaseType::Int,

            Fneg | Fabs | Fsign | Fsqrt | Frsq | Frcp | Flog2 | Fexp2 | Ffract | Ffloor | Fceil | Ftrunc
            | FroundEven | Fsin | Fcos | Fddx | FddxCoarse | FddxFine | Fddy | FddyCoarse | FddyFine | I2f
            | U2f | F2f | F2f16Rtz | B2f | UnpackHalf2x16 | Pack64_2x32 | Fadd | Fsub | Fmul | Fdiv | Fmod
            | Frem | Fmin | Fmax | Fdot | Flrp | Fdph => BaseType::Float,

            F2b1 | I2b1 | Ilt | Ige | Ult | Uge | Ieq | Ine | Flt | Fge | Feq | Fneu | Seq | Sne | Slt | Sge => {
                BaseType::Bool
            }
        }
    }

}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AluSrc {
    pub value: ValueId,
    /// Components of `value` read by this source. `None` reads the value as-is.
    #[serde(default)]
    pub swizzle: Option<Vec<u8>>,
}

impl AluSrc {
    pub fn new(value: ValueId) -> Self {
        AluSrc { value, swizzle: None }
    }

    pub fn swizzled(value: ValueId, swizzle: &[u8]) -> Self {
        AluSrc {
            value,
            swizzle: Some(swizzle.to_vec()),
        }
    }
}

impl From<ValueId> for AluSrc {
    fn from(value: ValueId) -> Self {
        AluSrc::new(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AluInst {
    pub op: AluOp,
    pub srcs: Vec<AluSrc>,
    /// Forbid contraction into fused operations.
    #[serde(default)]
    pub exact: bool,
}

// =============================================================================
// Intrinsics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicOp {
    Add,
    Imin,
    Umin,
    Imax,
    Umax,
    And,
    Or,
    Xor,
    Exchange,
    CompSwap,
    Fadd,
    Fmin,
    Fmax,
}

impl AtomicOp {
    pub fn is_float(self) -> bool {
        matches!(self, AtomicOp::Fadd | AtomicOp::Fmin | AtomicOp::Fmax)
    }
}

/// Builtin inputs read through `load_system_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemValue {
    FrontFace,
    VertexId,
    InstanceId,
    BaseVertex,
    BaseInstance,
    DrawId,
    PrimitiveId,
    InvocationId,
    SampleId,
    SamplePos,
    SampleMaskIn,
    HelperInvocation,
    PatchVerticesIn,
    TessCoord,
    WorkgroupId,
    NumWorkgroups,
    LocalInvocationId,
    LocalInvocationIndex,
    GlobalInvocationId,
    WorkgroupSize,
    SubgroupId,
    SubgroupSize,
    SubgroupInvocation,
    SubgroupEqMask,
    SubgroupGeMask,
    SubgroupGtMask,
    SubgroupLeMask,
    SubgroupLtMask,
}

impl SystemValue {
    pub fn is_subgroup(self) -> bool {
        matches!(
            self,
            SystemValue::SubgroupId
                | SystemValue::SubgroupSize
                | SystemValue::SubgroupInvocation
                | SystemValue::SubgroupEqMask
                | SystemValue::SubgroupGeMask
                | SystemValue::SubgroupGtMask
                | SystemValue::SubgroupLeMask
                | SystemValue::SubgroupLtMask
        )
    }

    /// Vertex-pipeline values that need `DrawParameters`.
    pub fn is_draw_parameter(self) -> bool {
        matches!(
            self,
            SystemValue::BaseVertex | SystemValue::BaseInstance | SystemValue::DrawId | SystemValue::InstanceId
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierKind {
    /// All memory.
    All,
    Image,
    Buffer,
    Shared,
    /// All memory, visible to the workgroup only.
    Group,
    /// Covered by the control barrier that follows it.
    TcsPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOp {
    All,
    Any,
    Ieq,
    Feq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockScope {
    #[default]
    Subgroup,
    Device,
}

fn default_write_mask() -> u8 {
    0xf
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "intrinsic", rename_all = "snake_case")]
pub enum Intrinsic {
    LoadDeref {
        deref: ValueId,
        #[serde(default)]
        access: Access,
    },
    StoreDeref {
        deref: ValueId,
        value: ValueId,
        #[serde(default = "default_write_mask")]
        write_mask: u8,
        #[serde(default)]
        access: Access,
    },
    /// `member` selects the push-constant block field, `offset` the first
    /// 32-bit element within it.
    LoadPushConstant {
        member: ValueId,
        offset: ValueId,
    },
    LoadGlobal {
        address: ValueId,
    },
    StoreGlobal {
        address: ValueId,
        value: ValueId,
    },
    /// Offsets of shared and scratch accesses count elements of the access width.
    LoadShared {
        offset: ValueId,
    },
    StoreShared {
        offset: ValueId,
        value: ValueId,
        #[serde(default = "default_write_mask")]
        write_mask: u8,
    },
    LoadScratch {
        offset: ValueId,
    },
    StoreScratch {
        offset: ValueId,
        value: ValueId,
        #[serde(default = "default_write_mask")]
        write_mask: u8,
    },
    GetSsboSize {
        buffer: ValueId,
    },
    LoadSystemValue {
        value: SystemValue,
    },

    DerefAtomic {
        op: AtomicOp,
        deref: ValueId,
        data: ValueId,
        #[serde(default)]
        compare: Option<ValueId>,
    },
    /// `offset` is in bytes.
    SharedAtomic {
        op: AtomicOp,
        offset: ValueId,
        data: ValueId,
        #[serde(default)]
        compare: Option<ValueId>,
    },
    ImageAtomic {
        op: AtomicOp,
        image: ValueId,
        coord: ValueId,
        #[serde(default)]
        sample: Option<ValueId>,
        data: ValueId,
        #[serde(default)]
        compare: Option<ValueId>,
    },

    ImageLoad {
        image: ValueId,
        coord: ValueId,
        #[serde(default)]
        sample: Option<ValueId>,
        /// Set for sparse loads; receives the residency code.
        #[serde(default)]
        residency: Option<ValueId>,
    },
    ImageStore {
        image: ValueId,
        coord: ValueId,
        #[serde(default)]
        sample: Option<ValueId>,
        texel: ValueId,
    },
    ImageSize {
        image: ValueId,
    },
    ImageSamples {
        image: ValueId,
    },

    MemoryBarrier {
        kind: BarrierKind,
    },
    ControlBarrier,
    EmitVertex {
        #[serde(default)]
        stream: u32,
    },
    EndPrimitive {
        #[serde(default)]
        stream: u32,
    },
    Discard,
    Demote,
    IsHelperInvocation,
    BeginInvocationInterlock,
    EndInvocationInterlock,

    InterpAtCentroid {
        deref: ValueId,
    },
    InterpAtSample {
        deref: ValueId,
        sample: ValueId,
    },
    InterpAtOffset {
        deref: ValueId,
        offset: ValueId,
    },

    Ballot {
        value: ValueId,
    },
    ReadFirstInvocation {
        value: ValueId,
    },
    ReadInvocation {
        value: ValueId,
        invocation: ValueId,
    },
    Vote {
        vote: VoteOp,
        value: ValueId,
    },
    ShaderClock {
        #[serde(default)]
        scope: ClockScope,
    },
    IsSparseTexelsResident {
        code: ValueId,
    },
}

impl Intrinsic {
    /// True for intrinsics that produce or read a residency code.
    pub fn is_sparse(&self) -> bool {
        matches!(self, Intrinsic::ImageLoad { residency: Some(_), .. } | Intrinsic::IsSparseTexelsResident { .. })
    }
}

// =============================================================================
// Texture
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TexOp {
    /// Implicit-lod sample.
    Tex,
    /// Sample with lod bias.
    Txb,
    /// Sample with explicit lod.
    Txl,
    /// Sample with explicit gradients.
    Txd,
    /// Texel fetch.
    Txf,
    /// Multisample texel fetch.
    TxfMs,
    /// Size query.
    Txs,
    /// Lod query.
    Lod,
    /// Gather.
    Tg4,
    QueryLevels,
    TextureSamples,
}

impl TexOp {
    pub fn is_query(self) -> bool {
        matches!(self, TexOp::Txs | TexOp::Lod | TexOp::QueryLevels | TexOp::TextureSamples)
    }

    /// Ops whose coordinates and lod are integers.
    pub fn is_fetch(self) -> bool {
        matches!(self, TexOp::Txf | TexOp::TxfMs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TexOffset {
    Const(Vec<i32>),
    Dynamic(ValueId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TexInst {
    pub op: TexOp,
    /// Driver location of the sampler variable (or of an element of a sampler array).
    pub texture_index: u32,
    /// Dynamic index into an arrayed sampler variable.
    #[serde(default)]
    pub texture_offset: Option<ValueId>,
    #[serde(default)]
    pub coord: Option<ValueId>,
    #[serde(default)]
    pub projector: Option<ValueId>,
    #[serde(default)]
    pub bias: Option<ValueId>,
    #[serde(default)]
    pub lod: Option<ValueId>,
    #[serde(default)]
    pub min_lod: Option<ValueId>,
    #[serde(default)]
    pub comparator: Option<ValueId>,
    #[serde(default)]
    pub ddx: Option<ValueId>,
    #[serde(default)]
    pub ddy: Option<ValueId>,
    #[serde(default)]
    pub ms_index: Option<ValueId>,
    #[serde(default)]
    pub offset: Option<TexOffset>,
    /// Gathered component for `tg4`.
    #[serde(default)]
    pub component: u32,
    /// Numeric type of the returned texels.
    pub dest_base: BaseType,
    /// Set for sparse ops; receives the residency code.
    #[serde(default)]
    pub residency: Option<ValueId>,
}

impl TexInst {
    pub fn new(op: TexOp, texture_index: u32, dest_base: BaseType) -> Self {
        TexInst {
            op,
            texture_index,
            texture_offset: None,
            coord: None,
            projector: None,
            bias: None,
            lod: None,
            min_lod: None,
            comparator: None,
            ddx: None,
            ddy: None,
            ms_index: None,
            offset: None,
            component: 0,
            dest_base,
            residency: None,
        }
    }

    pub fn is_sparse(&self) -> bool {
        self.residency.is_some()
    }
}
