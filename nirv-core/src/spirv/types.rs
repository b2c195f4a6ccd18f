//! Type and constant lowering.
//!
//! Scalars, vectors, matrices and constants go through the builder's own
//! deduplication. Arrays and structs are inserted by hand and cached in
//! `Ctx::aggregate_types`, because their stride and offset decorations make
//! two structurally different layouts distinct types.

use half::f16;
use rspirv::dr::{self, InsertPoint, Operand};
use rspirv::spirv::{Capability, Decoration, Dim, ImageFormat, Op, Word};

use super::context::Ctx;
use crate::ir::{BaseType, ImageDim, ImageType, TexelFormat, Type, Variable};

impl Ctx<'_> {
    // -------------------------------------------------------------------------
    // Scalars and vectors
    // -------------------------------------------------------------------------

    pub fn void_type(&mut self) -> Word {
        self.builder.type_void()
    }

    pub fn bool_type(&mut self) -> Word {
        self.builder.type_bool()
    }

    fn int_width_cap(&mut self, bits: u8) {
        match bits {
            8 => self.cap(Capability::Int8),
            16 => self.cap(Capability::Int16),
            32 => {}
            64 => self.cap(Capability::Int64),
            _ => panic!("BUG: unsupported integer width {}", bits),
        }
    }

    pub fn uint_type(&mut self, bits: u8) -> Word {
        self.int_width_cap(bits);
        self.builder.type_int(bits as u32, 0)
    }

    pub fn int_type(&mut self, bits: u8) -> Word {
        self.int_width_cap(bits);
        self.builder.type_int(bits as u32, 1)
    }

    pub fn float_type(&mut self, bits: u8) -> Word {
        match bits {
            16 => self.cap(Capability::Float16),
            32 => {}
            64 => self.cap(Capability::Float64),
            _ => panic!("BUG: unsupported float width {}", bits),
        }
        self.builder.type_float(bits as u32)
    }

    fn vectorize(&mut self, scalar: Word, components: u8) -> Word {
        if components > 1 {
            self.builder.type_vector(scalar, components as u32)
        } else {
            scalar
        }
    }

    pub fn uvec_type(&mut self, bits: u8, components: u8) -> Word {
        let scalar = self.uint_type(bits);
        self.vectorize(scalar, components)
    }

    pub fn ivec_type(&mut self, bits: u8, components: u8) -> Word {
        let scalar = self.int_type(bits);
        self.vectorize(scalar, components)
    }

    pub fn fvec_type(&mut self, bits: u8, components: u8) -> Word {
        let scalar = self.float_type(bits);
        self.vectorize(scalar, components)
    }

    pub fn bvec_type(&mut self, components: u8) -> Word {
        let scalar = self.bool_type();
        self.vectorize(scalar, components)
    }

    /// Storage type of an SSA value: booleans for 1-bit values, unsigned otherwise.
    pub fn value_type(&mut self, bits: u8, components: u8) -> Word {
        if bits == 1 {
            self.bvec_type(components)
        } else {
            self.uvec_type(bits, components)
        }
    }

    /// The type an operation computes in.
    pub fn alu_type(&mut self, base: BaseType, bits: u8, components: u8) -> Word {
        match base {
            BaseType::Bool => self.bvec_type(components),
            BaseType::Int => self.ivec_type(bits, components),
            BaseType::Uint => self.uvec_type(bits, components),
            BaseType::Float => self.fvec_type(bits, components),
        }
    }

    fn scalar_type(&mut self, base: BaseType, bits: u8) -> Word {
        match base {
            BaseType::Bool => self.bool_type(),
            BaseType::Int => self.int_type(bits),
            BaseType::Uint => self.uint_type(bits),
            BaseType::Float => self.float_type(bits),
        }
    }

    // -------------------------------------------------------------------------
    // Declared types
    // -------------------------------------------------------------------------

    pub fn glsl_type(&mut self, ty: &Type) -> Word {
        match ty {
            Type::Scalar { base, bits } => self.scalar_type(*base, *bits),
            Type::Vector {
                base,
                bits,
                components,
            } => {
                let scalar = self.scalar_type(*base, *bits);
                self.builder.type_vector(scalar, *components as u32)
            }
            Type::Matrix { bits, columns, rows } => {
                let column = self.fvec_type(*bits, *rows);
                self.builder.type_matrix(column, *columns as u32)
            }
            Type::Array { .. } | Type::Struct { .. } => {
                if let Some(&id) = self.aggregate_types.get(ty) {
                    return id;
                }
                let id = self.emit_aggregate(ty);
                self.aggregate_types.insert(ty.clone(), id);
                id
            }
            Type::Sampler(_) | Type::Image(_) => {
                panic!("BUG: opaque type {:?} lowered as a data type", ty)
            }
        }
    }

    fn emit_aggregate(&mut self, ty: &Type) -> Word {
        match ty {
            Type::Array {
                element,
                length,
                stride,
            } => {
                let element_type = self.glsl_type(element);
                let mut stride = *stride;
                if stride == 0 {
                    if let Type::Scalar { bits, .. } = element.as_ref() {
                        stride = (*bits as u32 / 8).max(1);
                    }
                }
                self.array_type(element_type, *length, stride)
            }
            Type::Struct { name, fields, block } => {
                let members = fields.iter().map(|f| self.glsl_type(&f.ty)).collect::<Vec<_>>();
                let id = self.struct_type(&members);
                for (i, field) in fields.iter().enumerate() {
                    if let Some(offset) = field.offset {
                        self.member_offset(id, i as u32, offset);
                    }
                }
                if *block {
                    self.decorate(id, Decoration::Block);
                }
                if let Some(name) = name {
                    self.name(id, name);
                }
                id
            }
            _ => panic!("BUG: {:?} is not an aggregate", ty),
        }
    }

    fn insert_type(&mut self, op: Op, operands: Vec<Operand>) -> Word {
        let id = self.builder.id();
        let inst = dr::Instruction::new(op, None, Some(id), operands);
        self.builder.insert_types_global_values(InsertPoint::End, inst);
        id
    }

    /// A fresh array type. `length: None` makes a runtime array; a zero
    /// stride emits no `ArrayStride`.
    pub fn array_type(&mut self, element: Word, length: Option<u32>, stride: u32) -> Word {
        let id = match length {
            Some(len) => {
                let len = self.const_uint(32, len as u64);
                self.insert_type(Op::TypeArray, vec![Operand::IdRef(element), Operand::IdRef(len)])
            }
            None => self.insert_type(Op::TypeRuntimeArray, vec![Operand::IdRef(element)]),
        };
        if stride != 0 {
            self.decorate_u32(id, Decoration::ArrayStride, stride);
        }
        id
    }

    /// A fresh struct type with the given member types.
    pub fn struct_type(&mut self, members: &[Word]) -> Word {
        let operands = members.iter().map(|&m| Operand::IdRef(m)).collect();
        self.insert_type(Op::TypeStruct, operands)
    }

    /// `uintN[len]` with a natural stride.
    pub fn sized_uint_array_type(&mut self, len: u32, bits: u8) -> Word {
        let uint = self.uint_type(bits);
        self.array_type(uint, Some(len), bits as u32 / 8)
    }

    // -------------------------------------------------------------------------
    // Constants
    // -------------------------------------------------------------------------

    fn const_bits(&mut self, ty: Word, bits: u8, value: u64) -> Word {
        if bits == 64 {
            self.builder.constant_bit64(ty, value)
        } else {
            self.builder.constant_bit32(ty, value as u32)
        }
    }

    pub fn const_uint(&mut self, bits: u8, value: u64) -> Word {
        let ty = self.uint_type(bits);
        let masked = if bits >= 64 { value } else { value & ((1u64 << bits) - 1) };
        self.const_bits(ty, bits, masked)
    }

    /// Narrow signed constants are sign-extended to the full literal word.
    pub fn const_int(&mut self, bits: u8, value: i64) -> Word {
        let ty = self.int_type(bits);
        let literal = if bits == 64 { value as u64 } else { (value as i32) as u32 as u64 };
        self.const_bits(ty, bits, literal)
    }

    pub fn const_float(&mut self, bits: u8, value: f64) -> Word {
        let ty = self.float_type(bits);
        match bits {
            16 => self.builder.constant_bit32(ty, f16::from_f64(value).to_bits() as u32),
            32 => self.builder.constant_bit32(ty, (value as f32).to_bits()),
            _ => self.builder.constant_bit64(ty, value.to_bits()),
        }
    }

    pub fn const_bool(&mut self, value: bool) -> Word {
        let ty = self.bool_type();
        if value {
            self.builder.constant_true(ty)
        } else {
            self.builder.constant_false(ty)
        }
    }

    fn splat(&mut self, scalar: Word, ty: Word, components: u8) -> Word {
        if components > 1 {
            let parts = vec![scalar; components as usize];
            self.builder.constant_composite(ty, parts)
        } else {
            scalar
        }
    }

    pub fn uvec_const(&mut self, bits: u8, components: u8, value: u64) -> Word {
        let scalar = self.const_uint(bits, value);
        let ty = self.uvec_type(bits, components);
        self.splat(scalar, ty, components)
    }

    pub fn ivec_const(&mut self, bits: u8, components: u8, value: i64) -> Word {
        let scalar = self.const_int(bits, value);
        let ty = self.ivec_type(bits, components);
        self.splat(scalar, ty, components)
    }

    pub fn fvec_const(&mut self, bits: u8, components: u8, value: f64) -> Word {
        let scalar = self.const_float(bits, value);
        let ty = self.fvec_type(bits, components);
        self.splat(scalar, ty, components)
    }

    /// One literal per component, in the value representation.
    pub fn value_const(&mut self, bits: u8, literals: &[u64]) -> Word {
        let parts = literals
            .iter()
            .map(|&v| if bits == 1 { self.const_bool(v & 1 != 0) } else { self.const_uint(bits, v) })
            .collect::<Vec<_>>();
        if parts.len() == 1 {
            return parts[0];
        }
        let ty = self.value_type(bits, parts.len() as u8);
        self.builder.constant_composite(ty, parts)
    }

    /// An uninitialized specialization constant.
    pub fn spec_const_uint(&mut self, bits: u8, default: u32) -> Word {
        let ty = self.uint_type(bits);
        let id = self.builder.id();
        let inst = dr::Instruction::new(Op::SpecConstant, Some(ty), Some(id), vec![Operand::LiteralBit32(default)]);
        self.builder.insert_types_global_values(InsertPoint::End, inst);
        id
    }

    pub fn spec_const_composite(&mut self, ty: Word, parts: &[Word]) -> Word {
        let id = self.builder.id();
        let operands = parts.iter().map(|&p| Operand::IdRef(p)).collect();
        let inst = dr::Instruction::new(Op::SpecConstantComposite, Some(ty), Some(id), operands);
        self.builder.insert_types_global_values(InsertPoint::End, inst);
        id
    }

    // -------------------------------------------------------------------------
    // Images
    // -------------------------------------------------------------------------

    /// `OpTypeImage` of a sampler or storage image variable, adding the
    /// capabilities its shape and format need.
    pub fn bare_image_type(&mut self, var: &Variable, sampled: bool) -> Word {
        let image = match var.ty().image_type() {
            Some(image) => *image,
            None => panic!("BUG: variable {:?} is not an image or sampler", var.name),
        };

        if image.dim == ImageDim::Subpass || image.dim == ImageDim::SubpassMs {
            self.cap(Capability::InputAttachment);
        } else if !sampled && var.format.is_none() {
            if !var.access.non_writable {
                self.cap(Capability::StorageImageWriteWithoutFormat);
            }
            if !var.access.non_readable {
                self.cap(Capability::StorageImageReadWithoutFormat);
            }
        }

        let (dim, ms) = image_dim(&image);
        match dim {
            Dim::Dim1D if sampled => self.cap(Capability::Sampled1D),
            Dim::Dim1D => self.cap(Capability::Image1D),
            Dim::DimBuffer if sampled => self.cap(Capability::SampledBuffer),
            Dim::DimBuffer => self.cap(Capability::ImageBuffer),
            Dim::DimCube if image.arrayed => self.cap(Capability::ImageCubeArray),
            _ => {}
        }

        let format = match var.format {
            Some(format) => self.image_format(format),
            None => ImageFormat::Unknown,
        };
        let bits = if var.format.is_some_and(TexelFormat::is_64bit) { 64 } else { 32 };
        let result = self.scalar_type(image.result, bits);
        self.builder.type_image(
            result,
            dim,
            0,
            image.arrayed as u32,
            ms as u32,
            if sampled { 1 } else { 2 },
            format,
            None,
        )
    }

    fn image_format(&mut self, format: TexelFormat) -> ImageFormat {
        if format.is_64bit() {
            self.cap(Capability::Int64ImageEXT);
            self.ext("SPV_EXT_shader_image_int64");
        } else if format.is_extended() {
            self.cap(Capability::StorageImageExtendedFormats);
        }
        match format {
            TexelFormat::Rgba32f => ImageFormat::Rgba32f,
            TexelFormat::Rgba16f => ImageFormat::Rgba16f,
            TexelFormat::R32f => ImageFormat::R32f,
            TexelFormat::Rgba8 => ImageFormat::Rgba8,
            TexelFormat::Rgba8Snorm => ImageFormat::Rgba8Snorm,
            TexelFormat::Rgba32i => ImageFormat::Rgba32i,
            TexelFormat::Rgba16i => ImageFormat::Rgba16i,
            TexelFormat::Rgba8i => ImageFormat::Rgba8i,
            TexelFormat::R32i => ImageFormat::R32i,
            TexelFormat::Rgba32ui => ImageFormat::Rgba32ui,
            TexelFormat::Rgba16ui => ImageFormat::Rgba16ui,
            TexelFormat::Rgba8ui => ImageFormat::Rgba8ui,
            TexelFormat::R32ui => ImageFormat::R32ui,
            TexelFormat::Rg32f => ImageFormat::Rg32f,
            TexelFormat::Rg16f => ImageFormat::Rg16f,
            TexelFormat::R11fG11fB10f => ImageFormat::R11fG11fB10f,
            TexelFormat::R16f => ImageFormat::R16f,
            TexelFormat::Rgba16 => ImageFormat::Rgba16,
            TexelFormat::Rgb10A2 => ImageFormat::Rgb10A2,
            TexelFormat::Rg16 => ImageFormat::Rg16,
            TexelFormat::Rg8 => ImageFormat::Rg8,
            TexelFormat::R16 => ImageFormat::R16,
            TexelFormat::R8 => ImageFormat::R8,
            TexelFormat::Rg32i => ImageFormat::Rg32i,
            TexelFormat::Rg16i => ImageFormat::Rg16i,
            TexelFormat::R16i => ImageFormat::R16i,
            TexelFormat::R8i => ImageFormat::R8i,
            TexelFormat::Rg32ui => ImageFormat::Rg32ui,
            TexelFormat::Rg16ui => ImageFormat::Rg16ui,
            TexelFormat::R16ui => ImageFormat::R16ui,
            TexelFormat::R8ui => ImageFormat::R8ui,
            TexelFormat::R64ui => ImageFormat::R64ui,
            TexelFormat::R64i => ImageFormat::R64i,
        }
    }
}

/// SPIR-V dimensionality and multisampling of an image shape.
pub(super) fn image_dim(image: &ImageType) -> (Dim, bool) {
    match image.dim {
        ImageDim::D1 => (Dim::Dim1D, false),
        ImageDim::D2 | ImageDim::Rect | ImageDim::External => (Dim::Dim2D, false),
        ImageDim::D3 => (Dim::Dim3D, false),
        ImageDim::Cube => (Dim::DimCube, false),
        ImageDim::Buffer => (Dim::DimBuffer, false),
        ImageDim::Ms => (Dim::Dim2D, true),
        ImageDim::Subpass => (Dim::DimSubpassData, false),
        ImageDim::SubpassMs => (Dim::DimSubpassData, true),
    }
}
