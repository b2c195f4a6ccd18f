//! Intrinsic lowering: memory access, atomics, storage images, barriers,
//! geometry emission, interpolation and subgroup operations.

use log::trace;
use rspirv::dr::Operand;
use rspirv::spirv::{
    Capability, Decoration, GLOp, ImageOperands, MemoryAccess, MemorySemantics, Op, Scope, StorageClass, Word,
};

use super::context::Ctx;
use super::values::storage_class;
use crate::error::Result;
use crate::ir::{
    Access, AtomicOp, BarrierKind, BaseType, BuiltinSlot, ClockScope, Def, ImageDim, ImageType, Intrinsic, Stage,
    StageInfo, Type, ValueId, VariableMode, VoteOp,
};

fn atomic_spirv_op(op: AtomicOp) -> Op {
    match op {
        AtomicOp::Add => Op::AtomicIAdd,
        AtomicOp::Imin => Op::AtomicSMin,
        AtomicOp::Umin => Op::AtomicUMin,
        AtomicOp::Imax => Op::AtomicSMax,
        AtomicOp::Umax => Op::AtomicUMax,
        AtomicOp::And => Op::AtomicAnd,
        AtomicOp::Or => Op::AtomicOr,
        AtomicOp::Xor => Op::AtomicXor,
        AtomicOp::Exchange => Op::AtomicExchange,
        AtomicOp::CompSwap => Op::AtomicCompareExchange,
        AtomicOp::Fadd => Op::AtomicFAddEXT,
        AtomicOp::Fmin => Op::AtomicFMinEXT,
        AtomicOp::Fmax => Op::AtomicFMaxEXT,
    }
}

/// Image operands: the sample index of multisampled images.
fn sample_operands(sample: Option<Word>) -> Vec<Operand> {
    match sample {
        Some(sample) => vec![Operand::ImageOperands(ImageOperands::SAMPLE), Operand::IdRef(sample)],
        None => Vec::new(),
    }
}

impl Ctx<'_> {
    pub fn emit_intrinsic(&mut self, dest: Option<&Def>, intr: &Intrinsic) -> Result<()> {
        let def = || match dest {
            Some(def) => def,
            None => panic!("BUG: {:?} has no destination", intr),
        };
        if intr.is_sparse() {
            self.require_sparse();
        }

        match *intr {
            Intrinsic::LoadDeref { deref, access } => self.emit_load_deref(def(), deref, access),
            Intrinsic::StoreDeref {
                deref,
                value,
                write_mask,
                access,
            } => self.emit_store_deref(deref, value, write_mask, access),
            Intrinsic::LoadPushConstant { member, offset } => self.emit_load_push_const(def(), member, offset),
            Intrinsic::LoadGlobal { address } => self.emit_load_global(def(), address),
            Intrinsic::StoreGlobal { address, value } => self.emit_store_global(address, value),
            Intrinsic::LoadShared { offset } => self.emit_load_block(def(), StorageClass::Workgroup, offset),
            Intrinsic::StoreShared {
                offset,
                value,
                write_mask,
            } => self.emit_store_block(StorageClass::Workgroup, offset, value, write_mask),
            Intrinsic::LoadScratch { offset } => self.emit_load_block(def(), StorageClass::Private, offset),
            Intrinsic::StoreScratch {
                offset,
                value,
                write_mask,
            } => self.emit_store_block(StorageClass::Private, offset, value, write_mask),
            Intrinsic::GetSsboSize { buffer } => self.emit_get_ssbo_size(def(), buffer),
            Intrinsic::LoadSystemValue { value } => self.load_system_value(def(), value),

            Intrinsic::DerefAtomic {
                op,
                deref,
                data,
                compare,
            } => self.emit_deref_atomic(def(), op, deref, data, compare),
            Intrinsic::SharedAtomic {
                op,
                offset,
                data,
                compare,
            } => self.emit_shared_atomic(def(), op, offset, data, compare),
            Intrinsic::ImageAtomic {
                op,
                image,
                coord,
                sample,
                data,
                compare,
            } => self.emit_image_atomic(def(), op, image, coord, sample, data, compare),

            Intrinsic::ImageLoad {
                image,
                coord,
                sample,
                residency,
            } => self.emit_image_load(def(), image, coord, sample, residency),
            Intrinsic::ImageStore {
                image,
                coord,
                sample,
                texel,
            } => self.emit_image_store(image, coord, sample, texel),
            Intrinsic::ImageSize { image } => self.emit_image_size(def(), image),
            Intrinsic::ImageSamples { image } => self.emit_image_samples(def(), image),

            Intrinsic::MemoryBarrier { kind } => self.emit_memory_barrier(kind),
            Intrinsic::ControlBarrier => self.emit_control_barrier(),
            Intrinsic::EmitVertex { stream } => self.emit_vertex(stream),
            Intrinsic::EndPrimitive { stream } => self.end_primitive(stream),
            Intrinsic::Discard => self.emit_discard(),
            Intrinsic::Demote => {
                self.cap(Capability::DemoteToHelperInvocation);
                if !self.options.spirv_version.at_least(1, 6) {
                    self.ext("SPV_EXT_demote_to_helper_invocation");
                }
                self.emit_void(Op::DemoteToHelperInvocation, vec![])
            }
            Intrinsic::IsHelperInvocation => {
                self.cap(Capability::DemoteToHelperInvocation);
                self.ext("SPV_EXT_demote_to_helper_invocation");
                let ty = self.bool_type();
                let result = self.emit(Op::IsHelperInvocationEXT, ty, vec![])?;
                self.store_dest(def(), result, BaseType::Bool)?;
                Ok(())
            }
            Intrinsic::BeginInvocationInterlock => self.emit_void(Op::BeginInvocationInterlockEXT, vec![]),
            Intrinsic::EndInvocationInterlock => self.emit_void(Op::EndInvocationInterlockEXT, vec![]),

            Intrinsic::InterpAtCentroid { deref } => self.emit_interpolate(def(), GLOp::InterpolateAtCentroid, deref, None),
            Intrinsic::InterpAtSample { deref, sample } => {
                let sample = self.src(sample);
                self.emit_interpolate(def(), GLOp::InterpolateAtSample, deref, Some(sample))
            }
            Intrinsic::InterpAtOffset { deref, offset } => {
                let offset = self.src(offset);
                let offset = self.bitcast_to_fvec(offset, 32, 2)?;
                self.emit_interpolate(def(), GLOp::InterpolateAtOffset, deref, Some(offset))
            }

            Intrinsic::Ballot { value } => {
                self.subgroup_ballot();
                let def = def();
                let ty = self.uvec_type(def.bit_size, def.components);
                let value = self.src(value);
                let result = self.unop(Op::SubgroupBallotKHR, ty, value)?;
                self.store_dest(def, result, BaseType::Uint)?;
                Ok(())
            }
            Intrinsic::ReadFirstInvocation { value } => {
                self.subgroup_ballot();
                let def = def();
                let ty = self.value_type(def.bit_size, def.components);
                let value = self.src(value);
                let result = self.unop(Op::SubgroupFirstInvocationKHR, ty, value)?;
                self.store_dest(def, result, BaseType::Uint)?;
                Ok(())
            }
            Intrinsic::ReadInvocation { value, invocation } => {
                self.subgroup_ballot();
                let def = def();
                let ty = self.value_type(def.bit_size, def.components);
                let (value, invocation) = (self.src(value), self.src(invocation));
                let result = self.binop(Op::SubgroupReadInvocationKHR, ty, value, invocation)?;
                self.store_dest(def, result, BaseType::Uint)?;
                Ok(())
            }
            Intrinsic::Vote { vote, value } => self.emit_vote(def(), vote, value),
            Intrinsic::ShaderClock { scope } => {
                self.cap(Capability::ShaderClockKHR);
                self.ext("SPV_KHR_shader_clock");
                let def = def();
                let scope = match scope {
                    ClockScope::Subgroup => Scope::Subgroup,
                    ClockScope::Device => Scope::Device,
                };
                let scope = self.const_uint(32, scope as u64);
                let ty = self.uvec_type(def.bit_size, def.components);
                let result = self.unop(Op::ReadClockKHR, ty, scope)?;
                self.store_dest(def, result, BaseType::Uint)?;
                Ok(())
            }
            Intrinsic::IsSparseTexelsResident { code } => {
                let def = def();
                let ty = self.value_type(def.bit_size, def.components);
                let code = self.src(code);
                let result = self.unop(Op::ImageSparseTexelsResident, ty, code)?;
                self.write_value(def, result);
                Ok(())
            }
        }
    }

    fn subgroup_ballot(&mut self) {
        self.cap(Capability::SubgroupBallotKHR);
        self.ext("SPV_KHR_shader_ballot");
    }

    pub fn require_sparse(&mut self) {
        assert!(
            self.options.sparse_residency,
            "BUG: sparse residency used without the sparse_residency option"
        );
        self.cap(Capability::SparseResidency);
    }

    // -------------------------------------------------------------------------
    // Derefs
    // -------------------------------------------------------------------------

    fn emit_load_deref(&mut self, def: &Def, deref: ValueId, access: Access) -> Result<()> {
        let ptr = self.src(deref);
        let ty = self.deref(deref).ty.clone();
        if matches!(ty, Type::Sampler(_) | Type::Image(_)) {
            panic!("BUG: load of opaque {:?} through {}", ty, deref);
        }
        let result_type = self.glsl_type(&ty);
        let result = if access.coherent {
            let scope = self.const_uint(32, Scope::Device as u64);
            let semantics = self.const_uint(32, 0);
            self.emit(
                Op::AtomicLoad,
                result_type,
                vec![Operand::IdRef(ptr), Operand::IdRef(scope), Operand::IdRef(semantics)],
            )?
        } else {
            self.load(result_type, ptr)?
        };
        let base = ty.base_type().unwrap_or(BaseType::Uint);
        self.store_dest(def, result, base)?;
        Ok(())
    }

    fn emit_store_deref(&mut self, deref: ValueId, value: ValueId, write_mask: u8, access: Access) -> Result<()> {
        let ptr = self.src(deref);
        let info = self.deref(deref).clone();
        let var = self.deref_var(deref);
        let src = self.value(value);
        let ty = info.ty;

        let full_mask = match &ty {
            Type::Array { .. } => (1u32 << ty.aoa_size().min(31)) - 1,
            other => (1u32 << other.vector_components()) - 1,
        };
        let partial = !ty.is_scalar() && (write_mask as u32 & full_mask) != full_mask;
        if partial {
            // One store per written component.
            let (element_type, element_base) = match &ty {
                Type::Vector { base, bits, .. } => (self.glsl_type(&Type::scalar(*base, *bits)), *base),
                Type::Array { element, .. } => {
                    let base = element.base_type().unwrap_or(BaseType::Uint);
                    (self.glsl_type(element), base)
                }
                other => panic!("BUG: partial store to {:?}", other),
            };
            let member_type = self.value_type(src.bit_size, 1);
            let ptr_type = self.pointer_type(storage_class(var.mode), element_type);
            let dest_components = match &ty {
                Type::Array { length, .. } => length.unwrap_or(0),
                other => other.vector_components() as u32,
            };
            for i in 0..dest_components.min(src.components as u32) {
                if write_mask & (1 << i) == 0 {
                    continue;
                }
                let index = self.const_uint(32, i as u64);
                let mut element = self.extract(member_type, src.id, i)?;
                if matches!(element_base, BaseType::Int | BaseType::Float) {
                    element = self.bitcast(element_type, element)?;
                }
                let member = self.access_chain(ptr_type, ptr, &[index])?;
                self.store(member, element)?;
            }
            return Ok(());
        }

        let ty_id = self.glsl_type(&ty);
        let mut result = match ty.base_type() {
            Some(BaseType::Int | BaseType::Float) => self.bitcast(ty_id, src.id)?,
            _ => src.id,
        };
        if self.stage == Stage::Fragment
            && var.mode == VariableMode::ShaderOut
            && var.builtin() == Some(BuiltinSlot::SampleMask)
        {
            if let Some(mask_type) = self.sample_mask_type {
                result = self.construct(mask_type, &[result])?;
            }
        }

        if access.coherent {
            let scope = self.const_uint(32, Scope::Device as u64);
            let semantics = self.const_uint(32, 0);
            self.emit_void(
                Op::AtomicStore,
                vec![
                    Operand::IdRef(ptr),
                    Operand::IdRef(scope),
                    Operand::IdRef(semantics),
                    Operand::IdRef(result),
                ],
            )
        } else {
            self.store(ptr, result)
        }
    }

    // -------------------------------------------------------------------------
    // Shared, scratch, push constants and global memory
    // -------------------------------------------------------------------------

    fn memory_block_for(&mut self, storage_class: StorageClass, bits: u8) -> Word {
        match storage_class {
            StorageClass::Workgroup => self.shared_block(bits),
            _ => self.scratch_block(bits),
        }
    }

    /// Load consecutive elements of the shared or scratch block.
    fn emit_load_block(&mut self, def: &Def, storage_class: StorageClass, offset: ValueId) -> Result<()> {
        let bits = def.bit_size;
        let uint_type = self.uint_type(bits);
        let u32_type = self.uint_type(32);
        let ptr_type = self.pointer_type(storage_class, uint_type);
        let block = self.memory_block_for(storage_class, bits);
        let one = self.const_uint(32, 1);

        let mut offset = self.src(offset);
        let mut parts = Vec::with_capacity(def.components as usize);
        for _ in 0..def.components {
            let member = self.access_chain(ptr_type, block, &[offset])?;
            parts.push(self.load(uint_type, member)?);
            offset = self.binop(Op::IAdd, u32_type, offset, one)?;
        }
        let result = if parts.len() > 1 {
            let ty = self.uvec_type(bits, def.components);
            self.construct(ty, &parts)?
        } else {
            parts[0]
        };
        self.store_dest(def, result, BaseType::Uint)?;
        Ok(())
    }

    fn emit_store_block(&mut self, storage_class: StorageClass, offset: ValueId, value: ValueId, write_mask: u8) -> Result<()> {
        let src = self.value(value);
        let bits = src.bit_size;
        let uint_type = self.uint_type(bits);
        let u32_type = self.uint_type(32);
        let ptr_type = self.pointer_type(storage_class, uint_type);
        let block = self.memory_block_for(storage_class, bits);
        let offset = self.src(offset);

        for i in 0..src.components as u32 {
            if write_mask & (1 << i) == 0 {
                continue;
            }
            let step = self.const_uint(32, i as u64);
            let element_offset = self.binop(Op::IAdd, u32_type, offset, step)?;
            let element = if src.components > 1 {
                self.extract(uint_type, src.id, i)?
            } else {
                src.id
            };
            let member = self.access_chain(ptr_type, block, &[element_offset])?;
            self.store(member, element)?;
        }
        Ok(())
    }

    fn emit_load_push_const(&mut self, def: &Def, member: ValueId, offset: ValueId) -> Result<()> {
        let Some((push_var, _)) = self.push_const else {
            panic!("BUG: push constant load without a push constant block");
        };
        let uint_type = self.uint_type(32);
        let ptr_type = self.pointer_type(StorageClass::PushConstant, uint_type);
        let one = self.const_uint(32, 1);
        let member = self.src(member);

        let mut offset = self.src(offset);
        let mut parts = Vec::with_capacity(def.components as usize);
        for _ in 0..def.components {
            let ptr = self.access_chain(ptr_type, push_var, &[member, offset])?;
            parts.push(self.load(uint_type, ptr)?);
            offset = self.binop(Op::IAdd, uint_type, offset, one)?;
        }
        let result = if parts.len() > 1 {
            let ty = self.uvec_type(32, def.components);
            self.construct(ty, &parts)?
        } else {
            parts[0]
        };
        self.store_dest(def, result, BaseType::Uint)?;
        Ok(())
    }

    fn physical_storage_buffer(&mut self) {
        self.cap(Capability::PhysicalStorageBufferAddresses);
        if !self.options.spirv_version.at_least(1, 5) {
            self.ext("SPV_KHR_physical_storage_buffer");
        }
    }

    fn emit_load_global(&mut self, def: &Def, address: ValueId) -> Result<()> {
        self.physical_storage_buffer();
        let ty = self.uvec_type(def.bit_size, def.components);
        let ptr_type = self.pointer_type(StorageClass::PhysicalStorageBuffer, ty);
        let address = self.src(address);
        let ptr = self.bitcast(ptr_type, address)?;
        let align = (def.bit_size as u32 / 8).max(1);
        let result = self.builder.load(
            ty,
            None,
            ptr,
            Some(MemoryAccess::ALIGNED),
            [Operand::LiteralBit32(align)],
        )?;
        self.store_dest(def, result, BaseType::Uint)?;
        Ok(())
    }

    fn emit_store_global(&mut self, address: ValueId, value: ValueId) -> Result<()> {
        self.physical_storage_buffer();
        let src = self.value(value);
        let ty = self.uvec_type(src.bit_size, src.components);
        let ptr_type = self.pointer_type(StorageClass::PhysicalStorageBuffer, ty);
        let address = self.src(address);
        let ptr = self.bitcast(ptr_type, address)?;
        let align = (src.bit_size as u32 / 8).max(1);
        self.builder.store(
            ptr,
            src.id,
            Some(MemoryAccess::ALIGNED),
            [Operand::LiteralBit32(align)],
        )?;
        Ok(())
    }

    /// Byte size of a storage buffer: the runtime array length scaled by its
    /// stride, plus the offset of the trailing array.
    fn emit_get_ssbo_size(&mut self, def: &Def, buffer: ValueId) -> Result<()> {
        let Some(var_id) = self.ssbo_var else {
            panic!("BUG: storage buffer size query without a 32-bit storage buffer");
        };
        let Some(ssbo_array) = self.ssbos[2] else {
            panic!("BUG: 32-bit storage buffer array was never declared");
        };
        let shader = self.shader;
        let var = shader.variable(var_id);
        let Type::Struct { fields, .. } = var.ty().without_array() else {
            panic!("BUG: storage buffer {:?} is not a block", var.name);
        };
        let Some(last) = fields.last() else {
            panic!("BUG: storage buffer {:?} has no members", var.name);
        };
        let types = self.bo_types[&var_id];
        let stride = match &last.ty {
            Type::Array { stride, .. } if *stride != 0 => *stride,
            _ => types.bit_size as u32 / 8,
        };
        let last_offset = last.offset.unwrap_or(0);
        let member = types.tail_type.is_some() as u32;

        let uint_type = self.uint_type(32);
        let ptr_type = self.pointer_type(StorageClass::StorageBuffer, types.struct_type);
        let buffer = self.src(buffer);
        let ptr = self.access_chain(ptr_type, ssbo_array, &[buffer])?;
        let length = self.emit(
            Op::ArrayLength,
            uint_type,
            vec![Operand::IdRef(ptr), Operand::LiteralBit32(member)],
        )?;
        let stride = self.const_uint(32, stride as u64);
        let bytes = self.binop(Op::IMul, uint_type, length, stride)?;
        let last_offset = self.const_uint(32, last_offset as u64);
        let result = self.binop(Op::IAdd, uint_type, bytes, last_offset)?;
        self.store_dest(def, result, BaseType::Uint)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Atomics
    // -------------------------------------------------------------------------

    fn atomic_caps(&mut self, op: AtomicOp, bits: u8) {
        if bits == 64 {
            self.cap(Capability::Int64Atomics);
        }
        match op {
            AtomicOp::Fadd => {
                match bits {
                    16 => {
                        self.cap(Capability::AtomicFloat16AddEXT);
                        self.ext("SPV_EXT_shader_atomic_float16_add");
                    }
                    64 => {
                        self.cap(Capability::AtomicFloat64AddEXT);
                        self.ext("SPV_EXT_shader_atomic_float_add");
                    }
                    _ => {
                        self.cap(Capability::AtomicFloat32AddEXT);
                        self.ext("SPV_EXT_shader_atomic_float_add");
                    }
                }
            }
            AtomicOp::Fmin | AtomicOp::Fmax => {
                let cap = match bits {
                    16 => Capability::AtomicFloat16MinMaxEXT,
                    64 => Capability::AtomicFloat64MinMaxEXT,
                    _ => Capability::AtomicFloat32MinMaxEXT,
                };
                self.cap(cap);
                self.ext("SPV_EXT_shader_atomic_float_min_max");
            }
            _ => {}
        }
    }

    /// Emit one atomic at device scope with relaxed semantics.
    fn atomic(&mut self, op: AtomicOp, ty: Word, ptr: Word, data: Word, compare: Option<Word>) -> Result<Word> {
        let scope = self.const_uint(32, Scope::Device as u64);
        let semantics = self.const_uint(32, 0);
        let mut operands = vec![Operand::IdRef(ptr), Operand::IdRef(scope), Operand::IdRef(semantics)];
        match (op, compare) {
            (AtomicOp::CompSwap, Some(compare)) => {
                operands.push(Operand::IdRef(semantics));
                operands.push(Operand::IdRef(data));
                operands.push(Operand::IdRef(compare));
            }
            (AtomicOp::CompSwap, None) => panic!("BUG: compare-and-swap without a comparator"),
            _ => operands.push(Operand::IdRef(data)),
        }
        self.emit(atomic_spirv_op(op), ty, operands)
    }

    fn atomic_operands(
        &mut self,
        op: AtomicOp,
        bits: u8,
        data: ValueId,
        compare: Option<ValueId>,
    ) -> Result<(Word, Option<Word>)> {
        let mut data = self.src(data);
        let compare = compare.map(|c| self.src(c));
        if op.is_float() {
            data = self.bitcast_to_fvec(data, bits, 1)?;
        }
        Ok((data, compare))
    }

    fn emit_deref_atomic(
        &mut self,
        def: &Def,
        op: AtomicOp,
        deref: ValueId,
        data: ValueId,
        compare: Option<ValueId>,
    ) -> Result<()> {
        let bits = self.value(data).bit_size;
        self.atomic_caps(op, bits);
        let ptr = self.src(deref);
        let (data, compare) = self.atomic_operands(op, bits, data, compare)?;
        let base = if op.is_float() { BaseType::Float } else { BaseType::Uint };
        let ty = self.alu_type(base, def.bit_size, def.components);
        let result = self.atomic(op, ty, ptr, data, compare)?;
        self.store_dest(def, result, base)?;
        Ok(())
    }

    fn emit_shared_atomic(
        &mut self,
        def: &Def,
        op: AtomicOp,
        offset: ValueId,
        data: ValueId,
        compare: Option<ValueId>,
    ) -> Result<()> {
        let bits = self.value(data).bit_size;
        self.atomic_caps(op, bits);

        let uint_type = self.uint_type(bits);
        let u32_type = self.uint_type(32);
        let ptr_type = self.pointer_type(StorageClass::Workgroup, uint_type);
        let element_size = self.const_uint(32, bits as u64 / 8);
        let offset = self.src(offset);
        let index = self.binop(Op::UDiv, u32_type, offset, element_size)?;
        let block = self.shared_block(bits);
        let ptr = self.access_chain(ptr_type, block, &[index])?;

        let (data, compare) = self.atomic_operands(op, bits, data, compare)?;
        let base = if op.is_float() { BaseType::Float } else { BaseType::Uint };
        let ty = self.alu_type(base, def.bit_size, def.components);
        let result = self.atomic(op, ty, ptr, data, compare)?;
        self.store_dest(def, result, base)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_image_atomic(
        &mut self,
        def: &Def,
        op: AtomicOp,
        image: ValueId,
        coord: ValueId,
        sample: Option<ValueId>,
        data: ValueId,
        compare: Option<ValueId>,
    ) -> Result<()> {
        let (image_ty, image_var) = self.image_operand(image);
        let bits = self.value(data).bit_size;
        self.atomic_caps(op, bits);

        if def.bit_size == 64 {
            self.cap(Capability::Int64ImageEXT);
            self.ext("SPV_EXT_shader_image_int64");
        }
        let base_type = self.alu_type(image_ty.result, def.bit_size, 1);
        let ptr_type = self.pointer_type(StorageClass::Image, base_type);
        let coord = self.image_coords(&image_ty, coord)?;
        let sample = match sample {
            Some(sample) if image_ty.is_multisampled() => self.src(sample),
            _ => self.const_uint(32, 0),
        };
        let texel = self.emit(
            Op::ImageTexelPointer,
            ptr_type,
            vec![Operand::IdRef(image_var), Operand::IdRef(coord), Operand::IdRef(sample)],
        )?;

        let cast_type = self.alu_type(image_ty.result, def.bit_size, def.components);
        let mut data = self.src(data);
        let mut compare = compare.map(|c| self.src(c));
        if image_ty.result != BaseType::Uint {
            data = self.bitcast(cast_type, data)?;
            if let Some(c) = compare {
                compare = Some(self.bitcast(cast_type, c)?);
            }
        }
        let result = self.atomic(op, cast_type, texel, data, compare)?;
        self.store_dest(def, result, image_ty.result)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Storage images
    // -------------------------------------------------------------------------

    /// Image shape and pointer of an image deref.
    fn image_operand(&self, image: ValueId) -> (ImageType, Word) {
        let var = self.deref_var(image);
        let Some(&image_ty) = var.ty().image_type() else {
            panic!("BUG: {} does not point to an image", image);
        };
        (image_ty, self.src(image))
    }

    fn load_image(&mut self, image: ValueId) -> Result<(ImageType, Word)> {
        let var_id = self.deref(image).var;
        let (image_ty, ptr) = self.image_operand(image);
        let image_type = self.opaque_types(var_id).image;
        let loaded = self.load(image_type, ptr)?;
        Ok((image_ty, loaded))
    }

    /// Drop coordinate components the image does not address.
    pub fn image_coords(&mut self, image: &ImageType, coord: ValueId) -> Result<Word> {
        let needed = image.coordinate_components();
        let src = self.value(coord);
        if src.components <= needed {
            return Ok(src.id);
        }
        let ty = self.uvec_type(src.bit_size, needed);
        if needed == 1 {
            return self.extract(ty, src.id, 0);
        }
        let mut operands = vec![Operand::IdRef(src.id), Operand::IdRef(src.id)];
        operands.extend((0..needed as u32).map(Operand::LiteralBit32));
        self.emit(Op::VectorShuffle, ty, operands)
    }

    fn emit_image_store(&mut self, image: ValueId, coord: ValueId, sample: Option<ValueId>, texel: ValueId) -> Result<()> {
        let (image_ty, img) = self.load_image(image)?;
        let coord = self.image_coords(&image_ty, coord)?;
        let sample = sample.filter(|_| image_ty.is_multisampled()).map(|s| self.src(s));
        let mut texel = self.src(texel);
        if image_ty.result != BaseType::Uint {
            let ty = self.alu_type(image_ty.result, 32, 4);
            texel = self.bitcast(ty, texel)?;
        }
        let mut operands = vec![Operand::IdRef(img), Operand::IdRef(coord), Operand::IdRef(texel)];
        operands.extend(sample_operands(sample));
        self.emit_void(Op::ImageWrite, operands)
    }

    fn emit_image_load(
        &mut self,
        def: &Def,
        image: ValueId,
        coord: ValueId,
        sample: Option<ValueId>,
        residency: Option<ValueId>,
    ) -> Result<()> {
        let mediump = self.deref_var(image).mediump;
        let (image_ty, img) = self.load_image(image)?;
        let coord = self.image_coords(&image_ty, coord)?;
        let sample = sample.filter(|_| image_ty.is_multisampled()).map(|s| self.src(s));
        let dest_type = self.alu_type(image_ty.result, def.bit_size, def.components);

        let mut operands = vec![Operand::IdRef(img), Operand::IdRef(coord)];
        operands.extend(sample_operands(sample));
        let result = match residency {
            Some(residency) => {
                let u32_type = self.uint_type(32);
                let struct_type = self.struct_type(&[u32_type, dest_type]);
                let sparse = self.emit(Op::ImageSparseRead, struct_type, operands)?;
                let code = self.extract(u32_type, sparse, 0)?;
                self.write_raw(residency, 32, 1, code);
                self.extract(dest_type, sparse, 1)?
            }
            None => {
                let result = self.emit(Op::ImageRead, dest_type, operands)?;
                if mediump {
                    self.decorate(result, Decoration::RelaxedPrecision);
                }
                result
            }
        };
        self.store_dest(def, result, image_ty.result)?;
        Ok(())
    }

    fn emit_image_size(&mut self, def: &Def, image: ValueId) -> Result<()> {
        let (image_ty, img) = self.load_image(image)?;
        let components = if image_ty.dim == ImageDim::Cube && !image_ty.arrayed {
            2
        } else {
            image_ty.coordinate_components()
        };
        self.cap(Capability::ImageQuery);
        let ty = self.uvec_type(32, components);
        let result = self.unop(Op::ImageQuerySize, ty, img)?;
        self.store_dest(def, result, BaseType::Uint)?;
        Ok(())
    }

    fn emit_image_samples(&mut self, def: &Def, image: ValueId) -> Result<()> {
        let (_, img) = self.load_image(image)?;
        self.cap(Capability::ImageQuery);
        let ty = self.uvec_type(def.bit_size, def.components);
        let result = self.unop(Op::ImageQuerySamples, ty, img)?;
        self.store_dest(def, result, BaseType::Uint)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Barriers and geometry
    // -------------------------------------------------------------------------

    fn emit_memory_barrier(&mut self, kind: BarrierKind) -> Result<()> {
        let all = MemorySemantics::IMAGE_MEMORY
            | MemorySemantics::UNIFORM_MEMORY
            | MemorySemantics::WORKGROUP_MEMORY
            | MemorySemantics::ATOMIC_COUNTER_MEMORY;
        let (scope, semantics) = match kind {
            BarrierKind::All => {
                let scope = if self.options.vulkan_memory_model {
                    Scope::QueueFamily
                } else {
                    Scope::Device
                };
                (scope, all)
            }
            BarrierKind::Image => (Scope::Device, MemorySemantics::IMAGE_MEMORY),
            BarrierKind::Buffer => (Scope::Device, MemorySemantics::UNIFORM_MEMORY),
            BarrierKind::Group => (Scope::Workgroup, all),
            BarrierKind::Shared => (Scope::Workgroup, MemorySemantics::WORKGROUP_MEMORY),
            BarrierKind::TcsPatch => return Ok(()),
        };
        let semantics = semantics | MemorySemantics::ACQUIRE_RELEASE;
        trace!("memory barrier {:?}: {:?} {:?}", kind, scope, semantics);
        let scope = self.const_uint(32, scope as u64);
        let semantics = self.const_uint(32, semantics.bits() as u64);
        self.emit_void(Op::MemoryBarrier, vec![Operand::IdRef(scope), Operand::IdRef(semantics)])
    }

    fn emit_control_barrier(&mut self) -> Result<()> {
        let (memory_scope, semantics) = if self.stage == Stage::Compute {
            (
                Scope::Workgroup,
                MemorySemantics::WORKGROUP_MEMORY | MemorySemantics::ACQUIRE_RELEASE,
            )
        } else if self.options.vulkan_memory_model {
            (
                Scope::Workgroup,
                MemorySemantics::OUTPUT_MEMORY | MemorySemantics::ACQUIRE_RELEASE,
            )
        } else {
            (Scope::Invocation, MemorySemantics::empty())
        };
        let execution = self.const_uint(32, Scope::Workgroup as u64);
        let memory = self.const_uint(32, memory_scope as u64);
        let semantics = self.const_uint(32, semantics.bits() as u64);
        self.emit_void(
            Op::ControlBarrier,
            vec![Operand::IdRef(execution), Operand::IdRef(memory), Operand::IdRef(semantics)],
        )
    }

    fn multiple_streams(&self) -> bool {
        match self.shader.info {
            StageInfo::Geometry { active_stream_mask, .. } => active_stream_mask.count_ones() > 1,
            _ => false,
        }
    }

    fn emit_vertex(&mut self, stream: u32) -> Result<()> {
        if let StageInfo::Geometry { vertices_out: 0, .. } = self.shader.info {
            return Ok(());
        }
        self.emit_stream_output_copies()?;
        if self.multiple_streams() {
            let stream = self.const_uint(32, stream as u64);
            self.emit_void(Op::EmitStreamVertex, vec![Operand::IdRef(stream)])
        } else {
            self.emit_void(Op::EmitVertex, vec![])
        }
    }

    fn end_primitive(&mut self, stream: u32) -> Result<()> {
        if self.multiple_streams() {
            let stream = self.const_uint(32, stream as u64);
            self.emit_void(Op::EndStreamPrimitive, vec![Operand::IdRef(stream)])
        } else {
            self.emit_void(Op::EndPrimitive, vec![])
        }
    }

    fn emit_discard(&mut self) -> Result<()> {
        let Some(discard_fn) = self.discard_fn else {
            panic!("BUG: discard without a discard function");
        };
        let void = self.void_type();
        self.builder.function_call(void, None, discard_fn, [])?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Interpolation and subgroups
    // -------------------------------------------------------------------------

    fn emit_interpolate(&mut self, def: &Def, op: GLOp, deref: ValueId, operand: Option<Word>) -> Result<()> {
        self.cap(Capability::InterpolationFunction);
        let ptr = self.src(deref);
        let ty = self.deref(deref).ty.clone();
        let result_type = self.glsl_type(&ty);
        let result = match operand {
            Some(operand) => self.builtin(op, result_type, &[ptr, operand])?,
            None => self.builtin(op, result_type, &[ptr])?,
        };
        self.store_dest(def, result, ty.base_type().unwrap_or(BaseType::Float))?;
        Ok(())
    }

    fn emit_vote(&mut self, def: &Def, vote: VoteOp, value: ValueId) -> Result<()> {
        self.cap(Capability::GroupNonUniformVote);
        let op = match vote {
            VoteOp::All => Op::GroupNonUniformAll,
            VoteOp::Any => Op::GroupNonUniformAny,
            VoteOp::Ieq | VoteOp::Feq => Op::GroupNonUniformAllEqual,
        };
        let bool_type = self.bool_type();
        let scope = self.const_uint(32, Scope::Subgroup as u64);
        let value = self.src(value);
        let result = self.binop(op, bool_type, scope, value)?;
        self.write_value(def, result);
        Ok(())
    }
}
