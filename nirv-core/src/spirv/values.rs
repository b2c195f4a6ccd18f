//! Variable declarations, derefs, builtin inputs and the shared/scratch blocks.

use log::debug;
use rspirv::dr::Operand;
use rspirv::spirv::{BuiltIn, Capability, Decoration, Op, StorageClass, Word};

use super::context::{BoTypes, Ctx, OpaqueTypes, SamplerBinding};
use crate::bail_spirv;
use crate::error::Result;
use crate::ir::{
    BaseType, BuiltinSlot, Def, Deref, DerefKind, Interpolation, Stage, StageInfo, StreamOutput, SystemValue, Type,
    Variable, VariableId, VariableMode,
};

pub(super) fn storage_class(mode: VariableMode) -> StorageClass {
    match mode {
        VariableMode::FunctionTemp => StorageClass::Function,
        VariableMode::ShaderIn => StorageClass::Input,
        VariableMode::ShaderOut => StorageClass::Output,
        VariableMode::Uniform | VariableMode::Image => StorageClass::UniformConstant,
        VariableMode::Ubo => StorageClass::Uniform,
        VariableMode::Ssbo => StorageClass::StorageBuffer,
        VariableMode::PushConst => StorageClass::PushConstant,
    }
}

fn slot_builtin(slot: BuiltinSlot, stage: Stage, input: bool) -> BuiltIn {
    match slot {
        BuiltinSlot::Position if stage == Stage::Fragment && input => BuiltIn::FragCoord,
        BuiltinSlot::Position => BuiltIn::Position,
        BuiltinSlot::PointSize => BuiltIn::PointSize,
        BuiltinSlot::ClipDistance => BuiltIn::ClipDistance,
        BuiltinSlot::CullDistance => BuiltIn::CullDistance,
        BuiltinSlot::Layer => BuiltIn::Layer,
        BuiltinSlot::ViewportIndex => BuiltIn::ViewportIndex,
        BuiltinSlot::PrimitiveId => BuiltIn::PrimitiveId,
        BuiltinSlot::FragCoord => BuiltIn::FragCoord,
        BuiltinSlot::PointCoord => BuiltIn::PointCoord,
        BuiltinSlot::FrontFacing => BuiltIn::FrontFacing,
        BuiltinSlot::TessLevelOuter => BuiltIn::TessLevelOuter,
        BuiltinSlot::TessLevelInner => BuiltIn::TessLevelInner,
        BuiltinSlot::FragDepth => BuiltIn::FragDepth,
        BuiltinSlot::SampleMask => BuiltIn::SampleMask,
        BuiltinSlot::StencilRef => BuiltIn::FragStencilRefEXT,
    }
}

/// Builtin, name and numeric type of a system value's input variable.
fn system_value_builtin(value: SystemValue) -> (BuiltIn, &'static str, BaseType) {
    use SystemValue::*;
    match value {
        FrontFace => (BuiltIn::FrontFacing, "gl_FrontFacing", BaseType::Bool),
        VertexId => (BuiltIn::VertexIndex, "gl_VertexId", BaseType::Uint),
        InstanceId => (BuiltIn::InstanceIndex, "gl_InstanceId", BaseType::Uint),
        BaseVertex => (BuiltIn::BaseVertex, "gl_BaseVertex", BaseType::Uint),
        BaseInstance => (BuiltIn::BaseInstance, "gl_BaseInstance", BaseType::Uint),
        DrawId => (BuiltIn::DrawIndex, "gl_DrawID", BaseType::Uint),
        PrimitiveId => (BuiltIn::PrimitiveId, "gl_PrimitiveIdIn", BaseType::Uint),
        InvocationId => (BuiltIn::InvocationId, "gl_InvocationId", BaseType::Uint),
        SampleId => (BuiltIn::SampleId, "gl_SampleId", BaseType::Uint),
        SamplePos => (BuiltIn::SamplePosition, "gl_SamplePosition", BaseType::Float),
        SampleMaskIn => (BuiltIn::SampleMask, "gl_SampleMaskIn", BaseType::Uint),
        HelperInvocation => (BuiltIn::HelperInvocation, "gl_HelperInvocation", BaseType::Bool),
        PatchVerticesIn => (BuiltIn::PatchVertices, "gl_PatchVerticesIn", BaseType::Int),
        TessCoord => (BuiltIn::TessCoord, "gl_TessCoord", BaseType::Float),
        WorkgroupId => (BuiltIn::WorkgroupId, "gl_WorkGroupID", BaseType::Uint),
        NumWorkgroups => (BuiltIn::NumWorkgroups, "gl_NumWorkGroups", BaseType::Uint),
        LocalInvocationId => (BuiltIn::LocalInvocationId, "gl_LocalInvocationID", BaseType::Uint),
        LocalInvocationIndex => (BuiltIn::LocalInvocationIndex, "gl_LocalInvocationIndex", BaseType::Uint),
        GlobalInvocationId => (BuiltIn::GlobalInvocationId, "gl_GlobalInvocationID", BaseType::Uint),
        SubgroupId => (BuiltIn::SubgroupId, "gl_SubgroupId", BaseType::Uint),
        SubgroupSize => (BuiltIn::SubgroupSize, "gl_SubgroupSize", BaseType::Uint),
        SubgroupInvocation => (BuiltIn::SubgroupLocalInvocationId, "gl_SubgroupInvocation", BaseType::Uint),
        SubgroupEqMask => (BuiltIn::SubgroupEqMask, "gl_SubgroupEqMask", BaseType::Uint),
        SubgroupGeMask => (BuiltIn::SubgroupGeMask, "gl_SubgroupGeMask", BaseType::Uint),
        SubgroupGtMask => (BuiltIn::SubgroupGtMask, "gl_SubgroupGtMask", BaseType::Uint),
        SubgroupLeMask => (BuiltIn::SubgroupLeMask, "gl_SubgroupLeMask", BaseType::Uint),
        SubgroupLtMask => (BuiltIn::SubgroupLtMask, "gl_SubgroupLtMask", BaseType::Uint),
        WorkgroupSize => panic!("BUG: the workgroup size is a constant, not an input"),
    }
}

/// Base type and component count of an output that can be captured.
fn stream_output_source(so: &StreamOutput, var: &Variable) -> Result<(BaseType, u8)> {
    if var.mode != VariableMode::ShaderOut {
        bail_spirv!("transform feedback source {} is not an output", so.source);
    }
    let ty = var.ty();
    let components = match ty {
        Type::Scalar { .. } | Type::Vector { .. } => ty.vector_components() as u32,
        Type::Array { element, .. } if element.is_scalar() => ty.aoa_size(),
        other => bail_spirv!("cannot capture {:?} for transform feedback", other),
    };
    let (Some(base), Some(bits)) = (ty.base_type(), ty.bit_size()) else {
        bail_spirv!("cannot capture {:?} for transform feedback", ty);
    };
    if base != BaseType::Bool && bits != 32 {
        bail_spirv!("cannot capture {}-bit output {} for transform feedback", bits, so.source);
    }
    let end = so.start_component as u32 + so.num_components as u32;
    if so.num_components == 0 || end > components {
        bail_spirv!(
            "components {}..{} of output {} do not exist",
            so.start_component,
            end,
            so.source
        );
    }
    Ok((base, components as u8))
}

impl Ctx<'_> {
    // -------------------------------------------------------------------------
    // Global variables
    // -------------------------------------------------------------------------

    /// Declare every global variable of the shader, in binding order.
    pub fn emit_variables(&mut self) -> Result<()> {
        let shader = self.shader;

        for (id, var) in shader.variables_with_mode(VariableMode::PushConst) {
            self.emit_push_const(id, var);
        }
        for (id, var) in shader.variables_with_mode(VariableMode::ShaderIn) {
            self.emit_input(id, var);
        }
        for (id, var) in shader.variables_with_mode(VariableMode::ShaderOut) {
            self.emit_output(id, var);
        }
        self.emit_stream_outputs()?;

        // Uniform buffers at location 0 and the rest alias separately.
        let mut ubo_counter = [0u32; 2];
        for (_, var) in shader.variables_with_mode(VariableMode::Ubo) {
            ubo_counter[(var.driver_location != 0) as usize] += 1;
        }
        for (id, var) in shader.variables_with_mode(VariableMode::Ubo) {
            let aliased = ubo_counter[(var.driver_location != 0) as usize] > 1;
            self.emit_bo(id, var, aliased);
        }
        let ssbo_counter = shader.variables_with_mode(VariableMode::Ssbo).count();
        for (id, var) in shader.variables_with_mode(VariableMode::Ssbo) {
            self.emit_bo(id, var, ssbo_counter > 1);
        }

        for (id, var) in shader.variables.iter().enumerate() {
            if matches!(var.mode, VariableMode::Uniform | VariableMode::Image) {
                self.emit_opaque(VariableId(id as u32), var);
            }
        }

        debug!("declared {} globals, {} on the interface", self.vars.len(), self.interface.len());
        Ok(())
    }

    fn emit_push_const(&mut self, id: VariableId, var: &Variable) {
        let ty = match var.ty() {
            Type::Struct { name, fields, .. } => Type::Struct {
                name: name.clone(),
                fields: fields.clone(),
                block: true,
            },
            other => panic!("BUG: push constant block of type {:?}", other),
        };
        let var_type = self.glsl_type(&ty);
        let var_id = self.global_var(var_type, StorageClass::PushConstant);
        if let Some(name) = &var.name {
            self.name(var_id, name);
        }
        self.push_const = Some((var_id, id));
        self.vars.insert(id, var_id);
        self.add_interface(var_id, false);
    }

    fn emit_interpolation(&mut self, var_id: Word, interpolation: Interpolation) {
        match interpolation {
            Interpolation::Smooth => {}
            Interpolation::Flat => self.decorate(var_id, Decoration::Flat),
            Interpolation::NoPerspective => self.decorate(var_id, Decoration::NoPerspective),
        }
    }

    fn emit_input(&mut self, id: VariableId, var: &Variable) {
        let var_type = self.glsl_type(var.ty());
        let var_id = self.global_var(var_type, StorageClass::Input);
        if let Some(name) = &var.name {
            self.name(var_id, name);
        }

        match var.builtin() {
            Some(slot) => self.decorate_builtin(var_id, slot_builtin(slot, self.stage, true)),
            None => self.decorate_u32(var_id, Decoration::Location, var.driver_location),
        }
        if self.stage == Stage::Fragment {
            if var.centroid {
                self.decorate(var_id, Decoration::Centroid);
            } else if var.sample {
                self.decorate(var_id, Decoration::Sample);
            }
            self.emit_interpolation(var_id, var.interpolation);
        }
        if var.component != 0 {
            self.decorate_u32(var_id, Decoration::Component, var.component);
        }
        if var.patch {
            self.decorate(var_id, Decoration::Patch);
        }

        self.vars.insert(id, var_id);
        self.add_interface(var_id, true);
    }

    fn emit_output(&mut self, id: VariableId, var: &Variable) {
        let mut var_type = self.glsl_type(var.ty());
        let builtin = var.builtin();

        if self.stage == Stage::Fragment && builtin == Some(BuiltinSlot::SampleMask) && var.ty().is_scalar() {
            var_type = self.array_type(var_type, Some(1), 0);
            self.sample_mask_type = Some(var_type);
        }
        let var_id = self.global_var(var_type, StorageClass::Output);
        if let Some(name) = &var.name {
            self.name(var_id, name);
        }
        if var.mediump {
            self.decorate(var_id, Decoration::RelaxedPrecision);
        }

        match builtin {
            Some(slot) => self.decorate_builtin(var_id, slot_builtin(slot, self.stage, false)),
            None => self.decorate_u32(var_id, Decoration::Location, var.driver_location),
        }
        if self.stage == Stage::Fragment {
            if builtin.is_none() {
                self.decorate_u32(var_id, Decoration::Index, var.index);
            }
            if var.sample {
                self.decorate(var_id, Decoration::Sample);
            }
        } else {
            self.emit_interpolation(var_id, var.interpolation);
        }
        if var.component != 0 {
            self.decorate_u32(var_id, Decoration::Component, var.component);
        }
        if var.patch {
            self.decorate(var_id, Decoration::Patch);
        }
        if let Some(xfb) = var.xfb {
            self.decorate_u32(var_id, Decoration::Offset, xfb.offset);
            self.decorate_u32(var_id, Decoration::XfbBuffer, xfb.buffer);
            self.decorate_u32(var_id, Decoration::XfbStride, xfb.stride);
            if xfb.stream != 0 {
                self.decorate_u32(var_id, Decoration::Stream, xfb.stream);
            }
        }

        self.vars.insert(id, var_id);
        self.add_interface(var_id, true);
    }

    /// Declare an `xfb{i}` output for every transform feedback capture,
    /// located after the last user output.
    fn emit_stream_outputs(&mut self) -> Result<()> {
        let shader = self.shader;
        let first_location = shader
            .variables_with_mode(VariableMode::ShaderOut)
            .filter(|(_, var)| var.builtin().is_none())
            .map(|(_, var)| var.driver_location + var.ty().aoa_size())
            .max()
            .unwrap_or(0);

        for (i, so) in shader.streamout.iter().enumerate() {
            let (base, _) = stream_output_source(so, shader.variable(so.source))?;
            let ty = self.alu_type(base, 32, so.num_components);
            let var_id = self.global_var(ty, StorageClass::Output);
            self.name(var_id, &format!("xfb{}", i));
            self.decorate_u32(var_id, Decoration::Offset, so.offset);
            self.decorate_u32(var_id, Decoration::XfbBuffer, so.buffer);
            self.decorate_u32(var_id, Decoration::XfbStride, so.stride);
            if so.stream != 0 {
                self.decorate_u32(var_id, Decoration::Stream, so.stream);
            }
            self.decorate_u32(var_id, Decoration::Location, first_location + i as u32);
            if so.start_component != 0 {
                self.decorate_u32(var_id, Decoration::Component, so.start_component as u32);
            }
            self.add_interface(var_id, true);
            self.stream_outputs.push(var_id);
        }
        Ok(())
    }

    /// Copy the captured components of each output into its `xfb{i}` variable.
    pub fn emit_stream_output_copies(&mut self) -> Result<()> {
        let shader = self.shader;
        for (i, so) in shader.streamout.iter().enumerate() {
            let source = shader.variable(so.source);
            let (base, components) = stream_output_source(so, source)?;
            let source_type = self.glsl_type(source.ty());
            let loaded = self.load(source_type, self.var_id(so.source))?;

            let start = so.start_component as u32;
            let count = so.num_components;
            let scalar = self.alu_type(base, 32, 1);
            let ty = self.alu_type(base, 32, count);
            let array = source.ty().is_array();
            let value = if count == components && !array {
                loaded
            } else if count == 1 {
                self.extract(scalar, loaded, start)?
            } else if array {
                let parts = (start..start + count as u32)
                    .map(|c| self.extract(scalar, loaded, c))
                    .collect::<Result<Vec<_>>>()?;
                self.construct(ty, &parts)?
            } else {
                let mut operands = vec![Operand::IdRef(loaded), Operand::IdRef(loaded)];
                operands.extend((start..start + count as u32).map(Operand::LiteralBit32));
                self.emit(Op::VectorShuffle, ty, operands)?
            };
            let target = match self.stream_outputs.get(i) {
                Some(&var) => var,
                None => panic!("BUG: transform feedback output {} was never declared", i),
            };
            self.store(target, value)?;
        }
        Ok(())
    }

    /// Types of a buffer variable: `array[n] of struct { uintN base[]; [uintN tail[]] }`.
    fn bo_types(&mut self, id: VariableId, var: &Variable) -> BoTypes {
        if let Some(&types) = self.bo_types.get(&id) {
            return types;
        }
        let Type::Struct { fields, .. } = var.ty().without_array() else {
            panic!("BUG: buffer {:?} is not an array of blocks", var.name);
        };
        let Some(Type::Array { element, length, .. }) = fields.first().map(|f| &f.ty) else {
            panic!("BUG: buffer {:?} does not start with an array", var.name);
        };
        let bit_size = match element.as_ref() {
            Type::Scalar { bits, .. } => *bits,
            other => panic!("BUG: buffer {:?} holds {:?} instead of scalars", var.name, other),
        };

        let uint = self.uint_type(bit_size);
        let array_type = self.array_type(uint, *length, bit_size as u32 / 8);
        let mut tail_type = None;
        if var.mode == VariableMode::Ssbo && fields.len() > 1 {
            if let Some(Type::Array {
                length: None, stride, ..
            }) = fields.last().map(|f| &f.ty)
            {
                let stride = if *stride == 0 { bit_size as u32 / 8 } else { *stride };
                tail_type = Some(self.array_type(uint, None, stride));
            }
        }

        let members = match tail_type {
            Some(tail) => vec![array_type, tail],
            None => vec![array_type],
        };
        let struct_type = self.struct_type(&members);
        if let Some(name) = &var.name {
            self.name(struct_type, &format!("struct_{}", name));
        }
        self.decorate(struct_type, Decoration::Block);
        self.member_offset(struct_type, 0, 0);
        if tail_type.is_some() {
            self.member_offset(struct_type, 1, 0);
        }

        let types = BoTypes {
            struct_type,
            array_type,
            tail_type,
            bit_size,
        };
        self.bo_types.insert(id, types);
        types
    }

    fn emit_bo(&mut self, id: VariableId, var: &Variable, aliased: bool) {
        let ssbo = var.mode == VariableMode::Ssbo;
        let types = self.bo_types(id, var);
        let array_type = self.array_type(types.struct_type, Some(var.ty().aoa_size()), 0);
        let sc = storage_class(var.mode);
        let var_id = self.global_var(array_type, sc);
        if let Some(name) = &var.name {
            self.name(var_id, name);
        }
        if aliased && !var.access.restrict {
            self.decorate(var_id, Decoration::Aliased);
        }

        let bits = types.bit_size;
        if ssbo {
            let slot = &mut self.ssbos[(bits >> 4) as usize];
            assert!(slot.is_none(), "BUG: two {}-bit storage buffer arrays", bits);
            *slot = Some(var_id);
            if bits == 32 {
                self.ssbo_var = Some(id);
            }
        } else {
            let previous = self.ubos.insert((var.driver_location, bits), var_id);
            assert!(
                previous.is_none(),
                "BUG: two {}-bit uniform buffers at location {}",
                bits,
                var.driver_location
            );
        }

        self.add_interface(var_id, false);
        self.vars.insert(id, var_id);
        self.decorate_u32(var_id, Decoration::DescriptorSet, var.descriptor_set);
        self.decorate_u32(var_id, Decoration::Binding, var.binding);
    }

    fn emit_opaque(&mut self, id: VariableId, var: &Variable) {
        let sampled = var.ty().is_sampler();
        let image_type = self.bare_image_type(var, sampled);
        let element = if sampled {
            self.builder.type_sampled_image(image_type)
        } else {
            image_type
        };

        let array_len = if var.ty().is_array() { var.ty().aoa_size() } else { 0 };
        let var_type = if array_len > 0 {
            self.array_type(element, Some(array_len), 0)
        } else {
            element
        };
        let var_id = self.global_var(var_type, StorageClass::UniformConstant);
        if var.mediump {
            self.decorate(var_id, Decoration::RelaxedPrecision);
        }
        if let Some(name) = &var.name {
            self.name(var_id, name);
        }

        self.vars.insert(id, var_id);
        self.opaque_types.insert(id, OpaqueTypes { image: image_type, element });
        if sampled {
            let Some(&image) = var.ty().image_type() else {
                panic!("BUG: sampler {:?} has no image type", var.name);
            };
            let previous = self.samplers.insert(
                var.driver_location,
                SamplerBinding {
                    var: var_id,
                    image_type,
                    sampled_type: element,
                    image,
                    array_len,
                    mediump: var.mediump,
                },
            );
            assert!(previous.is_none(), "BUG: two samplers at location {}", var.driver_location);
        } else {
            self.emit_access_decorations(var, var_id);
        }

        self.add_interface(var_id, false);
        self.decorate_u32(var_id, Decoration::DescriptorSet, var.descriptor_set);
        self.decorate_u32(var_id, Decoration::Binding, var.binding);
    }

    /// Coherent and volatile have no decoration under the Vulkan memory model.
    fn emit_access_decorations(&mut self, var: &Variable, var_id: Word) {
        let access = var.access;
        if access.restrict {
            self.decorate(var_id, Decoration::Restrict);
        }
        if access.non_readable {
            self.decorate(var_id, Decoration::NonReadable);
        }
        if access.non_writable {
            self.decorate(var_id, Decoration::NonWritable);
        }
        if access.non_uniform {
            self.decorate(var_id, Decoration::NonUniform);
        }
        if !access.restrict {
            self.decorate(var_id, Decoration::Aliased);
        }
    }

    // -------------------------------------------------------------------------
    // Function-local storage
    // -------------------------------------------------------------------------

    /// Declare registers and temporaries in the current (variables) block.
    pub fn emit_locals(&mut self) {
        let shader = self.shader;
        for reg in &shader.registers {
            let ty = self.value_type(reg.bit_size, reg.components);
            let var = self.function_var(ty);
            self.regs.push(var);
        }
        for (id, var) in shader.variables_with_mode(VariableMode::FunctionTemp) {
            let ty = self.glsl_type(var.ty());
            let var_id = self.function_var(ty);
            if let Some(name) = &var.name {
                self.name(var_id, name);
            }
            self.vars.insert(id, var_id);
        }
    }

    fn function_var(&mut self, ty: Word) -> Word {
        let ptr_type = self.pointer_type(StorageClass::Function, ty);
        self.builder.variable(ptr_type, None, StorageClass::Function, None)
    }

    pub fn var_id(&self, id: VariableId) -> Word {
        match self.vars.get(&id) {
            Some(&var) => var,
            None => panic!("BUG: {} used but never declared", id),
        }
    }

    // -------------------------------------------------------------------------
    // Derefs
    // -------------------------------------------------------------------------

    pub fn emit_deref(&mut self, def: &Def, deref: &Deref) -> Result<()> {
        let shader = self.shader;
        let var = shader.variable(deref.var);
        let sc = storage_class(var.mode);
        let result = match deref.kind {
            DerefKind::Var => self.var_id(deref.var),
            DerefKind::Array { parent, index } => {
                if !self.is_const(index) {
                    self.dynamic_indexing_cap(var);
                }
                let (base, ty) = match var.mode {
                    VariableMode::Ubo | VariableMode::Ssbo if deref.ty.is_struct() => {
                        let types = self.bo_types(deref.var, var);
                        (self.src(parent), types.struct_type)
                    }
                    VariableMode::Uniform | VariableMode::Image => {
                        let element = self.opaque_types(deref.var).element;
                        (self.var_id(deref.var), element)
                    }
                    _ => {
                        let ty = self.glsl_type(&deref.ty);
                        (self.src(parent), ty)
                    }
                };
                let ptr_type = self.pointer_type(sc, ty);
                let index = self.src(index);
                self.access_chain(ptr_type, base, &[index])?
            }
            DerefKind::Struct { parent, field } => {
                let buffer = matches!(var.mode, VariableMode::Ubo | VariableMode::Ssbo);
                let ty = if buffer {
                    let types = self.bo_types(deref.var, var);
                    match (field, types.tail_type) {
                        (1, Some(tail)) => tail,
                        _ => types.array_type,
                    }
                } else {
                    self.glsl_type(&deref.ty)
                };
                let ptr_type = self.pointer_type(sc, ty);
                let index = self.const_uint(32, field as u64);
                let base = self.src(parent);
                if buffer && !var.ty().is_array() {
                    // A lone block is still declared as a one-element array.
                    let zero = self.const_uint(32, 0);
                    self.access_chain(ptr_type, base, &[zero, index])?
                } else {
                    self.access_chain(ptr_type, base, &[index])?
                }
            }
        };
        self.write_raw(def.value, def.bit_size, def.components, result);
        self.record_deref(def.value, deref.var, deref.ty.clone());
        Ok(())
    }

    fn dynamic_indexing_cap(&mut self, var: &Variable) {
        match var.mode {
            VariableMode::Ubo => self.cap(Capability::UniformBufferArrayDynamicIndexing),
            VariableMode::Ssbo => self.cap(Capability::StorageBufferArrayDynamicIndexing),
            VariableMode::Uniform => self.cap(Capability::SampledImageArrayDynamicIndexing),
            VariableMode::Image => self.cap(Capability::StorageImageArrayDynamicIndexing),
            _ => {}
        }
    }

    pub fn opaque_types(&self, id: VariableId) -> OpaqueTypes {
        match self.opaque_types.get(&id) {
            Some(&types) => types,
            None => panic!("BUG: {} is not a sampler or image", id),
        }
    }

    // -------------------------------------------------------------------------
    // Builtin inputs
    // -------------------------------------------------------------------------

    fn builtin_var(&mut self, ty: Word, name: &str, builtin: BuiltIn) -> Word {
        let var = self.global_var(ty, StorageClass::Input);
        self.name(var, name);
        self.decorate_builtin(var, builtin);
        self.add_interface(var, true);
        var
    }

    /// Load a system value into `def`, creating its input variable on first use.
    pub fn load_system_value(&mut self, def: &Def, value: SystemValue) -> Result<()> {
        if value == SystemValue::WorkgroupSize {
            let id = self.workgroup_size_value();
            self.write_value(def, id);
            return Ok(());
        }
        if value.is_subgroup() {
            self.cap(Capability::SubgroupBallotKHR);
            self.ext("SPV_KHR_shader_ballot");
        }

        let (builtin, name, base) = system_value_builtin(value);
        let ty = self.alu_type(base, def.bit_size.max(1), def.components);
        let result = if value == SystemValue::SampleMaskIn {
            let var = match self.builtin_vars.get(&value) {
                Some(&var) => var,
                None => {
                    let array = self.array_type(ty, Some(1), 0);
                    let var = self.builtin_var(array, name, builtin);
                    self.builtin_vars.insert(value, var);
                    var
                }
            };
            let zero = self.const_uint(32, 0);
            let ptr_type = self.pointer_type(StorageClass::Input, ty);
            let ptr = self.access_chain(ptr_type, var, &[zero])?;
            self.load(ty, ptr)?
        } else {
            let var = match self.builtin_vars.get(&value) {
                Some(&var) => var,
                None => {
                    let var = self.builtin_var(ty, name, builtin);
                    self.builtin_vars.insert(value, var);
                    var
                }
            };
            self.load(ty, var)?
        };
        self.store_dest(def, result, base)?;
        Ok(())
    }

    /// The workgroup size as a `uvec3`: a constant for fixed sizes, the
    /// specialization-constant composite otherwise.
    pub fn workgroup_size_value(&mut self) -> Word {
        if let Some(id) = self.workgroup_size {
            return id;
        }
        let StageInfo::Compute {
            local_size: Some(size), ..
        } = self.shader.info
        else {
            panic!("BUG: workgroup size read outside a compute shader");
        };
        let parts = size.iter().map(|&s| self.const_uint(32, s as u64)).collect::<Vec<_>>();
        let ty = self.uvec_type(32, 3);
        let id = self.builder.constant_composite(ty, parts);
        self.workgroup_size = Some(id);
        id
    }

    // -------------------------------------------------------------------------
    // Shared and scratch memory
    // -------------------------------------------------------------------------

    fn memory_block(&mut self, storage_class: StorageClass, size: u32, bits: u8) -> Word {
        let len = size / (bits as u32 / 8);
        assert!(len != 0, "BUG: {:?} access of {} bits with {} bytes declared", storage_class, bits, size);
        let array = self.sized_uint_array_type(len, bits);
        let var = self.global_var(array, storage_class);
        self.add_interface(var, false);
        var
    }

    /// Workgroup memory viewed as an array of `bits`-wide unsigned integers.
    pub fn shared_block(&mut self, bits: u8) -> Word {
        let idx = (bits >> 4) as usize;
        if let Some(block) = self.shared_blocks[idx] {
            return block;
        }
        let size = match self.shader.info {
            StageInfo::Compute { shared_size, .. } => shared_size,
            _ => 0,
        };
        let block = self.memory_block(StorageClass::Workgroup, size, bits);
        self.shared_blocks[idx] = Some(block);
        block
    }

    /// Invocation-private scratch memory viewed as an array of `bits`-wide unsigned integers.
    pub fn scratch_block(&mut self, bits: u8) -> Word {
        let idx = (bits >> 4) as usize;
        if let Some(block) = self.scratch_blocks[idx] {
            return block;
        }
        let block = self.memory_block(StorageClass::Private, self.shader.scratch_size, bits);
        self.scratch_blocks[idx] = Some(block);
        block
    }
}
