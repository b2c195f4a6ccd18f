//! Per-compilation lowering state.
//!
//! `Ctx` wraps `rspirv::dr::Builder` together with every table the lowering
//! needs: the SSA value table, registers, variables, block labels, resource
//! bindings and the interface list. One `Ctx` lives for exactly one call to
//! [`compile`](super::compile).

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexSet;
use log::trace;
use rspirv::dr::{self, Builder, InsertPoint, Operand};
use rspirv::spirv::{self, Capability, GLOp, Op, StorageClass, Word};

use crate::error::Result;
use crate::ir::{BaseType, Def, ImageType, Shader, Stage, SystemValue, Type, ValueId, Variable, VariableId};
use crate::options::CompileOptions;

/// A lowered SSA value and its shape.
#[derive(Debug, Clone, Copy)]
pub(super) struct SsaValue {
    pub id: Word,
    pub bit_size: u8,
    pub components: u8,
}

/// The variable a deref value points into and the pointee type.
#[derive(Debug, Clone)]
pub(super) struct DerefInfo {
    pub var: VariableId,
    pub ty: Type,
}

/// A sampler variable, keyed by driver location.
#[derive(Debug, Clone, Copy)]
pub(super) struct SamplerBinding {
    pub var: Word,
    /// `OpTypeImage` of the variable.
    pub image_type: Word,
    /// `OpTypeSampledImage` wrapping `image_type`.
    pub sampled_type: Word,
    pub image: ImageType,
    /// Number of array elements, 0 when the variable is not an array.
    pub array_len: u32,
    pub mediump: bool,
}

/// Types of a uniform or storage buffer binding array.
#[derive(Debug, Clone, Copy)]
pub(super) struct BoTypes {
    /// `struct { uintN base[]; [uintN tail[]] }`
    pub struct_type: Word,
    /// The `base` member type.
    pub array_type: Word,
    /// Trailing runtime array of a storage buffer.
    pub tail_type: Option<Word>,
    pub bit_size: u8,
}

/// Types of a sampler or storage image variable.
#[derive(Debug, Clone, Copy)]
pub(super) struct OpaqueTypes {
    /// `OpTypeImage`.
    pub image: Word,
    /// Type of one element of the variable: the sampled image for samplers,
    /// `image` otherwise.
    pub element: Word,
}

pub(super) struct Ctx<'a> {
    pub builder: Builder,
    pub shader: &'a Shader,
    pub options: &'a CompileOptions,
    pub stage: Stage,
    pub glsl: Word,
    pub interface_listing: bool,

    capabilities: IndexSet<Capability>,
    extensions: IndexSet<&'static str>,

    /// Arrays and structs, deduplicated here because they carry layout decorations.
    pub aggregate_types: HashMap<Type, Word>,
    pub bo_types: HashMap<VariableId, BoTypes>,

    values: Vec<Option<SsaValue>>,
    const_values: Vec<bool>,
    derefs: HashMap<ValueId, DerefInfo>,
    pub regs: Vec<Word>,
    pub vars: HashMap<VariableId, Word>,
    pub labels: Vec<Word>,

    pub ubos: HashMap<(u32, u8), Word>,
    /// Storage buffer arrays indexed by `bit_size >> 4`.
    pub ssbos: [Option<Word>; 5],
    /// The 32-bit storage buffer variable, used for size queries.
    pub ssbo_var: Option<VariableId>,
    pub samplers: BTreeMap<u32, SamplerBinding>,
    pub opaque_types: HashMap<VariableId, OpaqueTypes>,
    /// `uint[1]` wrapping a fragment sample mask output.
    pub sample_mask_type: Option<Word>,
    pub push_const: Option<(Word, VariableId)>,
    pub shared_blocks: [Option<Word>; 5],
    pub scratch_blocks: [Option<Word>; 5],

    pub interface: Vec<Word>,
    /// `xfb{i}` output variables, parallel to `shader.streamout`.
    pub stream_outputs: Vec<Word>,
    pub loop_break: Option<Word>,
    pub loop_cont: Option<Word>,
    /// A block is begun and not yet terminated.
    pub block_open: bool,
    pub builtin_vars: HashMap<SystemValue, Word>,
    pub discard_fn: Option<Word>,
    pub workgroup_size: Option<Word>,
}

impl<'a> Ctx<'a> {
    pub fn new(shader: &'a Shader, options: &'a CompileOptions) -> Self {
        let mut builder = Builder::new();
        builder.set_version(options.spirv_version.major, options.spirv_version.minor);
        let glsl = builder.ext_inst_import("GLSL.std.450");

        let num_values = shader.num_values as usize;
        Ctx {
            builder,
            shader,
            options,
            stage: shader.stage(),
            glsl,
            interface_listing: options.interface_listing(),
            capabilities: IndexSet::new(),
            extensions: IndexSet::new(),
            aggregate_types: HashMap::new(),
            bo_types: HashMap::new(),
            values: vec![None; num_values],
            const_values: vec![false; num_values],
            derefs: HashMap::new(),
            regs: Vec::new(),
            vars: HashMap::new(),
            labels: Vec::new(),
            ubos: HashMap::new(),
            ssbos: [None; 5],
            ssbo_var: None,
            samplers: BTreeMap::new(),
            opaque_types: HashMap::new(),
            sample_mask_type: None,
            push_const: None,
            shared_blocks: [None; 5],
            scratch_blocks: [None; 5],
            interface: Vec::new(),
            stream_outputs: Vec::new(),
            loop_break: None,
            loop_cont: None,
            block_open: false,
            builtin_vars: HashMap::new(),
            discard_fn: None,
            workgroup_size: None,
        }
    }

    // -------------------------------------------------------------------------
    // Capabilities and extensions
    // -------------------------------------------------------------------------

    pub fn cap(&mut self, cap: Capability) {
        if self.capabilities.insert(cap) {
            trace!("capability {:?}", cap);
        }
    }

    pub fn ext(&mut self, name: &'static str) {
        if self.extensions.insert(name) {
            trace!("extension {}", name);
        }
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.extensions.iter().copied()
    }

    // -------------------------------------------------------------------------
    // SSA values
    // -------------------------------------------------------------------------

    fn value_slot(&mut self, value: ValueId) -> &mut Option<SsaValue> {
        match self.values.get_mut(value.index()) {
            Some(slot) => slot,
            None => panic!("BUG: value {} is outside the shader's value range", value),
        }
    }

    /// Record the lowered id of `value`. Every value is written exactly once.
    pub fn write_raw(&mut self, value: ValueId, bit_size: u8, components: u8, id: Word) {
        let slot = self.value_slot(value);
        assert!(slot.is_none(), "BUG: value {} written twice", value);
        *slot = Some(SsaValue {
            id,
            bit_size,
            components,
        });
    }

    pub fn write_value(&mut self, def: &Def, id: Word) {
        self.write_raw(def.value, def.bit_size, def.components, id);
    }

    pub fn value(&self, value: ValueId) -> SsaValue {
        match self.values.get(value.index()).copied().flatten() {
            Some(v) => v,
            None => panic!("BUG: value {} read before it was written", value),
        }
    }

    pub fn src(&self, value: ValueId) -> Word {
        self.value(value).id
    }

    pub fn mark_const(&mut self, value: ValueId) {
        self.const_values[value.index()] = true;
    }

    pub fn is_const(&self, value: ValueId) -> bool {
        self.const_values.get(value.index()).copied().unwrap_or(false)
    }

    pub fn record_deref(&mut self, value: ValueId, var: VariableId, ty: Type) {
        self.derefs.insert(value, DerefInfo { var, ty });
    }

    pub fn deref(&self, value: ValueId) -> &DerefInfo {
        match self.derefs.get(&value) {
            Some(info) => info,
            None => panic!("BUG: {} is not a deref", value),
        }
    }

    /// The variable a deref value points into.
    pub fn deref_var(&self, value: ValueId) -> &'a Variable {
        let shader = self.shader;
        shader.variable(self.deref(value).var)
    }

    /// Reinterpret `result` as unsigned (or keep it as a boolean) and record it.
    pub fn store_dest(&mut self, def: &Def, result: Word, base: BaseType) -> Result<Word> {
        let id = match base {
            BaseType::Int | BaseType::Float if def.bit_size != 1 => {
                self.bitcast_to_uvec(result, def.bit_size, def.components)?
            }
            _ => result,
        };
        self.write_value(def, id);
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Instruction emission
    // -------------------------------------------------------------------------

    /// Emit `op` with a result into the current block.
    pub fn emit(&mut self, op: Op, result_type: Word, operands: Vec<Operand>) -> Result<Word> {
        let id = self.builder.id();
        let inst = dr::Instruction::new(op, Some(result_type), Some(id), operands);
        self.builder.insert_into_block(InsertPoint::End, inst)?;
        Ok(id)
    }

    /// Emit `op` without a result into the current block.
    pub fn emit_void(&mut self, op: Op, operands: Vec<Operand>) -> Result<()> {
        let inst = dr::Instruction::new(op, None, None, operands);
        self.builder.insert_into_block(InsertPoint::End, inst)?;
        Ok(())
    }

    pub fn unop(&mut self, op: Op, ty: Word, src: Word) -> Result<Word> {
        self.emit(op, ty, vec![Operand::IdRef(src)])
    }

    pub fn binop(&mut self, op: Op, ty: Word, a: Word, b: Word) -> Result<Word> {
        self.emit(op, ty, vec![Operand::IdRef(a), Operand::IdRef(b)])
    }

    pub fn triop(&mut self, op: Op, ty: Word, a: Word, b: Word, c: Word) -> Result<Word> {
        self.emit(op, ty, vec![Operand::IdRef(a), Operand::IdRef(b), Operand::IdRef(c)])
    }

    /// Emit a `GLSL.std.450` instruction.
    pub fn builtin(&mut self, op: GLOp, ty: Word, args: &[Word]) -> Result<Word> {
        let operands = args.iter().map(|&a| Operand::IdRef(a)).collect::<Vec<_>>();
        Ok(self.builder.ext_inst(ty, None, self.glsl, op as u32, operands)?)
    }

    pub fn bitcast(&mut self, ty: Word, value: Word) -> Result<Word> {
        Ok(self.builder.bitcast(ty, None, value)?)
    }

    pub fn bitcast_to_uvec(&mut self, value: Word, bit_size: u8, components: u8) -> Result<Word> {
        let ty = self.uvec_type(bit_size, components);
        self.bitcast(ty, value)
    }

    pub fn bitcast_to_ivec(&mut self, value: Word, bit_size: u8, components: u8) -> Result<Word> {
        let ty = self.ivec_type(bit_size, components);
        self.bitcast(ty, value)
    }

    pub fn bitcast_to_fvec(&mut self, value: Word, bit_size: u8, components: u8) -> Result<Word> {
        let ty = self.fvec_type(bit_size, components);
        self.bitcast(ty, value)
    }

    pub fn select(&mut self, ty: Word, cond: Word, if_true: Word, if_false: Word) -> Result<Word> {
        Ok(self.builder.select(ty, None, cond, if_true, if_false)?)
    }

    pub fn load(&mut self, ty: Word, ptr: Word) -> Result<Word> {
        Ok(self.builder.load(ty, None, ptr, None, [])?)
    }

    pub fn store(&mut self, ptr: Word, value: Word) -> Result<()> {
        Ok(self.builder.store(ptr, value, None, [])?)
    }

    pub fn access_chain(&mut self, ptr_type: Word, base: Word, indices: &[Word]) -> Result<Word> {
        Ok(self.builder.access_chain(ptr_type, None, base, indices.iter().copied())?)
    }

    pub fn extract(&mut self, ty: Word, composite: Word, index: u32) -> Result<Word> {
        Ok(self.builder.composite_extract(ty, None, composite, [index])?)
    }

    pub fn construct(&mut self, ty: Word, parts: &[Word]) -> Result<Word> {
        Ok(self.builder.composite_construct(ty, None, parts.iter().copied())?)
    }

    // -------------------------------------------------------------------------
    // Decorations and globals
    // -------------------------------------------------------------------------

    pub fn decorate(&mut self, target: Word, decoration: spirv::Decoration) {
        self.builder.decorate(target, decoration, []);
    }

    pub fn decorate_u32(&mut self, target: Word, decoration: spirv::Decoration, value: u32) {
        self.builder.decorate(target, decoration, [Operand::LiteralBit32(value)]);
    }

    pub fn decorate_builtin(&mut self, target: Word, builtin: spirv::BuiltIn) {
        self.builder.decorate(target, spirv::Decoration::BuiltIn, [Operand::BuiltIn(builtin)]);
    }

    pub fn member_offset(&mut self, target: Word, member: u32, offset: u32) {
        self.builder
            .member_decorate(target, member, spirv::Decoration::Offset, [Operand::LiteralBit32(offset)]);
    }

    pub fn name(&mut self, target: Word, name: &str) {
        self.builder.name(target, name);
    }

    pub fn pointer_type(&mut self, storage_class: StorageClass, pointee: Word) -> Word {
        self.builder.type_pointer(None, storage_class, pointee)
    }

    /// Declare a global variable of type `ty` in `storage_class`. Lands in
    /// the global section even while a function body is being emitted.
    pub fn global_var(&mut self, ty: Word, storage_class: StorageClass) -> Word {
        let ptr_type = self.pointer_type(storage_class, ty);
        let id = self.builder.id();
        let inst = dr::Instruction::new(
            Op::Variable,
            Some(ptr_type),
            Some(id),
            vec![Operand::StorageClass(storage_class)],
        );
        self.builder.insert_types_global_values(InsertPoint::End, inst);
        id
    }

    /// Add a global to the entry point interface. Inputs and outputs are
    /// always listed; other storage classes only in listing mode.
    pub fn add_interface(&mut self, var: Word, always: bool) {
        if always || self.interface_listing {
            self.interface.push(var);
        }
    }
}
