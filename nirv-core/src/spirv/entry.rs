//! Entry-point assembly: stage capabilities, the memory model, execution
//! modes and the `OpEntryPoint` itself.

use std::collections::HashSet;

use log::debug;
use rspirv::spirv::{
    AddressingModel, BuiltIn, Capability, Decoration, ExecutionMode, ExecutionModel, MemoryModel, Op, Word,
};

use super::context::Ctx;
use crate::bail_spirv;
use crate::error::Result;
use crate::ir::{
    BuiltinSlot, DepthLayout, GeometryInput, GeometryOutput, InstKind, InterlockMode, Intrinsic, Shader, Slot, Stage,
    StageInfo, SystemValue, TessPrimitive, TessSpacing, VariableMode,
};

/// Which builtin slots and system values a shader touches.
#[derive(Debug, Default)]
pub(super) struct StageUsage {
    pub written: HashSet<BuiltinSlot>,
    pub read: HashSet<BuiltinSlot>,
    pub system_values: HashSet<SystemValue>,
    pub has_xfb: bool,
    pub has_ssbos: bool,
}

impl StageUsage {
    pub fn scan(shader: &Shader) -> Self {
        let mut usage = StageUsage::default();
        for var in &shader.variables {
            match (var.mode, var.slot) {
                (VariableMode::ShaderOut, Slot::BuiltIn(slot)) => {
                    usage.written.insert(slot);
                }
                (VariableMode::ShaderIn, Slot::BuiltIn(slot)) => {
                    usage.read.insert(slot);
                }
                _ => {}
            }
            if var.mode == VariableMode::ShaderOut && var.xfb.is_some() {
                usage.has_xfb = true;
            }
            if var.mode == VariableMode::Ssbo {
                usage.has_ssbos = true;
            }
        }
        if !shader.streamout.is_empty() {
            usage.has_xfb = true;
        }
        shader.for_each_inst(|inst| {
            if let InstKind::Intrinsic(Intrinsic::LoadSystemValue { value }) = inst.kind {
                usage.system_values.insert(value);
            }
        });
        usage
    }

    fn writes(&self, slot: BuiltinSlot) -> bool {
        self.written.contains(&slot)
    }

    fn reads(&self, slot: BuiltinSlot) -> bool {
        self.read.contains(&slot)
    }

    fn reads_system_value(&self, value: SystemValue) -> bool {
        self.system_values.contains(&value)
    }
}

pub(super) fn execution_model(stage: Stage) -> ExecutionModel {
    match stage {
        Stage::Vertex => ExecutionModel::Vertex,
        Stage::TessControl => ExecutionModel::TessellationControl,
        Stage::TessEval => ExecutionModel::TessellationEvaluation,
        Stage::Geometry => ExecutionModel::Geometry,
        Stage::Fragment => ExecutionModel::Fragment,
        Stage::Compute => ExecutionModel::GLCompute,
    }
}

fn depth_layout_mode(layout: DepthLayout) -> ExecutionMode {
    match layout {
        DepthLayout::Any => ExecutionMode::DepthReplacing,
        DepthLayout::Greater => ExecutionMode::DepthGreater,
        DepthLayout::Less => ExecutionMode::DepthLess,
        DepthLayout::Unchanged => ExecutionMode::DepthUnchanged,
    }
}

fn interlock_mode(mode: InterlockMode) -> ExecutionMode {
    match mode {
        InterlockMode::PixelOrdered => ExecutionMode::PixelInterlockOrderedEXT,
        InterlockMode::PixelUnordered => ExecutionMode::PixelInterlockUnorderedEXT,
        InterlockMode::SampleOrdered => ExecutionMode::SampleInterlockOrderedEXT,
        InterlockMode::SampleUnordered => ExecutionMode::SampleInterlockUnorderedEXT,
    }
}

fn primitive_mode(primitive: TessPrimitive) -> ExecutionMode {
    match primitive {
        TessPrimitive::Triangles => ExecutionMode::Triangles,
        TessPrimitive::Quads => ExecutionMode::Quads,
        TessPrimitive::Isolines => ExecutionMode::Isolines,
    }
}

fn spacing_mode(spacing: TessSpacing) -> ExecutionMode {
    match spacing {
        TessSpacing::Equal => ExecutionMode::SpacingEqual,
        TessSpacing::FractionalOdd => ExecutionMode::SpacingFractionalOdd,
        TessSpacing::FractionalEven => ExecutionMode::SpacingFractionalEven,
    }
}

fn input_primitive_mode(input: GeometryInput) -> ExecutionMode {
    match input {
        GeometryInput::Points => ExecutionMode::InputPoints,
        GeometryInput::Lines => ExecutionMode::InputLines,
        GeometryInput::LinesAdjacency => ExecutionMode::InputLinesAdjacency,
        GeometryInput::Triangles => ExecutionMode::Triangles,
        GeometryInput::TrianglesAdjacency => ExecutionMode::InputTrianglesAdjacency,
    }
}

fn output_primitive_mode(output: GeometryOutput) -> ExecutionMode {
    match output {
        GeometryOutput::Points => ExecutionMode::OutputPoints,
        GeometryOutput::LineStrip => ExecutionMode::OutputLineStrip,
        GeometryOutput::TriangleStrip => ExecutionMode::OutputTriangleStrip,
    }
}

/// SpecIds of the workgroup size components when the size is not fixed.
const WORKGROUP_SIZE_SPEC_IDS: [u32; 3] = [1, 2, 3];

impl Ctx<'_> {
    /// Capabilities and extensions implied by the stage and its builtins.
    pub fn emit_stage_capabilities(&mut self, usage: &StageUsage) {
        let version = self.options.spirv_version;
        self.cap(Capability::Shader);

        match self.shader.info {
            StageInfo::Fragment {
                post_depth_coverage,
                uses_sample_shading,
                interlock,
                ..
            } => {
                if post_depth_coverage && usage.reads_system_value(SystemValue::SampleMaskIn) {
                    self.cap(Capability::SampleMaskPostDepthCoverage);
                }
                if uses_sample_shading {
                    self.cap(Capability::SampleRateShading);
                }
                if let Some(mode) = interlock {
                    self.ext("SPV_EXT_fragment_shader_interlock");
                    self.cap(if mode.is_pixel() {
                        Capability::FragmentShaderPixelInterlockEXT
                    } else {
                        Capability::FragmentShaderSampleInterlockEXT
                    });
                }
            }
            StageInfo::Vertex => {
                if usage.system_values.iter().any(|sv| sv.is_draw_parameter()) {
                    self.cap(Capability::DrawParameters);
                    if !version.at_least(1, 3) {
                        self.ext("SPV_KHR_shader_draw_parameters");
                    }
                }
            }
            StageInfo::TessControl { .. } | StageInfo::TessEval { .. } => {
                self.cap(Capability::Tessellation);
                if usage.writes(BuiltinSlot::PointSize) {
                    self.cap(Capability::TessellationPointSize);
                }
            }
            StageInfo::Geometry { active_stream_mask, .. } => {
                self.cap(Capability::Geometry);
                if active_stream_mask != 0 {
                    self.cap(Capability::GeometryStreams);
                }
                if usage.writes(BuiltinSlot::PointSize) {
                    self.cap(Capability::GeometryPointSize);
                }
            }
            StageInfo::Compute { .. } => {}
        }

        if self.stage < Stage::Geometry {
            if usage.writes(BuiltinSlot::Layer) || usage.reads(BuiltinSlot::Layer) {
                if version.at_least(1, 5) {
                    self.cap(Capability::ShaderLayer);
                } else {
                    self.ext("SPV_EXT_shader_viewport_index_layer");
                    self.cap(Capability::ShaderViewportIndexLayerEXT);
                }
            }
        } else if self.stage == Stage::Fragment {
            // Reading these in a fragment shader requires the geometry capability.
            if usage.reads(BuiltinSlot::Layer)
                || usage.reads(BuiltinSlot::PrimitiveId)
                || usage.reads_system_value(SystemValue::PrimitiveId)
            {
                self.cap(Capability::Geometry);
            }
        }

        if usage.has_ssbos && !version.at_least(1, 1) {
            self.ext("SPV_KHR_storage_buffer_storage_class");
        }

        if self.stage < Stage::Fragment && usage.writes(BuiltinSlot::ViewportIndex) {
            if self.stage < Stage::Geometry {
                self.cap(Capability::ShaderViewportIndex);
            } else {
                self.cap(Capability::MultiViewport);
            }
        }

        if usage.writes(BuiltinSlot::StencilRef) {
            self.ext("SPV_EXT_shader_stencil_export");
            self.cap(Capability::StencilExportEXT);
        }
        if usage.has_xfb {
            self.cap(Capability::TransformFeedback);
        }
    }

    pub fn emit_memory_model(&mut self) -> Result<()> {
        if let StageInfo::Compute { ptr_size, .. } = self.shader.info {
            let addressing = match ptr_size {
                32 => {
                    self.cap(Capability::Addresses);
                    AddressingModel::Physical32
                }
                64 => {
                    self.cap(Capability::PhysicalStorageBufferAddresses);
                    if !self.options.spirv_version.at_least(1, 5) {
                        self.ext("SPV_KHR_physical_storage_buffer");
                    }
                    AddressingModel::PhysicalStorageBuffer64
                }
                0 => AddressingModel::Logical,
                bits => bail_spirv!("unsupported compute pointer size {}", bits),
            };
            self.builder.memory_model(addressing, MemoryModel::GLSL450);
        } else if self.options.vulkan_memory_model {
            self.cap(Capability::VulkanMemoryModel);
            self.cap(Capability::VulkanMemoryModelDeviceScope);
            self.builder.memory_model(AddressingModel::Logical, MemoryModel::Vulkan);
        } else {
            self.builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        }
        Ok(())
    }

    /// Declare the specialization-constant workgroup size of a compute
    /// shader without a fixed local size. Must run before the body so that
    /// workgroup size reads resolve to it.
    pub fn emit_workgroup_size_spec_consts(&mut self) {
        let StageInfo::Compute { local_size: None, .. } = self.shader.info else {
            return;
        };
        let mut sizes = [0; 3];
        for ((size, spec_id), name) in sizes.iter_mut().zip(WORKGROUP_SIZE_SPEC_IDS).zip(["x", "y", "z"]) {
            *size = self.spec_const_uint(32, 1);
            self.decorate_u32(*size, Decoration::SpecId, spec_id);
            self.name(*size, name);
        }
        let ty = self.uvec_type(32, 3);
        let composite = self.spec_const_composite(ty, &sizes);
        self.name(composite, "gl_LocalGroupSize");
        self.decorate_builtin(composite, BuiltIn::WorkgroupSize);
        self.workgroup_size = Some(composite);
    }

    fn exec_mode(&mut self, entry: Word, mode: ExecutionMode, literals: &[u32]) {
        self.builder.execution_mode(entry, mode, literals);
    }

    pub fn emit_execution_modes(&mut self, entry: Word, usage: &StageUsage) {
        match self.shader.info {
            StageInfo::Fragment {
                depth_layout,
                early_fragment_tests,
                post_depth_coverage,
                interlock,
                ..
            } => {
                self.exec_mode(entry, ExecutionMode::OriginUpperLeft, &[]);
                if usage.writes(BuiltinSlot::FragDepth) {
                    self.exec_mode(entry, depth_layout_mode(depth_layout), &[]);
                }
                if usage.writes(BuiltinSlot::StencilRef) {
                    self.exec_mode(entry, ExecutionMode::StencilRefReplacingEXT, &[]);
                }
                if early_fragment_tests {
                    self.exec_mode(entry, ExecutionMode::EarlyFragmentTests, &[]);
                }
                if post_depth_coverage {
                    self.ext("SPV_KHR_post_depth_coverage");
                    self.exec_mode(entry, ExecutionMode::PostDepthCoverage, &[]);
                }
                if let Some(mode) = interlock {
                    self.exec_mode(entry, interlock_mode(mode), &[]);
                }
            }
            StageInfo::TessControl { vertices_out } => {
                self.exec_mode(entry, ExecutionMode::OutputVertices, &[vertices_out]);
            }
            StageInfo::TessEval {
                primitive,
                vertex_order_ccw,
                spacing,
                point_mode,
            } => {
                self.exec_mode(entry, primitive_mode(primitive), &[]);
                let order = if vertex_order_ccw {
                    ExecutionMode::VertexOrderCcw
                } else {
                    ExecutionMode::VertexOrderCw
                };
                self.exec_mode(entry, order, &[]);
                self.exec_mode(entry, spacing_mode(spacing), &[]);
                if point_mode {
                    self.exec_mode(entry, ExecutionMode::PointMode, &[]);
                }
            }
            StageInfo::Geometry {
                input,
                output,
                invocations,
                vertices_out,
                ..
            } => {
                self.exec_mode(entry, input_primitive_mode(input), &[]);
                self.exec_mode(entry, output_primitive_mode(output), &[]);
                self.exec_mode(entry, ExecutionMode::Invocations, &[invocations.max(1)]);
                self.exec_mode(entry, ExecutionMode::OutputVertices, &[vertices_out.max(1)]);
            }
            StageInfo::Compute {
                local_size: Some(size), ..
            } => {
                self.exec_mode(entry, ExecutionMode::LocalSize, &size);
            }
            StageInfo::Vertex | StageInfo::Compute { local_size: None, .. } => {}
        }

        if usage.has_xfb {
            self.exec_mode(entry, ExecutionMode::Xfb, &[]);
        }
    }

    pub fn emit_entry_point(&mut self, main: Word, usage: &StageUsage) {
        let model = execution_model(self.stage);
        let interface = std::mem::take(&mut self.interface);
        debug!("entry point {:?} with {} interface variables", model, interface.len());
        self.builder.entry_point(model, main, "main", &interface);
        self.interface = interface;
        self.emit_execution_modes(main, usage);
    }

    /// Move the accumulated capabilities and extensions into the module.
    pub fn emit_capabilities(&mut self) {
        let capabilities = self.capabilities().collect::<Vec<_>>();
        let extensions = self.extensions().collect::<Vec<_>>();
        for cap in capabilities {
            self.builder.capability(cap);
        }
        for ext in extensions {
            self.builder.extension(ext);
        }
    }
}

/// Word offset of the `OutputVertices` literal in an assembled module, or 0.
pub(super) fn find_output_vertices_word(words: &[u32]) -> u32 {
    // Skip the five-word header.
    let mut i = 5;
    while i < words.len() {
        let word_count = (words[i] >> 16) as usize;
        let opcode = words[i] & 0xffff;
        if word_count == 0 {
            break;
        }
        if opcode == Op::ExecutionMode as u32
            && word_count >= 4
            && words.get(i + 2) == Some(&(ExecutionMode::OutputVertices as u32))
        {
            return (i + 3) as u32;
        }
        i += word_count;
    }
    0
}
