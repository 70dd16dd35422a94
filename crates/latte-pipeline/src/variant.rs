//! Per-draw shader variant assembly and compilation.
//!
//! A decompiled body is only compilable together with declarations that depend on the draw: the
//! primitive topology, the attachment formats, and (for stages running as compute) the vertex
//! buffer layout. [`VariantConfig`] captures those choices for one draw, and
//! [`ShaderVariantCompiler`] turns them into a complete WGSL module.

use std::fmt::Write;

use crate::device::{NativeDevice, NativeStage};
use crate::error::CompileError;
use crate::fetch::{FetchShaderDescriptor, HostIndexType};
use crate::framebuffer::{AttachmentDataType, FramebufferState};
use crate::header::{emit_header, AttributeInput, HeaderContext};
use crate::layout::UniformLayout;
use crate::regs::{ContextRegisters, TopologyClass};
use crate::session::SessionContext;
use crate::shader::{PixelInputTable, ShaderProgram, ShaderStage, MAX_COLOR_TARGETS};
use crate::vertex_fetch::emit_vertex_pulling;

/// Role a shader plays in a native pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    /// Vertex shader with fixed-function vertex input.
    Vertex,
    /// Vertex shader running as the object stage of a mesh pipeline; vertices are pulled manually.
    Object,
    /// Geometry shader running as the mesh stage of a mesh pipeline.
    Mesh,
    Fragment,
}

impl StageRole {
    pub fn entry_point(self) -> &'static str {
        match self {
            StageRole::Vertex => "vs_main",
            StageRole::Object => "os_main",
            StageRole::Mesh => "ms_main",
            StageRole::Fragment => "fs_main",
        }
    }

    pub fn native_stage(self) -> NativeStage {
        match self {
            StageRole::Vertex => NativeStage::Vertex,
            StageRole::Object | StageRole::Mesh => NativeStage::Compute,
            StageRole::Fragment => NativeStage::Fragment,
        }
    }

    /// Hardware stage of the programs this role accepts.
    pub fn shader_stage(self) -> ShaderStage {
        match self {
            StageRole::Vertex | StageRole::Object => ShaderStage::Vertex,
            StageRole::Mesh => ShaderStage::Geometry,
            StageRole::Fragment => ShaderStage::Pixel,
        }
    }
}

/// State of the draw a variant is built for. Everything is borrowed for the duration of a call.
#[derive(Debug, Clone, Copy)]
pub struct DrawContext<'a> {
    pub registers: &'a ContextRegisters,
    pub fetch: &'a FetchShaderDescriptor,
    pub framebuffer: &'a FramebufferState,
    pub ps_inputs: &'a PixelInputTable,
    /// Index representation the host uses for this draw; drives index remapping when vertices
    /// are pulled.
    pub host_index_type: HostIndexType,
}

/// Draw-dependent decisions for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantConfig {
    pub role: StageRole,
    /// `None` for fragment variants, which do not see the topology.
    pub topology: Option<(TopologyClass, u32)>,
    pub attribute_input: AttributeInput,
    /// Index representation for vertex pulling; `Some` only for object variants.
    pub vertex_pulling: Option<HostIndexType>,
    /// Output element type per color target; only set for fragment variants.
    pub color_targets: [Option<AttachmentDataType>; MAX_COLOR_TARGETS],
}

impl VariantConfig {
    pub fn for_draw(shader: &ShaderProgram, role: StageRole, draw: &DrawContext<'_>) -> Self {
        let mode = draw.registers.primitive_type().mode();
        let topology = match role {
            StageRole::Fragment => None,
            _ => Some((mode.class(), mode.vertices_per_primitive())),
        };

        let mut color_targets = [None; MAX_COLOR_TARGETS];
        if role == StageRole::Fragment {
            for (i, attachment) in draw.framebuffer.bound_colors() {
                color_targets[i] = Some(attachment.data_type());
            }
            // Written but unbound targets still need a type for `FragmentOut`.
            for (i, slot) in color_targets.iter_mut().enumerate() {
                if slot.is_none() && shader.color_output_mask & (1 << i) != 0 {
                    *slot = Some(AttachmentDataType::Float);
                }
            }
        }

        Self {
            role,
            topology,
            attribute_input: if role == StageRole::Object {
                AttributeInput::Synthesized
            } else {
                AttributeInput::Bound
            },
            vertex_pulling: (role == StageRole::Object).then_some(draw.host_index_type),
            color_targets,
        }
    }

    fn emit_prelude(&self, src: &mut String) {
        if let Some((class, vertices)) = self.topology {
            let _ = writeln!(src, "const PRIMITIVE_TOPOLOGY: u32 = {}u;", class.code());
            let _ = writeln!(src, "const VERTICES_PER_PRIMITIVE: u32 = {vertices}u;");
        }
        for (i, ty) in self.color_targets.iter().enumerate() {
            if let Some(ty) = ty {
                let _ = writeln!(src, "alias ColorTarget{i}Type = {};", ty.wgsl_vec4());
            }
        }
        src.push('\n');
    }
}

/// A complete WGSL module for one shader in one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledVariant {
    pub source: String,
    pub entry_point: &'static str,
    pub stage: NativeStage,
    pub uniform_layout: UniformLayout,
}

/// A compiled variant together with the support-buffer layout the caller must fill.
#[derive(Debug)]
pub struct CompiledStage<F> {
    pub function: F,
    pub uniform_layout: UniformLayout,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ShaderVariantCompiler;

impl ShaderVariantCompiler {
    pub fn assemble(
        shader: &ShaderProgram,
        role: StageRole,
        draw: &DrawContext<'_>,
    ) -> AssembledVariant {
        if shader.stage != role.shader_stage() {
            debug_assert!(false, "{:?} shader used as {role:?} stage", shader.stage);
            tracing::error!(stage = ?shader.stage, ?role, "shader stage does not match its role");
        }

        let config = VariantConfig::for_draw(shader, role, draw);
        let header = emit_header(
            shader,
            &HeaderContext {
                registers: draw.registers,
                ps_inputs: draw.ps_inputs,
                attribute_input: config.attribute_input,
            },
        );

        let mut source = String::with_capacity(header.source.len() + shader.body.len() + 256);
        config.emit_prelude(&mut source);
        source.push_str(&header.source);
        source.push_str(&shader.body);
        if let Some(index_type) = config.vertex_pulling {
            source.push('\n');
            source.push_str(&emit_vertex_pulling(
                draw.fetch,
                shader,
                draw.registers,
                index_type,
            ));
        }

        AssembledVariant {
            source,
            entry_point: role.entry_point(),
            stage: role.native_stage(),
            uniform_layout: header.uniform_layout,
        }
    }

    /// Assembles and compiles `shader` for `role`. Every attempt counts towards the session's
    /// compiled-shader counter.
    pub fn compile<D: NativeDevice>(
        device: &mut D,
        session: &SessionContext,
        shader: &ShaderProgram,
        role: StageRole,
        draw: &DrawContext<'_>,
    ) -> Result<CompiledStage<D::Function>, CompileError> {
        let variant = Self::assemble(shader, role, draw);
        session.record_shader_compile();
        match device.compile_function(&variant.source, variant.entry_point, variant.stage) {
            Ok(function) => Ok(CompiledStage {
                function,
                uniform_layout: variant.uniform_layout,
            }),
            Err(err) => {
                tracing::error!(
                    entry_point = variant.entry_point,
                    shader = %format_args!("{:016x}", shader.base_hash),
                    diagnostic = %err.diagnostic,
                    source = %err.source_text,
                    "shader variant failed to compile"
                );
                Err(err)
            }
        }
    }
}
