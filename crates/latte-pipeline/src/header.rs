//! WGSL interface declarations for a decompiled shader.
//!
//! The decompiled body is written against a fixed vocabulary: `support_buffer`, `uniform_bank{i}`,
//! `tex{n}`/`samplr{n}`, and the `VertexIn`/`VertexOut`/`FragmentIn`/`FragmentOut` structs. This
//! module declares that vocabulary for one shader and one draw.
//!
//! Binding model:
//! - group 0/1/2 hold the vertex/pixel/geometry stage's resources.
//! - group 3 holds internal emulation resources (see [`crate::vertex_fetch`]).
//! - within a stage group, binding 0 is the support buffer, `1 + i` uniform bank `i`, and texture
//!   binding point `b` uses `32 + 2b` (texture) and `33 + 2b` (sampler).

use std::fmt::Write;

use crate::layout::{plan_uniform_layout, RenderFeatures, UniformLayout};
use crate::regs::ContextRegisters;
use crate::shader::{
    PixelInputTable, ShaderProgram, ShaderStage, TextureDim, UniformMode,
    DEFAULT_UNIFORM_BANK_ENTRIES, MAX_ATTRIBUTE_LOCATIONS, MAX_COLOR_TARGETS,
    MAX_OUTPUT_PARAMETERS, MAX_PARAM_SEMANTIC_ID,
};

pub const BIND_GROUP_INTERNAL: u32 = 3;
pub const SUPPORT_BUFFER_BINDING: u32 = 0;
pub const UNIFORM_BANK_BINDING_BASE: u32 = 1;
pub const TEXTURE_BINDING_BASE: u32 = 32;
pub const INDEX_BUFFER_BINDING: u32 = 0;
pub const VERTEX_BUFFER_BINDING_BASE: u32 = 1;

pub fn texture_binding(binding_point: u32) -> u32 {
    TEXTURE_BINDING_BASE + binding_point * 2
}

pub fn sampler_binding(binding_point: u32) -> u32 {
    TEXTURE_BINDING_BASE + binding_point * 2 + 1
}

/// Where vertex attributes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeInput {
    /// Fixed-function vertex input; `VertexIn` is the entry point argument.
    Bound,
    /// Filled by generated vertex-pulling code; `VertexIn` is a plain struct.
    Synthesized,
}

#[derive(Debug, Clone, Copy)]
pub struct HeaderContext<'a> {
    pub registers: &'a ContextRegisters,
    pub ps_inputs: &'a PixelInputTable,
    pub attribute_input: AttributeInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedHeader {
    pub source: String,
    pub uniform_layout: UniformLayout,
}

/// Emits the declarations `shader`'s body relies on.
pub fn emit_header(shader: &ShaderProgram, ctx: &HeaderContext<'_>) -> EmittedHeader {
    let features = RenderFeatures::for_shader(shader, ctx.registers);
    let uniform_layout = plan_uniform_layout(shader, &features);

    let mut src = String::new();
    emit_support_buffer(&mut src, &uniform_layout);
    if shader.uniform_mode == UniformMode::FullUniformBank {
        emit_uniform_banks(&mut src, shader);
    }
    emit_textures(&mut src, shader);

    match shader.stage {
        ShaderStage::Vertex => {
            emit_vertex_inputs(&mut src, shader, ctx.attribute_input);
            emit_vertex_outputs(&mut src, shader, ctx.registers, ctx.ps_inputs);
        }
        ShaderStage::Pixel => {
            emit_fragment_inputs(&mut src, ctx.ps_inputs);
            emit_fragment_outputs(&mut src, shader);
        }
        ShaderStage::Geometry => {}
    }

    EmittedHeader {
        source: src,
        uniform_layout,
    }
}

fn emit_support_buffer(src: &mut String, layout: &UniformLayout) {
    if layout.is_empty() {
        return;
    }
    src.push_str("struct SupportBuffer {\n");
    for field in layout.declared_fields() {
        let _ = writeln!(src, "    {}: {},", field.name, field.ty.wgsl());
    }
    src.push_str("}\n");
    let _ = writeln!(
        src,
        "@group({}) @binding({SUPPORT_BUFFER_BINDING}) var<uniform> support_buffer: SupportBuffer;\n",
        layout.stage.bind_group()
    );
}

fn emit_uniform_banks(src: &mut String, shader: &ShaderProgram) {
    let group = shader.stage.bind_group();
    for (bank, size) in shader.analysis.uniform_buffer_sizes.iter().enumerate() {
        let Some(size) = *size else {
            continue;
        };
        let Some(slot) = shader.resource_mapping.uniform_buffers.get(bank) else {
            debug_assert!(false, "uniform buffer {bank} is accessed but has no binding point");
            tracing::error!(bank, "uniform buffer accessed without a binding point");
            continue;
        };
        let entries = if size == 0 {
            DEFAULT_UNIFORM_BANK_ENTRIES
        } else {
            size
        };
        let _ = writeln!(
            src,
            "struct UniformBank{bank} {{\n    values: array<vec4<f32>, {entries}>,\n}}"
        );
        let _ = writeln!(
            src,
            "@group({group}) @binding({}) var<uniform> uniform_bank{bank}: UniformBank{bank};\n",
            UNIFORM_BANK_BINDING_BASE + slot
        );
    }
}

fn texture_type(dim: TextureDim, is_integer: bool) -> Option<&'static str> {
    if is_integer {
        return match dim {
            TextureDim::D1 => Some("texture_1d<u32>"),
            TextureDim::D2 | TextureDim::D2Msaa => Some("texture_2d<u32>"),
            _ => None,
        };
    }
    match dim {
        TextureDim::D1 => Some("texture_1d<f32>"),
        TextureDim::D2 | TextureDim::D2Msaa => Some("texture_2d<f32>"),
        TextureDim::D2Array => Some("texture_2d_array<f32>"),
        TextureDim::Cube => Some("texture_cube_array<f32>"),
        TextureDim::D3 => Some("texture_3d<f32>"),
        TextureDim::D1Array | TextureDim::D2ArrayMsaa => None,
    }
}

fn emit_textures(src: &mut String, shader: &ShaderProgram) {
    let group = shader.stage.bind_group();
    for (unit, texture) in shader.analysis.textures.iter().enumerate() {
        let Some(texture) = texture else {
            continue;
        };
        let Some(binding_point) = shader.resource_mapping.textures.get(unit) else {
            debug_assert!(false, "texture unit {unit} is used but has no binding point");
            tracing::error!(unit, "texture unit used without a binding point");
            continue;
        };
        let Some(ty) = texture_type(texture.dim, texture.is_integer) else {
            debug_assert!(false, "unsupported texture {texture:?} on unit {unit}");
            tracing::error!(unit, ?texture, "unsupported texture dimension, binding skipped");
            continue;
        };
        let _ = writeln!(
            src,
            "@group({group}) @binding({}) var tex{unit}: {ty};",
            texture_binding(binding_point)
        );
        let _ = writeln!(
            src,
            "@group({group}) @binding({}) var samplr{unit}: sampler;",
            sampler_binding(binding_point)
        );
    }
    if shader.analysis.textures.iter().any(Option::is_some) {
        src.push('\n');
    }
}

fn emit_vertex_inputs(src: &mut String, shader: &ShaderProgram, input: AttributeInput) {
    src.push_str("struct VertexIn {\n");
    match input {
        AttributeInput::Bound => {
            src.push_str("    @builtin(vertex_index) vertex_id: u32,\n");
            src.push_str("    @builtin(instance_index) instance_id: u32,\n");
        }
        AttributeInput::Synthesized => {
            src.push_str("    vertex_id: u32,\n");
            src.push_str("    instance_id: u32,\n");
        }
    }
    for semantic in 0..MAX_ATTRIBUTE_LOCATIONS {
        if !shader.analysis.uses_attribute(semantic) {
            continue;
        }
        let Some(location) = shader.resource_mapping.attributes.get(semantic) else {
            debug_assert!(false, "attribute {semantic} is used but has no location");
            tracing::error!(semantic, "vertex attribute used without a location");
            continue;
        };
        match input {
            AttributeInput::Bound => {
                let _ = writeln!(
                    src,
                    "    @location({location}) attr_data_sem{semantic}: vec4<u32>,"
                );
            }
            AttributeInput::Synthesized => {
                let _ = writeln!(src, "    attr_data_sem{semantic}: vec4<u32>,");
            }
        }
    }
    src.push_str("}\n\n");
}

fn interpolation(is_flat: bool, is_no_perspective: bool) -> &'static str {
    if is_flat {
        "@interpolate(flat) "
    } else if is_no_perspective {
        "@interpolate(linear) "
    } else {
        ""
    }
}

fn emit_vertex_outputs(
    src: &mut String,
    shader: &ShaderProgram,
    regs: &ContextRegisters,
    ps_inputs: &PixelInputTable,
) {
    src.push_str("struct VertexOut {\n");
    src.push_str("    @builtin(position) position: vec4<f32>,\n");

    let mut declared = [false; MAX_PARAM_SEMANTIC_ID as usize + 1];
    for param in 0..MAX_OUTPUT_PARAMETERS {
        if shader.output_parameter_mask & (1 << param) == 0 {
            continue;
        }
        let semantic = regs.vs_output_semantic_id(param);
        if semantic > MAX_PARAM_SEMANTIC_ID || declared[semantic as usize] {
            continue;
        }
        // Exports the pixel shader does not import are dropped.
        let Some(location) = ps_inputs.find(semantic) else {
            continue;
        };
        declared[semantic as usize] = true;
        let import = &ps_inputs.imports[location];
        let _ = writeln!(
            src,
            "    @location({location}) {}param_sem{semantic}: vec4<f32>,",
            interpolation(import.is_flat, import.is_no_perspective)
        );
    }
    src.push_str("}\n\n");
}

fn emit_fragment_inputs(src: &mut String, ps_inputs: &PixelInputTable) {
    src.push_str("struct FragmentIn {\n");
    src.push_str("    @builtin(position) frag_coord: vec4<f32>,\n");
    src.push_str("    @builtin(front_facing) front_facing: bool,\n");
    for (location, import) in ps_inputs.imports.iter().enumerate() {
        let semantic = import.semantic_id;
        if semantic > MAX_PARAM_SEMANTIC_ID {
            continue;
        }
        if ps_inputs.find(semantic) != Some(location) {
            tracing::warn!(semantic, location, "duplicate pixel shader import ignored");
            continue;
        }
        let _ = writeln!(
            src,
            "    @location({location}) {}param_sem{semantic}: vec4<f32>,",
            interpolation(import.is_flat, import.is_no_perspective)
        );
    }
    src.push_str("}\n\n");
}

fn emit_fragment_outputs(src: &mut String, shader: &ShaderProgram) {
    if shader.color_output_mask == 0 {
        return;
    }
    src.push_str("struct FragmentOut {\n");
    for target in 0..MAX_COLOR_TARGETS {
        if shader.color_output_mask & (1 << target) != 0 {
            let _ = writeln!(
                src,
                "    @location({target}) color{target}: ColorTarget{target}Type,"
            );
        }
    }
    src.push_str("}\n\n");
}
