//! Support-buffer planning.
//!
//! Every decompiled stage gets one uniform block (`SupportBuffer`) holding the uniform registers it
//! reads plus the emulation constants the body needs. The planner is a pure function of the shader
//! analysis and the draw's feature flags; [`crate::header`] declares exactly the fields planned
//! here, at the planned offsets.

use crate::regs::ContextRegisters;
use crate::shader::{
    ShaderProgram, ShaderStage, UniformMode, MAX_STREAMOUT_BUFFERS, MAX_TEXTURE_UNITS,
    MAX_UNIFORM_REGISTERS,
};

/// Draw-time switches that add fields to the support buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RenderFeatures {
    /// At least one of the X/Y/Z viewport scales is disabled in `PA_CL_VTE_CNTL`.
    pub viewport_scale_disabled: bool,
    pub alpha_test_enabled: bool,
    /// A geometry stage follows the vertex stage.
    pub uses_geometry_shader: bool,
}

impl RenderFeatures {
    pub fn for_shader(shader: &ShaderProgram, regs: &ContextRegisters) -> Self {
        Self {
            viewport_scale_disabled: regs.viewport_transform_control().any_scale_disabled(),
            alpha_test_enabled: regs.alpha_test_control().enabled(),
            uses_geometry_shader: shader.uses_geometry_shader,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformFieldKind {
    Remapped,
    UniformRegister,
    WindowSpaceToClipSpace,
    AlphaTestRef,
    PointSize,
    FragCoordScale,
    TexScale(u8),
    VerticesPerInstance,
    StreamoutBufferBase(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformFieldType {
    /// `array<vec4<i32>, N>`
    IVec4Array(u32),
    F32,
    Vec2F32,
    I32,
}

impl UniformFieldType {
    pub fn size(self) -> u32 {
        match self {
            UniformFieldType::IVec4Array(len) => len * 16,
            UniformFieldType::F32 | UniformFieldType::I32 => 4,
            UniformFieldType::Vec2F32 => 8,
        }
    }

    pub fn align(self) -> u32 {
        match self {
            UniformFieldType::IVec4Array(_) => 16,
            UniformFieldType::F32 | UniformFieldType::I32 => 4,
            UniformFieldType::Vec2F32 => 8,
        }
    }

    pub fn wgsl(self) -> String {
        match self {
            UniformFieldType::IVec4Array(len) => format!("array<vec4<i32>, {len}>"),
            UniformFieldType::F32 => "f32".to_owned(),
            UniformFieldType::Vec2F32 => "vec2<f32>".to_owned(),
            UniformFieldType::I32 => "i32".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformField {
    pub kind: UniformFieldKind,
    pub name: String,
    pub ty: UniformFieldType,
    pub offset: u32,
}

impl UniformField {
    pub fn size(&self) -> u32 {
        self.ty.size()
    }
}

/// Planned support-buffer layout, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformLayout {
    pub stage: ShaderStage,
    pub fields: Vec<UniformField>,
    /// Final cursor position.
    pub size: u32,
}

impl UniformLayout {
    pub fn field(&self, kind: UniformFieldKind) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.kind == kind)
    }

    pub fn offset_of(&self, kind: UniformFieldKind) -> Option<u32> {
        self.field(kind).map(|f| f.offset)
    }

    /// Fields that are declared in WGSL. Zero-sized fields keep their offset in the table only.
    pub fn declared_fields(&self) -> impl Iterator<Item = &UniformField> {
        self.fields.iter().filter(|f| f.size() > 0)
    }

    pub fn is_empty(&self) -> bool {
        self.declared_fields().next().is_none()
    }
}

fn align_up(v: u32, a: u32) -> u32 {
    debug_assert!(a.is_power_of_two());
    (v + (a - 1)) & !(a - 1)
}

struct Cursor {
    offset: u32,
    fields: Vec<UniformField>,
}

impl Cursor {
    fn push(&mut self, kind: UniformFieldKind, name: String, ty: UniformFieldType) {
        let offset = align_up(self.offset, ty.align());
        self.fields.push(UniformField {
            kind,
            name,
            ty,
            offset,
        });
        self.offset = offset + ty.size();
    }
}

/// Plans the support buffer of `shader` for a draw with `features`.
pub fn plan_uniform_layout(shader: &ShaderProgram, features: &RenderFeatures) -> UniformLayout {
    let stage = shader.stage;
    let analysis = &shader.analysis;
    let suffix = stage.suffix();
    let mut cursor = Cursor {
        offset: 0,
        fields: Vec::new(),
    };

    match shader.uniform_mode {
        UniformMode::Remapped => cursor.push(
            UniformFieldKind::Remapped,
            format!("remapped_{suffix}"),
            UniformFieldType::IVec4Array(analysis.remapped_uniform_count),
        ),
        UniformMode::FullRegisterFile => cursor.push(
            UniformFieldKind::UniformRegister,
            format!("uniform_register_{suffix}"),
            UniformFieldType::IVec4Array(analysis.uniform_register_span.min(MAX_UNIFORM_REGISTERS)),
        ),
        UniformMode::None | UniformMode::FullUniformBank => {}
    }

    if stage == ShaderStage::Vertex && features.viewport_scale_disabled {
        cursor.push(
            UniformFieldKind::WindowSpaceToClipSpace,
            "window_space_to_clip_space".to_owned(),
            UniformFieldType::Vec2F32,
        );
    }

    if stage == ShaderStage::Pixel && features.alpha_test_enabled {
        cursor.push(
            UniformFieldKind::AlphaTestRef,
            "alpha_test_ref".to_owned(),
            UniformFieldType::F32,
        );
    }

    let point_size_stage = match stage {
        ShaderStage::Vertex => !features.uses_geometry_shader,
        ShaderStage::Geometry => true,
        ShaderStage::Pixel => false,
    };
    if point_size_stage && analysis.outputs_point_size && !analysis.writes_point_size {
        cursor.push(
            UniformFieldKind::PointSize,
            "point_size".to_owned(),
            UniformFieldType::F32,
        );
    }

    if stage == ShaderStage::Pixel {
        cursor.push(
            UniformFieldKind::FragCoordScale,
            "frag_coord_scale".to_owned(),
            UniformFieldType::Vec2F32,
        );
    }

    for unit in 0..MAX_TEXTURE_UNITS {
        if analysis.texel_fetch_units.has_unit(unit) {
            cursor.push(
                UniformFieldKind::TexScale(unit as u8),
                format!("tex{unit}_scale"),
                UniformFieldType::Vec2F32,
            );
        }
    }

    let streamout_stage = match stage {
        ShaderStage::Vertex => !features.uses_geometry_shader,
        ShaderStage::Geometry => true,
        ShaderStage::Pixel => false,
    };
    if analysis.uses_streamout_buffers && streamout_stage {
        cursor.push(
            UniformFieldKind::VerticesPerInstance,
            "vertices_per_instance".to_owned(),
            UniformFieldType::I32,
        );
        for buffer in 0..MAX_STREAMOUT_BUFFERS {
            if analysis.streamout_buffer_mask & (1 << buffer) != 0 {
                cursor.push(
                    UniformFieldKind::StreamoutBufferBase(buffer as u8),
                    format!("streamout_buffer_base{buffer}"),
                    UniformFieldType::I32,
                );
            }
        }
    }

    UniformLayout {
        stage,
        fields: cursor.fields,
        size: cursor.offset,
    }
}

/// Packs support-buffer values at their planned offsets.
///
/// Writes to fields the layout does not contain are dropped and reported by the return value.
#[derive(Debug)]
pub struct SupportBufferWriter<'a> {
    layout: &'a UniformLayout,
    bytes: Vec<u8>,
}

impl<'a> SupportBufferWriter<'a> {
    pub fn new(layout: &'a UniformLayout) -> Self {
        // Uniform buffer bindings are sized in 16-byte units.
        let len = align_up(layout.size, 16) as usize;
        Self {
            layout,
            bytes: vec![0u8; len],
        }
    }

    fn write(&mut self, kind: UniformFieldKind, data: &[u8]) -> bool {
        let Some(field) = self.layout.field(kind) else {
            return false;
        };
        let start = field.offset as usize;
        let len = data.len().min(field.size() as usize);
        self.bytes[start..start + len].copy_from_slice(&data[..len]);
        true
    }

    pub fn write_f32(&mut self, kind: UniformFieldKind, value: f32) -> bool {
        self.write(kind, bytemuck::bytes_of(&value))
    }

    pub fn write_vec2(&mut self, kind: UniformFieldKind, value: [f32; 2]) -> bool {
        self.write(kind, bytemuck::bytes_of(&value))
    }

    pub fn write_i32(&mut self, kind: UniformFieldKind, value: i32) -> bool {
        self.write(kind, bytemuck::bytes_of(&value))
    }

    /// Copies register values into an `array<vec4<i32>, N>` field, truncating to its length.
    pub fn write_registers(&mut self, kind: UniformFieldKind, values: &[[i32; 4]]) -> bool {
        self.write(kind, bytemuck::cast_slice(values))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
