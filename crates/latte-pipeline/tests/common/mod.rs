#![allow(dead_code)]

use latte_pipeline::fetch::{BufferGroup, FetchAttribute, FetchShaderDescriptor, VertexDataFormat};
use latte_pipeline::regs::addr;
use latte_pipeline::shader::{PixelImport, SlotTable};
use latte_pipeline::{
    ContextRegisters, DrawContext, FramebufferState, HostIndexType, HostPixelFormat,
    PixelInputTable, ShaderProgram, ShaderStage,
};

pub fn require_webgpu() -> bool {
    let Ok(raw) = std::env::var("LATTE_REQUIRE_WEBGPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_webgpu() {
        panic!("LATTE_REQUIRE_WEBGPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// Routes `tracing` output through the test harness so failures show the cache's logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub const VS_BODY: &str = r#"
@vertex
fn vs_main(input: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.position = bitcast<vec4<f32>>(input.attr_data_sem0);
    out.param_sem1 = bitcast<vec4<f32>>(input.attr_data_sem1);
    return out;
}
"#;

pub const OS_BODY: &str = r#"
@compute @workgroup_size(1)
fn os_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let v = latte_fetch_vertex(gid.x, gid.y);
    _ = v;
}
"#;

pub const GS_BODY: &str = r#"
@compute @workgroup_size(1)
fn ms_main(@builtin(local_invocation_index) index: u32) {
    _ = PRIMITIVE_TOPOLOGY;
}
"#;

pub const FS_BODY: &str = r#"
@fragment
fn fs_main(input: FragmentIn) -> FragmentOut {
    var out: FragmentOut;
    return out;
}
"#;

/// Vertex shader reading attributes 0 and 1 and exporting semantic 1 from parameter 0.
pub fn vertex_shader(base_hash: u64) -> ShaderProgram {
    let mut vs = ShaderProgram::new(ShaderStage::Vertex, base_hash, 0, VS_BODY);
    vs.resource_mapping.attributes = SlotTable::default().with(0, 0).with(1, 1);
    vs.analysis.input_attribute_mask = 0b11;
    vs.output_parameter_mask = 0b1;
    vs
}

pub fn object_shader(base_hash: u64) -> ShaderProgram {
    let mut vs = vertex_shader(base_hash);
    vs.body = OS_BODY.to_owned();
    vs.uses_geometry_shader = true;
    vs
}

pub fn geometry_shader(base_hash: u64) -> ShaderProgram {
    ShaderProgram::new(ShaderStage::Geometry, base_hash, 0, GS_BODY)
}

pub fn pixel_shader(base_hash: u64, aux_hash: u64) -> ShaderProgram {
    let mut ps = ShaderProgram::new(ShaderStage::Pixel, base_hash, aux_hash, FS_BODY);
    ps.color_output_mask = 0b1;
    ps
}

pub struct Draw {
    pub regs: ContextRegisters,
    pub fetch: FetchShaderDescriptor,
    pub fb: FramebufferState,
    pub ps_inputs: PixelInputTable,
    pub host_index_type: HostIndexType,
}

impl Draw {
    pub fn new() -> Self {
        let mut regs = ContextRegisters::new()
            .with(addr::VGT_PRIMITIVE_TYPE, 0x04)
            .with(addr::SPI_VS_OUT_ID_0, 0x01)
            .with(addr::CB_TARGET_MASK, 0xF);
        regs.set_vertex_buffer_stride(0, 32);
        Self {
            regs,
            fetch: FetchShaderDescriptor::new(vec![BufferGroup {
                buffer_index: 0,
                attributes: vec![
                    FetchAttribute::per_vertex(0, 0, VertexDataFormat::Fmt32_32_32_32Float),
                    FetchAttribute::per_vertex(1, 16, VertexDataFormat::Fmt32_32_32_32),
                ],
            }]),
            fb: FramebufferState::new().with_color(0, HostPixelFormat::Rgba8Unorm),
            ps_inputs: PixelInputTable::new(vec![PixelImport::smooth(0x01)]),
            host_index_type: HostIndexType::None,
        }
    }

    pub fn ctx(&self) -> DrawContext<'_> {
        DrawContext {
            registers: &self.regs,
            fetch: &self.fetch,
            framebuffer: &self.fb,
            ps_inputs: &self.ps_inputs,
            host_index_type: self.host_index_type,
        }
    }
}
