//! Vertex fetch for the two vertex-stage flavours.
//!
//! A regular vertex stage uses fixed-function vertex input described by [`VertexInputLayout`].
//! Stages that run as compute (the object stage of a mesh pipeline) have no vertex input, so
//! [`emit_vertex_pulling`] generates WGSL that reads the raw vertex buffers from storage bindings
//! instead.

use crate::fetch::{FetchShaderDescriptor, HostIndexType, VertexElementFormat, VertexFetchType};
use crate::header::{BIND_GROUP_INTERNAL, INDEX_BUFFER_BINDING, VERTEX_BUFFER_BINDING_BASE};
use crate::regs::ContextRegisters;
use crate::shader::{ShaderProgram, MAX_ATTRIBUTE_LOCATIONS};

/// Stride of `buffer_index` as the host binds it: 4-byte aligned and never zero.
pub fn aligned_buffer_stride(regs: &ContextRegisters, buffer_index: u32) -> u32 {
    let raw = regs.vertex_buffer_stride(buffer_index);
    if raw == 0 {
        tracing::warn!(buffer_index, "vertex buffer stride is zero, using 4 bytes");
        return 4;
    }
    (raw + 3) & !3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub format: VertexElementFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    /// Hardware vertex buffer this layout describes.
    pub buffer_index: u32,
    pub stride: u32,
    pub step: VertexFetchType,
    /// Instance step rate; only meaningful for [`VertexFetchType::PerInstance`].
    pub divisor: u32,
    pub attributes: Vec<VertexAttribute>,
}

/// Fixed-function vertex input state. Host vertex buffer slot `n` is `buffers[n]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexInputLayout {
    pub buffers: Vec<VertexBufferLayout>,
}

impl VertexInputLayout {
    /// Builds the input layout for `vertex_shader` reading through `fetch`.
    ///
    /// Attributes the shader does not read are left out; every buffer group keeps its slot.
    pub fn build(
        fetch: &FetchShaderDescriptor,
        vertex_shader: &ShaderProgram,
        regs: &ContextRegisters,
    ) -> Self {
        let mut seen_locations = 0u32;
        let mut buffers = Vec::with_capacity(fetch.groups.len());
        for group in &fetch.groups {
            let mut attributes = Vec::new();
            for attr in &group.attributes {
                let Some(location) = vertex_shader.attribute_location(attr.semantic_id as usize)
                else {
                    continue;
                };
                if location >= MAX_ATTRIBUTE_LOCATIONS as u32 {
                    debug_assert!(false, "attribute location {location} out of range");
                    tracing::error!(location, "vertex attribute location out of range");
                    continue;
                }
                if seen_locations & (1 << location) != 0 {
                    tracing::warn!(
                        semantic = attr.semantic_id,
                        location,
                        "vertex attribute location fetched twice, keeping the first"
                    );
                    continue;
                }
                seen_locations |= 1 << location;
                attributes.push(VertexAttribute {
                    location,
                    offset: attr.offset,
                    format: attr.format.element_format(),
                });
            }

            let divisor = group
                .attributes
                .first()
                .map(|attr| attr.divisor.max(1))
                .unwrap_or(1);
            buffers.push(VertexBufferLayout {
                buffer_index: group.buffer_index,
                stride: aligned_buffer_stride(regs, group.buffer_index),
                step: group.fetch_type(),
                divisor,
                attributes,
            });
        }
        Self { buffers }
    }

    /// Host slot the caller must bind hardware buffer `buffer_index` to.
    pub fn host_slot(&self, buffer_index: u32) -> Option<u32> {
        self.buffers
            .iter()
            .position(|b| b.buffer_index == buffer_index)
            .map(|slot| slot as u32)
    }
}

fn loader_name(format: VertexElementFormat) -> &'static str {
    match format {
        VertexElementFormat::Uint8 => "load_attr_u8",
        VertexElementFormat::Uint8x2 => "load_attr_u8x2",
        VertexElementFormat::Uint8x4 => "load_attr_u8x4",
        VertexElementFormat::Uint16 => "load_attr_u16",
        VertexElementFormat::Uint16x2 => "load_attr_u16x2",
        VertexElementFormat::Uint16x4 => "load_attr_u16x4",
        VertexElementFormat::Uint32 => "load_attr_u32",
        VertexElementFormat::Uint32x2 => "load_attr_u32x2",
        VertexElementFormat::Uint32x3 => "load_attr_u32x3",
        VertexElementFormat::Uint32x4 => "load_attr_u32x4",
    }
}

/// Emits storage bindings, typed loaders and `latte_fetch_vertex(vertex_id, instance_id) ->
/// VertexIn` for `vertex_shader`.
///
/// Buffer groups without a read attribute get no binding. Every loader returns the raw component
/// bits in a `vec4<u32>`; components the format lacks read as zero.
pub fn emit_vertex_pulling(
    fetch: &FetchShaderDescriptor,
    vertex_shader: &ShaderProgram,
    regs: &ContextRegisters,
    index_type: HostIndexType,
) -> String {
    let active: Vec<_> = fetch
        .groups
        .iter()
        .filter(|group| {
            group
                .attributes
                .iter()
                .any(|attr| vertex_shader.attribute_location(attr.semantic_id as usize).is_some())
        })
        .collect();

    let mut s = String::new();
    s.push_str("// ---- vertex pulling (generated) ----\n");

    if index_type != HostIndexType::None {
        s.push_str(&format!(
            "@group({BIND_GROUP_INTERNAL}) @binding({INDEX_BUFFER_BINDING}) var<storage, read> latte_vp_index_buffer: array<u32>;\n"
        ));
    }
    for group in &active {
        let n = group.buffer_index;
        s.push_str(&format!(
            "@group({BIND_GROUP_INTERNAL}) @binding({}) var<storage, read> latte_vp_vb{n}: array<u32>;\n",
            VERTEX_BUFFER_BINDING_BASE + n
        ));
        s.push_str(&format!(
            "const LATTE_VP_STRIDE{n}: u32 = {}u;\n",
            aligned_buffer_stride(regs, n)
        ));
    }
    s.push('\n');

    // Raw u32 loads at arbitrary byte addresses.
    s.push_str("fn latte_vp_load_u32(slot: u32, addr_bytes: u32) -> u32 {\n");
    s.push_str("  let word_index: u32 = addr_bytes >> 2u;\n");
    s.push_str("  let shift: u32 = (addr_bytes & 3u) * 8u;\n");
    s.push_str("  switch slot {\n");
    for group in &active {
        let n = group.buffer_index;
        s.push_str(&format!("    case {n}u: {{\n"));
        s.push_str(&format!(
            "      let word_count: u32 = arrayLength(&latte_vp_vb{n});\n"
        ));
        s.push_str("      if (word_index >= word_count) { return 0u; }\n");
        s.push_str(&format!("      let lo: u32 = latte_vp_vb{n}[word_index];\n"));
        s.push_str("      if (shift == 0u) { return lo; }\n");
        s.push_str(&format!(
            "      let hi: u32 = select(0u, latte_vp_vb{n}[word_index + 1u], (word_index + 1u) < word_count);\n"
        ));
        s.push_str("      return (lo >> shift) | (hi << (32u - shift));\n");
        s.push_str("    }\n");
    }
    s.push_str("    default: { return 0u; }\n");
    s.push_str("  }\n");
    s.push_str("}\n\n");

    // Typed loads, all widened to vec4<u32>.
    s.push_str(
        "fn load_attr_u8(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w = latte_vp_load_u32(slot, addr_bytes);\n  return vec4<u32>(w & 0xFFu, 0u, 0u, 0u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u8x2(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w = latte_vp_load_u32(slot, addr_bytes);\n  return vec4<u32>(w & 0xFFu, (w >> 8u) & 0xFFu, 0u, 0u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u8x4(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w = latte_vp_load_u32(slot, addr_bytes);\n  return vec4<u32>(w & 0xFFu, (w >> 8u) & 0xFFu, (w >> 16u) & 0xFFu, w >> 24u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u16(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w = latte_vp_load_u32(slot, addr_bytes);\n  return vec4<u32>(w & 0xFFFFu, 0u, 0u, 0u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u16x2(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w = latte_vp_load_u32(slot, addr_bytes);\n  return vec4<u32>(w & 0xFFFFu, w >> 16u, 0u, 0u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u16x4(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w0 = latte_vp_load_u32(slot, addr_bytes);\n  let w1 = latte_vp_load_u32(slot, addr_bytes + 4u);\n  return vec4<u32>(w0 & 0xFFFFu, w0 >> 16u, w1 & 0xFFFFu, w1 >> 16u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u32(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  return vec4<u32>(latte_vp_load_u32(slot, addr_bytes), 0u, 0u, 0u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u32x2(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w0 = latte_vp_load_u32(slot, addr_bytes);\n  let w1 = latte_vp_load_u32(slot, addr_bytes + 4u);\n  return vec4<u32>(w0, w1, 0u, 0u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u32x3(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w0 = latte_vp_load_u32(slot, addr_bytes);\n  let w1 = latte_vp_load_u32(slot, addr_bytes + 4u);\n  let w2 = latte_vp_load_u32(slot, addr_bytes + 8u);\n  return vec4<u32>(w0, w1, w2, 0u);\n}\n\n",
    );
    s.push_str(
        "fn load_attr_u32x4(slot: u32, addr_bytes: u32) -> vec4<u32> {\n  let w0 = latte_vp_load_u32(slot, addr_bytes);\n  let w1 = latte_vp_load_u32(slot, addr_bytes + 4u);\n  let w2 = latte_vp_load_u32(slot, addr_bytes + 8u);\n  let w3 = latte_vp_load_u32(slot, addr_bytes + 12u);\n  return vec4<u32>(w0, w1, w2, w3);\n}\n\n",
    );

    // Index remapping.
    s.push_str("fn latte_vp_vertex_index(vertex_id: u32) -> u32 {\n");
    match index_type {
        HostIndexType::None => s.push_str("  return vertex_id;\n"),
        HostIndexType::U16 => {
            s.push_str("  let w: u32 = latte_vp_index_buffer[vertex_id >> 1u];\n");
            s.push_str("  return select(w & 0xFFFFu, w >> 16u, (vertex_id & 1u) == 1u);\n");
        }
        HostIndexType::U32 => s.push_str("  return latte_vp_index_buffer[vertex_id];\n"),
    }
    s.push_str("}\n\n");

    s.push_str("fn latte_fetch_vertex(vertex_id: u32, instance_id: u32) -> VertexIn {\n");
    s.push_str("  var fetched: VertexIn;\n");
    s.push_str("  let vid: u32 = latte_vp_vertex_index(vertex_id);\n");
    s.push_str("  fetched.vertex_id = vid;\n");
    s.push_str("  fetched.instance_id = instance_id;\n");
    for group in &active {
        let n = group.buffer_index;
        for attr in &group.attributes {
            let semantic = attr.semantic_id as usize;
            if vertex_shader.attribute_location(semantic).is_none() {
                continue;
            }
            let element = match attr.fetch_type {
                VertexFetchType::PerVertex => "vid".to_owned(),
                VertexFetchType::PerInstance => {
                    format!("(instance_id / {}u)", attr.divisor.max(1))
                }
            };
            s.push_str(&format!(
                "  fetched.attr_data_sem{semantic} = {}({n}u, {element} * LATTE_VP_STRIDE{n} + {}u);\n",
                loader_name(attr.format.element_format()),
                attr.offset
            ));
        }
    }
    s.push_str("  return fetched;\n");
    s.push_str("}\n");
    s
}
