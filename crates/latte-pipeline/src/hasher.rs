//! 64-bit pipeline fingerprints.
//!
//! The field order and the mixing constants below are persisted implicitly: archive entries are
//! looked up by the descriptor a key was built from, so any change here makes every stored
//! pipeline unreachable.

use std::fmt;

use crate::fetch::{FetchShaderDescriptor, HostIndexType};
use crate::framebuffer::FramebufferState;
use crate::regs::ContextRegisters;
use crate::shader::{ShaderProgram, MAX_COLOR_TARGETS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey(pub u64);

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Mixer(u64);

impl Mixer {
    fn add(&mut self, v: u64) {
        self.0 = self.0.wrapping_add(v);
    }

    fn rotate(&mut self, by: u32) {
        self.0 = self.0.rotate_left(by);
    }

    fn add_rotate(&mut self, v: u64) {
        self.add(v);
        self.rotate(7);
    }
}

/// Key of a vertex + pixel pipeline.
pub fn render_pipeline_key(
    fetch: &FetchShaderDescriptor,
    vertex_shader: Option<&ShaderProgram>,
    pixel_shader: Option<&ShaderProgram>,
    framebuffer: &FramebufferState,
    regs: &ContextRegisters,
) -> PipelineKey {
    let mut h = Mixer::default();

    for (i, attachment) in framebuffer.bound_colors() {
        h.add_rotate(u64::from(attachment.format.code()) + i as u64 * 31);
    }
    if let Some(depth) = &framebuffer.depth {
        h.add_rotate(u64::from(depth.format.code()));
    }

    for group in &fetch.groups {
        h.rotate(7);
        h.add(u64::from(regs.vertex_buffer_stride(group.buffer_index)) * 3);
    }
    h.add_rotate(fetch.structural_hash());

    h.add_rotate(u64::from(regs.streamout_enable()));
    if regs.clip_control().dx_rasterization_kill() {
        h.add(0x333333);
    }

    h.0 = (h.0 >> 8).wrapping_add(h.0.wrapping_mul(0x370531) % 0x7F98_0D3B_F9B4_639D);

    if let Some(vs) = vertex_shader {
        h.add(vs.base_hash);
    }
    h.rotate(13);
    if let Some(ps) = pixel_shader {
        h.add(ps.base_hash.wrapping_add(ps.aux_hash));
    }
    h.rotate(13);

    h.add_rotate(u64::from(regs.polygon_control().0));
    h.add_rotate(u64::from(regs.clip_control().0));

    let color_control = regs.color_control();
    h.add(u64::from(color_control.0));
    h.add(u64::from(regs.target_mask().0));
    for target in 0..MAX_COLOR_TARGETS {
        if color_control.blend_enabled(target) {
            h.rotate(7);
            h.add(u64::from(regs.blend_control(target).0));
        }
    }

    PipelineKey(h.0)
}

/// Key of an object + mesh + pixel pipeline: the render key with the primitive type and host
/// index representation folded in.
pub fn mesh_pipeline_key(
    base: PipelineKey,
    regs: &ContextRegisters,
    host_index_type: HostIndexType,
) -> PipelineKey {
    let mut h = Mixer(base.0);
    h.add_rotate(u64::from(regs.primitive_type().0));
    h.add_rotate(host_index_type as u8 as u64);
    PipelineKey(h.0)
}
