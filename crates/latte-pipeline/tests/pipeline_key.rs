mod common;

use std::collections::HashSet;

use common::{pixel_shader, vertex_shader, Draw};
use latte_pipeline::hasher::{mesh_pipeline_key, render_pipeline_key};
use latte_pipeline::regs::addr;
use latte_pipeline::variant::{ShaderVariantCompiler, StageRole};
use latte_pipeline::{FramebufferState, HostIndexType, HostPixelFormat, PipelineKey};

fn key(draw: &Draw, vs_hash: u64, ps_hash: (u64, u64)) -> PipelineKey {
    render_pipeline_key(
        &draw.fetch,
        Some(&vertex_shader(vs_hash)),
        Some(&pixel_shader(ps_hash.0, ps_hash.1)),
        &draw.fb,
        &draw.regs,
    )
}

#[test]
fn keys_are_deterministic() {
    let a = Draw::new();
    let b = Draw::new();
    assert_eq!(key(&a, 1, (2, 3)), key(&a, 1, (2, 3)));
    assert_eq!(key(&a, 1, (2, 3)), key(&b, 1, (2, 3)));
}

#[test]
fn single_field_perturbations_never_collide() {
    let mut keys = Vec::new();
    let base = Draw::new();
    keys.push(("base", key(&base, 1, (2, 3))));

    keys.push(("vs hash", key(&base, 9, (2, 3))));
    keys.push(("ps base hash", key(&base, 1, (9, 3))));
    keys.push(("ps aux hash", key(&base, 1, (2, 9))));

    let mut blend_enabled = Draw::new();
    blend_enabled.regs.set(addr::CB_COLOR_CONTROL, 0xFF << 8);
    keys.push(("blend enable", key(&blend_enabled, 1, (2, 3))));
    for target in 0..8 {
        let mut draw = Draw::new();
        draw.regs.set(addr::CB_COLOR_CONTROL, 0xFF << 8);
        draw.regs.set(addr::CB_BLEND0_CONTROL + target, 0x0001_0504);
        keys.push(("blend control", key(&draw, 1, (2, 3))));
    }

    for format in [
        HostPixelFormat::Rgba8UnormSrgb,
        HostPixelFormat::Rgba8Uint,
        HostPixelFormat::Rgba16Float,
        HostPixelFormat::R32Float,
    ] {
        let mut draw = Draw::new();
        draw.fb = FramebufferState::new().with_color(0, format);
        keys.push(("attachment format", key(&draw, 1, (2, 3))));
    }

    let mut depth = Draw::new();
    depth.fb = depth.fb.with_depth(HostPixelFormat::Depth32Float);
    keys.push(("depth format", key(&depth, 1, (2, 3))));

    let mut stride = Draw::new();
    stride.regs.set_vertex_buffer_stride(0, 36);
    keys.push(("stride", key(&stride, 1, (2, 3))));

    let mut polygon = Draw::new();
    polygon.regs.set(addr::PA_SU_SC_MODE_CNTL, 0b10);
    keys.push(("polygon control", key(&polygon, 1, (2, 3))));

    let mut kill = Draw::new();
    kill.regs.set(addr::PA_CL_CLIP_CNTL, 1 << 22);
    keys.push(("rasterization kill", key(&kill, 1, (2, 3))));

    let mut streamout = Draw::new();
    streamout.regs.set(addr::VGT_STRMOUT_EN, 1);
    keys.push(("stream-out", key(&streamout, 1, (2, 3))));

    let mut write_mask = Draw::new();
    write_mask.regs.set(addr::CB_TARGET_MASK, 0x7);
    keys.push(("write mask", key(&write_mask, 1, (2, 3))));

    let mut seen = HashSet::new();
    for (what, k) in &keys {
        assert!(seen.insert(*k), "{what} collided with an earlier key ({k})");
    }
}

#[test]
fn disabled_blend_targets_do_not_contribute() {
    let base = Draw::new();
    let mut draw = Draw::new();
    draw.regs.set(addr::CB_BLEND0_CONTROL + 3, 0x0001_0504);
    assert_eq!(key(&base, 1, (2, 3)), key(&draw, 1, (2, 3)));
}

#[test]
fn mesh_keys_fold_in_topology_and_index_type() {
    let draw = Draw::new();
    let base = key(&draw, 1, (2, 3));

    let none = mesh_pipeline_key(base, &draw.regs, HostIndexType::None);
    let u16 = mesh_pipeline_key(base, &draw.regs, HostIndexType::U16);
    assert_ne!(none, base);
    assert_ne!(none, u16);

    let mut strips = Draw::new();
    strips.regs.set(addr::VGT_PRIMITIVE_TYPE, 0x06);
    assert_ne!(
        none,
        mesh_pipeline_key(base, &strips.regs, HostIndexType::None)
    );
    assert_eq!(none, mesh_pipeline_key(base, &draw.regs, HostIndexType::None));
}

#[test]
fn attachment_classification_changes_key_and_fragment_type() {
    let mut int_draw = Draw::new();
    int_draw.fb = FramebufferState::new().with_color(0, HostPixelFormat::Rgba8Sint);
    let mut float_draw = Draw::new();
    float_draw.fb = FramebufferState::new().with_color(0, HostPixelFormat::Rgba8Unorm);

    assert_ne!(key(&int_draw, 1, (2, 3)), key(&float_draw, 1, (2, 3)));

    let ps = pixel_shader(2, 3);
    let int_variant = ShaderVariantCompiler::assemble(&ps, StageRole::Fragment, &int_draw.ctx());
    let float_variant =
        ShaderVariantCompiler::assemble(&ps, StageRole::Fragment, &float_draw.ctx());
    assert!(int_variant.source.contains("alias ColorTarget0Type = vec4<i32>;"));
    assert!(float_variant.source.contains("alias ColorTarget0Type = vec4<f32>;"));
}
