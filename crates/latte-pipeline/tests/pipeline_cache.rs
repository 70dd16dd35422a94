mod common;

use std::sync::Arc;

use common::{geometry_shader, object_shader, pixel_shader, skip_or_panic, vertex_shader, Draw};
use latte_pipeline::device::NagaPipelineKind;
use latte_pipeline::regs::addr;
use latte_pipeline::{
    HostIndexType, HostPixelFormat, NagaDevice, NativeDevice, PipelineCacheConfig, PipelineError,
    PipelineStateCache, SessionContext, SessionState, ShaderStage, WgpuDevice,
};
use pretty_assertions::assert_eq;

const TITLE: u64 = 0x0005_0000_1010_2000;

fn naga_cache(root: &std::path::Path) -> PipelineStateCache<NagaDevice> {
    PipelineStateCache::new(
        NagaDevice::new(),
        SessionContext::new(PipelineCacheConfig::new(root)),
    )
}

#[test]
fn identical_draws_hit_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::new();
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));
    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);

    let first = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    let second = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.device().pipeline_compile_count(), 1);
    assert_eq!(cache.compiled_shader_count(), 2);
    assert!(!first.from_archive());
}

#[test]
fn archived_pipelines_skip_native_compilation_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::new();
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));

    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);
    cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert_eq!(cache.device().pipeline_compile_count(), 1);
    cache.close_session();
    assert_eq!(cache.state(), SessionState::Closed);
    drop(cache);

    let archive = dir
        .path()
        .join("shaderCache/precompiled/0005000010102000_wgsl_pipelines.bin");
    assert!(archive.is_file());

    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);
    let pipeline = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(pipeline.from_archive());
    assert_eq!(cache.device().pipeline_compile_count(), 0);
    let stats = cache.stats();
    assert_eq!((stats.archive_hits, stats.archive_misses), (1, 0));

    // A different pipeline in the same session still compiles.
    let other = pixel_shader(7, 3);
    cache.get_or_create_pipeline(&vs, &other, &draw.ctx()).unwrap();
    assert_eq!(cache.device().pipeline_compile_count(), 1);
    assert_eq!(cache.stats().archive_misses, 1);
}

#[test]
fn primitive_type_selects_its_own_pipeline() {
    let mut draw = Draw::new();
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));
    let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());

    let triangles = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    draw.regs.set(addr::VGT_PRIMITIVE_TYPE, 0x01);
    let points = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(!Arc::ptr_eq(&triangles, &points));
    assert_ne!(triangles.digest(), points.digest());
    assert_eq!(cache.device().pipeline_compile_count(), 2);

    // Each matches what a fresh cache builds for the same draw.
    let mut fresh = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());
    let expected = fresh.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert_eq!(points.digest(), expected.digest());

    draw.regs.set(addr::VGT_PRIMITIVE_TYPE, 0x04);
    let again = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(Arc::ptr_eq(&triangles, &again));
    assert_eq!(cache.stats().hits, 1);
}

#[test]
fn depth_test_selects_its_own_pipeline() {
    let mut draw = Draw::new();
    draw.fb = draw.fb.with_depth(HostPixelFormat::Depth32Float);
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));
    let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());

    let untested = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    // Z enabled, writes enabled, LEQUAL.
    draw.regs.set(addr::DB_DEPTH_CONTROL, 0b110 | (3 << 4));
    let tested = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(!Arc::ptr_eq(&untested, &tested));
    assert_ne!(untested.digest(), tested.digest());
    assert_eq!(cache.stats().pipelines, 2);
}

#[test]
fn cached_pipelines_carry_their_uniform_layouts() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::new();
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));

    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);
    let compiled = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    let stages: Vec<ShaderStage> = compiled.uniform_layouts().iter().map(|l| l.stage).collect();
    assert_eq!(stages, vec![ShaderStage::Vertex, ShaderStage::Pixel]);
    assert!(compiled.uniform_layout(ShaderStage::Geometry).is_none());
    let layouts = compiled.uniform_layouts().to_vec();
    drop(compiled);
    cache.close_session();

    // Archive hits report the same layouts as the original build.
    cache.begin_session(TITLE);
    let archived = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(archived.from_archive());
    assert_eq!(archived.uniform_layouts(), &layouts[..]);
}

#[test]
fn unwritable_archive_is_ignored_at_teardown() {
    common::init_tracing();
    // The cache root is a regular file, so the archive directory cannot be created.
    let root = tempfile::NamedTempFile::new().unwrap();
    let draw = Draw::new();
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));

    let mut cache = naga_cache(root.path());
    cache.begin_session(TITLE);
    assert!(cache.stats().archive_available);
    cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    cache.close_session();
    assert_eq!(cache.state(), SessionState::Closed);
    assert!(root.path().is_file());

    // Same through `Drop` with the session still open.
    let mut cache = naga_cache(root.path());
    cache.begin_session(TITLE);
    cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    drop(cache);
    assert!(root.path().is_file());
}

#[test]
fn other_titles_do_not_share_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::new();
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));

    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);
    cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    // Switching titles closes the previous session first.
    cache.begin_session(TITLE + 1);
    let pipeline = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(!pipeline.from_archive());
    assert_eq!(cache.device().pipeline_compile_count(), 2);
}

#[test]
fn corrupt_archive_degrades_to_an_empty_one() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineCacheConfig::new(dir.path());
    let path = config.archive_path(TITLE);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"definitely not an archive").unwrap();

    let draw = Draw::new();
    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);
    assert!(cache.stats().archive_available);
    cache
        .get_or_create_pipeline(&vertex_shader(1), &pixel_shader(2, 3), &draw.ctx())
        .unwrap();
    assert_eq!(cache.device().pipeline_compile_count(), 1);
    cache.close_session();

    // The rewritten archive is readable again.
    let mut device = NagaDevice::new();
    let archive = device.open_archive(Some(&path)).unwrap();
    assert_eq!(archive.len(), 1);
}

#[test]
fn disabled_archive_keeps_the_cache_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineCacheConfig {
        archive_enabled: false,
        ..PipelineCacheConfig::new(dir.path())
    };
    let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::new(config));
    cache.begin_session(TITLE);
    assert!(!cache.stats().archive_available);

    let draw = Draw::new();
    cache
        .get_or_create_pipeline(&vertex_shader(1), &pixel_shader(2, 3), &draw.ctx())
        .unwrap();
    cache.close_session();
    assert!(!dir.path().join("shaderCache").exists());
}

#[test]
fn end_session_resets_the_compiled_shader_counter() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::new();
    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);
    cache
        .get_or_create_pipeline(&vertex_shader(1), &pixel_shader(2, 3), &draw.ctx())
        .unwrap();
    assert_eq!(cache.compiled_shader_count(), 2);

    cache.end_session();
    assert_eq!(cache.compiled_shader_count(), 0);
    assert_eq!(cache.state(), SessionState::Open);
}

#[test]
fn mesh_pipelines_are_keyed_by_index_type() {
    let dir = tempfile::tempdir().unwrap();
    let mut draw = Draw::new();
    draw.host_index_type = HostIndexType::U16;
    let (vs, gs, ps) = (object_shader(1), geometry_shader(4), pixel_shader(2, 3));

    let mut cache = naga_cache(dir.path());
    cache.begin_session(TITLE);
    let first = cache
        .get_or_create_mesh_pipeline(&vs, &gs, &ps, &draw.ctx())
        .unwrap();
    assert_eq!(first.kind(), NagaPipelineKind::Mesh);
    let again = cache
        .get_or_create_mesh_pipeline(&vs, &gs, &ps, &draw.ctx())
        .unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(cache.compiled_shader_count(), 3);
    let stages: Vec<ShaderStage> = first.uniform_layouts().iter().map(|l| l.stage).collect();
    assert_eq!(
        stages,
        vec![ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Pixel]
    );

    draw.host_index_type = HostIndexType::U32;
    let other = cache
        .get_or_create_mesh_pipeline(&vs, &gs, &ps, &draw.ctx())
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(cache.device().pipeline_compile_count(), 2);
}

#[test]
fn link_failures_are_reported_and_not_cached() {
    common::init_tracing();
    let draw = Draw::new();
    let vs = vertex_shader(1);
    // Writes an integer vector to a float attachment.
    let mut ps = pixel_shader(2, 3);
    ps.body = "
@fragment
fn fs_main(input: FragmentIn) -> @location(0) vec4<i32> {
    return vec4<i32>(1);
}
"
    .to_owned();

    let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());
    let err = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap_err();
    assert!(matches!(err, PipelineError::Link(_)), "{err}");
    assert!(cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).is_err());
    assert_eq!(cache.stats().failures, 2);
    assert_eq!(cache.stats().pipelines, 0);
}

#[test]
fn wgpu_cache_runs_without_an_archive() {
    let Some(device) = pollster::block_on(WgpuDevice::new_headless()) else {
        skip_or_panic(module_path!(), "no wgpu adapter available");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let mut cache = PipelineStateCache::new(
        device,
        SessionContext::new(PipelineCacheConfig::new(dir.path())),
    );
    cache.begin_session(TITLE);
    assert_eq!(cache.state(), SessionState::Open);
    assert!(!cache.stats().archive_available);

    let draw = Draw::new();
    let (vs, ps) = (vertex_shader(1), pixel_shader(2, 3));
    let first = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    let second = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.device().pipeline_compile_count(), 1);

    cache.close_session();
    assert!(!dir.path().join("shaderCache").exists());
}
