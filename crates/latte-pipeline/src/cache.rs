//! Title-scoped pipeline cache.
//!
//! Pipelines are looked up by [`PipelineKey`] together with the primitive mode and depth test,
//! which are baked into the native pipeline but not part of the fingerprint. On a miss the shader variants are compiled for the
//! current draw and the native pipeline is first requested from the title's binary archive; only
//! when the archive does not have it is the pipeline linked for real, after which it is added to
//! the archive. The archive is read when a session begins and written when it closes, never in
//! between.

use std::ops::Deref;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::device::{ArchivePolicy, MeshPipelineDesc, NativeDevice, RenderPipelineDesc};
use crate::error::{ArchiveError, PipelineError};
use crate::hasher::{mesh_pipeline_key, render_pipeline_key, PipelineKey};
use crate::layout::UniformLayout;
use crate::regs::PrimitiveMode;
use crate::session::SessionContext;
use crate::shader::{ShaderProgram, ShaderStage};
use crate::state::{DepthTestState, FragmentOutputState, RasterState};
use crate::variant::{DrawContext, ShaderVariantCompiler, StageRole};
use crate::vertex_fetch::VertexInputLayout;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Open,
    Closed,
}

/// Snapshot of pipeline cache counters, suitable for telemetry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub archive_hits: u64,
    pub archive_misses: u64,
    /// Misses that produced no pipeline (compile or link failure).
    pub failures: u64,
    pub pipelines: u64,
    /// Whether a binary archive backs the current session.
    pub archive_available: bool,
}

/// A cached pipeline and the support-buffer layout of each stage it was linked from.
///
/// Dereferences to the native pipeline.
#[derive(Debug)]
pub struct CachedPipeline<P> {
    pipeline: P,
    uniform_layouts: Vec<UniformLayout>,
}

impl<P> CachedPipeline<P> {
    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Layouts in pipeline stage order.
    pub fn uniform_layouts(&self) -> &[UniformLayout] {
        &self.uniform_layouts
    }

    /// Layout the draw path must follow when filling `stage`'s support buffer.
    pub fn uniform_layout(&self, stage: ShaderStage) -> Option<&UniformLayout> {
        self.uniform_layouts.iter().find(|l| l.stage == stage)
    }
}

impl<P> Deref for CachedPipeline<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.pipeline
    }
}

/// Map index: the fingerprint plus the pipeline state it leaves out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineSlot {
    key: PipelineKey,
    primitive: PrimitiveMode,
    depth_test: DepthTestState,
}

impl PipelineSlot {
    fn new(key: PipelineKey, draw: &DrawContext<'_>) -> Self {
        Self {
            key,
            primitive: draw.registers.primitive_type().mode(),
            depth_test: DepthTestState::from_registers(draw.framebuffer, draw.registers),
        }
    }
}

pub struct PipelineStateCache<D: NativeDevice> {
    device: D,
    session: SessionContext,
    state: SessionState,
    archive: Option<D::Archive>,
    pipelines: HashMap<PipelineSlot, Arc<CachedPipeline<D::Pipeline>>>,
    stats: PipelineCacheStats,
}

impl<D: NativeDevice> PipelineStateCache<D> {
    pub fn new(device: D, session: SessionContext) -> Self {
        Self {
            device,
            session,
            state: SessionState::Uninitialized,
            archive: None,
            pipelines: HashMap::new(),
            stats: PipelineCacheStats::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Shader variants compiled since the session's counters were last reset.
    pub fn compiled_shader_count(&self) -> u64 {
        self.session.compiled_shader_count()
    }

    pub fn stats(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            pipelines: self.pipelines.len() as u64,
            archive_available: self.archive.is_some(),
            ..self.stats
        }
    }

    /// Starts a session for `title_id`, loading its binary archive.
    ///
    /// An archive that cannot be read is replaced by an empty one; a device without archive
    /// support runs the session in memory only. Neither is an error.
    pub fn begin_session(&mut self, title_id: u64) {
        if self.state == SessionState::Open {
            self.close_session();
        }
        self.session.set_title_id(Some(title_id));
        self.archive = self.open_archive();
        self.state = SessionState::Open;
        tracing::info!(
            title_id = %format_args!("{title_id:016x}"),
            archive = self.archive.is_some(),
            "pipeline cache session opened"
        );
    }

    fn open_archive(&mut self) -> Option<D::Archive> {
        let path = self.session.archive_path()?;
        match self.device.open_archive(Some(&path)) {
            Ok(archive) => return Some(archive),
            Err(ArchiveError::NotFound(_)) => {
                tracing::debug!(path = %path.display(), "no pipeline archive yet");
            }
            Err(ArchiveError::Unsupported) => {
                tracing::info!("device has no binary archive support, caching in memory only");
                return None;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to load pipeline archive, starting empty");
            }
        }
        match self.device.open_archive(None) {
            Ok(archive) => Some(archive),
            Err(err) => {
                tracing::warn!(%err, "failed to create pipeline archive, caching in memory only");
                None
            }
        }
    }

    /// Resets the session-scoped counters.
    pub fn end_session(&mut self) {
        self.session.reset_counters();
    }

    /// Writes the archive (best effort) and releases every cached pipeline.
    pub fn close_session(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        if let (Some(archive), Some(path)) = (self.archive.take(), self.session.archive_path()) {
            match self.device.serialize_archive(&archive, &path) {
                Ok(()) => tracing::debug!(path = %path.display(), "pipeline archive written"),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "failed to write pipeline archive")
                }
            }
        }
        self.pipelines.clear();
        self.session.set_title_id(None);
        self.state = SessionState::Closed;
    }

    /// Returns the vertex + fragment pipeline for the current draw, building it on a miss.
    ///
    /// Failures are not cached; the next draw with the same key tries again.
    pub fn get_or_create_pipeline(
        &mut self,
        vertex_shader: &ShaderProgram,
        pixel_shader: &ShaderProgram,
        draw: &DrawContext<'_>,
    ) -> Result<Arc<CachedPipeline<D::Pipeline>>, PipelineError> {
        let key = render_pipeline_key(
            draw.fetch,
            Some(vertex_shader),
            Some(pixel_shader),
            draw.framebuffer,
            draw.registers,
        );
        let slot = PipelineSlot::new(key, draw);
        if let Some(pipeline) = self.pipelines.get(&slot) {
            self.stats.hits += 1;
            return Ok(Arc::clone(pipeline));
        }
        self.stats.misses += 1;

        let built = self.build_render_pipeline(key, vertex_shader, pixel_shader, draw);
        self.insert(slot, built)
    }

    /// Returns the object + mesh + fragment pipeline for the current draw.
    ///
    /// The key extends the render key with the primitive type and host index type. Mesh
    /// pipelines never go through the binary archive.
    pub fn get_or_create_mesh_pipeline(
        &mut self,
        vertex_shader: &ShaderProgram,
        geometry_shader: &ShaderProgram,
        pixel_shader: &ShaderProgram,
        draw: &DrawContext<'_>,
    ) -> Result<Arc<CachedPipeline<D::Pipeline>>, PipelineError> {
        let base = render_pipeline_key(
            draw.fetch,
            Some(vertex_shader),
            Some(pixel_shader),
            draw.framebuffer,
            draw.registers,
        );
        let key = mesh_pipeline_key(base, draw.registers, draw.host_index_type);
        let slot = PipelineSlot::new(key, draw);
        if let Some(pipeline) = self.pipelines.get(&slot) {
            self.stats.hits += 1;
            return Ok(Arc::clone(pipeline));
        }
        self.stats.misses += 1;

        let built = self.build_mesh_pipeline(vertex_shader, geometry_shader, pixel_shader, draw);
        self.insert(slot, built)
    }

    fn insert(
        &mut self,
        slot: PipelineSlot,
        built: Result<CachedPipeline<D::Pipeline>, PipelineError>,
    ) -> Result<Arc<CachedPipeline<D::Pipeline>>, PipelineError> {
        match built {
            Ok(pipeline) => {
                let pipeline = Arc::new(pipeline);
                self.pipelines.insert(slot, Arc::clone(&pipeline));
                Ok(pipeline)
            }
            Err(err) => {
                self.stats.failures += 1;
                tracing::warn!(key = %slot.key, %err, "pipeline unavailable, draw skipped");
                Err(err)
            }
        }
    }

    fn build_render_pipeline(
        &mut self,
        key: PipelineKey,
        vertex_shader: &ShaderProgram,
        pixel_shader: &ShaderProgram,
        draw: &DrawContext<'_>,
    ) -> Result<CachedPipeline<D::Pipeline>, PipelineError> {
        let vertex_layout = VertexInputLayout::build(draw.fetch, vertex_shader, draw.registers);
        let vertex = ShaderVariantCompiler::compile(
            &mut self.device,
            &self.session,
            vertex_shader,
            StageRole::Vertex,
            draw,
        )?;
        let fragment = ShaderVariantCompiler::compile(
            &mut self.device,
            &self.session,
            pixel_shader,
            StageRole::Fragment,
            draw,
        )?;
        let output = FragmentOutputState::from_registers(draw.framebuffer, draw.registers);
        let desc = RenderPipelineDesc {
            vertex: &vertex.function,
            fragment: &fragment.function,
            vertex_layout: &vertex_layout,
            output: &output,
            raster: RasterState::from_registers(draw.registers),
        };
        // Archive hits skip native linking only; the variants are always compiled, so their
        // layouts are known either way.
        let uniform_layouts = vec![vertex.uniform_layout.clone(), fragment.uniform_layout.clone()];

        if let Some(archive) = &self.archive {
            match self.device.create_render_pipeline(
                &desc,
                Some(archive),
                ArchivePolicy::FailOnArchiveMiss,
            ) {
                Ok(pipeline) => {
                    self.stats.archive_hits += 1;
                    tracing::debug!(%key, "pipeline loaded from archive");
                    return Ok(CachedPipeline {
                        pipeline,
                        uniform_layouts,
                    });
                }
                Err(PipelineError::ArchiveMiss) => self.stats.archive_misses += 1,
                Err(err) => tracing::debug!(%key, %err, "archive lookup failed"),
            }
        }

        let pipeline = self
            .device
            .create_render_pipeline(&desc, None, ArchivePolicy::None)?;
        tracing::debug!(%key, "pipeline compiled");
        if let Some(archive) = self.archive.as_mut() {
            if let Err(err) = self.device.add_render_pipeline_functions(archive, &desc) {
                tracing::warn!(%key, %err, "failed to add pipeline to archive");
            }
        }
        Ok(CachedPipeline {
            pipeline,
            uniform_layouts,
        })
    }

    fn build_mesh_pipeline(
        &mut self,
        vertex_shader: &ShaderProgram,
        geometry_shader: &ShaderProgram,
        pixel_shader: &ShaderProgram,
        draw: &DrawContext<'_>,
    ) -> Result<CachedPipeline<D::Pipeline>, PipelineError> {
        let object = ShaderVariantCompiler::compile(
            &mut self.device,
            &self.session,
            vertex_shader,
            StageRole::Object,
            draw,
        )?;
        let mesh = ShaderVariantCompiler::compile(
            &mut self.device,
            &self.session,
            geometry_shader,
            StageRole::Mesh,
            draw,
        )?;
        let fragment = ShaderVariantCompiler::compile(
            &mut self.device,
            &self.session,
            pixel_shader,
            StageRole::Fragment,
            draw,
        )?;
        let output = FragmentOutputState::from_registers(draw.framebuffer, draw.registers);
        let pipeline = self.device.create_mesh_pipeline(&MeshPipelineDesc {
            object: &object.function,
            mesh: &mesh.function,
            fragment: &fragment.function,
            output: &output,
            raster: RasterState::from_registers(draw.registers),
        })?;
        Ok(CachedPipeline {
            pipeline,
            uniform_layouts: vec![
                object.uniform_layout,
                mesh.uniform_layout,
                fragment.uniform_layout,
            ],
        })
    }
}

impl<D: NativeDevice> Drop for PipelineStateCache<D> {
    fn drop(&mut self) {
        self.close_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NagaDevice;
    use crate::fetch::{BufferGroup, FetchAttribute, FetchShaderDescriptor, HostIndexType, VertexDataFormat};
    use crate::framebuffer::{FramebufferState, HostPixelFormat};
    use crate::regs::{addr, ContextRegisters};
    use crate::shader::{PixelImport, PixelInputTable, ShaderStage, SlotTable};

    const VS_BODY: &str = "
@vertex
fn vs_main(input: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.position = bitcast<vec4<f32>>(input.attr_data_sem0);
    out.param_sem1 = vec4<f32>(1.0);
    return out;
}
";

    const FS_BODY: &str = "
@fragment
fn fs_main(input: FragmentIn) -> FragmentOut {
    var out: FragmentOut;
    return out;
}
";

    fn shaders() -> (ShaderProgram, ShaderProgram) {
        let mut vs = ShaderProgram::new(ShaderStage::Vertex, 0xA1, 0, VS_BODY);
        vs.resource_mapping.attributes = SlotTable::default().with(0, 0);
        vs.analysis.input_attribute_mask = 0b1;
        vs.output_parameter_mask = 0b1;
        let mut ps = ShaderProgram::new(ShaderStage::Pixel, 0xB2, 0, FS_BODY);
        ps.color_output_mask = 0b1;
        (vs, ps)
    }

    struct Draw {
        regs: ContextRegisters,
        fetch: FetchShaderDescriptor,
        fb: FramebufferState,
        ps_inputs: PixelInputTable,
    }

    impl Draw {
        fn new() -> Self {
            Self {
                regs: ContextRegisters::new()
                    .with(addr::VGT_PRIMITIVE_TYPE, 0x04)
                    .with(addr::SPI_VS_OUT_ID_0, 0x01)
                    .with(addr::CB_TARGET_MASK, 0xF),
                fetch: FetchShaderDescriptor::new(vec![BufferGroup {
                    buffer_index: 0,
                    attributes: vec![FetchAttribute::per_vertex(
                        0,
                        0,
                        VertexDataFormat::Fmt32_32_32_32Float,
                    )],
                }]),
                fb: FramebufferState::new().with_color(0, HostPixelFormat::Rgba8Unorm),
                ps_inputs: PixelInputTable::new(vec![PixelImport::smooth(0x01)]),
            }
        }

        fn ctx(&self) -> DrawContext<'_> {
            DrawContext {
                registers: &self.regs,
                fetch: &self.fetch,
                framebuffer: &self.fb,
                ps_inputs: &self.ps_inputs,
                host_index_type: HostIndexType::None,
            }
        }
    }

    #[test]
    fn session_state_transitions() {
        let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());
        assert_eq!(cache.state(), SessionState::Uninitialized);
        // Closing before a session exists does nothing.
        cache.close_session();
        assert_eq!(cache.state(), SessionState::Uninitialized);

        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineStateCache::new(
            NagaDevice::new(),
            SessionContext::new(crate::session::PipelineCacheConfig::new(dir.path())),
        );
        cache.begin_session(0x42);
        assert_eq!(cache.state(), SessionState::Open);
        assert_eq!(cache.session().title_id(), Some(0x42));
        assert!(cache.stats().archive_available);
        cache.close_session();
        assert_eq!(cache.state(), SessionState::Closed);
        assert_eq!(cache.session().title_id(), None);
        assert!(dir
            .path()
            .join("shaderCache/precompiled/0000000000000042_wgsl_pipelines.bin")
            .is_file());
    }

    #[test]
    fn repeated_lookups_share_one_pipeline() {
        let draw = Draw::new();
        let (vs, ps) = shaders();
        let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());

        let first = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
        let second = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.device().pipeline_compile_count(), 1);
        assert_eq!(cache.compiled_shader_count(), 2);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.pipelines), (1, 1, 1));
        assert!(!stats.archive_available);
    }

    #[test]
    fn failed_builds_are_retried() {
        let draw = Draw::new();
        let (mut vs, ps) = shaders();
        vs.body = "@vertex fn vs_main() {".to_owned();
        let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());

        let err = cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap_err();
        assert!(matches!(err, PipelineError::Compile(_)));
        assert!(cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).is_err());

        // Only the vertex variant is attempted before the build bails out.
        assert_eq!(cache.compiled_shader_count(), 2);
        let stats = cache.stats();
        assert_eq!((stats.misses, stats.failures, stats.pipelines), (2, 2, 0));
    }

    #[test]
    fn end_session_resets_the_shader_counter_only() {
        let draw = Draw::new();
        let (vs, ps) = shaders();
        let mut cache = PipelineStateCache::new(NagaDevice::new(), SessionContext::default());
        cache.get_or_create_pipeline(&vs, &ps, &draw.ctx()).unwrap();

        cache.end_session();
        assert_eq!(cache.compiled_shader_count(), 0);
        assert_eq!(cache.stats().pipelines, 1);
    }
}
