//! Native shader/pipeline toolchain abstraction.
//!
//! The cache drives everything through [`NativeDevice`]: compile a WGSL module for one entry
//! point, link compiled stages into a pipeline, and maintain an opaque binary archive of linked
//! pipelines. The archive's contents belong to the device; callers only open, fill and serialize
//! it.

use std::path::Path;

use crate::error::{ArchiveError, CompileError, PipelineError};
use crate::state::{FragmentOutputState, RasterState};
use crate::vertex_fetch::VertexInputLayout;

pub mod naga_device;
pub mod wgpu_device;

pub use naga_device::{NagaArchive, NagaDevice, NagaFunction, NagaPipeline, NagaPipelineKind};
pub use wgpu_device::{WgpuArchive, WgpuDevice, WgpuFunction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStage {
    Vertex,
    Fragment,
    Compute,
}

/// Pipeline creation behaviour with respect to the binary archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ArchivePolicy {
    /// Use the archive when it has the pipeline, compile otherwise.
    #[default]
    None,
    /// Fail with [`PipelineError::ArchiveMiss`] instead of compiling.
    FailOnArchiveMiss,
}

#[derive(Debug)]
pub struct RenderPipelineDesc<'a, F> {
    pub vertex: &'a F,
    pub fragment: &'a F,
    pub vertex_layout: &'a VertexInputLayout,
    pub output: &'a FragmentOutputState,
    pub raster: RasterState,
}

#[derive(Debug)]
pub struct MeshPipelineDesc<'a, F> {
    pub object: &'a F,
    pub mesh: &'a F,
    pub fragment: &'a F,
    pub output: &'a FragmentOutputState,
    pub raster: RasterState,
}

pub trait NativeDevice {
    type Function;
    type Pipeline;
    type Archive;

    /// Compiles `source` for `entry_point`.
    fn compile_function(
        &mut self,
        source: &str,
        entry_point: &str,
        stage: NativeStage,
    ) -> Result<Self::Function, CompileError>;

    /// Opens the archive stored at `path`, or creates an empty one when `path` is `None`.
    fn open_archive(&mut self, path: Option<&Path>) -> Result<Self::Archive, ArchiveError>;

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc<'_, Self::Function>,
        archive: Option<&Self::Archive>,
        policy: ArchivePolicy,
    ) -> Result<Self::Pipeline, PipelineError>;

    /// Records the pipeline described by `desc` in `archive`.
    fn add_render_pipeline_functions(
        &mut self,
        archive: &mut Self::Archive,
        desc: &RenderPipelineDesc<'_, Self::Function>,
    ) -> Result<(), ArchiveError>;

    fn create_mesh_pipeline(
        &mut self,
        desc: &MeshPipelineDesc<'_, Self::Function>,
    ) -> Result<Self::Pipeline, PipelineError>;

    fn serialize_archive(&mut self, archive: &Self::Archive, path: &Path)
        -> Result<(), ArchiveError>;

    /// Pipelines linked by the native toolchain (archive hits excluded).
    fn pipeline_compile_count(&self) -> u64;
}
