//! `latte-pipeline` turns analyzed Latte (GX2) shaders into per-draw WGSL variants and caches the
//! resulting pipelines.
//!
//! Currently this crate provides:
//! - Uniform-block planning and WGSL interface declarations for decompiled shaders (see
//!   [`layout::plan_uniform_layout`] and [`header::emit_header`]).
//! - Per-draw variant assembly, including compute-style vertex pulling for stages that cannot use
//!   fixed-function vertex input (see [`variant::ShaderVariantCompiler`]).
//! - A stable 64-bit pipeline fingerprint over render-target formats, vertex layout, shader
//!   identities and rasterizer/blend registers (see [`hasher`]).
//! - A pipeline cache with a per-title on-disk binary archive (see [`cache::PipelineStateCache`]).
//!
//! The native toolchain sits behind [`device::NativeDevice`]. [`device::NagaDevice`] is a headless
//! implementation backed by naga; [`device::WgpuDevice`] creates real `wgpu` pipelines.

pub mod cache;
pub mod device;
pub mod fetch;
pub mod framebuffer;
pub mod hasher;
pub mod header;
pub mod layout;
pub mod regs;
pub mod session;
pub mod shader;
pub mod state;
pub mod variant;
pub mod vertex_fetch;

mod error;

pub use cache::{CachedPipeline, PipelineCacheStats, PipelineStateCache, SessionState};
pub use device::{NagaDevice, NativeDevice, WgpuDevice};
pub use error::{ArchiveError, CompileError, PipelineError};
pub use fetch::{BufferGroup, FetchAttribute, FetchShaderDescriptor, HostIndexType, VertexFetchType};
pub use framebuffer::{AttachmentDataType, FramebufferState, HostPixelFormat};
pub use hasher::PipelineKey;
pub use regs::ContextRegisters;
pub use session::{PipelineCacheConfig, SessionContext};
pub use shader::{PixelInputTable, ShaderProgram, ShaderStage, UniformMode};
pub use variant::{DrawContext, ShaderVariantCompiler, StageRole};
