//! Native device creating real `wgpu` pipelines.
//!
//! wgpu has no pipeline binary cache, so archives are unsupported and the pipeline cache runs
//! in-memory only. Mesh pipelines are not available either.

use std::path::Path;

use crate::device::{
    ArchivePolicy, MeshPipelineDesc, NativeDevice, NativeStage, RenderPipelineDesc,
};
use crate::error::{ArchiveError, CompileError, PipelineError};
use crate::fetch::{VertexElementFormat, VertexFetchType};
use crate::framebuffer::HostPixelFormat;
use crate::regs::{PrimitiveMode, TopologyClass};
use crate::state::{BlendFactor, BlendOp, ColorWriteMask, CompareFunction, CullMode};

#[derive(Debug)]
pub struct WgpuFunction {
    module: wgpu::ShaderModule,
    entry_point: String,
    stage: NativeStage,
}

impl WgpuFunction {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn stage(&self) -> NativeStage {
        self.stage
    }
}

/// wgpu exposes no binary archive, so this type has no values.
#[derive(Debug)]
pub enum WgpuArchive {}

pub fn texture_format(format: HostPixelFormat) -> wgpu::TextureFormat {
    use wgpu::TextureFormat as T;
    match format {
        HostPixelFormat::R8Unorm => T::R8Unorm,
        HostPixelFormat::R8Snorm => T::R8Snorm,
        HostPixelFormat::R8Uint => T::R8Uint,
        HostPixelFormat::R8Sint => T::R8Sint,
        HostPixelFormat::Rg8Unorm => T::Rg8Unorm,
        HostPixelFormat::Rg8Snorm => T::Rg8Snorm,
        HostPixelFormat::Rg8Uint => T::Rg8Uint,
        HostPixelFormat::Rg8Sint => T::Rg8Sint,
        HostPixelFormat::Rgba8Unorm => T::Rgba8Unorm,
        HostPixelFormat::Rgba8UnormSrgb => T::Rgba8UnormSrgb,
        HostPixelFormat::Rgba8Snorm => T::Rgba8Snorm,
        HostPixelFormat::Rgba8Uint => T::Rgba8Uint,
        HostPixelFormat::Rgba8Sint => T::Rgba8Sint,
        HostPixelFormat::Bgra8Unorm => T::Bgra8Unorm,
        HostPixelFormat::Bgra8UnormSrgb => T::Bgra8UnormSrgb,
        HostPixelFormat::R16Uint => T::R16Uint,
        HostPixelFormat::R16Sint => T::R16Sint,
        HostPixelFormat::R16Float => T::R16Float,
        HostPixelFormat::Rg16Uint => T::Rg16Uint,
        HostPixelFormat::Rg16Sint => T::Rg16Sint,
        HostPixelFormat::Rg16Float => T::Rg16Float,
        HostPixelFormat::Rgba16Uint => T::Rgba16Uint,
        HostPixelFormat::Rgba16Sint => T::Rgba16Sint,
        HostPixelFormat::Rgba16Float => T::Rgba16Float,
        HostPixelFormat::R32Uint => T::R32Uint,
        HostPixelFormat::R32Sint => T::R32Sint,
        HostPixelFormat::R32Float => T::R32Float,
        HostPixelFormat::Rg32Uint => T::Rg32Uint,
        HostPixelFormat::Rg32Sint => T::Rg32Sint,
        HostPixelFormat::Rg32Float => T::Rg32Float,
        HostPixelFormat::Rgba32Uint => T::Rgba32Uint,
        HostPixelFormat::Rgba32Sint => T::Rgba32Sint,
        HostPixelFormat::Rgba32Float => T::Rgba32Float,
        HostPixelFormat::Rgb10a2Unorm => T::Rgb10a2Unorm,
        HostPixelFormat::Depth16Unorm => T::Depth16Unorm,
        HostPixelFormat::Depth24Plus => T::Depth24Plus,
        HostPixelFormat::Depth24PlusStencil8 => T::Depth24PlusStencil8,
        HostPixelFormat::Depth32Float => T::Depth32Float,
        HostPixelFormat::Depth32FloatStencil8 => T::Depth32FloatStencil8,
    }
}

/// wgpu has no single-component 8/16-bit vertex formats.
pub fn vertex_format(format: VertexElementFormat) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as V;
    Some(match format {
        VertexElementFormat::Uint8 | VertexElementFormat::Uint16 => return None,
        VertexElementFormat::Uint8x2 => V::Uint8x2,
        VertexElementFormat::Uint8x4 => V::Uint8x4,
        VertexElementFormat::Uint16x2 => V::Uint16x2,
        VertexElementFormat::Uint16x4 => V::Uint16x4,
        VertexElementFormat::Uint32 => V::Uint32,
        VertexElementFormat::Uint32x2 => V::Uint32x2,
        VertexElementFormat::Uint32x3 => V::Uint32x3,
        VertexElementFormat::Uint32x4 => V::Uint32x4,
    })
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    use wgpu::BlendFactor as W;
    match factor {
        BlendFactor::Zero => W::Zero,
        BlendFactor::One => W::One,
        BlendFactor::SrcColor => W::Src,
        BlendFactor::OneMinusSrcColor => W::OneMinusSrc,
        BlendFactor::SrcAlpha => W::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => W::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => W::DstAlpha,
        BlendFactor::OneMinusDstAlpha => W::OneMinusDstAlpha,
        BlendFactor::DstColor => W::Dst,
        BlendFactor::OneMinusDstColor => W::OneMinusDst,
        BlendFactor::SrcAlphaSaturated => W::SrcAlphaSaturated,
        // wgpu's blend constant is a color; the alpha variants use the same constant.
        BlendFactor::ConstantColor | BlendFactor::ConstantAlpha => W::Constant,
        BlendFactor::OneMinusConstantColor | BlendFactor::OneMinusConstantAlpha => {
            W::OneMinusConstant
        }
        BlendFactor::Src1Color => W::Src1,
        BlendFactor::OneMinusSrc1Color => W::OneMinusSrc1,
        BlendFactor::Src1Alpha => W::Src1Alpha,
        BlendFactor::OneMinusSrc1Alpha => W::OneMinusSrc1Alpha,
    }
}

fn blend_op(op: BlendOp) -> wgpu::BlendOperation {
    match op {
        BlendOp::Add => wgpu::BlendOperation::Add,
        BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        BlendOp::Min => wgpu::BlendOperation::Min,
        BlendOp::Max => wgpu::BlendOperation::Max,
        BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
    }
}

fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn color_writes(mask: ColorWriteMask) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    if mask.contains(ColorWriteMask::RED) {
        writes |= wgpu::ColorWrites::RED;
    }
    if mask.contains(ColorWriteMask::GREEN) {
        writes |= wgpu::ColorWrites::GREEN;
    }
    if mask.contains(ColorWriteMask::BLUE) {
        writes |= wgpu::ColorWrites::BLUE;
    }
    if mask.contains(ColorWriteMask::ALPHA) {
        writes |= wgpu::ColorWrites::ALPHA;
    }
    writes
}

/// Fans, quads, rects and line loops are expanded into lists before they reach the pipeline.
pub fn primitive_topology(mode: PrimitiveMode) -> wgpu::PrimitiveTopology {
    match mode {
        PrimitiveMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        other => match other.class() {
            TopologyClass::Point => wgpu::PrimitiveTopology::PointList,
            TopologyClass::Line => wgpu::PrimitiveTopology::LineList,
            TopologyClass::Triangle | TopologyClass::Unknown => {
                wgpu::PrimitiveTopology::TriangleList
            }
        },
    }
}

pub struct WgpuDevice {
    device: wgpu::Device,
    pipeline_compiles: u64,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("pipeline_compiles", &self.pipeline_compiles)
            .finish_non_exhaustive()
    }
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            pipeline_compiles: 0,
        }
    }

    /// Creates a device on the first available adapter, without a presentation surface.
    pub async fn new_headless() -> Option<Self> {
        // wgpu's GL backend warns noisily when `XDG_RUNTIME_DIR` is unset or unsafe.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let needs_runtime_dir = match std::env::var("XDG_RUNTIME_DIR") {
                Ok(dir) if !dir.is_empty() => match std::fs::metadata(&dir) {
                    Ok(meta) => !meta.is_dir() || (meta.permissions().mode() & 0o077) != 0,
                    Err(_) => true,
                },
                _ => true,
            };
            if needs_runtime_dir {
                let dir = std::env::temp_dir()
                    .join(format!("latte-wgpu-xdg-runtime-{}", std::process::id()));
                let _ = std::fs::create_dir_all(&dir);
                let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
                std::env::set_var("XDG_RUNTIME_DIR", &dir);
            }
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY | wgpu::Backends::GL,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        let (device, _queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("latte pipeline device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|err| tracing::warn!(%err, "wgpu device request failed"))
            .ok()?;
        Some(Self::new(device))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
}

impl NativeDevice for WgpuDevice {
    type Function = WgpuFunction;
    type Pipeline = wgpu::RenderPipeline;
    type Archive = WgpuArchive;

    fn compile_function(
        &mut self,
        source: &str,
        entry_point: &str,
        stage: NativeStage,
    ) -> Result<WgpuFunction, CompileError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(entry_point),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompileError::new(entry_point, err.to_string(), source));
        }
        Ok(WgpuFunction {
            module,
            entry_point: entry_point.to_owned(),
            stage,
        })
    }

    fn open_archive(&mut self, _path: Option<&Path>) -> Result<WgpuArchive, ArchiveError> {
        Err(ArchiveError::Unsupported)
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc<'_, WgpuFunction>,
        archive: Option<&WgpuArchive>,
        policy: ArchivePolicy,
    ) -> Result<wgpu::RenderPipeline, PipelineError> {
        if let Some(archive) = archive {
            match *archive {}
        }
        if policy == ArchivePolicy::FailOnArchiveMiss {
            return Err(PipelineError::ArchiveMiss);
        }

        let mut attributes = Vec::with_capacity(desc.vertex_layout.buffers.len());
        for buffer in &desc.vertex_layout.buffers {
            if buffer.step == VertexFetchType::PerInstance && buffer.divisor > 1 {
                return Err(PipelineError::Unsupported("instance step rates other than 1"));
            }
            let mut buffer_attributes = Vec::with_capacity(buffer.attributes.len());
            for attr in &buffer.attributes {
                let format = vertex_format(attr.format)
                    .ok_or(PipelineError::Unsupported("single-component 8/16-bit vertex formats"))?;
                buffer_attributes.push(wgpu::VertexAttribute {
                    format,
                    offset: u64::from(attr.offset),
                    shader_location: attr.location,
                });
            }
            attributes.push(buffer_attributes);
        }
        let vertex_buffers: Vec<wgpu::VertexBufferLayout<'_>> = desc
            .vertex_layout
            .buffers
            .iter()
            .zip(&attributes)
            .map(|(buffer, attributes)| wgpu::VertexBufferLayout {
                array_stride: u64::from(buffer.stride),
                step_mode: match buffer.step {
                    VertexFetchType::PerVertex => wgpu::VertexStepMode::Vertex,
                    VertexFetchType::PerInstance => wgpu::VertexStepMode::Instance,
                },
                attributes,
            })
            .collect();

        let target_count = desc
            .output
            .color_targets
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |i| i + 1);
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc.output.color_targets
            [..target_count]
            .iter()
            .map(|target| {
                target.map(|t| wgpu::ColorTargetState {
                    format: texture_format(t.format),
                    blend: t.blend.map(|b| wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: blend_factor(b.color.src),
                            dst_factor: blend_factor(b.color.dst),
                            operation: blend_op(b.color.op),
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: blend_factor(b.alpha.src),
                            dst_factor: blend_factor(b.alpha.dst),
                            operation: blend_op(b.alpha.op),
                        },
                    }),
                    write_mask: color_writes(t.write_mask),
                })
            })
            .collect();

        let depth_test = desc.output.depth_test;
        let depth_stencil = desc.output.depth.map(|depth| wgpu::DepthStencilState {
            format: texture_format(depth.format),
            depth_write_enabled: depth_test.write_enabled,
            depth_compare: compare_function(depth_test.compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let primitive = wgpu::PrimitiveState {
            topology: primitive_topology(desc.raster.primitive),
            strip_index_format: None,
            front_face: if desc.raster.front_face_cw {
                wgpu::FrontFace::Cw
            } else {
                wgpu::FrontFace::Ccw
            },
            cull_mode: match desc.raster.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("latte render pipeline"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &desc.vertex.module,
                    entry_point: &desc.vertex.entry_point,
                    compilation_options: Default::default(),
                    buffers: &vertex_buffers,
                },
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &desc.fragment.module,
                    entry_point: &desc.fragment.entry_point,
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(PipelineError::Native(err.to_string()));
        }
        self.pipeline_compiles += 1;
        Ok(pipeline)
    }

    fn add_render_pipeline_functions(
        &mut self,
        archive: &mut WgpuArchive,
        _desc: &RenderPipelineDesc<'_, WgpuFunction>,
    ) -> Result<(), ArchiveError> {
        match *archive {}
    }

    fn create_mesh_pipeline(
        &mut self,
        _desc: &MeshPipelineDesc<'_, WgpuFunction>,
    ) -> Result<wgpu::RenderPipeline, PipelineError> {
        Err(PipelineError::Unsupported("mesh pipelines"))
    }

    fn serialize_archive(
        &mut self,
        archive: &WgpuArchive,
        _path: &Path,
    ) -> Result<(), ArchiveError> {
        match *archive {}
    }

    fn pipeline_compile_count(&self) -> u64 {
        self.pipeline_compiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_host_format_maps_to_the_matching_wgpu_class() {
        for format in [
            HostPixelFormat::Rgba8Uint,
            HostPixelFormat::R32Sint,
            HostPixelFormat::Rgba16Float,
            HostPixelFormat::Bgra8UnormSrgb,
        ] {
            let wgpu_format = texture_format(format);
            assert_eq!(wgpu_format.is_srgb(), format.is_srgb(), "{format:?}");
        }
        assert!(texture_format(HostPixelFormat::Depth24PlusStencil8).has_stencil_aspect());
    }

    #[test]
    fn vertex_formats_without_a_wgpu_equivalent() {
        assert_eq!(vertex_format(VertexElementFormat::Uint8), None);
        assert_eq!(vertex_format(VertexElementFormat::Uint16), None);
        assert_eq!(
            vertex_format(VertexElementFormat::Uint32x3),
            Some(wgpu::VertexFormat::Uint32x3)
        );
    }

    #[test]
    fn expanded_primitives_map_to_lists() {
        assert_eq!(
            primitive_topology(PrimitiveMode::Quads),
            wgpu::PrimitiveTopology::TriangleList
        );
        assert_eq!(
            primitive_topology(PrimitiveMode::LineLoop),
            wgpu::PrimitiveTopology::LineList
        );
        assert_eq!(
            primitive_topology(PrimitiveMode::TriangleStrip),
            wgpu::PrimitiveTopology::TriangleStrip
        );
    }

    #[test]
    fn depth_compare_maps_frag_functions() {
        assert_eq!(
            compare_function(CompareFunction::from_raw(1)),
            wgpu::CompareFunction::Less
        );
        assert_eq!(
            compare_function(CompareFunction::from_raw(6)),
            wgpu::CompareFunction::GreaterEqual
        );
        assert_eq!(
            compare_function(CompareFunction::from_raw(7)),
            wgpu::CompareFunction::Always
        );
    }
}
