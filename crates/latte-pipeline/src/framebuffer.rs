//! Render-target configuration of a draw, as borrowed from the render-target cache.

use crate::shader::MAX_COLOR_TARGETS;

/// How a color attachment's texels are interpreted by the shader output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentDataType {
    Float,
    Int,
    Uint,
}

impl AttachmentDataType {
    /// WGSL vector type a fragment shader must write to an attachment of this type.
    pub fn wgsl_vec4(self) -> &'static str {
        match self {
            AttachmentDataType::Float => "vec4<f32>",
            AttachmentDataType::Int => "vec4<i32>",
            AttachmentDataType::Uint => "vec4<u32>",
        }
    }
}

/// Host pixel formats produced by the render-target cache.
///
/// The discriminants are stable: they are folded into pipeline keys, so renumbering invalidates
/// persisted pipeline archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HostPixelFormat {
    R8Unorm = 1,
    R8Snorm = 2,
    R8Uint = 3,
    R8Sint = 4,
    Rg8Unorm = 5,
    Rg8Snorm = 6,
    Rg8Uint = 7,
    Rg8Sint = 8,
    Rgba8Unorm = 9,
    Rgba8UnormSrgb = 10,
    Rgba8Snorm = 11,
    Rgba8Uint = 12,
    Rgba8Sint = 13,
    Bgra8Unorm = 14,
    Bgra8UnormSrgb = 15,
    R16Uint = 16,
    R16Sint = 17,
    R16Float = 18,
    Rg16Uint = 19,
    Rg16Sint = 20,
    Rg16Float = 21,
    Rgba16Uint = 22,
    Rgba16Sint = 23,
    Rgba16Float = 24,
    R32Uint = 25,
    R32Sint = 26,
    R32Float = 27,
    Rg32Uint = 28,
    Rg32Sint = 29,
    Rg32Float = 30,
    Rgba32Uint = 31,
    Rgba32Sint = 32,
    Rgba32Float = 33,
    Rgb10a2Unorm = 34,
    Depth16Unorm = 64,
    Depth24Plus = 65,
    Depth24PlusStencil8 = 66,
    Depth32Float = 67,
    Depth32FloatStencil8 = 68,
}

impl HostPixelFormat {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn data_type(self) -> AttachmentDataType {
        use HostPixelFormat::*;
        match self {
            R8Uint | Rg8Uint | Rgba8Uint | R16Uint | Rg16Uint | Rgba16Uint | R32Uint
            | Rg32Uint | Rgba32Uint => AttachmentDataType::Uint,
            R8Sint | Rg8Sint | Rgba8Sint | R16Sint | Rg16Sint | Rgba16Sint | R32Sint
            | Rg32Sint | Rgba32Sint => AttachmentDataType::Int,
            _ => AttachmentDataType::Float,
        }
    }

    pub fn is_srgb(self) -> bool {
        matches!(
            self,
            HostPixelFormat::Rgba8UnormSrgb | HostPixelFormat::Bgra8UnormSrgb
        )
    }

    pub fn is_depth(self) -> bool {
        self.code() >= HostPixelFormat::Depth16Unorm.code()
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            HostPixelFormat::Depth24PlusStencil8 | HostPixelFormat::Depth32FloatStencil8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorAttachment {
    pub format: HostPixelFormat,
}

impl ColorAttachment {
    pub fn data_type(&self) -> AttachmentDataType {
        self.format.data_type()
    }

    pub fn is_srgb(&self) -> bool {
        self.format.is_srgb()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthAttachment {
    pub format: HostPixelFormat,
    pub has_stencil: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FramebufferState {
    pub color: [Option<ColorAttachment>; MAX_COLOR_TARGETS],
    pub depth: Option<DepthAttachment>,
}

impl FramebufferState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a color attachment. Indices past the last target are ignored.
    pub fn with_color(mut self, index: usize, format: HostPixelFormat) -> Self {
        debug_assert!(!format.is_depth(), "{format:?} bound as a color target");
        if let Some(slot) = self.color.get_mut(index) {
            *slot = Some(ColorAttachment { format });
        }
        self
    }

    pub fn with_depth(mut self, format: HostPixelFormat) -> Self {
        debug_assert!(format.is_depth(), "{format:?} bound as a depth target");
        self.depth = Some(DepthAttachment {
            format,
            has_stencil: format.has_stencil(),
        });
        self
    }

    /// Bound color attachments in ascending slot order.
    pub fn bound_colors(&self) -> impl Iterator<Item = (usize, &ColorAttachment)> {
        self.color
            .iter()
            .enumerate()
            .filter_map(|(i, attachment)| attachment.as_ref().map(|a| (i, a)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_and_flags() {
        assert_eq!(HostPixelFormat::Rgba8Sint.data_type(), AttachmentDataType::Int);
        assert_eq!(HostPixelFormat::R32Uint.data_type(), AttachmentDataType::Uint);
        assert_eq!(HostPixelFormat::Rgba16Float.data_type(), AttachmentDataType::Float);
        assert!(HostPixelFormat::Bgra8UnormSrgb.is_srgb());
        assert!(!HostPixelFormat::Rgba8Unorm.is_srgb());
        assert!(HostPixelFormat::Depth32Float.is_depth());
        assert!(!HostPixelFormat::Rgb10a2Unorm.is_depth());
        assert!(HostPixelFormat::Depth24PlusStencil8.has_stencil());
    }

    #[test]
    fn bound_colors_skip_holes() {
        let fb = FramebufferState::new()
            .with_color(0, HostPixelFormat::Rgba8Unorm)
            .with_color(3, HostPixelFormat::R32Float)
            .with_color(8, HostPixelFormat::R32Float)
            .with_depth(HostPixelFormat::Depth24PlusStencil8);
        let bound: Vec<usize> = fb.bound_colors().map(|(i, _)| i).collect();
        assert_eq!(bound, vec![0, 3]);
        assert_eq!(
            fb.depth,
            Some(DepthAttachment {
                format: HostPixelFormat::Depth24PlusStencil8,
                has_stencil: true
            })
        );
    }
}
