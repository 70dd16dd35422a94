//! Backend-neutral fixed-function state derived from Latte registers.

use crate::framebuffer::{AttachmentDataType, DepthAttachment, FramebufferState, HostPixelFormat};
use crate::regs::{CbBlendControl, ContextRegisters, DbDepthControl, PrimitiveMode};
use crate::shader::MAX_COLOR_TARGETS;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

/// Latte `BLEND_*` factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    DstColor,
    OneMinusDstColor,
    SrcAlphaSaturated,
    ConstantColor,
    OneMinusConstantColor,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
    ConstantAlpha,
    OneMinusConstantAlpha,
}

impl BlendFactor {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Zero,
            1 => Self::One,
            2 => Self::SrcColor,
            3 => Self::OneMinusSrcColor,
            4 => Self::SrcAlpha,
            5 => Self::OneMinusSrcAlpha,
            6 => Self::DstAlpha,
            7 => Self::OneMinusDstAlpha,
            8 => Self::DstColor,
            9 => Self::OneMinusDstColor,
            10 => Self::SrcAlphaSaturated,
            13 => Self::ConstantColor,
            14 => Self::OneMinusConstantColor,
            15 => Self::Src1Color,
            16 => Self::OneMinusSrc1Color,
            17 => Self::Src1Alpha,
            18 => Self::OneMinusSrc1Alpha,
            19 => Self::ConstantAlpha,
            20 => Self::OneMinusConstantAlpha,
            _ => return None,
        })
    }
}

/// Latte `COMB_*` functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    Min,
    Max,
    ReverseSubtract,
}

impl BlendOp {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Add,
            1 => Self::Subtract,
            2 => Self::Min,
            3 => Self::Max,
            4 => Self::ReverseSubtract,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

fn factor(raw: u32, target: usize) -> BlendFactor {
    BlendFactor::from_raw(raw).unwrap_or_else(|| {
        tracing::warn!(target, raw, "unknown blend factor, using ONE");
        BlendFactor::One
    })
}

fn op(raw: u32, target: usize) -> BlendOp {
    BlendOp::from_raw(raw).unwrap_or_else(|| {
        tracing::warn!(target, raw, "unknown blend function, using ADD");
        BlendOp::Add
    })
}

impl BlendState {
    pub fn from_register(control: CbBlendControl, target: usize) -> Self {
        let color = BlendComponent {
            src: factor(control.color_src(), target),
            dst: factor(control.color_dst(), target),
            op: op(control.color_op(), target),
        };
        let alpha = if control.separate_alpha() {
            BlendComponent {
                src: factor(control.alpha_src(), target),
                dst: factor(control.alpha_dst(), target),
                op: op(control.alpha_op(), target),
            }
        } else {
            color
        };
        Self { color, alpha }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetState {
    pub format: HostPixelFormat,
    pub write_mask: ColorWriteMask,
    pub blend: Option<BlendState>,
}

/// Latte `FRAG_*` compare functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 0x7 {
            0 => Self::Never,
            1 => Self::Less,
            2 => Self::Equal,
            3 => Self::LessEqual,
            4 => Self::Greater,
            5 => Self::NotEqual,
            6 => Self::GreaterEqual,
            _ => Self::Always,
        }
    }
}

/// Depth test baked into a pipeline. Stencil state is not carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthTestState {
    pub compare: CompareFunction,
    pub write_enabled: bool,
}

impl Default for DepthTestState {
    fn default() -> Self {
        Self::DISABLED
    }
}

impl DepthTestState {
    pub const DISABLED: Self = Self {
        compare: CompareFunction::Always,
        write_enabled: false,
    };

    /// Depth test for the bound depth attachment; disabled when there is none.
    pub fn from_registers(framebuffer: &FramebufferState, regs: &ContextRegisters) -> Self {
        match framebuffer.depth {
            Some(_) => Self::from_register(regs.depth_control()),
            None => Self::DISABLED,
        }
    }

    /// A disabled Z test also disables Z writes.
    pub fn from_register(control: DbDepthControl) -> Self {
        if !control.z_enabled() {
            return Self::DISABLED;
        }
        if control.stencil_enabled() {
            tracing::trace!("stencil test requested, not baked into the pipeline");
        }
        Self {
            compare: CompareFunction::from_raw(control.z_func()),
            write_enabled: control.z_write_enabled(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FragmentOutputState {
    pub color_targets: [Option<ColorTargetState>; MAX_COLOR_TARGETS],
    pub depth: Option<DepthAttachment>,
    /// Only meaningful when `depth` is bound.
    pub depth_test: DepthTestState,
}

impl FragmentOutputState {
    /// Output state of the bound attachments. Blending is enabled only for float targets.
    pub fn from_registers(framebuffer: &FramebufferState, regs: &ContextRegisters) -> Self {
        let color_control = regs.color_control();
        let target_mask = regs.target_mask();
        let mut color_targets = [None; MAX_COLOR_TARGETS];
        for (i, attachment) in framebuffer.bound_colors() {
            let blendable = attachment.data_type() == AttachmentDataType::Float;
            let blend = (blendable && color_control.blend_enabled(i))
                .then(|| BlendState::from_register(regs.blend_control(i), i));
            color_targets[i] = Some(ColorTargetState {
                format: attachment.format,
                write_mask: ColorWriteMask::from_bits_truncate(target_mask.target(i)),
                blend,
            });
        }
        Self {
            color_targets,
            depth: framebuffer.depth,
            depth_test: DepthTestState::from_registers(framebuffer, regs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Rasterizer state baked into a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub primitive: PrimitiveMode,
    pub cull_mode: CullMode,
    pub front_face_cw: bool,
}

impl RasterState {
    pub fn from_registers(regs: &ContextRegisters) -> Self {
        let polygon = regs.polygon_control();
        let cull_mode = match (polygon.cull_front(), polygon.cull_back()) {
            (false, false) => CullMode::None,
            (true, false) => CullMode::Front,
            (false, true) => CullMode::Back,
            // Culling both faces is handled by skipping the draw.
            (true, true) => CullMode::None,
        };
        Self {
            primitive: regs.primitive_type().mode(),
            cull_mode,
            front_face_cw: polygon.front_face_cw(),
        }
    }
}
