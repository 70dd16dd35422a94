//! Raw Latte context-register view.
//!
//! The command processor owns the authoritative register file; this module only decodes the
//! handful of registers that shape a pipeline. Addresses are register indices (not byte offsets).

use std::fmt;

/// Number of 32-bit registers in the flat context-register file.
pub const REGISTER_FILE_LEN: usize = 0x10000;

pub mod addr {
    pub const VGT_PRIMITIVE_TYPE: usize = 0x2256;
    pub const CB_TARGET_MASK: usize = 0xA08E;
    pub const SX_ALPHA_TEST_CONTROL: usize = 0xA104;
    pub const SPI_VS_OUT_ID_0: usize = 0xA185;
    pub const CB_BLEND0_CONTROL: usize = 0xA1E0;
    pub const DB_DEPTH_CONTROL: usize = 0xA200;
    pub const CB_COLOR_CONTROL: usize = 0xA202;
    pub const PA_CL_CLIP_CNTL: usize = 0xA204;
    pub const PA_SU_SC_MODE_CNTL: usize = 0xA205;
    pub const PA_CL_VTE_CNTL: usize = 0xA206;
    pub const VGT_STRMOUT_EN: usize = 0xA2AC;
    /// First word of the per-buffer vertex attribute resource block.
    pub const SQ_VTX_ATTRIBUTE_BLOCK_START: usize = 0xE460;
    /// Words per vertex buffer in the attribute resource block.
    pub const SQ_VTX_ATTRIBUTE_BLOCK_WORDS: usize = 7;
}

/// Flat context-register file.
#[derive(Clone, PartialEq, Eq)]
pub struct ContextRegisters {
    raw: Box<[u32]>,
}

impl fmt::Debug for ContextRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nonzero = self.raw.iter().filter(|v| **v != 0).count();
        f.debug_struct("ContextRegisters")
            .field("nonzero", &nonzero)
            .finish()
    }
}

impl Default for ContextRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegisters {
    /// Creates a zero-filled register file.
    pub fn new() -> Self {
        Self {
            raw: vec![0u32; REGISTER_FILE_LEN].into_boxed_slice(),
        }
    }

    /// Wraps a register snapshot. Short snapshots are zero-extended; longer ones are truncated.
    pub fn from_raw(mut raw: Vec<u32>) -> Self {
        raw.resize(REGISTER_FILE_LEN, 0);
        Self {
            raw: raw.into_boxed_slice(),
        }
    }

    pub fn raw(&self) -> &[u32] {
        &self.raw
    }

    /// Reads a register; out-of-range addresses read as zero.
    pub fn get(&self, index: usize) -> u32 {
        self.raw.get(index).copied().unwrap_or(0)
    }

    /// Writes a register. Out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: u32) {
        if let Some(slot) = self.raw.get_mut(index) {
            *slot = value;
        }
    }

    /// Builder-style [`ContextRegisters::set`].
    pub fn with(mut self, index: usize, value: u32) -> Self {
        self.set(index, value);
        self
    }

    pub fn primitive_type(&self) -> VgtPrimitiveType {
        VgtPrimitiveType(self.get(addr::VGT_PRIMITIVE_TYPE))
    }

    pub fn target_mask(&self) -> CbTargetMask {
        CbTargetMask(self.get(addr::CB_TARGET_MASK))
    }

    pub fn alpha_test_control(&self) -> SxAlphaTestControl {
        SxAlphaTestControl(self.get(addr::SX_ALPHA_TEST_CONTROL))
    }

    pub fn blend_control(&self, target: usize) -> CbBlendControl {
        CbBlendControl(self.get(addr::CB_BLEND0_CONTROL + target))
    }

    pub fn depth_control(&self) -> DbDepthControl {
        DbDepthControl(self.get(addr::DB_DEPTH_CONTROL))
    }

    pub fn color_control(&self) -> CbColorControl {
        CbColorControl(self.get(addr::CB_COLOR_CONTROL))
    }

    pub fn clip_control(&self) -> PaClClipCntl {
        PaClClipCntl(self.get(addr::PA_CL_CLIP_CNTL))
    }

    pub fn polygon_control(&self) -> PaSuScModeCntl {
        PaSuScModeCntl(self.get(addr::PA_SU_SC_MODE_CNTL))
    }

    pub fn viewport_transform_control(&self) -> PaClVteCntl {
        PaClVteCntl(self.get(addr::PA_CL_VTE_CNTL))
    }

    pub fn streamout_enable(&self) -> u32 {
        self.get(addr::VGT_STRMOUT_EN)
    }

    /// Semantic id assigned to vertex-shader output parameter `param` (`SPI_VS_OUT_ID_n`, four
    /// 8-bit ids per register).
    pub fn vs_output_semantic_id(&self, param: usize) -> u32 {
        let word = self.get(addr::SPI_VS_OUT_ID_0 + param / 4);
        (word >> ((param % 4) * 8)) & 0xFF
    }

    /// Unaligned stride of vertex buffer `buffer_index` as programmed by the guest.
    pub fn vertex_buffer_stride(&self, buffer_index: u32) -> u32 {
        let base = addr::SQ_VTX_ATTRIBUTE_BLOCK_START
            + buffer_index as usize * addr::SQ_VTX_ATTRIBUTE_BLOCK_WORDS;
        (self.get(base + 2) >> 11) & 0xFFFF
    }

    /// Helper for tests and callers that assemble a register snapshot by hand.
    pub fn set_vertex_buffer_stride(&mut self, buffer_index: u32, stride: u32) {
        let index = addr::SQ_VTX_ATTRIBUTE_BLOCK_START
            + buffer_index as usize * addr::SQ_VTX_ATTRIBUTE_BLOCK_WORDS
            + 2;
        let word = self.get(index) & !(0xFFFF << 11);
        self.set(index, word | ((stride & 0xFFFF) << 11));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgtPrimitiveType(pub u32);

impl VgtPrimitiveType {
    pub fn mode(self) -> PrimitiveMode {
        PrimitiveMode::from_raw(self.0 & 0x3F)
    }
}

/// Latte `VGT_DI_PRIMITIVE_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleFan,
    TriangleStrip,
    Rects,
    LineLoop,
    Quads,
    QuadStrip,
    Other(u32),
}

/// Coarse primitive class used by shader variants and native topology selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyClass {
    Point,
    Line,
    Triangle,
    Unknown,
}

impl TopologyClass {
    /// Value of the `PRIMITIVE_TOPOLOGY` shader constant.
    pub fn code(self) -> u32 {
        match self {
            TopologyClass::Point => 0,
            TopologyClass::Line => 1,
            TopologyClass::Triangle => 2,
            TopologyClass::Unknown => 3,
        }
    }
}

impl PrimitiveMode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x01 => Self::Points,
            0x02 => Self::Lines,
            0x03 => Self::LineStrip,
            0x04 => Self::Triangles,
            0x05 => Self::TriangleFan,
            0x06 => Self::TriangleStrip,
            0x11 => Self::Rects,
            0x12 => Self::LineLoop,
            0x13 => Self::Quads,
            0x14 => Self::QuadStrip,
            other => Self::Other(other),
        }
    }

    pub fn class(self) -> TopologyClass {
        match self {
            Self::Points => TopologyClass::Point,
            Self::Lines | Self::LineStrip | Self::LineLoop => TopologyClass::Line,
            Self::Triangles
            | Self::TriangleFan
            | Self::TriangleStrip
            | Self::Rects
            | Self::Quads
            | Self::QuadStrip => TopologyClass::Triangle,
            Self::Other(_) => TopologyClass::Unknown,
        }
    }

    /// Vertices consumed per emitted primitive when the draw is expanded into a list.
    pub fn vertices_per_primitive(self) -> u32 {
        match self {
            Self::Points => 1,
            Self::Lines | Self::LineStrip | Self::LineLoop => 2,
            Self::Triangles | Self::TriangleFan | Self::TriangleStrip | Self::Rects => 3,
            Self::Quads | Self::QuadStrip => 4,
            Self::Other(_) => 1,
        }
    }
}

/// `CB_TARGET_MASK`: 4 write-enable bits (RGBA) per color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbTargetMask(pub u32);

impl CbTargetMask {
    pub fn target(self, index: usize) -> u8 {
        ((self.0 >> (index * 4)) & 0xF) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SxAlphaTestControl(pub u32);

impl SxAlphaTestControl {
    pub fn alpha_func(self) -> u32 {
        self.0 & 0x7
    }

    pub fn enabled(self) -> bool {
        self.0 & (1 << 3) != 0
    }
}

/// `CB_COLOR_CONTROL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbColorControl(pub u32);

impl CbColorControl {
    /// Per-target blend enable mask (bits 8..15).
    pub fn blend_mask(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    pub fn blend_enabled(self, target: usize) -> bool {
        self.blend_mask() & (1 << target) != 0
    }
}

/// `CB_BLEND{n}_CONTROL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbBlendControl(pub u32);

impl CbBlendControl {
    pub fn color_src(self) -> u32 {
        self.0 & 0x1F
    }

    pub fn color_op(self) -> u32 {
        (self.0 >> 5) & 0x7
    }

    pub fn color_dst(self) -> u32 {
        (self.0 >> 8) & 0x1F
    }

    pub fn alpha_src(self) -> u32 {
        (self.0 >> 16) & 0x1F
    }

    pub fn alpha_op(self) -> u32 {
        (self.0 >> 21) & 0x7
    }

    pub fn alpha_dst(self) -> u32 {
        (self.0 >> 24) & 0x1F
    }

    pub fn separate_alpha(self) -> bool {
        self.0 & (1 << 29) != 0
    }
}

/// `PA_CL_CLIP_CNTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaClClipCntl(pub u32);

impl PaClClipCntl {
    pub fn dx_clip_space_def(self) -> bool {
        self.0 & (1 << 19) != 0
    }

    /// Rasterizer discard.
    pub fn dx_rasterization_kill(self) -> bool {
        self.0 & (1 << 22) != 0
    }
}

/// `PA_SU_SC_MODE_CNTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaSuScModeCntl(pub u32);

impl PaSuScModeCntl {
    pub fn cull_front(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn cull_back(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    /// Front faces are clockwise.
    pub fn front_face_cw(self) -> bool {
        self.0 & (1 << 2) != 0
    }
}

/// `DB_DEPTH_CONTROL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbDepthControl(pub u32);

impl DbDepthControl {
    pub fn stencil_enabled(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn z_enabled(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    pub fn z_write_enabled(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    /// `FRAG_*` compare function, 0 (never) through 7 (always).
    pub fn z_func(self) -> u32 {
        (self.0 >> 4) & 0x7
    }
}

/// `PA_CL_VTE_CNTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaClVteCntl(pub u32);

impl PaClVteCntl {
    pub fn x_scale_enabled(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn y_scale_enabled(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    pub fn z_scale_enabled(self) -> bool {
        self.0 & (1 << 4) != 0
    }

    pub fn any_scale_disabled(self) -> bool {
        !self.x_scale_enabled() || !self.y_scale_enabled() || !self.z_scale_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_buffer_stride_reads_word_two_of_the_attribute_block() {
        let mut regs = ContextRegisters::new();
        regs.set(addr::SQ_VTX_ATTRIBUTE_BLOCK_START + 3 * 7 + 2, (20 << 11) | 0x7FF);
        assert_eq!(regs.vertex_buffer_stride(3), 20);
        assert_eq!(regs.vertex_buffer_stride(2), 0);

        regs.set_vertex_buffer_stride(3, 36);
        assert_eq!(regs.vertex_buffer_stride(3), 36);
        // Low bits of the word are preserved.
        assert_eq!(
            regs.get(addr::SQ_VTX_ATTRIBUTE_BLOCK_START + 3 * 7 + 2) & 0x7FF,
            0x7FF
        );
    }

    #[test]
    fn output_semantic_ids_pack_four_per_register() {
        let regs =
            ContextRegisters::new().with(addr::SPI_VS_OUT_ID_0 + 1, 0x44_33_22_11);
        assert_eq!(regs.vs_output_semantic_id(4), 0x11);
        assert_eq!(regs.vs_output_semantic_id(5), 0x22);
        assert_eq!(regs.vs_output_semantic_id(7), 0x44);
        assert_eq!(regs.vs_output_semantic_id(0), 0);
    }

    #[test]
    fn primitive_mode_classes() {
        let regs = ContextRegisters::new().with(addr::VGT_PRIMITIVE_TYPE, 0x40 | 0x13);
        assert_eq!(regs.primitive_type().mode(), PrimitiveMode::Quads);
        assert_eq!(PrimitiveMode::Quads.class(), TopologyClass::Triangle);
        assert_eq!(PrimitiveMode::Quads.vertices_per_primitive(), 4);
        assert_eq!(PrimitiveMode::LineLoop.class(), TopologyClass::Line);
        assert_eq!(PrimitiveMode::from_raw(0x3F).class(), TopologyClass::Unknown);
    }

    #[test]
    fn viewport_scale_checks_all_three_axes() {
        assert!(!PaClVteCntl(0b1_0101).any_scale_disabled());
        assert!(PaClVteCntl(0b0_0101).any_scale_disabled());
        assert!(PaClVteCntl(0).any_scale_disabled());
    }

    #[test]
    fn blend_control_fields() {
        let blend = CbBlendControl(4 | (1 << 5) | (5 << 8) | (1 << 16) | (3 << 21) | (7 << 24) | (1 << 29));
        assert_eq!(blend.color_src(), 4);
        assert_eq!(blend.color_op(), 1);
        assert_eq!(blend.color_dst(), 5);
        assert_eq!(blend.alpha_src(), 1);
        assert_eq!(blend.alpha_op(), 3);
        assert_eq!(blend.alpha_dst(), 7);
        assert!(blend.separate_alpha());
        assert!(CbColorControl(0b0000_0101 << 8).blend_enabled(2));
        assert!(!CbColorControl(0b0000_0101 << 8).blend_enabled(1));
    }

    #[test]
    fn depth_control_fields() {
        let depth = DbDepthControl(0b110 | (3 << 4));
        assert!(!depth.stencil_enabled());
        assert!(depth.z_enabled());
        assert!(depth.z_write_enabled());
        assert_eq!(depth.z_func(), 3);
    }
}
