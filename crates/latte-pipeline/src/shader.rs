//! Decompiled shader programs as handed over by the bytecode decompiler.
//!
//! The decompiler owns these objects; the pipeline layer only reads them. Everything here is plain
//! data plus validation of the raw resource-mapping tables.

use thiserror::Error;

pub const MAX_ATTRIBUTE_LOCATIONS: usize = 32;
pub const MAX_TEXTURE_UNITS: usize = 18;
pub const MAX_UNIFORM_BUFFERS: usize = 16;
pub const MAX_STREAMOUT_BUFFERS: usize = 4;
pub const MAX_COLOR_TARGETS: usize = 8;
/// Number of vertex-shader output parameters addressable through `SPI_VS_OUT_ID_n`.
pub const MAX_OUTPUT_PARAMETERS: usize = 32;

/// Upper bound of the register-file span exposed in [`UniformMode::FullRegisterFile`] mode.
pub const MAX_UNIFORM_REGISTERS: u32 = 256;
/// Entries per uniform bank when the analysis could not bound the access range.
pub const DEFAULT_UNIFORM_BANK_ENTRIES: u32 = 1024;
/// Highest varying semantic id that is routed between stages. `0xFF` marks an unused export.
pub const MAX_PARAM_SEMANTIC_ID: u32 = 0xFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
}

impl ShaderStage {
    /// Short suffix used for stage-specific identifiers (`remapped_vs`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::Pixel => "ps",
            ShaderStage::Geometry => "gs",
        }
    }

    /// Bind group carrying this stage's resources.
    pub fn bind_group(self) -> u32 {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Pixel => 1,
            ShaderStage::Geometry => 2,
        }
    }
}

/// How the shader reads uniform registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UniformMode {
    #[default]
    None,
    /// Statically predictable accesses compacted into a dense array.
    Remapped,
    FullRegisterFile,
    FullUniformBank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResourceMappingError {
    #[error("mapping table has {len} entries, at most {max} are supported")]
    TooManyEntries { len: usize, max: usize },
    #[error("unit {unit} maps to invalid slot {slot}")]
    InvalidSlot { unit: usize, slot: i32 },
}

/// Hardware unit -> host slot table with an explicit "unused" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotTable<const N: usize> {
    slots: [Option<u32>; N],
}

impl<const N: usize> Default for SlotTable<N> {
    fn default() -> Self {
        Self { slots: [None; N] }
    }
}

impl<const N: usize> SlotTable<N> {
    /// Validates a raw table where `-1` marks an unused unit.
    pub fn from_raw(raw: &[i32]) -> Result<Self, ResourceMappingError> {
        if raw.len() > N {
            return Err(ResourceMappingError::TooManyEntries {
                len: raw.len(),
                max: N,
            });
        }
        let mut table = Self::default();
        for (unit, &slot) in raw.iter().enumerate() {
            match slot {
                -1 => {}
                s if s >= 0 => table.slots[unit] = Some(s as u32),
                s => return Err(ResourceMappingError::InvalidSlot { unit, slot: s }),
            }
        }
        Ok(table)
    }

    pub fn get(&self, unit: usize) -> Option<u32> {
        self.slots.get(unit).copied().flatten()
    }

    /// Builder-style assignment; units past the table size are ignored.
    pub fn with(mut self, unit: usize, slot: u32) -> Self {
        if let Some(entry) = self.slots.get_mut(unit) {
            *entry = Some(slot);
        }
        self
    }

    pub fn iter_used(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(unit, slot)| slot.map(|s| (unit, s)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResourceMapping {
    /// Vertex attribute semantic -> shader input location.
    pub attributes: SlotTable<MAX_ATTRIBUTE_LOCATIONS>,
    /// Texture unit -> binding point.
    pub textures: SlotTable<MAX_TEXTURE_UNITS>,
    /// Uniform buffer -> binding point.
    pub uniform_buffers: SlotTable<MAX_UNIFORM_BUFFERS>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDim {
    D1,
    D2,
    D3,
    Cube,
    D1Array,
    D2Array,
    D2Msaa,
    D2ArrayMsaa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUnit {
    pub dim: TextureDim,
    pub is_integer: bool,
}

bitflags::bitflags! {
    /// Set of texture units, one bit per unit.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct TextureUnitMask: u32 {
        const ALL = (1 << MAX_TEXTURE_UNITS) - 1;
    }
}

impl TextureUnitMask {
    pub fn unit(unit: usize) -> Self {
        if unit >= MAX_TEXTURE_UNITS {
            return Self::empty();
        }
        Self::from_bits_retain(1 << unit)
    }

    pub fn has_unit(self, unit: usize) -> bool {
        unit < MAX_TEXTURE_UNITS && self.contains(Self::unit(unit))
    }
}

/// Per-feature usage flags produced by the decompiler's static analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderAnalysis {
    /// Distinct entries in the remapped uniform table.
    pub remapped_uniform_count: u32,
    /// Register-file span observed by the usage tracker.
    pub uniform_register_span: u32,
    /// Accessed uniform buffers with their tracked entry count; `Some(0)` means "unbounded".
    pub uniform_buffer_sizes: [Option<u32>; MAX_UNIFORM_BUFFERS],
    pub textures: [Option<TextureUnit>; MAX_TEXTURE_UNITS],
    /// Units sampled with integer texel coordinates.
    pub texel_fetch_units: TextureUnitMask,
    /// Bit `n` set when attribute semantic `n` is read.
    pub input_attribute_mask: u32,
    pub outputs_point_size: bool,
    pub writes_point_size: bool,
    pub uses_streamout_buffers: bool,
    pub streamout_buffer_mask: u8,
}

impl ShaderAnalysis {
    pub fn uses_attribute(&self, semantic: usize) -> bool {
        semantic < MAX_ATTRIBUTE_LOCATIONS && self.input_attribute_mask & (1 << semantic) != 0
    }
}

/// Output of the decompiler for one hardware shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    pub stage: ShaderStage,
    /// Identity of the shader bytecode.
    pub base_hash: u64,
    pub aux_hash: u64,
    pub uniform_mode: UniformMode,
    pub resource_mapping: ResourceMapping,
    pub analysis: ShaderAnalysis,
    /// Bit `n` set when output parameter `n` is exported.
    pub output_parameter_mask: u32,
    /// Pixel stage: bit `n` set when color target `n` is written.
    pub color_output_mask: u8,
    /// Vertex stage: a geometry shader follows.
    pub uses_geometry_shader: bool,
    /// Generic body (entry point and helpers) written against the emitted header.
    pub body: String,
}

impl ShaderProgram {
    pub fn new(stage: ShaderStage, base_hash: u64, aux_hash: u64, body: impl Into<String>) -> Self {
        Self {
            stage,
            base_hash,
            aux_hash,
            uniform_mode: UniformMode::None,
            resource_mapping: ResourceMapping::default(),
            analysis: ShaderAnalysis::default(),
            output_parameter_mask: 0,
            color_output_mask: 0,
            uses_geometry_shader: false,
            body: body.into(),
        }
    }

    /// Input location of attribute `semantic` when the shader reads it.
    pub fn attribute_location(&self, semantic: usize) -> Option<u32> {
        if !self.analysis.uses_attribute(semantic) {
            return None;
        }
        self.resource_mapping.attributes.get(semantic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelImport {
    pub semantic_id: u32,
    pub is_flat: bool,
    pub is_no_perspective: bool,
}

impl PixelImport {
    pub fn smooth(semantic_id: u32) -> Self {
        Self {
            semantic_id,
            is_flat: false,
            is_no_perspective: false,
        }
    }
}

/// Varyings consumed by the current pixel shader, in import order.
///
/// Shared by both sides of the vertex -> pixel interface: the import index is the varying's
/// location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelInputTable {
    pub imports: Vec<PixelImport>,
}

impl PixelInputTable {
    pub fn new(imports: Vec<PixelImport>) -> Self {
        Self { imports }
    }

    /// Import index of `semantic_id`, if the pixel shader consumes it.
    pub fn find(&self, semantic_id: u32) -> Option<usize> {
        self.imports
            .iter()
            .position(|import| import.semantic_id == semantic_id)
    }
}
