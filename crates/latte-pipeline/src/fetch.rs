//! Fetch-shader descriptors: how raw vertex-buffer bytes become vertex shader inputs.

use xxhash_rust::xxh3::Xxh3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFetchType {
    PerVertex,
    PerInstance,
}

/// Latte vertex data formats (`FMT_*`) that the fetch path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VertexDataFormat {
    Fmt8 = 0x01,
    Fmt16 = 0x05,
    Fmt16Float = 0x06,
    Fmt8_8 = 0x07,
    Fmt32 = 0x0D,
    Fmt32Float = 0x0E,
    Fmt16_16 = 0x0F,
    Fmt16_16Float = 0x10,
    Fmt10_10_10_2 = 0x18,
    Fmt2_10_10_10 = 0x19,
    Fmt8_8_8_8 = 0x1A,
    Fmt32_32 = 0x1D,
    Fmt32_32Float = 0x1E,
    Fmt16_16_16_16 = 0x1F,
    Fmt16_16_16_16Float = 0x20,
    Fmt32_32_32_32 = 0x22,
    Fmt32_32_32_32Float = 0x23,
    Fmt32_32_32 = 0x2F,
    Fmt32_32_32Float = 0x30,
}

impl VertexDataFormat {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x01 => Self::Fmt8,
            0x05 => Self::Fmt16,
            0x06 => Self::Fmt16Float,
            0x07 => Self::Fmt8_8,
            0x0D => Self::Fmt32,
            0x0E => Self::Fmt32Float,
            0x0F => Self::Fmt16_16,
            0x10 => Self::Fmt16_16Float,
            0x18 => Self::Fmt10_10_10_2,
            0x19 => Self::Fmt2_10_10_10,
            0x1A => Self::Fmt8_8_8_8,
            0x1D => Self::Fmt32_32,
            0x1E => Self::Fmt32_32Float,
            0x1F => Self::Fmt16_16_16_16,
            0x20 => Self::Fmt16_16_16_16Float,
            0x22 => Self::Fmt32_32_32_32,
            0x23 => Self::Fmt32_32_32_32Float,
            0x2F => Self::Fmt32_32_32,
            0x30 => Self::Fmt32_32_32Float,
            _ => return None,
        })
    }

    /// Host element format used to fetch the raw bits. Decoding (normalization, float conversion,
    /// endian swap) happens in the shader body, so every format is fetched as unsigned integers.
    pub fn element_format(self) -> VertexElementFormat {
        use VertexElementFormat as E;
        match self {
            Self::Fmt8 => E::Uint8,
            Self::Fmt8_8 => E::Uint8x2,
            Self::Fmt8_8_8_8 => E::Uint8x4,
            Self::Fmt16 | Self::Fmt16Float => E::Uint16,
            Self::Fmt16_16 | Self::Fmt16_16Float => E::Uint16x2,
            Self::Fmt16_16_16_16 | Self::Fmt16_16_16_16Float => E::Uint16x4,
            Self::Fmt32 | Self::Fmt32Float | Self::Fmt10_10_10_2 | Self::Fmt2_10_10_10 => {
                E::Uint32
            }
            Self::Fmt32_32 | Self::Fmt32_32Float => E::Uint32x2,
            Self::Fmt32_32_32 | Self::Fmt32_32_32Float => E::Uint32x3,
            Self::Fmt32_32_32_32 | Self::Fmt32_32_32_32Float => E::Uint32x4,
        }
    }
}

/// Raw-bits host vertex element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexElementFormat {
    Uint8,
    Uint8x2,
    Uint8x4,
    Uint16,
    Uint16x2,
    Uint16x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
}

impl VertexElementFormat {
    pub fn component_bits(self) -> u32 {
        match self {
            Self::Uint8 | Self::Uint8x2 | Self::Uint8x4 => 8,
            Self::Uint16 | Self::Uint16x2 | Self::Uint16x4 => 16,
            _ => 32,
        }
    }

    pub fn components(self) -> u32 {
        match self {
            Self::Uint8 | Self::Uint16 | Self::Uint32 => 1,
            Self::Uint8x2 | Self::Uint16x2 | Self::Uint32x2 => 2,
            Self::Uint32x3 => 3,
            Self::Uint8x4 | Self::Uint16x4 | Self::Uint32x4 => 4,
        }
    }

    pub fn byte_size(self) -> u32 {
        self.component_bits() / 8 * self.components()
    }

    /// Stable code used when digesting pipeline descriptors.
    pub fn code(self) -> u8 {
        match self {
            Self::Uint8 => 0,
            Self::Uint8x2 => 1,
            Self::Uint8x4 => 2,
            Self::Uint16 => 3,
            Self::Uint16x2 => 4,
            Self::Uint16x4 => 5,
            Self::Uint32 => 6,
            Self::Uint32x2 => 7,
            Self::Uint32x3 => 8,
            Self::Uint32x4 => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchAttribute {
    /// Attribute semantic; indexes the vertex shader's attribute mapping.
    pub semantic_id: u8,
    pub offset: u32,
    pub format: VertexDataFormat,
    pub fetch_type: VertexFetchType,
    pub divisor: u32,
}

impl FetchAttribute {
    pub fn per_vertex(semantic_id: u8, offset: u32, format: VertexDataFormat) -> Self {
        Self {
            semantic_id,
            offset,
            format,
            fetch_type: VertexFetchType::PerVertex,
            divisor: 0,
        }
    }

    pub fn per_instance(semantic_id: u8, offset: u32, format: VertexDataFormat, divisor: u32) -> Self {
        Self {
            semantic_id,
            offset,
            format,
            fetch_type: VertexFetchType::PerInstance,
            divisor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferGroup {
    pub buffer_index: u32,
    pub attributes: Vec<FetchAttribute>,
}

impl BufferGroup {
    /// Step rate of the buffer, taken from its first attribute.
    pub fn fetch_type(&self) -> VertexFetchType {
        self.attributes
            .first()
            .map(|attr| attr.fetch_type)
            .unwrap_or(VertexFetchType::PerVertex)
    }
}

/// Vertex-fetch layout of a draw, in buffer group order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FetchShaderDescriptor {
    pub groups: Vec<BufferGroup>,
}

impl FetchShaderDescriptor {
    pub fn new(groups: Vec<BufferGroup>) -> Self {
        Self { groups }
    }

    /// Hash of the descriptor's structure (groups, attributes, formats, step rates).
    ///
    /// Strides are not part of it; they live in registers and are hashed per draw.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&(self.groups.len() as u32).to_le_bytes());
        for group in &self.groups {
            hasher.update(&group.buffer_index.to_le_bytes());
            hasher.update(&(group.attributes.len() as u32).to_le_bytes());
            for attr in &group.attributes {
                hasher.update(&[attr.semantic_id, attr.format as u8]);
                hasher.update(&attr.offset.to_le_bytes());
                let fetch_type = match attr.fetch_type {
                    VertexFetchType::PerVertex => 0u8,
                    VertexFetchType::PerInstance => 1u8,
                };
                hasher.update(&[fetch_type]);
                hasher.update(&attr.divisor.to_le_bytes());
            }
        }
        hasher.digest()
    }
}

/// Index representation the host uses for the current draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostIndexType {
    #[default]
    None = 0,
    U16 = 1,
    U32 = 2,
}
