//! Core pixel types shared by the store, the router and the acquisition boundary

use crate::error::StoreError;
use byteorder::{ByteOrder, LittleEndian};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a backing array, chosen from the camera's bit depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "uint32")]
    U32,
}

impl ElementType {
    /// Pick the narrowest unsigned type that holds `bit_depth` bits.
    ///
    /// Cameras commonly report 10, 12 or 14 bits; those are stored in 16-bit words.
    pub fn from_bit_depth(bit_depth: u32) -> Result<Self, StoreError> {
        match bit_depth {
            1..=8 => Ok(ElementType::U8),
            9..=16 => Ok(ElementType::U16),
            17..=32 => Ok(ElementType::U32),
            other => Err(StoreError::UnsupportedBitDepth(other)),
        }
    }

    /// Size of one pixel in bytes
    pub fn byte_size(&self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 => 4,
        }
    }

    /// Short name, e.g. `uint16`
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::U8 => "uint8",
            ElementType::U16 => "uint16",
            ElementType::U32 => "uint32",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single 2-D image as delivered by the acquisition engine.
///
/// Rows are the first axis (height), columns the second (width).
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    U8(Array2<u8>),
    U16(Array2<u16>),
    U32(Array2<u32>),
}

impl Frame {
    /// An all-zero frame, which is also what unwritten chunks read back as
    pub fn zeros(element_type: ElementType, shape: (usize, usize)) -> Self {
        match element_type {
            ElementType::U8 => Frame::U8(Array2::zeros(shape)),
            ElementType::U16 => Frame::U16(Array2::zeros(shape)),
            ElementType::U32 => Frame::U32(Array2::zeros(shape)),
        }
    }

    /// A frame with every pixel set to `value` (truncated to the element type)
    pub fn filled(element_type: ElementType, shape: (usize, usize), value: u32) -> Self {
        match element_type {
            ElementType::U8 => Frame::U8(Array2::from_elem(shape, value as u8)),
            ElementType::U16 => Frame::U16(Array2::from_elem(shape, value as u16)),
            ElementType::U32 => Frame::U32(Array2::from_elem(shape, value)),
        }
    }

    /// (height, width)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Frame::U8(a) => a.dim(),
            Frame::U16(a) => a.dim(),
            Frame::U32(a) => a.dim(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Frame::U8(_) => ElementType::U8,
            Frame::U16(_) => ElementType::U16,
            Frame::U32(_) => ElementType::U32,
        }
    }

    /// Row-major little-endian pixel bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Frame::U8(a) => a.iter().copied().collect(),
            Frame::U16(a) => {
                let pixels: Vec<u16> = a.iter().copied().collect();
                let mut bytes = vec![0u8; pixels.len() * 2];
                LittleEndian::write_u16_into(&pixels, &mut bytes);
                bytes
            }
            Frame::U32(a) => {
                let pixels: Vec<u32> = a.iter().copied().collect();
                let mut bytes = vec![0u8; pixels.len() * 4];
                LittleEndian::write_u32_into(&pixels, &mut bytes);
                bytes
            }
        }
    }

    /// Rebuild a frame from row-major little-endian bytes.
    ///
    /// Returns `None` when the byte count does not match `shape`.
    pub fn from_le_bytes(
        element_type: ElementType,
        shape: (usize, usize),
        bytes: &[u8],
    ) -> Option<Self> {
        let pixels = shape.0 * shape.1;
        if bytes.len() != pixels * element_type.byte_size() {
            return None;
        }

        let frame = match element_type {
            ElementType::U8 => Frame::U8(Array2::from_shape_vec(shape, bytes.to_vec()).ok()?),
            ElementType::U16 => {
                let mut buf = vec![0u16; pixels];
                LittleEndian::read_u16_into(bytes, &mut buf);
                Frame::U16(Array2::from_shape_vec(shape, buf).ok()?)
            }
            ElementType::U32 => {
                let mut buf = vec![0u32; pixels];
                LittleEndian::read_u32_into(bytes, &mut buf);
                Frame::U32(Array2::from_shape_vec(shape, buf).ok()?)
            }
        };
        Some(frame)
    }
}
