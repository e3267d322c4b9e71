//! Point payload decoding.
//!
//! Payloads are flat arrays of fixed-size records. Positions are stored as
//! three little-endian `i32` values that map to world units through a scale
//! and an offset. The decoded positions are rebased on a node origin so they
//! fit in `f32` without losing precision.

use glam::{DVec3, Vec3};

use crate::error::{DecodeError, DecodeResult};

/// How color is stored inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorEncoding {
    /// Three `u16` channels (LAS style; 8-bit values are also accepted).
    Rgb16 { offset: usize },
    /// Four `u8` channels.
    Rgba8 { offset: usize },
}

/// Record layout of a point payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PointLayout {
    /// Bytes per point.
    pub stride: usize,
    /// Offset of the `i32` position triple inside the record.
    pub position_offset: usize,
    /// Multiplier applied to the integer position.
    pub scale: DVec3,
    /// Added after scaling.
    pub offset: DVec3,
    pub color: Option<ColorEncoding>,
    /// Offset of a `u16` intensity.
    pub intensity: Option<usize>,
    /// Offset of a `u8` classification.
    pub classification: Option<usize>,
}

impl PointLayout {
    /// Layout holding only a position triple.
    #[must_use]
    pub fn positions_only(scale: DVec3, offset: DVec3) -> Self {
        Self {
            stride: 12,
            position_offset: 0,
            scale,
            offset,
            color: None,
            intensity: None,
            classification: None,
        }
    }

    fn validate(&self) -> DecodeResult<()> {
        if self.stride == 0 {
            return Err(DecodeError::InvalidFormat {
                context: "point layout",
                detail: "stride must be positive".to_string(),
            });
        }
        let color = self.color.map(|c| match c {
            ColorEncoding::Rgb16 { offset } => (offset, 6),
            ColorEncoding::Rgba8 { offset } => (offset, 4),
        });
        let spans = [
            Some((self.position_offset, 12)),
            color,
            self.intensity.map(|o| (o, 2)),
            self.classification.map(|o| (o, 1)),
        ];
        for (offset, size) in spans.into_iter().flatten() {
            if offset + size > self.stride {
                return Err(DecodeError::LayoutOutOfBounds {
                    offset,
                    stride: self.stride,
                });
            }
        }
        Ok(())
    }
}

/// Decoded points of one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointBuffer {
    /// World position that `positions` are relative to.
    pub origin: DVec3,
    pub positions: Vec<Vec3>,
    /// Empty when the layout has no color.
    pub colors: Vec<[u8; 4]>,
    /// Empty when the layout has no intensity.
    pub intensities: Vec<u16>,
    /// Empty when the layout has no classification.
    pub classifications: Vec<u8>,
    /// Vertical extent of the decoded points in world units.
    pub min_z: f64,
    pub max_z: f64,
}

impl PointBuffer {
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Decode a payload of fixed-size records.
///
/// # Errors
///
/// Returns an error if the layout does not fit its stride or the payload is
/// not a whole number of records.
pub fn decode_points(bytes: &[u8], layout: &PointLayout, origin: DVec3) -> DecodeResult<PointBuffer> {
    layout.validate()?;
    if bytes.len() % layout.stride != 0 {
        return Err(DecodeError::InvalidFormat {
            context: "point payload",
            detail: format!(
                "payload length {} is not a multiple of stride {}",
                bytes.len(),
                layout.stride
            ),
        });
    }

    let count = bytes.len() / layout.stride;
    let mut buffer = PointBuffer {
        origin,
        positions: Vec::with_capacity(count),
        min_z: f64::INFINITY,
        max_z: f64::NEG_INFINITY,
        ..PointBuffer::default()
    };

    let wide_color = matches!(layout.color, Some(ColorEncoding::Rgb16 { offset })
        if bytes.chunks_exact(layout.stride).any(|r| (0..3).any(|c| read_u16(r, offset + c * 2) > 255)));

    for record in bytes.chunks_exact(layout.stride) {
        let p = layout.position_offset;
        let raw = DVec3::new(
            f64::from(read_i32(record, p)),
            f64::from(read_i32(record, p + 4)),
            f64::from(read_i32(record, p + 8)),
        );
        let world = raw * layout.scale + layout.offset;
        buffer.min_z = buffer.min_z.min(world.z);
        buffer.max_z = buffer.max_z.max(world.z);
        buffer.positions.push((world - origin).as_vec3());

        match layout.color {
            Some(ColorEncoding::Rgb16 { offset }) => {
                let channel = |c: usize| {
                    let value = read_u16(record, offset + c * 2);
                    #[allow(clippy::cast_possible_truncation)]
                    let value = if wide_color { (value >> 8) as u8 } else { value as u8 };
                    value
                };
                buffer.colors.push([channel(0), channel(1), channel(2), 255]);
            }
            Some(ColorEncoding::Rgba8 { offset }) => {
                buffer.colors.push([
                    record[offset],
                    record[offset + 1],
                    record[offset + 2],
                    record[offset + 3],
                ]);
            }
            None => {}
        }
        if let Some(offset) = layout.intensity {
            buffer.intensities.push(read_u16(record, offset));
        }
        if let Some(offset) = layout.classification {
            buffer.classifications.push(record[offset]);
        }
    }

    if count == 0 {
        buffer.min_z = origin.z;
        buffer.max_z = origin.z;
    }

    Ok(buffer)
}

fn read_i32(record: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ])
}

fn read_u16(record: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([record[offset], record[offset + 1]])
}
