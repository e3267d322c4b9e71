//! Potree 2 `hierarchy.bin` chunks.
//!
//! # Format
//!
//! A chunk is a breadth-first list of 22-byte little-endian records, the
//! first one describing the chunk root:
//!
//! - Byte 0: node type (0 normal, 1 leaf, 2 proxy)
//! - Byte 1: child mask (bit `i` is Potree child `i`)
//! - Bytes 2-5: point count (u32)
//! - Bytes 6-13: byte offset (u64)
//! - Bytes 14-21: byte size (u64)
//!
//! For proxies, offset and size locate the node's own chunk inside
//! `hierarchy.bin`; otherwise they locate its points inside `octree.bin`.
//! Children of a proxy are not listed.

use std::collections::VecDeque;

use crate::error::{DecodeError, DecodeResult};
use crate::hierarchy::{ByteRange, DecodedHierarchy, HierarchyEntry};
use crate::key::{NodeKey, potree_bit_to_octant};

/// Size in bytes of one hierarchy record.
pub const RECORD_SIZE: usize = 22;

const TYPE_PROXY: u8 = 2;

/// Decode a chunk whose first record describes `root`.
///
/// # Errors
///
/// Returns an error if the chunk is empty, not a whole number of records, or
/// its child masks reference more records than it holds. Records whose byte
/// range or child keys overflow are rejected as
/// [`DecodeError::InvalidFormat`].
pub fn decode_chunk(bytes: &[u8], root: NodeKey) -> DecodeResult<DecodedHierarchy> {
    if bytes.is_empty() || bytes.len() % RECORD_SIZE != 0 {
        return Err(DecodeError::InvalidFormat {
            context: "potree2 hierarchy",
            detail: format!(
                "chunk length {} is not a positive multiple of {RECORD_SIZE}",
                bytes.len()
            ),
        });
    }

    let record_count = bytes.len() / RECORD_SIZE;
    let mut decoded = DecodedHierarchy::new();
    // Keys in the order their records appear.
    let mut pending: VecDeque<NodeKey> = VecDeque::from([root]);
    let mut assigned = 1usize;

    for index in 0..record_count {
        let key = pending.pop_front().ok_or_else(|| DecodeError::InvalidFormat {
            context: "potree2 hierarchy",
            detail: format!("record {index} is not reachable from the chunk root"),
        })?;
        let record = &bytes[index * RECORD_SIZE..(index + 1) * RECORD_SIZE];
        let node_type = record[0];
        let child_mask = record[1];
        let count = u32::from_le_bytes([record[2], record[3], record[4], record[5]]);
        let offset = u64::from_le_bytes(record[6..14].try_into().unwrap_or_default());
        let size = u64::from_le_bytes(record[14..22].try_into().unwrap_or_default());

        // The chunk root is never a proxy of itself.
        if node_type == TYPE_PROXY && index > 0 {
            decoded.insert(
                key,
                HierarchyEntry::Page {
                    page: Some(ByteRange::checked(offset, size)?),
                    has_children: true,
                },
            );
            continue;
        }

        let count = if size == 0 { 0 } else { u64::from(count) };
        decoded.insert(
            key,
            HierarchyEntry::Node {
                count,
                payload: Some(ByteRange::checked(offset, size)?),
            },
        );

        for bit in 0..8u8 {
            if child_mask & (1 << bit) != 0 {
                let child = key.checked_child(potree_bit_to_octant(bit)).ok_or_else(|| {
                    DecodeError::InvalidFormat {
                        context: "potree2 hierarchy",
                        detail: format!("children of {key} exceed the key range"),
                    }
                })?;
                pending.push_back(child);
                assigned += 1;
            }
        }
    }

    if assigned > record_count {
        return Err(DecodeError::BufferTooSmall {
            expected: assigned * RECORD_SIZE,
            actual: bytes.len(),
        });
    }

    Ok(decoded)
}

/// Encode one record. Used to build fixtures.
#[must_use]
pub fn encode_record(node_type: u8, child_mask: u8, count: u32, offset: u64, size: u64) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    record[0] = node_type;
    record[1] = child_mask;
    record[2..6].copy_from_slice(&count.to_le_bytes());
    record[6..14].copy_from_slice(&offset.to_le_bytes());
    record[14..22].copy_from_slice(&size.to_le_bytes());
    record
}
