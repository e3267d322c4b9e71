//! Potree 1 `.hrc` hierarchy files.
//!
//! Each file describes the subtree of one node down to `step` levels below
//! it as a breadth-first list of 5-byte records: a child mask (u8, Potree
//! child numbering) followed by the point count (u32, little endian). Nodes
//! exactly `step` levels down carry their own `.hrc` file; their children
//! are not listed.

use std::collections::VecDeque;

use crate::error::{DecodeError, DecodeResult};
use crate::hierarchy::{DecodedHierarchy, HierarchyEntry};
use crate::key::{NodeKey, potree_bit_to_octant};

/// Size in bytes of one hierarchy record.
pub const RECORD_SIZE: usize = 5;

/// Decode the `.hrc` file of `root`, whose pages are `step` levels deep.
///
/// # Errors
///
/// Returns an error if `step` is zero or the file ends before every listed
/// child has a record.
pub fn decode_chunk(bytes: &[u8], root: NodeKey, step: u32) -> DecodeResult<DecodedHierarchy> {
    if step == 0 {
        return Err(DecodeError::InvalidFormat {
            context: "potree hierarchy",
            detail: "hierarchy step size must be positive".to_string(),
        });
    }

    let mut decoded = DecodedHierarchy::new();
    let mut queue: VecDeque<(NodeKey, usize)> = VecDeque::from([(root, 0)]);
    let mut next_record = 1usize;

    while let Some((key, index)) = queue.pop_front() {
        let (child_mask, count) = read_record(bytes, index)?;
        let depth_in_chunk = key.depth - root.depth;

        if depth_in_chunk == step && child_mask != 0 {
            decoded.insert(
                key,
                HierarchyEntry::Page {
                    page: None,
                    has_children: true,
                },
            );
            continue;
        }

        decoded.insert(
            key,
            HierarchyEntry::Node {
                count: u64::from(count),
                payload: None,
            },
        );

        if depth_in_chunk == step {
            continue;
        }

        for bit in 0..8u8 {
            if child_mask & (1 << bit) != 0 {
                let child = key.checked_child(potree_bit_to_octant(bit)).ok_or_else(|| {
                    DecodeError::InvalidFormat {
                        context: "potree hierarchy",
                        detail: format!("children of {key} exceed the key range"),
                    }
                })?;
                queue.push_back((child, next_record));
                next_record += 1;
            }
        }
    }

    Ok(decoded)
}

fn read_record(bytes: &[u8], index: usize) -> DecodeResult<(u8, u32)> {
    let start = index * RECORD_SIZE;
    let Some(record) = bytes.get(start..start + RECORD_SIZE) else {
        return Err(DecodeError::BufferTooSmall {
            expected: start + RECORD_SIZE,
            actual: bytes.len(),
        });
    };
    Ok((
        record[0],
        u32::from_le_bytes([record[1], record[2], record[3], record[4]]),
    ))
}

/// Directory of the `.hrc`/`.bin` files of a node, relative to `octreeDir/r`.
///
/// Names are split into groups of `step` digits, one directory per full
/// group: with a step of 2, node `"12345"` lives under `"12/34/"`.
#[must_use]
pub fn hierarchy_path(name: &str, step: u32) -> String {
    let step = step.max(1) as usize;
    let mut path = String::new();
    for part in 0..name.len() / step {
        path.push_str(&name[part * step..(part + 1) * step]);
        path.push('/');
    }
    path
}

/// Key of the node owning the `.hrc` file that lists `key`.
#[must_use]
pub fn page_root(key: NodeKey, step: u32) -> NodeKey {
    let step = step.max(1);
    let mut root = key;
    while root.depth % step != 0 {
        root = root.parent().unwrap_or(NodeKey::ROOT);
    }
    root
}
