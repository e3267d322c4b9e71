//! Entwine Point Tile JSON hierarchy documents.
//!
//! A document is a flat object mapping `"D-X-Y-Z"` keys to point counts.
//! A count of `-1` marks a node whose subtree is described by its own
//! document.

use serde_json::Value;

use crate::error::{DecodeError, DecodeResult};
use crate::hierarchy::{DecodedHierarchy, HierarchyEntry};
use crate::key::NodeKey;

/// Decode a parsed hierarchy document.
///
/// # Errors
///
/// Returns an error if the document is not an object, a key is malformed, or
/// a count is neither `-1` nor a non-negative integer.
pub fn decode_document(document: &Value) -> DecodeResult<DecodedHierarchy> {
    let Some(object) = document.as_object() else {
        return Err(DecodeError::InvalidFormat {
            context: "ept hierarchy",
            detail: "document is not a JSON object".to_string(),
        });
    };

    object
        .iter()
        .map(|(key, count)| {
            let key = NodeKey::parse_ept(key)?;
            let entry = match count.as_i64() {
                Some(-1) => HierarchyEntry::Page {
                    page: None,
                    has_children: true,
                },
                Some(count) if count >= 0 => HierarchyEntry::Node {
                    count: count.unsigned_abs(),
                    payload: None,
                },
                _ => {
                    return Err(DecodeError::InvalidFormat {
                        context: "ept hierarchy",
                        detail: format!("invalid count {count} for {key}"),
                    });
                }
            };
            Ok((key, entry))
        })
        .collect()
}

/// Decode a raw hierarchy document.
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON or fail
/// [`decode_document`].
pub fn decode_bytes(bytes: &[u8]) -> DecodeResult<DecodedHierarchy> {
    let document: Value = serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidFormat {
        context: "ept hierarchy",
        detail: e.to_string(),
    })?;
    decode_document(&document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_document() {
        let document = json!({
            "0-0-0-0": 1000,
            "1-0-0-0": 300,
            "1-1-0-0": -1,
            "2-0-0-1": 0,
        });
        let decoded = decode_document(&document).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(
            decoded.get(&NodeKey::ROOT),
            Some(&HierarchyEntry::Node {
                count: 1000,
                payload: None
            })
        );
        assert!(matches!(
            decoded.get(&NodeKey::new(1, 1, 0, 0)),
            Some(HierarchyEntry::Page { .. })
        ));
        assert!(matches!(
            decoded.get(&NodeKey::new(2, 0, 0, 1)),
            Some(HierarchyEntry::Node { count: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_counts_and_keys() {
        assert!(decode_document(&json!({ "0-0-0-0": -2 })).is_err());
        assert!(decode_document(&json!({ "0-0-0-0": "many" })).is_err());
        assert!(decode_document(&json!({ "0-0-0": 1 })).is_err());
        assert!(decode_document(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_decode_bytes() {
        let decoded = decode_bytes(br#"{"0-0-0-0": 12}"#).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decode_bytes(b"{not json").is_err());
    }
}
