use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Annotation attached to an absolute item position in a stream.
///
/// Tags ride alongside buffers: the engine keeps them sorted by offset,
/// trims the ones consumption has passed, and forwards them downstream with
/// rate-scaled offsets according to the block's propagation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub offset: u64,
    pub key: String,
    pub value: serde_json::Value,
}

impl Tag {
    pub fn new(offset: u64, key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            offset,
            key: key.into(),
            value,
        }
    }

    /// Ordering by stream offset, for pre-work sorting.
    pub fn offset_order(a: &Tag, b: &Tag) -> Ordering {
        a.offset.cmp(&b.offset)
    }
}
