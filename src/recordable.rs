//! FQ-id plumbing for record/replay, per design §6.
//!
//! The actual persistence backend is out of scope; this module only defines
//! the key format a backend would read and write through: the dotted
//! concatenation of every ancestor component's `recordable_id` trait, plus a
//! stable hash of that key suitable for use as a lookup key without storing
//! the (potentially long) dotted string itself. Grounded on
//! `original_source/.../runtime/record_replay.h` (`RECORDABLE_ID_TRAIT`,
//! `get_fq_recordable_id`).

use crate::error::GraphError;
use foldhash::fast::FixedState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

pub const RECORDABLE_ID_TRAIT: &str = "recordable_id";

/// A single component's recordable id, as set via its traits map.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordableId(pub String);

impl fmt::Display for RecordableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The dotted path from the outermost graph down to a node, used both for
/// diagnostics (FQPath, see `access.rs`) and as the human-readable half of
/// an error's identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct NodePath(pub Vec<String>);

impl NodePath {
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        NodePath(segments)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Concatenates ancestor `recordable_id`s (outermost first) with `.` as
/// separator. Absence of any ancestor's id is a fatal wiring error, per
/// spec §4.8 and §6.
pub fn fq_recordable_id(ancestors: &[Option<&RecordableId>]) -> Result<String, GraphError> {
    let mut parts = Vec::with_capacity(ancestors.len());
    for (depth, id) in ancestors.iter().enumerate() {
        match id {
            Some(id) => parts.push(id.0.clone()),
            None => {
                return Err(GraphError::wiring(format!(
                    "component at ancestor depth {depth} is missing the `{RECORDABLE_ID_TRAIT}` trait"
                )));
            }
        }
    }
    Ok(parts.join("."))
}

/// A stable 64-bit digest of a fully-qualified recordable id, used as the
/// actual lookup key a persistence backend indexes by, rather than the
/// dotted string itself. Encodes through `bincode` (so the digest is stable
/// across process restarts, unlike `std::hash::Hash`'s unspecified byte
/// layout) and hashes with the same `foldhash` builder `value.rs` uses for
/// `TypeMeta` interning.
pub fn recordable_key_hash(fq_id: &str) -> u64 {
    let encoded = bincode::serde::encode_to_vec(fq_id, bincode::config::standard())
        .expect("encoding a &str never fails");
    let mut hasher = FixedState::default().build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_ancestor_ids_with_dots() {
        let a = RecordableId("outer".into());
        let b = RecordableId("inner".into());
        let fq = fq_recordable_id(&[Some(&a), Some(&b)]).unwrap();
        assert_eq!(fq, "outer.inner");
    }

    #[test]
    fn missing_ancestor_id_is_fatal() {
        let a = RecordableId("outer".into());
        let err = fq_recordable_id(&[Some(&a), None]).unwrap_err();
        assert!(matches!(err, GraphError::Wiring { .. }));
    }

    #[test]
    fn recordable_key_hash_is_deterministic_and_sensitive_to_input() {
        let a = recordable_key_hash("outer.inner");
        let b = recordable_key_hash("outer.inner");
        let c = recordable_key_hash("outer.other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
