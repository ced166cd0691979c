//! Object identifiers.
//!
//! An OID addresses either a document root (`<collection>/<rootId>`) or a
//! nested object/array living inside a root document
//! (`<collection>/<rootId>.<fieldPath>:<localId>`). Sub-object OIDs must lie
//! lexicographically within `[root, root + ":\u{ffff}"]` so that a range scan
//! over the root's OID prefix finds every nested object without also
//! catching an unrelated, lexicographically-adjacent root.

use std::fmt;

use derive_more::{
    Display,
    From,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Appended to a root OID to form the upper (exclusive-in-spirit, inclusive
/// in our range representation) bound of its sub-object range. `\u{ffff}` is
/// not a valid field-path character, so no legitimately-generated child OID
/// can equal or exceed `root + SUB_OBJECT_SUFFIX`.
const SUB_OBJECT_SUFFIX: &str = ":\u{ffff}";

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(String);

impl Oid {
    /// Build the OID of a document root.
    pub fn root(collection: &str, root_id: &str) -> Self {
        Self(format!("{collection}/{root_id}"))
    }

    /// Build the OID of a nested object or array living under this root OID.
    ///
    /// Panics if called on a non-root OID: nesting is only one level deep in
    /// the on-wire representation (a sub-object's `fieldPath` can itself
    /// encode arbitrary depth, e.g. `"items.3.tags"`).
    pub fn child(&self, field_path: &str, local_id: &str) -> Self {
        assert!(
            self.is_root(),
            "cannot allocate a child of a non-root OID: {self}"
        );
        Self(format!("{}.{field_path}:{local_id}", self.0))
    }

    pub fn is_root(&self) -> bool {
        !self.0.contains('.')
    }

    /// The OID of the root document this OID (root or sub-object) belongs to.
    pub fn root_oid(&self) -> Oid {
        match self.0.split_once('.') {
            Some((root, _rest)) => Oid(root.to_string()),
            None => self.clone(),
        }
    }

    pub fn collection(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Inclusive `[lo, hi]` bound containing this OID (if root) and every
    /// sub-object OID nested under it. Used by storage backends to do a
    /// range scan for "everything under this document".
    pub fn sub_object_range(&self) -> (Oid, Oid) {
        let root = self.root_oid();
        let hi = Oid(format!("{}{SUB_OBJECT_SUFFIX}", root.0));
        (root, hi)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({:?})", self.0)
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
