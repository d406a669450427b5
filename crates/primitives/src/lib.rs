//! Identifier newtypes shared by every layer of the engine.
//!
//! All catalog identifiers are 64-bit values minted by a catalog sequence.
//! They are never reused, even across restarts, so a stale handle can at
//! worst observe `NotFound`, never a different object.

use smallvec::SmallVec;
use std::fmt;

macro_rules! catalog_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn idx(self) -> u64 {
                self.0
            }

            pub fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
                Self(u64::from_be_bytes(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

catalog_id!(
    /// Identifies a logical database.
    DatabaseId
);
catalog_id!(
    /// Identifies a table within the whole engine, not just its database.
    TableId
);
catalog_id!(
    /// Identifies a column within the whole engine, not just its table.
    ColId
);
catalog_id!(
    /// Identifies a secondary index.
    IndexId
);

/// An ordered list of column ids, as used by primary keys and indexes.
///
/// Most keys and indexes cover very few columns, hence the inline capacity.
pub type ColList = SmallVec<[ColId; 4]>;

/// Builds a [`ColList`] from anything yielding [`ColId`]s.
pub fn col_list(cols: impl IntoIterator<Item = ColId>) -> ColList {
    cols.into_iter().collect()
}

/// The storage address of a row: the order-preserving encoding of its
/// primary-key columns, or of its synthetic row counter when the table has
/// no declared primary key.
///
/// The bytes are opaque at this layer; the codec crate produces and parses
/// them. Two `RowId`s compare the same way the underlying rows compare on
/// their primary key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(Vec<u8>);

impl RowId {
    pub fn from_key_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", hex::encode(&self.0))
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for RowId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_bytes() {
        let id = TableId::new(0xdead_beef);
        assert_eq!(TableId::from_be_bytes(id.to_be_bytes()), id);
    }

    #[test]
    fn row_ids_order_like_their_bytes() {
        let a = RowId::from_key_bytes(vec![0x01, 0x02]);
        let b = RowId::from_key_bytes(vec![0x01, 0x03]);
        assert!(a < b);
        assert_eq!(format!("{a}"), "0102");
    }
}
