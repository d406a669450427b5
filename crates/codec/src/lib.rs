//! Value model and byte-level codecs for the engine's single ordered
//! keyspace: order-preserving key encoding, row payload serialization and
//! catalog record serialization.

pub mod error;
pub mod key;
pub mod row;
pub mod schema;
pub mod value;

pub use error::CodecError;
pub use key::{SequenceName, Tag};
pub use schema::{
    ColumnDef, ColumnSchema, DatabaseMeta, IndexDef, IndexSchema, TableDef, TableSchema,
};
pub use value::{LogicalType, Value};
