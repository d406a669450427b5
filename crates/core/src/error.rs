use enum_as_inner::EnumAsInner;
use granitedb_codec::CodecError;
use granitedb_kv::KvError;
use granitedb_primitives::{ColId, RowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("database `{0}` not found")]
    DatabaseNotFound(String),
    #[error("database `{0}` already exists")]
    DatabaseExists(String),
    #[error("table `{0}` not found")]
    TableNotFound(String),
    #[error("table `{0}` already exists")]
    TableExists(String),
    #[error("`{0}` is a system catalog and is read-only")]
    PermissionDenied(String),
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("table handle is closed")]
    Closed,
    #[error("row `{0}` not found")]
    RowNotFound(RowId),
    #[error("duplicate primary key `{0}`")]
    DuplicateKey(RowId),
    #[error("row has {found} values, table `{table}` has {expected} columns")]
    Arity {
        table: String,
        expected: usize,
        found: usize,
    },
    #[error("column `{0}` cannot be NULL")]
    NotNull(String),
    #[error("column `{column}` expects {ty}, got `{value}`")]
    TypeMismatch {
        column: String,
        ty: String,
        value: String,
    },
    #[error("value for column `{column}` exceeds {ty}")]
    ValueTooLong { column: String, ty: String },
    #[error("column `{0}` not found")]
    ColumnNotFound(String),
    #[error("column `{0}` already exists")]
    DuplicateColumnName(String),
    #[error("column id `{0}` not found")]
    ColumnIdNotFound(ColId),
    #[error("primary-key column `{0}` must be declared NOT NULL")]
    NullablePrimaryKey(String),
    #[error("table `{0}` has no declared primary key")]
    NoPrimaryKey(String),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index `{0}` not found")]
    NotFound(String),
    #[error("index `{0}` already exists")]
    Exists(String),
    #[error("unique constraint violation on index `{index}`, value ({values})")]
    UniqueViolation { index: String, values: String },
    #[error("index `{index}` refers to unknown column `{column}`")]
    ColumnNotFound { index: String, column: String },
    #[error("index `{0}` must cover at least one column")]
    NoColumns(String),
    #[error("table `{0}` already has a clustered index")]
    ClusteredExists(String),
    #[error("clustered index `{0}` must cover exactly the primary-key columns")]
    ClusteredMismatch(String),
}

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("sequence `{0}` holds a malformed counter")]
    Malformed(String),
}

#[derive(Error, Debug, EnumAsInner)]
pub enum DbError {
    #[error("CatalogError: {0}")]
    Catalog(#[from] CatalogError),
    #[error("TableError: {0}")]
    Table(#[from] TableError),
    #[error("IndexError: {0}")]
    Index(#[from] IndexError),
    #[error("SequenceError: {0}")]
    Sequence(#[from] SequenceError),
    #[error("CodecError: {0}")]
    Codec(#[from] CodecError),
    #[error("KvError: {0}")]
    Kv(#[from] KvError),
    #[error("corrupt stored data: {0}")]
    Corruption(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// Wraps a decode failure on stored bytes. Whatever the codec reports,
    /// data that no longer decodes under its schema is corruption.
    pub fn corruption(context: impl Into<String>, source: CodecError) -> DbError {
        DbError::Corruption(format!("{}: {source}", context.into()))
    }

    /// Conflicts are the only errors a caller should retry; everything else
    /// is terminal for the current request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Kv(KvError::TxnConflict))
    }

    /// Process exit code for CLI front-ends: 1 configuration, 2 i/o,
    /// 3 corruption.
    pub fn exit_code(&self) -> i32 {
        match self {
            DbError::Kv(KvError::Io(_)) | DbError::Kv(KvError::Storage(_)) => 2,
            DbError::Kv(KvError::Corruption(_)) | DbError::Corruption(_) => 3,
            _ => 1,
        }
    }
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;
