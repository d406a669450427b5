use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("kv engine is closed")]
    Closed,
    #[error("transaction is closed")]
    TxnClosed,
    #[error("transaction is read-only")]
    TxnReadOnly,
    #[error("transaction conflict, please retry")]
    TxnConflict,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt store: {0}")]
    Corruption(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sled::Error> for KvError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Corruption { .. } => KvError::Corruption(err.to_string()),
            sled::Error::Io(e) => KvError::Io(e),
            other => KvError::Storage(other.to_string()),
        }
    }
}

impl KvError {
    /// Conflicts are the only errors a caller is expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::TxnConflict)
    }
}
