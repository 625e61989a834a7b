use thiserror::Error;

/// All failure kinds surfaced by the storage core.
///
/// Any error raised while a transaction is running means the caller has to
/// abort that transaction through the full abort path (rollback, discard,
/// ABORT record, lock release). I/O failures during rollback or recovery
/// are fatal and halt the process.
#[derive(Error, Debug)]
pub enum DbError {
    /// The lock table gave up on an acquisition, either because the
    /// requester closed a cycle in the wait-for graph or because the
    /// transaction outlived its timeout.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Eviction found no clean victim: every frame holds a page dirtied by
    /// an uncommitted transaction.
    #[error("out of buffer space, all frames hold uncommitted pages")]
    OutOfBufferSpace,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A page image that doesn't parse, has the wrong size, or doesn't
    /// belong to any known table.
    #[error("invalid page: {0}")]
    Page(String),

    /// A tuple that doesn't fit the table schema, or a slot operation on an
    /// empty slot.
    #[error("invalid tuple: {0}")]
    Tuple(String),

    /// A log file whose contents don't parse as a record stream.
    #[error("invalid log: {0}")]
    Log(String),
}
