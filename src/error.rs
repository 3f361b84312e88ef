use vsfs_types::{BlockNo, InodeNo};

/// Internal error channel for the storage stack.
///
/// Every operation in [`block`](crate::block), [`inode`](crate::inode) and
/// [`dir`](crate::dir) returns one of these variants. [`crate::Storage`]
/// surfaces them unchanged; an external FUSE-style bridge collapsing this
/// API to a single `-1`/`None` error channel is out of scope here.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("out of free blocks")]
    NoSpace,
    #[error("out of free inodes")]
    NoInodes,
    #[error("no such file or directory")]
    NotFound,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("inode {0} is not valid")]
    InvalidState(InodeNo),
    #[error("block index {0} out of range")]
    BlockOutOfRange(BlockNo),
    #[error("backing image I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
