mod dir;
mod error;
mod path;
mod spool;
mod sqlar;

use std::io::{Read, Write};

pub use dir::DirFs;
pub use error::FsError;
pub use path::{base_name, is_child_of, normalize, parent};
pub use spool::{SpooledBuffer, ROLLOVER_THRESHOLD};
pub use sqlar::SqlarFs;

/// Metadata for one evidence filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStat {
    /// Normalized absolute name (leading `/`).
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// POSIX permission bits.
    pub mode: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    pub is_dir: bool,
}

/// How to open an existing or new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read an existing entry; missing entries are `NotFound`.
    Read,
    /// Rewrite an existing entry; missing entries are `NotFound`.
    ReadWrite,
    /// Rewrite an entry, creating it when missing.
    ReadCreate,
}

/// An open handle, reader or writer depending on the requested mode.
pub enum FsHandle {
    Reader(Box<dyn EvidenceReader>),
    Writer(Box<dyn EvidenceWriter>),
}

/// Streaming reader over an evidence file.
///
/// Random access is deliberately unsupported: archive entries are DEFLATE
/// streams.
pub trait EvidenceReader: Read + Send {
    fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> Result<usize, FsError> {
        Err(FsError::NotImplemented { operation: "read_at" })
    }

    fn seek(&mut self, _offset: u64) -> Result<u64, FsError> {
        Err(FsError::NotImplemented { operation: "seek" })
    }
}

/// Streaming writer over an evidence file.
///
/// The entry body is finalized by [`EvidenceWriter::close`]; dropping an
/// unclosed writer finalizes best-effort and logs failures.
pub trait EvidenceWriter: Write + Send {
    fn write_at(&mut self, _buf: &[u8], _offset: u64) -> Result<usize, FsError> {
        Err(FsError::NotImplemented { operation: "write_at" })
    }

    fn truncate(&mut self, _size: u64) -> Result<(), FsError> {
        Err(FsError::NotImplemented { operation: "truncate" })
    }

    fn close(self: Box<Self>) -> Result<(), FsError>;
}

/// The filesystem contract shared by the embedded archive and the host
/// directory backend. All names pass through [`normalize`].
pub trait EvidenceFs: Send + Sync {
    /// Create or truncate a file, returning a write handle.
    fn create(&self, name: &str) -> Result<Box<dyn EvidenceWriter>, FsError>;

    /// Open a file for reading.
    fn open(&self, name: &str) -> Result<Box<dyn EvidenceReader>, FsError>;

    /// Open with an explicit mode.
    fn open_mode(&self, name: &str, mode: OpenMode) -> Result<FsHandle, FsError>;

    fn stat(&self, name: &str) -> Result<EntryStat, FsError>;

    /// Immediate children of a directory, sorted by name.
    fn readdir(&self, name: &str) -> Result<Vec<EntryStat>, FsError>;

    /// Depth-first traversal in lexical order, starting at `root`
    /// (inclusive).
    fn walk(&self, root: &str) -> Result<Vec<EntryStat>, FsError>;

    /// Insert a single directory entry; existing names are rejected.
    fn mkdir(&self, name: &str, mode: u32) -> Result<(), FsError>;

    /// Create a directory and all missing ancestors, idempotently.
    fn mkdir_all(&self, name: &str) -> Result<(), FsError>;

    fn chmod(&self, name: &str, mode: u32) -> Result<(), FsError>;

    fn chtimes(&self, name: &str, mtime: i64) -> Result<(), FsError>;

    /// Rename a single entry.
    fn rename(&self, old: &str, new: &str) -> Result<(), FsError>;

    /// Remove a single entry.
    fn remove(&self, name: &str) -> Result<(), FsError>;

    /// Remove an entry and everything below it.
    fn remove_all(&self, name: &str) -> Result<(), FsError>;
}
