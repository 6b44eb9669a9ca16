//! The storage contract: the capability set every backend implements.
//!
//! Expressed as a plain trait rather than an inheritance hierarchy. A
//! backend picks concrete `File`/`DirIter` types and the engine is generic
//! over them.

pub mod chroot;

use std::path::{Path, PathBuf};

use crate::attrs::Attrs;
use crate::error::SftpError;

/// SSH_FXF_* open flags, decoded from the raw `u32` on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub creat: bool,
    pub trunc: bool,
    pub excl: bool,
}

impl OpenFlags {
    pub const READ: u32 = 0x01;
    pub const WRITE: u32 = 0x02;
    pub const APPEND: u32 = 0x04;
    pub const CREAT: u32 = 0x08;
    pub const TRUNC: u32 = 0x10;
    pub const EXCL: u32 = 0x20;

    pub fn from_raw(flags: u32) -> Self {
        OpenFlags {
            read: flags & Self::READ != 0,
            write: flags & Self::WRITE != 0,
            append: flags & Self::APPEND != 0,
            creat: flags & Self::CREAT != 0,
            trunc: flags & Self::TRUNC != 0,
            excl: flags & Self::EXCL != 0,
        }
    }
}

/// A name and its attributes, as returned by `stat`/`lstat`/`REALPATH`/
/// directory enumeration. `long_name` is the `ls -l`-style rendering;
/// it is absent for `fstat` results, which don't need one.
pub struct FileInfo {
    pub attrs: Attrs,
    pub long_name: Vec<u8>,
}

/// Any backend a [`crate::session::Session`] can delegate to.
///
/// File names are byte strings as received on the wire; a backend owns any
/// character-set interpretation. Every operation either returns a value or
/// fails with one of the [`SftpError`] kinds.
pub trait StorageBackend {
    /// A live file handle, kept in the handle table between `OPEN`/`CLOSE`.
    type File: std::io::Read + std::io::Write + std::os::unix::io::AsRawFd;
    /// A finite, non-restartable sequence of directory entry names: the
    /// backend is responsible for seeding it with `.` and `..`.
    type DirIter: Iterator<Item = Vec<u8>>;

    /// Verifies the caller may access `name`, and resolves it to the
    /// canonical path every other operation should be called with. Must be
    /// invoked before any name-based operation, since it is the only defense
    /// against a time-of-check-to-time-of-use race introduced by a symlink
    /// mutated between calls.
    fn verify(&self, name: &[u8]) -> Result<PathBuf, SftpError>;

    fn stat(&self, path: &Path, lstat: bool) -> Result<FileInfo, SftpError>;
    fn fstat(&self, file: &Self::File) -> Result<Attrs, SftpError>;

    fn setstat(&self, path: &Path, attrs: &Attrs) -> Result<(), SftpError>;
    fn fsetstat(&self, file: &mut Self::File, attrs: &Attrs) -> Result<(), SftpError>;

    fn opendir(&self, path: &Path) -> Result<Self::DirIter, SftpError>;
    fn open(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Self::File, SftpError>;

    fn read(&self, file: &mut Self::File, offset: u64, size: u32) -> Result<Vec<u8>, SftpError>;
    fn write(&self, file: &mut Self::File, offset: u64, chunk: &[u8]) -> Result<(), SftpError>;

    /// Closing is idempotent in practice; errors here are non-fatal.
    fn close(&self, file: Self::File) -> Result<(), SftpError>;

    fn mkdir(&self, path: &Path, mode: u32) -> Result<(), SftpError>;
    fn rmdir(&self, path: &Path) -> Result<(), SftpError>;
    fn rm(&self, path: &Path) -> Result<(), SftpError>;

    /// Refuses if `new` already exists, per SFTPv3 semantics.
    fn rename(&self, old: &Path, new: &Path) -> Result<(), SftpError>;

    /// Argument order is (new link path, existing target). `target`
    /// is stored verbatim and is not itself verified: it need not resolve to
    /// anything inside the jail (dangling and out-of-jail symlinks are both
    /// legal to create, same as a shell's `ln -s`).
    fn symlink(&self, link: &Path, target: &[u8]) -> Result<(), SftpError>;

    fn readlink(&self, path: &Path) -> Result<Vec<u8>, SftpError>;
}
