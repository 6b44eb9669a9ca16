//! The advisory observer interface: one callback per request kind,
//! all no-ops by default.
//!
//! Hooks never influence the outcome of a request; they exist for audit
//! logging, metrics, or a custom reaction layered on top of the engine
//! without forking it. A hook that panics would take the whole session down,
//! so implementors are expected to handle their own errors internally.

use std::path::Path;

use crate::attrs::Attrs;
use crate::storage::OpenFlags;

/// Called once per corresponding request, after the backend call succeeds
/// and before the response is queued. Failed requests do not invoke their
/// hook.
#[allow(unused_variables)]
pub trait SftpHook {
    fn init(&mut self) {}
    fn realpath(&mut self, path: &Path) {}
    fn stat(&mut self, path: &Path) {}
    fn lstat(&mut self, path: &Path) {}
    fn fstat(&mut self, handle: &str) {}
    fn setstat(&mut self, path: &Path, attrs: &Attrs) {}
    fn fsetstat(&mut self, handle: &str, attrs: &Attrs) {}
    fn opendir(&mut self, path: &Path) {}
    fn readdir(&mut self, handle: &str) {}
    fn close(&mut self, handle: &str) {}
    fn open(&mut self, path: &Path, flags: OpenFlags, mode: u32) {}
    fn read(&mut self, handle: &str, offset: u64, size: u32) {}
    fn write(&mut self, handle: &str, offset: u64, len: usize) {}
    fn mkdir(&mut self, path: &Path, mode: u32) {}
    fn rmdir(&mut self, path: &Path) {}
    fn rm(&mut self, path: &Path) {}
    fn rename(&mut self, old: &Path, new: &Path) {}
    fn symlink(&mut self, link: &Path, target: &[u8]) {}
    fn readlink(&mut self, path: &Path) {}
}

/// The hook every [`crate::session::Session`] runs with unless the caller
/// supplies its own.
#[derive(Default)]
pub struct NoopHook;

impl SftpHook for NoopHook {}
