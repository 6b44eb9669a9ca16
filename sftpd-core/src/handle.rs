//! Handle table: allocates, resolves and releases the opaque,
//! session-scoped identifiers returned by `OPEN`/`OPENDIR`.

use std::collections::HashMap;

use crate::error::SftpError;

/// What a handle refers to: an open file, ready for `READ`/`WRITE`/`FSTAT`,
/// or a directory iterator, ready for `READDIR`.
pub enum HandleKind<File, DirIter> {
    File(File),
    Dir(DirIter),
}

pub struct HandleEntry<File, DirIter> {
    pub kind: HandleKind<File, DirIter>,
    /// The canonicalized name the handle was opened with, kept for
    /// `FSTAT`/hook callbacks and audit.
    pub name: Vec<u8>,
}

/// Maps ASCII-decimal handle strings to their entries.
///
/// The counter increases monotonically and is never reused; a handle string
/// is unique for the life of the process.
pub struct HandleTable<File, DirIter> {
    handles: HashMap<u64, HandleEntry<File, DirIter>>,
    counter: u64,
}

impl<File, DirIter> Default for HandleTable<File, DirIter> {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
            counter: 0,
        }
    }
}

impl<File, DirIter> HandleTable<File, DirIter> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new handle id, inserts its entry and returns the
    /// ASCII-decimal handle string clients will use to refer to it.
    ///
    /// A counter wraparound is a fatal condition: it can only happen
    /// after 2^64 handles have been allocated in one session, at which point
    /// reuse would violate the uniqueness invariant.
    pub fn allocate(&mut self, kind: HandleKind<File, DirIter>, name: Vec<u8>) -> Result<String, SftpError> {
        if self.counter == u64::MAX {
            return Err(SftpError::HandleSpaceExhausted);
        }
        self.counter += 1;
        let id = self.counter;
        self.handles.insert(id, HandleEntry { kind, name });
        Ok(id.to_string())
    }

    fn parse(handle: &[u8]) -> Result<u64, SftpError> {
        std::str::from_utf8(handle)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| SftpError::NotAHandle(String::from_utf8_lossy(handle).into_owned()))
    }

    pub fn get(&self, handle: &[u8]) -> Result<&HandleEntry<File, DirIter>, SftpError> {
        let id = Self::parse(handle)?;
        self.handles
            .get(&id)
            .ok_or_else(|| SftpError::NotAHandle(String::from_utf8_lossy(handle).into_owned()))
    }

    pub fn get_mut(&mut self, handle: &[u8]) -> Result<&mut HandleEntry<File, DirIter>, SftpError> {
        let id = Self::parse(handle)?;
        self.handles
            .get_mut(&id)
            .ok_or_else(|| SftpError::NotAHandle(String::from_utf8_lossy(handle).into_owned()))
    }

    /// Removes the entry. The caller is responsible for closing the backend
    /// object via the storage contract before or as part of this call.
    pub fn release(&mut self, handle: &[u8]) -> Result<HandleEntry<File, DirIter>, SftpError> {
        let id = Self::parse(handle)?;
        self.handles
            .remove(&id)
            .ok_or_else(|| SftpError::NotAHandle(String::from_utf8_lossy(handle).into_owned()))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
