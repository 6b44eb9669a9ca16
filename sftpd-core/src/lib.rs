//! SFTPv3 subsystem server engine.
//!
//! This crate implements the wire protocol, the opaque handle table, the
//! pluggable storage-backend contract, and the request dispatcher. It has no
//! `main`: binaries wire a [`storage::StorageBackend`] to a [`session::Session`]
//! and drive it from a transport (see the `sftpd` crate for the CLI that does
//! exactly that over stdin/stdout).

pub mod attrs;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod hook;
pub mod longname;
pub mod session;
pub mod storage;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use attrs::Attrs;
pub use error::SftpError;
pub use hook::{NoopHook, SftpHook};
pub use session::Session;
pub use storage::{OpenFlags, StorageBackend};
