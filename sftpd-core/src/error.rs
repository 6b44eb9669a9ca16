//! The error taxonomy and its mapping onto SFTP status codes.

use std::io;

/// SSH_FXP_STATUS codes used by this server (SFTPv3).
pub mod status {
    pub const OK: u32 = 0;
    pub const EOF: u32 = 1;
    pub const NO_SUCH_FILE: u32 = 2;
    pub const PERMISSION_DENIED: u32 = 3;
    pub const FAILURE: u32 = 4;
    pub const OP_UNSUPPORTED: u32 = 8;
}

/// A failure raised while servicing one request.
///
/// `Malformed` and `HandleSpaceExhausted` are fatal: they tear the session
/// down rather than becoming a status frame (see [`SftpError::is_fatal`]).
#[derive(thiserror::Error, Debug)]
pub enum SftpError {
    /// `verify` rejected a path: escape attempt or absolute path outside the jail.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Target name does not exist, or the OS reported ENOENT.
    #[error("no such file: {0}")]
    NotFound(String),

    /// A handle string was not found in the handle table.
    #[error("not a handle: {0}")]
    NotAHandle(String),

    /// A request payload failed to decode. Fatal: tears the session down.
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    /// No handler is registered for the opcode.
    #[error("unsupported operation")]
    Unsupported,

    /// Any other backend failure, including I/O errors that aren't ENOENT.
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// The handle counter would wrap past u64::MAX. Fatal.
    #[error("handle space exhausted")]
    HandleSpaceExhausted,
}

impl SftpError {
    /// Fatal errors abort the session instead of producing a status frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SftpError::Malformed(_) | SftpError::HandleSpaceExhausted
        )
    }

    /// The SSH_FXP_STATUS code this error surfaces as.
    pub fn status_code(&self) -> u32 {
        match self {
            SftpError::Forbidden(_) => status::PERMISSION_DENIED,
            SftpError::NotFound(_) => status::NO_SUCH_FILE,
            SftpError::NotAHandle(_) => status::FAILURE,
            SftpError::Unsupported => status::OP_UNSUPPORTED,
            SftpError::BackendFailure(_) => status::FAILURE,
            // Fatal kinds never reach response encoding; code is irrelevant but
            // must still exist for exhaustiveness.
            SftpError::Malformed(_) => status::FAILURE,
            SftpError::HandleSpaceExhausted => status::FAILURE,
        }
    }

    /// Optional human-readable message carried on the STATUS frame.
    pub fn message(&self) -> Option<String> {
        match self {
            SftpError::Forbidden(m) | SftpError::NotFound(m) | SftpError::BackendFailure(m) => {
                Some(m.clone())
            }
            _ => None,
        }
    }
}

/// `NOT_FOUND` and the filesystem's "no such entry" error share a status
/// code; this is the one place that distinction collapses, treating a bare
/// `ENOENT` as "no such file" and everything else as a generic backend
/// failure.
impl From<io::Error> for SftpError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            SftpError::NotFound(err.to_string())
        } else {
            SftpError::BackendFailure(err.to_string())
        }
    }
}

impl From<nix::Error> for SftpError {
    fn from(err: nix::Error) -> Self {
        if err == nix::Error::ENOENT {
            SftpError::NotFound(err.to_string())
        } else {
            SftpError::BackendFailure(err.to_string())
        }
    }
}
