//! The request dispatcher: opcode constants, per-opcode payload
//! decoding, the storage-backend call, and response encoding.
//!
//! `Session::dispatch` is the only place that touches both wire framing and
//! the storage contract; every other module knows about exactly one of the
//! two.

/// SSH_FXP_* opcodes (SFTPv3).
pub mod opcode {
    pub const INIT: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const OPEN: u8 = 3;
    pub const CLOSE: u8 = 4;
    pub const READ: u8 = 5;
    pub const WRITE: u8 = 6;
    pub const LSTAT: u8 = 7;
    pub const FSTAT: u8 = 8;
    pub const SETSTAT: u8 = 9;
    pub const FSETSTAT: u8 = 10;
    pub const OPENDIR: u8 = 11;
    pub const READDIR: u8 = 12;
    pub const REMOVE: u8 = 13;
    pub const MKDIR: u8 = 14;
    pub const RMDIR: u8 = 15;
    pub const REALPATH: u8 = 16;
    pub const STAT: u8 = 17;
    pub const RENAME: u8 = 18;
    pub const READLINK: u8 = 19;
    pub const SYMLINK: u8 = 20;

    pub const STATUS: u8 = 101;
    pub const HANDLE: u8 = 102;
    pub const DATA: u8 = 103;
    pub const NAME: u8 = 104;
    pub const ATTRS: u8 = 105;

    pub const EXTENDED: u8 = 200;
}

pub const SFTP_VERSION: u32 = 3;
/// Default mode used when a `MKDIR` request carries no `PERMISSIONS`
/// attribute.
pub const DEFAULT_MODE: u32 = 0o777;
/// Default mode used when an `OPEN` request with `CREAT` set carries no
/// `PERMISSIONS` attribute, per the default creation mode of `0o666`.
pub const DEFAULT_OPEN_MODE: u32 = 0o666;
