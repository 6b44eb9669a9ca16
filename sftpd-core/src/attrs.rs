//! The SFTPv3 attribute block: a flag word gating an optional, fixed
//! order of fields. Absent fields mean "no information" on the way out and
//! "do not set" on the way in, so a single `Attrs` struct serves both
//! directions.

use crate::error::SftpError;
use crate::wire::{write_string, write_u32, write_u64, Reader};

/// SSH_FILEXFER_ATTR_* bits.
pub mod flag {
    pub const SIZE: u32 = 0x0000_0001;
    pub const UIDGID: u32 = 0x0000_0002;
    pub const PERMISSIONS: u32 = 0x0000_0004;
    pub const ACMODTIME: u32 = 0x0000_0008;
    pub const EXTENDED: u32 = 0x8000_0000;
}

/// One SFTPv3 attribute block, decoded or about to be encoded.
///
/// `size`/`uid`+`gid`/`perm`/`atime`+`mtime` are independently optional;
/// `uid` and `gid` are only ever set or unset together, same for
/// `atime`/`mtime`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub perm: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub extended: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Attrs {
    pub fn decode(r: &mut Reader) -> Result<Self, SftpError> {
        let flags = r.read_u32()?;
        let mut attrs = Attrs::default();
        if flags & flag::SIZE != 0 {
            attrs.size = Some(r.read_u64()?);
        }
        if flags & flag::UIDGID != 0 {
            attrs.uid = Some(r.read_u32()?);
            attrs.gid = Some(r.read_u32()?);
        }
        if flags & flag::PERMISSIONS != 0 {
            attrs.perm = Some(r.read_u32()?);
        }
        if flags & flag::ACMODTIME != 0 {
            attrs.atime = Some(r.read_u32()?);
            attrs.mtime = Some(r.read_u32()?);
        }
        if flags & flag::EXTENDED != 0 {
            let count = r.read_u32()?;
            for _ in 0..count {
                attrs.extended.push((r.read_string()?, r.read_string()?));
            }
        }
        Ok(attrs)
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= flag::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= flag::UIDGID;
        }
        if self.perm.is_some() {
            flags |= flag::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= flag::ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= flag::EXTENDED;
        }

        write_u32(buf, flags);
        if let Some(size) = self.size {
            write_u64(buf, size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            write_u32(buf, uid);
            write_u32(buf, gid);
        }
        if let Some(perm) = self.perm {
            write_u32(buf, perm);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            write_u32(buf, atime);
            write_u32(buf, mtime);
        }
        if !self.extended.is_empty() {
            write_u32(buf, self.extended.len() as u32);
            for (k, v) in &self.extended {
                write_string(buf, k);
                write_string(buf, v);
            }
        }
    }

    /// The full attribute set the virtual-chroot backend always reports for
    /// an existing file: size, uid/gid, permissions and access/mod times.
    pub fn full(size: u64, uid: u32, gid: u32, perm: u32, atime: u32, mtime: u32) -> Self {
        Attrs {
            size: Some(size),
            uid: Some(uid),
            gid: Some(gid),
            perm: Some(perm),
            atime: Some(atime),
            mtime: Some(mtime),
            extended: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Reader;

    #[test]
    fn round_trips_all_standard_fields() {
        let attrs = Attrs::full(12345, 1000, 1000, 0o100644, 1_700_000_000, 1_700_000_001);
        let mut buf = Vec::new();
        attrs.encode(&mut buf);

        let mut r = Reader::new(&buf);
        let decoded = Attrs::decode(&mut r).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn round_trips_extended_pairs() {
        let mut attrs = Attrs::default();
        attrs.extended.push((b"foo".to_vec(), b"bar".to_vec()));
        let mut buf = Vec::new();
        attrs.encode(&mut buf);

        let mut r = Reader::new(&buf);
        let decoded = Attrs::decode(&mut r).unwrap();
        assert_eq!(decoded.extended, attrs.extended);
    }

    #[test]
    fn absent_fields_round_trip_as_none() {
        let attrs = Attrs::default();
        let mut buf = Vec::new();
        attrs.encode(&mut buf);
        assert_eq!(buf, 0u32.to_be_bytes().to_vec());
    }
}
