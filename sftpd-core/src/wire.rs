//! Framing codec: big-endian scalars, length-prefixed strings, and the
//! attribute block, over a cursor into the current request payload.
//!
//! Encoding never truncates; every length prefix is computed from the bytes
//! that follow it, never assumed in advance.

use crate::attrs::Attrs;
use crate::error::SftpError;

/// A read-only cursor into a request payload.
///
/// Every `read_*` method advances the cursor past what it consumed. Reading
/// past the end of the payload is `Malformed`: the framer and the
/// decoder have disagreed about a length, which is a fatal session error.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SftpError> {
        if self.remaining() < n {
            return Err(SftpError::Malformed("read past end of payload"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32, SftpError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, SftpError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_string(&mut self) -> Result<Vec<u8>, SftpError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_attrs(&mut self) -> Result<Attrs, SftpError> {
        Attrs::decode(self)
    }
}

pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_string(buf: &mut Vec<u8>, value: &[u8]) {
    write_u32(buf, value.len() as u32);
    buf.extend_from_slice(value);
}

/// Wraps `payload` in the 32-bit big-endian length prefix that makes it a
/// complete framed message, ready to append to the session's output buffer.
pub fn frame(payload: Vec<u8>) -> Vec<u8> {
    let mut msg = Vec::with_capacity(payload.len() + 4);
    write_u32(&mut msg, payload.len() as u32);
    msg.extend_from_slice(&payload);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars_and_strings() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xdead_beef);
        write_u64(&mut buf, 0x0102_0304_0506_0708);
        write_string(&mut buf, b"hello");

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.read_string().unwrap(), b"hello");
    }

    #[test]
    fn reading_past_the_end_is_malformed() {
        let buf = vec![0u8, 0, 0];
        let mut r = Reader::new(&buf);
        assert!(matches!(r.read_u32(), Err(SftpError::Malformed(_))));
    }

    #[test]
    fn frame_length_prefix_matches_payload_length() {
        let payload = vec![1, 2, 3, 4, 5];
        let framed = frame(payload.clone());
        assert_eq!(&framed[0..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&framed[4..], &payload[..]);
    }
}
