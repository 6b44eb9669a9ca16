//! Synthetic request builders and response parsers, feature-gated behind
//! `testing` so downstream crates can write protocol-level tests against a
//! [`crate::session::Session`] without reimplementing the wire format.
//!
//! One builder per request opcode's wire shape, one parser per response
//! shape.

use crate::attrs::Attrs;
use crate::dispatch::opcode;
use crate::wire::{frame, write_string, write_u32, write_u64, Reader};

pub fn string_field(s: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_string(&mut buf, s);
    buf
}

pub fn u32_field(n: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, n);
    buf
}

pub fn u64_field(n: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u64(&mut buf, n);
    buf
}

/// Builds one complete framed request: opcode byte, request id, then each
/// already-encoded field concatenated in order.
pub fn request(op: u8, id: u32, fields: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = vec![op];
    write_u32(&mut payload, id);
    for field in fields {
        payload.extend_from_slice(field);
    }
    frame(payload)
}

pub fn init_request(id_unused: u32, version: u32) -> Vec<u8> {
    // INIT carries no request id on the wire; the version number is the
    // only payload. `id_unused` exists only so call sites read
    // the same shape as every other `*_request` helper.
    let _ = id_unused;
    let mut payload = vec![opcode::INIT];
    write_u32(&mut payload, version);
    frame(payload)
}

struct Frame<'a> {
    msg_type: u8,
    id: u32,
    rest: Reader<'a>,
}

/// Splits one framed response out of `blob` (assumes `blob` holds exactly
/// one frame, which is how these helpers are used in tests).
fn parse_frame(blob: &[u8]) -> Frame<'_> {
    let msg_type = blob[4];
    let mut rest = Reader::new(&blob[5..]);
    let id = rest.read_u32().expect("response too short for a request id");
    Frame { msg_type, id, rest }
}

pub fn response_type(blob: &[u8]) -> u8 {
    blob[4]
}

pub fn get_status(blob: &[u8]) -> (u32, u32) {
    let mut f = parse_frame(blob);
    assert_eq!(f.msg_type, opcode::STATUS, "expected a STATUS response");
    let code = f.rest.read_u32().expect("status code");
    (f.id, code)
}

pub fn get_handle(blob: &[u8]) -> Vec<u8> {
    let mut f = parse_frame(blob);
    assert_eq!(f.msg_type, opcode::HANDLE, "expected a HANDLE response");
    f.rest.read_string().expect("handle string")
}

pub fn get_attrs(blob: &[u8]) -> Attrs {
    let mut f = parse_frame(blob);
    assert_eq!(f.msg_type, opcode::ATTRS, "expected an ATTRS response");
    Attrs::decode(&mut f.rest).expect("attribute block")
}

pub fn get_data(blob: &[u8]) -> Vec<u8> {
    let mut f = parse_frame(blob);
    assert_eq!(f.msg_type, opcode::DATA, "expected a DATA response");
    f.rest.read_string().expect("data chunk")
}

/// Returns `(name, long_name, attrs)` for the first (and typically only)
/// entry of a NAME response.
pub fn get_name(blob: &[u8]) -> (Vec<u8>, Vec<u8>, Attrs) {
    let mut f = parse_frame(blob);
    assert_eq!(f.msg_type, opcode::NAME, "expected a NAME response");
    let count = f.rest.read_u32().expect("entry count");
    assert!(count >= 1, "NAME response carried zero entries");
    let name = f.rest.read_string().expect("name");
    let long_name = f.rest.read_string().expect("long name");
    let attrs = Attrs::decode(&mut f.rest).expect("attrs");
    (name, long_name, attrs)
}
