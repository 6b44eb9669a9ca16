//! Integration tests for the dispatcher driven against a real
//! [`VirtualChroot`] rooted in a temp directory: one scenario per opcode
//! family plus the jail-escape and error-mapping boundary cases.

use std::collections::HashSet;
use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use sftpd_core::dispatch::{opcode, SFTP_VERSION};
use sftpd_core::error::status;
use sftpd_core::storage::chroot::VirtualChroot;
use sftpd_core::storage::OpenFlags;
use sftpd_core::testing::{
    get_attrs, get_data, get_handle, get_name, get_status, init_request, request, response_type,
    string_field, u32_field, u64_field,
};
use sftpd_core::Session;

fn session() -> (TempDir, Session<VirtualChroot>) {
    let dir = TempDir::new().unwrap();
    let backend = VirtualChroot::new(dir.path()).unwrap();
    (dir, Session::new(backend))
}

fn roundtrip(session: &mut Session<VirtualChroot>, frame: Vec<u8>) -> Vec<u8> {
    session.feed(&frame);
    session.process();
    session.take_output()
}

#[test]
fn init_responds_with_version_3() {
    let (_dir, mut session) = session();
    let out = roundtrip(&mut session, init_request(0, 2));
    assert_eq!(response_type(&out), opcode::VERSION);
    assert_eq!(&out[5..9], &SFTP_VERSION.to_be_bytes());
}

#[test]
fn create_write_read_verify_close() {
    let (dir, mut session) = session();

    let out = roundtrip(
        &mut session,
        request(
            opcode::OPEN,
            1,
            &[
                string_field(b"services"),
                u32_field(OpenFlags::CREAT | OpenFlags::WRITE | OpenFlags::READ),
                u32_field(sftpd_core::attrs::flag::PERMISSIONS),
                u32_field(0o644),
            ],
        ),
    );
    let handle = get_handle(&out);

    let content = b"ssh             22/tcp\nsftp            115/tcp\n".to_vec();
    let out = roundtrip(
        &mut session,
        request(
            opcode::WRITE,
            2,
            &[
                string_field(&handle),
                u64_field(0),
                string_field(&content),
            ],
        ),
    );
    assert_eq!(get_status(&out), (2, status::OK));

    let out = roundtrip(
        &mut session,
        request(
            opcode::READ,
            3,
            &[
                string_field(&handle),
                u64_field(0),
                u32_field(content.len() as u32),
            ],
        ),
    );
    assert_eq!(get_data(&out), content);

    let out = roundtrip(
        &mut session,
        request(
            opcode::READ,
            4,
            &[
                string_field(&handle),
                u64_field(content.len() as u64),
                u32_field(1),
            ],
        ),
    );
    assert_eq!(get_status(&out), (4, status::EOF));

    let out = roundtrip(&mut session, request(opcode::CLOSE, 5, &[string_field(&handle)]));
    assert_eq!(get_status(&out), (5, status::OK));

    let on_disk = fs::read(dir.path().join("services")).unwrap();
    assert_eq!(on_disk, content);
    let mode = fs::metadata(dir.path().join("services")).unwrap().permissions();
    assert_eq!(
        std::os::unix::fs::PermissionsExt::mode(&mode) & 0o777,
        0o644
    );
}

#[test]
fn setstat_applies_size_permissions_and_times() {
    let (dir, mut session) = session();
    let out = roundtrip(
        &mut session,
        request(
            opcode::OPEN,
            1,
            &[
                string_field(b"services"),
                u32_field(OpenFlags::CREAT | OpenFlags::WRITE),
                u32_field(0),
            ],
        ),
    );
    let handle = get_handle(&out);
    roundtrip(&mut session, request(opcode::CLOSE, 2, &[string_field(&handle)]));

    let atime: u32 = 1_415_626_110;
    let mtime: u32 = 1_415_626_120;
    let size: u64 = 100;
    let attrs_flags = sftpd_core::attrs::flag::SIZE
        | sftpd_core::attrs::flag::PERMISSIONS
        | sftpd_core::attrs::flag::ACMODTIME;
    let out = roundtrip(
        &mut session,
        request(
            opcode::SETSTAT,
            3,
            &[
                string_field(b"services"),
                u32_field(attrs_flags),
                u64_field(size),
                u32_field(0o100600),
                u32_field(atime),
                u32_field(mtime),
            ],
        ),
    );
    assert_eq!(get_status(&out), (3, status::OK));

    let meta = fs::metadata(dir.path().join("services")).unwrap();
    use std::os::unix::fs::MetadataExt;
    assert_eq!(meta.len(), size);
    assert_eq!(meta.mode() & 0o777, 0o600);
    assert_eq!(meta.atime() as u32, atime);
    assert_eq!(meta.mtime() as u32, mtime);
}

#[test]
fn directory_listing_includes_dot_entries_and_children() {
    let (dir, mut session) = session();
    fs::create_dir(dir.path().join("foo")).unwrap();
    fs::write(dir.path().join("foo/bar"), b"foobar\n").unwrap();

    let out = roundtrip(&mut session, request(opcode::OPENDIR, 1, &[string_field(b"foo")]));
    let handle = get_handle(&out);

    let mut seen = HashSet::new();
    let mut id = 2;
    loop {
        let out = roundtrip(&mut session, request(opcode::READDIR, id, &[string_field(&handle)]));
        match response_type(&out) {
            t if t == opcode::NAME => {
                let (name, _long_name, _attrs) = get_name(&out);
                seen.insert(name);
            }
            t if t == opcode::STATUS => {
                assert_eq!(get_status(&out), (id, status::EOF));
                break;
            }
            other => panic!("unexpected response type {other}"),
        }
        id += 1;
    }

    let expected: HashSet<Vec<u8>> = [b".".to_vec(), b"..".to_vec(), b"bar".to_vec()].into();
    assert_eq!(seen, expected);
}

#[test]
fn jail_escape_is_rejected_for_relative_and_absolute_paths() {
    let (_dir, mut session) = session();

    let out = roundtrip(
        &mut session,
        request(opcode::MKDIR, 1, &[string_field(b"../foo"), u32_field(0)]),
    );
    assert_eq!(get_status(&out), (1, status::PERMISSION_DENIED));

    let out = roundtrip(
        &mut session,
        request(
            opcode::OPEN,
            2,
            &[
                string_field(b"/etc/services"),
                u32_field(OpenFlags::CREAT),
                u32_field(0),
            ],
        ),
    );
    assert_eq!(get_status(&out), (2, status::PERMISSION_DENIED));
}

#[test]
fn exclusive_create_collision_fails() {
    let (_dir, mut session) = session();
    let out = roundtrip(
        &mut session,
        request(
            opcode::OPEN,
            1,
            &[
                string_field(b"services"),
                u32_field(OpenFlags::CREAT),
                u32_field(0),
            ],
        ),
    );
    let handle = get_handle(&out);
    roundtrip(&mut session, request(opcode::CLOSE, 2, &[string_field(&handle)]));

    let out = roundtrip(
        &mut session,
        request(
            opcode::OPEN,
            3,
            &[
                string_field(b"services"),
                u32_field(OpenFlags::CREAT | OpenFlags::EXCL),
                u32_field(0),
            ],
        ),
    );
    assert_eq!(get_status(&out), (3, status::FAILURE));
}

#[test]
fn mkdir_under_missing_parent_is_not_found() {
    let (_dir, mut session) = session();
    let out = roundtrip(
        &mut session,
        request(opcode::MKDIR, 1, &[string_field(b"bad/ugly"), u32_field(0)]),
    );
    assert_eq!(get_status(&out), (1, status::NO_SUCH_FILE));
}

#[test]
fn remove_of_nonexistent_file_is_not_found() {
    let (_dir, mut session) = session();
    let out = roundtrip(&mut session, request(opcode::REMOVE, 1, &[string_field(b"services")]));
    assert_eq!(get_status(&out), (1, status::NO_SUCH_FILE));
}

#[test]
fn unknown_opcode_is_unsupported() {
    let (_dir, mut session) = session();
    let out = roundtrip(&mut session, request(250, 1, &[]));
    assert_eq!(get_status(&out), (1, status::OP_UNSUPPORTED));
}

#[test]
fn rename_refuses_existing_target_then_succeeds_on_fresh_name() {
    let (dir, mut session) = session();
    fs::write(dir.path().join("a"), b"a").unwrap();
    fs::write(dir.path().join("b"), b"b").unwrap();

    let out = roundtrip(
        &mut session,
        request(opcode::RENAME, 1, &[string_field(b"a"), string_field(b"b")]),
    );
    assert_eq!(get_status(&out), (1, status::FAILURE));

    let out = roundtrip(
        &mut session,
        request(opcode::RENAME, 2, &[string_field(b"a"), string_field(b"c")]),
    );
    assert_eq!(get_status(&out), (2, status::OK));
    assert!(dir.path().join("c").exists());
    assert!(!dir.path().join("a").exists());
}

#[test]
fn rename_back_and_forth_is_identity_on_listing() {
    let (dir, mut session) = session();
    fs::write(dir.path().join("a"), b"a").unwrap();

    roundtrip(
        &mut session,
        request(opcode::RENAME, 1, &[string_field(b"a"), string_field(b"b")]),
    );
    roundtrip(
        &mut session,
        request(opcode::RENAME, 2, &[string_field(b"b"), string_field(b"a")]),
    );
    assert!(dir.path().join("a").exists());
}

#[test]
fn symlink_then_readlink_round_trips_target() {
    let (_dir, mut session) = session();
    let out = roundtrip(
        &mut session,
        request(
            opcode::SYMLINK,
            1,
            &[string_field(b"link"), string_field(b"target-name")],
        ),
    );
    assert_eq!(get_status(&out), (1, status::OK));

    let out = roundtrip(&mut session, request(opcode::READLINK, 2, &[string_field(b"link")]));
    let (name, _long_name, _attrs) = get_name(&out);
    assert_eq!(name, b"target-name");
}

#[test]
fn realpath_of_empty_name_resolves_to_jail_root() {
    let (dir, mut session) = session();
    let out = roundtrip(&mut session, request(opcode::REALPATH, 1, &[string_field(b"")]));
    let (name, _long_name, _attrs) = get_name(&out);
    assert_eq!(
        String::from_utf8(name).unwrap(),
        fs::canonicalize(dir.path()).unwrap().to_string_lossy()
    );
}

#[test]
fn stat_reports_size_and_permissions() {
    let (dir, mut session) = session();
    fs::write(dir.path().join("f"), b"12345").unwrap();

    let out = roundtrip(&mut session, request(opcode::STAT, 1, &[string_field(b"f")]));
    let attrs = get_attrs(&out);
    assert_eq!(attrs.size, Some(5));
}

#[test]
fn mkdir_without_permissions_attr_creates_the_directory() {
    let (dir, mut session) = session();
    let out = roundtrip(&mut session, request(opcode::MKDIR, 1, &[string_field(b"d"), u32_field(0)]));
    assert_eq!(get_status(&out), (1, status::OK));
    assert!(dir.path().join("d").is_dir());
}

#[test]
fn open_then_close_restores_handle_table_size() {
    let (_dir, mut session) = session();
    let out = roundtrip(
        &mut session,
        request(
            opcode::OPEN,
            1,
            &[string_field(b"f"), u32_field(OpenFlags::CREAT), u32_field(0)],
        ),
    );
    let handle = get_handle(&out);
    let out = roundtrip(&mut session, request(opcode::CLOSE, 2, &[string_field(&handle)]));
    assert_eq!(get_status(&out), (2, status::OK));

    let out = roundtrip(&mut session, request(opcode::FSTAT, 3, &[string_field(&handle)]));
    assert_eq!(get_status(&out), (3, status::FAILURE));
}

#[test]
fn zero_length_frame_is_malformed_not_a_panic() {
    let (_dir, mut session) = session();
    // A length prefix of 0 leaves no room for an opcode byte.
    session.feed(&0u32.to_be_bytes());
    let fatal = session.process();
    assert!(fatal, "a zero-length frame must be treated as malformed and end the session");
}

#[test]
fn pump_stops_reading_after_a_fatal_frame() {
    let (_dir, mut session) = session();
    // A zero-length frame followed by a well-formed INIT request: pump()
    // must end the session on the first, fatal frame and never see the
    // second.
    let mut input = 0u32.to_be_bytes().to_vec();
    input.extend_from_slice(&init_request(0, 2));
    let mut output = Vec::new();
    session.pump(&input[..], &mut output).unwrap();
    assert!(
        output.is_empty(),
        "a fatal frame must end the session before any later request is served"
    );
}
