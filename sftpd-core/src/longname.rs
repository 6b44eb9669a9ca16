//! `ls -l`-style long-name rendering for `NAME` responses.
//!
//! Column widths are fixed at 10, 3, 8, 8, 9, 12 characters (left-aligned,
//! single-space-joined), then the file name. Clients such as FileZilla parse
//! this string to build their directory view, so the exact shape must not
//! drift.

use std::os::unix::fs::MetadataExt;

use nix::unistd::{Gid, Group, Uid, User};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const TIMESTAMP_FORMAT: &[FormatItem<'_>] = format_description!("[month repr:short] [day padding:zero] [hour]:[minute]");

const COLUMN_WIDTHS: [usize; 6] = [10, 3, 8, 8, 9, 12];

/// The ten-character mode string: file-type character followed by three
/// rwx triplets, with set-uid/set-gid/sticky substitutions.
pub fn filemode(mode: u32) -> String {
    const S_IFMT: u32 = 0o170000;
    const S_IFLNK: u32 = 0o120000;
    const S_IFREG: u32 = 0o100000;
    const S_IFBLK: u32 = 0o060000;
    const S_IFDIR: u32 = 0o040000;
    const S_IFCHR: u32 = 0o020000;
    const S_IFIFO: u32 = 0o010000;

    let file_type = match mode & S_IFMT {
        S_IFLNK => 'l',
        S_IFREG => '-',
        S_IFBLK => 'b',
        S_IFDIR => 'd',
        S_IFCHR => 'c',
        S_IFIFO => 'p',
        _ => '-',
    };

    let mut perm = String::with_capacity(10);
    perm.push(file_type);

    perm.push(if mode & 0o400 != 0 { 'r' } else { '-' });
    perm.push(if mode & 0o200 != 0 { 'w' } else { '-' });
    perm.push(exec_char(mode & 0o100 != 0, mode & 0o4000 != 0, 's', 'S'));

    perm.push(if mode & 0o040 != 0 { 'r' } else { '-' });
    perm.push(if mode & 0o020 != 0 { 'w' } else { '-' });
    perm.push(exec_char(mode & 0o010 != 0, mode & 0o2000 != 0, 's', 'S'));

    perm.push(if mode & 0o004 != 0 { 'r' } else { '-' });
    perm.push(if mode & 0o002 != 0 { 'w' } else { '-' });
    perm.push(exec_char(mode & 0o001 != 0, mode & 0o1000 != 0, 't', 'T'));

    perm
}

fn exec_char(exec: bool, special: bool, exec_and_special: char, special_only: char) -> char {
    match (exec, special) {
        (true, true) => exec_and_special,
        (false, true) => special_only,
        (true, false) => 'x',
        (false, false) => '-',
    }
}

fn pad(field: &str, width: usize) -> String {
    if field.len() >= width {
        field.to_string()
    } else {
        format!("{field}{}", " ".repeat(width - field.len()))
    }
}

fn user_name(uid: u32) -> String {
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| uid.to_string())
}

fn group_name(gid: u32) -> String {
    Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|g| g.name)
        .unwrap_or_else(|| gid.to_string())
}

/// Builds the long-name string for `name`, given its `st_mode`/`st_nlink`/
/// `st_uid`/`st_gid`/`st_size`/`st_mtime` (taken from a `std::fs::Metadata`).
pub fn render(meta: &std::fs::Metadata, name: &[u8]) -> Vec<u8> {
    let timestamp = OffsetDateTime::from_unix_timestamp(meta.mtime())
        .ok()
        .and_then(|t| t.format(TIMESTAMP_FORMAT).ok())
        .unwrap_or_else(|| "??? ?? ??:??".to_string());

    let fields = [
        filemode(meta.mode()),
        meta.nlink().to_string(),
        user_name(meta.uid()),
        group_name(meta.gid()),
        meta.size().to_string(),
        timestamp,
    ];

    let mut out = String::new();
    for (field, width) in fields.iter().zip(COLUMN_WIDTHS) {
        out.push_str(&pad(field, width));
        out.push(' ');
    }
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(name);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filemode_renders_regular_file_permissions() {
        assert_eq!(filemode(0o100644), "-rw-r--r--");
        assert_eq!(filemode(0o040755), "drwxr-xr-x");
    }

    #[test]
    fn filemode_renders_setuid_setgid_sticky() {
        assert_eq!(filemode(0o104755), "-rwsr-xr-x");
        assert_eq!(filemode(0o102755), "-rwxr-sr-x");
        assert_eq!(filemode(0o101755), "-rwxr-xr-t");
        // set-bit without the backing execute bit renders uppercase
        assert_eq!(filemode(0o104645), "-rwSr--r-x");
    }

    #[test]
    fn filemode_renders_symlink() {
        assert_eq!(filemode(0o120777), "lrwxrwxrwx");
    }
}
