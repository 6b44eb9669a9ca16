//! The reference backend: a virtual chroot rooted at a directory on the
//! real filesystem, enforced by path canonicalization rather than an actual
//! `chroot(2)` call (no privilege is required to run it).

use std::fs::{self, DirBuilder};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{self, OFlag};
use nix::sys::stat::{self, Mode};
use nix::unistd;

use crate::attrs::Attrs;
use crate::error::SftpError;
use crate::longname;

use super::{FileInfo, OpenFlags, StorageBackend};

/// An open regular file, seekable per-operation so `READ`/`WRITE` offsets
/// don't depend on any implicit file-position state between calls.
pub struct ChrootFile(fs::File);

impl Read for ChrootFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for ChrootFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl AsRawFd for ChrootFile {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Entries already collected at `OPENDIR` time: the iterator is a
/// one-shot, non-restartable snapshot, seeded with `.` and `..`.
pub struct ChrootDirIter(std::vec::IntoIter<Vec<u8>>);

impl Iterator for ChrootDirIter {
    type Item = Vec<u8>;
    fn next(&mut self) -> Option<Vec<u8>> {
        self.0.next()
    }
}

/// Roots the jail at `home`, canonicalized once at construction.
pub struct VirtualChroot {
    home: PathBuf,
}

impl VirtualChroot {
    /// Resolves `home` to its canonical form and `chdir`s into it. The
    /// working directory change means any relative path the caller later
    /// passes in is relative to the jail root, not wherever the process
    /// happened to start.
    pub fn new(home: impl AsRef<Path>) -> Result<Self, SftpError> {
        let home = fs::canonicalize(home.as_ref())?;
        unistd::chdir(&home).map_err(SftpError::from)?;
        Ok(VirtualChroot { home })
    }

    /// Sets the process umask for every file/directory this backend creates
    /// from here on (CLI `--umask`).
    pub fn set_umask(mode: u32) {
        let _ = stat::umask(Mode::from_bits_truncate(mode));
    }

    fn stat_to_attrs(meta: &fs::Metadata) -> Attrs {
        Attrs::full(
            meta.size(),
            meta.uid(),
            meta.gid(),
            meta.mode(),
            meta.atime() as u32,
            meta.mtime() as u32,
        )
    }
}

impl StorageBackend for VirtualChroot {
    type File = ChrootFile;
    type DirIter = ChrootDirIter;

    /// The security perimeter: canonicalize, then accept iff the
    /// result is the jail root itself or a path under it. Deliberately
    /// post-canonicalization, so a symlink planted inside the jail that
    /// points outside it is caught here rather than by refusing symlinks
    /// outright.
    fn verify(&self, name: &[u8]) -> Result<PathBuf, SftpError> {
        let raw = Path::new(std::ffi::OsStr::from_bytes(name));
        let candidate = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.home.join(raw)
        };
        let resolved = canonicalize_lenient(&candidate)?;
        if resolved == self.home || resolved.starts_with(&self.home) {
            Ok(resolved)
        } else {
            Err(SftpError::Forbidden(String::from_utf8_lossy(name).into_owned()))
        }
    }

    fn stat(&self, path: &Path, lstat: bool) -> Result<FileInfo, SftpError> {
        let meta = if lstat {
            fs::symlink_metadata(path)?
        } else {
            fs::metadata(path)?
        };
        let attrs = Self::stat_to_attrs(&meta);
        let name = entry_name(path);
        let long_name = longname::render(&meta, &name);
        Ok(FileInfo { attrs, long_name })
    }

    fn fstat(&self, file: &Self::File) -> Result<Attrs, SftpError> {
        let meta = file.0.metadata()?;
        Ok(Self::stat_to_attrs(&meta))
    }

    fn setstat(&self, path: &Path, attrs: &Attrs) -> Result<(), SftpError> {
        if let Some(size) = attrs.size {
            let file = fs::OpenOptions::new().write(true).open(path)?;
            file.set_len(size)?;
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            unistd::chown(path, Some(unistd::Uid::from_raw(uid)), Some(unistd::Gid::from_raw(gid)))
                .map_err(SftpError::from)?;
        }
        if let Some(perm) = attrs.perm {
            fs::set_permissions(path, fs::Permissions::from_mode(perm))?;
        }
        if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
            set_times(path, atime, mtime)?;
        }
        Ok(())
    }

    fn fsetstat(&self, file: &mut Self::File, attrs: &Attrs) -> Result<(), SftpError> {
        if let Some(size) = attrs.size {
            file.0.set_len(size)?;
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            let fd = file.0.as_raw_fd();
            unistd::fchown(fd, Some(unistd::Uid::from_raw(uid)), Some(unistd::Gid::from_raw(gid)))
                .map_err(SftpError::from)?;
        }
        if let Some(perm) = attrs.perm {
            let fd = file.0.as_raw_fd();
            stat::fchmod(fd, Mode::from_bits_truncate(perm)).map_err(SftpError::from)?;
        }
        if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
            let fd = file.0.as_raw_fd();
            fset_times(fd, atime, mtime)?;
        }
        Ok(())
    }

    /// Seeds the iterator with `.` and `..` ahead of the real entries.
    fn opendir(&self, path: &Path) -> Result<Self::DirIter, SftpError> {
        let mut names = vec![b".".to_vec(), b"..".to_vec()];
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            names.push(entry.file_name().into_vec());
        }
        Ok(ChrootDirIter(names.into_iter()))
    }

    fn open(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Self::File, SftpError> {
        let mut oflag = OFlag::empty();
        match (flags.read, flags.write) {
            (true, true) => oflag |= OFlag::O_RDWR,
            (false, true) => oflag |= OFlag::O_WRONLY,
            _ => oflag |= OFlag::O_RDONLY,
        }
        if flags.append {
            oflag |= OFlag::O_APPEND;
        }
        if flags.creat {
            oflag |= OFlag::O_CREAT;
            if flags.trunc {
                oflag |= OFlag::O_TRUNC;
            }
            if flags.excl {
                oflag |= OFlag::O_EXCL;
            }
        }
        let fd = fcntl::open(path, oflag, Mode::from_bits_truncate(mode)).map_err(SftpError::from)?;
        // SAFETY: `fd` was just returned by `open(2)` and is owned by nobody else.
        let file = unsafe { fs::File::from_raw_fd(fd) };
        Ok(ChrootFile(file))
    }

    /// Seeks then reads, so the caller's offset is authoritative regardless
    /// of any prior operation on this handle.
    fn read(&self, file: &mut Self::File, offset: u64, size: u32) -> Result<Vec<u8>, SftpError> {
        file.0.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        let n = file.0.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&self, file: &mut Self::File, offset: u64, chunk: &[u8]) -> Result<(), SftpError> {
        file.0.seek(SeekFrom::Start(offset))?;
        file.0.write_all(chunk)?;
        Ok(())
    }

    fn close(&self, file: Self::File) -> Result<(), SftpError> {
        drop(file);
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<(), SftpError> {
        DirBuilder::new().mode(mode).create(path)?;
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<(), SftpError> {
        fs::remove_dir(path)?;
        Ok(())
    }

    fn rm(&self, path: &Path) -> Result<(), SftpError> {
        fs::remove_file(path)?;
        Ok(())
    }

    /// Refuses the rename outright if `new` already exists, since
    /// `std::fs::rename` (like `os.rename`) would otherwise silently
    /// overwrite it.
    /// The existence check and the rename are not atomic together; a
    /// concurrent create of `new` between the two can still race through.
    fn rename(&self, old: &Path, new: &Path) -> Result<(), SftpError> {
        if fs::symlink_metadata(new).is_ok() {
            return Err(SftpError::BackendFailure(format!(
                "{} already exists",
                new.display()
            )));
        }
        fs::rename(old, new)?;
        Ok(())
    }

    fn symlink(&self, link: &Path, target: &[u8]) -> Result<(), SftpError> {
        let target = std::str::from_utf8(target)
            .map_err(|_| SftpError::BackendFailure("symlink target is not valid UTF-8".into()))?;
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }

    fn readlink(&self, path: &Path) -> Result<Vec<u8>, SftpError> {
        let target = fs::read_link(path)?;
        Ok(target.into_os_string().into_vec())
    }
}

/// `fs::canonicalize` requires every component to exist; SFTP clients
/// routinely `verify()` a path that's about to be created (e.g. `MKDIR`,
/// `OPEN` with `CREAT`). Canonicalize the deepest existing ancestor and
/// rejoin the remaining, not-yet-existing tail onto it.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, SftpError> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        match fs::canonicalize(&existing) {
            Ok(resolved) => {
                let mut resolved = resolved;
                for component in tail.into_iter().rev() {
                    resolved.push(component);
                }
                return Ok(resolved);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let name = existing
                    .file_name()
                    .ok_or_else(|| SftpError::Forbidden(path.display().to_string()))?
                    .to_os_string();
                tail.push(name);
                if !existing.pop() {
                    return Err(SftpError::Forbidden(path.display().to_string()));
                }
            }
            Err(err) => return Err(SftpError::from(err)),
        }
    }
}

fn entry_name(path: &Path) -> Vec<u8> {
    path.file_name()
        .unwrap_or_else(|| path.as_os_str())
        .as_bytes()
        .to_vec()
}

fn set_times(path: &Path, atime: u32, mtime: u32) -> Result<(), SftpError> {
    use nix::sys::time::TimeSpec;
    let atime = TimeSpec::new(atime as i64, 0);
    let mtime = TimeSpec::new(mtime as i64, 0);
    stat::utimensat(None, path, &atime, &mtime, stat::UtimensatFlags::FollowSymlink)
        .map_err(SftpError::from)
}

fn fset_times(fd: RawFd, atime: u32, mtime: u32) -> Result<(), SftpError> {
    use nix::sys::time::TimeSpec;
    use nix::sys::stat::futimens;
    let atime = TimeSpec::new(atime as i64, 0);
    let mtime = TimeSpec::new(mtime as i64, 0);
    futimens(fd, &atime, &mtime).map_err(SftpError::from)
}
