//! The per-connection engine: owns the byte buffers, the handle table
//! and the backend, and drives both the pure frame-processing loop and the
//! real blocking event loop built on top of it.

use std::io::{Read, Write};
use std::os::unix::io::RawFd;

use nix::sys::select::{select, FdSet};
use nix::unistd;

use crate::attrs::Attrs;
use crate::dispatch::{opcode, DEFAULT_MODE, DEFAULT_OPEN_MODE, SFTP_VERSION};
use crate::error::{status, SftpError};
use crate::handle::{HandleKind, HandleTable};
use crate::hook::{NoopHook, SftpHook};
use crate::storage::{OpenFlags, StorageBackend};
use crate::wire::{frame, write_string, write_u32, write_u64, Reader};

/// Bytes read per `run()` iteration, matching the original
/// implementation's `buffer_size`.
const READ_CHUNK: usize = 8192;

/// One SFTP connection's worth of state, generic over the backend so the
/// dispatcher never depends on a concrete filesystem implementation.
pub struct Session<B: StorageBackend> {
    backend: B,
    input: Vec<u8>,
    output: Vec<u8>,
    handles: HandleTable<B::File, B::DirIter>,
    hook: Box<dyn SftpHook>,
    /// When set, a non-OK status is raised as an error instead of being
    /// framed and queued. Useful for tests that want to assert on the
    /// specific failure rather than parse a STATUS frame.
    raise_on_error: bool,
}

impl<B: StorageBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        Session {
            backend,
            input: Vec::new(),
            output: Vec::new(),
            handles: HandleTable::new(),
            hook: Box::new(NoopHook),
            raise_on_error: false,
        }
    }

    pub fn with_hook(mut self, hook: Box<dyn SftpHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_raise_on_error(mut self, raise: bool) -> Self {
        self.raise_on_error = raise;
        self
    }

    /// Feeds raw bytes into the input buffer, for callers driving `process`
    /// directly (tests, or a transport other than a raw fd pair).
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    /// Drains and returns whatever is queued for the peer.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Processes as many complete frames as the input buffer currently
    /// holds. Pure in-memory: no fd I/O happens here, which
    /// is what makes this path directly testable.
    ///
    /// Returns `true` once a fatal error has ended the session; callers must
    /// stop feeding input and tear the session down when this returns `true`.
    pub fn process(&mut self) -> bool {
        loop {
            if self.input.len() < 5 {
                return false;
            }
            let msg_len = u32::from_be_bytes([self.input[0], self.input[1], self.input[2], self.input[3]]) as usize;
            if self.input.len() < msg_len + 4 {
                return false;
            }
            if msg_len < 1 {
                // No room for an opcode byte: the framer and the decoder
                // have disagreed about a length. Fatal.
                tracing::error!("malformed frame: zero-length payload");
                self.input.drain(0..msg_len + 4);
                return true;
            }
            let msg_type = self.input[4];
            let payload = self.input[5..4 + msg_len].to_vec();
            self.input.drain(0..msg_len + 4);

            if msg_type == opcode::INIT {
                let mut resp = vec![opcode::VERSION];
                write_u32(&mut resp, SFTP_VERSION);
                self.queue(resp);
                self.hook.init();
                continue;
            }
            if msg_type == opcode::EXTENDED {
                // Silently ignored:
                // no vendor extension is implemented, and no response is sent.
                tracing::debug!("ignoring EXTENDED request");
                continue;
            }

            let mut r = Reader::new(&payload);
            let id = match r.read_u32() {
                Ok(id) => id,
                Err(_) => {
                    // A malformed request id is unrecoverable: there is no id
                    // to answer with, so the session ends.
                    tracing::error!("malformed request: could not read request id");
                    return true;
                }
            };

            match self.dispatch(msg_type, id, &mut r) {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    tracing::error!(%err, "fatal error, ending session");
                    return true;
                }
                Err(err) => {
                    if self.raise_on_error {
                        // The caller asked to see the error directly (tests);
                        // still leave the connection in a clean state by not
                        // queuing a response.
                        tracing::debug!(%err, "raising error instead of sending status");
                    } else {
                        self.send_status(id, err.status_code(), err.message());
                    }
                }
            }
        }
    }

    fn queue(&mut self, payload: Vec<u8>) {
        self.output.extend_from_slice(&frame(payload));
    }

    fn send_status(&mut self, id: u32, code: u32, message: Option<String>) {
        tracing::debug!(id, code, "sending status");
        let mut msg = vec![opcode::STATUS];
        write_u32(&mut msg, id);
        write_u32(&mut msg, code);
        write_string(&mut msg, message.unwrap_or_default().as_bytes());
        write_string(&mut msg, b"");
        self.queue(msg);
    }

    fn send_handle(&mut self, id: u32, handle: &str) {
        let mut msg = vec![opcode::HANDLE];
        write_u32(&mut msg, id);
        write_string(&mut msg, handle.as_bytes());
        self.queue(msg);
    }

    fn send_attrs(&mut self, id: u32, attrs: &Attrs) {
        let mut msg = vec![opcode::ATTRS];
        write_u32(&mut msg, id);
        attrs.encode(&mut msg);
        self.queue(msg);
    }

    fn send_data(&mut self, id: u32, data: &[u8]) {
        let mut msg = vec![opcode::DATA];
        write_u32(&mut msg, id);
        write_string(&mut msg, data);
        self.queue(msg);
    }

    fn send_name(&mut self, id: u32, name: &[u8], long_name: &[u8], attrs: &Attrs) {
        let mut msg = vec![opcode::NAME];
        write_u32(&mut msg, id);
        write_u32(&mut msg, 1);
        write_string(&mut msg, name);
        write_string(&mut msg, long_name);
        attrs.encode(&mut msg);
        self.queue(msg);
    }

    fn dispatch(&mut self, msg_type: u8, id: u32, r: &mut Reader) -> Result<(), SftpError> {
        match msg_type {
            opcode::REALPATH => {
                let raw = r.read_string()?;
                let name = if raw.is_empty() { b".".to_vec() } else { raw };
                let path = self.backend.verify(&name)?;
                let info = self.backend.stat(&path, false)?;
                let canonical = path.to_string_lossy().into_owned().into_bytes();
                self.hook.realpath(&path);
                self.send_name(id, &canonical, &canonical, &info.attrs);
                Ok(())
            }
            opcode::STAT | opcode::LSTAT => {
                let name = r.read_string()?;
                let path = self.backend.verify(&name)?;
                let lstat = msg_type == opcode::LSTAT;
                let info = self.backend.stat(&path, lstat)?;
                if lstat {
                    self.hook.lstat(&path);
                } else {
                    self.hook.stat(&path);
                }
                self.send_attrs(id, &info.attrs);
                Ok(())
            }
            opcode::FSTAT => {
                let handle = r.read_string()?;
                let entry = self.handles.get(&handle)?;
                let file = match &entry.kind {
                    HandleKind::File(f) => f,
                    HandleKind::Dir(_) => return Err(SftpError::NotAHandle("not a file handle".into())),
                };
                let attrs = self.backend.fstat(file)?;
                self.hook.fstat(std::str::from_utf8(&handle).unwrap_or_default());
                self.send_attrs(id, &attrs);
                Ok(())
            }
            opcode::SETSTAT => {
                let name = r.read_string()?;
                let attrs = r.read_attrs()?;
                let path = self.backend.verify(&name)?;
                self.backend.setstat(&path, &attrs)?;
                self.hook.setstat(&path, &attrs);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::FSETSTAT => {
                let handle = r.read_string()?;
                let attrs = r.read_attrs()?;
                let entry = self.handles.get_mut(&handle)?;
                let file = match &mut entry.kind {
                    HandleKind::File(f) => f,
                    HandleKind::Dir(_) => return Err(SftpError::NotAHandle("not a file handle".into())),
                };
                self.backend.fsetstat(file, &attrs)?;
                self.hook.fsetstat(std::str::from_utf8(&handle).unwrap_or_default(), &attrs);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::OPENDIR => {
                let name = r.read_string()?;
                let path = self.backend.verify(&name)?;
                let iter = self.backend.opendir(&path)?;
                self.hook.opendir(&path);
                let handle = self
                    .handles
                    .allocate(HandleKind::Dir(iter), path.to_string_lossy().into_owned().into_bytes())?;
                self.send_handle(id, &handle);
                Ok(())
            }
            opcode::READDIR => {
                let handle = r.read_string()?;
                let entry = self.handles.get_mut(&handle)?;
                let (iter, dir_path) = match &mut entry.kind {
                    HandleKind::Dir(iter) => (iter, entry.name.clone()),
                    HandleKind::File(_) => return Err(SftpError::NotAHandle("not a directory handle".into())),
                };
                match iter.next() {
                    Some(name) => {
                        self.hook.readdir(std::str::from_utf8(&handle).unwrap_or_default());
                        let dir = std::path::PathBuf::from(String::from_utf8_lossy(&dir_path).into_owned());
                        let entry_path = dir.join(String::from_utf8_lossy(&name).into_owned());
                        let info = self.backend.stat(&entry_path, true).unwrap_or_else(|_| crate::storage::FileInfo {
                            attrs: Attrs::default(),
                            long_name: name.clone(),
                        });
                        self.send_name(id, &name, &info.long_name, &info.attrs);
                    }
                    None => self.send_status(id, status::EOF, None),
                }
                Ok(())
            }
            opcode::CLOSE => {
                let handle = r.read_string()?;
                let entry = self.handles.release(&handle)?;
                if let HandleKind::File(file) = entry.kind {
                    self.backend.close(file)?;
                }
                self.hook.close(std::str::from_utf8(&handle).unwrap_or_default());
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::OPEN => {
                let name = r.read_string()?;
                let raw_flags = r.read_u32()?;
                let attrs = r.read_attrs()?;
                let flags = OpenFlags::from_raw(raw_flags);
                let mode = attrs.perm.unwrap_or(DEFAULT_OPEN_MODE);
                let path = self.backend.verify(&name)?;
                let file = self.backend.open(&path, flags, mode)?;
                self.hook.open(&path, flags, mode);
                let handle = self
                    .handles
                    .allocate(HandleKind::File(file), path.to_string_lossy().into_owned().into_bytes())?;
                self.send_handle(id, &handle);
                Ok(())
            }
            opcode::READ => {
                let handle = r.read_string()?;
                let offset = r.read_u64()?;
                let size = r.read_u32()?;
                let entry = self.handles.get_mut(&handle)?;
                let file = match &mut entry.kind {
                    HandleKind::File(f) => f,
                    HandleKind::Dir(_) => return Err(SftpError::NotAHandle("not a file handle".into())),
                };
                let data = self.backend.read(file, offset, size)?;
                self.hook.read(std::str::from_utf8(&handle).unwrap_or_default(), offset, size);
                if data.is_empty() {
                    self.send_status(id, status::EOF, None);
                } else {
                    self.send_data(id, &data);
                }
                Ok(())
            }
            opcode::WRITE => {
                let handle = r.read_string()?;
                let offset = r.read_u64()?;
                let chunk = r.read_string()?;
                let entry = self.handles.get_mut(&handle)?;
                let file = match &mut entry.kind {
                    HandleKind::File(f) => f,
                    HandleKind::Dir(_) => return Err(SftpError::NotAHandle("not a file handle".into())),
                };
                let len = chunk.len();
                self.backend.write(file, offset, &chunk)?;
                self.hook.write(std::str::from_utf8(&handle).unwrap_or_default(), offset, len);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::MKDIR => {
                let name = r.read_string()?;
                let attrs = r.read_attrs()?;
                let mode = attrs.perm.unwrap_or(DEFAULT_MODE);
                let path = self.backend.verify(&name)?;
                self.backend.mkdir(&path, mode)?;
                self.hook.mkdir(&path, mode);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::RMDIR => {
                let name = r.read_string()?;
                let path = self.backend.verify(&name)?;
                self.backend.rmdir(&path)?;
                self.hook.rmdir(&path);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::REMOVE => {
                let name = r.read_string()?;
                let path = self.backend.verify(&name)?;
                self.backend.rm(&path)?;
                self.hook.rm(&path);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::RENAME => {
                let old = r.read_string()?;
                let new = r.read_string()?;
                let old_path = self.backend.verify(&old)?;
                let new_path = self.backend.verify(&new)?;
                self.backend.rename(&old_path, &new_path)?;
                self.hook.rename(&old_path, &new_path);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::SYMLINK => {
                let link = r.read_string()?;
                let target = r.read_string()?;
                let link_path = self.backend.verify(&link)?;
                // Only the link path is resolved under the jail; the target
                // is stored verbatim.
                self.backend.symlink(&link_path, &target)?;
                self.hook.symlink(&link_path, &target);
                self.send_status(id, status::OK, None);
                Ok(())
            }
            opcode::READLINK => {
                let name = r.read_string()?;
                let path = self.backend.verify(&name)?;
                let target = self.backend.readlink(&path)?;
                self.hook.readlink(&path);
                let attrs = Attrs::default();
                self.send_name(id, &target, &target, &attrs);
                Ok(())
            }
            _ => Err(SftpError::Unsupported),
        }
    }
}

impl<B: StorageBackend> Session<B> {
    /// The real event loop: blocks on descriptor readiness instead of
    /// looping over an in-memory buffer. `fd_in == fd_out` is legal (a pipe
    /// pair or a single duplex fd both work).
    pub fn run(&mut self, fd_in: RawFd, fd_out: RawFd) -> std::io::Result<()> {
        loop {
            if self.run_once(fd_in, fd_out)? {
                return Ok(());
            }
        }
    }

    fn run_once(&mut self, fd_in: RawFd, fd_out: RawFd) -> std::io::Result<bool> {
        let mut read_set = FdSet::new();
        read_set.insert(fd_in);
        let mut write_set = FdSet::new();
        let want_write = !self.output.is_empty();
        if want_write {
            write_set.insert(fd_out);
        }

        select(
            None,
            Some(&mut read_set),
            if want_write { Some(&mut write_set) } else { None },
            None,
            None,
        )
        .map_err(std::io::Error::from)?;

        if read_set.contains(fd_in) {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = unistd::read(fd_in, &mut buf).map_err(std::io::Error::from)?;
            if n == 0 {
                return Ok(true);
            }
            buf.truncate(n);
            self.input.extend_from_slice(&buf);
            if self.process() {
                return Ok(true);
            }
        }
        if want_write && write_set.contains(fd_out) {
            let n = unistd::write(fd_out, &self.output).map_err(std::io::Error::from)?;
            if n == 0 {
                return Ok(true);
            }
            self.output.drain(0..n);
        }
        Ok(false)
    }
}

/// A thin adapter so a [`Session`] can also be driven with plain
/// `Read`/`Write` streams (e.g. in-process pipes in tests), without the
/// `nix`-specific `run`.
impl<B: StorageBackend> Session<B> {
    pub fn pump<R: Read, W: Write>(&mut self, mut input: R, mut output: W) -> std::io::Result<()> {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.input.extend_from_slice(&buf[..n]);
            let fatal = self.process();
            let pending = self.take_output();
            if !pending.is_empty() {
                output.write_all(&pending)?;
            }
            if fatal {
                return Ok(());
            }
        }
    }
}
