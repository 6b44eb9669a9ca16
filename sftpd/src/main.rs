//! CLI front-end for the SFTPv3 subsystem engine.
//!
//! This binary is a thin wrapper: it parses the jail directory and the
//! optional log file and umask, builds a
//! [`sftpd_core::storage::chroot::VirtualChroot`] backend, and hands file
//! descriptors 0/1 to [`sftpd_core::Session::run`]. Everything interesting,
//! framing, dispatch, path containment, lives in `sftpd-core`.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sftpd_core::storage::chroot::VirtualChroot;
use sftpd_core::Session;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const STDIN_FD: RawFd = 0;
const STDOUT_FD: RawFd = 1;

/// An SFTPv3 server that jails the connecting user in a chroot-like virtual
/// root. Intended to be invoked by an SSH daemon as the `sftp` subsystem
/// command, e.g. `Subsystem sftp /usr/libexec/sftpd /home/%u`.
#[derive(Parser, Debug)]
#[command(name = "sftpd", version, about)]
struct Cli {
    /// Path of the chroot jail. Every request is confined to this directory
    /// after symlink/`..` resolution.
    chroot: PathBuf,

    /// Path to a logfile for diagnostics. Append-only, line-oriented text;
    /// never part of the wire protocol. Defaults to stderr when omitted.
    #[arg(long, short = 'l')]
    logfile: Option<PathBuf>,

    /// Sets the process umask (octal, e.g. `022`) before serving any
    /// request. Applies to every file/directory the backend creates.
    #[arg(long, short = 'u')]
    umask: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.logfile.as_deref())?;

    if let Some(umask) = &cli.umask {
        let mode = u32::from_str_radix(umask, 8)
            .with_context(|| format!("invalid --umask value: {umask}"))?;
        VirtualChroot::set_umask(mode);
    }

    let backend = VirtualChroot::new(&cli.chroot)
        .with_context(|| format!("failed to enter chroot jail {}", cli.chroot.display()))?;

    tracing::info!(jail = %cli.chroot.display(), "sftpd starting");
    let mut session = Session::new(backend);
    session
        .run(STDIN_FD, STDOUT_FD)
        .context("session loop ended with an I/O error")?;
    tracing::info!("sftpd exiting: peer closed input");
    Ok(())
}

/// Installs an `EnvFilter`-gated `tracing-subscriber` layer on stderr (default
/// `info`, overridable via `RUST_LOG`), plus a non-blocking file layer when
/// `--logfile` is given so subsystem diagnostics never collide with the SFTP
/// wire traffic on stdout. Returns the appender guard; dropping it would stop
/// flushing the background writer thread, so the caller must hold onto it.
fn init_logging(logfile: Option<&std::path::Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());

    let registry = tracing_subscriber::registry().with(stderr_layer);

    match logfile {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().context("--logfile must name a file")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env());
            registry.with(file_layer).init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}
