//! Hand-off to the forwarding worker
//!
//! Once a device is attached, the controller handle and the link move to the
//! worker that relays USB traffic. A successful hand-off consumes both; a
//! failed one returns them inside [`HandoffError`] so the caller decides how
//! they are closed.

use crate::error::SpawnFailure;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use std::fmt;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Default worker program for [`ProcessForwarder`]
pub const DEFAULT_FORWARDER_PROGRAM: &str = "usbip-attacher";

/// A hand-off that did not happen, with the handles given back
pub struct HandoffError<C, L> {
    pub failure: SpawnFailure,
    pub controller: C,
    pub link: L,
}

impl<C, L> fmt::Debug for HandoffError<C, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffError")
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Takes ownership of an attached device's controller handle and link
pub trait Forwarder<C, L>: Send + Sync {
    fn hand_off(&self, controller: C, link: L) -> Result<(), HandoffError<C, L>>;
}

/// The vhci_hcd driver relays traffic itself
///
/// The kernel took its own reference to the socket during attach, so handing
/// off only closes the client's copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelForwarder;

impl<C, L> Forwarder<C, L> for KernelForwarder {
    fn hand_off(&self, controller: C, link: L) -> Result<(), HandoffError<C, L>> {
        drop(controller);
        drop(link);
        debug!("Link handed to the kernel");
        Ok(())
    }
}

/// Spawns a worker program that inherits both descriptors
///
/// The descriptor numbers are written to the worker's stdin as
/// `controller=<fd>` and `link=<fd>` lines.
#[derive(Debug, Clone)]
pub struct ProcessForwarder {
    program: PathBuf,
}

impl ProcessForwarder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn spawn(&self, controller: &OwnedFd, link: &OwnedFd) -> Result<(), SpawnFailure> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => SpawnFailure::NotInstalled,
                _ => SpawnFailure::Other(e),
            })?;

        let handoff = format!(
            "controller={}\nlink={}\n",
            controller.as_raw_fd(),
            link.as_raw_fd()
        );
        let stdin = child.stdin.take();
        deliver(&mut child, stdin, &handoff)?;

        info!("Forwarding worker started (pid {})", child.id());
        Ok(())
    }
}

/// Tell a freshly spawned worker its descriptor numbers
///
/// A worker that could not be told is killed and reaped before returning, so
/// no process is left holding the inherited descriptors.
fn deliver<W: Write>(child: &mut Child, stdin: Option<W>, handoff: &str) -> Result<(), SpawnFailure> {
    let written = match stdin {
        Some(mut stdin) => stdin.write_all(handoff.as_bytes()),
        None => Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "worker stdin is not piped",
        )),
    };

    if let Err(e) = written {
        warn!("Hand-off to worker (pid {}) failed, stopping it: {}", child.id(), e);
        if let Err(kill_err) = child.kill() {
            debug!("Worker already gone: {}", kill_err);
        }
        if let Err(wait_err) = child.wait() {
            warn!("Could not reap worker (pid {}): {}", child.id(), wait_err);
        }
        return Err(SpawnFailure::Other(e));
    }

    Ok(())
}

/// Duplicate `fd` without close-on-exec so a child process inherits it
fn inheritable(fd: impl AsFd) -> io::Result<OwnedFd> {
    let owned = fd.as_fd().try_clone_to_owned()?;
    fcntl(owned.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty())).map_err(io::Error::from)?;
    Ok(owned)
}

impl<C: AsFd, L: AsFd> Forwarder<C, L> for ProcessForwarder {
    fn hand_off(&self, controller: C, link: L) -> Result<(), HandoffError<C, L>> {
        let result = inheritable(&controller)
            .and_then(|c| inheritable(&link).map(|l| (c, l)))
            .map_err(SpawnFailure::Other)
            .and_then(|(c, l)| self.spawn(&c, &l));

        match result {
            Ok(()) => Ok(()),
            Err(failure) => Err(HandoffError {
                failure,
                controller,
                link,
            }),
        }
    }
}

/// Forwarder selected by configuration
#[derive(Debug, Clone)]
pub enum ConfiguredForwarder {
    Kernel(KernelForwarder),
    Process(ProcessForwarder),
}

impl<C: AsFd, L: AsFd> Forwarder<C, L> for ConfiguredForwarder {
    fn hand_off(&self, controller: C, link: L) -> Result<(), HandoffError<C, L>> {
        match self {
            Self::Kernel(f) => f.hand_off(controller, link),
            Self::Process(f) => f.hand_off(controller, link),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_kernel_forwarder_closes_link() {
        let (link, mut peer) = UnixStream::pair().unwrap();
        let (controller, _other) = UnixStream::pair().unwrap();

        KernelForwarder.hand_off(controller, link).unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(io::Read::read(&mut peer, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_missing_program_returns_handles() {
        let forwarder = ProcessForwarder::new("/nonexistent/usbip-attacher");
        let (link, _peer) = UnixStream::pair().unwrap();
        let (controller, _other) = UnixStream::pair().unwrap();

        let err = forwarder.hand_off(controller, link).unwrap_err();
        assert!(matches!(err.failure, SpawnFailure::NotInstalled));
        // The handles come back usable
        err.link.set_nonblocking(true).unwrap();
        err.controller.set_nonblocking(true).unwrap();
    }

    #[test]
    fn test_inheritable_clears_cloexec() {
        let (link, _peer) = UnixStream::pair().unwrap();
        let fd = inheritable(&link).unwrap();
        let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
        assert_eq!(FdFlag::from_bits_truncate(flags) & FdFlag::FD_CLOEXEC, FdFlag::empty());
        assert_ne!(fd.as_raw_fd(), link.as_raw_fd());
    }

    /// Writer standing in for a worker that closed its stdin
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_delivery_stops_worker() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        let err = deliver(&mut child, Some(ClosedPipe), "controller=3\nlink=4\n").unwrap_err();

        assert!(matches!(err, SpawnFailure::Other(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        // Killed and already reaped
        let status = child.try_wait().unwrap().expect("worker still running");
        assert!(!status.success());
    }

    #[test]
    fn test_missing_stdin_stops_worker() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        let err = deliver(&mut child, None::<ClosedPipe>, "controller=3\nlink=4\n").unwrap_err();

        assert!(matches!(err, SpawnFailure::Other(_)));
        assert!(child.try_wait().unwrap().is_some());
    }
}
