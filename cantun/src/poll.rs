//! Readiness helpers shared by the worker event loops.

use std::io;
use std::os::fd::RawFd;

pub(crate) fn pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// Block until at least one descriptor is ready, retrying on interruption.
pub(crate) fn wait_readable(fds: &mut [libc::pollfd]) -> io::Result<()> {
    loop {
        let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if res >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// True when the descriptor woke the poll. Error and hangup wakeups count so
/// a socket shut down mid-wait still unblocks the loop.
pub(crate) fn is_readable(fd: &libc::pollfd) -> bool {
    fd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0
}
