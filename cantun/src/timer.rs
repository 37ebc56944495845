//! Monotonic periodic flush timer backed by a timerfd.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

/// Next-expiry offset used to pull the timer forward: one microsecond out.
const FIRE_SOON_NS: libc::c_long = 1_000;

/// Periodic deadline timer whose next expiry can be pulled forward without
/// disturbing the steady-state period.
///
/// The descriptor is non-blocking so [`FlushTimer::drain`] can be called
/// opportunistically, and `timerfd_settime` is safe from any thread, which is
/// what lets one worker nudge another worker's timer.
pub(crate) struct FlushTimer {
    fd: OwnedFd,
    interval: Duration,
}

impl FlushTimer {
    pub(crate) fn new(interval: Duration) -> io::Result<Self> {
        let fd = unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            interval,
        })
    }

    /// Start the periodic cadence, first expiry one full interval out.
    pub(crate) fn arm(&self) -> io::Result<()> {
        self.settime(timespec_from(self.interval))
    }

    /// Pull the next expiry to near-immediate, keeping the interval.
    pub(crate) fn fire_soon(&self) -> io::Result<()> {
        self.settime(libc::timespec {
            tv_sec: 0,
            tv_nsec: FIRE_SOON_NS,
        })
    }

    /// Read and clear the expiration count. Zero when nothing has fired.
    pub(crate) fn drain(&self) -> io::Result<u64> {
        let mut expirations = 0u64;
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&raw mut expirations).cast::<libc::c_void>(),
                mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        if n as usize != mem::size_of::<u64>() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short timerfd read",
            ));
        }
        Ok(expirations)
    }

    fn settime(&self, value: libc::timespec) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: timespec_from(self.interval),
            it_value: value,
        };
        let rc = unsafe { libc::timerfd_settime(self.fd.as_raw_fd(), 0, &spec, ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for FlushTimer {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn timespec_from(dur: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: dur.as_secs() as libc::time_t,
        tv_nsec: dur.subsec_nanos() as libc::c_long,
    }
}
