//! Counter-semantic wake descriptor.
//!
//! An `eventfd` in counter mode: writes accumulate, a single read drains
//! the whole count. The loop keeps it registered for input at the reserved
//! wake sequence so a write from any thread pops a blocked wait.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

pub(crate) struct WakeFd {
    fd: OwnedFd,
}

impl WakeFd {
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall; on success the returned descriptor is owned
        // by the new `OwnedFd` and nothing else.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a freshly created, valid descriptor.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Signals the waiter. A full counter (`EAGAIN`) already guarantees a
    /// pending wake and is ignored.
    ///
    /// # Panics
    ///
    /// Panics on any other write failure; a loop whose wake channel is
    /// broken cannot make progress and the state is unrecoverable.
    pub fn wake(&self) {
        let value: u64 = 1;
        loop {
            // SAFETY: the buffer is a valid 8-byte value for the life of the
            // call and the descriptor is owned by `self`.
            let written = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    std::ptr::from_ref(&value).cast(),
                    std::mem::size_of::<u64>(),
                )
            };
            if written == std::mem::size_of::<u64>() as isize {
                return;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => {}
                io::ErrorKind::WouldBlock => return,
                _ => panic!(
                    "could not write wake signal to fd {}: {err}",
                    self.fd.as_raw_fd()
                ),
            }
        }
    }

    /// Consumes all pending wake signals with a single read. Errors are
    /// ignored: an empty counter just means another drain got there first.
    pub fn drain(&self) {
        let mut counter: u64 = 0;
        loop {
            // SAFETY: the buffer is a valid 8-byte out-slot for the life of
            // the call and the descriptor is owned by `self`.
            let read = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    std::ptr::from_mut(&mut counter).cast(),
                    std::mem::size_of::<u64>(),
                )
            };
            if read >= 0 || io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                return;
            }
        }
    }
}

impl AsRawFd for WakeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
