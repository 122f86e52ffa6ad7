//! Readiness multiplexer over epoll.
//!
//! Wraps one epoll instance. Registrations attach the registration's
//! sequence number as the kernel token (`epoll_event.u64`); readiness comes
//! back as `(sequence, translated events)` pairs. Subscriptions are
//! level-triggered, so a batch bound does not lose events: anything that
//! did not fit in one `wait` is redelivered by the next.
//!
//! `register`, `modify` and `unregister` are called under the loop lock.
//! `wait` is called without it; the poller is a cheap clone around a shared
//! descriptor so the waiter can keep the instance alive across the kernel
//! wait while the lock is released.

use crate::events::Events;
use crate::request::SequenceNumber;
use smallvec::SmallVec;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

/// Capacity of one `wait` batch.
pub(crate) const MAX_WAIT_EVENTS: usize = 16;

/// One translated readiness item.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadyEvent {
    pub seq: SequenceNumber,
    pub readiness: Events,
}

/// Batch buffer for `wait`, inline up to the batch bound.
pub(crate) type ReadyBatch = SmallVec<[ReadyEvent; MAX_WAIT_EVENTS]>;

/// Outcome of one kernel wait.
pub(crate) enum WaitOutcome {
    /// At least one readiness item was translated into the batch.
    Ready,
    /// The timeout elapsed with no readiness.
    TimedOut,
    /// The wait was interrupted by a signal.
    Interrupted,
    /// The wait failed for any other reason.
    Failed(io::Error),
}

#[derive(Clone)]
pub(crate) struct Poller {
    epfd: Arc<OwnedFd>,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall; on success the returned descriptor is owned
        // by the new `OwnedFd` and nothing else.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a freshly created, valid descriptor.
        Ok(Self {
            epfd: Arc::new(unsafe { OwnedFd::from_raw_fd(fd) }),
        })
    }

    /// Adds `fd` to the kernel set with `seq` as its token.
    pub fn register(&self, seq: SequenceNumber, fd: RawFd, subscribed: Events) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, seq, subscribed)
    }

    /// Updates the subscription of an already-registered `fd`, repointing
    /// its token at `seq`.
    pub fn modify(&self, seq: SequenceNumber, fd: RawFd, subscribed: Events) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, seq, subscribed)
    }

    /// Removes `fd` from the kernel set.
    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        // SAFETY: the event argument is a valid (ignored) pointer for
        // EPOLL_CTL_DEL; descriptors are plain integers to the kernel.
        let rc = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks for readiness up to `timeout_ms` (`-1` means no timeout,
    /// `0` a non-blocking poll). Called without the loop lock. Translated
    /// items are appended to `batch`, at most [`MAX_WAIT_EVENTS`] per call.
    pub fn wait(&self, timeout_ms: libc::c_int, batch: &mut ReadyBatch) -> WaitOutcome {
        batch.clear();
        // SAFETY: zeroed epoll_event values are valid; the kernel fills them.
        let mut items: [libc::epoll_event; MAX_WAIT_EVENTS] = unsafe { std::mem::zeroed() };
        // SAFETY: `items` is a valid out-buffer of MAX_WAIT_EVENTS entries
        // for the life of the call.
        let count = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                items.as_mut_ptr(),
                MAX_WAIT_EVENTS as libc::c_int,
                timeout_ms,
            )
        };
        if count < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return WaitOutcome::Interrupted;
            }
            return WaitOutcome::Failed(err);
        }
        if count == 0 {
            return WaitOutcome::TimedOut;
        }
        #[allow(clippy::cast_sign_loss)]
        for item in &items[..count as usize] {
            batch.push(ReadyEvent {
                seq: item.u64,
                readiness: translate(item.events),
            });
        }
        WaitOutcome::Ready
    }

    fn ctl(
        &self,
        op: libc::c_int,
        fd: RawFd,
        seq: SequenceNumber,
        subscribed: Events,
    ) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: kernel_mask(subscribed),
            u64: seq,
        };
        // SAFETY: `event` is a valid epoll_event for the life of the call;
        // the kernel copies it before returning.
        let rc = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn kernel_mask(subscribed: Events) -> u32 {
    let mut mask = 0u32;
    if subscribed.contains(Events::INPUT) {
        mask |= libc::EPOLLIN as u32;
    }
    if subscribed.contains(Events::OUTPUT) {
        mask |= libc::EPOLLOUT as u32;
    }
    mask
}

fn translate(kernel: u32) -> Events {
    let mut events = Events::empty();
    if kernel & libc::EPOLLIN as u32 != 0 {
        events = events.add(Events::INPUT);
    }
    if kernel & libc::EPOLLOUT as u32 != 0 {
        events = events.add(Events::OUTPUT);
    }
    if kernel & libc::EPOLLERR as u32 != 0 {
        events = events.add(Events::ERROR);
    }
    if kernel & libc::EPOLLHUP as u32 != 0 {
        events = events.add(Events::HANGUP);
    }
    events
}
