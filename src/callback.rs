//! Per-descriptor event callbacks.

use crate::events::Events;
use std::os::fd::RawFd;

/// What to do with a registration after its callback ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep the registration; the callback will fire again on readiness.
    Keep,
    /// Remove the registration. The removal is keyed by the registration's
    /// sequence number, so it stays correct even if the callback closed the
    /// descriptor and the integer was recycled.
    Unregister,
}

/// Callback invoked when a registered descriptor becomes ready.
///
/// Invoked on the loop thread with no loop lock held; implementations may
/// close their own descriptor and may re-enter the loop's public API.
pub trait FdCallback: Send + Sync {
    /// Handles readiness on `fd`. `events` is the translated readiness set,
    /// `data` the opaque value supplied at registration.
    fn handle_event(&self, fd: RawFd, events: Events, data: usize) -> CallbackAction;
}

impl<F> FdCallback for F
where
    F: Fn(RawFd, Events, usize) -> CallbackAction + Send + Sync,
{
    fn handle_event(&self, fd: RawFd, events: Events, data: usize) -> CallbackAction {
        self(fd, events, data)
    }
}
