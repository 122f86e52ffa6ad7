//! Error types for the registration surface.

use std::io;
use std::os::fd::RawFd;

/// Why an [`add_fd`](crate::EventLoop::add_fd) call was rejected.
///
/// Argument errors leave the loop untouched; a kernel error means the
/// readiness set could not accept the descriptor and the registration
/// tables were not modified.
#[derive(Debug, thiserror::Error)]
pub enum AddFdError {
    /// A callback-less registration was attempted on a loop that was not
    /// prepared to allow them.
    #[error("registration without a callback is not allowed for this loop")]
    CallbackRequired,

    /// A callback-less registration used a negative identifier.
    #[error("registration without a callback requires a non-negative identifier")]
    NegativeIdent,

    /// The kernel rejected the registration.
    #[error("kernel registration failed for fd {fd}")]
    Kernel {
        /// The descriptor that could not be registered.
        fd: RawFd,
        /// The underlying kernel error.
        #[source]
        source: io::Error,
    },
}
