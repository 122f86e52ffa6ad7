//! A per-thread event loop: descriptor readiness plus timed messages
//! behind one blocking poll primitive.
//!
//! # Overview
//!
//! An [`EventLoop`] lets one thread wait for two kinds of work at once:
//!
//! - **Descriptor readiness.** Any thread registers a file descriptor with
//!   [`add_fd`](EventLoop::add_fd), either with a callback (invoked on the
//!   loop thread when the descriptor is ready) or with a non-negative
//!   identifier (returned from [`poll_once`](EventLoop::poll_once) along
//!   with the readiness details). Subscriptions are level-triggered
//!   `INPUT`/`OUTPUT`; `ERROR` and `HANGUP` are reported unconditionally.
//! - **Timed messages.** Any thread enqueues a [`Message`] for a
//!   [`MessageHandler`] at a monotonic deadline with the
//!   [`send_message`](EventLoop::send_message) family; the loop delivers
//!   due messages in deadline order (stable for equal deadlines) and
//!   schedules its own wakeups around the queue head.
//!
//! Registrations survive descriptor recycling: each `add_fd` opens a fresh
//! registration epoch keyed by an internal sequence number, so a callback
//! that closes its own descriptor never causes events from a reused
//! integer to reach the wrong epoch.
//!
//! # Example
//!
//! ```no_run
//! use spindle::{EventLoop, Events, PollResult, PrepareOptions};
//!
//! let event_loop = EventLoop::prepare(PrepareOptions::ALLOW_NON_CALLBACKS);
//! # let some_fd = 0;
//! event_loop
//!     .add_fd(some_fd, 7, Events::INPUT, None, 0)
//!     .expect("registration failed");
//!
//! match event_loop.poll_once(None) {
//!     PollResult::Ident { ident, fd, events, .. } => {
//!         println!("fd {fd} ready for {events:?} (ident {ident})");
//!     }
//!     other => println!("poll returned {other:?}"),
//! }
//! ```
//!
//! # Module Structure
//!
//! - [`event_loop`]: the loop core, poll primitives, and thread binding
//! - [`events`]: readiness event flags
//! - [`message`]: messages, handler traits, weak handler wrapper
//! - [`callback`]: descriptor callback trait
//! - [`time`]: monotonic nanosecond clock
//! - [`error`]: registration error types
//! - [`test_utils`]: logging setup and assertion macros for tests

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod callback;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod message;
pub mod test_utils;
pub mod time;

mod poller;
mod queue;
mod request;
mod wake;

pub use callback::{CallbackAction, FdCallback};
pub use error::AddFdError;
pub use event_loop::{EventLoop, FdState, PollResult, PrepareOptions};
pub use events::Events;
pub use message::{Message, MessageHandler, WeakMessageHandler};
pub use time::Uptime;
