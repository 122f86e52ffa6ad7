//! Messages and message handlers.
//!
//! A [`Message`] is a small value delivered to a [`MessageHandler`] at or
//! after a chosen monotonic deadline. Handlers are shared trait objects;
//! the loop holds a strong reference only while an envelope is queued and
//! drops it before reacquiring its lock after dispatch, so a caller can
//! destroy its handler without racing the loop.
//!
//! [`WeakMessageHandler`] wraps a handler weakly and promotes at dispatch
//! time; if the underlying handler is gone the message is silently dropped.

use std::sync::{Arc, Weak};

/// A plain message identified by its `what` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Caller-chosen message code. Opaque to the loop.
    pub what: i32,
}

impl Message {
    /// Creates a message with the given code.
    #[must_use]
    pub const fn new(what: i32) -> Self {
        Self { what }
    }
}

/// Receiver for timed messages.
pub trait MessageHandler: Send + Sync {
    /// Handles a delivered message. Invoked on the loop thread with no loop
    /// lock held, so implementations may re-enter the loop's public API.
    fn handle_message(&self, message: &Message);
}

/// A [`MessageHandler`] that holds its target weakly.
///
/// Promotion happens at dispatch; when it fails the message is dropped
/// without effect. Use this when the handler's owner may go away while
/// messages for it are still queued.
pub struct WeakMessageHandler {
    handler: Weak<dyn MessageHandler>,
}

impl WeakMessageHandler {
    /// Wraps a weak handler reference.
    #[must_use]
    pub fn new(handler: Weak<dyn MessageHandler>) -> Self {
        Self { handler }
    }

    /// Wraps a handler, downgrading the given strong reference.
    #[must_use]
    pub fn downgrade(handler: &Arc<dyn MessageHandler>) -> Self {
        Self {
            handler: Arc::downgrade(handler),
        }
    }
}

impl MessageHandler for WeakMessageHandler {
    fn handle_message(&self, message: &Message) {
        if let Some(handler) = self.handler.upgrade() {
            handler.handle_message(message);
        } else {
            tracing::trace!(what = message.what, "dropping message for a dead handler");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    struct CountingHandler {
        delivered: Arc<AtomicUsize>,
    }

    impl MessageHandler for CountingHandler {
        fn handle_message(&self, _message: &Message) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn weak_handler_delivers_while_alive() {
        init_test("weak_handler_delivers_while_alive");
        let delivered = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn MessageHandler> = Arc::new(CountingHandler {
            delivered: delivered.clone(),
        });
        let weak = WeakMessageHandler::downgrade(&handler);

        weak.handle_message(&Message::new(1));
        crate::assert_with_log!(
            delivered.load(Ordering::SeqCst) == 1,
            "delivered while alive",
            1usize,
            delivered.load(Ordering::SeqCst)
        );
        crate::test_complete!("weak_handler_delivers_while_alive");
    }

    #[test]
    fn weak_handler_drops_after_target_dies() {
        init_test("weak_handler_drops_after_target_dies");
        let delivered = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn MessageHandler> = Arc::new(CountingHandler {
            delivered: delivered.clone(),
        });
        let weak = WeakMessageHandler::downgrade(&handler);

        drop(handler);
        weak.handle_message(&Message::new(2));
        crate::assert_with_log!(
            delivered.load(Ordering::SeqCst) == 0,
            "no delivery after the target died",
            0usize,
            delivered.load(Ordering::SeqCst)
        );
        crate::test_complete!("weak_handler_drops_after_target_dies");
    }
}
