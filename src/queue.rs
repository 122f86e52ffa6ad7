//! Deadline-ordered message queue.
//!
//! Envelopes are kept sorted by non-decreasing deadline; equal deadlines
//! preserve enqueue order. Insertion is a linear scan from the front,
//! removal by handler a linear scan from the back, matching the access
//! pattern of a queue that is short in practice.

use crate::message::{Message, MessageHandler};
use crate::time::Uptime;
use std::collections::VecDeque;
use std::sync::Arc;

/// One queued message with its deadline and target handler.
pub(crate) struct MessageEnvelope {
    /// Absolute monotonic deadline.
    pub uptime: Uptime,
    /// Strong handler reference, held until dispatch.
    pub handler: Arc<dyn MessageHandler>,
    /// The message itself.
    pub message: Message,
}

/// Queue of envelopes sorted by deadline, stable under equal deadlines.
#[derive(Default)]
pub(crate) struct MessageQueue {
    envelopes: VecDeque<MessageEnvelope>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an envelope before the first entry with a strictly greater
    /// deadline and returns the insertion index. Index zero means the new
    /// envelope became the head and the loop may need a wake.
    pub fn push(&mut self, envelope: MessageEnvelope) -> usize {
        let mut index = 0;
        while index < self.envelopes.len() && envelope.uptime >= self.envelopes[index].uptime {
            index += 1;
        }
        self.envelopes.insert(index, envelope);
        index
    }

    /// Deadline of the head envelope, if any.
    pub fn next_uptime(&self) -> Option<Uptime> {
        self.envelopes.front().map(|envelope| envelope.uptime)
    }

    /// Removes and returns the head envelope.
    pub fn pop_front(&mut self) -> Option<MessageEnvelope> {
        self.envelopes.pop_front()
    }

    /// Deletes every envelope addressed to `handler`; with `what` given,
    /// only envelopes carrying that message code. Unmatched handlers leave
    /// the queue untouched.
    pub fn remove_matching(&mut self, handler: &Arc<dyn MessageHandler>, what: Option<i32>) {
        for index in (0..self.envelopes.len()).rev() {
            let envelope = &self.envelopes[index];
            if Arc::ptr_eq(&envelope.handler, handler)
                && what.is_none_or(|code| envelope.message.what == code)
            {
                self.envelopes.remove(index);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    struct NullHandler;

    impl MessageHandler for NullHandler {
        fn handle_message(&self, _message: &Message) {}
    }

    fn handler() -> Arc<dyn MessageHandler> {
        Arc::new(NullHandler)
    }

    fn envelope(handler: &Arc<dyn MessageHandler>, uptime: u64, what: i32) -> MessageEnvelope {
        MessageEnvelope {
            uptime: Uptime::from_nanos(uptime),
            handler: handler.clone(),
            message: Message::new(what),
        }
    }

    #[test]
    fn push_keeps_deadline_order() {
        init_test("push_keeps_deadline_order");
        let h = handler();
        let mut queue = MessageQueue::new();
        queue.push(envelope(&h, 200, 2));
        queue.push(envelope(&h, 100, 1));
        queue.push(envelope(&h, 300, 3));

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop_front())
            .map(|e| e.message.what)
            .collect();
        crate::assert_with_log!(
            order == vec![1, 2, 3],
            "envelopes pop in deadline order",
            vec![1, 2, 3],
            order
        );
        crate::test_complete!("push_keeps_deadline_order");
    }

    #[test]
    fn equal_deadlines_preserve_enqueue_order() {
        init_test("equal_deadlines_preserve_enqueue_order");
        let h = handler();
        let mut queue = MessageQueue::new();
        let head = queue.push(envelope(&h, 100, 1));
        let tail = queue.push(envelope(&h, 100, 2));

        crate::assert_with_log!(head == 0, "first enqueue lands at head", 0usize, head);
        crate::assert_with_log!(tail == 1, "equal deadline lands after", 1usize, tail);

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop_front())
            .map(|e| e.message.what)
            .collect();
        crate::assert_with_log!(
            order == vec![1, 2],
            "equal deadlines dispatch in enqueue order",
            vec![1, 2],
            order
        );
        crate::test_complete!("equal_deadlines_preserve_enqueue_order");
    }

    #[test]
    fn remove_matching_filters_by_handler_and_what() {
        init_test("remove_matching_filters_by_handler_and_what");
        let first = handler();
        let second = handler();
        let mut queue = MessageQueue::new();
        queue.push(envelope(&first, 100, 1));
        queue.push(envelope(&second, 200, 1));
        queue.push(envelope(&first, 300, 2));

        queue.remove_matching(&first, Some(1));
        crate::assert_with_log!(queue.len() == 2, "one envelope matched", 2usize, queue.len());

        queue.remove_matching(&first, None);
        crate::assert_with_log!(
            queue.len() == 1,
            "remaining first-handler envelope removed",
            1usize,
            queue.len()
        );

        // Removing for an unmatched handler is a no-op.
        queue.remove_matching(&first, None);
        crate::assert_with_log!(
            queue.len() == 1,
            "unmatched removal leaves the queue untouched",
            1usize,
            queue.len()
        );
        crate::test_complete!("remove_matching_filters_by_handler_and_what");
    }

    #[test]
    fn next_uptime_tracks_head() {
        init_test("next_uptime_tracks_head");
        let h = handler();
        let mut queue = MessageQueue::new();
        crate::assert_with_log!(
            queue.next_uptime().is_none(),
            "empty queue has no deadline",
            None::<Uptime>,
            queue.next_uptime()
        );

        queue.push(envelope(&h, 500, 1));
        queue.push(envelope(&h, 100, 2));
        crate::assert_with_log!(
            queue.next_uptime() == Some(Uptime::from_nanos(100)),
            "head deadline is the earliest",
            Some(Uptime::from_nanos(100)),
            queue.next_uptime()
        );
        crate::test_complete!("next_uptime_tracks_head");
    }
}
