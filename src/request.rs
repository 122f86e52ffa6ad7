//! Registration table keyed by sequence number.
//!
//! Every `add_fd` opens a new *registration epoch* for its descriptor,
//! identified by a fresh sequence number. The sequence number, not the
//! descriptor integer, is what the kernel hands back with readiness: a
//! descriptor can be closed and its integer recycled while its old epoch is
//! still draining, and keying everything by sequence keeps the two epochs
//! apart.
//!
//! The table maintains two mappings that must agree whenever the loop lock
//! is not held: `sequence -> Request` and `fd -> current sequence` (at most
//! one current epoch per descriptor).

use crate::callback::FdCallback;
use crate::events::Events;
use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Identifier of one registration epoch.
pub(crate) type SequenceNumber = u64;

/// Sequence number reserved for the wake descriptor. Never allocated to a
/// request, including after counter wrap.
pub(crate) const WAKE_SEQ: SequenceNumber = 1;

/// One active descriptor registration.
#[derive(Clone)]
pub(crate) struct Request {
    pub fd: RawFd,
    /// Non-negative caller tag, or the callback sentinel.
    pub ident: i32,
    /// Requested event set; only the subscribable bits reach the kernel.
    pub events: Events,
    pub callback: Option<Arc<dyn FdCallback>>,
    /// Opaque caller value returned with identifier poll results.
    pub data: usize,
}

impl Request {
    /// The event set actually subscribed with the kernel.
    pub fn subscribed(&self) -> Events {
        self.events.subscribable()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("fd", &self.fd)
            .field("ident", &self.ident)
            .field("events", &self.events)
            .field("has_callback", &self.callback.is_some())
            .field("data", &self.data)
            .finish()
    }
}

/// Keyed store of registrations plus the fd index.
#[derive(Default)]
pub(crate) struct RequestTable {
    requests: HashMap<SequenceNumber, Request>,
    seq_by_fd: HashMap<RawFd, SequenceNumber>,
    next_seq: SequenceNumber,
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            seq_by_fd: HashMap::new(),
            next_seq: WAKE_SEQ + 1,
        }
    }

    /// Allocates the next sequence number, skipping the reserved wake
    /// sequence on wrap.
    pub fn allocate_seq(&mut self) -> SequenceNumber {
        if self.next_seq == WAKE_SEQ {
            self.next_seq = self.next_seq.wrapping_add(1);
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// The current epoch of `fd`, if it is registered.
    pub fn current_seq(&self, fd: RawFd) -> Option<SequenceNumber> {
        self.seq_by_fd.get(&fd).copied()
    }

    pub fn get(&self, seq: SequenceNumber) -> Option<&Request> {
        self.requests.get(&seq)
    }

    /// Records a first epoch for a descriptor with no current registration.
    pub fn insert(&mut self, seq: SequenceNumber, request: Request) {
        debug_assert!(!self.seq_by_fd.contains_key(&request.fd));
        self.seq_by_fd.insert(request.fd, seq);
        self.requests.insert(seq, request);
    }

    /// Replaces the current epoch of a descriptor: purges the old request
    /// and repoints the fd index at the new sequence.
    pub fn replace(&mut self, old_seq: SequenceNumber, seq: SequenceNumber, request: Request) {
        self.requests.remove(&old_seq);
        self.seq_by_fd.insert(request.fd, seq);
        self.requests.insert(seq, request);
    }

    /// Erases both mappings for `seq`, returning the removed request.
    pub fn remove(&mut self, seq: SequenceNumber) -> Option<Request> {
        let request = self.requests.remove(&seq)?;
        self.seq_by_fd.remove(&request.fd);
        Some(request)
    }

    /// Iterates all registrations, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&SequenceNumber, &Request)> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
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

    fn request(fd: RawFd, ident: i32) -> Request {
        Request {
            fd,
            ident,
            events: Events::INPUT,
            callback: None,
            data: 0,
        }
    }

    /// Both mappings agree: every fd index entry points at a request with
    /// that fd, and no other request claims the same fd.
    fn index_consistent(table: &RequestTable) -> bool {
        table.seq_by_fd.iter().all(|(fd, seq)| {
            table.requests.get(seq).is_some_and(|r| r.fd == *fd)
                && table
                    .requests
                    .iter()
                    .filter(|(_, r)| r.fd == *fd)
                    .count()
                    == 1
        }) && table.requests.len() == table.seq_by_fd.len()
    }

    #[test]
    fn allocation_starts_past_wake_seq() {
        init_test("allocation_starts_past_wake_seq");
        let mut table = RequestTable::new();
        let first = table.allocate_seq();
        let second = table.allocate_seq();
        crate::assert_with_log!(first == 2, "first sequence is 2", 2u64, first);
        crate::assert_with_log!(second == 3, "allocation is monotonic", 3u64, second);
        crate::test_complete!("allocation_starts_past_wake_seq");
    }

    #[test]
    fn allocation_skips_wake_seq_on_wrap() {
        init_test("allocation_skips_wake_seq_on_wrap");
        let mut table = RequestTable::new();
        table.next_seq = u64::MAX;
        let wrapped: Vec<SequenceNumber> =
            (0..3).map(|_| table.allocate_seq()).collect();
        crate::assert_with_log!(
            wrapped == vec![u64::MAX, 0, 2],
            "wake sequence is skipped after wrap",
            vec![u64::MAX, 0, 2],
            wrapped
        );
        crate::test_complete!("allocation_skips_wake_seq_on_wrap");
    }

    #[test]
    fn insert_replace_remove_keep_index_consistent() {
        init_test("insert_replace_remove_keep_index_consistent");
        let mut table = RequestTable::new();
        let first = table.allocate_seq();
        table.insert(first, request(10, 1));
        crate::assert_with_log!(
            index_consistent(&table),
            "consistent after insert",
            true,
            index_consistent(&table)
        );

        crate::test_section!("replace");
        let second = table.allocate_seq();
        table.replace(first, second, request(10, 2));
        crate::assert_with_log!(
            table.current_seq(10) == Some(second),
            "fd index repointed at the new epoch",
            Some(second),
            table.current_seq(10)
        );
        crate::assert_with_log!(
            table.get(first).is_none(),
            "old epoch purged",
            true,
            table.get(first).is_none()
        );
        crate::assert_with_log!(
            index_consistent(&table),
            "consistent after replace",
            true,
            index_consistent(&table)
        );

        crate::test_section!("remove");
        let removed = table.remove(second);
        crate::assert_with_log!(removed.is_some(), "removal found the epoch", true, removed.is_some());
        crate::assert_with_log!(
            table.current_seq(10).is_none(),
            "fd index cleared",
            true,
            table.current_seq(10).is_none()
        );
        crate::assert_with_log!(
            table.remove(second).is_none(),
            "second removal is a no-op",
            true,
            table.remove(second).is_none()
        );
        crate::test_complete!("insert_replace_remove_keep_index_consistent");
    }
}
