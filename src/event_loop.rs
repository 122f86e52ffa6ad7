//! The per-thread event loop.
//!
//! An [`EventLoop`] multiplexes two sources of work onto one waiting
//! thread: readiness for a dynamic set of registered descriptors, and
//! time-ordered messages delivered to handler objects.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         EventLoop                            │
//! │  ┌───────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  WakeFd   │  │ RequestTable │  │     MessageQueue      │  │
//! │  │ (eventfd) │  │ seq ⇄ fd maps│  │ (deadline-sorted)     │  │
//! │  └─────┬─────┘  └──────┬───────┘  └──────────┬────────────┘  │
//! │        │               │ one loop-wide mutex │               │
//! │  ┌─────▼───────────────▼─────────────────────▼────────────┐  │
//! │  │                    Poller (epoll)                      │  │
//! │  │     wait() runs with the mutex released                │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Threading
//!
//! Exactly one thread — the loop thread — may call [`poll_once`] or
//! [`poll_all`] on a given loop. Every other operation (registration,
//! messages, [`wake`]) may be called from any thread; mutations happen
//! under the loop mutex and opportunistically write the wake descriptor to
//! pop a blocked wait. Callbacks and message handlers are always invoked
//! with the mutex released, so they may re-enter the public API freely.
//!
//! # Descriptor recycling
//!
//! The kernel associates readiness tokens with open files, not descriptor
//! integers. A callback that closes its own descriptor can leave a stale
//! kernel entry behind if the integer is immediately reused. Every
//! registration therefore carries a fresh sequence number as its kernel
//! token, removal is keyed by sequence rather than descriptor, and when the
//! kernel refuses to update a stale entry the whole readiness set is
//! rebuilt from the request table at the top of the next poll.
//!
//! [`poll_once`]: EventLoop::poll_once
//! [`poll_all`]: EventLoop::poll_all
//! [`wake`]: EventLoop::wake

use crate::callback::{CallbackAction, FdCallback};
use crate::error::AddFdError;
use crate::events::Events;
use crate::message::{Message, MessageHandler};
use crate::poller::{Poller, ReadyBatch, WaitOutcome};
use crate::queue::{MessageEnvelope, MessageQueue};
use crate::request::{Request, RequestTable, SequenceNumber, WAKE_SEQ};
use crate::time::{duration_to_millis_ceil, Uptime};
use crate::wake::WakeFd;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Identifier sentinel marking a callback registration. Equal to the
/// `Callback` poll result code.
const CALLBACK_IDENT: i32 = -2;

/// Result of one [`EventLoop::poll_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// The poll was woken before its timeout expired, either explicitly
    /// through [`EventLoop::wake`] or by signal interruption.
    Wake,
    /// One or more callbacks or message handlers were invoked.
    Callback,
    /// The timeout expired with nothing to deliver.
    Timeout,
    /// The kernel wait failed unexpectedly. The loop remains usable.
    Error,
    /// A descriptor registered with an identifier became ready.
    Ident {
        /// The caller-chosen identifier.
        ident: i32,
        /// The ready descriptor.
        fd: RawFd,
        /// Translated readiness events.
        events: Events,
        /// The opaque value supplied at registration.
        data: usize,
    },
}

impl PollResult {
    /// The integer result code: `-1` wake, `-2` callback, `-3` timeout,
    /// `-4` error, or the non-negative identifier verbatim.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Wake => -1,
            Self::Callback => CALLBACK_IDENT,
            Self::Timeout => -3,
            Self::Error => -4,
            Self::Ident { ident, .. } => *ident,
        }
    }
}

/// Result code decided by an inner poll, pending until all identifier
/// responses have been replayed.
#[derive(Debug, Clone, Copy)]
enum PollCode {
    Wake,
    Callback,
    Timeout,
    Error,
}

impl PollCode {
    const fn into_result(self) -> PollResult {
        match self {
            Self::Wake => PollResult::Wake,
            Self::Callback => PollResult::Callback,
            Self::Timeout => PollResult::Timeout,
            Self::Error => PollResult::Error,
        }
    }
}

/// Loop preparation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrepareOptions(u32);

impl PrepareOptions {
    /// Permit registrations that carry an identifier instead of a callback.
    pub const ALLOW_NON_CALLBACKS: PrepareOptions = PrepareOptions(1 << 0);

    /// Returns the empty option set.
    #[must_use]
    pub const fn empty() -> Self {
        PrepareOptions(0)
    }

    /// Returns true if every option in `other` is set in `self`.
    #[must_use]
    pub const fn contains(&self, other: PrepareOptions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combines option sets.
    #[must_use]
    pub const fn add(self, other: PrepareOptions) -> Self {
        PrepareOptions(self.0 | other.0)
    }
}

/// Snapshot of a descriptor's current registration, for diagnostics.
pub struct FdState {
    /// The caller identifier, or the callback sentinel (`-2`).
    pub ident: i32,
    /// The requested event set.
    pub events: Events,
    /// The opaque caller value.
    pub data: usize,
    /// The registered callback, if any.
    pub callback: Option<Arc<dyn FdCallback>>,
}

impl fmt::Debug for FdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdState")
            .field("ident", &self.ident)
            .field("events", &self.events)
            .field("data", &self.data)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// A readiness delivery captured inside the wait and consumed after the
/// mutex is dropped. Holds a snapshot of the request so the delivery stays
/// coherent even if the registration changes concurrently.
struct Response {
    seq: SequenceNumber,
    events: Events,
    request: Request,
}

/// Everything the loop mutex protects.
struct LoopState {
    poller: Poller,
    requests: RequestTable,
    messages: MessageQueue,
    responses: Vec<Response>,
    response_index: usize,
    pending_result: Option<PollCode>,
    polling: bool,
    sending_message: bool,
    rebuild_required: bool,
    next_message_uptime: Option<Uptime>,
}

thread_local! {
    static THREAD_EVENT_LOOP: RefCell<Option<Arc<EventLoop>>> = const { RefCell::new(None) };
}

/// A per-thread event loop.
///
/// See the [module documentation](self) for the threading contract.
pub struct EventLoop {
    allow_non_callbacks: bool,
    wake: WakeFd,
    state: Mutex<LoopState>,
}

impl EventLoop {
    /// Creates a loop. `allow_non_callbacks` permits identifier-only
    /// registrations.
    ///
    /// # Panics
    ///
    /// Panics if the wake descriptor or the kernel readiness set cannot be
    /// created, or if the wake descriptor cannot be registered; a loop
    /// without a working wake channel cannot function.
    #[must_use]
    pub fn new(allow_non_callbacks: bool) -> Arc<Self> {
        let wake =
            WakeFd::new().unwrap_or_else(|err| panic!("could not create wake event fd: {err}"));
        let poller =
            Poller::new().unwrap_or_else(|err| panic!("could not create readiness set: {err}"));
        poller
            .register(WAKE_SEQ, wake.as_raw_fd(), Events::INPUT)
            .unwrap_or_else(|err| panic!("could not register wake event fd: {err}"));

        Arc::new(Self {
            allow_non_callbacks,
            wake,
            state: Mutex::new(LoopState {
                poller,
                requests: RequestTable::new(),
                messages: MessageQueue::new(),
                responses: Vec::new(),
                response_index: 0,
                pending_result: None,
                polling: false,
                sending_message: false,
                rebuild_required: false,
                next_message_uptime: None,
            }),
        })
    }

    /// Returns the loop bound to the current thread, creating and binding
    /// one on first call. Later calls return the cached loop; a differing
    /// option set is reported with a warning and otherwise ignored.
    pub fn prepare(opts: PrepareOptions) -> Arc<Self> {
        let allow_non_callbacks = opts.contains(PrepareOptions::ALLOW_NON_CALLBACKS);
        if let Some(event_loop) = Self::for_thread() {
            if event_loop.allows_non_callbacks() != allow_non_callbacks {
                warn!(
                    cached = event_loop.allows_non_callbacks(),
                    requested = allow_non_callbacks,
                    "event loop already prepared for this thread with a \
                     different non-callback option"
                );
            }
            return event_loop;
        }
        let event_loop = Self::new(allow_non_callbacks);
        Self::set_for_thread(Some(event_loop.clone()));
        event_loop
    }

    /// Returns the loop bound to the current thread, if any.
    #[must_use]
    pub fn for_thread() -> Option<Arc<Self>> {
        THREAD_EVENT_LOOP.with(|slot| slot.borrow().clone())
    }

    /// Binds `event_loop` to the current thread (or unbinds with `None`),
    /// returning the previous binding.
    pub fn set_for_thread(event_loop: Option<Arc<Self>>) -> Option<Arc<Self>> {
        THREAD_EVENT_LOOP.with(|slot| slot.replace(event_loop))
    }

    /// Whether identifier-only registrations are permitted.
    #[must_use]
    pub fn allows_non_callbacks(&self) -> bool {
        self.allow_non_callbacks
    }

    /// Waits for work and dispatches it once.
    ///
    /// Returns when a registered identifier descriptor becomes ready
    /// ([`PollResult::Ident`]), after invoking any due callbacks or message
    /// handlers ([`PollResult::Callback`]), when the timeout expires
    /// ([`PollResult::Timeout`]), on an external [`wake`](Self::wake) or
    /// signal interruption ([`PollResult::Wake`]), or on an unexpected
    /// kernel failure ([`PollResult::Error`]).
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` never blocks.
    /// Identifier responses produced by one kernel wait are replayed one
    /// per call, in kernel order, before the wait's own result code is
    /// returned.
    ///
    /// Only the loop thread may call this.
    pub fn poll_once(&self, timeout: Option<Duration>) -> PollResult {
        loop {
            {
                let mut state = self.state.lock();
                while state.response_index < state.responses.len() {
                    let index = state.response_index;
                    state.response_index += 1;
                    let response = &state.responses[index];
                    let ident = response.request.ident;
                    if ident >= 0 {
                        debug!(
                            ident,
                            fd = response.request.fd,
                            events = ?response.events,
                            "returning signalled identifier"
                        );
                        return PollResult::Ident {
                            ident,
                            fd: response.request.fd,
                            events: response.events,
                            data: response.request.data,
                        };
                    }
                }
                if let Some(code) = state.pending_result.take() {
                    trace!(result = ?code, "returning stored poll result");
                    return code.into_result();
                }
            }
            self.poll_inner(timeout);
        }
    }

    /// Like [`poll_once`](Self::poll_once), but repeats while callbacks are
    /// being dispatched, so the caller only observes identifier, wake,
    /// timeout and error results. With a finite positive timeout the
    /// remaining budget is recomputed after each round and exhaustion
    /// yields [`PollResult::Timeout`].
    pub fn poll_all(&self, timeout: Option<Duration>) -> PollResult {
        match timeout {
            Some(limit) if !limit.is_zero() => {
                let deadline = Uptime::now().saturating_add(limit);
                let mut remaining = limit;
                loop {
                    let result = self.poll_once(Some(remaining));
                    if result != PollResult::Callback {
                        return result;
                    }
                    let now = Uptime::now();
                    if now.millis_until(deadline) == 0 {
                        return PollResult::Timeout;
                    }
                    remaining = deadline.duration_since(now);
                }
            }
            _ => loop {
                let result = self.poll_once(timeout);
                if result != PollResult::Callback {
                    return result;
                }
            },
        }
    }

    /// Registers a descriptor.
    ///
    /// With a callback, `ident` is ignored and forced to the callback
    /// sentinel; readiness invokes the callback on the loop thread. Without
    /// a callback the loop must allow non-callback registrations, `ident`
    /// must be non-negative, and readiness is reported by returning the
    /// identifier from [`poll_once`](Self::poll_once).
    ///
    /// Registering a descriptor that already has a registration replaces
    /// it: the old epoch's callback can never fire again.
    ///
    /// Only `INPUT` and `OUTPUT` are subscribable; `ERROR` and `HANGUP` are
    /// reported regardless.
    ///
    /// # Errors
    ///
    /// Argument errors and kernel registration failures; neither leaves a
    /// partial registration behind.
    pub fn add_fd(
        &self,
        fd: RawFd,
        ident: i32,
        events: Events,
        callback: Option<Arc<dyn FdCallback>>,
        data: usize,
    ) -> Result<(), AddFdError> {
        debug!(fd, ident, ?events, has_callback = callback.is_some(), "add_fd");
        let ident = if callback.is_some() {
            CALLBACK_IDENT
        } else {
            if !self.allow_non_callbacks {
                error!(fd, "attempt to register without a callback on a loop that disallows it");
                return Err(AddFdError::CallbackRequired);
            }
            if ident < 0 {
                error!(fd, ident, "attempt to register without a callback and a negative ident");
                return Err(AddFdError::NegativeIdent);
            }
            ident
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let seq = state.requests.allocate_seq();
        let request = Request {
            fd,
            ident,
            events,
            callback,
            data,
        };

        match state.requests.current_seq(fd) {
            None => {
                state
                    .poller
                    .register(seq, fd, request.subscribed())
                    .map_err(|source| {
                        error!(fd, error = %source, "error adding fd to the readiness set");
                        AddFdError::Kernel { fd, source }
                    })?;
                state.requests.insert(seq, request);
            }
            Some(old_seq) => {
                if let Err(err) = state.poller.modify(seq, fd, request.subscribed()) {
                    if err.raw_os_error() == Some(libc::ENOENT) {
                        // The old descriptor was closed and the integer
                        // recycled before its registration was removed; the
                        // kernel no longer knows this fd. Fall back to a
                        // fresh add. The stale entry for the old open file
                        // cannot be deleted any more, so a full rebuild is
                        // scheduled.
                        debug!(fd, "modify hit a recycled descriptor, falling back to add");
                        state
                            .poller
                            .register(seq, fd, request.subscribed())
                            .map_err(|source| {
                                error!(
                                    fd,
                                    error = %source,
                                    "error re-adding recycled fd to the readiness set"
                                );
                                AddFdError::Kernel { fd, source }
                            })?;
                        self.schedule_rebuild_locked(state);
                    } else {
                        error!(fd, error = %err, "error modifying readiness subscription");
                        return Err(AddFdError::Kernel { fd, source: err });
                    }
                }
                state.requests.replace(old_seq, seq, request);
            }
        }
        Ok(())
    }

    /// Registers a descriptor with a callback. Convenience over
    /// [`add_fd`](Self::add_fd) for closure callbacks.
    ///
    /// # Errors
    ///
    /// Kernel registration failures, as for [`add_fd`](Self::add_fd).
    pub fn add_fd_with_callback<C>(
        &self,
        fd: RawFd,
        events: Events,
        callback: C,
    ) -> Result<(), AddFdError>
    where
        C: FdCallback + 'static,
    {
        self.add_fd(fd, CALLBACK_IDENT, events, Some(Arc::new(callback)), 0)
    }

    /// Removes the current registration of `fd`. Returns `false` if the
    /// descriptor has none.
    ///
    /// The registration is erased from the tables before the kernel set is
    /// touched, so readiness already in flight for the removed epoch is
    /// dropped rather than delivered.
    pub fn remove_fd(&self, fd: RawFd) -> bool {
        let mut guard = self.state.lock();
        match guard.requests.current_seq(fd) {
            None => false,
            Some(seq) => self.remove_seq_locked(&mut guard, seq),
        }
    }

    /// Re-applies the subscribed event mask for the current registration of
    /// `fd`. Used after mutating the event interest recorded for a
    /// descriptor. Returns `false` if the descriptor is not registered or
    /// the kernel update failed.
    pub fn repoll(&self, fd: RawFd) -> bool {
        let guard = self.state.lock();
        let Some(seq) = guard.requests.current_seq(fd) else {
            return false;
        };
        let Some(request) = guard.requests.get(seq) else {
            return false;
        };
        assert!(
            request.fd == fd,
            "registration tables are inconsistent: fd {fd} resolved to a request for fd {}",
            request.fd
        );
        guard.poller.modify(seq, fd, request.subscribed()).is_ok()
    }

    /// Enqueues a message for immediate delivery.
    pub fn send_message(&self, handler: Arc<dyn MessageHandler>, message: Message) {
        self.send_message_at_time(Uptime::now(), handler, message);
    }

    /// Enqueues a message for delivery `delay` from now.
    pub fn send_message_delayed(
        &self,
        delay: Duration,
        handler: Arc<dyn MessageHandler>,
        message: Message,
    ) {
        self.send_message_at_time(Uptime::now().saturating_add(delay), handler, message);
    }

    /// Enqueues a message for delivery at an absolute monotonic deadline.
    ///
    /// Messages with equal deadlines are delivered in enqueue order. The
    /// waiter is woken only when the new message became the queue head and
    /// the loop is not already dispatching messages; in every other case
    /// the loop recomputes its wakeup time before sleeping again.
    pub fn send_message_at_time(
        &self,
        uptime: Uptime,
        handler: Arc<dyn MessageHandler>,
        message: Message,
    ) {
        trace!(what = message.what, deadline = uptime.as_nanos(), "enqueueing message");
        let new_head = {
            let mut state = self.state.lock();
            let index = state.messages.push(MessageEnvelope {
                uptime,
                handler,
                message,
            });
            if state.sending_message {
                return;
            }
            index == 0
        };
        if new_head {
            self.wake();
        }
    }

    /// Deletes every queued message addressed to `handler`; with `what`
    /// given, only messages carrying that code.
    pub fn remove_messages(&self, handler: &Arc<dyn MessageHandler>, what: Option<i32>) {
        let mut state = self.state.lock();
        state.messages.remove_matching(handler, what);
    }

    /// Wakes the loop thread out of a blocked poll. Safe to call from any
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if the wake signal cannot be written for any reason other
    /// than a saturated counter; see [`PollResult::Wake`].
    pub fn wake(&self) {
        trace!("wake");
        self.wake.wake();
    }

    /// True while the loop thread is parked in (or entering) the kernel
    /// wait. A true result is already stale by the time the caller sees it;
    /// useful only as a diagnostic signal.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.state.lock().polling
    }

    /// Snapshot of the current registration of `fd`, for diagnostics.
    #[must_use]
    pub fn fd_state(&self, fd: RawFd) -> Option<FdState> {
        let guard = self.state.lock();
        let seq = guard.requests.current_seq(fd)?;
        let request = guard.requests.get(seq)?;
        Some(FdState {
            ident: request.ident,
            events: request.events,
            data: request.data,
            callback: request.callback.clone(),
        })
    }

    /// One inner poll: wait on the kernel, translate readiness into
    /// responses, dispatch due messages and fd callbacks, and store the
    /// resulting code for [`poll_once`](Self::poll_once) to emit after the
    /// identifier responses are replayed.
    fn poll_inner(&self, timeout: Option<Duration>) {
        let mut guard = self.state.lock();

        // Tighten the timeout to the nearest of the caller timeout and the
        // head message deadline. A zero timeout stays a non-blocking poll.
        let mut timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(limit) => clamp_millis(duration_to_millis_ceil(limit)),
        };
        if timeout != Some(Duration::ZERO) {
            if let Some(next_uptime) = guard.next_message_uptime {
                let message_ms = clamp_millis(Uptime::now().millis_until(next_uptime));
                if timeout_ms < 0 || message_ms < timeout_ms {
                    timeout_ms = message_ms;
                }
            }
        }
        trace!(timeout_ms, "waiting for readiness");

        let mut result = PollCode::Wake;
        guard.responses.clear();
        guard.response_index = 0;

        // About to idle. The poller clone keeps the kernel set alive across
        // the unlocked wait even if a rebuild swaps it concurrently.
        guard.polling = true;
        let poller = guard.poller.clone();
        drop(guard);

        let mut batch = ReadyBatch::new();
        let outcome = poller.wait(timeout_ms, &mut batch);

        let mut guard = self.state.lock();
        guard.polling = false;

        if guard.rebuild_required {
            guard.rebuild_required = false;
            self.rebuild_locked(&mut guard);
            // Skip event translation; the wake that scheduled the rebuild
            // surfaces as a wake result.
        } else {
            match outcome {
                WaitOutcome::Interrupted => {
                    // Signal interruption is reported as an external wake.
                }
                WaitOutcome::Failed(err) => {
                    warn!(error = %err, "poll failed with an unexpected error");
                    result = PollCode::Error;
                }
                WaitOutcome::TimedOut => {
                    result = PollCode::Timeout;
                }
                WaitOutcome::Ready => {
                    let state = &mut *guard;
                    for item in &batch {
                        if item.seq == WAKE_SEQ {
                            if item.readiness.contains(Events::INPUT) {
                                self.wake.drain();
                            } else {
                                warn!(
                                    readiness = ?item.readiness,
                                    "ignoring unexpected readiness on the wake descriptor"
                                );
                            }
                        } else if let Some(request) = state.requests.get(item.seq) {
                            state.responses.push(Response {
                                seq: item.seq,
                                events: item.readiness,
                                request: request.clone(),
                            });
                        } else {
                            warn!(
                                seq = item.seq,
                                readiness = ?item.readiness,
                                "ignoring readiness for a sequence number that is \
                                 no longer registered"
                            );
                        }
                    }
                }
            }
        }

        // Dispatch due messages. The head message is popped and delivered
        // with the mutex released; the handler strong reference is dropped
        // before the mutex is reacquired so handler destruction never races
        // the loop.
        guard.next_message_uptime = None;
        loop {
            let now = Uptime::now();
            let Some(head_uptime) = guard.messages.next_uptime() else {
                break;
            };
            if head_uptime > now {
                // The head message determines the next wakeup time.
                guard.next_message_uptime = Some(head_uptime);
                break;
            }
            let Some(envelope) = guard.messages.pop_front() else {
                break;
            };
            guard.sending_message = true;
            drop(guard);

            trace!(what = envelope.message.what, "delivering message");
            envelope.handler.handle_message(&envelope.message);
            drop(envelope);

            guard = self.state.lock();
            guard.sending_message = false;
            result = PollCode::Callback;
        }
        drop(guard);

        // Invoke fd callbacks, outside the mutex. The callback reference is
        // taken out of the response record before the call and dropped
        // right after it, so the record never outlives the invocation with
        // a strong reference.
        let mut index = 0;
        loop {
            let next = {
                let mut guard = self.state.lock();
                let mut found = None;
                while index < guard.responses.len() {
                    let current = index;
                    index += 1;
                    let response = &mut guard.responses[current];
                    if let Some(callback) = response.request.callback.take() {
                        found = Some((
                            response.seq,
                            response.request.fd,
                            response.events,
                            response.request.data,
                            callback,
                        ));
                        break;
                    }
                }
                found
            };
            let Some((seq, fd, events, data, callback)) = next else {
                break;
            };

            trace!(fd, ?events, "invoking fd event callback");
            // The callback may close the descriptor, or even reuse the
            // integer, before returning; unregistration goes through the
            // sequence number captured in the response.
            if callback.handle_event(fd, events, data) == CallbackAction::Unregister {
                let mut guard = self.state.lock();
                self.remove_seq_locked(&mut guard, seq);
            }
            drop(callback);
            result = PollCode::Callback;
        }

        self.state.lock().pending_result = Some(result);
    }

    /// Removes the registration epoch `seq`: both table mappings are erased
    /// before the kernel set is touched, and a kernel refusal for an
    /// already-closed descriptor schedules a rebuild instead of failing.
    fn remove_seq_locked(&self, state: &mut LoopState, seq: SequenceNumber) -> bool {
        let Some(request) = state.requests.remove(seq) else {
            return false;
        };
        debug!(fd = request.fd, seq, "removing registration");
        if let Err(err) = state.poller.unregister(request.fd) {
            match err.raw_os_error() {
                Some(libc::EBADF | libc::ENOENT) => {
                    // The descriptor was closed before it was unregistered,
                    // typically by its own callback. The stale kernel entry
                    // for the old open file cannot be deleted any more;
                    // rebuild the set from the table instead.
                    debug!(fd = request.fd, "removing a closed descriptor, scheduling rebuild");
                    self.schedule_rebuild_locked(state);
                }
                _ => {
                    // The kernel set disagrees with the table in a way the
                    // recycling story does not explain. Rebuild so stale
                    // entries cannot produce readiness with nowhere to go.
                    error!(fd = request.fd, error = %err, "error removing fd from the readiness set");
                    self.schedule_rebuild_locked(state);
                }
            }
        }
        true
    }

    /// Requests a rebuild of the kernel set at the top of the next poll
    /// iteration and wakes the waiter so it happens promptly.
    fn schedule_rebuild_locked(&self, state: &mut LoopState) {
        if !state.rebuild_required {
            debug!("scheduling readiness set rebuild");
            state.rebuild_required = true;
            self.wake.wake();
        }
    }

    /// Destroys and recreates the kernel set from the request table.
    ///
    /// # Panics
    ///
    /// Panics if a fresh kernel set cannot be created or the wake
    /// descriptor cannot be re-registered; per-request failures are logged
    /// and skipped.
    fn rebuild_locked(&self, state: &mut LoopState) {
        debug!(registrations = state.requests.len(), "rebuilding readiness set");
        state.poller =
            Poller::new().unwrap_or_else(|err| panic!("could not create readiness set: {err}"));
        state
            .poller
            .register(WAKE_SEQ, self.wake.as_raw_fd(), Events::INPUT)
            .unwrap_or_else(|err| panic!("could not register wake event fd: {err}"));
        for (seq, request) in state.requests.iter() {
            if let Err(err) = state.poller.register(*seq, request.fd, request.subscribed()) {
                error!(
                    fd = request.fd,
                    error = %err,
                    "error re-adding fd while rebuilding the readiness set"
                );
            }
        }
    }
}

fn clamp_millis(millis: u64) -> libc::c_int {
    libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
}
