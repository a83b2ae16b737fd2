//! Listener-to-stream bridging.
//!
//! An [`Observation`] is a cold stream: nothing is registered with the
//! backend until it is first polled. From then on each backend callback is
//! forwarded through an unbounded channel and decoded on the consumer side.
//!
//! Cancellation goes through a [`SubscriptionHandle`]:
//!   1. the cancelled flag is set, so callbacks in flight forward nothing
//!      and `poll_next` yields nothing further;
//!   2. the backend registration is taken out of its slot and removed, at
//!      most once no matter how many clones call `cancel`;
//!   3. the consumer task is woken so a pending `next().await` resolves to
//!      `None`.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::stream::{FusedStream, Stream, StreamExt};
use futures::task::AtomicWaker;
use parking_lot::Mutex;

use crate::backend::{
    BackendResult, DocumentSnapshot, Listener, ListenerRegistration, QuerySnapshot,
};
use crate::error::StoreResult;
use crate::path::ResourcePath;

/// Revocable registration backing one observation.
///
/// Clones share state: cancelling any clone cancels the observation.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    path: ResourcePath,
    cancelled: Arc<AtomicBool>,
    registration: Mutex<Option<ListenerRegistration>>,
    waker: AtomicWaker,
}

impl SubscriptionHandle {
    fn new(path: ResourcePath) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                path,
                cancelled: Arc::new(AtomicBool::new(false)),
                registration: Mutex::new(None),
                waker: AtomicWaker::new(),
            }),
        }
    }

    /// Path being observed.
    pub fn path(&self) -> &ResourcePath {
        &self.inner.path
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Deregisters the backend listener. Safe to call any number of times.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let registration = self.inner.registration.lock().take();
        if let Some(registration) = registration {
            registration.remove();
            tracing::debug!("listener removed for {}", self.inner.path);
        }
        self.inner.waker.wake();
    }

    /// True while a backend registration is held.
    pub fn is_registered(&self) -> bool {
        self.inner.registration.lock().is_some()
    }

    fn cancelled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.cancelled)
    }

    /// Stores the backend token, or removes it at once if already cancelled.
    fn attach(&self, registration: ListenerRegistration) {
        let mut slot = self.inner.registration.lock();
        if self.is_cancelled() {
            drop(slot);
            registration.remove();
            return;
        }
        *slot = Some(registration);
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("path", &self.inner.path.to_string())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type Register<S> = Box<dyn FnOnce(Listener<S>) -> ListenerRegistration + Send>;

enum State<S> {
    Idle(Register<S>),
    Active(mpsc::UnboundedReceiver<BackendResult<S>>),
    Done,
}

/// A stream of decoded snapshots for one path.
///
/// Backend errors are yielded once and end the stream. Dropping the stream
/// cancels it.
pub struct Observation<S, T> {
    state: State<S>,
    handle: SubscriptionHandle,
    decode: fn(S) -> StoreResult<T>,
}

/// Stream of a single document: `None` while it does not exist.
pub type DocumentObservation<R> = Observation<DocumentSnapshot, Option<R>>;

/// Stream of a collection's decodable members.
pub type CollectionObservation<R> = Observation<QuerySnapshot, Vec<R>>;

impl<S: Send + 'static, T> Observation<S, T> {
    pub(crate) fn new(
        path: ResourcePath,
        register: impl FnOnce(Listener<S>) -> ListenerRegistration + Send + 'static,
        decode: fn(S) -> StoreResult<T>,
    ) -> Self {
        Self {
            state: State::Idle(Box::new(register)),
            handle: SubscriptionHandle::new(path),
            decode,
        }
    }

    /// A handle that can cancel this observation from anywhere.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    fn subscribe(&mut self, register: Register<S>) {
        let (tx, rx) = mpsc::unbounded();
        let cancelled = self.handle.cancelled_flag();
        let listener: Listener<S> = Box::new(move |result| {
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.unbounded_send(result);
        });

        let registration = register(listener);
        tracing::debug!("listener registered for {}", self.handle.path());
        self.handle.attach(registration);
        self.state = State::Active(rx);
    }

    fn finish(&mut self) {
        self.state = State::Done;
        self.handle.cancel();
    }
}

impl<S, T> Unpin for Observation<S, T> {}

impl<S: Send + 'static, T> Stream for Observation<S, T> {
    type Item = StoreResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.handle.inner.waker.register(cx.waker());

        loop {
            if this.handle.is_cancelled() {
                this.state = State::Done;
                return Poll::Ready(None);
            }

            match std::mem::replace(&mut this.state, State::Done) {
                State::Idle(register) => this.subscribe(register),
                State::Active(mut rx) => match rx.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(snapshot))) => {
                        this.state = State::Active(rx);
                        if this.handle.is_cancelled() {
                            continue;
                        }
                        return Poll::Ready(Some((this.decode)(snapshot)));
                    }
                    Poll::Ready(Some(Err(e))) => {
                        tracing::debug!("listener for {} failed: {}", this.handle.path(), e);
                        this.finish();
                        return Poll::Ready(Some(Err(e.into())));
                    }
                    Poll::Ready(None) => {
                        this.finish();
                        return Poll::Ready(None);
                    }
                    Poll::Pending => {
                        this.state = State::Active(rx);
                        return Poll::Pending;
                    }
                },
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl<S: Send + 'static, T> FusedStream for Observation<S, T> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done) || self.handle.is_cancelled()
    }
}

impl<S, T> Drop for Observation<S, T> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl<S, T> fmt::Debug for Observation<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle(_) => "idle",
            State::Active(_) => "active",
            State::Done => "done",
        };
        f.debug_struct("Observation")
            .field("path", &self.handle.path().to_string())
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::error::StoreError;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    /// Test double standing in for a backend's listener slot.
    #[derive(Default)]
    struct Slot {
        listener: Mutex<Option<Listener<u32>>>,
        registrations: AtomicUsize,
        removals: Arc<AtomicUsize>,
    }

    impl Slot {
        fn emit(&self, value: BackendResult<u32>) {
            if let Some(listener) = self.listener.lock().as_ref() {
                listener(value);
            }
        }
    }

    fn observe(slot: &Arc<Slot>) -> Observation<u32, u32> {
        let slot = Arc::clone(slot);
        Observation::new(
            ResourcePath::parse("/counters/c1").unwrap(),
            move |listener| {
                *slot.listener.lock() = Some(listener);
                slot.registrations.fetch_add(1, Ordering::SeqCst);
                let removals = Arc::clone(&slot.removals);
                ListenerRegistration::new(move || {
                    removals.fetch_add(1, Ordering::SeqCst);
                })
            },
            |value| Ok(value * 10),
        )
    }

    #[test]
    fn test_registers_lazily_on_first_poll() {
        let slot = Arc::new(Slot::default());
        let mut observation = observe(&slot);
        assert_eq!(slot.registrations.load(Ordering::SeqCst), 0);

        assert!(observation.next().now_or_never().is_none());
        assert_eq!(slot.registrations.load(Ordering::SeqCst), 1);
        assert!(observation.handle().is_registered());
    }

    #[test]
    fn test_forwards_decoded_values_in_order() {
        let slot = Arc::new(Slot::default());
        let mut observation = observe(&slot);
        assert!(observation.next().now_or_never().is_none());

        slot.emit(Ok(1));
        slot.emit(Ok(2));
        assert_eq!(observation.next().now_or_never().unwrap().unwrap().unwrap(), 10);
        assert_eq!(observation.next().now_or_never().unwrap().unwrap().unwrap(), 20);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let slot = Arc::new(Slot::default());
        let mut observation = observe(&slot);
        assert!(observation.next().now_or_never().is_none());

        let handle = observation.handle();
        handle.cancel();
        handle.cancel();
        observation.cancel();
        drop(observation);

        assert_eq!(slot.removals.load(Ordering::SeqCst), 1);
        assert!(handle.is_cancelled());
        assert!(!handle.is_registered());
    }

    #[test]
    fn test_no_delivery_after_cancel_even_if_buffered() {
        let slot = Arc::new(Slot::default());
        let mut observation = observe(&slot);
        assert!(observation.next().now_or_never().is_none());

        // Arrives before cancel but is not consumed yet
        slot.emit(Ok(1));
        observation.cancel();
        // A callback that raced the removal
        slot.emit(Ok(2));

        assert!(observation.next().now_or_never().unwrap().is_none());
        assert!(observation.is_terminated());
    }

    #[test]
    fn test_cancel_before_first_poll_never_registers_listener() {
        let slot = Arc::new(Slot::default());
        let mut observation = observe(&slot);
        observation.cancel();

        assert!(observation.next().now_or_never().unwrap().is_none());
        assert_eq!(slot.registrations.load(Ordering::SeqCst), 0);
        assert_eq!(slot.removals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backend_error_terminates_and_releases_once() {
        let slot = Arc::new(Slot::default());
        let mut observation = observe(&slot);
        assert!(observation.next().now_or_never().is_none());

        slot.emit(Err(BackendError::permission_denied("revoked")));
        slot.emit(Ok(3));

        let item = observation.next().now_or_never().unwrap().unwrap();
        assert!(matches!(item, Err(StoreError::Backend(_))));
        assert!(observation.next().now_or_never().unwrap().is_none());
        assert!(observation.is_terminated());

        drop(observation);
        assert_eq!(slot.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_from_other_task_wakes_consumer() {
        let slot = Arc::new(Slot::default());
        let mut observation = observe(&slot);
        let handle = observation.handle();
        let (seen_tx, mut seen_rx) = mpsc::unbounded();

        let consumer = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(item) = observation.next().await {
                let value = item.unwrap();
                received.push(value);
                seen_tx.unbounded_send(value).unwrap();
            }
            // The loop only ends once the stream yields None
            received
        });

        // Wait until the consumer has subscribed
        while slot.registrations.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        slot.emit(Ok(1));
        assert_eq!(seen_rx.next().await, Some(10));

        handle.cancel();
        let received = consumer.await.unwrap();
        assert_eq!(received, vec![10]);
        assert_eq!(seen_rx.next().await, None);
        assert_eq!(slot.removals.load(Ordering::SeqCst), 1);
    }
}
