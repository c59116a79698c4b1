use std::fmt;
use std::future::{Future, IntoFuture};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

type Subscriber<T, E> = Box<dyn FnOnce(&Result<T, E>) + Send>;

/// A `Waiter` holds one eventual outcome, settled at most once by
/// [`resolve`](Waiter::resolve) or [`reject`](Waiter::reject), and observed by
/// any number of [`finish`](Waiter::finish) futures and
/// [`subscribe`](Waiter::subscribe) callbacks. Clones share the same outcome.
///
/// # Examples
///
/// ```
/// use waiter::Waiter;
/// use futures::executor::block_on;
/// use std::thread;
/// let waiter = Waiter::<String, String>::new();
/// let waiter2 = waiter.clone();
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received on task 1 {:?}", waiter2.finish().await);
/// }));
/// waiter.resolve("Hi".into());
/// task1.join().expect("The task1 thread has panicked.");
/// assert_eq!(block_on(waiter.finish()), Ok("Hi".to_string()));
/// ```
pub struct Waiter<T, E> {
    promise: Arc<Mutex<Inner<T, E>>>,
}

enum Inner<T, E> {
    Pending(Pending<T, E>),
    Settled(Result<T, E>),
}

struct Pending<T, E> {
    // Keyed by the slot of the `Finish` future that registered the waker.
    waker: Vec<(usize, Waker)>,
    next_slot: usize,
    subscribers: Vec<Subscriber<T, E>>,
}

impl<T, E> Default for Pending<T, E> {
    fn default() -> Self {
        Self {
            waker: Vec::new(),
            next_slot: 0,
            subscribers: Vec::new(),
        }
    }
}

impl<T, E> Waiter<T, E> {
    // Nothing panics while the lock is held, so a poisoned state is still
    // consistent.
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.promise.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the waiter has been resolved or rejected. Never blocks.
    pub fn is_done(&self) -> bool {
        matches!(*self.lock(), Inner::Settled(_))
    }
}

impl<T, E> Waiter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        let waiter = Self {
            promise: Arc::new(Mutex::new(Inner::Pending(Pending::default()))),
        };
        // Keeps unobserved rejections visible without consuming them.
        waiter.on_settled(|outcome| {
            if let Err(reason) = outcome {
                tracing::debug!(?reason, "waiter rejected");
            }
        });
        waiter
    }

    /// Creates a waiter and hands its settlement handles to `executor`, which
    /// runs before this returns. The handles may be kept and used later, from
    /// any thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use waiter::Waiter;
    /// use futures::executor::block_on;
    /// use std::thread;
    /// let waiter = Waiter::<u32, String>::with_executor(|resolve, _reject| {
    ///     thread::spawn(move || resolve.resolve(7));
    /// });
    /// assert_eq!(block_on(waiter.finish()), Ok(7));
    /// ```
    pub fn with_executor<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>),
    {
        let waiter = Self::new();
        executor(
            Resolver {
                waiter: waiter.clone(),
            },
            Rejecter {
                waiter: waiter.clone(),
            },
        );
        waiter
    }

    /// Fulfills the waiter with `value`. Returns `false`, leaving the stored
    /// outcome untouched, if the waiter was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects the waiter with `reason`. Returns `false`, leaving the stored
    /// outcome untouched, if the waiter was already settled.
    pub fn reject(&self, reason: E) -> bool {
        self.settle(Err(reason))
    }

    /// Returns a future that completes with the outcome once the waiter is
    /// settled. It can be called any number of times; every call yields the
    /// same outcome.
    pub fn finish(&self) -> Finish<T, E> {
        Finish {
            waiter: self.clone(),
            slot: None,
        }
    }

    /// Registers callbacks run exactly once when the waiter settles, or right
    /// away if it already has. Only the callback matching the outcome runs.
    ///
    /// A panicking callback is caught and logged; it does not keep other
    /// subscribers from running and does not reach the settling caller.
    pub fn subscribe<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + Send + 'static,
        R: FnOnce(E) + Send + 'static,
    {
        self.on_settled(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value.clone()),
            Err(reason) => on_rejected(reason.clone()),
        });
    }

    /// Like [`subscribe`](Waiter::subscribe) with a rejection callback that
    /// does nothing. Other observers still see the rejection.
    pub fn subscribe_fulfilled<F>(&self, on_fulfilled: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.subscribe(on_fulfilled, |_| {});
    }

    pub(crate) fn on_settled<F>(&self, subscriber: F)
    where
        F: FnOnce(&Result<T, E>) + Send + 'static,
    {
        let outcome = match &mut *self.lock() {
            Inner::Pending(pending) => {
                pending.subscribers.push(Box::new(subscriber));
                return;
            }
            Inner::Settled(outcome) => outcome.clone(),
        };
        notify(Box::new(subscriber), &outcome);
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let pending = {
            let mut promise = self.lock();
            match &mut *promise {
                Inner::Settled(_) => {
                    tracing::trace!("ignoring settlement of an already settled waiter");
                    return false;
                }
                Inner::Pending(pending) => {
                    let pending = mem::take(pending);
                    *promise = Inner::Settled(outcome.clone());
                    pending
                }
            }
        };
        // The lock is released before anyone is notified, so subscribers may
        // call back into the waiter.
        for (_, waker) in pending.waker {
            waker.wake();
        }
        for subscriber in pending.subscribers {
            notify(subscriber, &outcome);
        }
        true
    }
}

fn notify<T, E>(subscriber: Subscriber<T, E>, outcome: &Result<T, E>) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber(outcome)));
    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        tracing::error!(panic = message, "waiter subscriber panicked");
    }
}

impl<T, E> Default for Waiter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Waiter<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Waiter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T: Clone, E: Clone> IntoFuture for Waiter<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Finish<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Finish {
            waiter: self,
            slot: None,
        }
    }
}

/// Future returned by [`Waiter::finish`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Finish<T, E> {
    waiter: Waiter<T, E>,
    slot: Option<usize>,
}

impl<T: Clone, E: Clone> Future for Finish<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut promise = this.waiter.lock();
        match &mut *promise {
            Inner::Settled(outcome) => Poll::Ready(outcome.clone()),
            Inner::Pending(pending) => {
                let registered = this
                    .slot
                    .and_then(|slot| pending.waker.iter_mut().find(|(key, _)| *key == slot));
                match registered {
                    Some((_, waker)) => {
                        if !waker.will_wake(cx.waker()) {
                            waker.clone_from(cx.waker());
                        }
                    }
                    None => {
                        let slot = pending.next_slot;
                        pending.next_slot += 1;
                        pending.waker.push((slot, cx.waker().clone()));
                        this.slot = Some(slot);
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<T, E> Drop for Finish<T, E> {
    /// Forget the waker of a future dropped before settlement.
    fn drop(&mut self) {
        let Some(slot) = self.slot else { return };
        if let Inner::Pending(pending) = &mut *self.waiter.lock() {
            pending.waker.retain(|(key, _)| *key != slot);
        }
    }
}

impl<T, E> fmt::Debug for Finish<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finish").field("waiter", &self.waiter).finish()
    }
}

/// The resolve half handed to an executor.
pub struct Resolver<T, E> {
    waiter: Waiter<T, E>,
}

/// The reject half handed to an executor.
pub struct Rejecter<T, E> {
    waiter: Waiter<T, E>,
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    pub fn resolve(&self, value: T) -> bool {
        self.waiter.resolve(value)
    }
}

impl<T, E> Rejecter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    pub fn reject(&self, reason: E) -> bool {
        self.waiter.reject(reason)
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            waiter: self.waiter.clone(),
        }
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            waiter: self.waiter.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resolver").field(&self.waiter).finish()
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejecter").field(&self.waiter).finish()
    }
}
