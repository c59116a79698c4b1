use crate::waiter::{Rejecter, Resolver, Waiter};
use crate::TimeoutError;
use std::fmt;
use std::ops::Deref;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// A [`Waiter`] with a deadline. If nothing settles it within `timeout`, it
/// rejects itself with a [`TimeoutError`], converted into `E`.
///
/// Every [`Waiter`] operation is available through `Deref`. The deadline
/// timer is a Tokio task; it is aborted as soon as the waiter settles, by
/// whichever path.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use waiter::{TimedWaiter, TimeoutError};
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let waiter: TimedWaiter<u32> = TimedWaiter::new(Duration::from_millis(10));
/// let err = waiter.finish().await.unwrap_err();
/// assert_eq!(err, TimeoutError::new(Duration::from_millis(10)));
/// # });
/// ```
pub struct TimedWaiter<T, E = TimeoutError> {
    waiter: Waiter<T, E>,
    timeout: Duration,
    timer: AbortHandle,
}

impl<T, E> TimedWaiter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Debug + From<TimeoutError> + Send + 'static,
{
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(timeout: Duration) -> Self {
        Self::with_executor(timeout, |_, _| {})
    }

    /// Like [`Waiter::with_executor`], with a deadline.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_executor<F>(timeout: Duration, executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>),
    {
        Self::with_executor_in(&Handle::current(), timeout, executor)
    }

    /// Spawns the deadline timer on `handle` instead of the current runtime.
    pub fn new_in(handle: &Handle, timeout: Duration) -> Self {
        Self::with_executor_in(handle, timeout, |_, _| {})
    }

    pub fn with_executor_in<F>(handle: &Handle, timeout: Duration, executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>),
    {
        let waiter = Waiter::with_executor(executor);

        let deadline = waiter.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if deadline.reject(TimeoutError::new(timeout).into()) {
                tracing::debug!(?timeout, "waiter deadline elapsed");
            }
        });
        let timer = task.abort_handle();
        let cancel = task.abort_handle();

        // Fires immediately if the executor already settled the waiter.
        waiter.on_settled(move |_| cancel.abort());

        Self {
            waiter,
            timeout,
            timer,
        }
    }
}

impl<T, E> TimedWaiter<T, E> {
    /// The deadline this waiter was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Gives up the deadline wrapper. The timer keeps running until the
    /// waiter settles.
    pub fn into_waiter(self) -> Waiter<T, E> {
        self.waiter
    }
}

impl<T, E> Deref for TimedWaiter<T, E> {
    type Target = Waiter<T, E>;

    fn deref(&self) -> &Self::Target {
        &self.waiter
    }
}

impl<T, E> AsRef<Waiter<T, E>> for TimedWaiter<T, E> {
    fn as_ref(&self) -> &Waiter<T, E> {
        &self.waiter
    }
}

impl<T, E> fmt::Debug for TimedWaiter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedWaiter")
            .field("done", &self.waiter.is_done())
            .field("timeout", &self.timeout)
            .field("timer_finished", &self.timer.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::TimedWaiter;
    use crate::TimeoutError;
    use std::time::Duration;
    use tokio::runtime::{Builder, Runtime};

    fn runtime() -> Runtime {
        Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("failed to build runtime")
    }

    #[test]
    fn test_sync_settlement_aborts_timer() {
        let rt = runtime();
        let waiter: TimedWaiter<u32> =
            TimedWaiter::with_executor_in(rt.handle(), Duration::from_secs(60), |resolve, _| {
                resolve.resolve(1);
            });
        assert!(waiter.is_done());
        rt.block_on(async { tokio::time::sleep(Duration::from_millis(20)).await });
        assert!(waiter.timer.is_finished());
        assert_eq!(rt.block_on(waiter.finish()), Ok(1));
    }

    #[test]
    fn test_later_settlement_aborts_timer() {
        let rt = runtime();
        let waiter: TimedWaiter<u32> = TimedWaiter::new_in(rt.handle(), Duration::from_secs(60));
        rt.block_on(async { tokio::time::sleep(Duration::from_millis(10)).await });
        assert!(!waiter.timer.is_finished());

        assert!(waiter.resolve(4));
        rt.block_on(async { tokio::time::sleep(Duration::from_millis(10)).await });
        assert!(waiter.timer.is_finished());
        assert_eq!(rt.block_on(waiter.finish()), Ok(4));
    }

    #[test]
    fn test_deadline_on_explicit_handle() {
        let rt = runtime();
        let waiter: TimedWaiter<u32> = TimedWaiter::new_in(rt.handle(), Duration::from_millis(10));
        assert_eq!(waiter.timeout(), Duration::from_millis(10));
        assert!(!waiter.is_done());
        let outcome = rt.block_on(waiter.finish());
        assert_eq!(outcome, Err(TimeoutError::new(Duration::from_millis(10))));
        assert!(waiter.is_done());
    }

    #[test]
    fn test_into_waiter_keeps_deadline() {
        let rt = runtime();
        let waiter: TimedWaiter<u32> = TimedWaiter::new_in(rt.handle(), Duration::from_millis(10));
        let waiter = waiter.into_waiter();
        let outcome = rt.block_on(waiter.finish());
        assert!(matches!(outcome, Err(err) if err.max_wait() == Duration::from_millis(10)));
    }
}
