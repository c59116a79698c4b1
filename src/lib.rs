//! Deferred values that are settled from the outside.
//!
//! A [`Waiter`] is created empty and later resolved or rejected, once, by
//! whoever holds it. Any number of tasks can [`finish`](Waiter::finish) it
//! or [`subscribe`](Waiter::subscribe) to it, and all of them observe the same
//! outcome. A [`TimedWaiter`] adds a deadline after which the waiter rejects
//! itself with a [`TimeoutError`].
//!
//! ```
//! use waiter::Waiter;
//! use futures::executor::block_on;
//! let waiter = Waiter::<u32, String>::new();
//! waiter.subscribe(|value| println!("resolved with {value}"), |_| {});
//! waiter.resolve(5);
//! waiter.reject("ignored".into());
//! assert_eq!(block_on(waiter.finish()), Ok(5));
//! ```

mod error;
pub mod timed;
pub mod waiter;

pub use error::TimeoutError;
pub use timed::TimedWaiter;
pub use waiter::{Finish, Rejecter, Resolver, Waiter};
