//! Weighted concurrency limits for transfers
//!
//! Two consumers share this crate:
//!
//! 1. **Job scheduling** - the transfer scheduler gives every job a weight (the number of concurrent sub-streams
//!    the job may open against the remote store) and admits jobs only while the sum of running weights stays
//!    within the configured thread count.
//! 2. **Connection pools** - a remote session keeps one limiter for its I/O connections and a second, small one
//!    for metadata operations (stat/list), so listing never starves behind large transfers.
//!
//! # Usage
//!
//! ```rust,no_run
//! use throttle::Limiter;
//!
//! # async fn example() -> Result<(), throttle::Error> {
//! let limiter = Limiter::new(5);
//! // a large file asking for 8 streams is clamped to the pool size
//! let permit = limiter.acquire(8).await?;
//! assert_eq!(permit.weight(), 5);
//! drop(permit); // capacity is returned here
//! # Ok(())
//! # }
//! ```
//!
//! # Fairness
//!
//! Waiters are served in FIFO order (tokio's semaphore is fair), so a heavy job queued first is not overtaken
//! by lighter jobs queued after it.

mod semaphore;

pub use semaphore::{Error, Limiter, Permit};
