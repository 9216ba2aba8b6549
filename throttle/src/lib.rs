//! Bounding the number of concurrently executing remote calls
//!
//! Remote storage APIs tolerate concurrent requests but not unlimited ones. This crate provides
//! a small limiter that the worker pool consults before every remote call so that at most
//! `max_in_flight` calls are outstanding at any time.
//!
//! # Usage
//!
//! ```rust,no_run
//! use throttle::Throttle;
//!
//! # async fn example() {
//! let throttle = std::sync::Arc::new(Throttle::new(10));
//! let permit = throttle.permit().await;
//! tokio::spawn(async move {
//!     let _permit = permit;
//!     // issue the remote call here - the slot is released when the permit is dropped
//! });
//! # }
//! ```
//!
//! A limit of `0` disables throttling: [`Throttle::permit`] then returns immediately with an
//! empty permit.
//!
//! # Ownership
//!
//! Permits are owned (`'static`) so they can be moved into spawned tasks. Unlike process-wide
//! limiters, every [`Throttle`] is an ordinary value, so independent runs (and tests) never share
//! state.

mod semaphore;

#[derive(Debug)]
pub struct Throttle {
    sem: semaphore::Semaphore,
}

/// Slot in a [`Throttle`]; released on drop.
#[derive(Debug)]
pub struct Permit {
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl Throttle {
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        tracing::debug!("throttle limit: {}", max_in_flight);
        Self {
            sem: semaphore::Semaphore::new(max_in_flight),
        }
    }

    /// Number of permits currently held. Always 0 for an unlimited throttle.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.sem.in_use()
    }

    pub async fn permit(&self) -> Permit {
        Permit {
            _permit: self.sem.acquire_owned().await,
        }
    }
}
