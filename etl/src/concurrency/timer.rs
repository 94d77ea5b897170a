//! Resettable deferred timer used for retry backoff.
//!
//! The timer is inert until [`DeferredTimer::start`] is called, which makes it usable as an
//! optional branch of `tokio::select!`. Re-arming reuses the same [`Sleep`] allocation through
//! [`Sleep::reset`], and the configured duration is only replaced when it actually changes.

use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

/// A future that resolves once the armed duration has elapsed.
///
/// [`DeferredTimer`] is `Unpin`, so `&mut timer` can be awaited directly in `select!` and the
/// timer re-armed afterwards.
#[derive(Debug)]
pub struct DeferredTimer {
    /// The active deadline if armed, or `None` when inactive.
    deadline: Option<Pin<Box<Sleep>>>,
    /// Duration used when (re)arming the timer.
    duration: Duration,
}

impl DeferredTimer {
    /// Creates a new, inactive timer for the given `duration`.
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: None,
            duration,
        }
    }

    /// Replaces the duration used when arming. Returns `true` if the value changed.
    ///
    /// An already armed deadline is left untouched until the next [`DeferredTimer::start`].
    pub fn set_duration(&mut self, duration: Duration) -> bool {
        if self.duration == duration {
            return false;
        }

        self.duration = duration;
        true
    }

    /// Arms the timer to fire after the configured duration from now.
    ///
    /// The first call allocates the inner sleep, later calls reset it in place.
    pub fn start(&mut self) {
        let deadline = Instant::now() + self.duration;
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.deadline = Some(Box::pin(sleep(self.duration))),
        }
    }
}

impl Future for DeferredTimer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let Some(deadline) = this.deadline.as_mut() else {
            return Poll::Pending;
        };

        ready!(deadline.as_mut().poll(cx));

        Poll::Ready(())
    }
}
