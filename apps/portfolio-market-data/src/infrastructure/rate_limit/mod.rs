//! Request Rate Limiter
//!
//! Throttles outbound REST calls to a fixed budget shared by every caller in
//! the process:
//!
//! - at most `max_concurrent` requests in flight
//! - dispatches spaced at least `min_interval` apart
//! - at most `reservoir_capacity` dispatches per fixed `refill_interval` window
//!
//! Requests are admitted strictly in arrival order. When a request arrives
//! and `high_water` requests are already waiting, the oldest waiting request
//! is dropped with [`LimiterError::Dropped`]. A request that finds nobody
//! waiting is never dropped on arrival.
//!
//! # Quota Signal
//!
//! When the reservoir reaches zero the limiter publishes
//! [`QuotaEvent::Depleted`] and flips the `quota_exceeded` flag. A poller then
//! checks the reservoir every `poll_interval`; the first tick that finds
//! capacity again publishes [`QuotaEvent::Restored`] and clears the flag.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::infrastructure::metrics;

const QUOTA_EVENT_CAPACITY: usize = 16;

// =============================================================================
// Configuration
// =============================================================================

/// Request budget enforced by the limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    /// Minimum spacing between two dispatches.
    pub min_interval: Duration,
    /// Maximum number of requests in flight.
    pub max_concurrent: usize,
    /// Dispatches allowed per refill window.
    pub reservoir_capacity: u32,
    /// Length of the refill window.
    pub refill_interval: Duration,
    /// Maximum number of waiting requests before the oldest is dropped.
    pub high_water: usize,
    /// Tick used to detect that the reservoir was refilled.
    pub poll_interval: Duration,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(40),
            max_concurrent: 10,
            reservoir_capacity: 55,
            refill_interval: Duration::from_secs(60),
            high_water: 20,
            poll_interval: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Events and Errors
// =============================================================================

/// Quota transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaEvent {
    /// Reservoir reached zero.
    Depleted,
    /// Reservoir has capacity again after a depletion.
    Restored,
}

/// Errors returned by [`RateLimiter::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    /// Request was dropped because the queue exceeded its high water mark.
    #[error("request dropped: pending queue exceeded high water mark")]
    Dropped,

    /// Limiter was closed.
    #[error("rate limiter closed")]
    Closed,
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug)]
struct Window {
    reservoir: u32,
    next_refill: Instant,
    last_dispatch: Option<Instant>,
}

#[derive(Debug, Default)]
struct Pending {
    next_id: u64,
    waiting: VecDeque<(u64, oneshot::Sender<()>)>,
}

#[derive(Debug)]
struct Shared {
    budget: RateBudget,
    /// FIFO turnstile: only the holder may wait on the reservoir and spacing.
    turnstile: tokio::sync::Mutex<()>,
    slots: Arc<Semaphore>,
    window: Mutex<Window>,
    pending: Mutex<Pending>,
    quota_exceeded: watch::Sender<bool>,
    events: broadcast::Sender<QuotaEvent>,
}

impl Shared {
    fn refill_if_due(&self, window: &mut Window, now: Instant) {
        if now < window.next_refill {
            return;
        }
        while window.next_refill <= now {
            window.next_refill += self.budget.refill_interval;
        }
        window.reservoir = self.budget.reservoir_capacity;
    }

    fn has_capacity(&self) -> bool {
        let mut window = self.window.lock();
        self.refill_if_due(&mut window, Instant::now());
        window.reservoir > 0
    }

    fn mark_restored(&self) {
        let changed = self.quota_exceeded.send_if_modified(|flag| std::mem::replace(flag, false));
        if changed {
            tracing::info!("Request quota restored");
            metrics::set_quota_exceeded(false);
            let _ = self.events.send(QuotaEvent::Restored);
        }
    }
}

/// Position in the pending queue.
///
/// Leaves the queue on drop so cancelled callers never count against the
/// high water mark.
struct Ticket<'a> {
    shared: &'a Shared,
    id: u64,
    left: bool,
}

impl Ticket<'_> {
    /// Leave the pending queue. Returns `false` if the ticket was dropped.
    fn leave(&mut self) -> bool {
        self.left = true;
        let mut pending = self.shared.pending.lock();
        match pending.waiting.iter().position(|(id, _)| *id == self.id) {
            Some(index) => {
                pending.waiting.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.left {
            self.shared
                .pending
                .lock()
                .waiting
                .retain(|(id, _)| *id != self.id);
        }
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Shared request throttle. Clones share the same budget.
///
/// # Example
///
/// ```rust,no_run
/// use portfolio_market_data::infrastructure::rate_limit::{RateBudget, RateLimiter};
///
/// async fn example() {
///     let limiter = RateLimiter::new(RateBudget::default());
///     let answer = limiter.schedule(|| async { 42 }).await;
///     assert_eq!(answer, Ok(42));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    /// Create a limiter with a full reservoir.
    ///
    /// Zero concurrency, zero capacity and zero intervals are raised to the
    /// smallest usable value.
    #[must_use]
    pub fn new(mut budget: RateBudget) -> Self {
        budget.max_concurrent = budget.max_concurrent.max(1);
        budget.reservoir_capacity = budget.reservoir_capacity.max(1);
        budget.refill_interval = budget.refill_interval.max(Duration::from_millis(1));
        budget.poll_interval = budget.poll_interval.max(Duration::from_millis(1));

        let (quota_exceeded, _) = watch::channel(false);
        let (events, _) = broadcast::channel(QUOTA_EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                slots: Arc::new(Semaphore::new(budget.max_concurrent)),
                window: Mutex::new(Window {
                    reservoir: budget.reservoir_capacity,
                    next_refill: Instant::now() + budget.refill_interval,
                    last_dispatch: None,
                }),
                budget,
                turnstile: tokio::sync::Mutex::new(()),
                pending: Mutex::new(Pending::default()),
                quota_exceeded,
                events,
            }),
        }
    }

    /// Run a request once the budget allows it.
    ///
    /// The job is not started until it is admitted.
    ///
    /// # Errors
    ///
    /// Returns `LimiterError::Dropped` if the request was leaked from the
    /// queue, or `LimiterError::Closed` if the limiter was closed.
    pub async fn schedule<F, Fut>(&self, job: F) -> Result<Fut::Output, LimiterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let permit = self.admit().await?;
        let output = job().await;
        drop(permit);
        Ok(output)
    }

    /// Observable quota flag (`true` while depleted).
    #[must_use]
    pub fn quota_exceeded(&self) -> watch::Receiver<bool> {
        self.shared.quota_exceeded.subscribe()
    }

    /// Current value of the quota flag.
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        *self.shared.quota_exceeded.borrow()
    }

    /// Subscribe to quota transitions.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<QuotaEvent> {
        self.shared.events.subscribe()
    }

    /// Dispatches left in the current window.
    #[must_use]
    pub fn reservoir(&self) -> u32 {
        let mut window = self.shared.window.lock();
        self.shared.refill_if_due(&mut window, Instant::now());
        window.reservoir
    }

    /// Number of requests waiting for admission.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.lock().waiting.len()
    }

    /// The configured budget.
    #[must_use]
    pub fn budget(&self) -> &RateBudget {
        &self.shared.budget
    }

    /// Reject all future requests.
    pub fn close(&self) {
        self.shared.slots.close();
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, LimiterError> {
        let (mut ticket, mut dropped) = self.enqueue();

        let turn = tokio::select! {
            biased;
            _ = &mut dropped => return Err(LimiterError::Dropped),
            guard = self.shared.turnstile.lock() => guard,
        };

        if !ticket.leave() {
            return Err(LimiterError::Dropped);
        }

        self.wait_for_reservoir().await;
        self.wait_for_spacing().await;

        let permit = Arc::clone(&self.shared.slots)
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::Closed)?;

        self.consume();
        drop(turn);
        Ok(permit)
    }

    fn enqueue(&self) -> (Ticket<'_>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.shared.pending.lock();

        let id = pending.next_id;
        pending.next_id += 1;

        // Only requests already queued count against the mark.
        if !pending.waiting.is_empty() && pending.waiting.len() >= self.shared.budget.high_water {
            if let Some((leaked, signal)) = pending.waiting.pop_front() {
                tracing::warn!(
                    request_id = leaked,
                    high_water = self.shared.budget.high_water,
                    "Dropping oldest pending request"
                );
                metrics::record_request_dropped();
                let _ = signal.send(());
            }
        }
        pending.waiting.push_back((id, tx));

        (
            Ticket {
                shared: &self.shared,
                id,
                left: false,
            },
            rx,
        )
    }

    async fn wait_for_reservoir(&self) {
        loop {
            let refill_at = {
                let mut window = self.shared.window.lock();
                self.shared.refill_if_due(&mut window, Instant::now());
                (window.reservoir == 0).then_some(window.next_refill)
            };

            match refill_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => return,
            }
        }
    }

    async fn wait_for_spacing(&self) {
        let earliest = self
            .shared
            .window
            .lock()
            .last_dispatch
            .map(|last| last + self.shared.budget.min_interval);

        if let Some(at) = earliest.filter(|at| *at > Instant::now()) {
            tokio::time::sleep_until(at).await;
        }
    }

    fn consume(&self) {
        let depleted = {
            let mut window = self.shared.window.lock();
            let now = Instant::now();
            self.shared.refill_if_due(&mut window, now);
            window.reservoir = window.reservoir.saturating_sub(1);
            window.last_dispatch = Some(now);
            window.reservoir == 0
        };

        if depleted {
            self.mark_depleted();
        }
    }

    fn mark_depleted(&self) {
        let changed = self
            .shared
            .quota_exceeded
            .send_if_modified(|flag| !std::mem::replace(flag, true));
        if !changed {
            return;
        }

        tracing::warn!(
            capacity = self.shared.budget.reservoir_capacity,
            "Request quota depleted"
        );
        metrics::record_quota_depleted();
        metrics::set_quota_exceeded(true);
        let _ = self.shared.events.send(QuotaEvent::Depleted);

        spawn_restore_poller(Arc::downgrade(&self.shared), self.shared.budget.poll_interval);
    }
}

/// Poll the reservoir until it has capacity, then clear the quota flag.
fn spawn_restore_poller(shared: Weak<Shared>, poll_interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if shared.has_capacity() {
                shared.mark_restored();
                return;
            }
        }
    });
}

// =============================================================================
// Tests
// =============================================================================
