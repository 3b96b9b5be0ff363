// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Exclusive access to a singleton external resource
//!
//! Only one browser can be driven at a time, while many pipelines and `map`
//! elements ask for it concurrently. [`ResourceArbiter`] hands the resource
//! out strictly in the order `acquire` was called. The holder gets a
//! [`ResourceGuard`]; dropping it passes the resource to the next waiter.
//!
//! A guard that is never dropped (for example a stage stuck forever while
//! holding it) blocks every later acquirer. `acquire_timeout` bounds the wait
//! and reports the suspected leak.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::errors::{ExpflowError, ExpflowResult};

/// FIFO mutual exclusion over one external resource
pub struct ResourceArbiter {
    resource: String,
    hold_warning: Option<Duration>,
    state: Mutex<ArbiterState>,
}

#[derive(Default)]
struct ArbiterState {
    held: bool,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<()>,
}

impl ResourceArbiter {
    /// Create an arbiter for the named resource, initially free
    pub fn new(resource: impl Into<String>) -> Arc<Self> {
        Self::with_hold_warning(resource, None)
    }

    /// Create an arbiter that warns when a holder keeps the resource too long
    pub fn with_hold_warning(resource: impl Into<String>, hold_warning: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            resource: resource.into(),
            hold_warning,
            state: Mutex::new(ArbiterState::default()),
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Whether someone holds the resource right now
    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    /// Number of callers queued behind the current holder
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Wait for exclusive access.
    ///
    /// Grants happen in call order. The returned guard releases on drop.
    pub async fn acquire(self: &Arc<Self>) -> ExpflowResult<ResourceGuard> {
        let (ticket, pending) = {
            let mut state = self.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;

            if !state.held {
                state.held = true;
                tracing::debug!(resource = %self.resource, ticket, "resource granted immediately");
                return Ok(ResourceGuard::new(self.clone(), ticket));
            }

            let (grant, granted) = oneshot::channel();
            state.waiters.push_back(Waiter { ticket, grant });
            tracing::debug!(
                resource = %self.resource,
                ticket,
                queued = state.waiters.len(),
                "waiting for resource"
            );
            (
                ticket,
                PendingGrant {
                    arbiter: self.clone(),
                    ticket,
                    granted: Some(granted),
                },
            )
        };

        pending.wait().await?;
        tracing::debug!(resource = %self.resource, ticket, "resource handed off");
        Ok(ResourceGuard::new(self.clone(), ticket))
    }

    /// `acquire`, giving up after `timeout`.
    ///
    /// The caller leaves the queue on timeout; the holder keeps the resource.
    pub async fn acquire_timeout(self: &Arc<Self>, timeout: Duration) -> ExpflowResult<ResourceGuard> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!(
                    resource = %self.resource,
                    waited_ms = timeout.as_millis() as u64,
                    "gave up waiting for resource; the current holder may have leaked it"
                );
                Err(ExpflowError::ArbiterTimeout {
                    resource: self.resource.clone(),
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Run `task` while holding the resource
    pub async fn scoped<F, T>(self: &Arc<Self>, task: F) -> ExpflowResult<T>
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire().await?;
        Ok(task.await)
    }

    /// Pass the resource to the next live waiter, or mark it free
    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                return;
            }
            tracing::debug!(resource = %self.resource, ticket = waiter.ticket, "skipping abandoned waiter");
        }
        state.held = false;
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A queued acquisition. Dropping it before the grant is observed gives the
/// grant (if any) back to the arbiter.
struct PendingGrant {
    arbiter: Arc<ResourceArbiter>,
    ticket: u64,
    granted: Option<oneshot::Receiver<()>>,
}

impl PendingGrant {
    async fn wait(mut self) -> ExpflowResult<()> {
        let result = match self.granted.as_mut() {
            Some(granted) => granted.await,
            None => return Ok(()),
        };
        self.granted = None;
        result.map_err(|_| ExpflowError::ArbiterClosed {
            resource: self.arbiter.resource.clone(),
        })
    }
}

impl Drop for PendingGrant {
    fn drop(&mut self) {
        let Some(granted) = self.granted.take() else {
            return;
        };
        // The receiver stays alive until the queue has been checked, so a
        // grant sent in between cannot be lost.
        let still_queued = {
            let mut state = self.arbiter.lock();
            let before = state.waiters.len();
            state.waiters.retain(|w| w.ticket != self.ticket);
            state.waiters.len() != before
        };
        drop(granted);
        if !still_queued {
            self.arbiter.release();
        }
    }
}

/// Exclusive access to the arbitrated resource, released on drop
pub struct ResourceGuard {
    arbiter: Arc<ResourceArbiter>,
    ticket: u64,
    acquired_at: Instant,
    hold_warning: Option<Duration>,
}

impl ResourceGuard {
    fn new(arbiter: Arc<ResourceArbiter>, ticket: u64) -> Self {
        let hold_warning = arbiter.hold_warning;
        Self {
            arbiter,
            ticket,
            acquired_at: Instant::now(),
            hold_warning,
        }
    }

    /// Position of this acquisition in call order
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Threshold past which releasing this guard logs a warning
    pub fn hold_warning(&self) -> Option<Duration> {
        self.hold_warning
    }

    /// Replace the arbiter's hold-warning threshold for this holder
    pub fn set_hold_warning(&mut self, limit: Option<Duration>) {
        self.hold_warning = limit;
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource", &self.arbiter.resource)
            .field("ticket", &self.ticket)
            .field("held_for", &self.held_for())
            .finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let held = self.held_for();
        if let Some(limit) = self.hold_warning {
            if held > limit {
                tracing::warn!(
                    resource = %self.arbiter.resource,
                    ticket = self.ticket,
                    held_ms = held.as_millis() as u64,
                    "resource held longer than {:?}",
                    limit
                );
            }
        }
        self.arbiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_uncontended_acquire() {
        let arbiter = ResourceArbiter::new("browser");
        assert!(!arbiter.is_held());

        let guard = arbiter.acquire().await.unwrap();
        assert!(arbiter.is_held());
        assert_eq!(guard.ticket(), 0);

        drop(guard);
        assert!(!arbiter.is_held());
    }

    #[test]
    fn test_grants_follow_call_order_and_never_overlap() {
        let arbiter = ResourceArbiter::new("browser");

        let mut first = task::spawn(arbiter.acquire());
        let first_guard = assert_ready!(first.poll()).unwrap();

        let mut second = task::spawn(arbiter.acquire());
        let mut third = task::spawn(arbiter.acquire());
        let mut fourth = task::spawn(arbiter.acquire());
        assert_pending!(second.poll());
        assert_pending!(third.poll());
        assert_pending!(fourth.poll());
        assert_eq!(arbiter.waiting(), 3);

        drop(first_guard);
        assert!(second.is_woken());
        // Later callers stay queued even when polled first
        assert_pending!(fourth.poll());
        assert_pending!(third.poll());
        let second_guard = assert_ready!(second.poll()).unwrap();
        assert_eq!(second_guard.ticket(), 1);

        drop(second_guard);
        assert_pending!(fourth.poll());
        let third_guard = assert_ready!(third.poll()).unwrap();
        assert_eq!(third_guard.ticket(), 2);

        drop(third_guard);
        let fourth_guard = assert_ready!(fourth.poll()).unwrap();
        assert_eq!(fourth_guard.ticket(), 3);

        drop(fourth_guard);
        assert!(!arbiter.is_held());
        assert_eq!(arbiter.waiting(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_observe_fifo_order() {
        let arbiter = ResourceArbiter::new("browser");
        let order = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let gate = arbiter.acquire().await.unwrap();
        let mut handles = Vec::new();
        for i in 0..5 {
            let contender = arbiter.clone();
            let order = order.clone();
            let active = active.clone();
            handles.push(tokio::spawn(async move {
                let _guard = contender.acquire().await.unwrap();
                let now = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                assert_eq!(now, 0, "two holders at once");
                tokio::time::sleep(Duration::from_millis(2)).await;
                order.lock().unwrap().push(i);
                active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }));
            // Make sure task i is queued before task i + 1 is spawned
            while arbiter.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(gate);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_abandoned_waiter_is_skipped() {
        let arbiter = ResourceArbiter::new("browser");

        let holder = assert_ready!(task::spawn(arbiter.acquire()).poll()).unwrap();
        let mut quitter = task::spawn(arbiter.acquire());
        let mut patient = task::spawn(arbiter.acquire());
        assert_pending!(quitter.poll());
        assert_pending!(patient.poll());

        drop(quitter);
        drop(holder);

        let guard = assert_ready!(patient.poll()).unwrap();
        assert_eq!(guard.ticket(), 2);
    }

    #[test]
    fn test_granted_but_dropped_acquisition_passes_grant_on() {
        let arbiter = ResourceArbiter::new("browser");

        let holder = assert_ready!(task::spawn(arbiter.acquire()).poll()).unwrap();
        let mut granted_never_polled = task::spawn(arbiter.acquire());
        let mut next = task::spawn(arbiter.acquire());
        assert_pending!(granted_never_polled.poll());
        assert_pending!(next.poll());

        // The grant goes to the first waiter, which is dropped before seeing it
        drop(holder);
        drop(granted_never_polled);

        assert_ready!(next.poll()).unwrap();
    }

    #[tokio::test]
    async fn test_release_on_error_path() {
        let arbiter = ResourceArbiter::new("browser");

        let failing: ExpflowResult<()> = async {
            let _guard = arbiter.acquire().await?;
            Err(ExpflowError::Io { message: "telemetry crashed".into() })
        }
        .await;

        assert!(failing.is_err());
        assert!(!arbiter.is_held());
    }

    #[tokio::test]
    async fn test_acquire_timeout_reports_leak() {
        let arbiter = ResourceArbiter::new("browser");
        let leaked = arbiter.acquire().await.unwrap();

        let err = arbiter
            .acquire_timeout(Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExpflowError::ArbiterTimeout { .. }));
        assert_eq!(arbiter.waiting(), 0);

        drop(leaked);
        assert!(arbiter.acquire_timeout(Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_scoped() {
        let arbiter = ResourceArbiter::new("browser");
        let inner = arbiter.clone();
        let value = arbiter
            .scoped(async move {
                assert!(inner.is_held());
                42
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(!arbiter.is_held());
    }

    #[tokio::test]
    async fn test_guard_hold_warning_defaults_to_arbiter() {
        let arbiter = ResourceArbiter::with_hold_warning("browser", Some(Duration::from_secs(5)));
        let mut guard = arbiter.acquire().await.unwrap();
        assert_eq!(guard.hold_warning(), Some(Duration::from_secs(5)));

        guard.set_hold_warning(Some(Duration::from_secs(1)));
        assert_eq!(guard.hold_warning(), Some(Duration::from_secs(1)));
        assert!(format!("{:?}", guard).contains("ticket: 0"));
    }
}
