//! Request draining for graceful shutdown.
//!
//! This module provides the [`RequestTracker`], the state machine at the
//! heart of the scaffold. In normal operation it just counts admitted
//! requests. Once shutdown has been triggered it stops admitting new
//! requests, counts the in-flight ones down to zero, and delivers a single
//! completion event when it is safe for the owning process to exit,
//! either because the count reached zero or because the grace period
//! elapsed first.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use gantry::{RequestTracker, ShutdownReason};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (tracker, completion) = RequestTracker::start(Duration::from_secs(30));
//!
//! // Admit a request; the guard releases it when dropped.
//! let guard = tracker.try_admit().await.unwrap();
//!
//! tracker.trigger_shutdown(ShutdownReason::Requested("maintenance".into()));
//!
//! // New admissions are rejected while draining.
//! assert!(tracker.try_admit().await.is_err());
//!
//! drop(guard);
//! let reason = completion.await;
//! assert_eq!(reason.to_string(), "maintenance");
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// The cause of a shutdown, carried from the trigger through to the
/// completion event and into rejection responses.
///
/// The first reason passed to [`RequestTracker::trigger_shutdown`] wins;
/// later triggers do not overwrite it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownReason {
    /// Shutdown was initiated by SIGINT or SIGTERM.
    #[error("caught shutdown signal")]
    SignalCaught,

    /// Generic cause used when no explicit reason is available.
    #[error("server is stopping")]
    Stopping,

    /// An operator- or application-supplied cause.
    #[error("{0}")]
    Requested(String),
}

/// Commands processed by the tracker's actor task.
///
/// All state mutation happens on the actor, so there is never a race
/// between checking the count and changing it.
#[derive(Debug)]
enum Command {
    /// Admit one request. The reply carries the stored shutdown reason
    /// when the tracker is no longer admitting.
    Admit {
        reply: oneshot::Sender<Result<(), ShutdownReason>>,
    },

    /// One previously admitted request finished.
    Release,

    /// Begin draining with the given reason.
    Shutdown(ShutdownReason),
}

/// Drain phases. Transitions are monotonic: `Active` → `Draining` → `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Draining,
}

/// Tracks in-flight HTTP requests and coordinates graceful shutdown.
///
/// A `RequestTracker` admits requests while active, rejects them once
/// shutdown has been triggered, and fires a one-shot completion event
/// when all admitted requests have finished or the grace period has
/// elapsed, whichever comes first.
///
/// The tracker can be cloned and shared freely; all clones feed the same
/// internal actor. Admission is a round-trip through that actor, so the
/// phase check and the count increment are a single serialized step with
/// respect to [`trigger_shutdown`](Self::trigger_shutdown).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use gantry::{RequestTracker, ShutdownReason};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (tracker, completion) = RequestTracker::start(Duration::from_secs(1));
/// tracker.trigger_shutdown(ShutdownReason::Stopping);
/// // No requests in flight, so completion fires immediately.
/// assert_eq!(completion.await, ShutdownReason::Stopping);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RequestTracker {
    /// Command stream into the actor task.
    commands: mpsc::UnboundedSender<Command>,

    /// Set by the actor once draining begins. Fast-path rejection reads
    /// this without a round-trip; the actor stores the reason *before*
    /// setting the flag (Release), so a reader that observes the flag
    /// (Acquire) always sees the reason.
    draining: Arc<AtomicBool>,

    /// The stored shutdown reason, written once by the actor.
    reason: Arc<Mutex<Option<ShutdownReason>>>,

    /// Observable admission count, updated only by the actor.
    active: Arc<AtomicUsize>,
}

impl RequestTracker {
    /// Starts a new tracker and its actor task.
    ///
    /// `grace_period` bounds how long the tracker waits for in-flight
    /// requests once draining begins. Returns the tracker handle together
    /// with the [`Completion`] future, the one-shot event observed by the
    /// single task that waits for shutdown to finish.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(grace_period: Duration) -> (Self, Completion) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let tracker = Self {
            commands,
            draining: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
            active: Arc::new(AtomicUsize::new(0)),
        };

        tokio::spawn(tracker_loop(
            rx,
            done_tx,
            grace_period,
            Arc::clone(&tracker.draining),
            Arc::clone(&tracker.reason),
            Arc::clone(&tracker.active),
        ));

        (tracker, Completion { inner: done_rx })
    }

    /// Attempts to admit one request.
    ///
    /// On success the count has been durably incremented before this call
    /// returns, and the returned [`RequestGuard`] releases the admission
    /// when dropped, on every exit path including unwinds and cancelled
    /// futures. On failure the request must not proceed; the error is the
    /// reason passed to the first [`trigger_shutdown`](Self::trigger_shutdown)
    /// call.
    ///
    /// # Errors
    ///
    /// Returns the stored [`ShutdownReason`] once draining has begun.
    pub async fn try_admit(&self) -> Result<RequestGuard, ShutdownReason> {
        // Fast path: once the flag is visible the reason is too, and
        // rejection mutates nothing, so no actor round-trip is needed.
        if self.draining.load(Ordering::Acquire) {
            return Err(self.stored_reason());
        }

        let (reply, outcome) = oneshot::channel();
        if self.commands.send(Command::Admit { reply }).is_err() {
            // Actor already stopped.
            return Err(self.stored_reason());
        }

        match outcome.await {
            Ok(Ok(())) => Ok(RequestGuard {
                commands: self.commands.clone(),
            }),
            Ok(Err(reason)) => Err(reason),
            Err(_) => Err(self.stored_reason()),
        }
    }

    /// Triggers shutdown with the given reason.
    ///
    /// The first call transitions the tracker into draining: no further
    /// admissions succeed, and the completion event fires once the count
    /// reaches zero or the grace period elapses. Subsequent calls are
    /// no-ops; the first reason wins.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let _ = self.commands.send(Command::Shutdown(reason));
    }

    /// Returns the number of currently admitted requests.
    ///
    /// Updated only by the tracker's actor; intended for diagnostics and
    /// tests, not for admission decisions.
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns `true` once shutdown has been triggered.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn stored_reason(&self) -> ShutdownReason {
        stored_reason(&self.reason)
    }
}

fn stored_reason(slot: &Mutex<Option<ShutdownReason>>) -> ShutdownReason {
    let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    guard.clone().unwrap_or(ShutdownReason::Stopping)
}

/// A live admission. Dropping it releases the request with the tracker.
///
/// The guard is the only way to release: start/end pairing is enforced by
/// scope, not by caller discipline.
#[derive(Debug)]
pub struct RequestGuard {
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        // The actor may already be gone after the stop sequence fired.
        let _ = self.commands.send(Command::Release);
    }
}

/// The one-shot completion event for a [`RequestTracker`].
///
/// Resolves to the stored [`ShutdownReason`] when the stop sequence fires.
/// There is exactly one `Completion` per tracker, so the single-waiter
/// contract holds by construction.
#[derive(Debug)]
pub struct Completion {
    inner: oneshot::Receiver<ShutdownReason>,
}

impl Future for Completion {
    type Output = ShutdownReason;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(reason)) => Poll::Ready(reason),
            // The actor never drops the sender before sending, but a
            // destroyed runtime can; fall back to the generic cause.
            Poll::Ready(Err(_)) => Poll::Ready(ShutdownReason::Stopping),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The actor task. Owns `active` and the phase; processes commands in
/// arrival order and races the grace timer once draining.
async fn tracker_loop(
    mut commands: mpsc::UnboundedReceiver<Command>,
    done: oneshot::Sender<ShutdownReason>,
    grace_period: Duration,
    draining: Arc<AtomicBool>,
    reason_slot: Arc<Mutex<Option<ShutdownReason>>>,
    active_gauge: Arc<AtomicUsize>,
) {
    let mut active: usize = 0;
    let mut phase = Phase::Active;

    // Unarmed until draining begins; tokio clamps the far-future deadline.
    let grace = tokio::time::sleep(Duration::MAX);
    tokio::pin!(grace);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Admit { reply }) => {
                    let outcome = if phase == Phase::Active {
                        active += 1;
                        active_gauge.store(active, Ordering::SeqCst);
                        Ok(())
                    } else {
                        Err(stored_reason(&reason_slot))
                    };
                    // A caller that gave up before the reply never saw the
                    // admission, so its increment must be undone here.
                    if reply.send(outcome).is_err() && phase == Phase::Active {
                        active -= 1;
                        active_gauge.store(active, Ordering::SeqCst);
                    }
                }
                Some(Command::Release) => {
                    active = active.saturating_sub(1);
                    active_gauge.store(active, Ordering::SeqCst);
                    if phase == Phase::Draining && active == 0 {
                        tracing::info!("all in-flight requests drained");
                        break;
                    }
                }
                Some(Command::Shutdown(reason)) => {
                    if phase == Phase::Active {
                        phase = Phase::Draining;
                        // Store the reason before publishing the flag so the
                        // fast path can never observe the flag without it.
                        *reason_slot.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(reason);
                        draining.store(true, Ordering::Release);
                        if active == 0 {
                            break;
                        }
                        tracing::info!(active, "shutdown triggered, draining");
                        // An effectively unbounded grace period overflows the
                        // deadline arithmetic; keep the initial far-future
                        // deadline in that case.
                        if let Some(deadline) = Instant::now().checked_add(grace_period) {
                            grace.as_mut().reset(deadline);
                        }
                    }
                    // Already draining: first reason wins, nothing to do.
                }
                None => {
                    // Every handle dropped without a shutdown; the tracker
                    // can never complete, so just stop the task.
                    return;
                }
            },
            () = &mut grace, if phase == Phase::Draining => {
                tracing::warn!(active, "grace period elapsed with requests still in flight");
                break;
            }
        }
    }

    // Stop sequence: deliver the reason exactly once. Reaching this point
    // at all means draining began, so the reason is set.
    let _ = done.send(stored_reason(&reason_slot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const GRACE: Duration = Duration::from_secs(30);

    /// Waits for the actor to settle at the expected admission count.
    async fn settles_at(tracker: &RequestTracker, expected: usize) {
        timeout(Duration::from_secs(1), async {
            while tracker.active_requests() != expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("tracker did not settle at expected count");
    }

    #[tokio::test]
    async fn admits_and_returns_to_zero_without_shutdown() {
        let (tracker, _completion) = RequestTracker::start(GRACE);

        let g1 = tracker.try_admit().await.unwrap();
        let g2 = tracker.try_admit().await.unwrap();
        let g3 = tracker.try_admit().await.unwrap();
        settles_at(&tracker, 3).await;

        drop(g1);
        drop(g2);
        drop(g3);
        settles_at(&tracker, 0).await;
    }

    #[tokio::test]
    async fn completes_immediately_when_idle() {
        let (tracker, completion) = RequestTracker::start(GRACE);
        tracker.trigger_shutdown(ShutdownReason::Requested("X".into()));

        let reason = timeout(Duration::from_millis(100), completion)
            .await
            .expect("completion should fire immediately with no requests in flight");
        assert_eq!(reason, ShutdownReason::Requested("X".into()));
    }

    #[tokio::test]
    async fn completes_on_last_release_before_deadline() {
        let (tracker, completion) = RequestTracker::start(GRACE);
        let guard = tracker.try_admit().await.unwrap();

        tracker.trigger_shutdown(ShutdownReason::Stopping);
        drop(guard);

        let reason = timeout(Duration::from_secs(1), completion)
            .await
            .expect("completion should fire on the last release");
        assert_eq!(reason, ShutdownReason::Stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_dominates_when_a_release_never_comes() {
        let (tracker, completion) = RequestTracker::start(Duration::from_secs(1));

        let guard = tracker.try_admit().await.unwrap();
        // Leak the admission: the release must never arrive.
        std::mem::forget(guard);

        let before = Instant::now();
        tracker.trigger_shutdown(ShutdownReason::Requested("deadline".into()));
        let reason = completion.await;

        assert_eq!(reason, ShutdownReason::Requested("deadline".into()));
        assert!(before.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unbounded_grace_period_still_drains_and_keeps_the_reason() {
        let (tracker, completion) = RequestTracker::start(Duration::MAX);
        let guard = tracker.try_admit().await.unwrap();

        tracker.trigger_shutdown(ShutdownReason::Requested("keep this".into()));

        // The actor must survive arming the timer with the huge deadline.
        tokio::task::yield_now().await;
        assert_eq!(tracker.active_requests(), 1);
        assert!(tracker.is_draining());

        drop(guard);
        let reason = timeout(Duration::from_secs(1), completion)
            .await
            .expect("drain must complete despite the unbounded grace period");
        assert_eq!(reason, ShutdownReason::Requested("keep this".into()));
    }

    #[tokio::test]
    async fn rejects_with_the_triggering_reason() {
        let (tracker, _completion) = RequestTracker::start(GRACE);
        tracker.trigger_shutdown(ShutdownReason::Requested("maintenance".into()));

        let err = tracker.try_admit().await.unwrap_err();
        assert_eq!(err.to_string(), "maintenance");
    }

    #[tokio::test]
    async fn rejects_every_admission_once_draining() {
        let (tracker, completion) = RequestTracker::start(GRACE);
        let guard = tracker.try_admit().await.unwrap();

        tracker.trigger_shutdown(ShutdownReason::Stopping);

        // Still draining (one request in flight), but no new admissions.
        for _ in 0..5 {
            assert!(tracker.try_admit().await.is_err());
        }
        assert!(tracker.is_draining());

        drop(guard);
        timeout(Duration::from_secs(1), completion).await.unwrap();
    }

    #[tokio::test]
    async fn first_shutdown_reason_wins() {
        let (tracker, completion) = RequestTracker::start(GRACE);
        let guard = tracker.try_admit().await.unwrap();

        tracker.trigger_shutdown(ShutdownReason::Requested("first".into()));
        tracker.trigger_shutdown(ShutdownReason::Requested("second".into()));
        tracker.trigger_shutdown(ShutdownReason::SignalCaught);

        assert_eq!(
            tracker.try_admit().await.unwrap_err(),
            ShutdownReason::Requested("first".into())
        );

        drop(guard);
        let reason = timeout(Duration::from_secs(1), completion).await.unwrap();
        assert_eq!(reason, ShutdownReason::Requested("first".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_load_racing_shutdown() {
        let (tracker, completion) = RequestTracker::start(Duration::from_secs(5));

        let mut workers = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    match tracker.try_admit().await {
                        Ok(guard) => {
                            tokio::task::yield_now().await;
                            drop(guard);
                        }
                        // Draining: every further admission must fail too.
                        Err(_) => return,
                    }
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.trigger_shutdown(ShutdownReason::Requested("load test".into()));

        for worker in workers {
            worker.await.unwrap();
        }

        let reason = timeout(Duration::from_secs(5), completion)
            .await
            .expect("completion must fire exactly once under concurrent load");
        assert_eq!(reason, ShutdownReason::Requested("load test".into()));
        assert_eq!(tracker.active_requests(), 0);
    }

    #[tokio::test]
    async fn completion_falls_back_when_actor_is_gone() {
        let (tracker, completion) = RequestTracker::start(GRACE);
        // Dropping every handle stops the actor without a shutdown.
        drop(tracker);

        let reason = timeout(Duration::from_secs(1), completion).await.unwrap();
        assert_eq!(reason, ShutdownReason::Stopping);
    }

    #[test]
    fn reason_display() {
        assert_eq!(
            ShutdownReason::SignalCaught.to_string(),
            "caught shutdown signal"
        );
        assert_eq!(ShutdownReason::Stopping.to_string(), "server is stopping");
        assert_eq!(
            ShutdownReason::Requested("because".into()).to_string(),
            "because"
        );
    }
}
