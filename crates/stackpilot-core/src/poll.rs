//! Bounded polling until an operation settles
//!
//! The reconciler decides what to poll; the scheduler decides how often and
//! for how long. Time is read from tokio's clock, so tests can run against a
//! paused runtime and observe exact call counts and timestamps.

use crate::error::{ProviderError, ReconcileError, Result};
use crate::types::PollResult;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Stand-in deadline when the configured one does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Waiting policy for [`PollScheduler`]
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second check
    pub initial_interval: Duration,
    /// Cap for the exponentially growing delay
    pub max_interval: Duration,
    /// Growth factor applied after every check (1.0 disables backoff)
    pub multiplier: f64,
    /// Relative jitter applied to each delay, 0.2 means ±20%
    pub jitter: f64,
    /// Total time budget measured from the first check
    pub deadline: Duration,
    /// Consecutive check errors tolerated before giving up
    pub failure_threshold: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            deadline: Duration::from_secs(30 * 60),
            failure_threshold: 3,
        }
    }
}

impl PollPolicy {
    /// Fixed cadence without backoff or jitter
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            jitter: 0.0,
            deadline,
            ..Default::default()
        }
    }

    /// Grow `current` by the multiplier, never past `max_interval`
    pub fn next_interval(&self, current: Duration) -> Duration {
        scale(current, self.multiplier)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    pub fn jittered(&self, interval: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return interval;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        scale(interval, factor.max(0.0)).unwrap_or(interval)
    }
}

fn scale(duration: Duration, factor: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).ok()
}

/// Cancellation signal shared between a waiting task and whoever may abort it
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelSignal::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Repeatedly runs a status check until it reports a terminal phase
#[derive(Debug, Clone, Default)]
pub struct PollScheduler {
    policy: PollPolicy,
}

impl PollScheduler {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub async fn wait_for_terminal<F, Fut>(
        &self,
        check: F,
        cancel: &CancelSignal,
    ) -> Result<PollResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<PollResult, ProviderError>>,
    {
        self.wait_for_terminal_with(check, |_| {}, cancel).await
    }

    /// Like [`PollScheduler::wait_for_terminal`], reporting every successful
    /// check to `on_result` before deciding whether to continue.
    pub async fn wait_for_terminal_with<F, Fut, O>(
        &self,
        mut check: F,
        mut on_result: O,
        cancel: &CancelSignal,
    ) -> Result<PollResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<PollResult, ProviderError>>,
        O: FnMut(&PollResult),
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.policy.deadline)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut interval = self.policy.initial_interval;
        let mut consecutive_failures = 0u32;
        let mut attempt = 0u32;
        let mut last_status = String::from("UNKNOWN");

        loop {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled { last_status });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(attempt, last_status = %last_status, "Deadline elapsed before terminal state");
                return Err(ReconcileError::Timeout {
                    elapsed: now.duration_since(started),
                    last_status,
                });
            }

            attempt += 1;
            let outcome = tokio::select! {
                outcome = check() => outcome,
                _ = cancel.cancelled() => {
                    return Err(ReconcileError::Cancelled { last_status });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(attempt, last_status = %last_status, "Deadline elapsed during status check");
                    return Err(ReconcileError::Timeout {
                        elapsed: Instant::now().duration_since(started),
                        last_status,
                    });
                }
            };
            match outcome {
                Ok(result) => {
                    consecutive_failures = 0;
                    last_status = result.raw.status.clone();
                    on_result(&result);
                    debug!(
                        attempt,
                        phase = %result.phase,
                        status = %result.raw.status,
                        "Polled stack status"
                    );
                    if result.terminal {
                        return Ok(result);
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(
                        attempt,
                        consecutive_failures,
                        error = %err,
                        "Status check failed"
                    );
                    if consecutive_failures >= self.policy.failure_threshold {
                        return Err(ReconcileError::TransportError {
                            attempts: consecutive_failures,
                            message: err.to_string(),
                        });
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let delay = self.policy.jittered(interval).min(remaining);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(ReconcileError::Cancelled { last_status });
                }
            }
            interval = self.policy.next_interval(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{RawStatus, StackPhase};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    type Scripted = std::result::Result<PollResult, ProviderError>;

    fn in_progress() -> Scripted {
        Ok(PollResult::new(
            StackPhase::InProgress,
            RawStatus::new("CREATE_IN_PROGRESS"),
        ))
    }

    fn complete() -> Scripted {
        Ok(PollResult::new(
            StackPhase::Complete,
            RawStatus::new("CREATE_COMPLETE"),
        ))
    }

    fn unreachable() -> Scripted {
        Err(ProviderError::Transport("connection reset".to_string()))
    }

    /// Replays a fixed script, repeating the last entry once exhausted
    struct Script {
        steps: RefCell<VecDeque<Scripted>>,
        calls: RefCell<Vec<Instant>>,
    }

    impl Script {
        fn new(steps: Vec<Scripted>) -> Self {
            Self {
                steps: RefCell::new(steps.into()),
                calls: RefCell::new(Vec::new()),
            }
        }

        async fn check(&self) -> Scripted {
            self.calls.borrow_mut().push(Instant::now());
            let mut steps = self.steps.borrow_mut();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
            deadline: Duration::from_secs(60),
            failure_threshold: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_after_n_plus_one_checks() {
        let n = 4;
        let mut steps: Vec<Scripted> = (0..n).map(|_| in_progress()).collect();
        steps.push(complete());
        let script = Script::new(steps);

        let scheduler = PollScheduler::new(PollPolicy::fixed(
            Duration::from_secs(2),
            Duration::from_secs(600),
        ));
        let result = scheduler
            .wait_for_terminal(|| script.check(), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(result.phase, StackPhase::Complete);
        assert_eq!(script.call_count(), n + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_makes_no_calls_after_deadline() {
        let script = Script::new(vec![in_progress()]);
        let scheduler = PollScheduler::new(policy());
        let started = Instant::now();

        let err = scheduler
            .wait_for_terminal(|| script.check(), &CancelSignal::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let deadline = started + Duration::from_secs(60);
        assert!(Instant::now() >= deadline);
        assert!(script.calls.borrow().iter().all(|at| *at < deadline));
        // t = 0, 2, 6, 14, 30
        assert_eq!(script.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_after_threshold_not_first_failure() {
        let script = Script::new(vec![unreachable(), unreachable(), unreachable(), unreachable()]);
        let scheduler = PollScheduler::new(policy());

        let err = scheduler
            .wait_for_terminal(|| script.check(), &CancelSignal::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(script.call_count(), 3);
        match err {
            ReconcileError::TransportError { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_check_resets_failure_count() {
        let script = Script::new(vec![
            unreachable(),
            unreachable(),
            in_progress(),
            unreachable(),
            unreachable(),
            complete(),
        ]);
        let scheduler = PollScheduler::new(PollPolicy::fixed(
            Duration::from_secs(1),
            Duration::from_secs(600),
        ));

        let result = scheduler
            .wait_for_terminal(|| script.check(), &CancelSignal::new())
            .await
            .unwrap();

        assert!(result.terminal);
        assert_eq!(script.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_promptly() {
        let script = Script::new(vec![in_progress()]);
        let scheduler = PollScheduler::new(PollPolicy::fixed(
            Duration::from_secs(10),
            Duration::from_secs(600),
        ));
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        let started = Instant::now();

        let (outcome, _) = tokio::join!(
            scheduler.wait_for_terminal(|| script.check(), &cancel),
            async move {
                tokio::time::sleep(Duration::from_secs(15)).await;
                trigger.cancel();
            }
        );

        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(script.call_count(), 2);
        assert!(Instant::now().duration_since(started) < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_result_sees_every_successful_check() {
        let script = Script::new(vec![in_progress(), unreachable(), in_progress(), complete()]);
        let scheduler = PollScheduler::new(policy());
        let mut seen = Vec::new();

        scheduler
            .wait_for_terminal_with(
                || script.check(),
                |result| seen.push(result.phase),
                &CancelSignal::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                StackPhase::InProgress,
                StackPhase::InProgress,
                StackPhase::Complete
            ]
        );
    }

    fn hung() -> impl Future<Output = Scripted> {
        std::future::pending()
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_applies_to_a_hung_check() {
        let scheduler = PollScheduler::new(PollPolicy::fixed(
            Duration::from_secs(2),
            Duration::from_secs(10),
        ));
        let started = Instant::now();

        let err = tokio::time::timeout(
            Duration::from_secs(3600),
            scheduler.wait_for_terminal(hung, &CancelSignal::new()),
        )
        .await
        .expect("scheduler must give up at its own deadline")
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(Instant::now().duration_since(started), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_a_hung_check() {
        let scheduler = PollScheduler::new(PollPolicy::default());
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        let started = Instant::now();

        let (outcome, _) = tokio::join!(
            scheduler.wait_for_terminal(hung, &cancel),
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                trigger.cancel();
            }
        );

        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(Instant::now().duration_since(started), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_deadline_does_not_panic() {
        let script = Script::new(vec![in_progress(), complete()]);
        let scheduler = PollScheduler::new(PollPolicy {
            deadline: Duration::from_secs(u64::MAX),
            ..policy()
        });

        let result = scheduler
            .wait_for_terminal(|| script.check(), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(result.phase, StackPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_multiplier_saturates_at_max_interval() {
        let policy = PollPolicy {
            multiplier: 1e20,
            ..policy()
        };
        assert_eq!(
            policy.next_interval(Duration::from_secs(2)),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.next_interval(Duration::from_secs(30)),
            Duration::from_secs(30)
        );

        let script = Script::new(vec![in_progress(), in_progress(), complete()]);
        let scheduler = PollScheduler::new(policy);
        let result = scheduler
            .wait_for_terminal(|| script.check(), &CancelSignal::new())
            .await
            .unwrap();
        assert!(result.terminal);
        assert_eq!(script.call_count(), 3);
    }

    #[test]
    fn test_interval_growth_is_capped() {
        let policy = policy();
        let mut interval = policy.initial_interval;
        for _ in 0..10 {
            interval = policy.next_interval(interval);
        }
        assert_eq!(interval, Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = PollPolicy::default();
        let base = Duration::from_secs(10);
        for _ in 0..200 {
            let delay = policy.jittered(base);
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_secs(12));
        }
    }
}
