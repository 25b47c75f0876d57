//! Circuit breaker for a single external dependency.
//!
//! State machine:
//! - CLOSED: calls pass; `failure_threshold` failures trip to OPEN
//! - OPEN: calls are rejected without side effects until
//!   `recovery_timeout_ms` has elapsed, then the next request moves to HALF_OPEN
//! - HALF_OPEN: exactly one trial call in flight at a time;
//!   `success_threshold` consecutive successes close the breaker,
//!   any failure re-opens it
//!
//! All transitions happen under one mutex, so they are totally ordered per
//! breaker. Every transition starts a new generation; a call admitted in an
//! earlier generation cannot settle the current HALF_OPEN trial. Share across
//! tasks via `Arc<CircuitBreaker>`.

use std::future::Future;
use std::sync::Arc;

use optguard_core::{Clock, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::BreakerError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures in CLOSED before tripping. Default: 5.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time spent OPEN before a trial is allowed (ms). Default: 60,000.
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Consecutive trial successes needed to close. Default: 2.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    60_000
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Point-in-time view of a breaker, for status endpoints and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_ms: Option<u64>,
    pub opened_at_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_ms: Option<u64>,
    opened_at_ms: Option<u64>,
    trial_in_flight: bool,
    /// Bumped on every state transition.
    generation: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_ms: None,
            opened_at_ms: None,
            trial_in_flight: false,
            generation: 0,
        }
    }

    fn close(&mut self) {
        let generation = self.generation + 1;
        *self = Self {
            generation,
            ..Self::new()
        };
    }

    fn open(&mut self, now: u64) {
        self.state = BreakerState::Open;
        self.opened_at_ms = Some(now);
        self.success_count = 0;
        self.trial_in_flight = false;
        self.generation += 1;
    }

    fn half_open(&mut self) {
        self.state = BreakerState::HalfOpen;
        self.success_count = 0;
        self.trial_in_flight = true;
        self.generation += 1;
    }
}

/// Outcome of asking the breaker for permission.
enum Admission {
    /// Normal CLOSED call.
    Pass { generation: u64 },
    /// The single HALF_OPEN trial slot.
    Trial { generation: u64 },
    Rejected { retry_after_ms: u64 },
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker using the system clock.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a breaker with an injected clock.
    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state. OPEN is reported until a request observes the
    /// elapsed recovery timeout and moves the breaker to HALF_OPEN.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_ms: inner.last_failure_ms,
            opened_at_ms: inner.opened_at_ms,
        }
    }

    /// Ask whether a call may proceed right now.
    ///
    /// In HALF_OPEN a `true` answer reserves the single trial slot; the
    /// caller must report the outcome with `record_success`/`record_failure`.
    pub fn allow_request(&self) -> bool {
        !matches!(self.admit(), Admission::Rejected { .. })
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Admission::Pass {
                generation: inner.generation,
            },
            BreakerState::Open => {
                let opened_at = inner.opened_at_ms.unwrap_or(now);
                let elapsed = now.saturating_sub(opened_at);
                if elapsed >= self.config.recovery_timeout_ms {
                    inner.half_open();
                    info!(breaker = %self.name, elapsed_ms = elapsed, "Circuit OPEN -> HALF_OPEN, admitting trial call");
                    Admission::Trial {
                        generation: inner.generation,
                    }
                } else {
                    Admission::Rejected {
                        retry_after_ms: self.config.recovery_timeout_ms - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected { retry_after_ms: 0 }
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial {
                        generation: inner.generation,
                    }
                }
            }
        }
    }

    /// Record a successful call admitted via `allow_request`.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => self.trial_succeeded(&mut inner),
            // A call admitted before the trip finished late; it says
            // nothing about recovery.
            BreakerState::Open => {}
        }
    }

    /// Record a failed call admitted via `allow_request`.
    pub fn record_failure(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        inner.last_failure_ms = Some(now);
        match inner.state {
            BreakerState::Closed => self.count_failure(&mut inner, now),
            BreakerState::HalfOpen => self.trial_failed(&mut inner, now),
            BreakerState::Open => {}
        }
    }

    /// Settle a call admitted by `call_with`, honouring its admission.
    ///
    /// A trial only counts in the HALF_OPEN generation that admitted it. A
    /// CLOSED-era result counts only while the breaker is still CLOSED, and
    /// a late success from an earlier generation does not clear failures.
    fn settle(&self, trial: bool, generation: u64, success: bool) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        if !success {
            inner.last_failure_ms = Some(now);
        }
        let current = inner.generation == generation;

        match (inner.state, trial) {
            (BreakerState::HalfOpen, true) if current => {
                if success {
                    self.trial_succeeded(&mut inner);
                } else {
                    self.trial_failed(&mut inner, now);
                }
            }
            (BreakerState::Closed, false) => {
                if !success {
                    self.count_failure(&mut inner, now);
                } else if current {
                    inner.failure_count = 0;
                }
            }
            (state, _) => {
                debug!(
                    breaker = %self.name,
                    %state,
                    trial,
                    success,
                    "Ignoring outcome of a call admitted in an earlier state"
                );
            }
        }
    }

    fn count_failure(&self, inner: &mut Inner, now: u64) {
        inner.failure_count += 1;
        if inner.failure_count >= self.config.failure_threshold {
            let failures = inner.failure_count;
            inner.open(now);
            error!(
                breaker = %self.name,
                failures,
                recovery_timeout_ms = self.config.recovery_timeout_ms,
                "Circuit CLOSED -> OPEN"
            );
        }
    }

    fn trial_succeeded(&self, inner: &mut Inner) {
        inner.trial_in_flight = false;
        inner.success_count += 1;
        if inner.success_count >= self.config.success_threshold {
            inner.close();
            info!(breaker = %self.name, "Circuit HALF_OPEN -> CLOSED, dependency recovered");
        } else {
            debug!(
                breaker = %self.name,
                successes = inner.success_count,
                needed = self.config.success_threshold,
                "Half-open trial succeeded"
            );
        }
    }

    fn trial_failed(&self, inner: &mut Inner, now: u64) {
        inner.open(now);
        warn!(breaker = %self.name, "Circuit HALF_OPEN -> OPEN, trial call failed");
    }

    /// Force the breaker back to CLOSED with counters cleared.
    pub fn reset(&self) {
        self.inner.lock().close();
        warn!(breaker = %self.name, "Circuit manually reset to CLOSED");
    }

    /// Run `op` if the breaker admits it, recording every error as a failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(op, |_| true).await
    }

    /// Run `op` if the breaker admits it. Errors for which `is_failure`
    /// returns false (business rejections from a healthy dependency) are
    /// recorded as successes. The result is always passed through unchanged.
    pub async fn call_with<F, Fut, T, E, C>(&self, op: F, is_failure: C) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let (trial, generation) = match self.admit() {
            Admission::Pass { generation } => (false, generation),
            Admission::Trial { generation } => (true, generation),
            Admission::Rejected { retry_after_ms } => {
                debug!(breaker = %self.name, retry_after_ms, "Call rejected by open circuit");
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_after_ms,
                });
            }
        };

        let mut permit = Permit {
            breaker: self,
            trial,
            generation,
            settled: false,
        };

        match op().await {
            Ok(value) => {
                permit.settle(true);
                Ok(value)
            }
            Err(err) => {
                permit.settle(!is_failure(&err));
                Err(BreakerError::Inner(err))
            }
        }
    }
}

/// Outcome recorder for one admitted call.
///
/// If the call's future is dropped before completion, a trial is recorded
/// as failed so the half-open slot is never leaked.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.settle(self.trial, self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            warn!(breaker = %self.breaker.name, "Half-open trial abandoned, re-opening circuit");
            self.breaker.settle(true, self.generation, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optguard_core::ManualClock;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::with_clock(
            "broker",
            BreakerConfig {
                failure_threshold: 3,
                recovery_timeout_ms: 1_000,
                success_threshold: 2,
            },
            clock,
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("down") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        cb.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_exactly_threshold_failures_open() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock);

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), BreakerState::Closed);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_calling_op() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }

        let mut invoked = false;
        let result = cb
            .call(|| {
                invoked = true;
                async { Ok::<_, &'static str>(()) }
            })
            .await;
        assert!(!invoked);
        match result {
            Err(BreakerError::Open { retry_after_ms, .. }) => assert_eq!(retry_after_ms, 1_000),
            other => panic!("expected Open, got {other:?}"),
        }

        clock.advance_ms(999);
        assert!(succeed(&cb).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_recovery_timeout_moves_to_half_open() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        clock.advance_ms(1_000);

        assert!(cb.allow_request());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        // Trial slot is taken until an outcome is recorded.
        assert!(!cb.allow_request());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        clock.advance_ms(1_000);

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(cb.status().opened_at_ms, Some(1_000));
        assert!(succeed(&cb).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_half_open_successes_close_and_reset_counters() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        clock.advance_ms(1_000);

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert_eq!(succeed(&cb).await.unwrap(), 7);

        let status = cb.status();
        assert_eq!(status.state, BreakerState::Closed);
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.success_count, 0);
        assert_eq!(status.opened_at_ms, None);
    }

    #[tokio::test]
    async fn test_success_in_closed_resets_failure_count() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock);
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.status().failure_count, 1);
    }

    #[tokio::test]
    async fn test_call_with_ignores_business_errors() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock);
        for _ in 0..5 {
            let err = cb
                .call_with(|| async { Err::<(), _>("rejected") }, |_| false)
                .await
                .unwrap_err();
            assert!(matches!(err, BreakerError::Inner("rejected")));
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_trial_reopens() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        clock.advance_ms(1_000);

        {
            let pending = cb.call(|| std::future::pending::<Result<(), &'static str>>());
            // Poll once so the trial slot is taken, then drop.
            let _ = tokio::time::timeout(std::time::Duration::from_millis(5), pending).await;
        }
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_late_closed_call_cannot_settle_trial() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        let (finish_slow, slow_gate) = oneshot::channel::<()>();
        let (finish_trial, trial_gate) = oneshot::channel::<()>();

        // Admitted while CLOSED, still running when the breaker trips.
        let slow = cb.call(|| async move {
            let _ = slow_gate.await;
            Ok::<u32, &'static str>(1)
        });
        tokio::pin!(slow);
        assert!(tokio::time::timeout(Duration::from_millis(1), &mut slow).await.is_err());

        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        clock.advance_ms(1_000);

        let trial = cb.call(|| async move {
            let _ = trial_gate.await;
            Ok::<u32, &'static str>(2)
        });
        tokio::pin!(trial);
        assert!(tokio::time::timeout(Duration::from_millis(1), &mut trial).await.is_err());
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        finish_slow.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), 1);
        let status = cb.status();
        assert_eq!(status.state, BreakerState::HalfOpen);
        assert_eq!(status.success_count, 0);
        // The trial still owns the only slot.
        assert!(succeed(&cb).await.unwrap_err().is_open());

        finish_trial.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), 2);
        assert_eq!(cb.status().success_count, 1);
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn test_late_closed_failure_does_not_reopen_half_open() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        let (finish_slow, slow_gate) = oneshot::channel::<()>();

        let slow = cb.call(|| async move {
            let _ = slow_gate.await;
            Err::<(), _>("late")
        });
        tokio::pin!(slow);
        assert!(tokio::time::timeout(Duration::from_millis(1), &mut slow).await.is_err());

        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        clock.advance_ms(1_000);
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        finish_slow.send(()).unwrap();
        slow.await.unwrap_err();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert_eq!(cb.status().success_count, 1);
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&BreakerState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
    }
}
