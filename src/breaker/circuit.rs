//! Thread-safe circuit breaker
//!
//! Admission and outcome booking each take the core lock once, so
//! concurrent callers cannot overrun the half-open limit. The unit of work
//! itself runs outside the lock.

use super::settings::{Settings, StateChangeCallback, TripPredicate, DEFAULT_TIMEOUT};
use super::state::{default_ready_to_trip, BreakerCore, BreakerError, Counts, Outcome, State, Transitions};
use crate::clock::{Clock, ProductionClock};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Result of running a unit of work through the breaker
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    /// The breaker refused the call; the unit of work never ran
    #[error(transparent)]
    Rejected(#[from] BreakerError),
    /// The unit of work ran and returned an error
    #[error("{0}")]
    Failed(E),
}

impl<E> ExecuteError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ExecuteError::Rejected(_))
    }

    pub fn rejection(&self) -> Option<BreakerError> {
        match self {
            ExecuteError::Rejected(e) => Some(*e),
            ExecuteError::Failed(_) => None,
        }
    }

    pub fn into_failed(self) -> Option<E> {
        match self {
            ExecuteError::Failed(e) => Some(e),
            ExecuteError::Rejected(_) => None,
        }
    }
}

/// State-change callback that logs each transition
pub fn logging_state_change() -> StateChangeCallback {
    Arc::new(|name: &str, from: State, to: State| {
        info!(name = name, from = %from, to = %to, "circuit breaker state changed");
    })
}

/// Circuit breaker guarding arbitrary units of work
pub struct CircuitBreaker {
    name: String,
    core: Mutex<BreakerCore>,
    ready_to_trip: TripPredicate,
    on_state_change: StateChangeCallback,
    count_cancellation_as_failure: bool,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(settings: Settings) -> Self {
        let clock: Arc<dyn Clock> = match settings.clock {
            Some(clock) => clock,
            None => Arc::new(ProductionClock::new()),
        };
        let timeout = if settings.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            settings.timeout
        };
        let core = BreakerCore::new(
            settings.max_requests.max(1),
            settings.interval,
            timeout,
            clock.now(),
        );
        CircuitBreaker {
            name: settings.name,
            core: Mutex::new(core),
            ready_to_trip: settings
                .ready_to_trip
                .unwrap_or_else(|| Arc::new(default_ready_to_trip)),
            on_state_change: settings.on_state_change.unwrap_or_else(logging_state_change),
            count_cancellation_as_failure: settings.count_cancellation_as_failure,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, after applying any elapsed timeout
    pub fn state(&self) -> State {
        let mut core = self.core.lock();
        let mut transitions = Transitions::new();
        core.refresh(self.clock.now(), &mut transitions);
        self.notify(&transitions);
        core.state()
    }

    /// Counters of the current generation
    pub fn counts(&self) -> Counts {
        let mut core = self.core.lock();
        let mut transitions = Transitions::new();
        core.refresh(self.clock.now(), &mut transitions);
        self.notify(&transitions);
        core.counts()
    }

    pub fn count_cancellation_as_failure(&self) -> bool {
        self.count_cancellation_as_failure
    }

    /// How an abandoned call is booked
    pub fn cancellation_outcome(&self) -> Outcome {
        if self.count_cancellation_as_failure {
            Outcome::Failure
        } else {
            Outcome::Ignored
        }
    }

    /// Run `f` if admitted; `Err` from `f` counts as a failure
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.execute_classified(f, success_if_ok)
    }

    /// Run `f` if admitted and book the outcome chosen by `classify`
    pub fn execute_classified<T, E, F, C>(&self, f: F, classify: C) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        C: FnOnce(&Result<T, E>) -> Outcome,
    {
        let admission = self.admit()?;
        let result = f();
        admission.finish(classify(&result));
        result.map_err(ExecuteError::Failed)
    }

    /// Await `work` if admitted; `Err` counts as a failure
    ///
    /// Dropping the returned future mid-call books the call per
    /// `count_cancellation_as_failure`.
    pub async fn execute_async<T, E, Fut>(&self, work: Fut) -> Result<T, ExecuteError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_async_classified(work, success_if_ok).await
    }

    pub async fn execute_async_classified<T, E, Fut, C>(
        &self,
        work: Fut,
        classify: C,
    ) -> Result<T, ExecuteError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> Outcome,
    {
        let admission = self.admit()?;
        let result = work.await;
        admission.finish(classify(&result));
        result.map_err(ExecuteError::Failed)
    }

    fn admit(&self) -> Result<Admission<'_>, BreakerError> {
        let mut core = self.core.lock();
        let mut transitions = Transitions::new();
        let admitted = core.before_request(self.clock.now(), &mut transitions);
        self.notify(&transitions);
        let generation = admitted?;
        Ok(Admission {
            breaker: self,
            generation,
            armed: true,
        })
    }

    fn record(&self, generation: u64, outcome: Outcome) {
        let mut core = self.core.lock();
        let mut transitions = Transitions::new();
        core.after_request(
            generation,
            outcome,
            self.clock.now(),
            &*self.ready_to_trip,
            &mut transitions,
        );
        self.notify(&transitions);
    }

    fn notify(&self, transitions: &Transitions) {
        for t in transitions {
            (self.on_state_change)(&self.name, t.from, t.to);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &core.state())
            .field("counts", &core.counts())
            .finish()
    }
}

fn success_if_ok<T, E>(result: &Result<T, E>) -> Outcome {
    if result.is_ok() {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

/// An admitted call that has not been booked yet
///
/// Dropped unbooked means the work panicked or was abandoned.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    armed: bool,
}

impl Admission<'_> {
    fn finish(mut self, outcome: Outcome) {
        self.armed = false;
        self.breaker.record(self.generation, outcome);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let outcome = if std::thread::panicking() {
            Outcome::Failure
        } else {
            self.breaker.cancellation_outcome()
        };
        self.breaker.record(self.generation, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SimulatedClock, Timestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn breaker(clock: &SimulatedClock) -> CircuitBreaker {
        CircuitBreaker::new(
            Settings::new("test")
                .with_timeout(Duration::from_secs(30))
                .with_clock(Arc::new(clock.clone())),
        )
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..6 {
            let _ = cb.execute(|| Err::<(), _>("boom"));
        }
    }

    #[test]
    fn test_open_rejects_without_running_work() {
        let clock = SimulatedClock::new(Timestamp::ZERO);
        let cb = breaker(&clock);
        trip(&cb);
        assert_eq!(cb.state(), State::Open);

        let calls = AtomicUsize::new(0);
        let result = cb.execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });
        assert!(matches!(result, Err(ExecuteError::Rejected(BreakerError::Open))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_state_change_callback_sees_transitions() {
        let clock = SimulatedClock::new(Timestamp::ZERO);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = CircuitBreaker::new(
            Settings::new("cb-cb")
                .with_timeout(Duration::from_secs(1))
                .with_clock(Arc::new(clock.clone()))
                .with_on_state_change(move |name, from, to| {
                    sink.lock().push((name.to_string(), from, to));
                }),
        );
        trip(&cb);
        clock.advance(Duration::from_secs(1));
        cb.execute(|| Ok::<_, ()>(())).unwrap();

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                ("cb-cb".to_string(), State::Closed, State::Open),
                ("cb-cb".to_string(), State::Open, State::HalfOpen),
                ("cb-cb".to_string(), State::HalfOpen, State::Closed),
            ]
        );
    }

    #[test]
    fn test_custom_trip_predicate() {
        let clock = SimulatedClock::new(Timestamp::ZERO);
        let cb = CircuitBreaker::new(
            Settings::new("strict")
                .with_clock(Arc::new(clock))
                .with_ready_to_trip(|counts| counts.failures >= 2),
        );
        let _ = cb.execute(|| Err::<(), _>(()));
        assert_eq!(cb.state(), State::Closed);
        let _ = cb.execute(|| Err::<(), _>(()));
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn test_classified_ignored_does_not_count() {
        let clock = SimulatedClock::new(Timestamp::ZERO);
        let cb = breaker(&clock);
        for _ in 0..10 {
            let _ = cb.execute_classified(|| Err::<(), _>("cancelled"), |_| Outcome::Ignored);
        }
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[test]
    fn test_panic_counts_as_failure() {
        let clock = SimulatedClock::new(Timestamp::ZERO);
        let cb = breaker(&clock);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cb.execute(|| -> Result<(), ()> { panic!("unit of work panicked") })
        }));
        assert!(result.is_err());
        assert_eq!(cb.counts().failures, 1);
    }

    #[tokio::test]
    async fn test_dropped_future_is_ignored_by_default() {
        let clock = SimulatedClock::new(Timestamp::ZERO);
        let cb = breaker(&clock);
        let slow = cb.execute_async(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, ()>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(timed_out.is_err());
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test]
    async fn test_dropped_future_counts_when_configured() {
        let clock = SimulatedClock::new(Timestamp::ZERO);
        let cb = CircuitBreaker::new(
            Settings::new("strict")
                .with_clock(Arc::new(clock))
                .with_count_cancellation_as_failure(true),
        );
        let slow = cb.execute_async(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, ()>(())
        });
        let _ = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert_eq!(cb.counts().failures, 1);
    }
}
