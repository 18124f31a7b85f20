//! Breaker state machine
//!
//! `BreakerCore` holds every bit of breaker state and all transition rules,
//! with time passed in explicitly. It has no locking and no callbacks: the
//! runtime `CircuitBreaker` wraps it in a mutex, and the model checker
//! drives it directly.
//!
//! Each state change, and each closed-window rollover, starts a new
//! generation. A call remembers the generation it was admitted in; its
//! outcome is dropped if the generation has moved on by the time it
//! finishes.

use crate::clock::Timestamp;
use std::time::Duration;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Closed => write!(f, "closed"),
            State::HalfOpen => write!(f, "half-open"),
            State::Open => write!(f, "open"),
        }
    }
}

/// Request and outcome counters, cleared on every generation change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Counts {
    /// Calls admitted in this generation
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.successes = self.successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn on_ignored(&mut self) {
        self.requests = self.requests.saturating_sub(1);
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

/// How a finished call is booked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    /// Not counted either way; frees the admission slot
    Ignored,
}

/// Why a call was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit breaker is open")]
    Open,
    #[error("too many requests")]
    TooManyRequests,
}

/// A state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    pub from: State,
    pub to: State,
}

/// Transitions produced by one step; at most two (timeout + outcome)
pub type Transitions = Vec<Transition>;

/// Pure breaker state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerCore {
    state: State,
    counts: Counts,
    generation: u64,
    /// Closed: end of the counting window (`None` = never).
    /// Open: when the breaker may go half-open.
    expiry: Option<Timestamp>,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
}

impl BreakerCore {
    /// Closed breaker. `max_requests` below 1 is raised to 1; an `interval`
    /// of zero means closed-state counts are never cleared.
    pub fn new(max_requests: u32, interval: Duration, timeout: Duration, now: Timestamp) -> Self {
        let mut core = BreakerCore {
            state: State::Closed,
            counts: Counts::default(),
            generation: 0,
            expiry: None,
            max_requests: max_requests.max(1),
            interval,
            timeout,
        };
        core.new_generation(now);
        core
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Apply time-driven changes: closed-window rollover and
    /// open -> half-open once the timeout has elapsed.
    pub fn refresh(&mut self, now: Timestamp, transitions: &mut Transitions) {
        match self.state {
            State::Closed => {
                if matches!(self.expiry, Some(expiry) if now >= expiry) {
                    self.new_generation(now);
                }
            }
            State::Open => {
                if matches!(self.expiry, Some(expiry) if now >= expiry) {
                    self.set_state(State::HalfOpen, now, transitions);
                }
            }
            State::HalfOpen => {}
        }
    }

    /// Admission check. On success the call is counted and the generation
    /// it belongs to is returned.
    pub fn before_request(
        &mut self,
        now: Timestamp,
        transitions: &mut Transitions,
    ) -> Result<u64, BreakerError> {
        self.refresh(now, transitions);
        match self.state {
            State::Open => return Err(BreakerError::Open),
            State::HalfOpen if self.counts.requests >= self.max_requests => {
                return Err(BreakerError::TooManyRequests)
            }
            _ => {}
        }
        self.counts.on_request();
        Ok(self.generation)
    }

    /// Book the outcome of a call admitted in `generation`
    pub fn after_request(
        &mut self,
        generation: u64,
        outcome: Outcome,
        now: Timestamp,
        ready_to_trip: &dyn Fn(&Counts) -> bool,
        transitions: &mut Transitions,
    ) {
        self.refresh(now, transitions);
        if generation != self.generation {
            return;
        }
        match outcome {
            Outcome::Success => self.on_success(now, transitions),
            Outcome::Failure => self.on_failure(now, ready_to_trip, transitions),
            Outcome::Ignored => self.counts.on_ignored(),
        }
    }

    fn on_success(&mut self, now: Timestamp, transitions: &mut Transitions) {
        match self.state {
            State::Closed => self.counts.on_success(),
            State::HalfOpen => {
                self.counts.on_success();
                if self.counts.consecutive_successes >= self.max_requests {
                    self.set_state(State::Closed, now, transitions);
                }
            }
            State::Open => {}
        }
    }

    fn on_failure(
        &mut self,
        now: Timestamp,
        ready_to_trip: &dyn Fn(&Counts) -> bool,
        transitions: &mut Transitions,
    ) {
        match self.state {
            State::Closed => {
                self.counts.on_failure();
                if ready_to_trip(&self.counts) {
                    self.set_state(State::Open, now, transitions);
                }
            }
            State::HalfOpen => self.set_state(State::Open, now, transitions),
            State::Open => {}
        }
    }

    fn set_state(&mut self, to: State, now: Timestamp, transitions: &mut Transitions) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.new_generation(now);
        transitions.push(Transition { from, to });
    }

    fn new_generation(&mut self, now: Timestamp) {
        self.generation = self.generation.wrapping_add(1);
        self.counts.clear();
        self.expiry = match self.state {
            State::Closed if self.interval.is_zero() => None,
            State::Closed => Some(now + self.interval),
            State::Open => Some(now + self.timeout),
            State::HalfOpen => None,
        };
    }
}

/// Trips after more than five consecutive failures
pub fn default_ready_to_trip(counts: &Counts) -> bool {
    counts.consecutive_failures > 5
}
