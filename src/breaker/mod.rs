//! Circuit Breaker
//!
//! Closed / open / half-open state machine guarding outbound calls.
//!
//! ```text
//!            trip predicate                 open timeout
//!   Closed ─────────────────► Open ─────────────────────► HalfOpen
//!     ▲                        ▲                             │
//!     │                        └──────── any failure ────────┤
//!     └──────────── max_requests consecutive successes ──────┘
//! ```
//!
//! - `state`: pure `BreakerCore`, time passed in explicitly
//! - `circuit`: `CircuitBreaker`, the locked runtime wrapper
//! - `settings`: runtime `Settings` and the `BreakerConfig` file section
//! - `extension`: `BreakerExtension`, shared breaker + call guards

mod circuit;
mod extension;
#[cfg(test)]
mod model;
mod settings;
mod state;

pub use circuit::{logging_state_change, CircuitBreaker, ExecuteError};
pub use extension::BreakerExtension;
pub use settings::{
    BreakerConfig, Settings, StateChangeCallback, TripPredicate, DEFAULT_INTERVAL,
    DEFAULT_MAX_REQUESTS, DEFAULT_TIMEOUT,
};
pub use state::{
    default_ready_to_trip, BreakerCore, BreakerError, Counts, Outcome, State, Transition,
    Transitions,
};
