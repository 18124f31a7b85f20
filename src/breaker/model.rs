//! Stateright model of the breaker
//!
//! Drives `BreakerCore` with every interleaving of a few concurrent callers
//! being admitted, finishing with each outcome, and time moving forward.
//! Checks that half-open admission never exceeds `max_requests` and that
//! an open breaker never admits.

use super::state::{BreakerCore, Counts, Outcome, State, Transitions};
use crate::clock::Timestamp;
use stateright::{Model, Property};
use std::time::Duration;

const STEP: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Caller {
    Idle,
    /// Admitted in the given generation
    InFlight(u64),
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BreakerModelState {
    pub core: BreakerCore,
    pub callers: Vec<Caller>,
    pub ticks: u64,
    pub calls: u32,
    /// Admitted while the breaker was open (must stay false)
    pub admitted_while_open: bool,
    /// A half-open probe closed the breaker again
    pub reclosed: bool,
}

impl BreakerModelState {
    fn now(&self) -> Timestamp {
        Timestamp::ZERO + STEP * self.ticks as u32
    }

    /// Calls in flight that were admitted in the current generation
    fn live_in_flight(&self) -> u32 {
        let generation = self.core.generation();
        self.callers
            .iter()
            .filter(|c| matches!(c, Caller::InFlight(g) if *g == generation))
            .count() as u32
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BreakerAction {
    Call(usize),
    Finish(usize, Outcome),
    Tick,
}

pub struct BreakerModel {
    pub callers: usize,
    pub max_requests: u32,
    pub max_ticks: u64,
    pub max_calls: u32,
    pub trip_after: u32,
}

impl Default for BreakerModel {
    fn default() -> Self {
        BreakerModel {
            callers: 3,
            max_requests: 2,
            max_ticks: 5,
            max_calls: 6,
            trip_after: 2,
        }
    }
}

impl Model for BreakerModel {
    type State = BreakerModelState;
    type Action = BreakerAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![BreakerModelState {
            core: BreakerCore::new(self.max_requests, 3 * STEP, 2 * STEP, Timestamp::ZERO),
            callers: vec![Caller::Idle; self.callers],
            ticks: 0,
            calls: 0,
            admitted_while_open: false,
            reclosed: false,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, caller) in state.callers.iter().enumerate() {
            match caller {
                Caller::Idle | Caller::Rejected => {
                    if state.calls < self.max_calls {
                        actions.push(BreakerAction::Call(i));
                    }
                }
                Caller::InFlight(_) => {
                    for outcome in [Outcome::Success, Outcome::Failure, Outcome::Ignored] {
                        actions.push(BreakerAction::Finish(i, outcome));
                    }
                }
            }
        }
        if state.ticks < self.max_ticks {
            actions.push(BreakerAction::Tick);
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        let now = next.now();
        let mut transitions = Transitions::new();
        let trip_after = self.trip_after;
        let ready_to_trip = move |c: &Counts| c.consecutive_failures >= trip_after;

        match action {
            BreakerAction::Call(i) => {
                next.core.refresh(now, &mut transitions);
                let was_open = next.core.state() == State::Open;
                next.calls += 1;
                match next.core.before_request(now, &mut transitions) {
                    Ok(generation) => {
                        next.admitted_while_open |= was_open;
                        next.callers[i] = Caller::InFlight(generation);
                    }
                    Err(_) => next.callers[i] = Caller::Rejected,
                }
            }
            BreakerAction::Finish(i, outcome) => {
                let Caller::InFlight(generation) = next.callers[i] else {
                    return None;
                };
                next.core
                    .after_request(generation, outcome, now, &ready_to_trip, &mut transitions);
                next.callers[i] = Caller::Idle;
            }
            BreakerAction::Tick => {
                next.ticks += 1;
            }
        }
        next.reclosed |= transitions
            .iter()
            .any(|t| t.from == State::HalfOpen && t.to == State::Closed);
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always(
                "half_open_admission_bounded",
                |model: &BreakerModel, state: &BreakerModelState| {
                    state.core.state() != State::HalfOpen
                        || (state.core.counts().requests <= model.max_requests
                            && state.live_in_flight() <= model.max_requests)
                },
            ),
            Property::always(
                "never_admits_while_open",
                |_model: &BreakerModel, state: &BreakerModelState| !state.admitted_while_open,
            ),
            Property::always(
                "open_carries_no_counts",
                |_model: &BreakerModel, state: &BreakerModelState| {
                    state.core.state() != State::Open || state.core.counts().requests == 0
                },
            ),
            Property::sometimes(
                "reaches_half_open",
                |_model: &BreakerModel, state: &BreakerModelState| {
                    state.core.state() == State::HalfOpen
                },
            ),
            Property::sometimes(
                "recloses_after_probe",
                |_model: &BreakerModel, state: &BreakerModelState| state.reclosed,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn test_model_initial_state() {
        let model = BreakerModel::default();
        let init = &model.init_states()[0];
        assert_eq!(init.core.state(), State::Closed);
        assert_eq!(init.callers.len(), 3);
    }

    #[test]
    fn stateright_breaker_model_check() {
        let model = BreakerModel::default();
        let checker = model.checker().spawn_bfs().join();
        checker.assert_properties();
    }

    #[test]
    fn stateright_breaker_single_probe() {
        let model = BreakerModel {
            callers: 2,
            max_requests: 1,
            max_ticks: 4,
            max_calls: 5,
            trip_after: 1,
        };
        let checker = model.checker().spawn_bfs().join();
        checker.assert_properties();
    }
}
