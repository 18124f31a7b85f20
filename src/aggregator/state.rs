//! Aggregation state: group key -> accumulated value and its epoch

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running total for one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator {
    pub value: i64,
    /// Start of the cumulative epoch; fixed once the group exists
    #[serde(rename = "start_time_unix_nano")]
    pub start_time: Timestamp,
}

/// All groups, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationState {
    groups: BTreeMap<String, Accumulator>,
}

impl AggregationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups(groups: BTreeMap<String, Accumulator>) -> Self {
        AggregationState { groups }
    }

    /// Add a non-negative increment to `key`, creating the group at `now`.
    /// Saturates at `i64::MAX`. Returns the new total.
    pub fn add(&mut self, key: &str, increment: i64, now: Timestamp) -> i64 {
        debug_assert!(increment >= 0);
        if let Some(acc) = self.groups.get_mut(key) {
            acc.value = acc.value.saturating_add(increment);
            return acc.value;
        }
        self.groups.insert(
            key.to_string(),
            Accumulator {
                value: increment,
                start_time: now,
            },
        );
        increment
    }

    pub fn get(&self, key: &str) -> Option<&Accumulator> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> &BTreeMap<String, Accumulator> {
        &self.groups
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Accumulator)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_first_start_time() {
        let mut state = AggregationState::new();
        state.add("manual", 2, Timestamp::from_nanos(10));
        state.add("manual", 3, Timestamp::from_nanos(99));

        let acc = state.get("manual").unwrap();
        assert_eq!(acc.value, 5);
        assert_eq!(acc.start_time, Timestamp::from_nanos(10));
    }

    #[test]
    fn test_add_saturates() {
        let mut state = AggregationState::new();
        state.add("k", i64::MAX - 1, Timestamp::ZERO);
        assert_eq!(state.add("k", 10, Timestamp::ZERO), i64::MAX);
    }

    #[test]
    fn test_accumulator_json_field_names() {
        let acc = Accumulator {
            value: 3,
            start_time: Timestamp::from_nanos(42),
        };
        assert_eq!(
            serde_json::to_string(&acc).unwrap(),
            r#"{"value":3,"start_time_unix_nano":42}"#
        );
    }
}
