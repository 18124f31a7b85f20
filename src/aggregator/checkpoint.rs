//! Checkpoint record codec
//!
//! ```text
//! {
//!   "version": 1,
//!   "checksum": <crc32 of the serialized groups>,
//!   "groups": { "<key>": { "value": N, "start_time_unix_nano": T }, ... }
//! }
//! ```
//!
//! Groups are a sorted map, so the same state always serializes to the
//! same bytes and the checksum is stable. The older values-only form,
//! `{"<key>": N}`, is still readable.

use super::state::{Accumulator, AggregationState};
use crate::clock::Timestamp;
use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode checkpoint: {0}")]
    Encode(serde_json::Error),
    #[error("malformed checkpoint: {0}")]
    Decode(serde_json::Error),
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
    #[error("checkpoint checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("checkpoint group {key:?} has negative value {value}")]
    NegativeValue { key: String, value: i64 },
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    version: u32,
    checksum: u32,
    groups: BTreeMap<String, Accumulator>,
}

/// A decoded checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Current(AggregationState),
    /// Values-only record; every start time is the load time
    Legacy(AggregationState),
}

impl Decoded {
    pub fn into_state(self) -> AggregationState {
        match self {
            Decoded::Current(state) | Decoded::Legacy(state) => state,
        }
    }
}

fn checksum(groups: &BTreeMap<String, Accumulator>) -> Result<u32, serde_json::Error> {
    let bytes = serde_json::to_vec(groups)?;
    Ok(crc32fast::hash(&bytes))
}

pub fn encode(state: &AggregationState) -> Result<Vec<u8>, CheckpointError> {
    let groups = state.groups().clone();
    let record = Record {
        version: CHECKPOINT_VERSION,
        checksum: checksum(&groups).map_err(CheckpointError::Encode)?,
        groups,
    };
    serde_json::to_vec(&record).map_err(CheckpointError::Encode)
}

/// Decode a stored record; `now` stamps groups from a legacy record
pub fn decode(bytes: &[u8], now: Timestamp) -> Result<Decoded, CheckpointError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(CheckpointError::Decode)?;

    // Legacy values are integers, so only a current record has a
    // "groups" object. Group names alone never decide the format.
    let is_record = value["groups"].is_object();

    if !is_record {
        let legacy: BTreeMap<String, i64> =
            serde_json::from_value(value).map_err(CheckpointError::Decode)?;
        let mut groups = BTreeMap::new();
        for (key, value) in legacy {
            if value < 0 {
                return Err(CheckpointError::NegativeValue { key, value });
            }
            groups.insert(key, Accumulator { value, start_time: now });
        }
        return Ok(Decoded::Legacy(AggregationState::from_groups(groups)));
    }

    let record: Record = serde_json::from_value(value).map_err(CheckpointError::Decode)?;
    if record.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::UnsupportedVersion(record.version));
    }
    let computed = checksum(&record.groups).map_err(CheckpointError::Decode)?;
    if computed != record.checksum {
        return Err(CheckpointError::ChecksumMismatch {
            stored: record.checksum,
            computed,
        });
    }
    if let Some((key, acc)) = record.groups.iter().find(|(_, acc)| acc.value < 0) {
        return Err(CheckpointError::NegativeValue {
            key: key.clone(),
            value: acc.value,
        });
    }
    Ok(Decoded::Current(AggregationState::from_groups(record.groups)))
}
