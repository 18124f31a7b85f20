//! Simple Aggregator
//!
//! Collapses a high-cardinality sum (one series per `work.id`) into one
//! cumulative series per `work.type`, and emits the totals on a timer.
//!
//! ```text
//! ingest ──► AggregationState ──(every flush_interval)──► checkpoint
//!              (key → value,                                  │
//!               start_time)                                   ▼
//!                                            work_done_batched ──► next
//! ```
//!
//! Totals survive restarts through the checkpoint store: on start the last
//! record is folded back in, on shutdown a final flush writes it out.

mod checkpoint;
mod config;
mod engine;
mod state;
mod worker;

pub use checkpoint::{decode, encode, CheckpointError, Decoded, CHECKPOINT_VERSION};
pub use config::{
    AggregatorConfig, CheckpointTarget, DEFAULT_FLUSH_INTERVAL, DEFAULT_SEND_TIMEOUT, MAX_INTERVAL,
};
pub use engine::{Aggregator, CheckpointStatus, FlushReport, IngestStats, SendStatus};
pub use state::{Accumulator, AggregationState};
pub use worker::FlushWorkerHandle;
