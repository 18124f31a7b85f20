//! Call guards
//!
//! Decorators that put a `CircuitBreaker` in front of an outbound call
//! site and translate breaker rejections into errors the caller can tell
//! apart from transport failures.
//!
//! - `http`: `BreakerRoundTripper` over any `RoundTrip` transport
//! - `rpc`: `BreakerInterceptor` for unary calls and stream establishment
//! - `consumer`: `GuardedConsumer` over a downstream `MetricsConsumer`

mod consumer;
mod error;
mod http;
mod rpc;

pub use consumer::GuardedConsumer;
pub use error::GuardError;
pub use http::{BreakerRoundTripper, HttpResponse, RoundTrip};
pub use rpc::{BreakerInterceptor, RpcCode, RpcStatus, StreamInvoker, UnaryInvoker};
