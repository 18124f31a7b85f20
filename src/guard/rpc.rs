//! RPC call guard
//!
//! Status codes follow gRPC. The breaker wraps unary calls whole; for
//! streams it only wraps establishment, so errors while consuming an open
//! stream are never attributed to the breaker.

use crate::breaker::{BreakerError, CircuitBreaker, ExecuteError, Outcome};
use futures::future::BoxFuture;
use std::sync::Arc;

/// gRPC-style status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl RpcCode {
    /// Numeric wire value
    pub fn as_i32(self) -> i32 {
        match self {
            RpcCode::Ok => 0,
            RpcCode::Cancelled => 1,
            RpcCode::Unknown => 2,
            RpcCode::InvalidArgument => 3,
            RpcCode::DeadlineExceeded => 4,
            RpcCode::NotFound => 5,
            RpcCode::AlreadyExists => 6,
            RpcCode::PermissionDenied => 7,
            RpcCode::ResourceExhausted => 8,
            RpcCode::FailedPrecondition => 9,
            RpcCode::Aborted => 10,
            RpcCode::OutOfRange => 11,
            RpcCode::Unimplemented => 12,
            RpcCode::Internal => 13,
            RpcCode::Unavailable => 14,
            RpcCode::DataLoss => 15,
            RpcCode::Unauthenticated => 16,
        }
    }
}

/// Error status of a failed call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rpc error: code = {code:?} desc = {message}")]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        RpcStatus {
            code,
            message: message.into(),
        }
    }

    fn from_rejection(e: BreakerError) -> Self {
        RpcStatus::new(RpcCode::Unavailable, format!("circuit breaker is open: {}", e))
    }
}

/// Performs a unary call
pub trait UnaryInvoker: Send + Sync {
    type Request: Send;
    type Response: Send;

    fn invoke<'a>(
        &'a self,
        method: &'a str,
        request: Self::Request,
    ) -> BoxFuture<'a, Result<Self::Response, RpcStatus>>;
}

/// Opens a stream
pub trait StreamInvoker: Send + Sync {
    type Stream: Send;

    fn open<'a>(&'a self, method: &'a str) -> BoxFuture<'a, Result<Self::Stream, RpcStatus>>;
}

/// Client interceptor applying a breaker to RPC calls
#[derive(Debug, Clone)]
pub struct BreakerInterceptor {
    breaker: Arc<CircuitBreaker>,
}

impl BreakerInterceptor {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        BreakerInterceptor { breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run a unary call through the breaker
    pub async fn unary<I: UnaryInvoker>(
        &self,
        invoker: &I,
        method: &str,
        request: I::Request,
    ) -> Result<I::Response, RpcStatus> {
        let on_cancel = self.breaker.cancellation_outcome();
        let call = invoker.invoke(method, request);
        self.breaker
            .execute_async_classified(call, move |r| classify(r, on_cancel))
            .await
            .map_err(into_status)
    }

    /// Open a stream through the breaker
    pub async fn stream<S: StreamInvoker>(
        &self,
        invoker: &S,
        method: &str,
    ) -> Result<S::Stream, RpcStatus> {
        let on_cancel = self.breaker.cancellation_outcome();
        let call = invoker.open(method);
        self.breaker
            .execute_async_classified(call, move |r| classify(r, on_cancel))
            .await
            .map_err(into_status)
    }
}

fn classify<T>(result: &Result<T, RpcStatus>, on_cancel: Outcome) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(status) if status.code == RpcCode::Cancelled => on_cancel,
        Err(_) => Outcome::Failure,
    }
}

fn into_status(err: ExecuteError<RpcStatus>) -> RpcStatus {
    match err {
        ExecuteError::Rejected(e) => RpcStatus::from_rejection(e),
        ExecuteError::Failed(status) => status,
    }
}
