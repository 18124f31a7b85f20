//! HTTP call guard

use super::GuardError;
use crate::breaker::{CircuitBreaker, ExecuteError, Outcome};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Anything carrying an HTTP status code
pub trait HttpResponse {
    fn status(&self) -> u16;
}

/// One request/response exchange over some HTTP transport
pub trait RoundTrip: Send + Sync {
    type Request: Send;
    type Response: HttpResponse + Send;
    type Error: Send;

    fn round_trip(
        &self,
        request: Self::Request,
    ) -> BoxFuture<'_, Result<Self::Response, Self::Error>>;

    /// Whether `error` means the caller gave up rather than the server failing
    fn is_cancellation(_error: &Self::Error) -> bool {
        false
    }
}

/// Transport decorator that routes every call through a breaker
///
/// 5xx responses count as failures and come back as
/// `GuardError::Status`; 1xx-4xx responses are successes.
pub struct BreakerRoundTripper<T> {
    inner: T,
    breaker: Arc<CircuitBreaker>,
}

impl<T: RoundTrip> BreakerRoundTripper<T> {
    pub fn new(inner: T, breaker: Arc<CircuitBreaker>) -> Self {
        BreakerRoundTripper { inner, breaker }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<T: RoundTrip> RoundTrip for BreakerRoundTripper<T> {
    type Request = T::Request;
    type Response = T::Response;
    type Error = GuardError<T::Error>;

    fn round_trip(
        &self,
        request: Self::Request,
    ) -> BoxFuture<'_, Result<Self::Response, Self::Error>> {
        Box::pin(async move {
            let on_cancel = self.breaker.cancellation_outcome();
            let call = async move {
                match self.inner.round_trip(request).await {
                    Ok(response) if response.status() >= 500 => {
                        Err(GuardError::Status(response.status()))
                    }
                    Ok(response) => Ok(response),
                    Err(e) => Err(GuardError::Transport(e)),
                }
            };
            let classify = move |result: &Result<T::Response, GuardError<T::Error>>| match result {
                Ok(_) => Outcome::Success,
                Err(GuardError::Transport(e)) if T::is_cancellation(e) => on_cancel,
                Err(_) => Outcome::Failure,
            };
            match self.breaker.execute_async_classified(call, classify).await {
                Ok(response) => Ok(response),
                Err(ExecuteError::Rejected(e)) => Err(GuardError::BreakerOpen(e)),
                Err(ExecuteError::Failed(e)) => Err(e),
            }
        })
    }

    fn is_cancellation(error: &Self::Error) -> bool {
        matches!(error, GuardError::Transport(e) if T::is_cancellation(e))
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::{HttpResponse, RoundTrip};
    use futures::future::BoxFuture;

    impl HttpResponse for reqwest::Response {
        fn status(&self) -> u16 {
            reqwest::Response::status(self).as_u16()
        }
    }

    impl RoundTrip for reqwest::Client {
        type Request = reqwest::Request;
        type Response = reqwest::Response;
        type Error = reqwest::Error;

        fn round_trip(
            &self,
            request: Self::Request,
        ) -> BoxFuture<'_, Result<Self::Response, Self::Error>> {
            Box::pin(self.execute(request))
        }
    }
}
