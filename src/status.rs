//! Map application errors onto gRPC statuses at the server boundary.
//!
//! Handlers written against a domain error type stay free of wire
//! concerns; [`StatusMapper`] converts whatever they return into the
//! [`Status`] the transport reports.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use tonic::{Request, Response, Status};

/// Classifier from an application error to the status reported on the wire.
pub type ErrorFn = Arc<dyn Fn(&(dyn Error + 'static)) -> Status + Send + Sync>;

/// Default classification.
///
/// An error that already is a [`Status`] passes through unchanged; a tokio
/// timeout maps to `DeadlineExceeded`; anything else maps to `Unknown`
/// with the error's display text.
pub fn status_from_error(error: &(dyn Error + 'static)) -> Status {
    if let Some(status) = error.downcast_ref::<Status>() {
        return status.clone();
    }
    if error.is::<tokio::time::error::Elapsed>() {
        return Status::deadline_exceeded(error.to_string());
    }
    Status::unknown(error.to_string())
}

/// Server-side interceptor converting handler errors into [`Status`].
#[derive(Clone)]
pub struct StatusMapper {
    error_fn: ErrorFn,
}

impl Default for StatusMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMapper {
    /// Mapper with the [`status_from_error`] classifier.
    pub fn new() -> Self {
        Self {
            error_fn: Arc::new(|error| status_from_error(error)),
        }
    }

    /// Replace the classifier.
    pub fn with_error_fn<F>(mut self, error_fn: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> Status + Send + Sync + 'static,
    {
        self.error_fn = Arc::new(error_fn);
        self
    }

    /// Wrap a unary handler whose error type is an application error.
    pub async fn unary<Req, Res, E, F, Fut>(
        &self,
        request: Request<Req>,
        handler: F,
    ) -> Result<Response<Res>, Status>
    where
        E: Error + Send + Sync + 'static,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Res>, E>>,
    {
        match handler(request).await {
            Ok(response) => Ok(response),
            Err(error) => Err((self.error_fn)(&error)),
        }
    }

    /// Wrap a streaming handler whose error type is an application error.
    pub async fn stream<E, F, Fut>(&self, handler: F) -> Result<(), Status>
    where
        E: Error + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        match handler().await {
            Ok(()) => Ok(()),
            Err(error) => Err((self.error_fn)(&error)),
        }
    }
}
