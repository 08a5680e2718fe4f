//! Structured call logging interceptors.
//!
//! One [`tracing`] event per completed call: direction, method, status
//! code, latency, and the error text when there is one. The wrappers are
//! fully transparent; they observe the call's outcome and return it
//! unchanged.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tonic::{Code, Request, Response, Status};

/// Predicate deciding whether a completed call is skipped by the logger.
pub type SkipFn = Arc<dyn Fn(&str, Option<&Status>) -> bool + Send + Sync>;

/// Flat per-call fields, accumulated then emitted as one event.
#[derive(Debug, Default)]
pub struct FieldBuilder {
    system: Option<&'static str>,
    method: Option<String>,
    peer: Option<SocketAddr>,
    code: Option<Code>,
    error: Option<String>,
    latency: Option<Duration>,
}

impl FieldBuilder {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the call as client-side.
    pub fn client(mut self) -> Self {
        self.system = Some("grpc.client");
        self
    }

    /// Mark the call as server-side.
    pub fn server(mut self) -> Self {
        self.system = Some("grpc.server");
        self
    }

    /// Record the full method name.
    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_owned());
        self
    }

    /// Record the remote peer address, when the caller's transport knows
    /// it (for tonic servers, `Request::remote_addr`).
    pub fn peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    /// Record the call's final status code and error text.
    pub fn outcome(mut self, error: Option<&Status>) -> Self {
        self.code = Some(error.map_or(Code::Ok, Status::code));
        self.error = error.map(|status| status.message().to_owned());
        self
    }

    /// Record elapsed wall time.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Emit the event: `info` for successful calls, `warn` for failed ones.
    pub fn emit(self) {
        let system = self.system.unwrap_or("grpc");
        let method = self.method.as_deref().unwrap_or("");
        let peer = self.peer.map(|peer| peer.to_string());
        let peer = peer.as_deref();
        let code = self.code.unwrap_or(Code::Ok);
        let latency_ms = self.latency.unwrap_or_default().as_millis() as u64;

        if code == Code::Ok {
            tracing::info!(system, method, peer, code = ?code, latency_ms, "call finished");
        } else {
            let error = self.error.as_deref().unwrap_or("");
            tracing::warn!(system, method, peer, code = ?code, latency_ms, error, "call failed");
        }
    }
}

/// Logging interceptor for unary and streaming calls.
#[derive(Clone, Default)]
pub struct CallLogger {
    skip: Option<SkipFn>,
}

impl CallLogger {
    /// Logger that records every call.
    pub fn new() -> Self {
        Self { skip: None }
    }

    /// Suppress logging for calls where the predicate returns true.
    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&str, Option<&Status>) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Log one client unary call.
    pub async fn unary_client<Req, Res, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        invoke: F,
    ) -> Result<Response<Res>, Status>
    where
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Res>, Status>>,
    {
        let started = Instant::now();
        let result = invoke(request).await;
        self.log(FieldBuilder::new().client(), method, result.as_ref().err(), started);
        result
    }

    /// Log one server unary call.
    pub async fn unary_server<Req, Res, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        handler: F,
    ) -> Result<Response<Res>, Status>
    where
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Res>, Status>>,
    {
        let started = Instant::now();
        let result = handler(request).await;
        self.log(FieldBuilder::new().server(), method, result.as_ref().err(), started);
        result
    }

    /// Log a client stream establishment.
    pub async fn stream_client<S, F, Fut>(&self, method: &str, establish: F) -> Result<S, Status>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, Status>>,
    {
        let started = Instant::now();
        let result = establish().await;
        self.log(FieldBuilder::new().client(), method, result.as_ref().err(), started);
        result
    }

    /// Log a server streaming handler run.
    pub async fn stream_server<F, Fut>(&self, method: &str, handler: F) -> Result<(), Status>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        let started = Instant::now();
        let result = handler().await;
        self.log(FieldBuilder::new().server(), method, result.as_ref().err(), started);
        result
    }

    fn log(&self, builder: FieldBuilder, method: &str, error: Option<&Status>, started: Instant) {
        if self.skip.as_ref().is_some_and(|skip| skip(method, error)) {
            return;
        }
        builder
            .method(method)
            .outcome(error)
            .latency(started.elapsed())
            .emit();
    }
}
