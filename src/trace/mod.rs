//! OpenTelemetry tracing interceptors for unary and streaming gRPC calls.
//!
//! [`ClientInterceptor`] and [`ServerInterceptor`] wrap the application's
//! invoke/handler closures: they start a span before the wrapped call,
//! carry trace context across the wire through the call's metadata, and
//! end the span with the call's outcome, without ever altering the
//! response or the error the application sees.
//!
//! For streaming calls the interceptors hand back a decorated stream
//! ([`TracedClientStream`], [`TracedServerStream`]) that completes the
//! span exactly once, on whichever operation first observes a terminal
//! condition. End of stream is a normal termination and completes the
//! span with status `Ok`, never `Error`.
//!
//! ```no_run
//! use stile::trace::{ClientInterceptor, TraceOptions};
//! use tonic::{Request, Response, Status};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Status> {
//! let tracing = ClientInterceptor::with_options(TraceOptions::new());
//! let response: Response<String> = tracing
//!     .unary("/echo.Echo/Ping", Request::new("ping".to_owned()), |cx, request| async move {
//!         // `cx` carries the client span; hand it to nested calls.
//!         let _ = cx;
//!         Ok(Response::new(request.into_inner()))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod server;
mod span;

pub use client::{ClientInterceptor, ClientStream, TracedClientStream};
pub use server::{ServerInterceptor, ServerStream, TracedServerStream};
pub use span::StreamSpan;

use std::sync::Arc;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::Tracer;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

/// Transform applied to the derived context before the wrapped invocation
/// runs. Identity when not configured.
pub type ContextFn = Arc<dyn Fn(Context) -> Context + Send + Sync>;

/// Configuration for the tracing interceptors: the tracer, the propagator,
/// and an optional context transform.
///
/// Defaults are resolved once, at construction: the process-wide tracer
/// and the W3C trace-context propagator. Everything after that is explicit:
/// the interceptors never reach into globals per call.
#[derive(Clone)]
pub struct TraceOptions<T = BoxedTracer, P = TraceContextPropagator> {
    pub(crate) tracer: T,
    pub(crate) propagator: P,
    pub(crate) context_fn: Option<ContextFn>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            tracer: global::tracer(env!("CARGO_PKG_NAME")),
            propagator: TraceContextPropagator::new(),
            context_fn: None,
        }
    }
}

impl TraceOptions {
    /// Options with the global tracer and the W3C trace-context propagator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T, P> TraceOptions<T, P> {
    /// Replace the tracer spans are started on.
    pub fn with_tracer<T2>(self, tracer: T2) -> TraceOptions<T2, P>
    where
        T2: Tracer,
    {
        TraceOptions {
            tracer,
            propagator: self.propagator,
            context_fn: self.context_fn,
        }
    }

    /// Replace the propagator used to carry trace context in metadata.
    pub fn with_propagator<P2>(self, propagator: P2) -> TraceOptions<T, P2>
    where
        P2: TextMapPropagator,
    {
        TraceOptions {
            tracer: self.tracer,
            propagator,
            context_fn: self.context_fn,
        }
    }

    /// Transform the derived context before the wrapped invocation sees it.
    pub fn with_context_fn<F>(mut self, context_fn: F) -> Self
    where
        F: Fn(Context) -> Context + Send + Sync + 'static,
    {
        self.context_fn = Some(Arc::new(context_fn));
        self
    }

    pub(crate) fn transform(&self, cx: Context) -> Context {
        match &self.context_fn {
            Some(context_fn) => context_fn(cx),
            None => cx,
        }
    }
}
