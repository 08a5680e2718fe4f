//! Server-side tracing interceptors.

use std::future::Future;

use async_trait::async_trait;
use opentelemetry::global::BoxedTracer;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanKind, Tracer};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use super::span::{end_span, start_span, StreamSpan};
use super::TraceOptions;

/// Server-side operations of an accepted bidirectional stream.
///
/// This is the transport contract the interceptor consumes.
/// [`TracedServerStream`] decorates any implementation without changing
/// its semantics.
#[async_trait]
pub trait ServerStream: Send {
    /// Message type read from the stream.
    type Inbound: Send + 'static;
    /// Message type written to the stream.
    type Outbound: Send + 'static;

    /// Buffer initial metadata to go out with the first message.
    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// Flush the initial metadata to the client immediately.
    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// Record trailing metadata for the end of the call.
    fn set_trailer(&mut self, metadata: MetadataMap);

    /// Write one message.
    async fn send(&mut self, message: Self::Outbound) -> Result<(), Status>;

    /// Read the next message; `Ok(None)` means the client finished sending.
    async fn recv(&mut self) -> Result<Option<Self::Inbound>, Status>;
}

/// Tracing interceptor for server-side calls.
#[derive(Clone)]
pub struct ServerInterceptor<T = BoxedTracer, P = TraceContextPropagator> {
    options: TraceOptions<T, P>,
}

impl ServerInterceptor {
    /// Interceptor with [`TraceOptions::default`].
    pub fn new() -> Self {
        Self {
            options: TraceOptions::default(),
        }
    }
}

impl Default for ServerInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P> ServerInterceptor<T, P>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
    P: TextMapPropagator,
{
    /// Interceptor from explicit options.
    pub fn with_options(options: TraceOptions<T, P>) -> Self {
        Self { options }
    }

    /// Wrap one unary handler invocation in a server span.
    ///
    /// The parent context is extracted from the request metadata; a call
    /// without trace context starts a root span. The response and the
    /// error pass through unchanged.
    pub async fn unary<Req, Res, F, Fut>(
        &self,
        method: &str,
        mut request: Request<Req>,
        handler: F,
    ) -> Result<Response<Res>, Status>
    where
        F: FnOnce(Context, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Res>, Status>>,
    {
        let cx = start_span(
            &Context::current(),
            &self.options.tracer,
            &self.options.propagator,
            method,
            SpanKind::Server,
            request.metadata_mut(),
        );
        let cx = self.options.transform(cx);
        let result = handler(cx.clone(), request).await;
        end_span(&cx, result.as_ref().err());
        result
    }

    /// Wrap a streaming handler in a server span.
    ///
    /// The handler receives a [`TracedServerStream`] whose
    /// [`context`](TracedServerStream::context) carries the extracted span.
    /// A failing stream operation completes the span with that error;
    /// otherwise the span completes when the handler returns, with the
    /// handler's outcome. Both paths go through one completion handle, so
    /// the span ends exactly once either way.
    pub async fn stream<S, F, Fut>(
        &self,
        method: &str,
        mut request: Request<S>,
        handler: F,
    ) -> Result<(), Status>
    where
        S: ServerStream,
        F: FnOnce(TracedServerStream<S>) -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        let cx = start_span(
            &Context::current(),
            &self.options.tracer,
            &self.options.propagator,
            method,
            SpanKind::Server,
            request.metadata_mut(),
        );
        let cx = self.options.transform(cx);
        let span = StreamSpan::new(cx);
        let stream = TracedServerStream {
            inner: request.into_inner(),
            span: span.clone(),
        };
        let result = handler(stream).await;
        span.complete(result.as_ref().err());
        result
    }
}

/// Decorated server stream that completes its span exactly once.
pub struct TracedServerStream<S> {
    inner: S,
    span: StreamSpan,
}

impl<S> TracedServerStream<S> {
    /// Context carrying the extracted server span; use it as the parent
    /// for downstream work so the trace chains.
    pub fn context(&self) -> &Context {
        self.span.context()
    }

    /// The completion handle shared with this stream.
    pub fn completion(&self) -> &StreamSpan {
        &self.span
    }
}

#[async_trait]
impl<S> ServerStream for TracedServerStream<S>
where
    S: ServerStream,
{
    type Inbound = S::Inbound;
    type Outbound = S::Outbound;

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        let result = self.inner.set_header(metadata);
        if let Err(status) = &result {
            self.span.complete(Some(status));
        }
        result
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        let result = self.inner.send_header(metadata).await;
        if let Err(status) = &result {
            self.span.complete(Some(status));
        }
        result
    }

    fn set_trailer(&mut self, metadata: MetadataMap) {
        self.inner.set_trailer(metadata);
    }

    async fn send(&mut self, message: Self::Outbound) -> Result<(), Status> {
        let result = self.inner.send(message).await;
        if let Err(status) = &result {
            self.span.complete(Some(status));
        }
        result
    }

    async fn recv(&mut self) -> Result<Option<Self::Inbound>, Status> {
        let result = self.inner.recv().await;
        // The client finishing its send side is not terminal here; the
        // handler keeps the call open until it returns.
        if let Err(status) = &result {
            self.span.complete(Some(status));
        }
        result
    }
}
