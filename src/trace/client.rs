//! Client-side tracing interceptors.

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

/// Client-side operations of an established bidirectional stream.
///
/// This is the transport contract the interceptor consumes.
/// [`TracedClientStream`] decorates any implementation without changing
/// its semantics.
#[async_trait]
pub trait ClientStream: Send {
    /// Message type written to the stream.
    type Outbound: Send + 'static;
    /// Message type read from the stream.
    type Inbound: Send + 'static;

    /// Wait for the server's initial metadata.
    async fn header(&mut self) -> Result<MetadataMap, Status>;

    /// Write one message.
    async fn send(&mut self, message: Self::Outbound) -> Result<(), Status>;

    /// Read the next message; `Ok(None)` is the end of the stream.
    async fn recv(&mut self) -> Result<Option<Self::Inbound>, Status>;

    /// Close the send side of the stream.
    async fn close_send(&mut self) -> Result<(), Status>;
}

/// Tracing interceptor for client-side calls.
#[derive(Clone)]
pub struct ClientInterceptor<T = BoxedTracer, P = TraceContextPropagator> {
    options: TraceOptions<T, P>,
}

impl ClientInterceptor {
    /// Interceptor with [`TraceOptions::default`].
    pub fn new() -> Self {
        Self {
            options: TraceOptions::default(),
        }
    }
}

impl Default for ClientInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P> ClientInterceptor<T, P>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
    P: TextMapPropagator,
{
    /// Interceptor from explicit options.
    pub fn with_options(options: TraceOptions<T, P>) -> Self {
        Self { options }
    }

    /// Wrap one unary invocation in a client span.
    ///
    /// Trace context is injected into the request metadata before `invoke`
    /// runs, and the span ends with the call's outcome. The response and
    /// the error pass through unchanged.
    pub async fn unary<Req, Res, F, Fut>(
        &self,
        method: &str,
        mut request: Request<Req>,
        invoke: F,
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
            SpanKind::Client,
            request.metadata_mut(),
        );
        let cx = self.options.transform(cx);
        let result = invoke(cx.clone(), request).await;
        end_span(&cx, result.as_ref().err());
        result
    }

    /// Establish a stream under a client span and decorate it.
    ///
    /// Trace context is injected into `metadata` before `establish` runs.
    /// If establishment fails the span ends with that error and the
    /// failure propagates; no decorated stream exists. On success the
    /// returned stream completes the span exactly once: on the first
    /// failing operation, on end of stream, or on [`ClientStream::close_send`].
    pub async fn open_stream<S, F, Fut>(
        &self,
        method: &str,
        mut metadata: MetadataMap,
        establish: F,
    ) -> Result<TracedClientStream<S>, Status>
    where
        S: ClientStream,
        F: FnOnce(Context, MetadataMap) -> Fut,
        Fut: Future<Output = Result<S, Status>>,
    {
        let cx = start_span(
            &Context::current(),
            &self.options.tracer,
            &self.options.propagator,
            method,
            SpanKind::Client,
            &mut metadata,
        );
        let cx = self.options.transform(cx);
        match establish(cx.clone(), metadata).await {
            Ok(inner) => Ok(TracedClientStream {
                inner,
                span: StreamSpan::new(cx),
            }),
            Err(status) => {
                end_span(&cx, Some(&status));
                Err(status)
            }
        }
    }
}

/// Decorated client stream that completes its span exactly once.
///
/// Every operation forwards to the inner stream; the ones that can observe
/// a terminal condition funnel it into the shared completion handle.
pub struct TracedClientStream<S> {
    inner: S,
    span: StreamSpan,
}

impl<S> TracedClientStream<S> {
    /// The span-bearing context this stream's operations run under.
    pub fn context(&self) -> &Context {
        self.span.context()
    }

    /// The completion handle shared with this stream.
    pub fn completion(&self) -> &StreamSpan {
        &self.span
    }
}

#[async_trait]
impl<S> ClientStream for TracedClientStream<S>
where
    S: ClientStream,
{
    type Outbound = S::Outbound;
    type Inbound = S::Inbound;

    async fn header(&mut self) -> Result<MetadataMap, Status> {
        let result = self.inner.header().await;
        if let Err(status) = &result {
            self.span.complete(Some(status));
        }
        result
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
        match &result {
            Err(status) => self.span.complete(Some(status)),
            // End of stream observed by read-driven consumption: a normal
            // termination, recorded as Ok.
            Ok(None) => self.span.complete(None),
            Ok(Some(_)) => {}
        }
        result
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        let result = self.inner.close_send().await;
        self.span.complete(result.as_ref().err());
        result
    }
}
