//! Span lifecycle shared by the unary and streaming interceptors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanKind, Status as SpanStatus, TraceContextExt as _, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_semantic_conventions::attribute::{RPC_METHOD, RPC_SYSTEM};
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use crate::metadata::{MetadataExtractor, MetadataInjector};

/// Start a span around one call and derive its context.
///
/// Server calls extract the parent from the incoming metadata first (an
/// empty map yields a root span); client calls inject the new span's
/// context into the outgoing metadata so the transport transmits it. The
/// returned context must be in effect for the downstream invocation so
/// nested spans and propagation chain correctly.
pub(crate) fn start_span<T, P>(
    cx: &Context,
    tracer: &T,
    propagator: &P,
    method: &str,
    kind: SpanKind,
    metadata: &mut MetadataMap,
) -> Context
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
    P: TextMapPropagator,
{
    let parent = if kind == SpanKind::Server {
        propagator.extract_with_context(cx, &MetadataExtractor(metadata))
    } else {
        cx.clone()
    };
    let is_client = kind == SpanKind::Client;
    let span = tracer
        .span_builder(method.to_owned())
        .with_kind(kind)
        .with_attributes([
            KeyValue::new(RPC_SYSTEM, "grpc"),
            KeyValue::new(RPC_METHOD, method.to_owned()),
        ])
        .start_with_context(tracer, &parent);
    let cx = parent.with_span(span);
    if is_client {
        propagator.inject_context(&cx, &mut MetadataInjector(metadata));
    }
    cx
}

/// End the span in `cx` with the call's outcome.
///
/// No error, or a status whose code is `Ok` (how gRPC transports surface
/// normal termination of a stream), ends the span with status `Ok`. Any
/// other status is recorded on the span and sets status `Error` with the
/// code name as description. Callers are responsible for at-most-once
/// invocation; streams discharge that through [`StreamSpan`].
pub(crate) fn end_span(cx: &Context, error: Option<&Status>) {
    let span = cx.span();
    match error {
        Some(status) if status.code() != Code::Ok => {
            span.record_error(status);
            span.set_status(SpanStatus::error(format!("{:?}", status.code())));
        }
        _ => span.set_status(SpanStatus::Ok),
    }
    span.end();
}

/// Completion handle for a span covering a streaming call.
///
/// Clones share one flag: whichever operation observes a terminal
/// condition first ends the span, every later attempt is a no-op. A
/// stream's send and receive sides may be driven by different tasks, so
/// racing completions are the normal case, not an edge case.
#[derive(Clone)]
pub struct StreamSpan {
    cx: Context,
    completed: Arc<AtomicBool>,
}

impl StreamSpan {
    /// Wrap a span-bearing context in a completion handle.
    pub fn new(cx: Context) -> Self {
        Self {
            cx,
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The span-bearing context derived for this call.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// End the span with the given outcome, at most once.
    ///
    /// The atomic swap is the whole synchronization story: no lock is held
    /// while the tracer runs.
    pub fn complete(&self, error: Option<&Status>) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        end_span(&self.cx, error);
    }
}
