/*!
Stile is a set of cross-cutting interceptors for gRPC services built on
[tonic]. A stile lets you cross a fence without opening it: these wrappers
carry trace context, log records, and status codes across the process
boundary without the application code being aware of them.

It provides:
 * distributed tracing with OpenTelemetry context propagation
   ([`trace`]): client and server, unary and streaming, with
   exactly-once span completion for streams
 * structured call logging (via [`log`] and the `tracing` crate)
 * application-error-to-status mapping at the server boundary ([`status`])
 * telemetry bootstrap (OTLP exporters, global propagator, `tracing`
   subscriber) in one call ([`telemetry`])

### Tutorial

1. Initialize telemetry once, early in `main`, and keep the guard alive:

```rust,no_run
# fn main() -> Result<(), stile::telemetry::Error> {
let settings = stile::telemetry::TelemetrySettings {
    trace: stile::telemetry::TraceSettings {
        endpoint: Some("http://localhost:4317".to_owned()),
    },
    log: stile::telemetry::LogSettings {
        console_level: "info".to_owned(),
        otel_level: "warn".to_owned(),
        endpoint: None,
    },
    metric: stile::telemetry::MetricSettings::default(),
};
let _telemetry = stile::telemetry::init("my-service", &settings)?;
# Ok(())
# }
```

The settings derive `serde::Deserialize`, so they drop into whatever
configuration layer the host application already uses.

2. Wrap server handlers. The interceptor extracts the caller's trace
context from the request metadata, runs the handler under a server span,
and reports the handler's own response and error unchanged:

```rust,no_run
use stile::trace::ServerInterceptor;
use tonic::{Request, Response, Status};

# async fn example(request: Request<String>) -> Result<Response<String>, Status> {
let tracing = ServerInterceptor::new();
tracing
    .unary("/echo.Echo/Ping", request, |cx, request| async move {
        // `cx` carries the server span; hand it to nested calls.
        let _ = cx;
        Ok(Response::new(request.into_inner()))
    })
    .await
# }
```

3. Wrap client invocations the same way; the interceptor injects the
span's context into the outgoing metadata before the call leaves the
process:

```rust,no_run
use stile::trace::ClientInterceptor;
use tonic::{Request, Response, Status};

# async fn example() -> Result<(), Status> {
let tracing = ClientInterceptor::new();
let response: Response<String> = tracing
    .unary("/echo.Echo/Ping", Request::new("ping".to_owned()), |_cx, request| async move {
        Ok(Response::new(request.into_inner()))
    })
    .await?;
# Ok(())
# }
```

Streaming calls go through [`trace::ClientInterceptor::open_stream`] and
[`trace::ServerInterceptor::stream`], which return decorated streams that
close the span exactly once: on the first failing operation, on end of
stream, or when the call winds down normally.

Interceptors compose in whatever order the caller chains their closures;
each one is transparent to the layers inside and outside it.

[tonic]: https://docs.rs/tonic/latest/tonic/
*/
#![deny(
    future_incompatible,
    deprecated_safe,
    rust_2018_compatibility,
    rust_2018_idioms,
    rust_2021_compatibility
)]
// Document ALL THE THINGS!
#![deny(missing_docs)]

pub mod log;
pub mod metadata;
pub mod status;
pub mod telemetry;
pub mod trace;
