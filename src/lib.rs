/*!
Export metrics to an OpenTelemetry-compatible collector over gRPC.

This library sends batches of metrics to a collector using the OTLP `MetricsService/Export` call. Exports are synchronous: the caller decides when a batch is sent, and each call blocks until the collector responds or the configured timeout passes.

# Getting started

Add `emit` and `emit_otlp_grpc` to your `Cargo.toml`:

```toml
[dependencies.emit]
version = "0.11"

[dependencies.emit_otlp_grpc]
version = "0.11.0-alpha.2"
```

Build an exporter, then pass it batches of [`MetricRecord`]s:

```no_run
use emit_otlp_grpc::{MetricKind, MetricRecord};

let exporter = emit_otlp_grpc::new()
    .endpoint("http://localhost:4317")
    .timeout_millis(5_000)
    .headers("api-key=1234")
    .resource(("service.name", "my_app"))
    .build()?;

let batch = [
    MetricRecord::new("my_app::http", "requests", MetricKind::counter(), 42usize)
        .with_unit("{request}")
        .with_attributes(("route", "/")),
];

let result = exporter.export(&batch);

exporter.shutdown(5_000);
# let _ = result;
# Ok::<(), emit_otlp_grpc::Error>(())
```

Exporters can also be configured from the standard `OTEL_EXPORTER_OTLP_*` environment variables using [`ExporterOptions::from_env`].

# Resources

Every batch is tagged with a resource describing the process that produced it. The resource is read from a [`ResourceProvider`] once, the first time it's needed. If it doesn't contain a `service.name` then one is added in the form `unknown_service:<executable>`.

# Failures

Configuration problems, like a timeout that isn't positive or a header string that isn't a list of `key=value` pairs, are returned as an [`Error`] from [`MetricsExporterBuilder::build`].

Problems during an export are never returned or propagated as panics. They result in [`ExportResult::Failure`] and are reported through `emit`'s internal runtime. To see them, configure it at the start of your `main` function:

```ignore
fn main() {
    let internal = emit::setup().emit_to(emit_term::stdout()).init_internal();

    // Your app code goes here

    internal.blocking_flush(std::time::Duration::from_secs(5));
}
```

# Self-instrumentation

While an export is in progress the current thread is in a suppression scope. Instrumentation that could observe the exporter should check [`suppress::is_suppressed`] and discard anything produced while it returns `true`. For `emit` runtimes, install [`suppress::filter`] with `emit::setup().emit_when(..)`.

# Troubleshooting

The exporter keeps counters for its own activity, such as connections established and requests sent. They're available through [`MetricsExporter::metrics`], which implements [`emit::metric::Source`].
*/

mod client;
pub mod data;
mod error;
mod exporter;
mod headers;
mod internal_metrics;
mod options;
mod record;
mod request;
pub mod resource;
pub mod suppress;

pub use self::{
    client::{Client, GrpcStatus},
    error::{Error, ErrorKind},
    exporter::{ExportResult, MetricsExporter, MetricsExporterBuilder},
    headers::Metadata,
    internal_metrics::ExporterMetrics,
    options::{ExporterOptions, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_MILLIS},
    record::{MetricKind, MetricRecord, Temporality},
    request::ExportRequest,
    resource::{PropsResource, ResourceProvider},
};

/**
Start a builder for a [`MetricsExporter`].

The exporter defaults to a collector at `http://localhost:4317` with a 10 second timeout and no headers.
*/
pub fn new() -> MetricsExporterBuilder {
    MetricsExporterBuilder::new()
}
