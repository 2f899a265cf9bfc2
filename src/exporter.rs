use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use crate::{
    client::{Client, Endpoint, GrpcChannel, GrpcStatus, Transport},
    data::Resource,
    headers::Metadata,
    internal_metrics::{ExporterMetrics, InternalMetrics},
    options::ExporterOptions,
    record::MetricRecord,
    request::RequestPool,
    resource::{self, PropsResource, ResourceProvider},
    suppress, Error, ErrorKind,
};

/**
The outcome of a call to [`MetricsExporter::export`].
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    /**
    The collector accepted the batch.
    */
    Success,
    /**
    The batch couldn't be exported.

    The reason is reported through the exporter's diagnostics.
    */
    Failure,
}

impl ExportResult {
    /**
    Whether the collector accepted the batch.
    */
    pub fn is_success(self) -> bool {
        self == ExportResult::Success
    }
}

/**
A builder for a [`MetricsExporter`].

Use [`crate::new`] to start a builder.
*/
#[must_use = "call `.build()` to construct the exporter"]
pub struct MetricsExporterBuilder {
    options: ExporterOptions,
    provider: Option<Box<dyn ResourceProvider>>,
    resource: Option<Resource>,
    client: Option<Box<dyn Client>>,
    compression: bool,
}

impl MetricsExporterBuilder {
    pub(crate) fn new() -> Self {
        MetricsExporterBuilder {
            options: ExporterOptions::default(),
            provider: None,
            resource: None,
            client: None,
            compression: false,
        }
    }

    /**
    Replace all options.
    */
    pub fn options(mut self, options: ExporterOptions) -> Self {
        self.options = options;
        self
    }

    /**
    Set the URI of the collector.

    The default is `http://localhost:4317`.
    */
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.options.endpoint = endpoint.into();
        self
    }

    /**
    Set the time allowed for each export call, in milliseconds.

    The default is 10 seconds.
    */
    pub fn timeout_millis(mut self, timeout_millis: i64) -> Self {
        self.options.timeout_millis = timeout_millis;
        self
    }

    /**
    Set the headers to send with each call, as a comma-separated list of `key=value` pairs.
    */
    pub fn headers(mut self, headers: impl Into<String>) -> Self {
        self.options.headers = Some(headers.into());
        self
    }

    /**
    Describe the process producing metrics with a fixed set of properties.

    The properties are translated into a resource the first time the exporter sends a batch.
    */
    pub fn resource(self, props: impl emit::Props + Send + Sync + 'static) -> Self {
        self.resource_provider(PropsResource(props))
    }

    /**
    Describe the process producing metrics with a custom provider.
    */
    pub fn resource_provider(mut self, provider: impl ResourceProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /**
    Use a specific resource, bypassing any provider.
    */
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /**
    Replace the gRPC channel with a custom transport.

    The endpoint is still validated, but no connection is ever made to it.
    */
    pub fn client(mut self, client: impl Client + 'static) -> Self {
        self.client = Some(Box::new(client));
        self
    }

    /**
    Whether to compress request messages with gzip.

    This requires the `gzip` Cargo feature, and is ignored without it.
    */
    pub fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /**
    Validate the configuration and build an exporter.

    This doesn't perform any network activity. A connection is established by the first export.
    */
    pub fn build(self) -> Result<MetricsExporter, Error> {
        let timeout = self.options.timeout()?;
        let metadata = self.options.metadata()?;
        let endpoint = Endpoint::parse(&self.options.endpoint)?;

        let metrics = Arc::new(InternalMetrics::default());

        let transport = match self.client {
            Some(client) => Transport::Custom(client),
            None => Transport::Grpc(GrpcChannel::new(
                endpoint,
                &metadata,
                self.compression,
                metrics.clone(),
            )?),
        };

        let resource = OnceLock::new();
        if let Some(initial) = self.resource {
            let _ = resource.set(Arc::new(initial));
        }

        Ok(MetricsExporter {
            options: self.options,
            timeout,
            metadata,
            transport,
            provider: self
                .provider
                .unwrap_or_else(|| Box::new(PropsResource(emit::empty::Empty))),
            resource,
            pool: RequestPool::new(metrics.clone()),
            metrics,
            shut_down: AtomicBool::new(false),
        })
    }
}

/**
An exporter that sends batches of metrics to an OpenTelemetry-compatible collector over gRPC.

Exports are synchronous. Each call blocks until the collector responds or the configured timeout passes. An exporter can be shared between threads and called concurrently.
*/
pub struct MetricsExporter {
    options: ExporterOptions,
    timeout: Duration,
    metadata: Metadata,
    transport: Transport,
    provider: Box<dyn ResourceProvider>,
    resource: OnceLock<Arc<Resource>>,
    pool: RequestPool,
    metrics: Arc<InternalMetrics>,
    shut_down: AtomicBool,
}

impl MetricsExporter {
    /**
    Start a builder for an exporter.
    */
    pub fn builder() -> MetricsExporterBuilder {
        MetricsExporterBuilder::new()
    }

    /**
    Build an exporter from a set of options, with the default resource.
    */
    pub fn new(options: ExporterOptions) -> Result<Self, Error> {
        Self::builder().options(options).build()
    }

    /**
    Export a batch of metrics.

    This method never panics or returns errors. Any failure is reported through [`emit::runtime::internal`] and results in [`ExportResult::Failure`]. Batches aren't retried.
    */
    pub fn export<P: emit::Props>(&self, batch: &[MetricRecord<P>]) -> ExportResult {
        if self.shut_down.load(Ordering::Acquire) {
            self.metrics.export_failed_unexpected.increment();

            emit::warn!(
                rt: emit::runtime::internal(),
                "attempt to export {batch_size} metrics after the exporter was shut down",
                batch_size: batch.len(),
            );

            return ExportResult::Failure;
        }

        let _suppress = suppress::enter();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let resource = self.resource();

            let mut request = self.pool.acquire();
            request.populate(resource, batch, &self.metrics);

            let deadline = Instant::now() + self.timeout;

            self.transport.export(&request, &self.metadata, deadline)
        }))
        .unwrap_or_else(|panic| Err(panic_error(panic)));

        match outcome {
            Ok(()) => {
                self.metrics.export_succeeded.increment();

                emit::debug!(
                    rt: emit::runtime::internal(),
                    "exported {batch_size} metrics",
                    batch_size: batch.len(),
                );

                ExportResult::Success
            }
            Err(err) if err.is_transport() => {
                self.metrics.export_failed_transport.increment();

                let status = err.grpc_status().unwrap_or(GrpcStatus::Unknown);

                emit::warn!(
                    rt: emit::runtime::internal(),
                    "failed to reach collector: {status} {err}",
                    #[emit::as_display]
                    status,
                    err,
                );

                ExportResult::Failure
            }
            Err(err) => {
                self.metrics.export_failed_unexpected.increment();

                emit::warn!(
                    rt: emit::runtime::internal(),
                    "export method exception: {err}",
                    err,
                );

                ExportResult::Failure
            }
        }
    }

    /**
    The resource attached to every batch.

    The resource is translated from the exporter's provider once, the first time it's needed, and the same value is returned from then on.
    */
    pub fn resource(&self) -> Arc<Resource> {
        self.resource
            .get_or_init(|| {
                let resource = resource::translate(&self.provider);

                self.metrics
                    .resource_attribute_dropped
                    .increment_by(resource.dropped_attributes_count as usize);

                Arc::new(resource)
            })
            .clone()
    }

    /**
    Set the resource attached to every batch.

    This only succeeds if the resource hasn't already been set or translated, returning `false` otherwise.
    */
    pub fn set_resource(&self, resource: Resource) -> bool {
        self.resource.set(Arc::new(resource)).is_ok()
    }

    /**
    The options the exporter was built with.
    */
    pub fn options(&self) -> &ExporterOptions {
        &self.options
    }

    /**
    The metadata sent with every call.
    */
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /**
    Get an [`ExporterMetrics`] for the exporter's own activity.
    */
    pub fn metrics(&self) -> ExporterMetrics {
        ExporterMetrics {
            metrics: self.metrics.clone(),
        }
    }

    /**
    Close the connection to the collector, waiting up to `timeout_millis` for it to close gracefully.

    Returns `true` if the connection closed within the timeout. In-flight exports aren't cancelled, and any exports made afterwards fail.
    */
    pub fn shutdown(&self, timeout_millis: u64) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return true;
        }

        let _suppress = suppress::enter();

        let closed = self
            .transport
            .shutdown(Duration::from_millis(timeout_millis));

        if !closed {
            emit::warn!(
                rt: emit::runtime::internal(),
                "the connection to the collector didn't close within {timeout_millis}ms",
                timeout_millis,
            );
        }

        closed
    }
}

impl fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("options", &self.options)
            .field("metadata", &self.metadata)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> Error {
    let msg = panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(|msg| &**msg))
        .unwrap_or("unknown panic");

    Error::msg(ErrorKind::Encode, format_args!("the export panicked: {msg}"))
}
