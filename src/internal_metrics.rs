use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

macro_rules! metrics {
    (
        $pub_container:ty {
            $field:ident: $internal_container:ident {
                $(
                    $(#[$meta:meta])*
                    $metric:ident: $ty:ident -> $pub_ty:ident,
                )*
            }
        }
    ) => {
        #[derive(Default)]
        pub(crate) struct $internal_container {
            $(
                $(#[$meta])*
                pub(crate) $metric: $ty,
            )*
        }

        impl $internal_container {
            pub fn sample(&self) -> impl Iterator<Item = emit::Metric<'static, emit::Empty>> + 'static {
                let $internal_container { $($metric),* } = self;

                [$(
                    emit::Metric::new(
                        emit::pkg!(),
                        stringify!($metric),
                        <$ty>::AGG,
                        emit::Empty,
                        $metric.sample(),
                        emit::Empty,
                    ),
                )*]
                .into_iter()
            }
        }

        impl $pub_container {
            $(
                $(#[$meta])*
                pub fn $metric(&self) -> $pub_ty {
                    self.$field.$metric.sample()
                }
            )*
        }
    };
}

#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    const AGG: &'static str = emit::well_known::METRIC_AGG_COUNT;

    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, by: usize) {
        self.0.fetch_add(by, Ordering::Relaxed);
    }

    pub fn sample(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

metrics!(
    ExporterMetrics {
        metrics: InternalMetrics {
            /**
            A record didn't contain a numeric value, so it was discarded.
            */
            metric_discarded: Counter -> usize,
            /**
            A resource attribute couldn't be represented on the wire, so it was dropped.
            */
            resource_attribute_dropped: Counter -> usize,
            /**
            A connection to a remote OTLP receiver was established successfully.
            */
            transport_conn_established: Counter -> usize,
            /**
            A connection to a remote OTLP receiver could not be established.
            */
            transport_conn_failed: Counter -> usize,
            /**
            A TLS handshake with a remote OTLP receiver was made successfully.
            */
            transport_conn_tls_handshake: Counter -> usize,
            /**
            A TLS handshake with a remote OTLP receiver could not be made.
            */
            transport_conn_tls_failed: Counter -> usize,
            /**
            A request was sent successfully.
            */
            transport_request_sent: Counter -> usize,
            /**
            A request could not be sent.
            */
            transport_request_failed: Counter -> usize,
            /**
            The body of a request was compressed using gzip.
            */
            transport_request_compress_gzip: Counter -> usize,
            /**
            A batch was exported and the collector responded with a successful status.
            */
            export_succeeded: Counter -> usize,
            /**
            A batch couldn't be exported because the collector couldn't be reached or responded with a failed status.
            */
            export_failed_transport: Counter -> usize,
            /**
            A batch couldn't be exported because of an unexpected error.
            */
            export_failed_unexpected: Counter -> usize,
            /**
            A request was taken from the pool.
            */
            request_acquired: Counter -> usize,
            /**
            A request was returned to the pool.
            */
            request_released: Counter -> usize,
            /**
            The pool was empty, so a new request was allocated.
            */
            request_allocated: Counter -> usize,
        }
    }
);

/**
Metrics produced by a metrics exporter itself.

This type doesn't include any metrics you export, it includes metrics about the exporter's own activity.

You can enumerate the metrics using the [`emit::metric::Source`] implementation. See [`emit::metric`] for details.
*/
#[derive(Clone)]
pub struct ExporterMetrics {
    pub(crate) metrics: Arc<InternalMetrics>,
}

impl ExporterMetrics {
    /**
    The number of requests currently taken from the pool.
    */
    pub fn request_in_use(&self) -> usize {
        self.request_acquired()
            .saturating_sub(self.request_released())
    }
}

impl emit::metric::Source for ExporterMetrics {
    fn sample_metrics<S: emit::metric::sampler::Sampler>(&self, sampler: S) {
        for metric in self.metrics.sample() {
            sampler.metric(metric);
        }
    }
}
