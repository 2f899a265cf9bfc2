use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use emit_otlp_grpc::{
    resource::SERVICE_NAME, Client, Error, ErrorKind, ExportRequest,
    ExportResult, ExporterOptions, GrpcStatus, Metadata, MetricKind, MetricRecord,
    MetricsExporter, ResourceProvider,
};

#[derive(Default)]
struct Succeeding {
    calls: AtomicUsize,
    metrics: Mutex<Vec<usize>>,
    metadata: Mutex<Vec<Vec<(String, String)>>>,
}

impl Client for Succeeding {
    fn export(
        &self,
        request: &ExportRequest,
        metadata: &Metadata,
        _: Instant,
    ) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.metrics.lock().unwrap().push(request.len());
        self.metadata.lock().unwrap().push(
            metadata
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        );

        Ok(())
    }
}

struct Failing;

impl Client for Failing {
    fn export(&self, _: &ExportRequest, _: &Metadata, _: Instant) -> Result<(), Error> {
        Err(Error::status(GrpcStatus::Unavailable, "connection refused"))
    }
}

struct Panicking;

impl Client for Panicking {
    fn export(&self, _: &ExportRequest, _: &Metadata, _: Instant) -> Result<(), Error> {
        panic!("the client panicked")
    }
}

#[derive(Default)]
struct Deadlines {
    deadlines: Mutex<Vec<Instant>>,
}

impl Client for Deadlines {
    fn export(&self, _: &ExportRequest, _: &Metadata, deadline: Instant) -> Result<(), Error> {
        self.deadlines.lock().unwrap().push(deadline);

        Ok(())
    }
}

struct PanickingResource;

impl ResourceProvider for PanickingResource {
    fn for_each_attribute(&self, _: &mut dyn FnMut(emit::Str<'_>, emit::Value<'_>)) {
        panic!("the resource provider panicked")
    }
}

#[derive(Default, Clone)]
struct Counting {
    visits: Arc<AtomicUsize>,
}

impl ResourceProvider for Counting {
    fn for_each_attribute(&self, for_each: &mut dyn FnMut(emit::Str<'_>, emit::Value<'_>)) {
        self.visits.fetch_add(1, Ordering::Relaxed);

        for_each(emit::Str::new("host.name"), emit::Value::from("a"));
    }

    fn default_service_name(&self) -> String {
        "unknown_service:test".to_owned()
    }
}

fn batch(len: usize) -> Vec<MetricRecord<'static, (&'static str, &'static str)>> {
    (0..len)
        .map(|i| {
            MetricRecord::new("scope", "requests", MetricKind::counter(), i)
                .with_attributes(("route", "/"))
        })
        .collect()
}

#[test]
fn timeout_must_be_positive() {
    for timeout in [0, -1] {
        let err = emit_otlp_grpc::new()
            .timeout_millis(timeout)
            .client(Succeeding::default())
            .build()
            .unwrap_err();

        assert_eq!(ErrorKind::InvalidTimeout, err.kind(), "{timeout}");
    }

    assert!(emit_otlp_grpc::new()
        .timeout_millis(1)
        .client(Succeeding::default())
        .build()
        .is_ok());
}

#[test]
fn unsupported_scheme_fails_before_connecting() {
    let err = emit_otlp_grpc::new()
        .endpoint("ftp://localhost:4317")
        .client(Succeeding::default())
        .build()
        .unwrap_err();

    assert_eq!(ErrorKind::UnsupportedScheme, err.kind());

    let err = MetricsExporter::new(ExporterOptions {
        endpoint: "ftp://localhost:4317".to_owned(),
        ..Default::default()
    })
    .unwrap_err();

    assert_eq!(ErrorKind::UnsupportedScheme, err.kind());
}

#[test]
fn headers_are_parsed_in_order() {
    let client = Arc::new(Succeeding::default());

    let exporter = emit_otlp_grpc::new()
        .headers("a=1, b = 2=x")
        .client(client.clone())
        .build()
        .unwrap();

    assert_eq!(
        vec![("a", "1"), ("b", "2=x")],
        exporter.metadata().iter().collect::<Vec<_>>()
    );

    assert_eq!(ExportResult::Success, exporter.export(&batch(1)));
    assert_eq!(
        vec![vec![
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), "2=x".to_owned())
        ]],
        *client.metadata.lock().unwrap()
    );
}

#[test]
fn malformed_headers_fail() {
    for headers in ["a", "a=1,=2", "a=1,b="] {
        let err = emit_otlp_grpc::new()
            .headers(headers)
            .client(Succeeding::default())
            .build()
            .unwrap_err();

        assert_eq!(ErrorKind::InvalidHeaders, err.kind(), "{headers:?}");
    }
}

#[test]
fn export_succeeds() {
    let client = Arc::new(Succeeding::default());

    let exporter = emit_otlp_grpc::new()
        .resource((SERVICE_NAME, "svc"))
        .client(client.clone())
        .build()
        .unwrap();

    let in_use = exporter.metrics().request_in_use();

    assert_eq!(ExportResult::Success, exporter.export(&batch(3)));

    assert_eq!(in_use, exporter.metrics().request_in_use());
    assert_eq!(vec![3], *client.metrics.lock().unwrap());
    assert_eq!(
        Some("svc"),
        exporter
            .resource()
            .get(SERVICE_NAME)
            .and_then(|v| v.to_text())
            .as_deref()
    );
}

#[test]
fn export_failure_never_escapes() {
    let exporter = emit_otlp_grpc::new().client(Failing).build().unwrap();

    for len in [0, 1, 3] {
        assert_eq!(ExportResult::Failure, exporter.export(&batch(len)), "{len}");
    }

    assert_eq!(3, exporter.metrics().export_failed_transport());
    assert_eq!(0, exporter.metrics().request_in_use());
}

#[test]
fn export_panic_never_escapes() {
    let exporter = emit_otlp_grpc::new().client(Panicking).build().unwrap();

    assert_eq!(ExportResult::Failure, exporter.export(&batch(1)));
    assert_eq!(1, exporter.metrics().export_failed_unexpected());
    assert_eq!(0, exporter.metrics().request_in_use());
    assert!(!emit_otlp_grpc::suppress::is_suppressed());

    // The exporter is still usable afterwards
    assert_eq!(ExportResult::Failure, exporter.export(&batch(1)));
}

#[test]
fn resource_panic_never_escapes() {
    let client = Arc::new(Succeeding::default());

    let exporter = emit_otlp_grpc::new()
        .resource_provider(PanickingResource)
        .client(client.clone())
        .build()
        .unwrap();

    assert_eq!(ExportResult::Failure, exporter.export(&batch(1)));
    assert_eq!(1, exporter.metrics().export_failed_unexpected());
    assert_eq!(0, client.calls.load(Ordering::Relaxed));
    assert!(!emit_otlp_grpc::suppress::is_suppressed());

    assert_eq!(ExportResult::Failure, exporter.export(&batch(1)));
    assert_eq!(2, exporter.metrics().export_failed_unexpected());
}

#[test]
fn deadline_is_now_plus_timeout() {
    let client = Arc::new(Deadlines::default());

    let exporter = emit_otlp_grpc::new()
        .timeout_millis(500)
        .client(client.clone())
        .build()
        .unwrap();

    let timeout = Duration::from_millis(500);

    let before = Instant::now();
    assert_eq!(ExportResult::Success, exporter.export(&batch(1)));
    let after = Instant::now();

    let deadlines = client.deadlines.lock().unwrap();
    assert_eq!(1, deadlines.len());

    let deadline = deadlines[0];
    assert!(before + timeout <= deadline, "{:?}", deadline - before);
    assert!(deadline <= after + timeout, "{:?}", (after + timeout) - deadline);
}

#[test]
fn resource_is_translated_once() {
    let provider = Counting::default();

    let exporter = emit_otlp_grpc::new()
        .resource_provider(provider.clone())
        .client(Succeeding::default())
        .build()
        .unwrap();

    assert_eq!(ExportResult::Success, exporter.export(&batch(1)));
    assert_eq!(ExportResult::Success, exporter.export(&batch(1)));

    let first = exporter.resource();
    let second = exporter.resource();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(1, provider.visits.load(Ordering::Relaxed));
}

#[test]
fn missing_service_name_uses_default() {
    let exporter = emit_otlp_grpc::new()
        .resource_provider(Counting::default())
        .client(Succeeding::default())
        .build()
        .unwrap();

    let resource = exporter.resource();

    assert_eq!(
        1,
        resource
            .attributes
            .iter()
            .filter(|kv| kv.key == SERVICE_NAME)
            .count()
    );
    assert_eq!(
        Some("unknown_service:test"),
        resource.get(SERVICE_NAME).and_then(|v| v.to_text()).as_deref()
    );
}

#[test]
fn shutdown_with_custom_client() {
    let client = Arc::new(Succeeding::default());

    let exporter = emit_otlp_grpc::new()
        .client(client.clone())
        .build()
        .unwrap();

    assert!(exporter.shutdown(1));

    assert_eq!(ExportResult::Failure, exporter.export(&batch(1)));
    assert_eq!(0, client.calls.load(Ordering::Relaxed));
}

#[test]
fn concurrent_exports() {
    let client = Arc::new(Succeeding::default());

    let exporter = Arc::new(
        emit_otlp_grpc::new()
            .client(client.clone())
            .build()
            .unwrap(),
    );

    let handles = (0..4)
        .map(|_| {
            let exporter = exporter.clone();

            std::thread::spawn(move || {
                for _ in 0..10 {
                    assert_eq!(ExportResult::Success, exporter.export(&batch(2)));
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(40, client.calls.load(Ordering::Relaxed));
    assert_eq!(0, exporter.metrics().request_in_use());
    assert!(exporter.metrics().request_allocated() <= 4);
}
