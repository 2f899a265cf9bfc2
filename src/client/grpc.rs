use std::{
    future::{poll_fn, Future},
    io::Cursor,
    pin::Pin,
    sync::{mpsc, Arc, Mutex, MutexGuard},
    task::{Context, Poll},
    time::{Duration, Instant},
};

use bytes::Buf;
use hyper::{
    body::{self, Body, Frame, SizeHint},
    client::conn::http2,
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, Request, Response, StatusCode, Uri, Version,
};

use crate::{
    client::{Endpoint, GrpcStatus},
    data::{EncodedCursor, EncodedPayload},
    headers::Metadata,
    internal_metrics::InternalMetrics,
    suppress, Error, ErrorKind,
};

const EXPORT_PATH: &str = "/opentelemetry.proto.collector.metrics.v1.MetricsService/Export";

const USER_AGENT: &str = concat!("emit_otlp_grpc/", env!("CARGO_PKG_VERSION"));

/**
A long-lived gRPC channel to a collector.

The channel owns a small background runtime that drives its HTTP/2 connection. The connection is made on first use, and made again after any failure.
*/
pub(crate) struct GrpcChannel {
    rt: Option<tokio::runtime::Runtime>,
    handle: tokio::runtime::Handle,
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Endpoint,
    uri: Uri,
    headers: HeaderMap,
    compression: bool,
    metrics: Arc<InternalMetrics>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    sender: Option<http2::SendRequest<GrpcBody>>,
    driver: Option<tokio::task::JoinHandle<()>>,
    closed: bool,
}

impl GrpcChannel {
    pub fn new(
        endpoint: Endpoint,
        metadata: &Metadata,
        compression: bool,
        metrics: Arc<InternalMetrics>,
    ) -> Result<Self, Error> {
        let uri = endpoint.method_uri(EXPORT_PATH)?;
        let headers = metadata_headers(metadata)?;

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("emit_otlp_grpc")
            .enable_all()
            .build()
            .map_err(|e| Error::new(ErrorKind::Runtime, "failed to start the channel runtime", e))?;

        let handle = rt.handle().clone();

        Ok(GrpcChannel {
            rt: Some(rt),
            handle,
            inner: Arc::new(Inner {
                endpoint,
                uri,
                headers,
                compression,
                metrics,
                state: Mutex::new(State::default()),
            }),
        })
    }

    /**
    Make a unary export call, blocking until it completes or `deadline` passes.
    */
    pub fn export(&self, payload: EncodedPayload, deadline: Instant) -> Result<(), Error> {
        let timeout = deadline.saturating_duration_since(Instant::now());

        if timeout.is_zero() {
            return Err(deadline_exceeded());
        }

        let (tx, rx) = mpsc::sync_channel(1);

        let inner = self.inner.clone();
        self.handle.spawn(suppress::suppressed(async move {
            let res = tokio::time::timeout_at(
                tokio::time::Instant::from_std(deadline),
                inner.send(payload, timeout),
            )
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded()));

            let _ = tx.send(res);
        }));

        // The call is raced against its deadline on the runtime, this just guards against
        // the runtime being unable to make progress at all
        rx.recv_timeout(timeout + Duration::from_millis(100))
            .unwrap_or_else(|_| Err(deadline_exceeded()))
    }

    /**
    Close the channel, waiting up to `timeout` for its connection to finish.

    Calls that are in flight are allowed to complete. Returns `true` if the connection closed in time, or if no connection was ever made.
    */
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let (sender, driver) = {
            let mut state = self.inner.state();

            state.closed = true;

            (state.sender.take(), state.driver.take())
        };

        // Dropping the last sender starts a graceful close of the connection
        drop(sender);

        let Some(driver) = driver else {
            return true;
        };

        let (tx, rx) = mpsc::sync_channel(1);

        self.handle.spawn(async move {
            let _ = driver.await;
            let _ = tx.send(());
        });

        rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for GrpcChannel {
    fn drop(&mut self) {
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
    }
}

fn deadline_exceeded() -> Error {
    Error::status(
        GrpcStatus::DeadlineExceeded,
        "the export call didn't complete before its deadline",
    )
}

fn metadata_headers(metadata: &Metadata) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();

    for (k, v) in metadata.iter() {
        let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| {
            Error::new(
                ErrorKind::InvalidHeaders,
                format_args!("{k:?} is not a valid header name"),
                e,
            )
        })?;

        let value = HeaderValue::from_str(v).map_err(|e| {
            Error::new(
                ErrorKind::InvalidHeaders,
                format_args!("the value of {k:?} is not a valid header value"),
                e,
            )
        })?;

        headers.append(name, value);
    }

    Ok(headers)
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn send(&self, payload: EncodedPayload, timeout: Duration) -> Result<(), Error> {
        let mut sender = self.sender().await?;

        sender.ready().await.map_err(|e| {
            self.metrics.transport_request_failed.increment();
            self.reset();

            Error::transport("the connection to the collector was closed", e)
                .with_status(GrpcStatus::Unavailable)
        })?;

        let req = self.request(payload, timeout)?;

        let res = sender.send_request(req).await.map_err(|e| {
            self.metrics.transport_request_failed.increment();
            self.reset();

            Error::transport("failed to send gRPC request", e).with_status(GrpcStatus::Unavailable)
        })?;

        self.metrics.transport_request_sent.increment();

        read_response(res).await
    }

    async fn sender(&self) -> Result<http2::SendRequest<GrpcBody>, Error> {
        {
            let state = self.state();

            if state.closed {
                return Err(Error::msg(ErrorKind::Transport, "the channel has been shut down")
                    .with_status(GrpcStatus::Unavailable));
            }

            if let Some(ref sender) = state.sender {
                if !sender.is_closed() {
                    return Ok(sender.clone());
                }
            }
        }

        let (sender, driver) = connect(&self.metrics, &self.endpoint).await?;

        let mut state = self.state();

        if state.closed {
            driver.abort();

            return Err(Error::msg(ErrorKind::Transport, "the channel has been shut down")
                .with_status(GrpcStatus::Unavailable));
        }

        state.sender = Some(sender.clone());
        state.driver = Some(driver);

        Ok(sender)
    }

    fn reset(&self) {
        let mut state = self.state();

        state.sender = None;
        state.driver = None;
    }

    fn request(&self, payload: EncodedPayload, timeout: Duration) -> Result<Request<GrpcBody>, Error> {
        let body = {
            #[cfg(feature = "gzip")]
            {
                if self.compression {
                    self.metrics.transport_request_compress_gzip.increment();

                    GrpcBody::gzip(payload)?
                } else {
                    GrpcBody::framed(payload)
                }
            }
            #[cfg(not(feature = "gzip"))]
            {
                let _ = self.compression;

                GrpcBody::framed(payload)
            }
        };

        let mut req = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .version(Version::HTTP_2)
            .header("content-type", "application/grpc")
            .header("te", "trailers")
            .header("grpc-timeout", grpc_timeout(timeout))
            .header("user-agent", USER_AGENT);

        if body.compressed {
            req = req.header("grpc-encoding", "gzip");
        }

        let mut req = req.body(body).map_err(|e| {
            self.metrics.transport_request_failed.increment();

            Error::new(ErrorKind::Encode, "failed to build gRPC request", e)
        })?;

        let headers = req.headers_mut();
        for (k, v) in &self.headers {
            headers.append(k.clone(), v.clone());
        }

        Ok(req)
    }
}

async fn connect(
    metrics: &InternalMetrics,
    endpoint: &Endpoint,
) -> Result<(http2::SendRequest<GrpcBody>, tokio::task::JoinHandle<()>), Error> {
    let io = tokio::net::TcpStream::connect((endpoint.host(), endpoint.port()))
        .await
        .map_err(|e| {
            metrics.transport_conn_failed.increment();

            Error::transport(format_args!("failed to connect to {endpoint}"), e)
                .with_status(GrpcStatus::Unavailable)
        })?;

    let _ = io.set_nodelay(true);

    metrics.transport_conn_established.increment();

    if endpoint.is_https() {
        #[cfg(feature = "tls")]
        {
            let io = tls_handshake(metrics, io, endpoint).await?;

            http2_handshake(metrics, io).await
        }
        #[cfg(not(feature = "tls"))]
        {
            return Err(Error::msg(
                ErrorKind::UnsupportedScheme,
                "https support requires the `tls` Cargo feature",
            ));
        }
    } else {
        http2_handshake(metrics, io).await
    }
}

#[cfg(feature = "tls")]
async fn tls_handshake(
    metrics: &InternalMetrics,
    io: tokio::net::TcpStream,
    endpoint: &Endpoint,
) -> Result<tokio_rustls::client::TlsStream<tokio::net::TcpStream>, Error> {
    use tokio_rustls::{rustls, TlsConnector};

    let domain = endpoint.host().to_owned().try_into().map_err(|e| {
        metrics.transport_conn_tls_failed.increment();

        Error::transport(format_args!("could not extract a DNS name from {endpoint}"), e)
    })?;

    let tls = {
        let mut root_store = rustls::RootCertStore::empty();

        for cert in rustls_native_certs::load_native_certs().map_err(|e| {
            metrics.transport_conn_tls_failed.increment();

            Error::transport("failed to load native certificates", e)
        })? {
            let _ = root_store.add(cert);
        }

        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        config.alpn_protocols = vec![b"h2".to_vec()];

        Arc::new(config)
    };

    let conn = TlsConnector::from(tls);

    let io = conn.connect(domain, io).await.map_err(|e| {
        metrics.transport_conn_tls_failed.increment();

        Error::transport("failed to connect TLS stream", e).with_status(GrpcStatus::Unavailable)
    })?;

    metrics.transport_conn_tls_handshake.increment();

    Ok(io)
}

async fn http2_handshake(
    metrics: &InternalMetrics,
    io: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
) -> Result<(http2::SendRequest<GrpcBody>, tokio::task::JoinHandle<()>), Error> {
    let (sender, conn) = http2::handshake(TokioAmbientExecutor, HttpIo(io))
        .await
        .map_err(|e| {
            metrics.transport_conn_failed.increment();

            Error::transport("failed to perform HTTP2 handshake", e)
                .with_status(GrpcStatus::Unavailable)
        })?;

    let driver = tokio::task::spawn(async move {
        let _ = conn.await;
    });

    Ok((sender, driver))
}

/**
Format a `grpc-timeout` header.

The value is at most 8 digits, so longer timeouts use a coarser unit.
*/
fn grpc_timeout(timeout: Duration) -> String {
    const MAX: u128 = 99_999_999;

    let millis = timeout.as_millis().max(1);

    if millis <= MAX {
        format!("{millis}m")
    } else if timeout.as_secs() as u128 <= MAX {
        format!("{}S", timeout.as_secs())
    } else {
        format!("{}H", (timeout.as_secs() / 3600).min(MAX as u64))
    }
}

async fn read_response(res: Response<body::Incoming>) -> Result<(), Error> {
    let (parts, mut body) = res.into_parts();

    if parts.status != StatusCode::OK {
        return Err(Error::status(
            GrpcStatus::from_http(parts.status.as_u16()),
            format_args!("the collector responded with HTTP {}", parts.status),
        ));
    }

    // A trailers-only response carries its status in the headers
    if let Some(res) = grpc_status(&parts.headers) {
        return res;
    }

    let mut trailers = None;

    while let Some(frame) = poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
        let frame = frame.map_err(|e| {
            Error::transport("failed to read gRPC response", e).with_status(GrpcStatus::Unavailable)
        })?;

        if let Ok(frame_trailers) = frame.into_trailers() {
            trailers = Some(frame_trailers);
        }
    }

    trailers
        .as_ref()
        .and_then(grpc_status)
        .unwrap_or_else(|| {
            Err(Error::status(
                GrpcStatus::Unknown,
                "the collector response didn't include a grpc-status",
            ))
        })
}

fn grpc_status(headers: &HeaderMap) -> Option<Result<(), Error>> {
    let status = headers.get("grpc-status")?;

    let status = status
        .to_str()
        .ok()
        .and_then(|status| status.parse::<i32>().ok())
        .map(GrpcStatus::from_code)
        .unwrap_or(GrpcStatus::Unknown);

    if status == GrpcStatus::Ok {
        return Some(Ok(()));
    }

    let message = headers
        .get("grpc-message")
        .and_then(|message| message.to_str().ok())
        .unwrap_or("the collector rejected the request");

    Some(Err(Error::status(status, message)))
}

pub(crate) struct GrpcBody {
    compressed: bool,
    header: Option<Cursor<[u8; 5]>>,
    payload: Option<GrpcBodyPayload>,
}

enum GrpcBodyPayload {
    Encoded(EncodedCursor),
    #[cfg(feature = "gzip")]
    Gzip(Cursor<Box<[u8]>>),
}

pub(crate) enum GrpcBodyData {
    Header(Cursor<[u8; 5]>),
    Payload(EncodedCursor),
    #[cfg(feature = "gzip")]
    Gzip(Cursor<Box<[u8]>>),
}

fn frame_header(compressed: bool, len: usize) -> Cursor<[u8; 5]> {
    let len = (len as u32).to_be_bytes();

    Cursor::new([compressed as u8, len[0], len[1], len[2], len[3]])
}

impl GrpcBody {
    fn framed(payload: EncodedPayload) -> Self {
        GrpcBody {
            compressed: false,
            header: Some(frame_header(false, payload.len())),
            payload: Some(GrpcBodyPayload::Encoded(payload.into_cursor())),
        }
    }

    #[cfg(feature = "gzip")]
    fn gzip(payload: EncodedPayload) -> Result<Self, Error> {
        use std::io::Write as _;

        let mut enc = flate2::write::GzEncoder::new(
            Vec::with_capacity(payload.len()),
            flate2::Compression::fast(),
        );

        let mut payload = payload.into_cursor();
        loop {
            let chunk = payload.chunk();
            if chunk.is_empty() {
                break;
            }

            enc.write_all(chunk).map_err(|e| {
                Error::new(ErrorKind::Encode, "failed to compress a chunk of bytes", e)
            })?;

            let len = chunk.len();
            payload.advance(len);
        }

        let buf = enc
            .finish()
            .map_err(|e| Error::new(ErrorKind::Encode, "failed to finalize compression", e))?;

        Ok(GrpcBody {
            compressed: true,
            header: Some(frame_header(true, buf.len())),
            payload: Some(GrpcBodyPayload::Gzip(Cursor::new(buf.into_boxed_slice()))),
        })
    }

    fn remaining(&self) -> usize {
        self.header
            .as_ref()
            .map(|header| header.remaining())
            .unwrap_or(0)
            + self
                .payload
                .as_ref()
                .map(|payload| match payload {
                    GrpcBodyPayload::Encoded(buf) => buf.remaining(),
                    #[cfg(feature = "gzip")]
                    GrpcBodyPayload::Gzip(buf) => buf.remaining(),
                })
                .unwrap_or(0)
    }

    fn next_chunk(&mut self) -> Option<GrpcBodyData> {
        self.header
            .take()
            .map(GrpcBodyData::Header)
            .or_else(|| {
                self.payload.take().map(|payload| match payload {
                    GrpcBodyPayload::Encoded(buf) => GrpcBodyData::Payload(buf),
                    #[cfg(feature = "gzip")]
                    GrpcBodyPayload::Gzip(buf) => GrpcBodyData::Gzip(buf),
                })
            })
    }
}

impl Buf for GrpcBodyData {
    fn remaining(&self) -> usize {
        match self {
            GrpcBodyData::Header(buf) => buf.remaining(),
            GrpcBodyData::Payload(buf) => buf.remaining(),
            #[cfg(feature = "gzip")]
            GrpcBodyData::Gzip(buf) => buf.remaining(),
        }
    }

    fn chunk(&self) -> &[u8] {
        match self {
            GrpcBodyData::Header(buf) => buf.chunk(),
            GrpcBodyData::Payload(buf) => buf.chunk(),
            #[cfg(feature = "gzip")]
            GrpcBodyData::Gzip(buf) => buf.chunk(),
        }
    }

    fn advance(&mut self, cnt: usize) {
        match self {
            GrpcBodyData::Header(buf) => buf.advance(cnt),
            GrpcBodyData::Payload(buf) => buf.advance(cnt),
            #[cfg(feature = "gzip")]
            GrpcBodyData::Gzip(buf) => buf.advance(cnt),
        }
    }
}

impl Body for GrpcBody {
    type Data = GrpcBodyData;

    type Error = std::convert::Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.get_mut().next_chunk().map(|buf| Ok(Frame::data(buf))))
    }

    fn is_end_stream(&self) -> bool {
        self.header.is_none() && self.payload.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining() as u64)
    }
}

pub(crate) struct HttpIo<T>(pub T);

impl<T: tokio::io::AsyncRead> hyper::rt::Read for HttpIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        // SAFETY: `io` does not uninitialize any bytes
        let mut read_buf = tokio::io::ReadBuf::uninit(unsafe { buf.as_mut() });

        match tokio::io::AsyncRead::poll_read(io, cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let read = read_buf.filled().len();

                // SAFETY: The bytes being advanced have been initialized by `read_buf`
                unsafe { buf.advance(read) };

                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: tokio::io::AsyncWrite> hyper::rt::Write for HttpIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_write(io, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_flush(io, cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_shutdown(io, cx)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct TokioAmbientExecutor;

impl<F: Future + Send + 'static> hyper::rt::Executor<F> for TokioAmbientExecutor
where
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::spawn(fut);
    }
}
