/*!
The transport that carries export requests to a collector.
*/

use std::{
    fmt,
    time::{Duration, Instant},
};

use hyper::Uri;

use crate::{headers::Metadata, request::ExportRequest, Error, ErrorKind};

mod grpc;

pub(crate) use self::grpc::GrpcChannel;

/**
A transport for export requests.

The exporter uses a gRPC channel by default. A `Client` can be supplied through [`crate::MetricsExporterBuilder::client`] to replace it entirely, such as with a test double.
*/
pub trait Client: Send + Sync {
    /**
    Send a request, blocking until it completes or until `deadline` passes.

    Failures that originate in the transport should be returned as errors with [`crate::ErrorKind::Transport`], constructed using [`Error::status`].
    */
    fn export(
        &self,
        request: &ExportRequest,
        metadata: &Metadata,
        deadline: Instant,
    ) -> Result<(), Error>;
}

impl<'a, C: Client + ?Sized> Client for &'a C {
    fn export(
        &self,
        request: &ExportRequest,
        metadata: &Metadata,
        deadline: Instant,
    ) -> Result<(), Error> {
        (**self).export(request, metadata, deadline)
    }
}

impl<C: Client + ?Sized> Client for Box<C> {
    fn export(
        &self,
        request: &ExportRequest,
        metadata: &Metadata,
        deadline: Instant,
    ) -> Result<(), Error> {
        (**self).export(request, metadata, deadline)
    }
}

impl<C: Client + ?Sized> Client for std::sync::Arc<C> {
    fn export(
        &self,
        request: &ExportRequest,
        metadata: &Metadata,
        deadline: Instant,
    ) -> Result<(), Error> {
        (**self).export(request, metadata, deadline)
    }
}

pub(crate) enum Transport {
    Grpc(GrpcChannel),
    Custom(Box<dyn Client>),
}

impl Transport {
    pub fn export(
        &self,
        request: &ExportRequest,
        metadata: &Metadata,
        deadline: Instant,
    ) -> Result<(), Error> {
        match self {
            // The channel's metadata is converted into headers once when it's built
            Transport::Grpc(channel) => channel.export(request.encode(), deadline),
            Transport::Custom(client) => client.export(request, metadata, deadline),
        }
    }

    pub fn shutdown(&self, timeout: Duration) -> bool {
        match self {
            Transport::Grpc(channel) => channel.shutdown(timeout),
            Transport::Custom(_) => true,
        }
    }
}

/**
A validated collector endpoint.
*/
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    uri: Uri,
    https: bool,
}

impl Endpoint {
    /**
    Parse an endpoint, checking its scheme.

    This doesn't perform any network activity.
    */
    pub fn parse(endpoint: &str) -> Result<Self, Error> {
        let endpoint = endpoint.trim();

        // The scheme is checked before the rest of the endpoint is parsed
        let scheme = endpoint
            .split_once("://")
            .or_else(|| endpoint.split_once(':'))
            .map(|(scheme, _)| scheme);

        let https = match scheme {
            Some(scheme) if scheme.eq_ignore_ascii_case("http") => false,
            Some(scheme) if scheme.eq_ignore_ascii_case("https") => true,
            Some(scheme) => {
                return Err(Error::msg(
                    ErrorKind::UnsupportedScheme,
                    format_args!(
                        "endpoint scheme {scheme:?} is unsupported; only http and https are supported"
                    ),
                ))
            }
            None => {
                return Err(Error::msg(
                    ErrorKind::UnsupportedScheme,
                    format_args!("endpoint {endpoint:?} must start with http:// or https://"),
                ))
            }
        };

        let uri: Uri = endpoint.parse().map_err(|e| {
            Error::new(
                ErrorKind::InvalidEndpoint,
                format_args!("failed to parse endpoint {endpoint:?}"),
                e,
            )
        })?;

        #[cfg(not(feature = "tls"))]
        {
            if https {
                return Err(Error::msg(
                    ErrorKind::UnsupportedScheme,
                    "https support requires the `tls` Cargo feature",
                ));
            }
        }

        if uri.host().map(|host| host.is_empty()).unwrap_or(true) {
            return Err(Error::msg(
                ErrorKind::InvalidEndpoint,
                format_args!("endpoint {endpoint:?} doesn't have a host"),
            ));
        }

        Ok(Endpoint { uri, https })
    }

    pub fn is_https(&self) -> bool {
        self.https
    }

    /**
    The host, without any brackets around IPv6 addresses.
    */
    pub fn host(&self) -> &str {
        self.uri
            .host()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
    }

    pub fn port(&self) -> u16 {
        self.uri
            .port_u16()
            .unwrap_or(if self.https { 443 } else { 80 })
    }

    /**
    The URI of a method on the collector.
    */
    pub fn method_uri(&self, path: &str) -> Result<Uri, Error> {
        let mut parts = self.uri.clone().into_parts();
        parts.path_and_query = Some(path.parse().map_err(|e| {
            Error::new(
                ErrorKind::InvalidEndpoint,
                format_args!("failed to parse path {path:?}"),
                e,
            )
        })?);

        Uri::from_parts(parts).map_err(|e| {
            Error::new(
                ErrorKind::InvalidEndpoint,
                format_args!("failed to build a request URI from {}", self.uri),
                e,
            )
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.uri, f)
    }
}

/**
A gRPC status code.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GrpcStatus {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl GrpcStatus {
    /**
    Get the status for a numeric code.

    Codes outside the known range map to [`GrpcStatus::Unknown`].
    */
    pub fn from_code(code: i32) -> Self {
        use GrpcStatus::*;

        match code {
            0 => Ok,
            1 => Cancelled,
            2 => Unknown,
            3 => InvalidArgument,
            4 => DeadlineExceeded,
            5 => NotFound,
            6 => AlreadyExists,
            7 => PermissionDenied,
            8 => ResourceExhausted,
            9 => FailedPrecondition,
            10 => Aborted,
            11 => OutOfRange,
            12 => Unimplemented,
            13 => Internal,
            14 => Unavailable,
            15 => DataLoss,
            16 => Unauthenticated,
            _ => Unknown,
        }
    }

    /**
    Get the status implied by a non-200 HTTP response.
    */
    pub fn from_http(status: u16) -> Self {
        match status {
            400 => GrpcStatus::Internal,
            401 => GrpcStatus::Unauthenticated,
            403 => GrpcStatus::PermissionDenied,
            404 => GrpcStatus::Unimplemented,
            429 | 502 | 503 | 504 => GrpcStatus::Unavailable,
            _ => GrpcStatus::Unknown,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    fn as_str(self) -> &'static str {
        use GrpcStatus::*;

        match self {
            Ok => "OK",
            Cancelled => "CANCELLED",
            Unknown => "UNKNOWN",
            InvalidArgument => "INVALID_ARGUMENT",
            DeadlineExceeded => "DEADLINE_EXCEEDED",
            NotFound => "NOT_FOUND",
            AlreadyExists => "ALREADY_EXISTS",
            PermissionDenied => "PERMISSION_DENIED",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            FailedPrecondition => "FAILED_PRECONDITION",
            Aborted => "ABORTED",
            OutOfRange => "OUT_OF_RANGE",
            Unimplemented => "UNIMPLEMENTED",
            Internal => "INTERNAL",
            Unavailable => "UNAVAILABLE",
            DataLoss => "DATA_LOSS",
            Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for GrpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
