use std::{error, fmt};

use crate::client::GrpcStatus;

/**
An error encountered configuring or using an exporter.

Errors raised while building a [`crate::MetricsExporter`] are returned to the caller. Errors raised during an export are absorbed by the exporter and only observable through its diagnostics and [`crate::ExportResult`].
*/
pub struct Error {
    kind: ErrorKind,
    msg: String,
    status: Option<GrpcStatus>,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/**
The category of an [`Error`].
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /**
    The configured timeout was zero, negative, or not a number.
    */
    InvalidTimeout,
    /**
    The configured header string was not a valid list of `key=value` pairs.
    */
    InvalidHeaders,
    /**
    The endpoint used a scheme other than `http` or `https`.
    */
    UnsupportedScheme,
    /**
    The endpoint couldn't be parsed, or has no host.
    */
    InvalidEndpoint,
    /**
    The background runtime driving the channel couldn't be started.
    */
    Runtime,
    /**
    The RPC layer failed during a call.
    */
    Transport,
    /**
    A request couldn't be encoded.
    */
    Encode,
}

impl Error {
    pub(crate) fn new(
        kind: ErrorKind,
        msg: impl fmt::Display,
        e: impl error::Error + Send + Sync + 'static,
    ) -> Self {
        Error {
            kind,
            msg: msg.to_string(),
            status: None,
            source: Some(Box::new(e)),
        }
    }

    pub(crate) fn msg(kind: ErrorKind, msg: impl fmt::Display) -> Self {
        Error {
            kind,
            msg: msg.to_string(),
            status: None,
            source: None,
        }
    }

    pub(crate) fn transport(
        msg: impl fmt::Display,
        e: impl error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::new(ErrorKind::Transport, msg, e)
    }

    pub(crate) fn with_status(mut self, status: GrpcStatus) -> Self {
        self.status = Some(status);
        self
    }

    /**
    Create a transport error carrying a gRPC status.

    This is the error [`crate::Client`] implementations should return when the remote collector couldn't be reached or rejected a request.
    */
    pub fn status(status: GrpcStatus, msg: impl fmt::Display) -> Self {
        Error::msg(ErrorKind::Transport, msg).with_status(status)
    }

    /**
    The category of this error.
    */
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /**
    The gRPC status associated with a transport error, if there is one.
    */
    pub fn grpc_status(&self) -> Option<GrpcStatus> {
        self.status
    }

    /**
    Whether this error originated in the RPC layer.
    */
    pub fn is_transport(&self) -> bool {
        self.kind == ErrorKind::Transport
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn error::Error + 'static))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("msg", &self.msg)
            .field("status", &self.status)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)?;

        if let Some(status) = self.status {
            write!(f, " ({status})")?;
        }

        if let Some(ref source) = self.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}
