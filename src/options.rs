use std::time::Duration;

use crate::{headers::Metadata, Error, ErrorKind};

/**
The default endpoint of an OTLP/gRPC collector.
*/
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4317";

/**
The default time allowed for each export call.
*/
pub const DEFAULT_TIMEOUT_MILLIS: i64 = 10_000;

const ENV_METRICS_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT";
const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_METRICS_HEADERS: &str = "OTEL_EXPORTER_OTLP_METRICS_HEADERS";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const ENV_METRICS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_METRICS_TIMEOUT";
const ENV_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";

/**
The configuration of a [`crate::MetricsExporter`].

Options are checked when the exporter is built, and can't be changed afterwards.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterOptions {
    /**
    The URI of the collector, like `http://localhost:4317`.

    Only `http` and `https` schemes are supported.
    */
    pub endpoint: String,
    /**
    The time allowed for each export call, in milliseconds.

    Must be greater than zero.
    */
    pub timeout_millis: i64,
    /**
    A comma-separated list of `key=value` pairs to send with each call, like `api-key=123,tenant=a`.
    */
    pub headers: Option<String>,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        ExporterOptions {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            timeout_millis: DEFAULT_TIMEOUT_MILLIS,
            headers: None,
        }
    }
}

impl ExporterOptions {
    /**
    Read options from the standard OpenTelemetry environment variables.

    The metrics-specific variables, like `OTEL_EXPORTER_OTLP_METRICS_ENDPOINT`, take precedence over their general counterparts, like `OTEL_EXPORTER_OTLP_ENDPOINT`. Anything that isn't set uses its default.
    */
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let get = |specific: &str, general: &str| {
            lookup(specific)
                .or_else(|| lookup(general))
                .filter(|value| !value.trim().is_empty())
        };

        let mut options = ExporterOptions::default();

        if let Some(endpoint) = get(ENV_METRICS_ENDPOINT, ENV_ENDPOINT) {
            options.endpoint = endpoint.trim().to_owned();
        }

        if let Some(timeout) = get(ENV_METRICS_TIMEOUT, ENV_TIMEOUT) {
            options.timeout_millis = timeout.trim().parse().map_err(|e| {
                Error::new(
                    ErrorKind::InvalidTimeout,
                    format_args!("the timeout {timeout:?} is not a number of milliseconds"),
                    e,
                )
            })?;
        }

        options.headers = get(ENV_METRICS_HEADERS, ENV_HEADERS);

        Ok(options)
    }

    /**
    Check the configured timeout, returning it as a duration.
    */
    pub fn timeout(&self) -> Result<Duration, Error> {
        if self.timeout_millis <= 0 {
            return Err(Error::msg(
                ErrorKind::InvalidTimeout,
                format_args!(
                    "the timeout must be greater than zero, but was {}ms",
                    self.timeout_millis
                ),
            ));
        }

        Ok(Duration::from_millis(self.timeout_millis as u64))
    }

    /**
    Parse the configured headers into metadata.
    */
    pub fn metadata(&self) -> Result<Metadata, Error> {
        match self.headers {
            Some(ref headers) => Metadata::parse(headers),
            None => Ok(Metadata::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ExporterOptions, Error> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();

        ExporterOptions::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let options = from_vars(&[]).unwrap();

        assert_eq!(ExporterOptions::default(), options);
        assert_eq!(Duration::from_secs(10), options.timeout().unwrap());
        assert!(options.metadata().unwrap().is_empty());
    }

    #[test]
    fn env_specific_wins() {
        let options = from_vars(&[
            (ENV_ENDPOINT, "http://general:4317"),
            (ENV_METRICS_ENDPOINT, "http://metrics:4317"),
            (ENV_HEADERS, "a=1"),
            (ENV_TIMEOUT, "500"),
        ])
        .unwrap();

        assert_eq!("http://metrics:4317", options.endpoint);
        assert_eq!(Some("a=1"), options.headers.as_deref());
        assert_eq!(500, options.timeout_millis);
    }

    #[test]
    fn env_invalid_timeout() {
        let err = from_vars(&[(ENV_TIMEOUT, "soon")]).unwrap_err();

        assert_eq!(ErrorKind::InvalidTimeout, err.kind());
    }

    #[test]
    fn timeout_must_be_positive() {
        for timeout_millis in [0, -1, i64::MIN] {
            let options = ExporterOptions {
                timeout_millis,
                ..Default::default()
            };

            assert_eq!(ErrorKind::InvalidTimeout, options.timeout().unwrap_err().kind());
        }

        let options = ExporterOptions {
            timeout_millis: 1,
            ..Default::default()
        };

        assert_eq!(Duration::from_millis(1), options.timeout().unwrap());
    }
}
