use std::{fmt, str::FromStr};

use crate::{Error, ErrorKind};

/**
An ordered set of `key=value` pairs attached to every export call as gRPC metadata.
*/
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    /**
    An empty set of metadata.
    */
    pub fn new() -> Self {
        Metadata(Vec::new())
    }

    /**
    Parse metadata from a comma-separated list of `key=value` pairs, like `api-key=123,tenant=a`.

    Each pair is split on its first `=`, so values may contain `=` themselves. Keys and values are trimmed of whitespace and must not be empty. An empty input produces empty metadata.
    */
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.trim().is_empty() {
            return Ok(Metadata::new());
        }

        let mut pairs = Vec::new();

        for pair in raw.split(',') {
            let Some((k, v)) = pair.split_once('=') else {
                return Err(invalid_format());
            };

            let (k, v) = (k.trim(), v.trim());

            if k.is_empty() || v.is_empty() {
                return Err(invalid_format());
            }

            pairs.push((k.to_owned(), v.to_owned()));
        }

        Ok(Metadata(pairs))
    }

    /**
    Append a pair to the metadata.
    */
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /**
    Iterate over the pairs in the order they were parsed.
    */
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (&**k, &**v))
    }

    /**
    Get the first value associated with `key`.
    */
    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn invalid_format() -> Error {
    Error::msg(ErrorKind::InvalidHeaders, "headers provided in invalid format")
}

impl FromStr for Metadata {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metadata::parse(s)
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Metadata(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
