use std::time::SystemTime;

use emit::well_known::{METRIC_AGG_COUNT, METRIC_AGG_SUM};

/**
A single metric measurement to export.

Records are produced by an external batching stage and passed to [`crate::MetricsExporter::export`] in slices. The exporter only reads them.
*/
#[derive(Debug, Clone)]
pub struct MetricRecord<'a, P = emit::empty::Empty> {
    scope: &'a str,
    name: &'a str,
    description: &'a str,
    unit: &'a str,
    kind: MetricKind,
    start: Option<SystemTime>,
    end: SystemTime,
    value: emit::Value<'a>,
    attributes: P,
}

/**
How the value of a [`MetricRecord`] should be interpreted.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /**
    A sampled value. A sequence of values produces one point per value.
    */
    Gauge,
    /**
    An aggregated value. A sequence of values is summed into a single point.
    */
    Sum {
        monotonic: bool,
        temporality: Temporality,
    },
}

/**
Whether a [`MetricKind::Sum`] covers only its own time range or everything since its start.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporality {
    Delta,
    Cumulative,
}

impl MetricKind {
    /**
    A monotonic, cumulative sum.
    */
    pub const fn counter() -> Self {
        MetricKind::Sum {
            monotonic: true,
            temporality: Temporality::Cumulative,
        }
    }

    /**
    Get the kind of metric for a well-known `emit` aggregation, like `count` or `sum`.

    Sums produced from an aggregation are cumulative. Any unrecognized aggregation is treated as a gauge.
    */
    pub fn from_agg(agg: &str) -> Self {
        match agg {
            METRIC_AGG_COUNT => MetricKind::counter(),
            METRIC_AGG_SUM => MetricKind::Sum {
                monotonic: false,
                temporality: Temporality::Cumulative,
            },
            _ => MetricKind::Gauge,
        }
    }
}

impl<'a> MetricRecord<'a> {
    /**
    Create a new record with the given name, kind, and value recorded at the current time.
    */
    pub fn new(
        scope: &'a str,
        name: &'a str,
        kind: MetricKind,
        value: impl Into<emit::Value<'a>>,
    ) -> Self {
        MetricRecord {
            scope,
            name,
            description: "",
            unit: "",
            kind,
            start: None,
            end: SystemTime::now(),
            value: value.into(),
            attributes: emit::empty::Empty,
        }
    }
}

impl<'a, P> MetricRecord<'a, P> {
    pub fn with_description(mut self, description: &'a str) -> Self {
        self.description = description;
        self
    }

    pub fn with_unit(mut self, unit: &'a str) -> Self {
        self.unit = unit;
        self
    }

    /**
    Set the time range the value covers.
    */
    pub fn with_range(mut self, start: SystemTime, end: SystemTime) -> Self {
        self.start = Some(start);
        self.end = end;
        self
    }

    /**
    Set the point in time the value was observed at.
    */
    pub fn with_time(mut self, time: SystemTime) -> Self {
        self.start = None;
        self.end = time;
        self
    }

    /**
    Set the attributes attached to the data points of this record.
    */
    pub fn with_attributes<U: emit::Props>(self, attributes: U) -> MetricRecord<'a, U> {
        MetricRecord {
            scope: self.scope,
            name: self.name,
            description: self.description,
            unit: self.unit,
            kind: self.kind,
            start: self.start,
            end: self.end,
            value: self.value,
            attributes,
        }
    }

    pub fn scope(&self) -> &'a str {
        self.scope
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn description(&self) -> &'a str {
        self.description
    }

    pub fn unit(&self) -> &'a str {
        self.unit
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn start(&self) -> Option<SystemTime> {
        self.start
    }

    pub fn end(&self) -> SystemTime {
        self.end
    }

    pub fn value(&self) -> &emit::Value<'a> {
        &self.value
    }

    pub fn attributes(&self) -> &P {
        &self.attributes
    }
}
