mod export_metrics_service;
mod metric;

use std::time::{SystemTime, UNIX_EPOCH};

pub use self::{export_metrics_service::*, metric::*};

use crate::{
    data::{attributes_from_props, AnyValue, KeyValue},
    record::{MetricKind, MetricRecord, Temporality},
};

/**
Convert a record into a wire metric.

Returns `None` if the record's value doesn't contain any numbers.
*/
pub(crate) fn metric_from_record<P: emit::Props>(record: &MetricRecord<P>) -> Option<Metric> {
    let time_unix_nano = unix_nanos(record.end());
    let start_time_unix_nano = record.start().map(unix_nanos).unwrap_or(time_unix_nano);

    let (attributes, _) = attributes_from_props(record.attributes());

    let data = match record.kind() {
        MetricKind::Gauge => MetricData::Gauge(Gauge {
            data_points: RawPointSet::new(&attributes).points_from_value(
                start_time_unix_nano,
                time_unix_nano,
                record.value(),
            )?,
        }),
        MetricKind::Sum {
            monotonic,
            temporality,
        } => MetricData::Sum(Sum {
            data_points: SumPoints::new(&attributes)
                .points_from_value(start_time_unix_nano, time_unix_nano, record.value())?
                .into(),
            aggregation_temporality: match temporality {
                Temporality::Delta => AggregationTemporality::Delta,
                Temporality::Cumulative => AggregationTemporality::Cumulative,
            },
            is_monotonic: monotonic,
        }),
    };

    Some(Metric {
        name: record.name().to_owned(),
        description: record.description().to_owned(),
        unit: record.unit().to_owned(),
        data,
    })
}

fn unix_nanos(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

trait DataPointBuilder {
    type Points;

    fn points_from_value(
        self,
        start_time_unix_nano: u64,
        time_unix_nano: u64,
        value: &impl sval::Value,
    ) -> Option<Self::Points>
    where
        Self: Sized,
    {
        struct Extract<A> {
            in_seq: bool,
            aggregator: A,
        }

        impl<'sval, A: DataPointBuilder> sval::Stream<'sval> for Extract<A> {
            fn null(&mut self) -> sval::Result {
                sval::error()
            }

            fn bool(&mut self, _: bool) -> sval::Result {
                sval::error()
            }

            fn text_begin(&mut self, _: Option<usize>) -> sval::Result {
                sval::error()
            }

            fn text_fragment_computed(&mut self, _: &str) -> sval::Result {
                sval::error()
            }

            fn text_end(&mut self) -> sval::Result {
                sval::error()
            }

            fn i64(&mut self, value: i64) -> sval::Result {
                self.aggregator.push_point_i64(value);

                Ok(())
            }

            fn u64(&mut self, value: u64) -> sval::Result {
                match i64::try_from(value) {
                    Ok(value) => self.aggregator.push_point_i64(value),
                    Err(_) => self.aggregator.push_point_f64(value as f64),
                }

                Ok(())
            }

            fn f64(&mut self, value: f64) -> sval::Result {
                self.aggregator.push_point_f64(value);

                Ok(())
            }

            fn seq_begin(&mut self, _: Option<usize>) -> sval::Result {
                if self.in_seq {
                    return sval::error();
                }

                self.in_seq = true;

                Ok(())
            }

            fn seq_value_begin(&mut self) -> sval::Result {
                Ok(())
            }

            fn seq_value_end(&mut self) -> sval::Result {
                Ok(())
            }

            fn seq_end(&mut self) -> sval::Result {
                self.in_seq = false;

                Ok(())
            }
        }

        let mut extract = Extract {
            in_seq: false,
            aggregator: self,
        };
        value.stream(&mut extract).ok()?;

        extract
            .aggregator
            .into_points(start_time_unix_nano, time_unix_nano)
    }

    fn push_point_i64(&mut self, value: i64);
    fn push_point_f64(&mut self, value: f64);

    fn into_points(self, start_time_unix_nano: u64, time_unix_nano: u64) -> Option<Self::Points>;
}

struct SumPoints<'a> {
    attributes: &'a [KeyValue<String, AnyValue>],
    value: Option<NumberDataPointValue>,
}

impl<'a> SumPoints<'a> {
    fn new(attributes: &'a [KeyValue<String, AnyValue>]) -> Self {
        SumPoints {
            attributes,
            value: None,
        }
    }
}

impl<'a> DataPointBuilder for SumPoints<'a> {
    type Points = [NumberDataPoint; 1];

    fn push_point_i64(&mut self, value: i64) {
        self.value = Some(match self.value {
            None => NumberDataPointValue::AsInt(AsInt(value)),
            Some(NumberDataPointValue::AsInt(AsInt(current))) => current
                .checked_add(value)
                .map(|value| NumberDataPointValue::AsInt(AsInt(value)))
                .unwrap_or(NumberDataPointValue::AsDouble(AsDouble(f64::INFINITY))),
            Some(NumberDataPointValue::AsDouble(AsDouble(current))) => {
                NumberDataPointValue::AsDouble(AsDouble(current + value as f64))
            }
        });
    }

    fn push_point_f64(&mut self, value: f64) {
        self.value = Some(match self.value {
            None => NumberDataPointValue::AsDouble(AsDouble(value)),
            Some(NumberDataPointValue::AsInt(AsInt(current))) => {
                NumberDataPointValue::AsDouble(AsDouble(value + current as f64))
            }
            Some(NumberDataPointValue::AsDouble(AsDouble(current))) => {
                NumberDataPointValue::AsDouble(AsDouble(current + value))
            }
        });
    }

    fn into_points(self, start_time_unix_nano: u64, time_unix_nano: u64) -> Option<Self::Points> {
        Some([NumberDataPoint {
            attributes: self.attributes.to_vec(),
            start_time_unix_nano,
            time_unix_nano,
            value: self.value?,
        }])
    }
}

struct RawPointSet<'a> {
    attributes: &'a [KeyValue<String, AnyValue>],
    points: Vec<NumberDataPointValue>,
}

impl<'a> RawPointSet<'a> {
    fn new(attributes: &'a [KeyValue<String, AnyValue>]) -> Self {
        RawPointSet {
            attributes,
            points: Vec::new(),
        }
    }
}

impl<'a> DataPointBuilder for RawPointSet<'a> {
    type Points = Vec<NumberDataPoint>;

    fn push_point_i64(&mut self, value: i64) {
        self.points.push(NumberDataPointValue::AsInt(AsInt(value)));
    }

    fn push_point_f64(&mut self, value: f64) {
        self.points
            .push(NumberDataPointValue::AsDouble(AsDouble(value)));
    }

    fn into_points(self, start_time_unix_nano: u64, time_unix_nano: u64) -> Option<Self::Points> {
        let attributes = self.attributes;

        let point = |start_time_unix_nano, time_unix_nano, value| NumberDataPoint {
            attributes: attributes.to_vec(),
            start_time_unix_nano,
            time_unix_nano,
            value,
        };

        match self.points.len() as u64 {
            0 => None,
            1 => Some(vec![point(
                start_time_unix_nano,
                time_unix_nano,
                self.points[0],
            )]),
            points => {
                let point_time_range = time_unix_nano.saturating_sub(start_time_unix_nano);
                let step = point_time_range / points;

                let mut point_time = start_time_unix_nano;
                let mut data_points = Vec::with_capacity(self.points.len());
                for value in self.points {
                    let start = point_time;
                    point_time += step;

                    data_points.push(point(start, point_time, value));
                }

                Some(data_points)
            }
        }
    }
}
