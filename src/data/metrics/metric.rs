use sval_derive::Value;

use crate::data::{AnyValue, KeyValue};

#[derive(Value, Debug, Clone)]
pub struct Metric {
    #[sval(label = "name", index = 1)]
    pub name: String,
    #[sval(label = "description", index = 2)]
    pub description: String,
    #[sval(label = "unit", index = 3)]
    pub unit: String,
    #[sval(flatten)]
    pub data: MetricData,
}

#[derive(Value, Debug, Clone)]
pub enum MetricData {
    #[sval(label = "gauge", index = 5)]
    Gauge(Gauge),
    #[sval(label = "sum", index = 7)]
    Sum(Sum),
}

#[derive(Value, Debug, Clone)]
pub struct Gauge {
    #[sval(label = "dataPoints", index = 1)]
    pub data_points: Vec<NumberDataPoint>,
}

#[derive(Value, Debug, Clone)]
pub struct Sum {
    #[sval(label = "dataPoints", index = 1)]
    pub data_points: Vec<NumberDataPoint>,
    #[sval(label = "aggregationTemporality", index = 2)]
    pub aggregation_temporality: AggregationTemporality,
    #[sval(label = "isMonotonic", index = 3)]
    pub is_monotonic: bool,
}

#[derive(Value, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
#[sval(unlabeled_variants)]
pub enum AggregationTemporality {
    Unspecified = 0,
    Delta = 1,
    Cumulative = 2,
}

#[derive(Value, Debug, Clone)]
pub struct NumberDataPoint {
    #[sval(label = "attributes", index = 7)]
    pub attributes: Vec<KeyValue<String, AnyValue>>,
    #[sval(
        label = "startTimeUnixNano",
        index = 2,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub start_time_unix_nano: u64,
    #[sval(
        label = "timeUnixNano",
        index = 3,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub time_unix_nano: u64,
    #[sval(flatten)]
    pub value: NumberDataPointValue,
}

#[derive(Value, Debug, Clone, Copy, PartialEq)]
pub enum NumberDataPointValue {
    #[sval(label = "value", index = 4)]
    AsDouble(AsDouble),
    #[sval(label = "value", index = 6)]
    AsInt(AsInt),
}

#[derive(Value, Debug, Clone, Copy, PartialEq)]
pub struct AsDouble(pub f64);

#[derive(Value, Debug, Clone, Copy, PartialEq, Eq)]
#[sval(tag = "sval_protobuf::tags::PROTOBUF_I64")]
pub struct AsInt(pub i64);
