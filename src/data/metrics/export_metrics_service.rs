use sval_derive::Value;

use crate::data::{InstrumentationScope, Resource};

use super::Metric;

#[derive(Value)]
pub struct ExportMetricsServiceRequest<'a> {
    #[sval(label = "resourceMetrics", index = 1)]
    pub resource_metrics: &'a [ResourceMetrics<'a>],
}

#[derive(Value)]
pub struct ResourceMetrics<'a> {
    #[sval(label = "resource", index = 1)]
    pub resource: &'a Resource,
    #[sval(label = "scopeMetrics", index = 2)]
    pub scope_metrics: &'a [ScopeMetrics],
}

#[derive(Value, Debug, Clone, Default)]
pub struct ScopeMetrics {
    #[sval(label = "scope", index = 1)]
    pub scope: InstrumentationScope,
    #[sval(label = "metrics", index = 2)]
    pub metrics: Vec<Metric>,
}
