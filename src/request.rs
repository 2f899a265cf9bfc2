use std::{
    mem,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use crate::{
    data::{
        metrics::{metric_from_record, ExportMetricsServiceRequest, ResourceMetrics, ScopeMetrics},
        EncodedPayload, InstrumentationScope, Resource,
    },
    internal_metrics::InternalMetrics,
    record::MetricRecord,
};

/**
A request to export a batch of metrics.

Requests are pooled by their exporter and reused across calls. A request is always reset before it's returned to its pool.
*/
#[derive(Debug, Default)]
pub struct ExportRequest {
    resource: Option<Arc<Resource>>,
    scope_metrics: Vec<ScopeMetrics>,
}

impl ExportRequest {
    /**
    The resource the batch was produced by.
    */
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_deref()
    }

    /**
    The metrics in the batch, grouped into consecutive runs of the same scope.
    */
    pub fn scope_metrics(&self) -> &[ScopeMetrics] {
        &self.scope_metrics
    }

    /**
    The total number of metrics in the batch.
    */
    pub fn len(&self) -> usize {
        self.scope_metrics.iter().map(|scope| scope.metrics.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn populate<P: emit::Props>(
        &mut self,
        resource: Arc<Resource>,
        batch: &[MetricRecord<P>],
        metrics: &InternalMetrics,
    ) {
        self.resource = Some(resource);

        for record in batch {
            let Some(metric) = metric_from_record(record) else {
                metrics.metric_discarded.increment();
                continue;
            };

            match self.scope_metrics.last_mut() {
                Some(scope) if scope.scope.name == record.scope() => scope.metrics.push(metric),
                _ => self.scope_metrics.push(ScopeMetrics {
                    scope: InstrumentationScope {
                        name: record.scope().to_owned(),
                        version: String::new(),
                    },
                    metrics: vec![metric],
                }),
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.resource = None;
        self.scope_metrics.clear();
    }

    pub(crate) fn encode(&self) -> EncodedPayload {
        let empty = Resource::default();

        EncodedPayload::encode(ExportMetricsServiceRequest {
            resource_metrics: &[ResourceMetrics {
                resource: self.resource.as_deref().unwrap_or(&empty),
                scope_metrics: &self.scope_metrics,
            }],
        })
    }
}

/**
A free list of requests.
*/
pub(crate) struct RequestPool {
    free: Mutex<Vec<ExportRequest>>,
    metrics: Arc<InternalMetrics>,
}

impl RequestPool {
    pub fn new(metrics: Arc<InternalMetrics>) -> Self {
        RequestPool {
            free: Mutex::new(Vec::new()),
            metrics,
        }
    }

    /**
    Take a request from the pool, allocating a new one if it's empty.
    */
    pub fn acquire(&self) -> PooledRequest<'_> {
        let request = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| {
                self.metrics.request_allocated.increment();

                ExportRequest::default()
            });

        self.metrics.request_acquired.increment();

        PooledRequest {
            pool: self,
            request,
        }
    }

    fn release(&self, mut request: ExportRequest) {
        request.reset();

        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        self.metrics.request_released.increment();
    }

    #[cfg(test)]
    fn free(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

/**
A request taken from a [`RequestPool`].

The request is reset and returned to the pool when this guard is dropped, including while unwinding.
*/
pub(crate) struct PooledRequest<'a> {
    pool: &'a RequestPool,
    request: ExportRequest,
}

impl<'a> Deref for PooledRequest<'a> {
    type Target = ExportRequest;

    fn deref(&self) -> &ExportRequest {
        &self.request
    }
}

impl<'a> DerefMut for PooledRequest<'a> {
    fn deref_mut(&mut self) -> &mut ExportRequest {
        &mut self.request
    }
}

impl<'a> Drop for PooledRequest<'a> {
    fn drop(&mut self) {
        self.pool.release(mem::take(&mut self.request));
    }
}
