//! Process-global usage counters and the recent-request ring.
//!
//! This is the global plane of the usage recorder; the per-payer plane lives
//! in each shard. Counters are updated off the response path and lost
//! updates are acceptable. The ring is mutex-guarded and capped small.

use axum::extract::Request;
use axum::response::Response;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::trace_id::TraceId;
use crate::util::now_secs;

const RECENT_RING_CAPACITY: usize = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRequest {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub request_id: String,
    pub at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub started_at: i64,
    pub requests_total: u64,
    pub payments_total: u64,
    pub requests_by_category: HashMap<String, u64>,
    pub revenue_by_token: HashMap<String, String>,
    pub recent: Vec<RecentRequest>,
}

#[derive(Default)]
pub struct GlobalMetrics {
    started_at: i64,
    requests_total: AtomicU64,
    payments_total: AtomicU64,
    by_category: Mutex<HashMap<&'static str, u64>>,
    revenue_by_token: Mutex<HashMap<&'static str, u128>>,
    recent: Mutex<VecDeque<RecentRequest>>,
}

impl GlobalMetrics {
    pub fn new() -> Self {
        Self {
            started_at: now_secs(),
            ..Default::default()
        }
    }

    pub fn record_http(&self, method: &str, path: &str, status: u16, request_id: &str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        if recent.len() >= RECENT_RING_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(RecentRequest {
            method: method.to_string(),
            path: path.to_string(),
            status,
            request_id: request_id.to_string(),
            at: now_secs(),
        });
    }

    pub fn record_payment(&self, category: &'static str, token: &'static str, amount: u128) {
        self.payments_total.fetch_add(1, Ordering::Relaxed);
        {
            let mut by_category = self.by_category.lock().unwrap_or_else(|p| p.into_inner());
            *by_category.entry(category).or_insert(0) += 1;
        }
        {
            let mut revenue = self
                .revenue_by_token
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            let entry = revenue.entry(token).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let by_category = self
            .by_category
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let revenue_by_token = self
            .revenue_by_token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let recent = self
            .recent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        MetricsSnapshot {
            started_at: self.started_at,
            requests_total: self.requests_total.load(Ordering::Relaxed),
            payments_total: self.payments_total.load(Ordering::Relaxed),
            requests_by_category: by_category,
            revenue_by_token,
            recent,
        }
    }
}

/// Tower layer recording every request into the global plane after its
/// response is produced.
#[derive(Clone)]
pub struct MetricsLayer {
    metrics: std::sync::Arc<GlobalMetrics>,
}

impl MetricsLayer {
    pub fn new(metrics: std::sync::Arc<GlobalMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            metrics: self.metrics.clone(),
            inner,
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    metrics: std::sync::Arc<GlobalMetrics>,
    inner: S,
}

impl<S> Service<Request> for MetricsService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let metrics = self.metrics.clone();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let request_id = req
            .extensions()
            .get::<TraceId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        let future = self.inner.call(req);
        Box::pin(async move {
            let response = future.await?;
            metrics.record_http(&method, &path, response.status().as_u16(), &request_id);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_capped() {
        let metrics = GlobalMetrics::new();
        for i in 0..60 {
            metrics.record_http("GET", &format!("/x/{i}"), 200, "rid");
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.recent.len(), RECENT_RING_CAPACITY);
        assert_eq!(snapshot.requests_total, 60);
        assert_eq!(snapshot.recent.first().unwrap().path, "/x/10");
    }

    #[test]
    fn payments_aggregate_by_category_and_token() {
        let metrics = GlobalMetrics::new();
        metrics.record_payment("hashing", "Native", 1000);
        metrics.record_payment("hashing", "Native", 1000);
        metrics.record_payment("inference", "BridgedUSD", 2500);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.payments_total, 3);
        assert_eq!(snapshot.requests_by_category["hashing"], 2);
        assert_eq!(snapshot.revenue_by_token["Native"], "2000");
        assert_eq!(snapshot.revenue_by_token["BridgedUSD"], "2500");
    }
}
