//! Prometheus collectors for the hub, exposed on `GET /metrics`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, TextEncoder,
};
use std::rc::Rc;
use std::time::{Duration, Instant};

const NAMESPACE: &str = "notify_hub";

/// Path label for requests that matched no route.
const UNMATCHED_PATH: &str = "unmatched";

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    prometheus::default_registry()
        .register(Box::new(collector.clone()))
        .expect("notify_hub collectors are registered once");
    collector
}

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            opts("http_requests_total", "HTTP requests by route and status"),
            &["method", "path", "status"],
        )
        .expect("valid http_requests_total"),
    )
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register(
        HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["method", "path"],
        )
        .expect("valid http_request_duration_seconds"),
    )
});

static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::with_opts(opts("active_sessions", "WebSocket sessions currently registered"))
            .expect("valid active_sessions"),
    )
});

static MESSAGES_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(opts(
            "messages_delivered_total",
            "Payloads enqueued onto a session outbound queue",
        ))
        .expect("valid messages_delivered_total"),
    )
});

static MESSAGES_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(opts(
            "messages_dropped_total",
            "Payloads skipped because the recipient queue was full or closed",
        ))
        .expect("valid messages_dropped_total"),
    )
});

static AUTH_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            opts("auth_attempts_total", "WebSocket handshake authentication outcomes"),
            &["outcome"],
        )
        .expect("valid auth_attempts_total"),
    )
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(elapsed.as_secs_f64());
}

pub fn session_registered() {
    ACTIVE_SESSIONS.inc();
}

pub fn session_unregistered() {
    ACTIVE_SESSIONS.dec();
}

pub fn record_delivery(delivered: usize, dropped: usize) {
    MESSAGES_DELIVERED_TOTAL.inc_by(delivered as u64);
    MESSAGES_DROPPED_TOTAL.inc_by(dropped as u64);
}

pub fn record_auth_outcome(outcome: &str) {
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Records count and latency per route pattern. Failed requests are labelled
/// with the status their error would render as.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let path = req
            .match_pattern()
            .unwrap_or_else(|| UNMATCHED_PATH.to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let status = match &result {
                Ok(response) => response.status(),
                Err(e) => e.as_response_error().status_code(),
            };
            observe_http_request(&method, &path, status.as_u16(), start.elapsed());
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::to_bytes, test, web, App};

    fn requests(method: &str, path: &str, status: &str) -> u64 {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[method, path, status])
            .get()
    }

    #[actix_web::test]
    async fn test_exposition_includes_hub_metrics() {
        record_delivery(2, 1);
        record_auth_outcome("success");
        session_registered();
        session_unregistered();

        let response = serve_metrics().await;
        assert!(response.status().is_success());

        let body = to_bytes(response.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("notify_hub_messages_delivered_total"));
        assert!(text.contains("notify_hub_messages_dropped_total"));
        assert!(text.contains("notify_hub_auth_attempts_total"));
        assert!(text.contains("notify_hub_active_sessions"));
    }

    #[actix_web::test]
    async fn test_middleware_labels_by_route_pattern() {
        let app = test::init_service(
            App::new()
                .wrap(MetricsMiddleware)
                .route("/teams/{team_id}", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let matched_before = requests("GET", "/teams/{team_id}", "200");
        let unmatched_before = requests("GET", UNMATCHED_PATH, "404");

        for team in ["a", "b"] {
            let req = test::TestRequest::get().uri(&format!("/teams/{team}")).to_request();
            test::call_service(&app, req).await;
        }
        let req = test::TestRequest::get().uri("/random/path/123").to_request();
        test::call_service(&app, req).await;

        assert!(requests("GET", "/teams/{team_id}", "200") >= matched_before + 2);
        assert!(requests("GET", UNMATCHED_PATH, "404") >= unmatched_before + 1);
        assert_eq!(requests("GET", "/teams/a", "200"), 0);
    }
}
