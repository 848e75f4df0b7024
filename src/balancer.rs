//! The core logic for the load balancer: ownership of the upstream pool
//! and the round-robin selection that decides which backend handles each
//! request.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::metrics::{NO_UPSTREAM_AVAILABLE, TOTAL_UPSTREAMS, UPSTREAM_SELECTED};
use crate::upstream::{ProxyError, Upstream};

#[derive(Debug)]
pub struct LoadBalancer {
    pub bind_addr: String,
    /// Rotation cursor. Grows without bound (wrapping on overflow) and is
    /// reduced modulo the pool size before every index.
    cursor: AtomicUsize,
    upstreams: Vec<Arc<dyn Upstream>>,
}

impl LoadBalancer {
    /// Creates a balancer over a fixed, ordered pool of upstreams.
    ///
    /// The pool must be non-empty; selection is undefined otherwise.
    pub fn new(bind_addr: String, upstreams: Vec<Arc<dyn Upstream>>) -> Result<Self, ProxyError> {
        if upstreams.is_empty() {
            return Err(ProxyError::NoUpstreams);
        }

        TOTAL_UPSTREAMS.set(upstreams.len() as i64);
        for upstream in &upstreams {
            UPSTREAM_SELECTED.with_label_values(&[upstream.address()]).inc_by(0);
        }

        info!(
            bind_addr = %bind_addr,
            upstreams = upstreams.len(),
            "LoadBalancer initialized"
        );

        Ok(Self { bind_addr, cursor: AtomicUsize::new(0), upstreams })
    }

    /// Picks the next live upstream in cyclic order.
    ///
    /// Every probe advances the cursor by exactly one atomic increment, so
    /// the scan resumes immediately after the previously returned upstream
    /// and concurrent callers never lose or duplicate an advance. The scan
    /// is bounded to one full cycle: if every upstream reports non-live,
    /// the call fails with `NoAvailableUpstream` instead of spinning.
    pub fn select_next(&self) -> Result<Arc<dyn Upstream>, ProxyError> {
        for _ in 0..self.upstreams.len() {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.upstreams.len();
            let candidate = &self.upstreams[index];
            if candidate.is_alive() {
                return Ok(Arc::clone(candidate));
            }
        }
        Err(ProxyError::NoAvailableUpstream)
    }

    /// Selects an upstream and delegates the request to it.
    ///
    /// There is no retry: whatever the forward produces, including a
    /// gateway error, is the caller's response.
    pub async fn route_request(&self, req: Request<Body>) -> Response {
        let upstream = match self.select_next() {
            Ok(upstream) => upstream,
            Err(e) => {
                NO_UPSTREAM_AVAILABLE.inc();
                warn!(error = %e, "No upstream available for request");
                return (StatusCode::SERVICE_UNAVAILABLE, "No available upstream").into_response();
            }
        };

        UPSTREAM_SELECTED.with_label_values(&[upstream.address()]).inc();
        info!(
            upstream = %upstream.address(),
            method = %req.method(),
            path = %req.uri().path(),
            "Forwarding request"
        );

        upstream.forward(req).await
    }

    /// Returns a status snapshot for the `/status` endpoint.
    pub fn status(&self) -> Value {
        serde_json::json!({
            "bind_addr": self.bind_addr,
            "strategy": "round_robin",
            "total_upstreams": self.upstreams.len(),
            "alive_upstreams": self.upstreams.iter().filter(|u| u.is_alive()).count(),
            "upstreams": self.upstreams.iter().map(|u| {
                serde_json::json!({
                    "address": u.address(),
                    "alive": u.is_alive(),
                })
            }).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    /// Test double with controllable liveness; `forward` answers with the
    /// upstream's own address so tests can see who handled the request.
    #[derive(Debug)]
    struct FakeUpstream {
        address: String,
        alive: AtomicBool,
    }

    impl FakeUpstream {
        fn new(address: &str, alive: bool) -> Arc<Self> {
            Arc::new(Self { address: address.to_string(), alive: AtomicBool::new(alive) })
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        fn address(&self) -> &str {
            &self.address
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }

        async fn forward(&self, _req: Request<Body>) -> Response {
            (StatusCode::OK, self.address.clone()).into_response()
        }
    }

    fn make_balancer(upstreams: Vec<Arc<FakeUpstream>>) -> LoadBalancer {
        let pool: Vec<Arc<dyn Upstream>> =
            upstreams.into_iter().map(|u| u as Arc<dyn Upstream>).collect();
        LoadBalancer::new("127.0.0.1:8080".to_string(), pool).unwrap()
    }

    fn select_addresses(balancer: &LoadBalancer, count: usize) -> Vec<String> {
        (0..count).map(|_| balancer.select_next().unwrap().address().to_string()).collect()
    }

    #[test]
    fn test_round_robin_visits_each_upstream_once_per_cycle() {
        let balancer = make_balancer(vec![
            FakeUpstream::new("a", true),
            FakeUpstream::new("b", true),
            FakeUpstream::new("c", true),
        ]);

        assert_eq!(select_addresses(&balancer, 4), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_dead_upstream_is_skipped_and_order_preserved() {
        let balancer = make_balancer(vec![
            FakeUpstream::new("a", true),
            FakeUpstream::new("b", false),
            FakeUpstream::new("c", true),
        ]);

        assert_eq!(select_addresses(&balancer, 3), vec!["a", "c", "a"]);
    }

    #[test]
    fn test_all_upstreams_dead_fails_after_one_cycle() {
        let balancer = make_balancer(vec![
            FakeUpstream::new("a", false),
            FakeUpstream::new("b", false),
        ]);

        let result = balancer.select_next();
        assert!(matches!(result, Err(ProxyError::NoAvailableUpstream)));
    }

    #[test]
    fn test_recovered_upstream_rejoins_rotation() {
        let a = FakeUpstream::new("a", true);
        let b = FakeUpstream::new("b", false);
        let balancer = make_balancer(vec![a.clone(), b.clone()]);

        assert_eq!(select_addresses(&balancer, 2), vec!["a", "a"]);

        b.alive.store(true, Ordering::Relaxed);
        let selected = select_addresses(&balancer, 2);
        assert!(selected.contains(&"b".to_string()), "recovered upstream was never selected");
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let result = LoadBalancer::new("127.0.0.1:8080".to_string(), Vec::new());
        assert!(matches!(result, Err(ProxyError::NoUpstreams)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_selection_is_fair_and_lossless() {
        const TASKS: usize = 90;

        let balancer = Arc::new(make_balancer(vec![
            FakeUpstream::new("a", true),
            FakeUpstream::new("b", true),
            FakeUpstream::new("c", true),
        ]));

        let mut handles = Vec::with_capacity(TASKS);
        for _ in 0..TASKS {
            let balancer = balancer.clone();
            handles.push(tokio::spawn(async move {
                balancer.select_next().unwrap().address().to_string()
            }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_insert(0) += 1;
        }

        // Each selection consumes exactly one cursor increment, so 90
        // concurrent selections over 3 live upstreams land 30 on each.
        assert_eq!(counts.values().sum::<usize>(), TASKS);
        for (address, count) in &counts {
            assert_eq!(*count, TASKS / 3, "upstream {} selected {} times", address, count);
        }
    }

    #[tokio::test]
    async fn test_route_request_returns_503_when_pool_is_dead() {
        let balancer = make_balancer(vec![FakeUpstream::new("a", false)]);

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = balancer.route_request(req).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_route_request_delegates_to_selected_upstream() {
        let balancer = make_balancer(vec![
            FakeUpstream::new("a", true),
            FakeUpstream::new("b", true),
        ]);

        for expected in ["a", "b", "a"] {
            let req = Request::builder().uri("/").body(Body::empty()).unwrap();
            let response = balancer.route_request(req).await;
            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            assert_eq!(&body[..], expected.as_bytes());
        }
    }

    #[test]
    fn test_status_reports_pool_details() {
        let balancer = make_balancer(vec![
            FakeUpstream::new("a", true),
            FakeUpstream::new("b", false),
        ]);

        let status = balancer.status();
        assert_eq!(status["strategy"], "round_robin");
        assert_eq!(status["total_upstreams"], 2);
        assert_eq!(status["alive_upstreams"], 1);
        assert_eq!(status["upstreams"][0]["address"], "a");
        assert_eq!(status["upstreams"][1]["alive"], false);
    }
}
