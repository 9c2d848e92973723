//! Fixed-window rate limiting per client address.
//!
//! Each route class owns an independent counter map, so exhausting the
//! login budget does not touch the general API budget and vice versa.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::warn;

use crate::{
    config::{RateLimitConfig, WindowLimit},
    error::AuthError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    General,
    Login,
    Register,
}

impl RouteClass {
    fn message(&self) -> &'static str {
        match self {
            RouteClass::General => "Too many requests, please try again later",
            RouteClass::Login => "Too many authentication attempts, try again later",
            RouteClass::Register => "Too many registration attempts, try again later",
        }
    }
}

struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    limit: WindowLimit,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: WindowLimit) -> Self {
        Self {
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Increment and compare happen under one lock acquisition.
    fn check_at(&self, key: &str, now: Instant) -> Decision {
        let window = self.limit.window();
        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_owned()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.saturating_duration_since(entry.started) >= window {
            entry.count = 0;
            entry.started = now;
        }
        entry.count = entry.count.saturating_add(1);

        Decision {
            allowed: entry.count <= self.limit.max_requests,
            limit: self.limit.max_requests,
            remaining: self.limit.max_requests.saturating_sub(entry.count),
            reset_after: (entry.started + window).saturating_duration_since(now),
        }
    }

    /// Drops windows that have already elapsed.
    pub fn prune(&self) {
        let window = self.limit.window();
        let now = Instant::now();
        self.windows
            .lock()
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
    }
}

#[derive(Clone)]
pub struct RateLimiters {
    general: Arc<RateLimiter>,
    login: Arc<RateLimiter>,
    register: Arc<RateLimiter>,
    trust_proxy: bool,
}

impl RateLimiters {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            general: Arc::new(RateLimiter::new(cfg.general)),
            login: Arc::new(RateLimiter::new(cfg.login)),
            register: Arc::new(RateLimiter::new(cfg.register)),
            trust_proxy: cfg.trust_proxy,
        }
    }

    pub fn for_class(&self, class: RouteClass) -> &RateLimiter {
        match class {
            RouteClass::General => &self.general,
            RouteClass::Login => &self.login,
            RouteClass::Register => &self.register,
        }
    }

    /// Middleware state that applies the limiter for `class`.
    pub fn gate(&self, class: RouteClass) -> RateLimitGate {
        RateLimitGate {
            limiters: self.clone(),
            class,
        }
    }

    /// Periodically prunes every class; call once from the runtime.
    pub fn spawn_pruner(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiters = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                limiters.general.prune();
                limiters.login.prune();
                limiters.register.prune();
            }
        })
    }
}

#[derive(Clone)]
pub struct RateLimitGate {
    limiters: RateLimiters,
    class: RouteClass,
}

fn client_key(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_owned();
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

const RATELIMIT_LIMIT: &str = "ratelimit-limit";

fn secs_ceil(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Gates nest (general outside, login/register inside); the innermost gate's
/// headers describe the budget that actually applies and are never replaced.
fn put_headers(headers: &mut HeaderMap, decision: &Decision) {
    if headers.contains_key(RATELIMIT_LIMIT) {
        return;
    }
    let pairs = [
        (RATELIMIT_LIMIT, decision.limit as u64),
        ("ratelimit-remaining", decision.remaining as u64),
        ("ratelimit-reset", secs_ceil(decision.reset_after)),
    ];
    for (name, value) in pairs {
        headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
    }
}

pub async fn rate_limit(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request, gate.limiters.trust_proxy);
    let decision = gate.limiters.for_class(gate.class).check(&key);

    if !decision.allowed {
        warn!(
            client = %key,
            class = ?gate.class,
            retry_after_secs = secs_ceil(decision.reset_after),
            "rate limit exceeded"
        );
        let mut response = AuthError::RateLimited(gate.class.message()).into_response();
        put_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .entry(axum::http::header::RETRY_AFTER)
            .or_insert_with(|| HeaderValue::from(secs_ceil(decision.reset_after)));
        return response;
    }

    let mut response = next.run(request).await;
    put_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(WindowLimit {
            max_requests,
            window_secs,
        })
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let rl = limiter(5, 900);
        for i in 0..5 {
            let d = rl.check("10.0.0.1");
            assert!(d.allowed, "request {} should pass", i + 1);
            assert_eq!(d.remaining, 4 - i);
        }
        let d = rl.check("10.0.0.1");
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert!(d.reset_after <= Duration::from_secs(900));
        assert!(d.reset_after > Duration::from_secs(890));
    }

    #[test]
    fn clients_are_counted_separately() {
        let rl = limiter(1, 60);
        assert!(rl.check("a").allowed);
        assert!(!rl.check("a").allowed);
        assert!(rl.check("b").allowed);
    }

    #[test]
    fn window_resets_after_elapsing() {
        let rl = limiter(2, 60);
        let start = Instant::now();
        assert!(rl.check_at("c", start).allowed);
        assert!(rl.check_at("c", start).allowed);
        assert!(!rl.check_at("c", start + Duration::from_secs(59)).allowed);
        let d = rl.check_at("c", start + Duration::from_secs(60));
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
    }

    #[test]
    fn classes_are_independent() {
        let limiters = RateLimiters::new(&RateLimitConfig::default());
        for _ in 0..5 {
            assert!(limiters.for_class(RouteClass::Login).check("ip").allowed);
        }
        assert!(!limiters.for_class(RouteClass::Login).check("ip").allowed);
        assert!(limiters.for_class(RouteClass::General).check("ip").allowed);
        assert!(limiters.for_class(RouteClass::Register).check("ip").allowed);
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let rl = Arc::new(limiter(50, 900));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = rl.clone();
                std::thread::spawn(move || (0..20).filter(|_| rl.check("shared").allowed).count())
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }

    #[test]
    fn prune_drops_only_elapsed_windows() {
        let rl = limiter(1, 0);
        rl.check("gone");
        rl.prune();
        assert!(rl.windows.lock().is_empty());

        let rl = limiter(1, 900);
        rl.check("kept");
        rl.prune();
        assert_eq!(rl.windows.lock().len(), 1);
    }

    #[test]
    fn outer_gate_keeps_inner_gate_headers() {
        let login = limiter(5, 900).check("ip");
        let general = limiter(100, 3600).check("ip");
        let mut headers = HeaderMap::new();
        put_headers(&mut headers, &login);
        put_headers(&mut headers, &general);
        assert_eq!(headers["ratelimit-limit"], "5");
        assert_eq!(headers["ratelimit-remaining"], "4");
        assert_eq!(headers["ratelimit-reset"], "900");
    }

    #[test]
    fn forwarded_for_only_when_trusted() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_key(&request, true), "203.0.113.9");
        assert_eq!(client_key(&request, false), "unknown");
    }
}
