//! Request logging layer
//!
//! One structured `info` event per request: method, path, status, latency
//! and client address. Latency is also echoed back in a response header.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

/// Response header carrying the handler latency in milliseconds
pub const RESPONSE_TIME_HEADER: &str = "x-response-time-ms";

pub async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = client_ip(&request);
    let start = Instant::now();

    let mut response = next.run(request).await;

    let latency_ms = start.elapsed().as_secs_f64() * 1_000.0;
    let status = response.status().as_u16();
    tracing::info!(
        method = %method,
        path = %path,
        status,
        latency_ms,
        client_ip = %client_ip,
        "HTTP request"
    );

    if let Ok(value) = HeaderValue::from_str(&format!("{:.3}", latency_ms)) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }
    response
}

/// First `X-Forwarded-For` hop, else the peer address, else "unknown"
fn client_ip(request: &Request<Body>) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
