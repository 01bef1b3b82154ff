use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use ip_network::IpNetwork;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use crate::handlers::AppError;
use crate::AppState;

pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Parse a CIDR block. A bare address is taken as a single-host network.
pub fn parse_subnet(s: &str) -> Result<IpNetwork, String> {
    if let Ok(net) = IpNetwork::from_str(s) {
        return Ok(net);
    }
    match IpAddr::from_str(s) {
        Ok(IpAddr::V4(ip4)) => IpNetwork::new(ip4, 32).map_err(|e| e.to_string()),
        Ok(IpAddr::V6(ip6)) => IpNetwork::new(ip6, 128).map_err(|e| e.to_string()),
        Err(_) => Err(format!("invalid network or ip string: {s}")),
    }
}

/// Does the declared origin parse and fall inside `subnet`?
pub fn origin_allowed(subnet: &IpNetwork, declared: Option<&str>) -> bool {
    let Some(ip) = declared.and_then(|s| IpAddr::from_str(s.trim()).ok()) else {
        return false;
    };
    match (subnet, ip) {
        (IpNetwork::V4(net), IpAddr::V4(ip)) => net.contains(ip),
        (IpNetwork::V6(net), IpAddr::V6(ip)) => net.contains(ip),
        _ => false,
    }
}

/// Reject requests whose `X-Real-IP` is missing or outside the trusted
/// subnet. A no-op when no subnet is configured.
pub async fn check_origin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(subnet) = &state.trusted_subnet {
        let declared = req
            .headers()
            .get(REAL_IP_HEADER)
            .and_then(|v| v.to_str().ok());
        if !origin_allowed(subnet, declared) {
            return Err(AppError::Forbidden(format!(
                "origin {} is not in {subnet}",
                declared.unwrap_or("<missing>")
            )));
        }
    }
    Ok(next.run(req).await)
}
