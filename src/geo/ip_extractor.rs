//! Client IP extraction from HTTP headers with trust validation
//!
//! Forwarding headers are only believed in the configured proxy mode:
//! - `Cloudflare`: CF-Connecting-IP
//! - `Standard`: RFC 7239 Forwarded, then X-Forwarded-For walked right to left
//!   past trusted proxies
//! - `None`: the socket address

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{GeoConfig, TrustedProxyMode};

/// Extract the client IP address for an incoming request
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &GeoConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, config: &GeoConfig) -> Option<IpAddr> {
    // Prefer RFC 7239 Forwarded header
    if let Some(ip) = extract_from_forwarded(headers) {
        return Some(ip);
    }

    extract_from_x_forwarded_for(headers, config)
}

/// First `for=` address of a Forwarded header, e.g.
/// `Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43`
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    for element in forwarded.split(',') {
        for param in element.split(';') {
            let param = param.trim();
            let Some(value) = param
                .strip_prefix("for=")
                .or_else(|| param.strip_prefix("For="))
            else {
                continue;
            };

            if let Some(ip) = parse_forwarded_node(value) {
                return Some(ip);
            }
        }
    }

    None
}

/// Parse a Forwarded node: bare IPv4, `ip:port`, or quoted `"[v6]:port"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        let (addr, _) = rest.split_once(']')?;
        return addr.parse().ok();
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    let (addr, _port) = value.rsplit_once(':')?;
    addr.parse().ok()
}

/// Walk X-Forwarded-For from the right, skipping proxies we trust
fn extract_from_x_forwarded_for(headers: &HeaderMap, config: &GeoConfig) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;
    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    if ips.is_empty() {
        return None;
    }

    // If num_trusted_proxies is specified, skip that many from the right
    if let Some(num_trusted) = config.num_trusted_proxies {
        if ips.len() > num_trusted {
            return Some(ips[ips.len() - num_trusted - 1]);
        }
        // Not enough IPs in chain, return the leftmost (least trusted)
        return ips.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        let is_trusted = |ip: &IpAddr| config.trusted_proxies.iter().any(|net| net.contains(ip));
        return ips
            .iter()
            .rev()
            .find(|ip| !is_trusted(ip))
            .or_else(|| ips.first())
            .copied();
    }

    // No trust configuration, return the rightmost IP
    ips.last().copied()
}
