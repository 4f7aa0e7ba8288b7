//! Argument value parsers.

use courier_core::{HttpMethod, NetworkClass};
use std::time::Duration;

/// Parse a `key=value` pair. The value may itself contain `=`.
pub fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn parse_method(s: &str) -> Result<HttpMethod, String> {
    HttpMethod::from_str(s).ok_or_else(|| format!("unsupported method '{}'", s))
}

pub fn parse_network_class(s: &str) -> Result<NetworkClass, String> {
    NetworkClass::from_str(s).ok_or_else(|| format!("unknown network class '{}'", s))
}

/// Parse a TTL given in whole hours.
pub fn parse_ttl_hours(s: &str) -> Result<Duration, String> {
    let hours: u64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid hour count '{}': {}", s, e))?;
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("TTL of {} hours is too large", hours))
}
