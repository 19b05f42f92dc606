//! Worker-reachable service URLs.
//!
//! A worker publishes an environment's services on its own host, so the host
//! builds links by taking the worker's base URL, swapping in the service
//! port and appending the service path after the worker's base path.

use std::fmt;

use serde_json::Value;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceUrlError {
    /// The base URL could not be parsed or has no host.
    InvalidBaseUrl(String),
}

impl fmt::Display for ServiceUrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(url) => write!(f, "Invalid base URL: {}", url),
        }
    }
}

impl std::error::Error for ServiceUrlError {}

/// Build `scheme://host:port/<base path><suffix>`.
///
/// Scheme and host come from `base_url`, the port is replaced by `port`, and
/// `suffix` (path, query and fragment) is appended verbatim after the base
/// path. The base path is copied as written, without normalization. Query and
/// fragment of `base_url` itself are dropped.
pub fn build_service_url(
    base_url: &str,
    port: u16,
    suffix: &str,
) -> Result<String, ServiceUrlError> {
    let trimmed = base_url.trim();
    let parsed =
        Url::parse(trimmed).map_err(|_| ServiceUrlError::InvalidBaseUrl(base_url.to_string()))?;

    let host = match parsed.host() {
        Some(Host::Ipv6(addr)) => format!("[{}]", addr),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Domain(domain)) => domain.to_string(),
        None => return Err(ServiceUrlError::InvalidBaseUrl(base_url.to_string())),
    };

    let base_path = raw_path(trimmed).trim_end_matches('/');

    let mut out = format!("{}://{}:{}{}", parsed.scheme(), host, port, base_path);
    if suffix.is_empty() || suffix.starts_with(['/', '?', '#']) {
        out.push_str(suffix);
    } else {
        out.push('/');
        out.push_str(suffix);
    }
    Ok(out)
}

/// Path of `url` exactly as written: after the authority, before `?` or `#`.
fn raw_path(url: &str) -> &str {
    let Some((_, rest)) = url.split_once("://") else {
        return "";
    };
    let rest = &rest[rest.find(['/', '?', '#']).unwrap_or(rest.len())..];
    &rest[..rest.find(['?', '#']).unwrap_or(rest.len())]
}

/// Interpret `value` as a TCP port.
///
/// Accepts a JSON integer or a numeric string (surrounding whitespace is
/// ignored). Anything outside 1..=65535, non-numeric, or absent yields `None`.
pub fn parse_port(value: Option<&Value>) -> Option<u16> {
    let raw = match value? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    u16::try_from(raw).ok().filter(|port| *port > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keeps_base_path_and_overrides_port() {
        let base = "https://worker.example.com/gateway/worker";
        let url = build_service_url(base, 31111, "/?token=abc").unwrap();
        assert_eq!(url, "https://worker.example.com:31111/gateway/worker/?token=abc");
    }

    #[test]
    fn test_brackets_ipv6_host_once() {
        let url = build_service_url("http://[2001:db8::10]:8000/prefix", 32000, "/code").unwrap();
        assert_eq!(url, "http://[2001:db8::10]:32000/prefix/code");
        assert_eq!(url.matches('[').count(), 1);
    }

    #[test]
    fn test_preserves_query_and_fragment() {
        let suffix = "/lab/tree?token=abc#section-1";
        let url = build_service_url("https://worker.example.com/base", 30000, suffix).unwrap();
        assert_eq!(url, "https://worker.example.com:30000/base/lab/tree?token=abc#section-1");
    }

    #[test]
    fn test_root_base_and_bare_suffixes() {
        assert_eq!(
            build_service_url("http://10.0.0.5:8000", 8888, "").unwrap(),
            "http://10.0.0.5:8888"
        );
        assert_eq!(
            build_service_url("http://10.0.0.5:8000/", 8888, "lab").unwrap(),
            "http://10.0.0.5:8888/lab"
        );
        assert_eq!(
            build_service_url("http://h/base/", 8888, "?x=1").unwrap(),
            "http://h:8888/base?x=1"
        );
    }

    #[test]
    fn test_base_path_is_copied_without_normalization() {
        assert_eq!(
            build_service_url("http://h/gw/../x", 8080, "/a").unwrap(),
            "http://h:8080/gw/../x/a"
        );
        assert_eq!(
            build_service_url("http://h:8000/café/", 8080, "/a").unwrap(),
            "http://h:8080/café/a"
        );
        assert_eq!(
            build_service_url("http://h/a%20b?q=1#frag", 8080, "").unwrap(),
            "http://h:8080/a%20b"
        );
        assert_eq!(
            build_service_url("http://user@[::1]:9000?x", 8080, "/a").unwrap(),
            "http://[::1]:8080/a"
        );
    }

    #[test]
    fn test_rejects_unparseable_base() {
        assert!(build_service_url("not a url", 80, "/").is_err());
    }

    #[test]
    fn test_parse_port_accepts_int_and_numeric_string() {
        assert_eq!(parse_port(Some(&json!(8888))), Some(8888));
        assert_eq!(parse_port(Some(&json!("8888"))), Some(8888));
        assert_eq!(parse_port(Some(&json!("  8888  "))), Some(8888));
        assert_eq!(parse_port(Some(&json!(65535))), Some(65535));
    }

    #[test]
    fn test_parse_port_rejects_invalid_values() {
        assert_eq!(parse_port(Some(&json!(0))), None);
        assert_eq!(parse_port(Some(&json!(-1))), None);
        assert_eq!(parse_port(Some(&json!("0"))), None);
        assert_eq!(parse_port(Some(&json!("abc"))), None);
        assert_eq!(parse_port(Some(&json!(65536))), None);
        assert_eq!(parse_port(Some(&json!(80.5))), None);
        assert_eq!(parse_port(Some(&Value::Null)), None);
        assert_eq!(parse_port(None), None);
    }
}
