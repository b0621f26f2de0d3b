use url::Url;

/// Returns the politeness key for a URL: the lowercase host, plus the port when it
/// is not the scheme default
///
/// Two servers on the same address but different ports are separate hosts for rate
/// limiting purposes.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use driftnet::url::host_key;
///
/// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(host_key(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Strips a trailing `:port` from a host key
pub fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        // IPv6 literals keep their brackets, so "[::1]" has no trailing port
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            if name.starts_with('[') && !name.ends_with(']') {
                host
            } else {
                name
            }
        }
        _ => host,
    }
}
