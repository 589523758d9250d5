//! Cache-Control parsing and cacheability rules.

use crate::http::Message;

/// Extract the first parseable `max-age=<N>` directive from a
/// `Cache-Control` value. Directives are comma separated and matched
/// case-insensitively.
pub fn max_age(cache_control: &str) -> Option<i64> {
    cache_control
        .split(',')
        .map(|directive| directive.trim().to_ascii_lowercase())
        .find_map(|directive| {
            directive
                .strip_prefix("max-age=")
                .and_then(|value| value.parse::<i64>().ok())
        })
}

/// Key a request is cached under: `METHOD:URI`.
pub fn cache_key(request: &Message) -> String {
    format!("{}:{}", request.method(), request.uri())
}

/// Freshness lifetime in seconds if this exchange may be cached.
///
/// Only `GET` requests answered with `200` and a positive `max-age` qualify.
pub fn cacheable_lifetime(request: &Message, response: &Message) -> Option<u64> {
    if request.method() != "GET" || response.status_code() != 200 {
        return None;
    }
    let seconds = response.header("cache-control").and_then(max_age)?;
    u64::try_from(seconds).ok().filter(|&s| s > 0)
}
