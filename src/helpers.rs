use actix_web::http::header::{self, HeaderMap};
use chrono::TimeDelta;

/// Lease assumed when a hub's challenge does not carry a usable one.
pub const DEFAULT_LEASE_SECONDS: i64 = 12 * 60 * 60;

/// Lease granted by a challenge's `hub.lease_seconds`, falling back to
/// [`DEFAULT_LEASE_SECONDS`] when it is missing or not a non-negative
/// integer.
pub fn parse_lease(value: Option<&str>) -> TimeDelta {
    value
        .and_then(|value| value.parse::<u64>().ok())
        .and_then(|seconds| i64::try_from(seconds).ok())
        .and_then(TimeDelta::try_seconds)
        .unwrap_or_else(|| TimeDelta::seconds(DEFAULT_LEASE_SECONDS))
}

#[derive(Debug, PartialEq, Eq)]
struct Link<'a> {
    url: &'a str,
    rel: &'a str,
}

impl Link<'_> {
    fn has_rel(&self, name: &str) -> bool {
        self.rel
            .split_ascii_whitespace()
            .any(|rel| rel.eq_ignore_ascii_case(name))
    }
}

/// Url of the first `rel="self"` entry over every `Link` header of a
/// delivery, which is the topic the hub is pushing.
pub fn self_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::LINK)
        .filter_map(|value| value.to_str().ok())
        .flat_map(split_links)
        .filter_map(parse_link)
        .find(|link| link.has_rel("self"))
        .map(|link| link.url.to_owned())
}

// Commas inside `<...>` or quotes do not separate entries.
fn split_links(value: &str) -> Vec<&str> {
    let mut links = Vec::new();
    let mut in_url = false;
    let mut in_quotes = false;
    let mut start = 0;

    for (index, c) in value.char_indices() {
        match c {
            '<' if !in_quotes => in_url = true,
            '>' if !in_quotes => in_url = false,
            '"' if !in_url => in_quotes = !in_quotes,
            ',' if !in_url && !in_quotes => {
                links.push(&value[start..index]);
                start = index + 1;
            },
            _ => {},
        }
    }

    links.push(&value[start..]);

    links
}

fn parse_link(raw: &str) -> Option<Link<'_>> {
    let raw = raw.trim();
    let start = raw.find('<')?;
    let end = raw[start..].find('>')? + start;
    let url = raw[start + 1..end].trim();
    let mut rel = "";

    for param in raw[end + 1..].split(';') {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("rel") {
                rel = value.trim().trim_matches('"');
            }
        }
    }

    Some(Link { url, rel })
}
