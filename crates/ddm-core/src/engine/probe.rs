//! Origin probe: one ranged GET that tells the engine whether the server
//! honors ranges, how big the resource is, and how fast the origin serves a
//! chunk, before any `Part` is spawned. See `SPEC_FULL.md` §4.2.

use crate::headers::HeaderList;
use std::time::{Duration, Instant};

/// Outcome of probing the origin with `Range: bytes=1-<chunk_size>`.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// `true` if the response carried `Accept-Ranges: bytes` or was itself a 206.
    pub accept_ranges: bool,
    /// Total resource size, if reported (from `Content-Range`'s `/total` or `Content-Length`).
    pub content_length: Option<u64>,
    /// Bytes per second observed while reading the probe chunk. `0.0` if no
    /// bytes were read (e.g. an empty body).
    pub observed_bytes_per_sec: f64,
    /// Raw `Content-Disposition` header value, if present (filename hint).
    pub content_disposition: Option<String>,
    /// `ETag` value if present (used for resume validation).
    pub etag: Option<String>,
    /// `Last-Modified` value if present (used for resume validation).
    pub last_modified: Option<String>,
}

/// Issues `GET` with `Range: bytes=1-<chunk_size>` and measures how long the
/// body takes to arrive. Runs on the calling thread; callers on an async
/// runtime should invoke this from a blocking context.
pub fn probe(url: &str, headers: &HeaderList, chunk_size: u64) -> anyhow::Result<ProbeResult> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(60))?;
    let range = format!("1-{}", chunk_size);
    easy.range(&range)?;

    if let Ok(list) = headers.apply_to_curl_list() {
        if !headers.is_empty() {
            easy.http_headers(list)?;
        }
    }

    let mut response_headers: Vec<String> = Vec::new();
    let mut body_len: u64 = 0;
    let start = Instant::now();
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = std::str::from_utf8(data) {
                response_headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.write_function(|data| {
            body_len += data.len() as u64;
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    let elapsed = start.elapsed();

    let code = easy.response_code().unwrap_or(0);
    let accept_ranges = code == 206
        || response_headers.iter().any(|h| {
            h.to_ascii_lowercase().starts_with("accept-ranges:") && h.to_ascii_lowercase().contains("bytes")
        });

    let content_length = parse_total_from_content_range(&response_headers)
        .or_else(|| parse_content_length(&response_headers));

    let observed_bytes_per_sec = if elapsed.as_secs_f64() > 0.0 {
        body_len as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    let content_disposition = find_header(&response_headers, "content-disposition");
    let etag = find_header(&response_headers, "etag").map(|v| v.trim_matches('"').to_string());
    let last_modified = find_header(&response_headers, "last-modified");

    Ok(ProbeResult {
        accept_ranges,
        content_length,
        observed_bytes_per_sec,
        content_disposition,
        etag,
        last_modified,
    })
}

fn find_header(headers: &[String], name: &str) -> Option<String> {
    for h in headers {
        if let Some((key, value)) = h.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn parse_total_from_content_range(headers: &[String]) -> Option<u64> {
    for h in headers {
        let lower = h.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-range:") {
            if let Some((_, total)) = rest.trim().rsplit_once('/') {
                if let Ok(n) = total.trim().parse::<u64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

fn parse_content_length(headers: &[String]) -> Option<u64> {
    for h in headers {
        let lower = h.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-length:") {
            if let Ok(n) = rest.trim().parse::<u64>() {
                return Some(n);
            }
        }
    }
    None
}
