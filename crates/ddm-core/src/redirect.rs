//! Manual redirect handling.
//!
//! `curl`'s `follow_location(true)` (used by `fetch_head::probe` and
//! `downloader::single`) cannot enforce a hop limit with a named error, reject
//! cross-protocol hops, or strip headers on cross-origin redirects. The
//! segmented engine needs all three, so it turns `follow_location` off and
//! walks redirects itself with this policy.

use crate::headers::HeaderList;
use std::fmt;

/// Headers preserved across a cross-origin redirect. Everything else (in
/// particular `Authorization` and any custom bearer/cookie header) is dropped.
pub const SAFE_CROSS_ORIGIN_HEADERS: &[&str] = &["User-Agent", "Accept", "Range"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub max_hops: u32,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self { max_hops: 10 }
    }
}

#[derive(Debug, Clone)]
pub enum RedirectError {
    /// `hop_count` had already reached the policy's `max_hops` when another
    /// redirect was received; `last_url` is where the chain stopped.
    TooManyRedirects { last_url: String },
    /// The redirect target uses a scheme other than `http`/`https`.
    CrossProtocol { from: String, to: String },
}

impl fmt::Display for RedirectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectError::TooManyRedirects { last_url } => {
                write!(f, "too many redirects (stopped at {})", last_url)
            }
            RedirectError::CrossProtocol { from, to } => {
                write!(f, "cross-protocol redirect rejected: {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for RedirectError {}

/// One step of redirect resolution: the URL to request next and the headers
/// to send with it (already stripped if this hop crossed origins).
#[derive(Debug, Clone)]
pub struct RedirectStep {
    pub url: String,
    pub headers: HeaderList,
}

fn origin(url: &url::Url) -> (String, String, u16) {
    (
        url.scheme().to_string(),
        url.host_str().unwrap_or_default().to_string(),
        url.port_or_known_default().unwrap_or(0),
    )
}

impl RedirectPolicy {
    /// Resolve one `Location` header against the policy. `hop_count` is the
    /// number of redirects already followed before this one (0 for the first).
    /// Returns the next request to issue.
    pub fn next_step(
        &self,
        hop_count: u32,
        current_url: &str,
        location: &str,
        headers: &HeaderList,
    ) -> Result<RedirectStep, RedirectError> {
        if hop_count >= self.max_hops {
            return Err(RedirectError::TooManyRedirects {
                last_url: current_url.to_string(),
            });
        }

        let base = url::Url::parse(current_url)
            .map_err(|_| RedirectError::TooManyRedirects {
                last_url: current_url.to_string(),
            })?;
        let next = base
            .join(location)
            .map_err(|_| RedirectError::TooManyRedirects {
                last_url: current_url.to_string(),
            })?;

        if next.scheme() != "http" && next.scheme() != "https" {
            return Err(RedirectError::CrossProtocol {
                from: current_url.to_string(),
                to: next.to_string(),
            });
        }

        let mut next_headers = headers.clone();
        if origin(&base) != origin(&next) {
            next_headers.retain_allowed(SAFE_CROSS_ORIGIN_HEADERS);
        }

        Ok(RedirectStep {
            url: next.to_string(),
            headers: next_headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_auth() -> HeaderList {
        let mut h = HeaderList::new();
        h.set("Authorization", "Bearer secret");
        h.set("User-Agent", "ddm/1.0");
        h
    }

    #[test]
    fn same_origin_redirect_preserves_headers() {
        let policy = RedirectPolicy::default();
        let step = policy
            .next_step(0, "https://example.com/a", "/b", &headers_with_auth())
            .unwrap();
        assert_eq!(step.url, "https://example.com/b");
        assert!(step.headers.get("Authorization").is_some());
    }

    #[test]
    fn cross_origin_redirect_strips_headers() {
        let policy = RedirectPolicy::default();
        let step = policy
            .next_step(0, "https://example.com/a", "https://other.example/b", &headers_with_auth())
            .unwrap();
        assert!(step.headers.get("Authorization").is_none());
        assert!(step.headers.get("User-Agent").is_some());
    }

    #[test]
    fn hop_limit_enforced_at_boundary() {
        let policy = RedirectPolicy::default();
        let h = HeaderList::new();
        assert!(policy.next_step(9, "https://example.com/a", "/b", &h).is_ok());
        assert!(matches!(
            policy.next_step(10, "https://example.com/a", "/b", &h),
            Err(RedirectError::TooManyRedirects { .. })
        ));
    }

    #[test]
    fn cross_protocol_redirect_rejected() {
        let policy = RedirectPolicy::default();
        let h = HeaderList::new();
        let err = policy
            .next_step(0, "https://example.com/a", "ftp://example.com/b", &h)
            .unwrap_err();
        assert!(matches!(err, RedirectError::CrossProtocol { .. }));
    }
}
