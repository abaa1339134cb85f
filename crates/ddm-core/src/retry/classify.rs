//! Classify HTTP status and curl errors into retry policy error kinds.

use crate::retry::policy::ErrorKind;
use crate::retry::error::SegmentError;

/// Classify an HTTP status code for retry decisions.
///
/// `408` (Request Timeout) and `429` (Too Many Requests) are transient: the
/// server is asking for a slower or repeated request, not refusing it. Any
/// other 4xx is fatal — retrying a 403 or 404 verbatim never helps.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        408 | 429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        400..=499 => ErrorKind::Fatal,
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    // Unrecognized curl error: treated conservatively as transient (`Other`).
    ErrorKind::Other
}

/// Classify a segment error into an ErrorKind.
pub fn classify(e: &SegmentError) -> ErrorKind {
    match e {
        SegmentError::Curl(ce) => classify_curl_error(ce),
        SegmentError::Http(code) => classify_http_status(*code),
        // Server closed early or sent fewer bytes than promised: treat like a
        // dropped connection, worth another attempt.
        SegmentError::PartialTransfer { .. } => ErrorKind::Connection,
        // Disk-level failure; unclassified, so treated conservatively as
        // transient (`Other`) up to the normal attempt cap rather than
        // abandoned outright.
        SegmentError::Storage(_) => ErrorKind::Other,
    }
}
