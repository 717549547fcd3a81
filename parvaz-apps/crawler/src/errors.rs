//!  Parvaz Flight Crawler
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Error Taxonomy & Classification
//!
//! Every failure in the engine is a `CrawlError` carrying the site, host,
//! and attempt it happened on. The retry layer acts on the `ErrorClass`
//! derived from the kind, never on ad-hoc string matching.

use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Network,
    Protocol,
    Parse,
    Validation,
    RateLimit,
    BreakerOpen,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::BreakerOpen => "breaker_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the retry layer treats an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff: resets, 5xx gateway errors, timeouts.
    Transient,
    /// The request itself is wrong or refused; retrying cannot help.
    PermanentClient,
    /// The host pushed back (429 or an anti-bot wall); retry once after the
    /// declared cooldown.
    RateLimited,
    /// Configuration or unrecoverable parse trouble; the adapter is
    /// unhealthy for the rest of the crawl.
    Fatal,
    /// The surrounding context ended; not a host failure.
    Cancelled,
}

#[derive(Debug, Error)]
#[error("{kind} error on {site_id} ({host}), attempt {attempt}: {message}")]
pub struct CrawlError {
    pub kind: ErrorKind,
    pub site_id: String,
    pub host: String,
    pub attempt: u32,
    pub message: String,
    /// Underlying cause, carried for logs; surfaced through Debug output.
    pub cause: Option<anyhow::Error>,
}

impl CrawlError {
    pub fn new(kind: ErrorKind, site_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            site_id: site_id.into(),
            host: String::new(),
            attempt: 0,
            message: message.into(),
            cause: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, "", message)
    }

    pub fn cancelled(site_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, site_id, "operation cancelled")
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn class(&self) -> ErrorClass {
        match self.kind {
            ErrorKind::Network | ErrorKind::Timeout => ErrorClass::Transient,
            ErrorKind::RateLimit => ErrorClass::RateLimited,
            // Breaker rejections are local decisions, never retried here.
            ErrorKind::Protocol | ErrorKind::Validation | ErrorKind::BreakerOpen => {
                ErrorClass::PermanentClient
            }
            ErrorKind::Config | ErrorKind::Parse | ErrorKind::Internal => ErrorClass::Fatal,
            ErrorKind::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transient | ErrorClass::RateLimited
        )
    }
}

/// Map an HTTP status to the error kind the retry layer should see.
/// 2xx never reaches this function.
pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimit,
        502 | 503 | 504 => ErrorKind::Network,
        400..=499 => ErrorKind::Protocol,
        _ => ErrorKind::Network,
    }
}

/// Heuristics for anti-bot walls and captcha interstitials. A body that
/// matches is classified as rate limiting, not as a parse failure.
pub fn detect_anti_bot(body: &str) -> bool {
    const MARKERS: [&str; 6] = [
        "captcha",
        "cf-challenge",
        "challenge-platform",
        "are you a robot",
        "unusual traffic",
        "\u{631}\u{628}\u{627}\u{62a}", // "ربات"
    ];
    let lowered = body.to_lowercase();
    MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(kind_for_status(429), ErrorKind::RateLimit);
        assert_eq!(kind_for_status(503), ErrorKind::Network);
        assert_eq!(kind_for_status(404), ErrorKind::Protocol);
        assert_eq!(kind_for_status(401), ErrorKind::Protocol);
        assert_eq!(kind_for_status(500), ErrorKind::Network);
    }

    #[test]
    fn test_class_mapping() {
        let transient = CrawlError::new(ErrorKind::Timeout, "s", "m");
        assert_eq!(transient.class(), ErrorClass::Transient);
        assert!(transient.retryable());

        let breaker = CrawlError::new(ErrorKind::BreakerOpen, "s", "m");
        assert_eq!(breaker.class(), ErrorClass::PermanentClient);
        assert!(!breaker.retryable());

        let cancelled = CrawlError::cancelled("s");
        assert_eq!(cancelled.class(), ErrorClass::Cancelled);
        assert!(!cancelled.retryable());
    }

    #[test]
    fn test_anti_bot_detection() {
        assert!(detect_anti_bot("<html>Please solve this CAPTCHA</html>"));
        assert!(detect_anti_bot("آیا شما ربات هستید؟"));
        assert!(!detect_anti_bot("<html><div class=\"flight\">W5-1186</div></html>"));
    }
}
