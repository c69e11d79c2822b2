//! # Outcome Classification
//!
//! Maps a transport outcome onto the gateway's failure taxonomy and decides, per
//! class, whether it counts against the breaker and whether it may be retried.
//!
//! | Class            | Breaker failure | Retried                          |
//! |------------------|-----------------|----------------------------------|
//! | `Network`        | yes             | idempotent endpoints only        |
//! | `ServerError`    | yes             | idempotent endpoints only        |
//! | `ClientError`    | no              | never                            |
//! | `Unauthenticated`| no              | once, after a token refresh      |
//! | `RateLimited`    | no              | honoring `Retry-After`           |
//! | `Offline`        | no              | never                            |

use super::errors::GatewayErrorCode;
use crate::constants::headers;
use crate::transport::{NetworkError, TransportResponse};
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeClass {
    Success,
    Unauthenticated,
    RateLimited { retry_after: Option<Duration> },
    ClientError,
    ServerError,
    Network,
    /// The device itself has no connectivity
    Offline,
}

impl OutcomeClass {
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(self, Self::ServerError | Self::Network)
    }

    /// Eligible for retry with backoff, given the endpoint's idempotency
    pub fn is_retryable(&self, idempotent: bool) -> bool {
        match self {
            Self::ServerError | Self::Network => idempotent,
            // The request was refused unprocessed
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    pub fn error_code(&self) -> Option<GatewayErrorCode> {
        match self {
            Self::Success => None,
            Self::Unauthenticated => Some(GatewayErrorCode::Unauthenticated),
            Self::RateLimited { .. } => Some(GatewayErrorCode::RateLimited),
            Self::ClientError => Some(GatewayErrorCode::ClientError),
            Self::ServerError => Some(GatewayErrorCode::ServerError),
            Self::Network | Self::Offline => Some(GatewayErrorCode::Network),
        }
    }
}

pub fn classify(outcome: &Result<TransportResponse, NetworkError>, now: DateTime<Utc>) -> OutcomeClass {
    match outcome {
        Err(NetworkError::Offline) => OutcomeClass::Offline,
        Err(_) => OutcomeClass::Network,
        Ok(response) => classify_status(response, now),
    }
}

fn classify_status(response: &TransportResponse, now: DateTime<Utc>) -> OutcomeClass {
    match response.status {
        200..=299 => OutcomeClass::Success,
        401 => OutcomeClass::Unauthenticated,
        429 => OutcomeClass::RateLimited {
            retry_after: response
                .header(headers::RETRY_AFTER)
                .and_then(|value| parse_retry_after(value, now)),
        },
        500..=599 => OutcomeClass::ServerError,
        _ => OutcomeClass::ClientError,
    }
}

/// `Retry-After` as delta-seconds or an HTTP-date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    fn response(status: u16) -> Result<TransportResponse, NetworkError> {
        Ok(TransportResponse::new(status, Value::Null))
    }

    #[test]
    fn test_status_classes() {
        let now = Utc::now();
        assert_eq!(classify(&response(204), now), OutcomeClass::Success);
        assert_eq!(classify(&response(401), now), OutcomeClass::Unauthenticated);
        assert_eq!(classify(&response(404), now), OutcomeClass::ClientError);
        assert_eq!(classify(&response(422), now), OutcomeClass::ClientError);
        assert_eq!(classify(&response(503), now), OutcomeClass::ServerError);
        assert_eq!(
            classify(&Err(NetworkError::Timeout(Duration::from_secs(1))), now),
            OutcomeClass::Network
        );
        assert_eq!(classify(&Err(NetworkError::Offline), now), OutcomeClass::Offline);
    }

    #[test]
    fn test_breaker_and_retry_policy() {
        assert!(OutcomeClass::ServerError.counts_toward_breaker());
        assert!(!OutcomeClass::ClientError.counts_toward_breaker());
        assert!(!OutcomeClass::RateLimited { retry_after: None }.counts_toward_breaker());

        assert!(OutcomeClass::Network.is_retryable(true));
        assert!(!OutcomeClass::Network.is_retryable(false));
        assert!(OutcomeClass::RateLimited { retry_after: None }.is_retryable(false));
        assert!(!OutcomeClass::ClientError.is_retryable(true));
    }

    #[test]
    fn test_retry_after_forms() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();
        assert_eq!(parse_retry_after("3", now), Some(Duration::from_secs(3)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_rate_limit_reads_header() {
        let limited = Ok(TransportResponse::new(429, Value::Null).with_header("Retry-After", "2"));
        assert_eq!(
            classify(&limited, Utc::now()),
            OutcomeClass::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
    }
}
