use axum::{
    extract::{ Request, State },
    http::{ HeaderMap, StatusCode },
    middleware::Next,
    response::{ IntoResponse, Response },
};
use chrono::Utc;
use hmac::{ Hmac, Mac };
use log::warn;
use sha2::Sha256;
use thiserror::Error;

use super::api::AppState;

type HmacSha256 = Hmac<Sha256>;

const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing ts/sig")]
    Missing,
    #[error("timestamp out of range")]
    TimestampOutOfRange,
    #[error("bad signature")]
    BadSignature,
}

/// Hex HMAC-SHA256 of the timestamp, keyed by the shared secret.
pub fn sign(secret: &str, ts: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(ts.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify(secret: &str, ts: Option<&str>, sig: Option<&str>, now: i64) -> Result<(), AuthError> {
    let (Some(ts), Some(sig)) = (ts, sig) else {
        return Err(AuthError::Missing);
    };
    let ts_i: i64 = ts.parse().unwrap_or(0);
    if (now - ts_i).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(AuthError::TimestampOutOfRange);
    }
    let provided = hex::decode(sig).map_err(|_| AuthError::BadSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::BadSignature)?;
    mac.update(ts.as_bytes());
    mac.verify_slice(&provided).map_err(|_| AuthError::BadSignature)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Rejects requests without a valid X-Api-Ts / X-Api-Sign pair when the
/// server has a shared secret configured.
pub async fn require_signature(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(secret) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    let headers = req.headers();
    match verify(secret, header(headers, "X-Api-Ts"), header(headers, "X-Api-Sign"), Utc::now().timestamp()) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            warn!("Rejected {} {}: {}", req.method(), req.uri().path(), e);
            (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_passes() {
        let sig = sign("s3cret", "1700000000");
        assert_eq!(verify("s3cret", Some("1700000000"), Some(&sig), 1700000100), Ok(()));
    }

    #[test]
    fn rejects_old_timestamp_wrong_key_and_missing_fields() {
        let sig = sign("s3cret", "1700000000");
        assert_eq!(
            verify("s3cret", Some("1700000000"), Some(&sig), 1700000301),
            Err(AuthError::TimestampOutOfRange)
        );
        assert_eq!(
            verify("other", Some("1700000000"), Some(&sig), 1700000000),
            Err(AuthError::BadSignature)
        );
        assert_eq!(verify("s3cret", None, Some(&sig), 0), Err(AuthError::Missing));
        assert_eq!(
            verify("s3cret", Some("1700000000"), Some("zz"), 1700000000),
            Err(AuthError::BadSignature)
        );
    }
}
