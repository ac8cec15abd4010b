// Access token claim decoding
//
// Only the payload is read. The signature is not verified here; the backend
// stays the authority through the profile fetch and refresh calls.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::TokenError;

/// Claims the session manager reads from a password-flow access token
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    /// Expiry, seconds since the epoch
    #[serde(deserialize_with = "whole_seconds")]
    pub exp: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

impl AccessClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// True once `now` has passed the expiry claim
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.saturating_mul(1000) < now.timestamp_millis()
    }
}

/// Some issuers write `exp` as a float; keep the whole seconds
fn whole_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = f64::deserialize(deserializer)?;
    Ok(seconds.floor() as i64)
}

/// Decode the claims segment of a `header.payload.signature` token
pub fn decode_claims(token: &str) -> Result<AccessClaims, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Format);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| TokenError::Payload(e.to_string()))?;

    serde_json::from_slice(&payload).map_err(|e| TokenError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decode_claims() {
        let token = token_with_payload(
            r#"{"token_type":"access","exp":1736503600,"iat":1736500000,"jti":"abc","user_id":12}"#,
        );
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.exp, 1736503600);
        assert_eq!(claims.token_type.as_deref(), Some("access"));
        assert_eq!(claims.user_id, Some(serde_json::json!(12)));
        assert_eq!(
            claims.expires_at().unwrap().to_rfc3339(),
            "2025-01-10T10:06:40+00:00"
        );
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert_eq!(decode_claims("not-a-token").unwrap_err(), TokenError::Format);
        assert_eq!(decode_claims("a.b.c.d").unwrap_err(), TokenError::Format);
        assert!(matches!(
            decode_claims("a.!!!.c"),
            Err(TokenError::Payload(_))
        ));

        // Valid base64 but no exp claim
        let token = token_with_payload(r#"{"user_id":1}"#);
        assert!(matches!(decode_claims(&token), Err(TokenError::Payload(_))));
    }

    #[test]
    fn test_float_exp_is_floored() {
        let token = token_with_payload(r#"{"exp":1736503600.0}"#);
        assert_eq!(decode_claims(&token).unwrap().exp, 1736503600);

        let token = token_with_payload(r#"{"exp":1736503600.75}"#);
        assert_eq!(decode_claims(&token).unwrap().exp, 1736503600);

        let token = token_with_payload(r#"{"exp":"1736503600"}"#);
        assert!(matches!(decode_claims(&token), Err(TokenError::Payload(_))));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_claims(&token).unwrap().exp, 1);
    }

    #[test]
    fn test_expiry_comparison() {
        let now = Utc::now();
        let past = AccessClaims {
            exp: (now - Duration::seconds(60)).timestamp(),
            token_type: None,
            user_id: None,
        };
        let future = AccessClaims {
            exp: (now + Duration::seconds(600)).timestamp(),
            token_type: None,
            user_id: None,
        };
        assert!(past.is_expired_at(now));
        assert!(!future.is_expired_at(now));
    }
}
