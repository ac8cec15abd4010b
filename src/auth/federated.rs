// Identity provider redirect parsing

use reqwest::Url;

use crate::error::LoginError;

/// Query parameter the backend's redirect carries the token in
pub const TOKEN_PARAM: &str = "access_token";

/// Pull the federated token out of a redirect URL
///
/// Accepts absolute URLs as well as a bare path and query
/// (`/auth/google/callback?access_token=...`).
pub fn extract_redirect_token(redirect_url: &str) -> Result<String, LoginError> {
    let base = Url::parse("http://localhost/").map_err(anyhow::Error::from)?;
    let url = Url::options()
        .base_url(Some(&base))
        .parse(redirect_url.trim())
        .map_err(|e| {
            tracing::warn!("Unparseable redirect URL: {}", e);
            LoginError::MissingToken
        })?;

    url.query_pairs()
        .find(|(key, _)| key == TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
        .ok_or(LoginError::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_token_from_absolute_url() {
        let token = extract_redirect_token(
            "https://shop.example.com/google/redirect?state=x&access_token=ya29.a0Af",
        )
        .unwrap();
        assert_eq!(token, "ya29.a0Af");
    }

    #[test]
    fn test_extracts_token_from_relative_url() {
        let token = extract_redirect_token("/google/redirect?access_token=abc%2Bdef").unwrap();
        assert_eq!(token, "abc+def");

        let token = extract_redirect_token("?access_token=xyz").unwrap();
        assert_eq!(token, "xyz");
    }

    #[test]
    fn test_missing_or_empty_token() {
        assert!(matches!(
            extract_redirect_token("https://shop.example.com/google/redirect"),
            Err(LoginError::MissingToken)
        ));
        assert!(matches!(
            extract_redirect_token("/google/redirect?access_token="),
            Err(LoginError::MissingToken)
        ));
        assert!(matches!(
            extract_redirect_token("http://[::1"),
            Err(LoginError::MissingToken)
        ));
    }
}
