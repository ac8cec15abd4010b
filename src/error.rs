// Error handling module
// Defines backend, token and login error types

use thiserror::Error;

/// Errors from a single call to the storefront backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend answered with a non-success status
    #[error("Backend error: {status} - {message}")]
    Status { status: u16, message: String },

    /// No response was received
    #[error("Network error ({kind}): {message}")]
    Network { kind: &'static str, message: String },

    /// The response body could not be parsed
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Classify a transport error the same way for every endpoint
    pub fn from_transport(e: &reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection_failed"
        } else if e.is_request() {
            "request_error"
        } else if e.is_body() {
            "body_error"
        } else if e.is_decode() {
            return BackendError::Decode(e.to_string());
        } else {
            "unknown"
        };

        BackendError::Network {
            kind,
            message: e.to_string(),
        }
    }

    /// HTTP status of the failed response, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors decoding the claims of an access token
#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    /// Not three dot-separated segments
    #[error("Invalid token format")]
    Format,

    /// Payload segment is not base64url-encoded JSON claims
    #[error("Failed to decode token payload: {0}")]
    Payload(String),
}

/// Failures surfaced to the caller of `login`, `register` and the redirect handler
#[derive(Error, Debug)]
pub enum LoginError {
    /// 401 from the backend
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// 400 from the backend (validation failed or the account already exists)
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Any other error status
    #[error("Backend error: {status} - {message}")]
    Backend { status: u16, message: String },

    /// The request never got a response
    #[error("Network error: {0}")]
    Network(String),

    /// Redirect URL carried no access token
    #[error("No access token in redirect URL")]
    MissingToken,

    /// A newer login or logout was issued while this one was in flight
    #[error("Login superseded by a newer session change")]
    Superseded,

    /// Malformed responses and token store failures
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<BackendError> for LoginError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status: 401, .. } => LoginError::InvalidCredentials,
            BackendError::Status {
                status: 400,
                message,
            } => LoginError::Rejected(message),
            BackendError::Status { status, message } => LoginError::Backend { status, message },
            BackendError::Network { kind, message } => {
                LoginError::Network(format!("{} ({})", message, kind))
            }
            BackendError::Decode(msg) => {
                LoginError::Internal(anyhow::anyhow!("Malformed response: {}", msg))
            }
        }
    }
}

impl LoginError {
    /// Message the storefront shows next to the login/register form
    pub fn user_message(&self) -> &'static str {
        match self {
            LoginError::InvalidCredentials => "Invalid credentials",
            LoginError::Rejected(_) => "Username already exists",
            LoginError::Network(_) => "Network error. Please check your internet connection.",
            LoginError::MissingToken => "Login failed. Please check your credentials.",
            _ => "Something went wrong. Please try again.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BackendError::Status {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Backend error: 503 - Service unavailable");
        assert_eq!(err.status(), Some(503));

        let err = BackendError::Network {
            kind: "timeout",
            message: "operation timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Network error (timeout): operation timed out");
        assert_eq!(err.status(), None);

        assert_eq!(TokenError::Format.to_string(), "Invalid token format");
    }

    #[test]
    fn test_login_error_from_status() {
        let err: LoginError = BackendError::Status {
            status: 401,
            message: "No active account".to_string(),
        }
        .into();
        assert!(matches!(err, LoginError::InvalidCredentials));

        let err: LoginError = BackendError::Status {
            status: 400,
            message: "username exists".to_string(),
        }
        .into();
        assert!(matches!(err, LoginError::Rejected(ref m) if m == "username exists"));

        let err: LoginError = BackendError::Status {
            status: 502,
            message: String::new(),
        }
        .into();
        assert!(matches!(err, LoginError::Backend { status: 502, .. }));
    }

    #[test]
    fn test_network_and_decode_are_distinct() {
        let err: LoginError = BackendError::Network {
            kind: "connection_failed",
            message: "refused".to_string(),
        }
        .into();
        assert!(matches!(err, LoginError::Network(_)));

        let err: LoginError = BackendError::Decode("missing field `access`".to_string()).into();
        assert!(matches!(err, LoginError::Internal(_)));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            LoginError::InvalidCredentials.user_message(),
            "Invalid credentials"
        );
        assert_eq!(
            LoginError::Rejected(String::new()).user_message(),
            "Username already exists"
        );
        assert_eq!(
            LoginError::Network(String::new()).user_message(),
            "Network error. Please check your internet connection."
        );
        assert_eq!(
            LoginError::Backend {
                status: 500,
                message: String::new()
            }
            .user_message(),
            "Something went wrong. Please try again."
        );
        assert_eq!(
            LoginError::Superseded.user_message(),
            "Something went wrong. Please try again."
        );
    }
}
