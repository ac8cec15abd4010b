// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Credentials supplied to `login`
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    /// Username and password posted to the token endpoint
    Password { username: String, password: String },

    /// Bearer token handed back by the external identity provider redirect
    Federated { token: String },
}

impl Credential {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn federated(token: impl Into<String>) -> Self {
        Credential::Federated {
            token: token.into(),
        }
    }

    /// Flow name used in logs
    pub fn flow(&self) -> &'static str {
        match self {
            Credential::Password { .. } => "password",
            Credential::Federated { .. } => "federated",
        }
    }
}

/// The client's current belief about who is signed in
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Session {
    /// No check has completed yet
    #[default]
    Unknown,

    /// A credential was accepted and the profile loaded
    Authorized(UserProfile),

    /// No usable credential
    Unauthorized,
}

impl Session {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Session::Authorized(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Session::Unknown)
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Session::Authorized(user) => Some(user),
            _ => None,
        }
    }
}

/// User record returned by `/api/auth/user/`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub date_joined: Option<String>,

    /// Fields this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// "First Last", falling back to the username
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }

    pub fn joined_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.date_joined.as_deref()?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                tracing::debug!("Unparseable date_joined {:?}: {}", raw, e);
                None
            }
        }
    }
}

/// Fields collected by the registration form
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationForm {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Token issuance request
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Token issuance response
#[derive(Debug, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Refresh request
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Refresh response; `refresh` is present only when the backend rotates refresh tokens
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Federated token validation request
#[derive(Serialize)]
pub struct ValidateRequest<'a> {
    pub access_token: &'a str,
}

/// Federated token validation response
#[derive(Debug, Deserialize)]
pub struct ValidateResponse {
    #[serde(default)]
    pub valid: bool,
}

/// Result of a successful refresh
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}
