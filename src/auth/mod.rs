// Authentication module
// Session state, credential storage and token lifecycle

pub mod claims;
pub mod federated;
pub mod guard;
mod manager;
mod refresh;
pub mod store;
pub mod types;

pub use guard::{guard, Gate, Route};
pub use manager::{MountedSession, SessionManager, DEFAULT_RECHECK_INTERVAL};
pub use store::{MemoryTokenStore, SqliteTokenStore, TokenStore};
pub use types::{Credential, RegistrationForm, Session, UserProfile};

/// First few characters of a token, safe to log
pub(crate) fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    if head.len() < token.len() {
        format!("{}...", head)
    } else {
        head
    }
}
