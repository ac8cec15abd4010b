// Storefront session manager - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;

pub use auth::{Credential, Session, SessionManager, UserProfile};
pub use error::{BackendError, LoginError};
