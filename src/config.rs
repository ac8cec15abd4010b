use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use reqwest::Url;
use std::path::PathBuf;

use crate::auth::RegistrationForm;
use crate::http_client::{DEFAULT_REGISTER_PATH, DEFAULT_VALIDATE_PATH};

/// Storefront session manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the storefront backend
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Path to the SQLite token store
    #[arg(short = 's', long, env = "TOKEN_STORE_FILE")]
    pub store_file: Option<String>,

    /// Seconds between background session checks
    #[arg(long, env = "RECHECK_INTERVAL", default_value = "300")]
    pub recheck_interval: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "10")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check stored credentials once and print the session
    Status,

    /// Log in with username and password
    Login {
        /// Prompted for when omitted
        #[arg(long)]
        username: Option<String>,
    },

    /// Clear all stored credentials
    Logout,

    /// Complete a federated login from the identity provider redirect URL
    Redirect { url: String },

    /// Create a new account
    Register {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Keep the session mounted and print every change until Ctrl+C
    Watch,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_base_url: String,
    pub validate_token_path: String,
    pub register_path: String,

    // Token store
    pub token_store_file: PathBuf,

    // Timing
    pub recheck_interval: u64,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let config = Config {
            api_base_url: args.api_url.trim().to_string(),

            validate_token_path: std::env::var("VALIDATE_TOKEN_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_VALIDATE_PATH.to_string()),

            register_path: std::env::var("REGISTER_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_REGISTER_PATH.to_string()),

            token_store_file: args
                .store_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_token_store_path),

            recheck_interval: args.recheck_interval,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Load `.env`, parse the command line and build the configuration
    pub fn load() -> Result<(Self, Command)> {
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command.unwrap_or(Command::Status)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.api_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("API_BASE_URL must use http or https: {}", self.api_base_url);
        }

        if self.recheck_interval == 0 {
            anyhow::bail!("RECHECK_INTERVAL must be at least 1 second");
        }
        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be at least 1 second");
        }

        for path in [&self.validate_token_path, &self.register_path] {
            if !path.starts_with('/') {
                anyhow::bail!("Endpoint paths must start with '/': {}", path);
            }
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Token store location when none is configured
fn default_token_store_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("storefront-session").join("tokens.sqlite3"))
        .unwrap_or_else(|| PathBuf::from("tokens.sqlite3"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("storefront-session").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_from_args() {
        let args = parse(&[
            "--api-url",
            "https://shop.example.com",
            "--store-file",
            "/tmp/tokens.db",
            "--recheck-interval",
            "60",
            "login",
            "--username",
            "rahim",
        ]);
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.api_base_url, "https://shop.example.com");
        assert_eq!(config.token_store_file, PathBuf::from("/tmp/tokens.db"));
        assert_eq!(config.recheck_interval, 60);
        assert_eq!(
            args.command,
            Some(Command::Login {
                username: Some("rahim".to_string())
            })
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_default_store_path() {
        let path = default_token_store_path();
        assert!(path.ends_with("tokens.sqlite3"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = Config::from_args(&parse(&["--store-file", "/tmp/t.db"])).unwrap();
        base.validate().unwrap();

        let mut config = base.clone();
        config.api_base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.api_base_url = "ftp://shop.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.recheck_interval = 0;
        assert!(config.validate().is_err());

        let mut config = base;
        config.register_path = "api/user/register/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redirect_command() {
        let args = parse(&["redirect", "https://shop.example.com/cb?access_token=x"]);
        assert_eq!(
            args.command,
            Some(Command::Redirect {
                url: "https://shop.example.com/cb?access_token=x".to_string()
            })
        );
    }
}

// === Interactive Prompts ===

/// Ask for whatever login fields were not given on the command line
pub fn prompt_login(username: Option<String>) -> Result<(String, String)> {
    let username = match username {
        Some(username) => username,
        None => Input::new()
            .with_prompt("Username")
            .interact_text()
            .context("Failed to read username")?,
    };

    let password = Password::new()
        .with_prompt("Password")
        .interact()
        .context("Failed to read password")?;

    Ok((username, password))
}

/// Collect the registration form
pub fn prompt_registration(
    username: Option<String>,
    email: Option<String>,
) -> Result<RegistrationForm> {
    let first_name: String = Input::new()
        .with_prompt("First name")
        .interact_text()
        .context("Failed to read first name")?;
    let last_name: String = Input::new()
        .with_prompt("Last name")
        .interact_text()
        .context("Failed to read last name")?;

    let email = match email {
        Some(email) => email,
        None => Input::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };

    let (username, password) = prompt_login(username)?;
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    Ok(RegistrationForm {
        username,
        password,
        email,
        first_name,
        last_name,
    })
}
