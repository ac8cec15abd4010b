use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use storefront_session::auth::{
    guard, Credential, Gate, Route, Session, SessionManager, SqliteTokenStore,
};
use storefront_session::config::{self, Command, Config};
use storefront_session::http_client::BackendClient;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?command, "Starting storefront session");
    tracing::debug!(
        "Backend: {}, token store: {}",
        config.api_base_url,
        config.token_store_file.display()
    );

    let store = Arc::new(SqliteTokenStore::open(&config.token_store_file)?);
    let backend = BackendClient::new(
        &config.api_base_url,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?
    .with_validate_path(config.validate_token_path.clone())
    .with_register_path(config.register_path.clone());

    let manager = Arc::new(SessionManager::new(store, backend));

    match command {
        Command::Status => {
            let mounted = manager.mount(Duration::from_secs(config.recheck_interval));
            let session = mounted.manager().settled().await;
            mounted.unmount();
            print_session(&session);
        }

        Command::Login { username } => {
            let (username, password) = config::prompt_login(username)?;
            match manager.login(Credential::password(username, password)).await {
                Ok(user) => println!("Logged in as {}", user.display_name()),
                Err(e) => {
                    tracing::debug!("Login failed: {}", e);
                    anyhow::bail!("{}", e.user_message());
                }
            }
        }

        Command::Logout => {
            manager.logout();
            println!("Logged out");
        }

        Command::Redirect { url } => {
            let outcome = manager.handle_federated_redirect(&url).await;
            let target = guard::after_login(&outcome);
            match outcome {
                Ok(user) => println!("Logged in as {} -> {}", user.display_name(), target),
                Err(e) => {
                    tracing::warn!("Federated login failed: {}", e);
                    println!("{} -> {}", e.user_message(), target);
                }
            }
        }

        Command::Register { username, email } => {
            let form = config::prompt_registration(username, email)?;
            match manager.register(&form).await {
                Ok(()) => println!("Registration successful. Please login."),
                Err(e) => anyhow::bail!("{}", e.user_message()),
            }
        }

        Command::Watch => watch(manager, config.recheck_interval).await?,
    }

    Ok(())
}

/// Keep the session mounted and report each change until shutdown
async fn watch(manager: Arc<SessionManager>, interval: u64) -> Result<()> {
    let mut changes = manager.subscribe();
    let mounted = manager.mount(Duration::from_secs(interval));
    tracing::info!("Watching session, re-checking every {}s", interval);

    let report = async {
        while changes.changed().await.is_ok() {
            let session = changes.borrow_and_update().clone();
            print_session(&session);
        }
    };

    tokio::select! {
        _ = report => tracing::warn!("Session manager went away"),
        _ = shutdown_signal() => {}
    }

    if !mounted.is_running() {
        tracing::warn!("Re-check timer had already stopped");
    }
    mounted.unmount();
    tracing::info!("Session watch stopped");
    Ok(())
}

fn print_session(session: &Session) {
    match session {
        Session::Authorized(user) => {
            let role = if user.is_staff { "staff" } else { "customer" };
            match user.joined_at() {
                Some(joined) => println!(
                    "Authorized as {} ({}, member since {})",
                    user.display_name(),
                    role,
                    joined.format("%Y-%m-%d")
                ),
                None => println!("Authorized as {} ({})", user.display_name(), role),
            }
        }
        Session::Unauthorized => println!("Not logged in"),
        Session::Unknown => println!("Checking session..."),
    }

    if let Gate::Redirect(target) = guard(session, Route::Protected) {
        tracing::debug!("Protected pages would redirect to {}", target);
    }
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
