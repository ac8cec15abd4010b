use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::claims;
use super::federated;
use super::refresh;
use super::store::{TokenStore, ACCESS_TOKEN, CREDENTIAL_KEYS, GOOGLE_ACCESS_TOKEN, REFRESH_TOKEN};
use super::token_preview;
use super::types::{Credential, RegistrationForm, Session, UserProfile};
use crate::error::LoginError;
use crate::http_client::BackendClient;

/// Re-check period used when none is configured
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Sequence numbers used to drop results that finished after a newer change
///
/// Background work (`check_auth`, `refresh_token`) takes a fresh `issued`
/// ticket and commits only if no later ticket was issued. Logins take a
/// snapshot of `user_epoch`, commit only if no login/logout landed in the
/// meantime, and bump `issued` so in-flight background work is discarded.
#[derive(Debug, Default)]
struct Tickets {
    issued: u64,
    user_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Background(u64),
    User(u64),
}

/// Client-side session manager
///
/// Owns the authentication state of the running client. The state is
/// rebuilt from the token store by `check_auth` and published through a
/// watch channel so the UI can gate rendering on it.
pub struct SessionManager {
    /// Persisted credentials
    store: Arc<dyn TokenStore>,

    /// Backend auth API
    backend: BackendClient,

    /// Current session; also the broadcast point for subscribers
    state: watch::Sender<Session>,

    tickets: Mutex<Tickets>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>, backend: BackendClient) -> Self {
        let (state, _) = watch::channel(Session::Unknown);
        Self {
            store,
            backend,
            state,
            tickets: Mutex::new(Tickets::default()),
        }
    }

    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.state.borrow().is_authorized()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.borrow().user().cloned()
    }

    /// Receive every committed session change
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Wait until the first check has settled the session
    pub async fn settled(&self) -> Session {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let session = match rx.wait_for(|session| !session.is_unknown()).await {
            Ok(session) => session.clone(),
            Err(_) => self.session(),
        };
        session
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    // === Tickets ===

    fn tickets(&self) -> MutexGuard<'_, Tickets> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue_background(&self) -> Guard {
        let mut tickets = self.tickets();
        tickets.issued += 1;
        Guard::Background(tickets.issued)
    }

    fn issue_user(&self) -> Guard {
        Guard::User(self.tickets().user_epoch)
    }

    /// Apply store writes and publish `session` if `guard` is still current
    ///
    /// Returns `Ok(false)` when the result is stale and was dropped.
    fn commit<F>(&self, guard: Guard, writes: F, session: Session) -> anyhow::Result<bool>
    where
        F: FnOnce(&dyn TokenStore, &BackendClient) -> anyhow::Result<()>,
    {
        let mut tickets = self.tickets();
        let current = match guard {
            Guard::Background(ticket) => ticket == tickets.issued,
            Guard::User(epoch) => epoch == tickets.user_epoch,
        };
        if !current {
            tracing::debug!(?guard, issued = tickets.issued, "Dropping stale session result");
            return Ok(false);
        }

        writes(self.store.as_ref(), &self.backend)?;

        if let Guard::User(_) = guard {
            tickets.user_epoch += 1;
            tickets.issued += 1;
        }
        self.state.send_replace(session);
        Ok(true)
    }

    /// Remove every stored credential and the default bearer header
    fn clear_credentials(&self) {
        for key in CREDENTIAL_KEYS {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!("Failed to clear {}: {:#}", key, e);
            }
        }
        self.backend.set_default_bearer(None);
    }

    /// Logout on behalf of a failed background check, unless it went stale
    fn expire(&self, guard: Guard, reason: &str) {
        let tickets = self.tickets();
        if let Guard::Background(ticket) = guard {
            if ticket != tickets.issued {
                tracing::debug!(ticket, reason, "Ignoring failure of stale session check");
                return;
            }
        }

        tracing::info!("Session ended: {}", reason);
        self.clear_credentials();
        self.state.send_replace(Session::Unauthorized);
    }

    // === Operations ===

    /// Rebuild the session from stored credentials
    ///
    /// Failures are absorbed; the outcome is visible only as the new state.
    pub async fn check_auth(&self) {
        let guard = self.issue_background();
        self.check_with(guard).await;
    }

    async fn check_with(&self, guard: Guard) {
        let stored = self
            .store
            .get(ACCESS_TOKEN)
            .and_then(|access| Ok((access, self.store.get(GOOGLE_ACCESS_TOKEN)?)));

        match stored {
            Ok((Some(access), _)) => self.check_access_token(guard, &access).await,
            Ok((None, Some(federated))) => self.check_federated_token(guard, &federated).await,
            Ok((None, None)) => self.expire(guard, "no stored credentials"),
            Err(e) => {
                tracing::warn!("Failed to read token store: {:#}", e);
                self.expire(guard, "token store unreadable");
            }
        }
    }

    async fn check_access_token(&self, guard: Guard, access: &str) {
        let claims = match claims::decode_claims(access) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!("Stored access token is unreadable: {}", e);
                return self.expire(guard, "undecodable access token");
            }
        };

        if claims.is_expired_at(Utc::now()) {
            tracing::info!("Access token expired at {:?}, refreshing", claims.expires_at());
            self.refresh_with(guard).await;
            return;
        }

        let profile = match self.backend.fetch_profile(access).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Profile fetch failed: {}", e);
                return self.expire(guard, "profile fetch failed");
            }
        };

        let bearer = access.to_string();
        let committed = self.commit(
            guard,
            |_, backend| {
                backend.set_default_bearer(Some(bearer));
                Ok(())
            },
            Session::Authorized(profile),
        );
        if let Ok(true) = committed {
            tracing::debug!("Access token {} still valid", token_preview(access));
        }
    }

    async fn check_federated_token(&self, guard: Guard, token: &str) {
        match self.backend.validate_federated(token).await {
            Ok(true) => {}
            Ok(false) => return self.expire(guard, "federated token rejected"),
            Err(e) => {
                tracing::warn!("Federated token validation failed: {}", e);
                return self.expire(guard, "federated token validation failed");
            }
        }

        match self.backend.fetch_profile(token).await {
            Ok(profile) => {
                match self.commit(guard, |_, _| Ok(()), Session::Authorized(profile)) {
                    Ok(true) => tracing::debug!("Federated token {} still valid", token_preview(token)),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Failed to commit federated session: {:#}", e);
                        self.expire(guard, "session commit failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Profile fetch failed: {}", e);
                self.expire(guard, "profile fetch failed");
            }
        }
    }

    /// Trade the stored refresh token for a new access token
    ///
    /// Returns `true` if the session is authorized with the new token. Any
    /// failure logs the session out.
    pub async fn refresh_token(&self) -> bool {
        let guard = self.issue_background();
        self.refresh_with(guard).await
    }

    async fn refresh_with(&self, guard: Guard) -> bool {
        let refresh_token = match self.store.get(REFRESH_TOKEN) {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.expire(guard, "no refresh token stored");
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to read refresh token: {:#}", e);
                self.expire(guard, "token store unreadable");
                return false;
            }
        };

        let data = match refresh::refresh_access_token(&self.backend, &refresh_token).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Token refresh failed: {:#}", e);
                self.expire(guard, "refresh rejected");
                return false;
            }
        };

        let profile = match self.backend.fetch_profile(&data.access_token).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Profile fetch after refresh failed: {}", e);
                self.expire(guard, "profile fetch failed");
                return false;
            }
        };

        let committed = self.commit(
            guard,
            |store, backend| {
                store.set(ACCESS_TOKEN, &data.access_token)?;
                // Update stored refresh token if the backend rotated it
                if let Some(ref rotated) = data.refresh_token {
                    store.set(REFRESH_TOKEN, rotated)?;
                }
                backend.set_default_bearer(Some(data.access_token.clone()));
                Ok(())
            },
            Session::Authorized(profile),
        );

        match committed {
            Ok(applied) => applied,
            Err(e) => {
                tracing::error!("Failed to store refreshed token: {:#}", e);
                self.expire(guard, "token store unwritable");
                false
            }
        }
    }

    /// Sign in with either credential flow
    ///
    /// Expected failures come back as `LoginError` and leave the session and
    /// the token store untouched.
    pub async fn login(&self, credential: Credential) -> Result<UserProfile, LoginError> {
        let guard = self.issue_user();
        tracing::info!(flow = credential.flow(), "Logging in");

        match credential {
            Credential::Password { username, password } => {
                let pair = self.backend.obtain_token(&username, &password).await?;
                let profile = self.backend.fetch_profile(&pair.access).await?;

                let committed = self.commit(
                    guard,
                    |store, backend| {
                        store.set(ACCESS_TOKEN, &pair.access)?;
                        store.set(REFRESH_TOKEN, &pair.refresh)?;
                        backend.set_default_bearer(Some(pair.access.clone()));
                        Ok(())
                    },
                    Session::Authorized(profile.clone()),
                )?;
                self.finish_login(committed, profile)
            }
            Credential::Federated { token } => {
                let profile = self.backend.fetch_profile(&token).await?;

                let committed = self.commit(
                    guard,
                    |store, _| store.set(GOOGLE_ACCESS_TOKEN, &token),
                    Session::Authorized(profile.clone()),
                )?;
                self.finish_login(committed, profile)
            }
        }
    }

    fn finish_login(&self, committed: bool, profile: UserProfile) -> Result<UserProfile, LoginError> {
        if !committed {
            tracing::warn!("Login result discarded: session changed while it was in flight");
            return Err(LoginError::Superseded);
        }
        tracing::info!("Logged in as {}", profile.username);
        Ok(profile)
    }

    /// Finish the identity provider redirect by logging in with its token
    pub async fn handle_federated_redirect(
        &self,
        redirect_url: &str,
    ) -> Result<UserProfile, LoginError> {
        let token = federated::extract_redirect_token(redirect_url)?;
        tracing::debug!("Redirect carried federated token {}", token_preview(&token));
        self.login(Credential::Federated { token }).await
    }

    /// Create an account; the session is not touched
    pub async fn register(&self, form: &RegistrationForm) -> Result<(), LoginError> {
        self.backend.register(form).await?;
        tracing::info!("Registered account {}", form.username);
        Ok(())
    }

    /// Clear all credentials and mark the session unauthorized
    ///
    /// Safe to call at any time, any number of times.
    pub fn logout(&self) {
        let mut tickets = self.tickets();
        tickets.user_epoch += 1;
        tickets.issued += 1;

        self.clear_credentials();
        self.state.send_replace(Session::Unauthorized);
        tracing::info!("Logged out");
    }

    // === Lifecycle ===

    /// Check now, then again every `interval`, until the handle is dropped
    pub fn mount(self: &Arc<Self>, interval: Duration) -> MountedSession {
        let period = if interval.is_zero() {
            DEFAULT_RECHECK_INTERVAL
        } else {
            interval
        };

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // First tick completes immediately
                ticker.tick().await;
                manager.check_auth().await;
            }
        });

        tracing::debug!("Session mounted, re-checking every {:?}", period);
        MountedSession {
            manager: Arc::clone(self),
            task,
        }
    }
}

/// A mounted session manager with its re-check timer running
///
/// Dropping the handle cancels the timer.
pub struct MountedSession {
    manager: Arc<SessionManager>,
    task: JoinHandle<()>,
}

impl MountedSession {
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the re-check timer; the session state is left as is
    pub fn unmount(self) {
        tracing::debug!("Session unmounted");
        // Drop aborts the task
    }
}

impl Drop for MountedSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}
