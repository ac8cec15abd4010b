// Token refresh logic

use anyhow::{Context, Result};

use super::claims;
use super::types::TokenData;
use super::token_preview;
use crate::http_client::BackendClient;

/// Exchange a refresh token for a new access token
///
/// The new access token must carry a readable expiry claim; one that does
/// not is treated as a failed refresh.
pub async fn refresh_access_token(backend: &BackendClient, refresh_token: &str) -> Result<TokenData> {
    tracing::info!("Refreshing access token...");

    let data = backend
        .refresh_access(refresh_token)
        .await
        .context("Refresh request failed")?;

    if data.access.is_empty() {
        anyhow::bail!("Refresh response does not contain an access token");
    }

    let claims = claims::decode_claims(&data.access)
        .context("Refreshed access token has unreadable claims")?;
    let expires_at = claims
        .expires_at()
        .context("Refreshed access token has an out-of-range expiry")?;

    tracing::info!(
        "Token refreshed ({}), expires: {}",
        token_preview(&data.access),
        expires_at.to_rfc3339()
    );

    Ok(TokenData {
        access_token: data.access,
        refresh_token: data.refresh,
        expires_at,
    })
}
