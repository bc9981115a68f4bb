mod authorizer;
mod browser;
mod token;

pub use authorizer::{AuthorizationRequest, InteractiveAuthorizer};
pub use browser::WebDriverAuthorizer;
pub use token::TokenState;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::config::HoneywellConfig;
use crate::secrets::SecretProvider;
use token::Grant;

/// Honeywell account and OAuth client credentials, read once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub async fn resolve(secrets: &dyn SecretProvider, config: &HoneywellConfig) -> Result<Self> {
        Ok(Self {
            client_id: secrets.get_secret(&config.api_key_secret).await?,
            client_secret: secrets.get_secret(&config.client_secret_secret).await?,
            username: secrets.get_secret(&config.username_secret).await?,
            password: secrets.get_secret(&config.password_secret).await?,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
}

impl From<&HoneywellConfig> for OAuthEndpoints {
    fn from(config: &HoneywellConfig) -> Self {
        Self {
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }
}

/// Keeps a valid Honeywell access token.
///
/// A `TokenManager` only exists once the interactive authorization has
/// succeeded; after that the access token is refreshed in place whenever
/// it is found expired.
pub struct TokenManager {
    credentials: Credentials,
    endpoints: OAuthEndpoints,
    state: TokenState,
    http: reqwest::Client,
}

impl TokenManager {
    /// Run the interactive login once and exchange the resulting code for tokens.
    pub async fn initialize(
        credentials: Credentials,
        endpoints: OAuthEndpoints,
        authorizer: &dyn InteractiveAuthorizer,
    ) -> Result<Self> {
        tracing::info!("initializing tokens");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        let request = AuthorizationRequest {
            authorize_url: &endpoints.authorize_url,
            client_id: &credentials.client_id,
            redirect_uri: &endpoints.redirect_uri,
            username: &credentials.username,
            password: &credentials.password,
        };
        let code = authorizer
            .authorize(&request)
            .await
            .context("Interactive authorization failed")?;
        tracing::debug!("authorization code received");

        let state = token::request_tokens(
            &http,
            &endpoints.token_url,
            &credentials.client_id,
            &credentials.client_secret,
            Grant::AuthorizationCode {
                code: &code,
                redirect_uri: &endpoints.redirect_uri,
            },
        )
        .await?;
        tracing::info!(expires_at = %state.expires_at, "access token issued");

        Ok(Self {
            credentials,
            endpoints,
            state,
            http,
        })
    }

    /// Get a valid access token, refreshing first if it has expired.
    pub async fn ensure_valid_token(&mut self) -> Result<&str> {
        self.ensure_valid_token_at(Utc::now()).await
    }

    pub async fn ensure_valid_token_at(&mut self, now: DateTime<Utc>) -> Result<&str> {
        if !self.state.is_valid_at(now) {
            tracing::debug!(expired_at = %self.state.expires_at, "access token expired, refreshing");
            self.state = token::request_tokens(
                &self.http,
                &self.endpoints.token_url,
                &self.credentials.client_id,
                &self.credentials.client_secret,
                Grant::RefreshToken(&self.state.refresh_token),
            )
            .await?;
            tracing::info!(expires_at = %self.state.expires_at, "access token refreshed");
        }
        Ok(&self.state.access_token)
    }

    /// The Honeywell API key, which is the OAuth client id.
    pub fn api_key(&self) -> &str {
        &self.credentials.client_id
    }

    pub fn state(&self) -> &TokenState {
        &self.state
    }
}
