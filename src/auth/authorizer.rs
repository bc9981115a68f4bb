use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

use crate::error::MonitorError;

/// Everything a login needs to produce an authorization code.
pub struct AuthorizationRequest<'a> {
    pub authorize_url: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl AuthorizationRequest<'_> {
    /// Authorization endpoint URL with `response_type=code`.
    pub fn url(&self) -> Result<Url> {
        Url::parse_with_params(
            self.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id),
                ("redirect_uri", self.redirect_uri),
            ],
        )
        .with_context(|| format!("Invalid authorize URL: {}", self.authorize_url))
    }
}

impl std::fmt::Debug for AuthorizationRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("authorize_url", &self.authorize_url)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Produces an authorization code by completing the vendor's interactive login.
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync {
    async fn authorize(&self, request: &AuthorizationRequest<'_>) -> Result<String>;
}

/// The page operations the Honeywell login script needs.
///
/// Every wait is bounded by the session's timeout.
#[async_trait]
pub trait LoginSession: Send {
    async fn open(&mut self, url: &Url) -> Result<()>;
    /// Wait for an element, then type into it. `submit` presses Enter afterwards.
    async fn fill(&mut self, selector: &str, text: &str, submit: bool) -> Result<()>;
    /// Wait for an element, then click it.
    async fn click(&mut self, selector: &str) -> Result<()>;
    /// Wait briefly for `item` rows, then click each row whose `checkbox` is
    /// unchecked until it reports checked. Returns the row count, which may be zero.
    async fn check_all(&mut self, item: &str, checkbox: &str) -> Result<usize>;
    /// Wait until the browser lands on a URL starting with `prefix`.
    async fn wait_for_redirect(&mut self, prefix: &str) -> Result<Url>;
    async fn close(self: Box<Self>) -> Result<()>;
}

/// CSS selectors for the hosted login and consent pages.
#[derive(Debug, Clone)]
pub struct LoginSelectors {
    pub username: &'static str,
    pub password: &'static str,
    pub allow: &'static str,
    pub device_item: &'static str,
    pub device_checkbox: &'static str,
    pub connect: &'static str,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            username: "input[name='username']",
            password: "input[name='password']",
            allow: ".allowButton",
            device_item: ".flexbox-wrapper-item",
            device_checkbox: "input",
            connect: ".connect",
        }
    }
}

/// Drive the login script, then close the session whatever the outcome.
pub async fn run_login_flow(
    mut session: Box<dyn LoginSession>,
    request: &AuthorizationRequest<'_>,
    selectors: &LoginSelectors,
) -> Result<String> {
    let result = drive(&mut *session, request, selectors).await;

    if let Err(e) = session.close().await {
        tracing::warn!("failed to close browser session: {e:#}");
    }

    let redirect = result?;
    extract_code(&redirect)
}

async fn drive(
    session: &mut dyn LoginSession,
    request: &AuthorizationRequest<'_>,
    selectors: &LoginSelectors,
) -> Result<Url> {
    let url = request.url()?;
    tracing::debug!(url = %url, "opening authorization page");
    session.open(&url).await?;

    session.fill(selectors.username, request.username, false).await?;
    session.fill(selectors.password, request.password, true).await?;
    tracing::debug!("credentials submitted, waiting for consent screen");

    session.click(selectors.allow).await?;

    let devices = session
        .check_all(selectors.device_item, selectors.device_checkbox)
        .await?;
    tracing::debug!(devices, "devices selected for access");

    session.click(selectors.connect).await?;
    session.wait_for_redirect(request.redirect_uri).await
}

/// Pull the `code` query parameter out of the final redirect URL.
pub fn extract_code(redirect: &Url) -> Result<String> {
    let params: HashMap<_, _> = redirect.query_pairs().collect();

    if let Some(error) = params.get("error") {
        let desc = params
            .get("error_description")
            .map(|s| s.as_ref())
            .unwrap_or("no details");
        return Err(MonitorError::Authorization(format!("login denied: {error} ({desc})")).into());
    }

    match params.get("code") {
        Some(code) if !code.is_empty() => Ok(code.to_string()),
        _ => {
            tracing::error!("authorization code not found in redirect URL");
            Err(MonitorError::Authorization(
                "authorization code not found in redirect URL".into(),
            )
            .into())
        }
    }
}

/// Turn a wait timeout into an authorization failure naming what was awaited.
pub fn timed_out(what: &str, timeout: Duration) -> anyhow::Error {
    MonitorError::Authorization(format!("timed out after {timeout:?} waiting for {what}")).into()
}
