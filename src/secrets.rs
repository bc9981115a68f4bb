//! Secret lookup from Azure Key Vault.
//!
//! Vault tokens come from a user-assigned managed identity when one is
//! configured, falling back to the default credential (service principal
//! from the environment, otherwise the ambient managed identity) when that
//! identity fails to authenticate.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::MonitorError;

const VAULT_API_VERSION: &str = "7.4";
const VAULT_RESOURCE: &str = "https://vault.azure.net";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// Resolves named secrets from an external store.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String>;
}

/// How a vault access token is obtained.
#[derive(Debug, Clone)]
enum Credential {
    ManagedIdentity {
        client_id: Option<String>,
    },
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

/// Where managed identity tokens are issued.
#[derive(Debug, Clone)]
enum IdentityEndpoint {
    /// Instance metadata service (VMs, AKS).
    Imds(String),
    /// App Service / Container Apps local identity endpoint.
    Hosted { endpoint: String, header: String },
}

/// Failure while reading a secret. Only `Auth` is eligible for the
/// default-credential fallback.
enum ReadError {
    Auth(anyhow::Error),
    Other(anyhow::Error),
}

impl ReadError {
    fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Auth(e) | Self::Other(e) => e,
        }
    }
}

pub struct KeyVault {
    vault_url: String,
    identity_client_id: Option<String>,
    default_credential: Credential,
    identity_endpoint: IdentityEndpoint,
    login_base: String,
    http: reqwest::Client,
}

impl KeyVault {
    /// `vault` is either a vault URL or a bare vault name.
    pub fn new(vault: &str, identity_client_id: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            vault_url: normalize_vault_url(vault),
            identity_client_id: identity_client_id.filter(|id| !id.is_empty()),
            default_credential: default_credential_from_env(),
            identity_endpoint: identity_endpoint_from_env(),
            login_base: LOGIN_BASE.to_string(),
            http,
        })
    }

    async fn read_with(&self, credential: &Credential, name: &str) -> Result<String, ReadError> {
        let token = self
            .acquire_token(credential)
            .await
            .map_err(ReadError::Auth)?;

        let resp = self
            .http
            .get(format!("{}/secrets/{name}", self.vault_url))
            .query(&[("api-version", VAULT_API_VERSION)])
            .bearer_auth(&token)
            .send()
            .await
            .context("Failed to contact Key Vault")
            .map_err(ReadError::Other)?;

        match resp.status() {
            s if s.is_success() => {
                #[derive(Deserialize)]
                struct SecretBundle {
                    value: String,
                }

                let bundle: SecretBundle = resp
                    .json()
                    .await
                    .context("Failed to parse Key Vault response")
                    .map_err(ReadError::Other)?;
                Ok(bundle.value)
            }
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                let body = resp.text().await.unwrap_or_default();
                Err(ReadError::Auth(anyhow::anyhow!(
                    "Key Vault rejected the credential ({status}): {body}"
                )))
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ReadError::Other(anyhow::anyhow!(
                    "Key Vault error ({status}): {body}"
                )))
            }
        }
    }

    async fn acquire_token(&self, credential: &Credential) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let request = match credential {
            Credential::ManagedIdentity { client_id } => {
                let mut params = vec![("resource", VAULT_RESOURCE)];
                if let Some(id) = client_id {
                    params.push(("client_id", id.as_str()));
                }
                match &self.identity_endpoint {
                    IdentityEndpoint::Imds(endpoint) => {
                        params.push(("api-version", "2018-02-01"));
                        self.http
                            .get(endpoint)
                            .header("Metadata", "true")
                            .query(&params)
                    }
                    IdentityEndpoint::Hosted { endpoint, header } => {
                        params.push(("api-version", "2019-08-01"));
                        self.http
                            .get(endpoint)
                            .header("X-IDENTITY-HEADER", header)
                            .query(&params)
                    }
                }
            }
            Credential::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => self
                .http
                .post(format!("{}/{tenant_id}/oauth2/v2.0/token", self.login_base))
                .form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", "https://vault.azure.net/.default"),
                ]),
        };

        let resp = request
            .send()
            .await
            .context("Failed to contact identity endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Identity token request failed ({status}): {body}");
        }

        let token: TokenResponse = resp
            .json()
            .await
            .context("Failed to parse identity token response")?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SecretProvider for KeyVault {
    async fn get_secret(&self, name: &str) -> Result<String> {
        if let Some(client_id) = &self.identity_client_id {
            let credential = Credential::ManagedIdentity {
                client_id: Some(client_id.clone()),
            };
            match self.read_with(&credential, name).await {
                Ok(value) => return Ok(value),
                Err(ReadError::Auth(e)) => {
                    tracing::error!(
                        client_id = %client_id,
                        "managed identity authentication failed: {e:#}"
                    );
                    tracing::info!("falling back to default credential for Key Vault");
                }
                Err(ReadError::Other(e)) => return Err(secret_error(name, e)),
            }
        }

        match self.read_with(&self.default_credential, name).await {
            Ok(value) => {
                tracing::debug!(secret = name, "secret resolved");
                Ok(value)
            }
            Err(ReadError::Auth(e)) => {
                tracing::error!("default authentication failed: {e:#}");
                Err(secret_error(name, e))
            }
            Err(other) => Err(secret_error(name, other.into_inner())),
        }
    }
}

fn secret_error(name: &str, err: anyhow::Error) -> anyhow::Error {
    MonitorError::SecretAccess {
        name: name.to_string(),
        reason: format!("{err:#}"),
    }
    .into()
}

/// `my-vault` → `https://my-vault.vault.azure.net`; URLs lose a trailing slash.
fn normalize_vault_url(vault: &str) -> String {
    let vault = vault.trim().trim_end_matches('/');
    if vault.contains("://") {
        vault.to_string()
    } else {
        format!("https://{vault}.vault.azure.net")
    }
}

fn default_credential_from_env() -> Credential {
    let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    match (
        var("AZURE_TENANT_ID"),
        var("AZURE_CLIENT_ID"),
        var("AZURE_CLIENT_SECRET"),
    ) {
        (Some(tenant_id), Some(client_id), Some(client_secret)) => Credential::ServicePrincipal {
            tenant_id,
            client_id,
            client_secret,
        },
        _ => Credential::ManagedIdentity { client_id: None },
    }
}

fn identity_endpoint_from_env() -> IdentityEndpoint {
    match (
        std::env::var("IDENTITY_ENDPOINT"),
        std::env::var("IDENTITY_HEADER"),
    ) {
        (Ok(endpoint), Ok(header)) => IdentityEndpoint::Hosted { endpoint, header },
        _ => IdentityEndpoint::Imds(IMDS_ENDPOINT.to_string()),
    }
}
