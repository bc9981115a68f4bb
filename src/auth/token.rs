use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::MonitorError;

/// Current token pair and the instant the access token stops being valid.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    /// Valid strictly before `expires_at`, with no skew margin.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Body of a successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Honeywell sends this as a string; other servers as a number.
    #[serde(deserialize_with = "seconds_from_string_or_number")]
    expires_in: f64,
}

impl TokenResponse {
    fn into_state(self, issued_at: DateTime<Utc>) -> Result<TokenState> {
        if !self.expires_in.is_finite() || self.expires_in < 0.0 {
            return Err(MonitorError::TokenExchange(format!(
                "invalid expires_in: {}",
                self.expires_in
            ))
            .into());
        }
        // Saturate lifetimes past the representable range.
        let lifetime_ms = (self.expires_in * 1000.0).round() as i64;
        let expires_at = chrono::TimeDelta::try_milliseconds(lifetime_ms)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(TokenState {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        })
    }
}

/// A form grant sent to the token endpoint.
pub enum Grant<'a> {
    AuthorizationCode {
        code: &'a str,
        redirect_uri: &'a str,
    },
    RefreshToken(&'a str),
}

impl Grant<'_> {
    fn form(&self) -> Vec<(&str, &str)> {
        match self {
            Grant::AuthorizationCode { code, redirect_uri } => vec![
                ("grant_type", "authorization_code"),
                ("code", *code),
                ("redirect_uri", *redirect_uri),
            ],
            Grant::RefreshToken(refresh_token) => vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", *refresh_token),
            ],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization code",
            Grant::RefreshToken(_) => "refresh token",
        }
    }
}

/// POST a grant to the token endpoint with HTTP Basic client authentication.
pub async fn request_tokens(
    http: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    grant: Grant<'_>,
) -> Result<TokenState> {
    let resp = http
        .post(token_url)
        .basic_auth(client_id, Some(client_secret))
        .form(&grant.form())
        .send()
        .await
        .with_context(|| format!("Failed to contact token endpoint for {} grant", grant.label()))?;

    let issued_at = Utc::now();

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(MonitorError::TokenExchange(format!(
            "{} grant rejected ({status}): {body}",
            grant.label()
        ))
        .into());
    }

    let body = resp
        .text()
        .await
        .context("Failed to read token response")?;
    let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
        MonitorError::TokenExchange(format!("malformed {} response: {e}", grant.label()))
    })?;

    parsed.into_state(issued_at)
}

/// Deserialize a number of seconds given either as a JSON number or a numeric string.
fn seconds_from_string_or_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct Seconds;

    impl<'de> de::Visitor<'de> for Seconds {
        type Value = f64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a number of seconds as a number or a string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            v.trim()
                .parse()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }
    }

    deserializer.deserialize_any(Seconds)
}
