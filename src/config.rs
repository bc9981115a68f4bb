use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::MonitorError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Vault URL, or a bare vault name.
    pub keyvault_url: String,
    /// Client id of a user-assigned managed identity used for secret reads.
    #[serde(default)]
    pub uami_client_id: Option<String>,
    #[serde(default)]
    pub general: GeneralConfig,
    pub honeywell: HoneywellConfig,
    pub email: EmailConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoneywellConfig {
    pub redirect_uri: String,
    pub token_url: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Secret holding the OAuth client id (also sent as the `apikey` parameter).
    pub api_key_secret: String,
    pub client_secret_secret: String,
    pub username_secret: String,
    pub password_secret: String,
    /// Alert when a reading is strictly above this value (°F).
    pub temperature_threshold: f64,
}

fn default_authorize_url() -> String {
    "https://api.honeywellhome.com/oauth2/authorize".into()
}
fn default_api_base_url() -> String {
    "https://api.honeywellhome.com".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Sender address. Defaults to the SMTP user, which then must be an email address.
    #[serde(default)]
    pub from_address: Option<String>,
    pub smtp_user_secret: String,
    pub smtp_password_secret: String,
    pub phone_numbers: Vec<String>,
    /// Carrier email-to-SMS domain, e.g. `vtext.com`.
    pub carrier_gateway: String,
    pub smtp_server: String,
    pub smtp_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebDriverConfig {
    #[serde(default = "default_webdriver_url")]
    pub url: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Upper bound for each wait during the login automation.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Spawn this chromedriver binary for the login instead of using a running one.
    pub chromedriver_path: Option<PathBuf>,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            headless: default_headless(),
            wait_timeout_secs: default_wait_timeout(),
            chromedriver_path: None,
        }
    }
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".into()
}
fn default_headless() -> bool {
    true
}
fn default_wait_timeout() -> u64 {
    30
}

pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("honeywatch").join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&path, &content)
        .map_err(|e| MonitorError::Config(format!("{e}")))
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config.validate()?;
    Ok(config)
}

/// JSON for `*.json` files, TOML for everything else.
fn parse_config(path: &Path, content: &str) -> Result<Config> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(toml::from_str(content)?)
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        let required = [
            ("keyvault_url", &self.keyvault_url),
            ("honeywell.redirect_uri", &self.honeywell.redirect_uri),
            ("honeywell.token_url", &self.honeywell.token_url),
            ("honeywell.api_key_secret", &self.honeywell.api_key_secret),
            (
                "honeywell.client_secret_secret",
                &self.honeywell.client_secret_secret,
            ),
            ("honeywell.username_secret", &self.honeywell.username_secret),
            ("honeywell.password_secret", &self.honeywell.password_secret),
            ("email.smtp_user_secret", &self.email.smtp_user_secret),
            ("email.smtp_password_secret", &self.email.smtp_password_secret),
            ("email.carrier_gateway", &self.email.carrier_gateway),
            ("email.smtp_server", &self.email.smtp_server),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(MonitorError::Config(format!("{key} must not be empty")).into());
            }
        }

        if self.email.phone_numbers.is_empty() {
            return Err(
                MonitorError::Config("email.phone_numbers must list at least one number".into())
                    .into(),
            );
        }
        if !self.honeywell.temperature_threshold.is_finite() {
            return Err(MonitorError::Config(
                "honeywell.temperature_threshold must be a finite number".into(),
            )
            .into());
        }
        if self.general.poll_interval_secs == 0 {
            return Err(
                MonitorError::Config("general.poll_interval_secs must be positive".into()).into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TOML_CONFIG: &str = r#"
keyvault_url = "https://example-vault.vault.azure.net"
uami_client_id = "00000000-1111-2222-3333-444444444444"

[honeywell]
redirect_uri = "https://localhost/callback"
token_url = "https://api.honeywellhome.com/oauth2/token"
api_key_secret = "honeywell-api-key"
client_secret_secret = "honeywell-client-secret"
username_secret = "honeywell-username"
password_secret = "honeywell-password"
temperature_threshold = 75

[email]
smtp_user_secret = "smtp-user"
smtp_password_secret = "smtp-password"
phone_numbers = ["5551234567", "5559876543"]
carrier_gateway = "vtext.com"
smtp_server = "smtp.gmail.com"
smtp_port = 465
"#;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_load_toml_with_defaults() {
        let f = write_config(".toml", TOML_CONFIG);
        let cfg = load_config(Some(f.path())).unwrap();

        assert_eq!(cfg.honeywell.temperature_threshold, 75.0);
        assert_eq!(cfg.email.phone_numbers.len(), 2);
        assert_eq!(cfg.email.smtp_port, 465);
        assert_eq!(cfg.general.poll_interval_secs, 3600);
        assert_eq!(
            cfg.honeywell.authorize_url,
            "https://api.honeywellhome.com/oauth2/authorize"
        );
        assert_eq!(cfg.honeywell.api_base_url, "https://api.honeywellhome.com");
        assert_eq!(cfg.webdriver.url, "http://localhost:9515");
        assert!(cfg.webdriver.headless);
        assert!(cfg.webdriver.chromedriver_path.is_none());
        assert_eq!(
            cfg.uami_client_id.as_deref(),
            Some("00000000-1111-2222-3333-444444444444")
        );
    }

    #[test]
    fn test_load_json() {
        let json = r#"{
            "keyvault_url": "example-vault",
            "honeywell": {
                "redirect_uri": "https://localhost/callback",
                "token_url": "https://api.honeywellhome.com/oauth2/token",
                "api_key_secret": "a",
                "client_secret_secret": "b",
                "username_secret": "c",
                "password_secret": "d",
                "temperature_threshold": 78.5
            },
            "email": {
                "smtp_user_secret": "e",
                "smtp_password_secret": "f",
                "phone_numbers": ["5551234567"],
                "carrier_gateway": "txt.att.net",
                "smtp_server": "smtp.example.com",
                "smtp_port": 465
            },
            "webdriver": { "headless": false, "wait_timeout_secs": 10 }
        }"#;
        let f = write_config(".json", json);
        let cfg = load_config(Some(f.path())).unwrap();

        assert!(cfg.uami_client_id.is_none());
        assert_eq!(cfg.honeywell.temperature_threshold, 78.5);
        assert!(!cfg.webdriver.headless);
        assert_eq!(cfg.webdriver.wait_timeout_secs, 10);
        assert_eq!(cfg.webdriver.url, "http://localhost:9515");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let broken = TOML_CONFIG.replace(
            "token_url = \"https://api.honeywellhome.com/oauth2/token\"\n",
            "",
        );
        let f = write_config(".toml", &broken);
        let err = load_config(Some(f.path())).unwrap_err();
        assert!(format!("{err:#}").contains("token_url"), "got: {err:#}");
        assert!(matches!(err.downcast_ref::<MonitorError>(), Some(MonitorError::Config(_))));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let f = write_config(".json", "{ \"keyvault_url\": ");
        let err = load_config(Some(f.path())).unwrap_err();
        assert!(matches!(err.downcast_ref::<MonitorError>(), Some(MonitorError::Config(_))));
    }

    #[test]
    fn test_sender_address_is_optional() {
        let f = write_config(".toml", TOML_CONFIG);
        assert!(load_config(Some(f.path())).unwrap().email.from_address.is_none());

        let with_sender = TOML_CONFIG.replace(
            "[email]\n",
            "[email]\nfrom_address = \"alerts@example.com\"\n",
        );
        let f = write_config(".toml", &with_sender);
        let cfg = load_config(Some(f.path())).unwrap();
        assert_eq!(cfg.email.from_address.as_deref(), Some("alerts@example.com"));
    }

    #[test]
    fn test_empty_phone_list_rejected() {
        let broken = TOML_CONFIG.replace(
            r#"phone_numbers = ["5551234567", "5559876543"]"#,
            "phone_numbers = []",
        );
        let f = write_config(".toml", &broken);
        let err = load_config(Some(f.path())).unwrap_err();
        assert!(matches!(err.downcast_ref::<MonitorError>(), Some(MonitorError::Config(_))));
    }

    #[test]
    fn test_empty_secret_name_rejected() {
        let broken = TOML_CONFIG.replace(
            r#"password_secret = "honeywell-password""#,
            r#"password_secret = " ""#,
        );
        let f = write_config(".toml", &broken);
        let err = load_config(Some(f.path())).unwrap_err();
        assert!(err.to_string().contains("honeywell.password_secret"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/honeywatch.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
