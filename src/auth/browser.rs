//! Chrome automation of the Honeywell hosted login over WebDriver.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use tokio::process::{Child, Command};
use url::Url;

use super::authorizer::{
    AuthorizationRequest, InteractiveAuthorizer, LoginSelectors, LoginSession, run_login_flow,
    timed_out,
};
use crate::config::WebDriverConfig;
use crate::error::MonitorError;

/// WebDriver key code for Enter.
const ENTER: char = '\u{E007}';
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long the consent page gets to list devices before it is taken as empty.
const DEVICE_LIST_WAIT: Duration = Duration::from_secs(5);

pub struct WebDriverAuthorizer {
    config: WebDriverConfig,
    selectors: LoginSelectors,
}

impl WebDriverAuthorizer {
    pub fn new(config: &WebDriverConfig) -> Self {
        Self {
            config: config.clone(),
            selectors: LoginSelectors::default(),
        }
    }

    fn capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut args = vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--window-size=1920,1080",
        ];
        if self.config.headless {
            args.insert(0, "--headless=new");
        }

        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": args }),
        );
        caps
    }
}

#[async_trait]
impl InteractiveAuthorizer for WebDriverAuthorizer {
    async fn authorize(&self, request: &AuthorizationRequest<'_>) -> Result<String> {
        // Held until this function returns; the driver is killed on drop.
        let _driver = match &self.config.chromedriver_path {
            Some(path) => Some(spawn_chromedriver(path, &self.config.url).await?),
            None => None,
        };

        let client = ClientBuilder::native()
            .capabilities(self.capabilities())
            .connect(&self.config.url)
            .await
            .with_context(|| format!("Failed to start WebDriver session at {}", self.config.url))?;
        tracing::debug!(webdriver = %self.config.url, "browser session started");

        let session = Box::new(ChromeSession {
            client,
            timeout: Duration::from_secs(self.config.wait_timeout_secs),
        });
        run_login_flow(session, request, &self.selectors).await
    }
}

/// A live WebDriver session with a bounded wait for every step.
struct ChromeSession {
    client: Client,
    timeout: Duration,
}

impl ChromeSession {
    async fn wait_for(&self, selector: &str) -> Result<fantoccini::elements::Element> {
        match self
            .client
            .wait()
            .at_most(self.timeout)
            .every(POLL_INTERVAL)
            .for_element(Locator::Css(selector))
            .await
        {
            Ok(element) => Ok(element),
            Err(CmdError::WaitTimeout) => Err(timed_out(selector, self.timeout)),
            Err(e) => Err(e).with_context(|| format!("Failed to locate {selector}")),
        }
    }
}

fn device_list_wait(timeout: Duration) -> Duration {
    timeout.min(DEVICE_LIST_WAIT)
}

async fn is_checked(checkbox: &fantoccini::elements::Element) -> Result<bool> {
    let checked = checkbox
        .prop("checked")
        .await
        .context("Failed to read checkbox state")?;
    Ok(checked.as_deref() == Some("true"))
}

#[async_trait]
impl LoginSession for ChromeSession {
    async fn open(&mut self, url: &Url) -> Result<()> {
        self.client
            .goto(url.as_str())
            .await
            .context("Failed to open authorization page")
    }

    async fn fill(&mut self, selector: &str, text: &str, submit: bool) -> Result<()> {
        let field = self.wait_for(selector).await?;
        let mut keys = text.to_string();
        if submit {
            keys.push(ENTER);
        }
        field
            .send_keys(&keys)
            .await
            .with_context(|| format!("Failed to type into {selector}"))
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.wait_for(selector)
            .await?
            .click()
            .await
            .with_context(|| format!("Failed to click {selector}"))
    }

    async fn check_all(&mut self, item: &str, checkbox: &str) -> Result<usize> {
        match self
            .client
            .wait()
            .at_most(device_list_wait(self.timeout))
            .every(POLL_INTERVAL)
            .for_element(Locator::Css(item))
            .await
        {
            Ok(_) => {}
            Err(CmdError::WaitTimeout) => {
                tracing::warn!("consent page lists no devices");
                return Ok(0);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to locate {item}")),
        }

        let rows = self
            .client
            .find_all(Locator::Css(item))
            .await
            .context("Failed to list devices")?;

        for row in &rows {
            let input = row
                .find(Locator::Css(checkbox))
                .await
                .context("Device row has no checkbox")?;
            if is_checked(&input).await? {
                continue;
            }
            row.click().await.context("Failed to select device")?;

            let deadline = tokio::time::Instant::now() + self.timeout;
            while !is_checked(&input).await? {
                if tokio::time::Instant::now() >= deadline {
                    return Err(timed_out("device checkbox to toggle", self.timeout));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        Ok(rows.len())
    }

    async fn wait_for_redirect(&mut self, prefix: &str) -> Result<Url> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let current = self
                .client
                .current_url()
                .await
                .context("Failed to read current URL")?;
            if current.as_str().starts_with(prefix) {
                return Ok(current);
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::error!(url = %current, "login did not redirect");
                return Err(timed_out("redirect", self.timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client
            .close()
            .await
            .context("Failed to end WebDriver session")?;
        tracing::debug!("browser session closed");
        Ok(())
    }
}

/// Start chromedriver on the port named in `webdriver_url` and wait until it accepts connections.
async fn spawn_chromedriver(path: &Path, webdriver_url: &str) -> Result<Child> {
    let url = Url::parse(webdriver_url)
        .with_context(|| format!("Invalid webdriver URL: {webdriver_url}"))?;
    let host = url.host_str().unwrap_or("localhost").to_string();
    let port = url.port_or_known_default().unwrap_or(9515);

    let child = Command::new(path)
        .arg(format!("--port={port}"))
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", path.display()))?;
    tracing::debug!(port, "chromedriver spawned");

    let ready = tokio::time::timeout(Duration::from_secs(10), async {
        while tokio::net::TcpStream::connect((host.as_str(), port))
            .await
            .is_err()
        {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    if ready.is_err() {
        return Err(MonitorError::Authorization(format!(
            "chromedriver did not start listening on port {port}"
        ))
        .into());
    }
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_capabilities() {
        let authorizer = WebDriverAuthorizer::new(&WebDriverConfig::default());
        let caps = authorizer.capabilities();
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert_eq!(args[0], "--headless=new");
        assert!(args.iter().any(|a| a == "--no-sandbox"));
        assert!(args.iter().any(|a| a == "--window-size=1920,1080"));
    }

    #[test]
    fn test_headed_capabilities() {
        let config = WebDriverConfig {
            headless: false,
            ..WebDriverConfig::default()
        };
        let caps = WebDriverAuthorizer::new(&config).capabilities();
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a.as_str().unwrap().starts_with("--headless")));
    }

    #[test]
    fn test_device_list_wait_is_bounded() {
        assert_eq!(device_list_wait(Duration::from_secs(30)), DEVICE_LIST_WAIT);
        assert_eq!(device_list_wait(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_missing_chromedriver_binary() {
        let err = spawn_chromedriver(
            Path::new("/nonexistent/chromedriver"),
            "http://localhost:9515",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
