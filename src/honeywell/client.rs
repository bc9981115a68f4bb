use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;

use super::types::{DeviceReading, Location, parse_locations};
use crate::error::MonitorError;

pub struct DeviceClient {
    http: reqwest::Client,
    api_base: String,
}

impl DeviceClient {
    pub fn new(api_base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// GET /v2/locations: every device's name and indoor temperature.
    ///
    /// A non-200 answer is logged and yields no readings; transport and
    /// parse failures are returned as errors.
    pub async fn fetch_readings(
        &self,
        access_token: &str,
        api_key: &str,
    ) -> Result<Vec<DeviceReading>> {
        let resp = self
            .http
            .get(format!("{}/v2/locations", self.api_base))
            .query(&[("apikey", api_key)])
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .context("Failed to fetch locations")?;

        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let err = MonitorError::ApiRequest { status, body };
            tracing::error!("failed to get locations: {err}");
            return Ok(Vec::new());
        }

        let locations: Vec<Location> = resp
            .json()
            .await
            .context("Failed to parse locations response")?;

        let readings: Vec<DeviceReading> = parse_locations(locations)
            .into_iter()
            .map(DeviceReading::from)
            .collect();
        tracing::debug!(devices = readings.len(), "locations fetched");
        Ok(readings)
    }
}
