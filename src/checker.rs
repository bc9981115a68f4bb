use anyhow::Result;

use crate::auth::TokenManager;
use crate::honeywell::{DeviceClient, DeviceReading};
use crate::notify::AlertNotifier;

/// One monitor: the token context, the API client and where alerts go.
pub struct Checker {
    tokens: TokenManager,
    devices: DeviceClient,
    notifier: Box<dyn AlertNotifier>,
    threshold: f64,
}

impl Checker {
    pub fn new(
        tokens: TokenManager,
        devices: DeviceClient,
        notifier: Box<dyn AlertNotifier>,
        threshold: f64,
    ) -> Self {
        Self {
            tokens,
            devices,
            notifier,
            threshold,
        }
    }

    /// Fetch every reading and alert on each one strictly above the threshold.
    ///
    /// Returns the number of alerts sent. Alerts repeat on every cycle while
    /// a device stays hot.
    pub async fn run_cycle(&mut self) -> Result<usize> {
        tracing::info!("running temperature check");
        let token = self.tokens.ensure_valid_token().await?.to_owned();
        let readings = self
            .devices
            .fetch_readings(&token, self.tokens.api_key())
            .await?;

        let mut sent = 0;
        for reading in &readings {
            if let Some((subject, body)) = alert_for(reading, self.threshold) {
                self.notifier.send(&subject, &body).await?;
                tracing::info!("sent alert: {subject}");
                sent += 1;
            } else {
                tracing::info!(
                    "temperature in {} is {}°F, which is below the threshold of {}°F",
                    reading.device_name,
                    format_temp(reading.indoor_temperature),
                    format_temp(self.threshold),
                );
            }
        }
        Ok(sent)
    }
}

/// Subject and body of the alert for a reading, if it is over the threshold.
fn alert_for(reading: &DeviceReading, threshold: f64) -> Option<(String, String)> {
    if reading.indoor_temperature > threshold {
        let name = &reading.device_name;
        let subject = format!("Alert! High Temp in {name}");
        let body = format!(
            "The temp in {name} is {}°F.",
            format_temp(reading.indoor_temperature)
        );
        Some((subject, body))
    } else {
        None
    }
}

/// At least one decimal place: `76` → `76.0`, `76.5` → `76.5`.
fn format_temp(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{CannedAuthorizer, credentials, endpoints};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Sent = Arc<Mutex<Vec<(String, String)>>>;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Sent,
    }

    #[async_trait]
    impl AlertNotifier for RecordingNotifier {
        async fn send(&self, subject: &str, body: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn reading(name: &str, temp: f64) -> DeviceReading {
        DeviceReading {
            device_name: name.into(),
            indoor_temperature: temp,
        }
    }

    async fn checker(server: &MockServer, devices: serde_json::Value) -> (Checker, Sent) {
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": "1799"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/locations"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "locationID": 1, "devices": devices }])),
            )
            .mount(server)
            .await;

        let tokens = TokenManager::initialize(
            credentials(),
            endpoints(&server.uri()),
            &CannedAuthorizer(Some("canned")),
        )
        .await
        .unwrap();
        let notifier = RecordingNotifier::default();
        let sent = notifier.sent.clone();
        let devices = DeviceClient::new(&server.uri()).unwrap();
        (
            Checker::new(tokens, devices, Box::new(notifier), 75.0),
            sent,
        )
    }

    fn device(name: &str, temp: f64) -> serde_json::Value {
        json!({
            "deviceID": format!("LCC-{name}"),
            "userDefinedDeviceName": name,
            "indoorTemperature": temp,
            "changeableValues": { "mode": "Cool" }
        })
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(alert_for(&reading("Hall", 75.0), 75.0).is_none());
        assert!(alert_for(&reading("Hall", 75.0 + f64::EPSILON * 128.0), 75.0).is_some());
        assert!(alert_for(&reading("Hall", 75.01), 75.0).is_some());
        assert!(alert_for(&reading("Hall", 74.9), 75.0).is_none());
    }

    #[test]
    fn test_alert_text() {
        let (subject, body) = alert_for(&reading("Living Room", 76.0), 75.0).unwrap();
        assert_eq!(subject, "Alert! High Temp in Living Room");
        assert_eq!(body, "The temp in Living Room is 76.0°F.");
    }

    #[test]
    fn test_format_temp() {
        assert_eq!(format_temp(76.0), "76.0");
        assert_eq!(format_temp(76.5), "76.5");
        assert_eq!(format_temp(-3.0), "-3.0");
    }

    #[tokio::test]
    async fn test_single_hot_device_alerts_once() {
        let server = MockServer::start().await;
        let (mut checker, sent) = checker(&server, json!([device("Living Room", 76.0)])).await;

        assert_eq!(checker.run_cycle().await.unwrap(), 1);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Living Room"));
        assert!(sent[0].1.contains("76.0°F"));
    }

    #[tokio::test]
    async fn test_only_hot_device_alerts() {
        let server = MockServer::start().await;
        let (mut checker, sent) = checker(
            &server,
            json!([device("Bedroom", 70.0), device("Office", 80.0)]),
        )
        .await;

        assert_eq!(checker.run_cycle().await.unwrap(), 1);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Office"));
        assert!(sent[0].1.contains("80.0°F"));
    }

    #[tokio::test]
    async fn test_alerts_repeat_every_cycle() {
        let server = MockServer::start().await;
        let (mut checker, sent) = checker(&server, json!([device("Attic", 90.0)])).await;

        checker.run_cycle().await.unwrap();
        checker.run_cycle().await.unwrap();
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_api_failure_completes_without_alerts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 1799
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/locations"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tokens = TokenManager::initialize(
            credentials(),
            endpoints(&server.uri()),
            &CannedAuthorizer(Some("canned")),
        )
        .await
        .unwrap();
        let notifier = RecordingNotifier::default();
        let sent = notifier.sent.clone();
        let mut checker = Checker::new(
            tokens,
            DeviceClient::new(&server.uri()).unwrap(),
            Box::new(notifier),
            75.0,
        );

        assert_eq!(checker.run_cycle().await.unwrap(), 0);
        assert!(sent.lock().unwrap().is_empty());
    }
}
