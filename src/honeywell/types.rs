use serde::Deserialize;

/// One location from GET /v2/locations.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Location {
    #[serde(rename = "locationID", default)]
    pub location_id: Option<serde_json::Value>,
    #[serde(default)]
    pub name: Option<String>,
    pub devices: Vec<Device>,
}

/// A thermostat attached to a location.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub user_defined_device_name: String,
    pub indoor_temperature: f64,
    pub changeable_values: ChangeableValues,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeableValues {
    pub mode: String,
}

/// Flattened per-device fields kept from a locations response.
///
/// `device_id` and `mode` are not used by the checker.
#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    pub indoor_temperature: f64,
    pub mode: String,
}

/// A device name and its indoor temperature (°F).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub device_name: String,
    pub indoor_temperature: f64,
}

impl From<DeviceInfo> for DeviceReading {
    fn from(info: DeviceInfo) -> Self {
        Self {
            device_name: info.name,
            indoor_temperature: info.indoor_temperature,
        }
    }
}

/// Flatten locations → devices, keeping response order.
pub fn parse_locations(locations: Vec<Location>) -> Vec<DeviceInfo> {
    locations
        .into_iter()
        .flat_map(|location| location.devices)
        .map(|device| DeviceInfo {
            device_id: device.device_id,
            name: device.user_defined_device_name,
            indoor_temperature: device.indoor_temperature,
            mode: device.changeable_values.mode,
        })
        .collect()
}
