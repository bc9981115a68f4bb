mod client;
pub mod types;

pub use client::DeviceClient;
pub use types::DeviceReading;
