//! Client for the SensorPush cloud API.
//!
//! [`SensorPushClient`] signs in, caches the short-lived access token and
//! retries failed calls. [`SensorPushHelper`] merges the sensor list with the
//! latest samples into one [`DeviceRecord`] per device.

pub mod client;
pub mod config;
pub mod error;
pub mod helper;
pub mod models;
pub mod retry;
pub mod transport;

pub use client::{
    Credentials, SensorPushClient, ACCESS_TOKEN_EXPIRATION, REQUEST_RETRIES, REQUEST_TIMEOUT,
};
pub use config::Config;
pub use error::{Error, Result, TransportError};
pub use helper::{DeviceInfo, DeviceRecord, Reading, SensorPushHelper, MANUFACTURER};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, Transport, DEFAULT_BASE_URL};
