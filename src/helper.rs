use std::{
    collections::BTreeSet,
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    client::SensorPushClient,
    error::Result,
    models::{Sample, SamplesRequest, Sensor, SensorsRequest},
};

pub const MANUFACTURER: &str = "SensorPush";

// ---------------------------------------------------------------------------
// DeviceRecord
// ---------------------------------------------------------------------------

/// Sensor attributes merged with its most recent sample.
///
/// Readings the sensor did not report are `None`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub altitude: Option<f64>,
    pub atmospheric_pressure: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub dewpoint: Option<f64>,
    pub humidity: Option<f64>,
    pub last_update: DateTime<Utc>,
    pub signal_strength: Option<f64>,
    pub temperature: Option<f64>,
    pub vapor_pressure: Option<f64>,
}

impl DeviceRecord {
    pub fn new(device_id: &str, sensor: &Sensor, sample: &Sample) -> Self {
        Self {
            device_id: device_id.to_owned(),
            manufacturer: MANUFACTURER.to_owned(),
            model: sensor.sensor_type.clone(),
            name: sensor.name.clone(),
            altitude: sample.altitude,
            atmospheric_pressure: sample.barometric_pressure,
            battery_voltage: sensor.battery_voltage,
            dewpoint: sample.dewpoint,
            humidity: sample.humidity,
            last_update: sample.observed,
            signal_strength: sensor.rssi,
            temperature: sample.temperature,
            vapor_pressure: sample.vpd,
        }
    }

    pub fn reading(&self, reading: Reading) -> Option<f64> {
        match reading {
            Reading::Altitude => self.altitude,
            Reading::AtmosphericPressure => self.atmospheric_pressure,
            Reading::BatteryVoltage => self.battery_voltage,
            Reading::Dewpoint => self.dewpoint,
            Reading::Humidity => self.humidity,
            Reading::SignalStrength => self.signal_strength,
            Reading::Temperature => self.temperature,
            Reading::VaporPressure => self.vapor_pressure,
        }
    }

    /// Descriptor the host platform registers the physical device with.
    pub fn device_info(&self, domain: &str) -> DeviceInfo {
        DeviceInfo {
            identifiers: BTreeSet::from([(domain.to_owned(), self.device_id.clone())]),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// `(domain, device_id)` pairs.
    pub identifiers: BTreeSet<(String, String)>,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Numeric fields of a [`DeviceRecord`], addressable by their snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reading {
    Altitude,
    AtmosphericPressure,
    BatteryVoltage,
    Dewpoint,
    Humidity,
    SignalStrength,
    Temperature,
    VaporPressure,
}

impl Reading {
    pub const ALL: [Reading; 8] = [
        Reading::Altitude,
        Reading::AtmosphericPressure,
        Reading::BatteryVoltage,
        Reading::Dewpoint,
        Reading::Humidity,
        Reading::SignalStrength,
        Reading::Temperature,
        Reading::VaporPressure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Reading::Altitude => "altitude",
            Reading::AtmosphericPressure => "atmospheric_pressure",
            Reading::BatteryVoltage => "battery_voltage",
            Reading::Dewpoint => "dewpoint",
            Reading::Humidity => "humidity",
            Reading::SignalStrength => "signal_strength",
            Reading::Temperature => "temperature",
            Reading::VaporPressure => "vapor_pressure",
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reading {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Reading::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown reading: {s:?}"))
    }
}

// ---------------------------------------------------------------------------
// SensorPushHelper
// ---------------------------------------------------------------------------

pub struct SensorPushHelper {
    client: SensorPushClient,
}

impl SensorPushHelper {
    pub fn new(client: SensorPushClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SensorPushClient {
        &self.client
    }

    /// Fetch sensors and their latest sample in parallel and merge them into one
    /// record per device.
    ///
    /// Fails if either request fails. Sensors that have not reported a sample are
    /// left out of the result.
    pub async fn get_data(&self) -> Result<IndexMap<String, DeviceRecord>> {
        let (sensors, samples) = tokio::try_join!(
            self.client.list_sensors(SensorsRequest::default()),
            self.client.list_samples(SamplesRequest::latest(1)),
        )?;

        let mut data = IndexMap::new();
        for (device_id, sensor) in &sensors {
            match samples.latest(device_id) {
                Some(sample) => {
                    data.insert(device_id.clone(), DeviceRecord::new(device_id, sensor, sample));
                }
                None => {
                    warn!(
                        device_id = %device_id,
                        name = %sensor.name,
                        "No samples reported for sensor; skipping"
                    );
                }
            }
        }

        info!(sensors = sensors.len(), records = data.len(), "SensorPush data refreshed");
        Ok(data)
    }

    /// IDs of every sensor registered to the account.
    pub async fn get_device_ids(&self) -> Result<Vec<String>> {
        let sensors = self.client.list_sensors(SensorsRequest::default()).await?;
        Ok(sensors.into_keys().collect())
    }
}
