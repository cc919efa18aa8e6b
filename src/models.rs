use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OAuth  —  POST /oauth/authorize, POST /oauth/accesstoken
//
// SensorPush exposes a simplified OAuth flow: credentials are exchanged for a
// short-lived authorization code, which is then exchanged for an access token.
// There are no refresh tokens; an expired token means signing in again.
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize)]
pub struct AuthorizeRequest {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AuthorizeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeResponse {
    /// Authorization code, valid only for the access-token exchange.
    pub authorization: String,
}

#[derive(Debug, Serialize)]
pub struct AccessTokenRequest {
    pub authorization: String,
}

#[derive(Debug, Deserialize)]
pub struct AccessTokenResponse {
    pub accesstoken: String,
}

// ---------------------------------------------------------------------------
// Sensors  —  POST /devices/sensors
// ---------------------------------------------------------------------------

/// Filters for the sensor list. An empty request lists every sensor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Static attributes of a sensor as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sensor {
    /// Cloud sensor ID, identical to the key it is listed under.
    #[serde(default)]
    pub id: Option<String>,

    /// Hardware device ID printed on the sensor.
    #[serde(default, rename = "deviceId")]
    pub device_id: Option<String>,

    pub name: String,

    /// Model code, e.g. `"HT1"` or `"HTP.xw"`.
    #[serde(rename = "type")]
    pub sensor_type: String,

    /// Volts.
    #[serde(default)]
    pub battery_voltage: Option<f64>,

    /// Signal strength in dBm.
    #[serde(default)]
    pub rssi: Option<f64>,

    #[serde(default)]
    pub active: Option<bool>,

    #[serde(default)]
    pub address: Option<String>,
}

// ---------------------------------------------------------------------------
// Samples  —  POST /samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplesRequest {
    /// Maximum number of samples returned per sensor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Restrict the query to these sensor IDs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl SamplesRequest {
    /// Request only the `limit` most recent samples of every sensor.
    pub fn latest(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Samples {
    /// Sensor ID → samples, most recent first.
    #[serde(default)]
    pub sensors: IndexMap<String, Vec<Sample>>,

    #[serde(default)]
    pub last_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub total_samples: Option<u64>,

    #[serde(default)]
    pub total_sensors: Option<u64>,

    /// `true` when the server cut the result short.
    #[serde(default)]
    pub truncated: Option<bool>,
}

impl Samples {
    /// Most recent sample of `sensor_id`, if it reported any.
    pub fn latest(&self, sensor_id: &str) -> Option<&Sample> {
        self.sensors.get(sensor_id).and_then(|s| s.first())
    }
}

/// A single observation. Every reading is optional because each sensor model
/// only measures a subset of them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    pub observed: DateTime<Utc>,
    /// Degrees Fahrenheit.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Relative humidity, percent.
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Inches of mercury.
    #[serde(default)]
    pub barometric_pressure: Option<f64>,
    #[serde(default)]
    pub dewpoint: Option<f64>,
    /// Feet.
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Vapor pressure deficit, kPa.
    #[serde(default)]
    pub vpd: Option<f64>,
}

// ---------------------------------------------------------------------------
// Error body
//
// Failed requests usually answer with:
//   { "message": "...", "type": "...", "statusCode": "400" }
// but gateways in front of the API may return HTML or nothing at all.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: Option<String>,
}
