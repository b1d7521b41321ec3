use std::fmt;

use serde::Deserialize;
use time::OffsetDateTime;

/// Marker stored for a column that received no reading in the current window.
/// rrdtool reads it as "unknown", which keeps false zeros out of MIN/MAX/AVERAGE.
pub const UNKNOWN: &str = "U";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Measurement {
    Temperature,
    Humidity,
    Rain,
    Battery,
}

impl Measurement {
    pub const ALL: [Measurement; 4] = [
        Measurement::Temperature,
        Measurement::Humidity,
        Measurement::Rain,
        Measurement::Battery,
    ];

    /// Option name enabling this measurement in a channel section
    pub fn name(self) -> &'static str {
        match self {
            Measurement::Temperature => "temperature",
            Measurement::Humidity => "humidity",
            Measurement::Rain => "rain",
            Measurement::Battery => "battery",
        }
    }

    /// Column name prefix, also used as the data source kind in the store
    pub fn prefix(self) -> &'static str {
        match self {
            Measurement::Temperature => "temp",
            Measurement::Humidity => "humi",
            Measurement::Rain => "rain",
            Measurement::Battery => "batt",
        }
    }

    pub fn offset_option(self) -> String {
        format!("{}_offset", self.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One time-series column: a measurement of a given channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub measurement: Measurement,
    pub channel: String,
}

impl Column {
    pub fn new(measurement: Measurement, channel: impl Into<String>) -> Self {
        Self {
            measurement,
            channel: channel.into(),
        }
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.measurement.prefix(), self.channel)
    }
}

/// Device identity as reported by rtl_433, used only as a lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub id: i64,
    pub rid: i64,
    pub channel: i64,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.id, self.rid, self.channel)
    }
}

/// One decoded transmission; every field is optional and unknown fields are ignored
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TelemetryRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub rid: Option<i64>,
    #[serde(default)]
    pub channel: Option<i64>,
    #[serde(default, rename = "temperature_C")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default, alias = "rain_mm")]
    pub rain: Option<f64>,
    #[serde(default)]
    pub battery: Option<String>,
}

impl TelemetryRecord {
    /// Missing identity fields count as zero, matching what rtl_433 users put in
    /// their configuration for devices without a rolling id or channel selector.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            id: self.id.unwrap_or(0),
            rid: self.rid.unwrap_or(0),
            channel: self.channel.unwrap_or(0),
        }
    }
}

/// Snapshot of one elapsed window, ready to be written to the store
#[derive(Debug, Clone, PartialEq)]
pub struct FlushPayload {
    pub timestamp: OffsetDateTime,
    pub values: Vec<String>,
}

impl FlushPayload {
    /// Render as an rrdtool update argument: `<unix-seconds>:<v1>:<v2>...`
    pub fn to_update_arg(&self) -> String {
        let mut arg = self.timestamp.unix_timestamp().to_string();
        for value in &self.values {
            arg.push(':');
            arg.push_str(value);
        }
        arg
    }
}
