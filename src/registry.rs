/// Static mapping from rtl_433 device identities to configured sensor channels
use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{info, warn};

use crate::config::{SectionConfig, SensorConfig};
use crate::error::ConfigError;
use crate::logging::LogContext;
use crate::models::{Column, DeviceIdentity, Measurement};

/// rrdtool limits data source names to 19 characters
const MAX_COLUMN_NAME_LEN: usize = 19;

/// One configured logical sensor
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry {
    pub channel_name: String,
    pub device_key: String,
    pub enabled_measurements: BTreeSet<Measurement>,
    pub calibration_offsets: BTreeMap<Measurement, f64>,
    pub protocol_id: u32,
}

impl ChannelEntry {
    pub fn offset(&self, measurement: Measurement) -> f64 {
        self.calibration_offsets
            .get(&measurement)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Read-only after construction; share it behind an `Arc`
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    entries: Vec<ChannelEntry>,
    by_device: HashMap<String, usize>,
    by_channel: HashMap<String, usize>,
    columns: Vec<Column>,
    protocols: Vec<u32>,
}

impl ChannelRegistry {
    /// Build the registry from the channel sections of the configuration
    ///
    /// Every section must name a device (`id`) and a protocol. Measurement
    /// options are enabled by presence; `<measurement>_offset` options must
    /// be numbers.
    pub fn load(config: &SensorConfig, log: LogContext) -> Result<Self, ConfigError> {
        let mut entries: Vec<ChannelEntry> = Vec::with_capacity(config.sections.len());
        let mut by_device: HashMap<String, usize> = HashMap::new();
        let mut by_channel = HashMap::new();

        for section in &config.sections {
            let entry = parse_entry(section)?;

            if let Some(&first) = by_device.get(&entry.device_key) {
                let first = &entries[first];
                return Err(ConfigError::DuplicateDevice {
                    key: entry.device_key,
                    first: first.channel_name.clone(),
                    second: section.name.clone(),
                });
            }

            for measurement in entry.calibration_offsets.keys() {
                if *measurement != Measurement::Temperature {
                    warn!(
                        target: log.target(),
                        "{}: {} offset is accepted but only temperature is calibrated",
                        entry.channel_name, measurement
                    );
                }
            }

            by_device.insert(entry.device_key.clone(), entries.len());
            by_channel.insert(entry.channel_name.clone(), entries.len());
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(ConfigError::NoChannels);
        }

        let columns = column_layout(&entries)?;
        let protocols: Vec<u32> = entries
            .iter()
            .map(|e| e.protocol_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(
            target: log.target(),
            "Sensors: {}",
            columns.iter().map(Column::name).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            entries,
            by_device,
            by_channel,
            columns,
            protocols,
        })
    }

    pub fn resolve(&self, identity: &DeviceIdentity) -> Option<&ChannelEntry> {
        self.by_device
            .get(&identity.to_string())
            .map(|&i| &self.entries[i])
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelEntry> {
        self.by_channel.get(name).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[ChannelEntry] {
        &self.entries
    }

    /// Columns sorted by name; this order is also the store schema order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Protocol ids to enable in the decoder, ascending and deduplicated
    pub fn protocols(&self) -> &[u32] {
        &self.protocols
    }
}

fn parse_entry(section: &SectionConfig) -> Result<ChannelEntry, ConfigError> {
    let missing = |field| ConfigError::MissingField {
        section: section.name.clone(),
        field,
    };

    let device_key = section
        .get("id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| missing("id"))?
        .to_string();
    let protocol = section.get("protocol").ok_or_else(|| missing("protocol"))?;
    let protocol_id = protocol
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidProtocol {
            section: section.name.clone(),
            value: protocol.to_string(),
        })?;

    let mut enabled_measurements = BTreeSet::new();
    let mut calibration_offsets = BTreeMap::new();

    for measurement in Measurement::ALL {
        if section.contains(measurement.name()) {
            enabled_measurements.insert(measurement);
        }
        if let Some(value) = section.get(&measurement.offset_option()) {
            let offset = value
                .parse::<f64>()
                .ok()
                .filter(|o| o.is_finite())
                .ok_or_else(|| ConfigError::InvalidOffset {
                    section: section.name.clone(),
                    measurement: measurement.name(),
                })?;
            calibration_offsets.insert(measurement, offset);
        }
    }

    // An offset for anything we do not measure is a typo worth stopping for
    for key in section.keys() {
        if let Some(kind) = key.strip_suffix("_offset") {
            if Measurement::from_name(kind).is_none() {
                return Err(ConfigError::UnsupportedMeasurement {
                    section: section.name.clone(),
                    key: key.to_string(),
                });
            }
        }
    }

    Ok(ChannelEntry {
        channel_name: section.name.clone(),
        device_key,
        enabled_measurements,
        calibration_offsets,
        protocol_id,
    })
}

fn column_layout(entries: &[ChannelEntry]) -> Result<Vec<Column>, ConfigError> {
    let mut columns: Vec<Column> = entries
        .iter()
        .flat_map(|entry| {
            entry
                .enabled_measurements
                .iter()
                .map(move |&m| Column::new(m, entry.channel_name.clone()))
        })
        .collect();
    columns.sort_by_key(Column::name);
    columns.dedup();

    for column in &columns {
        let name = column.name();
        let valid = name.len() <= MAX_COLUMN_NAME_LEN
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ConfigError::InvalidColumn(name));
        }
    }

    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::CONFIG_TARGET;

    const LOG: LogContext = LogContext::new(CONFIG_TARGET);

    fn load(text: &str) -> Result<ChannelRegistry, ConfigError> {
        let config = SensorConfig::parse(text)?;
        ChannelRegistry::load(&config, LOG)
    }

    const WEATHER: &str = "
[rrd]
file = weather.rrd

[roof]
id = 77:0:0
protocol = 40
rain = yes
battery = yes

[garden]
id = 1:0:2
protocol = 19
temperature = yes
humidity = yes
battery = yes
temperature_offset = -0.5

[cellar]
id = 5:12:1
protocol = 19
temperature = yes
";

    fn names(registry: &ChannelRegistry) -> Vec<String> {
        registry.columns().iter().map(Column::name).collect()
    }

    #[test]
    fn test_layout_sorted_by_kind_then_channel() {
        let registry = load(WEATHER).unwrap();
        assert_eq!(
            names(&registry),
            vec![
                "batt_garden",
                "batt_roof",
                "humi_garden",
                "rain_roof",
                "temp_cellar",
                "temp_garden",
            ]
        );
    }

    #[test]
    fn test_layout_is_deterministic() {
        let first = load(WEATHER).unwrap();
        let second = load(WEATHER).unwrap();
        assert_eq!(first.columns(), second.columns());
    }

    #[test]
    fn test_protocols_sorted_and_deduplicated() {
        let registry = load(WEATHER).unwrap();
        assert_eq!(registry.protocols(), &[19, 40]);
    }

    #[test]
    fn test_resolve_device() {
        let registry = load(WEATHER).unwrap();
        let identity = DeviceIdentity {
            id: 1,
            rid: 0,
            channel: 2,
        };
        let entry = registry.resolve(&identity).unwrap();
        assert_eq!(entry.channel_name, "garden");
        assert_eq!(entry.offset(Measurement::Temperature), -0.5);
        assert_eq!(entry.offset(Measurement::Humidity), 0.0);

        let unknown = DeviceIdentity {
            id: 2,
            rid: 0,
            channel: 2,
        };
        assert!(registry.resolve(&unknown).is_none());
    }

    #[test]
    fn test_missing_device_id() {
        let err = load("[rrd]\nfile = a.rrd\n[garden]\nprotocol = 19\n").unwrap_err();
        assert_eq!(err.to_string(), "[garden] missing 'id' option");
    }

    #[test]
    fn test_missing_protocol() {
        let err = load("[rrd]\nfile = a.rrd\n[garden]\nid = 1:0:2\n").unwrap_err();
        assert_eq!(err.to_string(), "[garden] missing 'protocol' option");
    }

    #[test]
    fn test_invalid_protocol() {
        let err = load("[rrd]\nfile = a.rrd\n[garden]\nid = 1:0:2\nprotocol = nexus\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProtocol { .. }));
    }

    #[test]
    fn test_invalid_offset_names_section_and_measurement() {
        let text = "[rrd]\nfile = a.rrd\n[garden]\nid = 1:0:2\nprotocol = 19\nhumidity_offset = two\n";
        let err = load(text).unwrap_err();
        assert_eq!(err.to_string(), "garden:humidity invalid offset value");
    }

    #[test]
    fn test_unsupported_measurement_offset() {
        let text = "[rrd]\nfile = a.rrd\n[garden]\nid = 1:0:2\nprotocol = 19\npressure_offset = 1\n";
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedMeasurement { key, .. } if key == "pressure_offset"));
    }

    #[test]
    fn test_duplicate_device() {
        let text = "[rrd]\nfile = a.rrd\n[a]\nid = 1:0:2\nprotocol = 19\n[b]\nid = 1:0:2\nprotocol = 19\n";
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDevice { first, second, .. } if first == "a" && second == "b"));
    }

    #[test]
    fn test_column_name_too_long() {
        let text = "[rrd]\nfile = a.rrd\n[greenhouse_north_wing]\nid = 1\nprotocol = 19\ntemperature = yes\n";
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidColumn(_)));
    }

    #[test]
    fn test_no_channels() {
        let err = load("[rrd]\nfile = a.rrd\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoChannels));
    }
}
