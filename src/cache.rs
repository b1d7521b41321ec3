/// Per-window aggregation of the latest reading of every column
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use time::{Duration, OffsetDateTime};

use crate::logging::LogContext;
use crate::models::{FlushPayload, Measurement, TelemetryRecord, UNKNOWN};
use crate::registry::ChannelRegistry;
use crate::utils::{duration_to_seconds, format_datetime};

/// Holds the last value seen for each column until the window elapses
///
/// Values are kept already formatted for the store. Within a window the last
/// observation wins; a column nobody reported is flushed as `U`.
#[derive(Debug)]
pub struct AggregationCache {
    registry: Arc<ChannelRegistry>,
    positions: HashMap<String, usize>,
    values: Vec<String>,
    window_start: OffsetDateTime,
    window_length: Duration,
    log: LogContext,
}

impl AggregationCache {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        window_length: Duration,
        now: OffsetDateTime,
        log: LogContext,
    ) -> Self {
        let positions = registry
            .columns()
            .iter()
            .enumerate()
            .map(|(pos, column)| (column.name(), pos))
            .collect::<HashMap<_, _>>();
        let values = vec![UNKNOWN.to_string(); positions.len()];

        Self {
            registry,
            positions,
            values,
            window_start: now,
            window_length,
            log,
        }
    }

    /// Record the measurements of one decoded message for a channel
    ///
    /// Only temperature is calibrated. Measurements the channel has no column
    /// for are skipped without failing the rest of the record.
    ///
    /// # Returns
    /// Number of columns updated
    pub fn observe(&mut self, channel: &str, record: &TelemetryRecord) -> usize {
        let mut updated = 0;

        if let Some(temperature) = record.temperature {
            let offset = self
                .registry
                .channel(channel)
                .map(|entry| entry.offset(Measurement::Temperature))
                .unwrap_or(0.0);
            let temperature = temperature + offset;
            if self.store(Measurement::Temperature, channel, format!("{:.1}", temperature)) {
                info!(target: self.log.target(), "{} temperature: {:.1}", channel, temperature);
                updated += 1;
            }
        }

        if let Some(humidity) = record.humidity {
            if self.store(Measurement::Humidity, channel, format!("{}", humidity.trunc() as i64)) {
                info!(target: self.log.target(), "{} humidity: {:.1}", channel, humidity);
                updated += 1;
            }
        }

        if let Some(rain) = record.rain {
            if self.store(Measurement::Rain, channel, format!("{}", rain.trunc() as i64)) {
                info!(target: self.log.target(), "{} rain: {:.1}", channel, rain);
                updated += 1;
            }
        }

        if let Some(battery) = record.battery.as_deref() {
            let low = is_battery_low(battery);
            if low {
                warn!(target: self.log.target(), "{} battery low", channel);
            }
            if self.store(Measurement::Battery, channel, format!("{}", u8::from(low))) {
                updated += 1;
            }
        }

        updated
    }

    /// Close the window if it has elapsed
    ///
    /// # Returns
    /// The window snapshot tagged with `now`, or None while the window is open
    pub fn maybe_flush(&mut self, now: OffsetDateTime) -> Option<FlushPayload> {
        let deadline = self.window_start + self.window_length;
        if now < deadline {
            debug!(
                target: self.log.target(),
                "{} seconds before next update",
                duration_to_seconds(deadline - now)
            );
            return None;
        }

        let values = std::mem::replace(
            &mut self.values,
            vec![UNKNOWN.to_string(); self.positions.len()],
        );
        self.window_start = now;

        debug!(
            target: self.log.target(),
            "Window closed at {}: {}",
            format_datetime(&now),
            values.join(":")
        );

        Some(FlushPayload {
            timestamp: now,
            values,
        })
    }

    #[cfg(test)]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    fn store(&mut self, measurement: Measurement, channel: &str, value: String) -> bool {
        let column = format!("{}_{}", measurement.prefix(), channel);
        match self.positions.get(&column) {
            Some(&pos) => {
                self.values[pos] = value;
                true
            }
            None => false,
        }
    }
}

/// Anything but "OK", in any case, means the sensor wants new batteries
pub fn is_battery_low(status: &str) -> bool {
    !status.eq_ignore_ascii_case("OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::logging::RRD_TARGET;

    const LOG: LogContext = LogContext::new(RRD_TARGET);

    const CONFIG: &str = "
[rrd]
file = weather.rrd

[garden]
id = 1:0:2
protocol = 19
temperature = yes
humidity = yes
battery = yes
temperature_offset = -0.5
humidity_offset = 3

[roof]
id = 77:0:0
protocol = 40
rain = yes
temperature = yes
temperature_offset = 1.0
";

    fn start() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn cache() -> AggregationCache {
        let config = SensorConfig::parse(CONFIG).unwrap();
        let registry = Arc::new(ChannelRegistry::load(&config, LOG).unwrap());
        AggregationCache::new(registry, Duration::seconds(60), start(), LOG)
    }

    /// Value of a column by name, for readable assertions
    fn value<'a>(cache: &'a AggregationCache, column: &str) -> &'a str {
        let pos = cache.registry.columns().iter().position(|c| c.name() == column).unwrap();
        &cache.values()[pos]
    }

    fn record(json: &str) -> TelemetryRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_new_cache_is_unknown() {
        let cache = cache();
        assert!(cache.values().iter().all(|v| v == UNKNOWN));
        assert_eq!(cache.values().len(), 5);
    }

    #[test]
    fn test_temperature_calibration() {
        let mut cache = cache();
        let updated = cache.observe("garden", &record(r#"{"temperature_C":21.3}"#));
        assert_eq!(updated, 1);
        assert_eq!(value(&cache, "temp_garden"), "20.8");
    }

    #[test]
    fn test_only_temperature_is_calibrated() {
        let mut cache = cache();
        cache.observe("garden", &record(r#"{"humidity":45.7}"#));
        assert_eq!(value(&cache, "humi_garden"), "45");
    }

    #[test]
    fn test_rain_is_integer() {
        let mut cache = cache();
        cache.observe("roof", &record(r#"{"rain":128.9}"#));
        assert_eq!(value(&cache, "rain_roof"), "128");
    }

    #[test]
    fn test_battery_status() {
        assert!(!is_battery_low("OK"));
        assert!(!is_battery_low("ok"));
        assert!(!is_battery_low("Ok"));
        assert!(is_battery_low("LOW"));
        assert!(is_battery_low(""));

        let mut cache = cache();
        cache.observe("garden", &record(r#"{"battery":"ok"}"#));
        assert_eq!(value(&cache, "batt_garden"), "0");
        cache.observe("garden", &record(r#"{"battery":"LOW"}"#));
        assert_eq!(value(&cache, "batt_garden"), "1");
    }

    #[test]
    fn test_low_battery_is_warned_once() {
        let mut cache = cache();
        // Loading the registry warns about the humidity offset
        testing_logger::setup();
        cache.observe("garden", &record(r#"{"battery":"OK"}"#));
        cache.observe("garden", &record(r#"{"battery":"LOW"}"#));

        testing_logger::validate(|logs| {
            let warnings: Vec<_> = logs
                .iter()
                .filter(|log| log.level == log::Level::Warn)
                .collect();
            assert_eq!(warnings.len(), 1);
            assert_eq!(warnings[0].body, "garden battery low");
            assert_eq!(warnings[0].target, RRD_TARGET);
        });
    }

    #[test]
    fn test_missing_column_is_skipped() {
        let mut cache = cache();
        // roof has no humidity or battery column
        let updated = cache.observe(
            "roof",
            &record(r#"{"temperature_C":4.0,"humidity":80,"battery":"LOW"}"#),
        );
        assert_eq!(updated, 1);
        assert_eq!(value(&cache, "temp_roof"), "5.0");
    }

    #[test]
    fn test_last_value_wins() {
        let mut cache = cache();
        cache.observe("garden", &record(r#"{"temperature_C":18.0}"#));
        cache.observe("garden", &record(r#"{"temperature_C":19.0}"#));
        assert_eq!(value(&cache, "temp_garden"), "18.5");
    }

    #[test]
    fn test_no_flush_before_window_elapses() {
        let mut cache = cache();
        cache.observe("garden", &record(r#"{"temperature_C":21.3}"#));
        let before = cache.values().to_vec();

        let almost = start() + Duration::seconds(59);
        assert!(cache.maybe_flush(almost).is_none());
        assert_eq!(cache.values(), &before[..]);
        assert_eq!(cache.window_start, start());
    }

    #[test]
    fn test_flush_at_boundary() {
        let mut cache = cache();
        cache.observe("garden", &record(r#"{"temperature_C":21.3,"humidity":55}"#));
        cache.observe("roof", &record(r#"{"rain":12}"#));

        let boundary = start() + Duration::seconds(60);
        let payload = cache.maybe_flush(boundary).unwrap();
        assert_eq!(payload.timestamp, boundary);
        // batt_garden, humi_garden, rain_roof, temp_garden, temp_roof
        assert_eq!(payload.values, vec!["U", "55", "12", "20.8", "U"]);

        assert!(cache.values().iter().all(|v| v == UNKNOWN));
        assert_eq!(cache.window_start, boundary);
        assert!(cache.maybe_flush(boundary + Duration::seconds(1)).is_none());
    }

    #[test]
    fn test_untouched_window_flushes_unknown() {
        let mut cache = cache();
        let payload = cache.maybe_flush(start() + Duration::minutes(5)).unwrap();
        assert!(payload.values.iter().all(|v| v == UNKNOWN));
        assert!(!payload.values.iter().any(|v| v == "0"));
    }

    #[test]
    fn test_unknown_channel_changes_nothing() {
        let mut cache = cache();
        let updated = cache.observe("attic", &record(r#"{"temperature_C":30.0}"#));
        assert_eq!(updated, 0);
        assert!(cache.values().iter().all(|v| v == UNKNOWN));
    }
}
