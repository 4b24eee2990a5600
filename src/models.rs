//! Data models for the telemetry pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// One measured quantity of a sensor reading.
///
/// Each metric owns exactly one column of the readings table, so the
/// column name is fixed at compile time and never taken from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temp,
    WindSpeed,
    RelHumidity,
    Co2,
}

impl Metric {
    // ---
    pub const ALL: [Metric; 4] = [
        Metric::Temp,
        Metric::WindSpeed,
        Metric::RelHumidity,
        Metric::Co2,
    ];

    /// Column holding this metric.
    pub fn column(self) -> &'static str {
        match self {
            Metric::Temp => "temp",
            Metric::WindSpeed => "wind_speed",
            Metric::RelHumidity => "rel_humidity",
            Metric::Co2 => "co2",
        }
    }

    /// Inclusive range synthetic values are drawn from.
    pub fn range(self) -> RangeInclusive<i32> {
        match self {
            Metric::Temp => 8..=15,
            Metric::WindSpeed => 15..=25,
            Metric::RelHumidity => 40..=70,
            Metric::Co2 => 500..=1500,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown metric: {0:?}")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.column() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// A sensor reading as produced by the generator.
///
/// The surrogate `id` is assigned by the store on insert and is not part
/// of the value written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reading {
    // ---
    pub sensor_id: i32,
    pub temp: i32,
    pub wind_speed: i32,
    pub rel_humidity: i32,
    pub co2: i32,
}

impl Reading {
    // ---
    pub fn value(&self, metric: Metric) -> i32 {
        match metric {
            Metric::Temp => self.temp,
            Metric::WindSpeed => self.wind_speed,
            Metric::RelHumidity => self.rel_humidity,
            Metric::Co2 => self.co2,
        }
    }
}

/// Min, max and average of one metric for one sensor, as computed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricStats {
    // ---
    pub min: i32,
    pub max: i32,
    pub average: i64,
}

/// Per-sensor, per-metric statistics over the whole reading history.
///
/// Rebuilt from scratch on every aggregation and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    // ---
    pub generated_at: DateTime<Utc>,
    pub sensors: BTreeMap<i32, BTreeMap<Metric, MetricStats>>,
}

impl StatsReport {
    // ---
    pub fn new() -> Self {
        StatsReport {
            generated_at: Utc::now(),
            sensors: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, sensor_id: i32, metric: Metric, stats: MetricStats) {
        self.sensors
            .entry(sensor_id)
            .or_default()
            .insert(metric, stats);
    }

    pub fn get(&self, sensor_id: i32, metric: Metric) -> Option<&MetricStats> {
        self.sensors.get(&sensor_id)?.get(&metric)
    }
}

impl Default for StatsReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_metric_parse_round_trip() {
        // ---
        for metric in Metric::ALL {
            assert_eq!(metric.column().parse::<Metric>().unwrap(), metric);
        }
        assert_eq!("co2".parse::<Metric>().unwrap(), Metric::Co2);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        // ---
        let err = "pressure".parse::<Metric>().unwrap_err();
        assert_eq!(err.to_string(), "unknown metric: \"pressure\"");

        // Column names are matched exactly
        assert!("TEMP".parse::<Metric>().is_err());
    }

    #[test]
    fn test_metric_ranges() {
        // ---
        assert_eq!(Metric::Temp.range(), 8..=15);
        assert_eq!(Metric::WindSpeed.range(), 15..=25);
        assert_eq!(Metric::RelHumidity.range(), 40..=70);
        assert_eq!(Metric::Co2.range(), 500..=1500);
    }

    #[test]
    fn test_reading_value_by_metric() {
        // ---
        let r = Reading {
            sensor_id: 7,
            temp: 9,
            wind_speed: 20,
            rel_humidity: 55,
            co2: 900,
        };
        assert_eq!(r.value(Metric::Temp), 9);
        assert_eq!(r.value(Metric::WindSpeed), 20);
        assert_eq!(r.value(Metric::RelHumidity), 55);
        assert_eq!(r.value(Metric::Co2), 900);
    }

    #[test]
    fn test_report_json_shape() {
        // ---
        let mut report = StatsReport::new();
        report.insert(
            3,
            Metric::Temp,
            MetricStats {
                min: 8,
                max: 15,
                average: 11,
            },
        );
        report.insert(
            3,
            Metric::Co2,
            MetricStats {
                min: 600,
                max: 1200,
                average: 850,
            },
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sensors"]["3"]["temp"]["min"], 8);
        assert_eq!(json["sensors"]["3"]["temp"]["max"], 15);
        assert_eq!(json["sensors"]["3"]["temp"]["average"], 11);
        assert_eq!(json["sensors"]["3"]["co2"]["average"], 850);
        assert!(json["generated_at"].is_string());

        assert_eq!(report.get(3, Metric::Co2).unwrap().max, 1200);
        assert!(report.get(3, Metric::WindSpeed).is_none());
        assert!(report.get(4, Metric::Temp).is_none());
    }
}
