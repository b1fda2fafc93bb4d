//! CSV output plugin.
//!
//! Appends one line per measurement to a configured file. Mostly useful
//! as a local record and as the reference second sink: it shares nothing
//! with MQTT beyond the [`Plugin`] capability.

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::CsvConfig;
use crate::data::Measurement;
use crate::plugins::{Plugin, PluginError};

/// Header written when the file is created empty.
const HEADER: &str = "timestamp,person,weight_kg,stabilized,fat_percent,water_percent,muscle_percent,bone_kg,kcal,bmi\n";

/// Append-only CSV sink.
pub struct CsvPlugin {
    config: CsvConfig,
    // Appends from concurrent sessions must not interleave mid-line.
    write_lock: Mutex<()>,
}

impl CsvPlugin {
    /// Create the plugin. The file is opened lazily on first publish.
    pub fn new(config: CsvConfig) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
        }
    }

    fn format_line(measurement: &Measurement) -> String {
        let optional = |value: Option<f64>| {
            value.map(|v| format!("{:.1}", v)).unwrap_or_default()
        };

        format!(
            "{},{},{:.1},{},{},{},{},{},{},{}\n",
            measurement.timestamp.to_rfc3339(),
            measurement.person,
            measurement.weight_kg,
            measurement.stabilized,
            optional(measurement.fat_percent),
            optional(measurement.water_percent),
            optional(measurement.muscle_percent),
            optional(measurement.bone_kg),
            measurement.kcal.map(|v| v.to_string()).unwrap_or_default(),
            optional(measurement.bmi),
        )
    }
}

#[async_trait]
impl Plugin for CsvPlugin {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn publish(&self, measurement: &Measurement) -> Result<(), PluginError> {
        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .await?;

        if file.metadata().await?.len() == 0 {
            file.write_all(HEADER.as_bytes()).await?;
        }

        file.write_all(Self::format_line(measurement).as_bytes())
            .await?;
        file.flush().await?;

        debug!(
            "Appended measurement for person {} to {}",
            measurement.person,
            self.config.path.display()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn measurement() -> Measurement {
        Measurement::new(1, Utc.with_ymd_and_hms(2026, 3, 14, 7, 30, 0).unwrap(), 71.2)
    }

    #[test]
    fn test_format_line_weight_only() {
        let line = CsvPlugin::format_line(&measurement());
        assert_eq!(line, "2026-03-14T07:30:00+00:00,1,71.2,true,,,,,,\n");
    }

    #[test]
    fn test_format_line_with_composition() {
        let mut m = measurement();
        m.fat_percent = Some(19.1);
        m.water_percent = Some(57.3);
        m.muscle_percent = Some(42.8);
        m.bone_kg = Some(3.2);
        m.kcal = Some(2313);
        m.bmi = Some(22.0);

        let line = CsvPlugin::format_line(&m);
        assert_eq!(
            line,
            "2026-03-14T07:30:00+00:00,1,71.2,true,19.1,57.3,42.8,3.2,2313,22.0\n"
        );
    }

    #[tokio::test]
    async fn test_publish_appends_with_header() {
        let dir = std::env::temp_dir().join("medisana-rust-ble-csv-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("measurements.csv");
        let _ = tokio::fs::remove_file(&path).await;

        let plugin = CsvPlugin::new(CsvConfig { path: path.clone() });
        plugin.publish(&measurement()).await.unwrap();
        plugin.publish(&measurement()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,person"));
        assert!(lines[1].starts_with("2026-03-14T07:30:00"));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
