//! Measurement data structures.
//!
//! Contains the core types produced by decoding scale records: merged
//! measurements ready for dispatch, raw body-composition records, and
//! person profiles.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A decoded weighing, immutable once produced.
///
/// Body-composition fields are present only when the scale recorded an
/// impedance measurement alongside the weight and the session merged the
/// two records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    /// Person slot on the scale (1-8).
    pub person: u8,

    /// When the weighing happened, UTC.
    pub timestamp: DateTime<Utc>,

    /// Weight in kilograms, one decimal of precision.
    pub weight_kg: f64,

    /// Whether the reading had settled when the scale stored it.
    pub stabilized: bool,

    /// Body fat percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fat_percent: Option<f64>,

    /// Total body water percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_percent: Option<f64>,

    /// Muscle mass percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muscle_percent: Option<f64>,

    /// Bone mass in kilograms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bone_kg: Option<f64>,

    /// Estimated daily energy requirement in kcal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kcal: Option<u16>,

    /// Body mass index, if a height is known for the person slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bmi: Option<f64>,
}

impl Measurement {
    /// Create a weight-only measurement.
    pub fn new(person: u8, timestamp: DateTime<Utc>, weight_kg: f64) -> Self {
        Self {
            person,
            timestamp,
            weight_kg,
            stabilized: true,
            fat_percent: None,
            water_percent: None,
            muscle_percent: None,
            bone_kg: None,
            kcal: None,
            bmi: None,
        }
    }

    /// Whether any body-composition field is present.
    pub fn has_body_composition(&self) -> bool {
        self.fat_percent.is_some()
            || self.water_percent.is_some()
            || self.muscle_percent.is_some()
            || self.bone_kg.is_some()
            || self.kcal.is_some()
    }

    /// Fold a body-composition record into this measurement.
    pub(crate) fn merge_body(&mut self, body: &BodyComposition) {
        self.kcal = Some(body.kcal);
        self.fat_percent = Some(body.fat_percent);
        self.water_percent = Some(body.water_percent);
        self.muscle_percent = Some(body.muscle_percent);
        self.bone_kg = Some(body.bone_kg);
    }
}

/// A raw body-composition record (0x6F), before merging with its weight.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyComposition {
    /// Person slot on the scale (1-8).
    pub person: u8,
    /// When the weighing happened, UTC.
    pub timestamp: DateTime<Utc>,
    /// Estimated daily energy requirement in kcal.
    pub kcal: u16,
    /// Body fat percentage.
    pub fat_percent: f64,
    /// Total body water percentage.
    pub water_percent: f64,
    /// Muscle mass percentage.
    pub muscle_percent: f64,
    /// Bone mass in kilograms.
    pub bone_kg: f64,
}

/// Gender as stored in a person profile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// Activity level as stored in a person profile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Normal,
    High,
}

/// A person profile record (0x84).
///
/// The height feeds BMI computation for that slot's measurements within
/// the same session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonProfile {
    /// Person slot on the scale (1-8).
    pub slot: u8,
    /// Gender configured on the scale.
    pub gender: Gender,
    /// Age in years.
    pub age: u8,
    /// Height in centimeters.
    pub height_cm: u8,
    /// Activity level configured on the scale.
    pub activity: ActivityLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 7, 30, 0).unwrap()
    }

    #[test]
    fn test_weight_only_measurement() {
        let m = Measurement::new(2, timestamp(), 71.2);
        assert_eq!(m.person, 2);
        assert_eq!(m.weight_kg, 71.2);
        assert!(!m.has_body_composition());
    }

    #[test]
    fn test_merge_body() {
        let mut m = Measurement::new(1, timestamp(), 82.4);
        m.merge_body(&BodyComposition {
            person: 1,
            timestamp: timestamp(),
            kcal: 2313,
            fat_percent: 19.1,
            water_percent: 57.3,
            muscle_percent: 42.8,
            bone_kg: 3.2,
        });

        assert!(m.has_body_composition());
        assert_eq!(m.fat_percent, Some(19.1));
        assert_eq!(m.kcal, Some(2313));
        assert_eq!(m.weight_kg, 82.4);
    }

    #[test]
    fn test_serialized_payload_omits_missing_fields() {
        let m = Measurement::new(1, timestamp(), 71.2);
        let json = serde_json::to_value(&m).unwrap();

        assert_eq!(json["weight_kg"], 71.2);
        assert_eq!(json["person"], 1);
        assert!(json.get("fat_percent").is_none());
        assert!(json.get("bmi").is_none());
    }
}
