//! Sync session record accumulation.
//!
//! A [`SyncSession`] collects the records decoded during one connection to
//! a scale and merges them into dispatchable measurements at the end of
//! the transfer. The scale reports one weighing as two records, a stored
//! weight (0x1D) and, when impedance was measured, a body composition
//! record (0x6F), matched here by person slot and timestamp.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::data::measurement::{BodyComposition, Measurement, PersonProfile};
use crate::protocol::bmi;

/// Matching window between a weight record and its body record.
///
/// Both records of one weighing are stamped from the same scale clock,
/// but the body record is written a moment after the weight settles.
const MERGE_TOLERANCE_SECS: i64 = 10;

/// Records retrieved during one connection to a scale.
#[derive(Debug)]
pub struct SyncSession {
    /// Address of the device this session talked to.
    address: String,
    /// Instant the scale clock was synchronized.
    synced_at: DateTime<Utc>,
    /// Weight measurements in decode order.
    weights: Vec<Measurement>,
    /// Body composition records awaiting their weight record.
    bodies: Vec<BodyComposition>,
    /// Person profiles observed this session, by slot.
    profiles: HashMap<u8, PersonProfile>,
    /// Whether the scale acknowledged the transfer as delivered.
    acknowledged: bool,
}

impl SyncSession {
    /// Start an empty session.
    pub fn new(address: impl Into<String>, synced_at: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            synced_at,
            weights: Vec::new(),
            bodies: Vec::new(),
            profiles: HashMap::new(),
            acknowledged: false,
        }
    }

    /// The device address this session belongs to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The instant the scale clock was synchronized.
    pub fn synced_at(&self) -> DateTime<Utc> {
        self.synced_at
    }

    /// Add a decoded weight record, dropping exact duplicates.
    pub fn add_weight(&mut self, measurement: Measurement) {
        let duplicate = self.weights.iter().any(|m| {
            m.person == measurement.person
                && m.timestamp == measurement.timestamp
                && m.weight_kg == measurement.weight_kg
        });

        if duplicate {
            debug!(
                "Skipping duplicate weight record: person {} at {}",
                measurement.person, measurement.timestamp
            );
            return;
        }

        self.weights.push(measurement);
    }

    /// Add a decoded body composition record.
    pub fn add_body(&mut self, body: BodyComposition) {
        self.bodies.push(body);
    }

    /// Record a person profile; later profiles for a slot replace earlier.
    pub fn add_person(&mut self, profile: PersonProfile) {
        self.profiles.insert(profile.slot, profile);
    }

    /// Number of weight records collected so far.
    pub fn record_count(&self) -> usize {
        self.weights.len()
    }

    /// Whether the session decoded any records at all.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty() && self.bodies.is_empty()
    }

    /// Mark the transfer as acknowledged by the scale.
    pub fn mark_acknowledged(&mut self) {
        self.acknowledged = true;
    }

    /// Whether the scale acknowledged the transfer.
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Merge the collected records into dispatchable measurements.
    ///
    /// Weight order is preserved. Body records fold into the matching
    /// weight record; a body record with no matching weight cannot satisfy
    /// the weight invariant and is dropped with a warning. BMI is filled
    /// in where a height is known; the configured height wins over one
    /// reported by the scale this session.
    pub fn merged(&self, configured_heights: &HashMap<u8, f64>) -> Vec<Measurement> {
        let mut measurements = self.weights.clone();

        for body in &self.bodies {
            let matched = measurements.iter_mut().find(|m| {
                m.person == body.person
                    && !m.has_body_composition()
                    && (m.timestamp - body.timestamp).num_seconds().abs() <= MERGE_TOLERANCE_SECS
            });

            match matched {
                Some(measurement) => measurement.merge_body(body),
                None => warn!(
                    "Dropping body record without matching weight: person {} at {}",
                    body.person, body.timestamp
                ),
            }
        }

        for measurement in &mut measurements {
            let height_cm = configured_heights
                .get(&measurement.person)
                .copied()
                .or_else(|| {
                    self.profiles
                        .get(&measurement.person)
                        .map(|p| f64::from(p.height_cm))
                });

            if let Some(height_cm) = height_cm {
                measurement.bmi = bmi(measurement.weight_kg, height_cm);
            }
        }

        measurements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::measurement::{ActivityLevel, Gender};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn body(person: u8, timestamp: DateTime<Utc>) -> BodyComposition {
        BodyComposition {
            person,
            timestamp,
            kcal: 2100,
            fat_percent: 18.5,
            water_percent: 55.0,
            muscle_percent: 40.2,
            bone_kg: 3.1,
        }
    }

    #[test]
    fn test_merge_by_person_and_timestamp() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_weight(Measurement::new(1, at(0), 71.2));
        session.add_weight(Measurement::new(2, at(0), 85.0));
        session.add_body(body(1, at(3)));

        let merged = session.merged(&HashMap::new());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].fat_percent, Some(18.5));
        assert_eq!(merged[0].weight_kg, 71.2);
        assert!(!merged[1].has_body_composition());
    }

    #[test]
    fn test_merge_respects_tolerance() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_weight(Measurement::new(1, at(0), 71.2));
        session.add_body(body(1, at(60)));

        let merged = session.merged(&HashMap::new());
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].has_body_composition());
    }

    #[test]
    fn test_unmatched_body_dropped() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_body(body(5, at(0)));

        assert!(session.merged(&HashMap::new()).is_empty());
        assert!(!session.is_empty());
    }

    #[test]
    fn test_duplicate_weight_skipped() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_weight(Measurement::new(1, at(0), 71.2));
        session.add_weight(Measurement::new(1, at(0), 71.2));

        assert_eq!(session.record_count(), 1);
    }

    #[test]
    fn test_dispatch_order_is_decode_order() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_weight(Measurement::new(3, at(50), 90.0));
        session.add_weight(Measurement::new(1, at(0), 71.2));
        session.add_weight(Measurement::new(2, at(25), 60.5));

        let order: Vec<u8> = session
            .merged(&HashMap::new())
            .iter()
            .map(|m| m.person)
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn test_bmi_from_configured_height() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_weight(Measurement::new(1, at(0), 71.2));

        let heights = HashMap::from([(1u8, 180.0)]);
        let merged = session.merged(&heights);
        assert_eq!(merged[0].bmi, Some(22.0));
    }

    #[test]
    fn test_bmi_from_session_profile() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_weight(Measurement::new(1, at(0), 71.2));
        session.add_person(PersonProfile {
            slot: 1,
            gender: Gender::Female,
            age: 34,
            height_cm: 180,
            activity: ActivityLevel::Normal,
        });

        let merged = session.merged(&HashMap::new());
        assert_eq!(merged[0].bmi, Some(22.0));
    }

    #[test]
    fn test_configured_height_wins_over_profile() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        session.add_weight(Measurement::new(1, at(0), 71.2));
        session.add_person(PersonProfile {
            slot: 1,
            gender: Gender::Male,
            age: 40,
            height_cm: 160,
            activity: ActivityLevel::Normal,
        });

        let heights = HashMap::from([(1u8, 180.0)]);
        let merged = session.merged(&heights);
        assert_eq!(merged[0].bmi, Some(22.0));
    }

    #[test]
    fn test_acknowledgment_state() {
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", at(100));
        assert!(!session.is_acknowledged());
        session.mark_acknowledged();
        assert!(session.is_acknowledged());
    }
}
