// ABOUTME: Rules for comparing a vehicle snapshot with its predecessor on the same route.
// ABOUTME: Produces a Transition describing movement, fuel, cleanliness, and plate changes.

use serde::{Deserialize, Serialize};

use crate::model::VehicleSnapshot;

/// Thresholds that decide what counts as a change between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionRules {
    /// A vehicle has moved when the two positions are strictly farther apart
    /// than this.
    pub min_move_meters: f64,
    /// Smallest absolute fuel difference that counts as a fuel change.
    pub min_fuel_delta: i64,
    /// Smallest fuel increase that counts as a refuel.
    pub refuel_threshold: i64,
}

impl Default for TransitionRules {
    fn default() -> Self {
        Self {
            min_move_meters: 25.0,
            min_fuel_delta: 1,
            refuel_threshold: 10,
        }
    }
}

/// A cleanliness label change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanlinessChange {
    pub from: String,
    pub to: String,
}

/// What changed from one snapshot to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub elapsed_secs: i64,
    pub distance_meters: f64,
    pub moved: bool,
    pub address_changed: bool,
    pub fuel_delta: i64,
    pub fuel_changed: bool,
    pub refueled: bool,
    pub cleanliness_change: Option<CleanlinessChange>,
    pub plate_changed: bool,
}

impl Transition {
    /// True when the vehicle moved, its fuel changed, or its cleanliness changed.
    pub fn is_material(&self) -> bool {
        self.moved || self.fuel_changed || self.cleanliness_change.is_some()
    }
}

impl TransitionRules {
    /// Compare `current` against the snapshot that came right before it.
    pub fn compare(&self, previous: &VehicleSnapshot, current: &VehicleSnapshot) -> Transition {
        let distance_meters = previous.position.distance_meters(&current.position);
        // Fuel levels come straight from input, so the delta saturates.
        let fuel_delta = current.fuel_level.saturating_sub(previous.fuel_level);

        let cleanliness_change = (previous.cleanliness != current.cleanliness).then(|| {
            CleanlinessChange {
                from: previous.cleanliness.clone(),
                to: current.cleanliness.clone(),
            }
        });

        Transition {
            elapsed_secs: (current.captured_at - previous.captured_at).num_seconds(),
            distance_meters,
            moved: distance_meters > self.min_move_meters,
            address_changed: previous.position.address.trim() != current.position.address.trim(),
            fuel_delta,
            fuel_changed: fuel_delta.unsigned_abs() >= self.min_fuel_delta.max(1).unsigned_abs(),
            refueled: fuel_delta >= self.refuel_threshold.max(1),
            cleanliness_change,
            plate_changed: previous.license_plate != current.license_plate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Position;
    use chrono::DateTime;

    fn snap(secs: i64, fuel: i64, cleanliness: &str, lat: f64, lon: f64) -> VehicleSnapshot {
        VehicleSnapshot {
            identity: "Mini42".to_string(),
            captured_at: DateTime::from_timestamp(secs, 0).unwrap(),
            fuel_level: fuel,
            cleanliness: cleanliness.to_string(),
            license_plate: "M-DN 4242".to_string(),
            position: Position::new("Leopoldstr. 1", lat, lon),
        }
    }

    #[test]
    fn identical_snapshots_are_not_material() {
        let a = snap(100, 80, "CLEAN", 48.1549, 11.5843);
        let b = snap(200, 80, "CLEAN", 48.1549, 11.5843);

        let t = TransitionRules::default().compare(&a, &b);

        assert_eq!(t.elapsed_secs, 100);
        assert_eq!(t.distance_meters, 0.0);
        assert!(!t.moved);
        assert!(!t.address_changed);
        assert!(!t.fuel_changed);
        assert!(t.cleanliness_change.is_none());
        assert!(!t.plate_changed);
        assert!(!t.is_material());
    }

    #[test]
    fn cleanliness_change_reports_both_labels() {
        let a = snap(100, 80, "clean", 48.1549, 11.5843);
        let b = snap(200, 80, "dirty", 48.1549, 11.5843);

        let t = TransitionRules::default().compare(&a, &b);

        assert_eq!(
            t.cleanliness_change,
            Some(CleanlinessChange {
                from: "clean".to_string(),
                to: "dirty".to_string(),
            })
        );
        assert!(!t.moved);
        assert!(t.is_material());
    }

    #[test]
    fn jitter_below_threshold_is_not_a_move() {
        // About 15 m apart.
        let a = snap(100, 80, "CLEAN", 48.1549, 11.5843);
        let b = snap(200, 80, "CLEAN", 48.1549, 11.5845);

        let t = TransitionRules::default().compare(&a, &b);
        assert!(t.distance_meters > 10.0 && t.distance_meters < 20.0);
        assert!(!t.moved);

        let strict = TransitionRules {
            min_move_meters: 5.0,
            ..TransitionRules::default()
        };
        assert!(strict.compare(&a, &b).moved);
    }

    #[test]
    fn driving_across_town_is_a_move() {
        let a = snap(100, 80, "CLEAN", 48.1549, 11.5843);
        let b = snap(1900, 71, "CLEAN", 48.1374, 11.5755);

        let t = TransitionRules::default().compare(&a, &b);

        assert!(t.moved);
        assert!(t.distance_meters > 1_000.0);
        assert_eq!(t.fuel_delta, -9);
        assert!(t.fuel_changed);
        assert!(!t.refueled);
    }

    #[test]
    fn refuel_needs_threshold_increase() {
        let rules = TransitionRules::default();
        let a = snap(100, 20, "CLEAN", 48.1, 11.5);

        let small = rules.compare(&a, &snap(200, 25, "CLEAN", 48.1, 11.5));
        assert!(small.fuel_changed);
        assert!(!small.refueled);

        let big = rules.compare(&a, &snap(200, 95, "CLEAN", 48.1, 11.5));
        assert_eq!(big.fuel_delta, 75);
        assert!(big.refueled);
    }

    #[test]
    fn extreme_fuel_levels_saturate() {
        let rules = TransitionRules::default();

        let up = rules.compare(&snap(100, -1, "CLEAN", 48.1, 11.5), &snap(200, i64::MAX, "CLEAN", 48.1, 11.5));
        assert_eq!(up.fuel_delta, i64::MAX);
        assert!(up.fuel_changed);
        assert!(up.refueled);

        let down = rules.compare(&snap(100, i64::MAX, "CLEAN", 48.1, 11.5), &snap(200, i64::MIN, "CLEAN", 48.1, 11.5));
        assert_eq!(down.fuel_delta, i64::MIN);
        assert!(down.fuel_changed);
        assert!(!down.refueled);
    }

    #[test]
    fn plate_change_is_reported_but_not_material() {
        let a = snap(100, 80, "CLEAN", 48.1, 11.5);
        let mut b = snap(200, 80, "CLEAN", 48.1, 11.5);
        b.license_plate = "M-DN 9999".to_string();

        let t = TransitionRules::default().compare(&a, &b);
        assert!(t.plate_changed);
        assert!(!t.is_material());
    }
}
