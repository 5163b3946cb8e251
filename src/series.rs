//! Synthetic displacement trend per point, for the chart popup only.
//!
//! Not sensor data: each category has a fixed baseline curve (cumulative
//! vertical displacement in mm over a year) and every point gets its own
//! bounded wobble around it, seeded from its id so the chart never changes
//! between views.

use crate::types::{PointId, Priority};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

pub const LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Largest distance, in mm, between a generated value and its baseline.
pub const PERTURBATION_MM: f64 = 1.5;

const HIGH: [f64; 12] = [
    0.0, -2.5, -5.1, -7.8, -10.4, -13.2, -16.0, -18.9, -21.7, -24.6, -27.5, -30.4,
];
const MEDIUM: [f64; 12] = [
    0.0, -1.2, -2.5, -3.6, -4.9, -6.1, -7.4, -8.6, -9.9, -11.1, -12.4, -13.6,
];
const LOW: [f64; 12] = [
    0.0, -0.4, -0.7, -1.1, -1.5, -1.8, -2.2, -2.6, -2.9, -3.3, -3.7, -4.0,
];
const CUSTOM: [f64; 12] = [
    0.0, 0.3, -0.2, 0.4, -0.1, 0.2, -0.3, 0.1, 0.4, -0.2, 0.3, 0.0,
];
const FALLBACK: [f64; 12] = [0.0; 12];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub label: &'static str,
    pub value: f64,
}

pub fn baseline(category: &Priority) -> &'static [f64; 12] {
    match category {
        Priority::High => &HIGH,
        Priority::Medium => &MEDIUM,
        Priority::Low => &LOW,
        Priority::Custom => &CUSTOM,
        Priority::Other(_) => &FALLBACK,
    }
}

pub fn generate(category: &Priority, id: PointId) -> Vec<SeriesPoint> {
    baseline(category)
        .iter()
        .zip(LABELS)
        .enumerate()
        .map(|(index, (base, label))| SeriesPoint {
            label,
            value: round2(base + perturbation(id, index)),
        })
        .collect()
}

fn perturbation(id: PointId, index: usize) -> f64 {
    let seed = (u64::from(id) << 32) | index as u64;
    // The series must not change between builds or dependency upgrades.
    ChaCha8Rng::seed_from_u64(seed).gen_range(-PERTURBATION_MM..=PERTURBATION_MM)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_series() {
        for id in [1, 6, 42, 9_999] {
            assert_eq!(generate(&Priority::High, id), generate(&Priority::High, id));
        }
    }

    #[test]
    fn ids_decorrelate() {
        let series: Vec<_> = (1..=20).map(|id| generate(&Priority::Medium, id)).collect();
        let first = &series[0];
        assert!(series.iter().skip(1).any(|s| s != first));
        assert_ne!(generate(&Priority::Low, 1), generate(&Priority::Low, 2));
    }

    #[test]
    fn values_stay_near_baseline() {
        for category in [
            Priority::High,
            Priority::Medium,
            Priority::Low,
            Priority::Custom,
            Priority::Other("unknown".into()),
        ] {
            let base = baseline(&category);
            for id in 0..50 {
                for (i, point) in generate(&category, id).iter().enumerate() {
                    let drift = (point.value - base[i]).abs();
                    assert!(drift <= PERTURBATION_MM + 0.005, "{category:?} id {id} index {i}");
                }
            }
        }
    }

    #[test]
    fn values_have_two_decimals_and_shared_labels() {
        let series = generate(&Priority::Custom, 11);
        assert_eq!(series.len(), LABELS.len());
        for (point, label) in series.iter().zip(LABELS) {
            assert_eq!(point.label, label);
            assert_eq!(round2(point.value), point.value);
        }
    }

    #[test]
    fn unknown_category_uses_flat_baseline() {
        assert_eq!(baseline(&Priority::Other("critical".into())), &[0.0; 12]);
    }
}
