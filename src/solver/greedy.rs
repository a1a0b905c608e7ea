//! Greedy fallback heuristic.
//!
//! Best-effort assignment with no capacity or time-window enforcement:
//! output is advisory, for when the constrained solver is unavailable or a
//! batch is too small to justify it.

use crate::geo::{haversine_km, Point};
use crate::model::{Stop, StopId, TrafficWeights};

/// One vehicle's accumulated assignment.
#[derive(Debug, Clone)]
pub struct VehicleLoad {
    pub vehicle_index: usize,
    pub stop_ids: Vec<StopId>,
    /// Accumulated cost (distance km + predicted delay min).
    pub load: f64,
}

/// Assigns stops to vehicles by descending priority.
///
/// Priority per stop is `(predicted delay + distance from `reference`)`
/// scaled by the stop's traffic weight. Each stop goes to the vehicle with
/// the lowest accumulated load; ties break toward the lowest vehicle index,
/// so the result is deterministic for identical input.
pub fn assign(
    stops: &[Stop],
    reference: Point,
    vehicle_count: usize,
    predicted_delay_min: Option<&[f64]>,
    weights: &TrafficWeights,
) -> Vec<VehicleLoad> {
    let mut loads: Vec<VehicleLoad> = (0..vehicle_count)
        .map(|vehicle_index| VehicleLoad {
            vehicle_index,
            stop_ids: Vec::new(),
            load: 0.0,
        })
        .collect();
    if vehicle_count == 0 || stops.is_empty() {
        return loads;
    }

    let mut scored: Vec<(usize, f64, f64)> = stops
        .iter()
        .enumerate()
        .map(|(i, stop)| {
            let delay = predicted_delay_min
                .and_then(|p| p.get(i).copied())
                .unwrap_or(0.0);
            let distance = haversine_km(reference, stop.location);
            let cost = distance + delay;
            let priority = cost * weights.weight(stop.traffic);
            (i, priority, cost)
        })
        .collect();

    // Descending priority; original index breaks ties for determinism.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

    for (stop_index, _, cost) in scored {
        let best = loads
            .iter_mut()
            .min_by(|a, b| {
                a.load
                    .partial_cmp(&b.load)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.vehicle_index.cmp(&b.vehicle_index))
            })
            .expect("at least one vehicle");
        best.stop_ids.push(stops[stop_index].id.clone());
        best.load += cost;
    }

    loads
}
