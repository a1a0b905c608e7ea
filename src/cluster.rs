//! Geographic pre-clustering of large stop batches.
//!
//! Density-based grouping keeps each solver instance spatially coherent and
//! bounds its graph size. Every input stop lands in exactly one cluster:
//! noise points are merged into the nearest cluster by centroid distance
//! instead of being dropped or left as singletons.

use std::collections::BTreeMap;

use linfa::traits::Transformer;
use linfa_clustering::Dbscan;
use ndarray::Array2;
use tracing::{info, warn};

use crate::geo::{centroid, haversine_km, Point, EARTH_RADIUS_KM};
use crate::model::Stop;

/// Partitions `stops` into spatially dense clusters.
///
/// Two stops share a cluster when connected through a chain of stops each
/// within `radius_km` of a neighbor, and a cluster needs at least
/// `min_cluster_size` members. Degenerate inputs (too few stops, all noise)
/// collapse to a single cluster so the output is always a complete partition.
pub fn cluster_stops(
    stops: &[Stop],
    radius_km: f64,
    min_cluster_size: usize,
) -> BTreeMap<usize, Vec<Stop>> {
    let mut clusters = BTreeMap::new();
    if stops.is_empty() {
        return clusters;
    }
    let min_points = min_cluster_size.max(2);
    if stops.len() < min_points || radius_km <= 0.0 {
        clusters.insert(0, stops.to_vec());
        return clusters;
    }

    // Project onto a local tangent plane so DBSCAN's Euclidean tolerance is
    // expressed directly in kilometers.
    let mean_lat = stops.iter().map(|s| s.location.lat).sum::<f64>() / stops.len() as f64;
    let lat_scale = EARTH_RADIUS_KM;
    let lon_scale = EARTH_RADIUS_KM * mean_lat.to_radians().cos();
    let flat: Vec<f64> = stops
        .iter()
        .flat_map(|s| {
            [
                s.location.lat.to_radians() * lat_scale,
                s.location.lon.to_radians() * lon_scale,
            ]
        })
        .collect();
    let records = match Array2::from_shape_vec((stops.len(), 2), flat) {
        Ok(r) => r,
        Err(e) => {
            warn!("clustering projection failed ({e}); using a single cluster");
            clusters.insert(0, stops.to_vec());
            return clusters;
        }
    };

    let labels = match Dbscan::params(min_points)
        .tolerance(radius_km)
        .transform(&records)
    {
        Ok(labels) => labels,
        Err(e) => {
            warn!("DBSCAN failed ({e}); using a single cluster");
            clusters.insert(0, stops.to_vec());
            return clusters;
        }
    };

    let mut noise: Vec<Stop> = Vec::new();
    for (stop, label) in stops.iter().zip(labels.iter()) {
        match label {
            Some(cid) => clusters.entry(*cid).or_insert_with(Vec::new).push(stop.clone()),
            None => noise.push(stop.clone()),
        }
    }

    info!(
        stops = stops.len(),
        clusters = clusters.len(),
        noise = noise.len(),
        "density clustering complete"
    );

    if clusters.is_empty() {
        clusters.insert(0, stops.to_vec());
        return clusters;
    }

    // Merge noise into the nearest cluster by centroid distance. Centroids
    // are taken before merging so the assignment does not depend on merge
    // order.
    if !noise.is_empty() {
        let centroids: BTreeMap<usize, Point> = clusters
            .iter()
            .map(|(cid, members)| {
                let pts: Vec<Point> = members.iter().map(|s| s.location).collect();
                (*cid, centroid(&pts).expect("cluster is non-empty"))
            })
            .collect();

        for stop in noise {
            let nearest = centroids
                .iter()
                .min_by(|(_, a), (_, b)| {
                    haversine_km(stop.location, **a)
                        .partial_cmp(&haversine_km(stop.location, **b))
                        .expect("finite distances")
                })
                .map(|(cid, _)| *cid)
                .expect("at least one cluster");
            clusters
                .get_mut(&nearest)
                .expect("cluster id exists")
                .push(stop);
        }
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop_at(id: &str, lat: f64, lon: f64) -> Stop {
        Stop::new(id, Point::new(lat, lon), 1)
    }

    /// Two tight groups of 6 stops roughly 20 km apart; 2 km radius keeps
    /// them separate.
    fn two_groups() -> Vec<Stop> {
        let mut stops = Vec::new();
        for i in 0..6 {
            stops.push(stop_at(&format!("a{i}"), 12.90 + i as f64 * 0.002, 77.60));
        }
        for i in 0..6 {
            stops.push(stop_at(&format!("b{i}"), 13.10 + i as f64 * 0.002, 77.60));
        }
        stops
    }

    #[test]
    fn splits_two_groups_completely() {
        let stops = two_groups();
        let clusters = cluster_stops(&stops, 2.0, 3);
        assert_eq!(clusters.len(), 2);

        let mut all_ids: Vec<&str> = clusters
            .values()
            .flat_map(|c| c.iter().map(|s| s.id.as_str()))
            .collect();
        all_ids.sort();
        let mut expected: Vec<&str> = stops.iter().map(|s| s.id.as_str()).collect();
        expected.sort();
        assert_eq!(all_ids, expected);

        for members in clusters.values() {
            assert_eq!(members.len(), 6);
        }
    }

    #[test]
    fn noise_is_merged_not_dropped() {
        let mut stops = two_groups();
        // An isolated stop far from both groups still lands in one cluster.
        stops.push(stop_at("lone", 12.50, 77.60));
        let clusters = cluster_stops(&stops, 2.0, 3);
        let total: usize = clusters.values().map(Vec::len).sum();
        assert_eq!(total, stops.len());
        assert!(clusters.values().all(|c| !c.is_empty()));
        // The lone stop is closer to group "a".
        let holder = clusters
            .values()
            .find(|c| c.iter().any(|s| s.id == "lone"))
            .expect("merged somewhere");
        assert!(holder.iter().any(|s| s.id.starts_with('a')));
    }

    #[test]
    fn small_batch_collapses_to_single_cluster() {
        let stops = vec![stop_at("x", 12.9, 77.6), stop_at("y", 13.0, 77.7)];
        let clusters = cluster_stops(&stops, 2.0, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters.values().next().map(Vec::len), Some(2));
    }

    #[test]
    fn empty_input_yields_empty_partition() {
        assert!(cluster_stops(&[], 2.0, 3).is_empty());
    }

    #[test]
    fn deterministic_given_identical_input() {
        let stops = two_groups();
        let a = cluster_stops(&stops, 2.0, 3);
        let b = cluster_stops(&stops, 2.0, 3);
        let ids = |m: &BTreeMap<usize, Vec<Stop>>| -> Vec<(usize, Vec<String>)> {
            m.iter()
                .map(|(cid, c)| {
                    let mut v: Vec<String> = c.iter().map(|s| s.id.clone()).collect();
                    v.sort();
                    (*cid, v)
                })
                .collect()
        };
        assert_eq!(ids(&a), ids(&b));
    }
}
