//! Live vehicle positions.
//!
//! A lock-protected map keyed by tenant then vehicle. Readers get copied-out
//! snapshots so no caller ever holds the lock across an await or a solve.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::geo::Point;

/// A vehicle's last reported position, optional speed, and report time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LivePosition {
    pub location: Point,
    #[serde(default)]
    pub speed_kmph: Option<f64>,
    pub reported_at: DateTime<Utc>,
}

impl LivePosition {
    /// Whether the report is younger than `max_age_sec`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_sec: i64) -> bool {
        now.signed_duration_since(self.reported_at) <= Duration::seconds(max_age_sec)
    }
}

/// Shared in-memory store of last-known vehicle positions.
#[derive(Debug, Default)]
pub struct LiveLocationStore {
    inner: RwLock<HashMap<String, HashMap<String, LivePosition>>>,
}

impl LiveLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a position report, stamped at receipt time.
    pub fn update(
        &self,
        tenant_id: &str,
        vehicle_id: &str,
        location: Point,
        speed_kmph: Option<f64>,
    ) {
        let position = LivePosition {
            location,
            speed_kmph,
            reported_at: Utc::now(),
        };
        let mut inner = self.inner.write();
        inner
            .entry(tenant_id.to_string())
            .or_default()
            .insert(vehicle_id.to_string(), position);
    }

    pub fn get(&self, tenant_id: &str, vehicle_id: &str) -> Option<LivePosition> {
        self.inner
            .read()
            .get(tenant_id)
            .and_then(|vehicles| vehicles.get(vehicle_id))
            .copied()
    }

    /// Copies out every position for one tenant.
    pub fn snapshot(&self, tenant_id: &str) -> HashMap<String, LivePosition> {
        self.inner
            .read()
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Positions for one tenant that are younger than `max_age_sec`.
    pub fn fresh_snapshot(
        &self,
        tenant_id: &str,
        max_age_sec: i64,
    ) -> HashMap<String, LivePosition> {
        let now = Utc::now();
        self.inner
            .read()
            .get(tenant_id)
            .map(|vehicles| {
                vehicles
                    .iter()
                    .filter(|(_, p)| p.is_fresh(now, max_age_sec))
                    .map(|(id, p)| (id.clone(), *p))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn update_then_get_round_trips() {
        let store = LiveLocationStore::new();
        store.update("t1", "v1", Point::new(12.9, 77.6), Some(32.5));
        let pos = store.get("t1", "v1").expect("present");
        assert_eq!(pos.location, Point::new(12.9, 77.6));
        assert_eq!(pos.speed_kmph, Some(32.5));
        assert!(store.get("t1", "v2").is_none());
        assert!(store.get("t2", "v1").is_none());
    }

    #[test]
    fn speed_is_optional() {
        let store = LiveLocationStore::new();
        store.update("t1", "v1", Point::new(12.9, 77.6), None);
        assert_eq!(store.get("t1", "v1").expect("present").speed_kmph, None);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = LiveLocationStore::new();
        store.update("t1", "v1", Point::new(1.0, 1.0), None);
        let snap = store.snapshot("t1");
        store.update("t1", "v1", Point::new(2.0, 2.0), None);
        // The earlier snapshot is unaffected by later writes.
        assert_eq!(snap["v1"].location, Point::new(1.0, 1.0));
        assert_eq!(store.get("t1", "v1").expect("present").location, Point::new(2.0, 2.0));
    }

    #[test]
    fn stale_reports_are_filtered() {
        let store = LiveLocationStore::new();
        store.update("t1", "fresh", Point::new(1.0, 1.0), None);
        {
            let mut inner = store.inner.write();
            inner.get_mut("t1").expect("tenant").insert(
                "stale".into(),
                LivePosition {
                    location: Point::new(2.0, 2.0),
                    speed_kmph: None,
                    reported_at: Utc::now() - Duration::seconds(600),
                },
            );
        }
        let fresh = store.fresh_snapshot("t1", 300);
        assert!(fresh.contains_key("fresh"));
        assert!(!fresh.contains_key("stale"));
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let store = Arc::new(LiveLocationStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.update("t1", &format!("v{i}"), Point::new(i as f64, j as f64), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("no panics");
        }
        let snap = store.snapshot("t1");
        assert_eq!(snap.len(), 8);
        for i in 0..8 {
            assert_eq!(snap[&format!("v{i}")].location.lon, 49.0);
        }
    }
}
