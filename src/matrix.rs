//! Pairwise travel matrices and the external routing-service provider.

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::MatrixError;
use crate::geo::{haversine_km, Point};

/// Square distance (km) / duration (sec) matrix over an ordered node list.
///
/// Road-network entries may be asymmetric; the geometric fallback is
/// symmetric. The diagonal is always zero.
#[derive(Debug, Clone)]
pub struct TravelMatrix {
    distance_km: Vec<f64>,
    duration_sec: Vec<f64>,
    size: usize,
}

impl TravelMatrix {
    pub fn new(size: usize) -> Self {
        Self {
            distance_km: vec![0.0; size * size],
            duration_sec: vec![0.0; size * size],
            size,
        }
    }

    /// Builds a symmetric matrix from great-circle distances, deriving
    /// durations from a constant average speed.
    pub fn geometric(points: &[Point], avg_speed_kmph: f64) -> Self {
        let n = points.len();
        let mut m = Self::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let km = haversine_km(points[i], points[j]);
                let sec = if avg_speed_kmph > 0.0 {
                    km / avg_speed_kmph * 3600.0
                } else {
                    km
                };
                m.set(i, j, km, sec);
                m.set(j, i, km, sec);
            }
        }
        m
    }

    pub fn set(&mut self, from: usize, to: usize, km: f64, sec: f64) {
        self.distance_km[from * self.size + to] = km;
        self.duration_sec[from * self.size + to] = sec;
    }

    pub fn distance_km(&self, from: usize, to: usize) -> f64 {
        self.distance_km[from * self.size + to]
    }

    pub fn duration_sec(&self, from: usize, to: usize) -> f64 {
        self.duration_sec[from * self.size + to]
    }

    pub fn duration_min(&self, from: usize, to: usize) -> f64 {
        self.duration_sec(from, to) / 60.0
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        for i in 0..self.size {
            for j in (i + 1)..self.size {
                if (self.distance_km(i, j) - self.distance_km(j, i)).abs() > tol {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    distances: Option<Vec<Vec<f64>>>,
    durations: Option<Vec<Vec<f64>>>,
}

/// Fetches distance/time matrices from an OSRM-style table service, with an
/// optional great-circle fallback.
///
/// One attempt per call; no retries, so a dispatch cycle's latency stays
/// bounded by the configured timeout.
pub struct MatrixProvider {
    client: reqwest::Client,
    base_url: String,
    profile: String,
    max_points: usize,
    fallback_geometric: bool,
    fallback_speed_kmph: f64,
}

impl MatrixProvider {
    pub fn new(config: &EngineConfig) -> Result<Self, MatrixError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.routing_timeout_sec))
            .build()?;
        Ok(Self {
            client,
            base_url: config.routing_base_url.trim_end_matches('/').to_string(),
            profile: config.routing_profile.clone(),
            max_points: config.matrix_max_points,
            fallback_geometric: config.fallback_geometric,
            fallback_speed_kmph: config.fallback_speed_kmph,
        })
    }

    /// Returns the pairwise matrix for `points`.
    ///
    /// Exceeding the point ceiling fails with `CapacityExceeded` before any
    /// remote call. Remote failures degrade to the geometric fallback when
    /// enabled, otherwise propagate.
    pub async fn matrix(&self, points: &[Point]) -> Result<TravelMatrix, MatrixError> {
        if points.len() > self.max_points {
            let err = MatrixError::CapacityExceeded {
                points: points.len(),
                max: self.max_points,
            };
            if self.fallback_geometric {
                warn!(points = points.len(), max = self.max_points, "{err}; using geometric matrix");
                return Ok(TravelMatrix::geometric(points, self.fallback_speed_kmph));
            }
            return Err(err);
        }
        if points.len() < 2 {
            return Ok(TravelMatrix::new(points.len()));
        }

        match self.fetch_table(points).await {
            Ok(matrix) => Ok(matrix),
            Err(err) if self.fallback_geometric => {
                warn!(points = points.len(), "routing service failed ({err}); using geometric matrix");
                Ok(TravelMatrix::geometric(points, self.fallback_speed_kmph))
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_table(&self, points: &[Point]) -> Result<TravelMatrix, MatrixError> {
        let coords = points
            .iter()
            .map(|p| format!("{},{}", p.lon, p.lat))
            .collect::<Vec<_>>()
            .join(";");
        let url = format!(
            "{}/table/v1/{}/{}?annotations=duration,distance",
            self.base_url, self.profile, coords
        );

        info!(points = points.len(), "requesting travel matrix");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MatrixError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let table: TableResponse =
            serde_json::from_str(&text).map_err(|e| MatrixError::Malformed(e.to_string()))?;
        if table.code != "Ok" {
            return Err(MatrixError::Malformed(format!(
                "service returned code {:?}",
                table.code
            )));
        }

        let n = points.len();
        let distances = table
            .distances
            .ok_or_else(|| MatrixError::Malformed("missing distances".into()))?;
        let durations = table
            .durations
            .ok_or_else(|| MatrixError::Malformed("missing durations".into()))?;
        if distances.len() != n
            || durations.len() != n
            || distances.iter().any(|row| row.len() != n)
            || durations.iter().any(|row| row.len() != n)
        {
            return Err(MatrixError::Malformed(format!(
                "expected {n}x{n} matrices"
            )));
        }

        let mut matrix = TravelMatrix::new(n);
        for i in 0..n {
            for j in 0..n {
                // Service reports meters; we store kilometers.
                matrix.set(i, j, distances[i][j] / 1000.0, durations[i][j]);
            }
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_points(n: usize) -> Vec<Point> {
        (0..n)
            .map(|i| Point::new(12.9 + i as f64 * 0.01, 77.6 + i as f64 * 0.01))
            .collect()
    }

    fn offline_config(fallback: bool) -> EngineConfig {
        EngineConfig {
            // Reserved discard port: connection fails fast, no service runs here.
            routing_base_url: "http://127.0.0.1:9".into(),
            routing_timeout_sec: 1,
            fallback_geometric: fallback,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn geometric_matrix_is_reflexive_zero_and_symmetric() {
        let m = TravelMatrix::geometric(&sample_points(5), 30.0);
        for i in 0..5 {
            assert_eq!(m.distance_km(i, i), 0.0);
            assert_eq!(m.duration_sec(i, i), 0.0);
        }
        assert!(m.is_symmetric(1e-9));
    }

    #[test]
    fn geometric_duration_uses_average_speed() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(0.0, 1.0)];
        let m = TravelMatrix::geometric(&pts, 30.0);
        let km = m.distance_km(0, 1);
        let expected_sec = km / 30.0 * 3600.0;
        assert!((m.duration_sec(0, 1) - expected_sec).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ceiling_exceeded_without_fallback_is_an_error() {
        let mut config = offline_config(false);
        config.matrix_max_points = 3;
        let provider = MatrixProvider::new(&config).expect("client");
        let err = provider.matrix(&sample_points(4)).await.unwrap_err();
        assert!(matches!(err, MatrixError::CapacityExceeded { points: 4, max: 3 }));
    }

    #[tokio::test]
    async fn remote_failure_without_fallback_propagates() {
        let provider = MatrixProvider::new(&offline_config(false)).expect("client");
        let err = provider.matrix(&sample_points(3)).await.unwrap_err();
        assert!(matches!(err, MatrixError::Request(_)));
    }

    #[tokio::test]
    async fn remote_failure_with_fallback_degrades_to_geometric() {
        let provider = MatrixProvider::new(&offline_config(true)).expect("client");
        let m = provider.matrix(&sample_points(3)).await.expect("fallback");
        assert_eq!(m.size(), 3);
        assert!(m.is_symmetric(1e-9));
        assert!(m.distance_km(0, 1) > 0.0);
    }

    #[tokio::test]
    async fn fewer_than_two_points_short_circuits() {
        let provider = MatrixProvider::new(&offline_config(false)).expect("client");
        let m = provider.matrix(&sample_points(1)).await.expect("trivial");
        assert_eq!(m.size(), 1);
    }

    proptest! {
        #[test]
        fn geometric_symmetry_holds(n in 2usize..8, seed in 0u64..1000) {
            let pts: Vec<Point> = (0..n)
                .map(|i| {
                    let k = (seed.wrapping_mul(31).wrapping_add(i as u64)) % 1000;
                    Point::new(10.0 + k as f64 * 0.001, 70.0 + i as f64 * 0.01)
                })
                .collect();
            let m = TravelMatrix::geometric(&pts, 25.0);
            prop_assert!(m.is_symmetric(1e-9));
            for i in 0..n {
                prop_assert_eq!(m.distance_km(i, i), 0.0);
                for j in 0..n {
                    prop_assert!(m.distance_km(i, j) >= 0.0);
                }
            }
        }
    }
}
