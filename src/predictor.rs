//! Delay prediction seam.
//!
//! The greedy assigner can weight stops by a predicted delay. The model
//! lives behind this trait so the engine works with or without one; a
//! prediction failure degrades to zero delay rather than failing dispatch.

use thiserror::Error;

use crate::model::Stop;

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("delay model unavailable: {0}")]
    Unavailable(String),
    #[error("prediction failed: {0}")]
    Inference(String),
}

/// Predicts per-stop delay in minutes, parallel to the input slice.
pub trait DelayPredictor: Send + Sync {
    fn predict(&self, stops: &[Stop]) -> Result<Vec<f64>, PredictorError>;
}

/// Predicts zero delay everywhere. Used when no model is wired in.
#[derive(Debug, Default)]
pub struct NoDelay;

impl DelayPredictor for NoDelay {
    fn predict(&self, stops: &[Stop]) -> Result<Vec<f64>, PredictorError> {
        Ok(vec![0.0; stops.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Point;

    #[test]
    fn no_delay_matches_input_length() {
        let stops = vec![
            Stop::new("a", Point::new(0.0, 0.0), 1),
            Stop::new("b", Point::new(0.1, 0.1), 1),
        ];
        let preds = NoDelay.predict(&stops).expect("infallible");
        assert_eq!(preds, vec![0.0, 0.0]);
    }
}
