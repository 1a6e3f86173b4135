use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::mot::KalmanParameters;

/// Constant-velocity Kalman filter for one image axis.
///
/// One frame is one time step. `estimate()` is always the prediction for the
/// next frame, so it can be compared directly against a candidate observed there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kalman1D {
    // State: [position, velocity]
    state: na::Vector2<f32>,
    // Covariance matrix
    covariance: na::Matrix2<f32>,
    // Process noise covariance
    process_noise: na::Matrix2<f32>,
    // Measurement noise variance
    measurement_noise: f32,
}

impl Kalman1D {
    pub fn new(initial_value: f32, params: &KalmanParameters) -> Self {
        let q = params.process_noise;
        // Piecewise white acceleration with dt = 1
        #[rustfmt::skip]
        let process_noise = na::Matrix2::new(
            0.25 * q, 0.5 * q,
            0.5 * q,  q,
        );
        Kalman1D {
            state: na::Vector2::new(initial_value, 0.0),
            covariance: na::Matrix2::from_diagonal(&na::Vector2::new(
                params.measurement_noise,
                params.initial_velocity_variance,
            )),
            process_noise,
            measurement_noise: params.measurement_noise,
        }
    }
    fn transition() -> na::Matrix2<f32> {
        #[rustfmt::skip]
        let f = na::Matrix2::new(
            1.0, 1.0, // x = x + v
            0.0, 1.0, // v = v
        );
        f
    }
    fn predicted(&self) -> (na::Vector2<f32>, na::Matrix2<f32>) {
        let f = Self::transition();
        let state = f * self.state;
        let covariance = f * self.covariance * f.transpose() + self.process_noise;
        (state, covariance)
    }
    /// Predicted value for the next frame
    pub fn estimate(&self) -> f32 {
        self.predicted().0[0]
    }
    pub fn velocity(&self) -> f32 {
        self.state[1]
    }
    /// Squared residual normalised by the innovation variance. Never negative.
    pub fn cost(&self, candidate: f32) -> f32 {
        let (state, covariance) = self.predicted();
        let residual = candidate - state[0];
        let innovation_var = covariance[(0, 0)] + self.measurement_noise;
        if innovation_var <= 0.0 {
            return residual * residual;
        }
        residual * residual / innovation_var
    }
    /// Advances one frame and folds in `observed`. Returns the filtered position.
    pub fn update(&mut self, observed: f32) -> f32 {
        let (state, covariance) = self.predicted();
        let innovation = observed - state[0];
        let innovation_var = covariance[(0, 0)] + self.measurement_noise;
        if innovation_var <= 0.0 {
            self.state = state;
            self.covariance = covariance;
            return self.state[0];
        }
        let gain = na::Vector2::new(covariance[(0, 0)], covariance[(1, 0)]) / innovation_var;
        self.state = state + gain * innovation;
        // P = (I - K * H) * P with H = [1, 0]
        let kh = na::Matrix2::new(gain[0], 0.0, gain[1], 0.0);
        self.covariance = (na::Matrix2::identity() - kh) * covariance;
        self.state[0]
    }
    /// Advances one frame without a measurement. Returns the predicted position.
    pub fn predict_only(&mut self) -> f32 {
        let (state, covariance) = self.predicted();
        self.state = state;
        self.covariance = covariance;
        self.state[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_estimate_is_initial_value() {
        let k = Kalman1D::new(42.0, &KalmanParameters::default());
        assert_eq!(k.estimate(), 42.0);
        assert_eq!(k.cost(42.0), 0.0);
        assert!(k.cost(50.0) > 0.0);
    }

    #[test]
    fn test_tracks_constant_velocity() {
        let mut k = Kalman1D::new(0.0, &KalmanParameters::default());
        for step in 1..=6 {
            let filtered = k.update(10.0 * step as f32);
            assert!((filtered - 10.0 * step as f32).abs() < 1.0);
        }
        assert!((k.estimate() - 70.0).abs() < 1.0);
        assert!((k.velocity() - 10.0).abs() < 1.0);
        // A candidate on the trajectory is cheaper than one off it
        assert!(k.cost(70.0) < k.cost(90.0));
    }

    #[test]
    fn test_predict_only_coasts() {
        let mut k = Kalman1D::new(0.0, &KalmanParameters::default());
        for step in 1..=5 {
            k.update(5.0 * step as f32);
        }
        let before = k.estimate();
        let coasted = k.predict_only();
        assert!((coasted - before).abs() < 1e-4);
        assert!(k.estimate() > coasted);
    }

    #[test]
    fn test_uncertainty_grows_without_measurements() {
        let mut k = Kalman1D::new(0.0, &KalmanParameters::default());
        k.update(1.0);
        let tight = k.cost(k.estimate() + 5.0);
        k.predict_only();
        k.predict_only();
        let loose = k.cost(k.estimate() + 5.0);
        assert!(loose < tight);
    }
}
