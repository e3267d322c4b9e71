//! Screen-space error metrics for level selection.

use glam::DVec3;
use lodtree_decode::OrientedBox;

/// Default screen-space error threshold in pixels.
pub const DEFAULT_ERROR_THRESHOLD: f64 = 1.0;

/// Camera parameters driving refinement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    /// Camera position in world space.
    pub camera_position: DVec3,
    /// Pixels per meter at distance 1 from camera.
    pub pixels_per_meter: f64,
    /// Largest acceptable screen-space error in pixels.
    pub error_threshold: f64,
}

impl ViewState {
    /// Create view metrics from camera parameters.
    #[must_use]
    pub fn new(camera_position: DVec3, fov_y: f64, screen_height: f64) -> Self {
        // pixels_per_meter = screen_height / (2 * tan(fov_y / 2))
        let pixels_per_meter = screen_height / (2.0 * (fov_y / 2.0).tan());
        Self {
            camera_position,
            pixels_per_meter,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_error_threshold(mut self, error_threshold: f64) -> Self {
        self.error_threshold = error_threshold;
        self
    }

    /// Distance from the camera to the closest point of a box.
    #[must_use]
    pub fn distance_to(&self, volume: &OrientedBox) -> f64 {
        let local = volume.orientation.transpose() * (self.camera_position - volume.center);
        (local.abs() - volume.extents).max(DVec3::ZERO).length()
    }

    /// Screen-space error of a feature of `geometric_error` meters seen from
    /// `distance`.
    #[must_use]
    pub fn screen_error(&self, geometric_error: f64, distance: f64) -> f64 {
        if distance <= 0.0 {
            return f64::INFINITY;
        }
        geometric_error * self.pixels_per_meter / distance
    }

    /// Whether a node showing detail of `geometric_error` meters should be
    /// replaced by finer data.
    #[must_use]
    pub fn should_refine(&self, volume: &OrientedBox, geometric_error: f64) -> bool {
        self.screen_error(geometric_error, self.distance_to(volume)) > self.error_threshold
    }

    /// Coarsest level whose error is acceptable, where level `n` has an
    /// error of `root_error / 2^n`. Returns 0 when even the root is fine
    /// and `max_level` when the camera is inside the box.
    #[must_use]
    pub fn desired_level(&self, volume: &OrientedBox, root_error: f64, max_level: i32) -> i32 {
        let error = self.screen_error(root_error, self.distance_to(volume));
        if !error.is_finite() {
            return max_level;
        }
        if error <= self.error_threshold {
            return 0;
        }
        let levels = (error / self.error_threshold).log2().ceil();
        #[allow(clippy::cast_possible_truncation)]
        let levels = levels.min(f64::from(max_level)) as i32;
        levels.max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DMat3;

    fn unit_box(center: DVec3) -> OrientedBox {
        OrientedBox {
            center,
            extents: DVec3::splat(1.0),
            orientation: DMat3::IDENTITY,
        }
    }

    #[test]
    fn test_new_computes_pixels_per_meter() {
        let view = ViewState::new(DVec3::ZERO, std::f64::consts::FRAC_PI_2, 1080.0);
        assert!((view.pixels_per_meter - 540.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_to_box() {
        let view = ViewState::new(DVec3::ZERO, std::f64::consts::FRAC_PI_2, 1080.0);
        assert_eq!(view.distance_to(&unit_box(DVec3::ZERO)), 0.0);
        assert!((view.distance_to(&unit_box(DVec3::new(11.0, 0.0, 0.0))) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_should_refine() {
        let view = ViewState::new(DVec3::ZERO, std::f64::consts::FRAC_PI_2, 1080.0);
        assert!(view.should_refine(&unit_box(DVec3::new(100.0, 0.0, 0.0)), 10.0));
        assert!(!view.should_refine(&unit_box(DVec3::new(100_000.0, 0.0, 0.0)), 0.1));
    }

    #[test]
    fn test_desired_level_grows_as_camera_approaches() {
        let view = ViewState::new(DVec3::ZERO, std::f64::consts::FRAC_PI_2, 1080.0);
        let far = view.desired_level(&unit_box(DVec3::new(1e6, 0.0, 0.0)), 1.0, 20);
        let near = view.desired_level(&unit_box(DVec3::new(50.0, 0.0, 0.0)), 1.0, 20);
        let inside = view.desired_level(&unit_box(DVec3::ZERO), 1.0, 20);
        assert_eq!(far, 0);
        assert!(near > far);
        assert_eq!(inside, 20);
    }
}
