//! Per-frame camera snapshot fed to culling and paging

use crate::core::types::Vec3;

/// Read-only camera state for one frame.
///
/// `fov_x` is the horizontal field of view in radians. A negative value
/// marks an orthographic camera, and its magnitude is then the half-width
/// of the view volume in world units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSnapshot {
    /// World position
    pub position: Vec3,
    /// Unit view direction
    pub forward: Vec3,
    /// Approximate up direction (re-orthogonalized on use)
    pub up: Vec3,
    /// Horizontal field of view in radians, or negated orthographic half-width
    pub fov_x: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Near clip plane (hither)
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl CameraSnapshot {
    /// Create a perspective snapshot looking at a target
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3, fov_x_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            forward: (target - position).normalize(),
            up,
            fov_x: fov_x_degrees.to_radians(),
            aspect,
            near: 1.0,
            far: 10_000.0,
        }
    }

    /// Create an orthographic snapshot with the given half-width
    pub fn orthographic(position: Vec3, forward: Vec3, up: Vec3, half_width: f32, aspect: f32) -> Self {
        Self {
            position,
            forward: forward.normalize(),
            up,
            fov_x: -half_width.abs(),
            aspect,
            near: 1.0,
            far: 10_000.0,
        }
    }

    /// Builder-style clip distance override
    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn is_orthographic(&self) -> bool {
        self.fov_x < 0.0
    }

    /// Right, true-up and forward unit vectors
    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = self.forward.normalize();
        let mut right = forward.cross(self.up);
        if right.length_squared() < 1e-12 {
            // Looking straight along `up`: pick any perpendicular axis.
            right = forward.any_orthonormal_vector();
        }
        let right = right.normalize();
        let up = right.cross(forward);
        (right, up, forward)
    }

    /// Tangent of half the vertical field of view (perspective only)
    pub fn tan_half_fov_y(&self) -> f32 {
        (self.fov_x * 0.5).tan() / self.aspect
    }

    /// Half-height of the orthographic view volume
    pub fn ortho_half_height(&self) -> f32 {
        self.fov_x.abs() / self.aspect
    }

    /// Pixels per world unit at unit distance for a viewport `screen_height` pixels tall.
    ///
    /// For orthographic cameras this is independent of distance, so callers
    /// must not divide by distance again.
    pub fn projection_scale(&self, screen_height: f32) -> f32 {
        if self.is_orthographic() {
            screen_height / (2.0 * self.ortho_half_height())
        } else {
            screen_height / (2.0 * self.tan_half_fov_y())
        }
    }
}

impl Default for CameraSnapshot {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 100.0, 0.0), Vec3::new(100.0, 0.0, 100.0), Vec3::Y, 60.0, 16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_is_orthonormal() {
        let cam = CameraSnapshot::look_at(Vec3::ZERO, Vec3::new(1.0, -1.0, 0.0), Vec3::Y, 60.0, 1.5);
        let (r, u, f) = cam.basis();
        assert!((r.length() - 1.0).abs() < 1e-5);
        assert!((u.length() - 1.0).abs() < 1e-5);
        assert!(r.dot(f).abs() < 1e-5);
        assert!(u.dot(f).abs() < 1e-5);
        assert!(u.y > 0.0);
    }

    #[test]
    fn test_basis_looking_straight_down() {
        let cam = CameraSnapshot::look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::Y, 60.0, 1.0);
        let (r, u, f) = cam.basis();
        assert!(r.is_finite() && u.is_finite());
        assert!(r.dot(f).abs() < 1e-5);
    }

    #[test]
    fn test_orthographic_flag() {
        let cam = CameraSnapshot::orthographic(Vec3::ZERO, -Vec3::Z, Vec3::Y, 50.0, 2.0);
        assert!(cam.is_orthographic());
        assert_eq!(cam.ortho_half_height(), 25.0);
        assert!(!CameraSnapshot::default().is_orthographic());
    }

    #[test]
    fn test_vertical_fov_from_horizontal() {
        let cam = CameraSnapshot::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 2.0);
        assert!((cam.tan_half_fov_y() - 0.5).abs() < 1e-5);
    }
}
