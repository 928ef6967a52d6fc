//! View frustum side planes for terrain culling

use crate::core::camera::CameraSnapshot;
use crate::core::types::Vec3;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Plane through `point` with the given (not necessarily unit) normal
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Self { normal, distance: -normal.dot(point) }
    }

    /// Signed distance from point to plane (positive = outside the frustum)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Tri-state visibility result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    Outside,
    PartiallyVisible,
    FullyVisible,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        self != Visibility::Outside
    }
}

/// View frustum side planes (left, right, top, bottom).
///
/// Near and far are not represented; terrain culling only needs the sides.
/// Normals point out of the view volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 4],
}

impl Frustum {
    /// Build the side planes for a camera snapshot
    pub fn from_camera(camera: &CameraSnapshot) -> Self {
        Self::from_parts(camera.position, camera.forward, camera.up, camera.fov_x, camera.aspect, camera.near)
    }

    /// Build the side planes from the camera orientation and the view pyramid at the hither distance.
    ///
    /// A negative `fov_x` is an orthographic camera whose magnitude is the half-width.
    pub fn from_parts(position: Vec3, forward: Vec3, up: Vec3, fov_x: f32, aspect: f32, hither: f32) -> Self {
        let camera = CameraSnapshot { position, forward, up, fov_x, aspect, near: hither, far: f32::MAX };
        let (right, up, forward) = camera.basis();

        if camera.is_orthographic() {
            let half_w = fov_x.abs();
            let half_h = half_w / aspect;
            return Self {
                planes: [
                    Plane::from_point_normal(position - right * half_w, -right),
                    Plane::from_point_normal(position + right * half_w, right),
                    Plane::from_point_normal(position + up * half_h, up),
                    Plane::from_point_normal(position - up * half_h, -up),
                ],
            };
        }

        let hither = hither.max(f32::EPSILON);
        let half_w = hither * (fov_x * 0.5).tan();
        let half_h = half_w / aspect;
        let center = forward * hither;

        // Pyramid corners relative to the eye
        let top_left = center - right * half_w + up * half_h;
        let top_right = center + right * half_w + up * half_h;
        let bottom_left = center - right * half_w - up * half_h;
        let bottom_right = center + right * half_w - up * half_h;

        let side = |a: Vec3, b: Vec3| {
            let mut normal = a.cross(b);
            // The view axis is always inside
            if normal.dot(forward) > 0.0 {
                normal = -normal;
            }
            Plane::from_point_normal(position, normal)
        };

        Self {
            planes: [
                side(top_left, bottom_left),
                side(bottom_right, top_right),
                side(top_right, top_left),
                side(bottom_left, bottom_right),
            ],
        }
    }

    /// Classify a sphere against the side planes
    pub fn test_sphere(&self, center: Vec3, radius: f32) -> Visibility {
        let mut fully = true;
        for plane in &self.planes {
            let dist = plane.distance_to_point(center);
            if dist >= radius {
                return Visibility::Outside;
            }
            if dist >= -radius {
                fully = false;
            }
        }
        if fully { Visibility::FullyVisible } else { Visibility::PartiallyVisible }
    }

    /// Check if point is inside (or on) every side plane
    pub fn test_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.distance_to_point(point) <= 0.0)
    }

    /// Conservative triangle classification using per-vertex outcodes; no clipping.
    pub fn test_triangle(&self, p0: Vec3, p1: Vec3, p2: Vec3, tolerance: f32) -> Visibility {
        let outcode = |p: Vec3| {
            self.planes.iter().enumerate().fold(0u8, |code, (i, plane)| {
                if plane.distance_to_point(p) > tolerance { code | (1 << i) } else { code }
            })
        };
        let (c0, c1, c2) = (outcode(p0), outcode(p1), outcode(p2));
        if c0 | c1 | c2 == 0 {
            Visibility::FullyVisible
        } else if c0 & c1 & c2 != 0 {
            Visibility::Outside
        } else {
            Visibility::PartiallyVisible
        }
    }
}
