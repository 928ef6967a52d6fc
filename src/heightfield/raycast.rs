//! Ray / height-surface intersection shared by every terrain representation

use crate::core::types::Vec3;
use crate::math::{Aabb, Ray};
use super::grid::HeightQuery;

/// Rays whose horizontal direction component is below this are treated as vertical
pub const VERTICAL_THRESHOLD: f32 = 1e-4;

/// Bisection iterations once a crossing is bracketed
pub const BISECTION_STEPS: u32 = 10;

const MAX_MARCH_STEPS: usize = 1 << 20;

/// First point where the ray meets the surface, if any.
///
/// Marches in steps of about one cell horizontally, brackets the first
/// above-to-below transition, refines it by bisection and snaps the result
/// onto the surface. Holes (`None` altitudes) never count as a transition.
pub fn cast_ray_to_surface(surface: &dyn HeightQuery, origin: Vec3, direction: Vec3) -> Option<Vec3> {
    let ray = Ray::new(origin, direction);
    if ray.direction == Vec3::ZERO {
        return None;
    }

    let horizontal = ray.horizontal_length();
    if horizontal < VERTICAL_THRESHOLD {
        let ground = surface.find_altitude_at_point(origin, true)?;
        let hits = if ray.direction.y < 0.0 { origin.y >= ground } else { origin.y <= ground };
        return hits.then(|| Vec3::new(origin.x, ground, origin.z));
    }

    let (min, max) = surface.world_bounds();
    let bounds = Aabb::new(Vec3::new(min.x, -1.0e30, min.y), Vec3::new(max.x, 1.0e30, max.y));
    let (t_enter, t_exit) = ray.intersects_aabb(&bounds)?;

    let step = surface.cell_size().max(f32::EPSILON) / horizontal;
    let classify = |t: f32| {
        let p = ray.at(t);
        surface.find_altitude_at_point(p, true).map(|h| p.y >= h)
    };

    let mut prev_t = t_enter;
    let mut prev_above = classify(t_enter);
    let mut bracket = None;
    for i in 1..MAX_MARCH_STEPS {
        let t = (t_enter + i as f32 * step).min(t_exit);
        let above = classify(t);
        if prev_above == Some(true) && above == Some(false) {
            bracket = Some((prev_t, t));
            break;
        }
        if t >= t_exit {
            break;
        }
        prev_t = t;
        prev_above = above;
    }
    let (mut lo, mut hi) = bracket?;

    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        match classify(mid) {
            Some(true) => lo = mid,
            Some(false) => hi = mid,
            None => break,
        }
    }

    let p = ray.at(0.5 * (lo + hi));
    let altitude = surface
        .find_altitude_at_point(p, true)
        .or_else(|| surface.find_altitude_at_point(ray.at(hi), true))?;
    Some(Vec3::new(p.x, altitude, p.z))
}
