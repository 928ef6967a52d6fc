//! Tunables of the CLOD engine and the culling cadence

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Detail texture blended over the terrain near the viewer
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailTexture {
    /// Renderer-side material handle
    pub material: u32,
    /// Repeats per grid cell
    pub tiling: f32,
    /// Distance at which the detail has faded out completely
    pub fade_distance: f32,
}

/// Options applied at the next frame after `set_options`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceOptions {
    /// Maximum screen-space geometric error in pixels
    pub pixel_error: f32,
    /// Triangle budget per frame; 0 means unlimited
    pub polygon_target: usize,
    /// Emit triangle strips instead of lists
    pub prefer_strips: bool,
    /// Viewport height in pixels used to project errors
    pub screen_height: f32,
    pub detail: Option<DetailTexture>,
    pub cull_policy: CullPolicy,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            pixel_error: 4.0,
            polygon_target: 100_000,
            prefer_strips: false,
            screen_height: 1080.0,
            detail: None,
            cull_policy: CullPolicy::EveryFrame,
        }
    }
}

/// When the visible set is recomputed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullPolicy {
    #[default]
    EveryFrame,
    /// Once, then again only after `request_cull`
    OnDemand,
    /// At most once per interval
    Timed(Duration),
}

/// Decides per frame whether culling runs under a [`CullPolicy`]
#[derive(Clone, Debug)]
pub struct CullScheduler {
    policy: CullPolicy,
    requested: bool,
    since_last: Duration,
}

impl CullScheduler {
    pub fn new(policy: CullPolicy) -> Self {
        Self { policy, requested: true, since_last: Duration::ZERO }
    }

    pub fn policy(&self) -> CullPolicy {
        self.policy
    }

    /// Switch policy; the next frame always culls
    pub fn set_policy(&mut self, policy: CullPolicy) {
        if policy != self.policy {
            self.policy = policy;
            self.requested = true;
        }
    }

    /// Force a cull on the next frame
    pub fn request(&mut self) {
        self.requested = true;
    }

    /// Advance by `dt`; true when this frame must cull
    pub fn should_cull(&mut self, dt: Duration) -> bool {
        self.since_last += dt;
        let due = match self.policy {
            CullPolicy::EveryFrame => true,
            CullPolicy::OnDemand => self.requested,
            CullPolicy::Timed(interval) => self.requested || self.since_last >= interval,
        };
        if due {
            self.requested = false;
            self.since_last = Duration::ZERO;
        }
        due
    }
}

impl Default for CullScheduler {
    fn default() -> Self {
        Self::new(CullPolicy::EveryFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn test_every_frame() {
        let mut s = CullScheduler::new(CullPolicy::EveryFrame);
        assert!((0..5).all(|_| s.should_cull(FRAME)));
    }

    #[test]
    fn test_on_demand_runs_once_until_requested() {
        let mut s = CullScheduler::new(CullPolicy::OnDemand);
        assert!(s.should_cull(FRAME));
        assert!(!s.should_cull(FRAME));
        assert!(!s.should_cull(FRAME));
        s.request();
        assert!(s.should_cull(FRAME));
        assert!(!s.should_cull(FRAME));
    }

    #[test]
    fn test_timed_cadence() {
        let mut s = CullScheduler::new(CullPolicy::Timed(Duration::from_millis(50)));
        assert!(s.should_cull(FRAME));
        assert!(!s.should_cull(FRAME));
        assert!(!s.should_cull(FRAME));
        assert!(!s.should_cull(FRAME)); // 48ms
        assert!(s.should_cull(FRAME)); // 64ms
        assert!(!s.should_cull(FRAME));
    }

    #[test]
    fn test_policy_change_forces_cull() {
        let mut s = CullScheduler::new(CullPolicy::OnDemand);
        assert!(s.should_cull(FRAME));
        s.set_policy(CullPolicy::Timed(Duration::from_secs(10)));
        assert!(s.should_cull(FRAME));
        assert!(!s.should_cull(FRAME));
    }

    #[test]
    fn test_options_json_defaults() {
        let opts: SurfaceOptions = serde_json::from_str(r#"{"pixel_error": 1.5, "prefer_strips": true}"#).unwrap();
        assert_eq!(opts.pixel_error, 1.5);
        assert!(opts.prefer_strips);
        assert_eq!(opts.polygon_target, SurfaceOptions::default().polygon_target);
    }
}
