//! Volume fade scheduling
//!
//! A fade from the current volume to a target over a fixed duration is a
//! quadratic curve parameterized by its y-intercept (the starting volume
//! at t = 0) and its vertex (the target volume at t = T). Storing the
//! coefficients instead of a start timestamp lets each tick re-derive the
//! elapsed time from the volume actually on the source, so an externally
//! perturbed volume rejoins the curve instead of jumping.

/// Result of advancing a fade by one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeStep {
    /// Volume to apply to the source for this tick
    pub volume: f32,
    /// True once the curve has reached its vertex; the fade entry
    /// should be retired
    pub finished: bool,
}

/// Closed-form quadratic volume-vs-time curve
#[derive(Debug, Clone, Copy)]
pub struct VolumeFade {
    a: f32,
    b: f32,
    c: f32,
    duration: f32,
}

impl VolumeFade {
    /// Build the curve through `(0, current)` with vertex `(duration, target)`.
    ///
    /// Requesting a fade whose target equals the current volume is caller
    /// misuse, as is a non-positive duration.
    pub fn new(current: f32, duration: f32, target: f32) -> Self {
        debug_assert!(duration > 0.0, "fade duration must be positive");
        debug_assert!(
            (target - current).abs() > f32::EPSILON,
            "fade target equals current volume"
        );

        // Vertex form a(t - T)^2 + target, expanded so evaluation is a
        // fused multiply chain.
        let a = (current - target) / (duration * duration);
        let b = -2.0 * a * duration;
        let c = current;

        Self { a, b, c, duration }
    }

    /// Total duration of the fade in seconds
    pub fn duration(&self) -> f32 {
        self.duration
    }

    /// Volume the curve settles at
    pub fn target(&self) -> f32 {
        self.volume_at(self.duration)
    }

    /// Evaluate the curve at `t` seconds
    pub fn volume_at(&self, t: f32) -> f32 {
        (self.a * t + self.b) * t + self.c
    }

    /// Recover the elapsed time that corresponds to `volume`.
    ///
    /// The quadratic has two roots; only the branch before the vertex is
    /// valid, which is always the smaller root for an on-curve volume.
    /// The result is clamped to `[0, duration]` so off-curve volumes
    /// (perturbed externally between ticks) land on the nearest endpoint.
    pub fn time_at_volume(&self, volume: f32) -> f32 {
        let disc = self.b.mul_add(self.b, -4.0 * self.a * (self.c - volume));
        let sqrt = disc.max(0.0).sqrt();
        let r1 = (-self.b + sqrt) / (2.0 * self.a);
        let r2 = (-self.b - sqrt) / (2.0 * self.a);
        r1.min(r2).clamp(0.0, self.duration)
    }

    /// Advance the fade by `dt` seconds from the volume currently applied
    /// to the source.
    pub fn advance(&self, current_volume: f32, dt: f32) -> FadeStep {
        let t = (self.time_at_volume(current_volume) + dt).clamp(0.0, self.duration);
        // Root recovery carries float slop; a fade one ulp short of its
        // duration still counts as done.
        let finished = self.duration - t <= self.duration * 1e-5;
        let volume = self.volume_at(if finished { self.duration } else { t });
        FadeStep { volume, finished }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn endpoints_match_inputs() {
        for &(v0, duration, v1) in &[
            (0.8_f32, 2.0_f32, 0.0_f32),
            (0.0, 1.5, 1.0),
            (0.25, 0.5, 0.75),
            (1.0, 10.0, 0.1),
        ] {
            let fade = VolumeFade::new(v0, duration, v1);
            assert_relative_eq!(fade.volume_at(0.0), v0, epsilon = 1e-5);
            assert_relative_eq!(fade.volume_at(duration), v1, epsilon = 1e-5);
            assert_relative_eq!(fade.target(), v1, epsilon = 1e-5);
        }
    }

    #[test]
    fn volume_time_round_trip_is_identity() {
        let fade = VolumeFade::new(0.9, 3.0, 0.1);
        for i in 0..=30 {
            let t = 3.0 * i as f32 / 30.0;
            let v = fade.volume_at(t);
            let recovered = fade.time_at_volume(v);
            assert_relative_eq!(fade.volume_at(recovered), v, epsilon = 1e-4);
        }
    }

    #[test]
    fn recovered_time_stays_on_curve() {
        // Root selection must land in [0, T] for every volume the curve
        // itself produces, in both fade directions.
        for &(v0, v1) in &[(0.8_f32, 0.0_f32), (0.0, 0.8), (0.3, 0.9), (0.9, 0.3)] {
            let fade = VolumeFade::new(v0, 2.0, v1);
            for i in 0..=50 {
                let t = 2.0 * i as f32 / 50.0;
                let recovered = fade.time_at_volume(fade.volume_at(t));
                assert!(recovered >= 0.0 && recovered <= 2.0, "t' = {recovered}");
            }
        }
    }

    #[test]
    fn advance_walks_monotonically_to_target() {
        let fade = VolumeFade::new(0.8, 2.0, 0.0);

        let step = fade.advance(0.8, 1.0);
        assert!(step.volume > 0.0 && step.volume < 0.8);
        assert!(!step.finished);

        let step = fade.advance(step.volume, 1.0);
        assert_relative_eq!(step.volume, 0.0, epsilon = 1e-5);
        assert!(step.finished);
    }

    #[test]
    fn advance_recovers_from_perturbed_volume() {
        let fade = VolumeFade::new(0.0, 2.0, 1.0);
        // Something outside the scheduler dropped the volume to a value
        // the curve never produced at this point in time.
        let step = fade.advance(-0.5, 0.5);
        assert!(step.volume >= 0.0 && step.volume <= 1.0);
        assert!(!step.finished);
    }

    #[test]
    fn overshoot_clamps_to_duration() {
        let fade = VolumeFade::new(0.5, 1.0, 0.2);
        let step = fade.advance(0.5, 100.0);
        assert_relative_eq!(step.volume, 0.2, epsilon = 1e-5);
        assert!(step.finished);
    }
}
