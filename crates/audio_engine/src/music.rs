//! Background music rotation policy
//!
//! Pure state machine deciding *which* track plays next; actual streaming
//! is the engine's job. Two track categories exist and the rotation never
//! immediately repeats the current or the previous track when the list is
//! large enough to avoid it.

use rand::Rng;

/// Mood category for the background rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicCategory {
    /// Out-of-combat music
    Relaxing,
    /// Combat music
    Fighting,
}

/// Rotation state for background music
pub struct MusicRotation {
    category: Option<MusicCategory>,
    relaxing: Vec<String>,
    fighting: Vec<String>,
    current: Option<String>,
    previous: Option<String>,
    since_ended: f32,
    gap_secs: f32,
}

impl MusicRotation {
    /// Create an inactive rotation with the given inter-track gap
    pub fn new(gap_secs: f32) -> Self {
        Self {
            category: None,
            relaxing: Vec::new(),
            fighting: Vec::new(),
            current: None,
            previous: None,
            since_ended: 0.0,
            gap_secs,
        }
    }

    /// Replace the candidate list for one category
    pub fn set_tracks(&mut self, category: MusicCategory, tracks: Vec<String>) {
        match category {
            MusicCategory::Relaxing => self.relaxing = tracks,
            MusicCategory::Fighting => self.fighting = tracks,
        }
    }

    /// Currently active category, if the rotation is running
    pub fn category(&self) -> Option<MusicCategory> {
        self.category
    }

    /// Track the rotation currently considers playing
    pub fn current_track(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Switch the rotation to `category` and pick its opening track.
    ///
    /// Returns `None` if the rotation is already in that category (the
    /// caller must not restart the music) or the category has no tracks.
    pub fn start(&mut self, category: MusicCategory) -> Option<String> {
        if self.category == Some(category) {
            return None;
        }

        self.category = Some(category);
        self.previous = None;
        self.since_ended = 0.0;

        let first = self.tracks(category).first().cloned();
        self.current = first.clone();
        first
    }

    /// Stop rotating without touching whatever is currently audible
    pub fn stop(&mut self) {
        self.category = None;
        self.current = None;
        self.previous = None;
        self.since_ended = 0.0;
    }

    /// Advance the rotation by one tick.
    ///
    /// `current_ended` reports whether the current track has finished
    /// streaming. Once it has been over for the configured gap, a new
    /// track is chosen and returned for the caller to start.
    pub fn on_tick<R: Rng>(&mut self, dt: f32, current_ended: bool, rng: &mut R) -> Option<String> {
        self.category?;

        if !current_ended {
            return None;
        }

        self.since_ended += dt;
        if self.since_ended < self.gap_secs {
            return None;
        }

        let next = self.pick_next(rng)?;
        self.previous = self.current.take();
        self.current = Some(next.clone());
        self.since_ended = 0.0;
        Some(next)
    }

    fn tracks(&self, category: MusicCategory) -> &[String] {
        match category {
            MusicCategory::Relaxing => &self.relaxing,
            MusicCategory::Fighting => &self.fighting,
        }
    }

    /// Rotation rule: uniform pick rejecting the current and previous
    /// track. A single-track list always accepts; a two-track list picks
    /// the other track outright; a list whose every entry is excluded
    /// (duplicates of the current/previous track) accepts anything, so
    /// rejection can never loop forever.
    fn pick_next<R: Rng>(&self, rng: &mut R) -> Option<String> {
        let list = self.tracks(self.category?);
        let excluded = |t: &str| {
            Some(t) == self.current.as_deref() || Some(t) == self.previous.as_deref()
        };
        match list.len() {
            0 => None,
            1 => Some(list[0].clone()),
            2 => {
                let other = list
                    .iter()
                    .find(|t| Some(t.as_str()) != self.current.as_deref());
                other
                    .cloned()
                    .or_else(|| Some(list[rng.gen_range(0..2)].clone()))
            }
            n if list.iter().all(|t| excluded(t)) => Some(list[rng.gen_range(0..n)].clone()),
            n => loop {
                let candidate = &list[rng.gen_range(0..n)];
                if !excluded(candidate) {
                    break Some(candidate.clone());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rotation(tracks: &[&str]) -> MusicRotation {
        let mut rotation = MusicRotation::new(6.0);
        rotation.set_tracks(
            MusicCategory::Relaxing,
            tracks.iter().map(|t| (*t).to_string()).collect(),
        );
        rotation
    }

    #[test]
    fn start_picks_first_track() {
        let mut rotation = rotation(&["a", "b", "c"]);
        assert_eq!(rotation.start(MusicCategory::Relaxing).as_deref(), Some("a"));
        assert_eq!(rotation.current_track(), Some("a"));
    }

    #[test]
    fn start_is_noop_when_already_in_category() {
        let mut rotation = rotation(&["a", "b"]);
        assert!(rotation.start(MusicCategory::Relaxing).is_some());
        assert!(rotation.start(MusicCategory::Relaxing).is_none());
    }

    #[test]
    fn no_advance_before_gap_elapses() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rotation = rotation(&["a", "b", "c"]);
        rotation.start(MusicCategory::Relaxing);

        assert!(rotation.on_tick(3.0, true, &mut rng).is_none());
        assert!(rotation.on_tick(2.9, true, &mut rng).is_none());
        assert!(rotation.on_tick(0.2, true, &mut rng).is_some());
    }

    #[test]
    fn timer_only_runs_after_track_ends() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rotation = rotation(&["a", "b", "c"]);
        rotation.start(MusicCategory::Relaxing);

        for _ in 0..100 {
            assert!(rotation.on_tick(1.0, false, &mut rng).is_none());
        }
    }

    #[test]
    fn single_track_list_always_returns_it() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut rotation = rotation(&["only"]);
        rotation.start(MusicCategory::Relaxing);

        for _ in 0..10 {
            let next = rotation.on_tick(6.0, true, &mut rng);
            assert_eq!(next.as_deref(), Some("only"));
        }
    }

    #[test]
    fn two_track_list_alternates() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut rotation = rotation(&["a", "b"]);
        rotation.start(MusicCategory::Relaxing);

        let mut last = "a".to_string();
        for _ in 0..20 {
            let next = rotation.on_tick(6.0, true, &mut rng).unwrap();
            assert_ne!(next, last, "two-track rotation repeated a track");
            last = next;
        }
    }

    #[test]
    fn large_list_never_repeats_immediately() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut rotation = rotation(&["a", "b", "c", "d", "e"]);
        rotation.start(MusicCategory::Relaxing);

        let mut last = rotation.current_track().unwrap().to_string();
        for _ in 0..1000 {
            let next = rotation.on_tick(6.0, true, &mut rng).unwrap();
            assert_ne!(next, last, "rotation repeated the preceding track");
            last = next;
        }
    }

    #[test]
    fn duplicate_only_list_still_advances() {
        // Every entry equals the current/previous track; the pick must
        // accept one anyway instead of resampling forever.
        let mut rng = StdRng::seed_from_u64(9);
        let mut rotation = rotation(&["a", "a", "a"]);
        rotation.start(MusicCategory::Relaxing);

        for _ in 0..10 {
            let next = rotation.on_tick(6.0, true, &mut rng);
            assert_eq!(next.as_deref(), Some("a"));
        }
    }

    #[test]
    fn stop_clears_state_without_category() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut rotation = rotation(&["a", "b"]);
        rotation.start(MusicCategory::Relaxing);
        rotation.stop();

        assert_eq!(rotation.category(), None);
        assert!(rotation.on_tick(100.0, true, &mut rng).is_none());
    }

    #[test]
    fn empty_category_yields_nothing() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut rotation = MusicRotation::new(6.0);
        assert!(rotation.start(MusicCategory::Fighting).is_none());
        assert!(rotation.on_tick(10.0, true, &mut rng).is_none());
    }
}
