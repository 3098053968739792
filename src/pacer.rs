//! Emission pacing.
//!
//! Crop emission is limited to at most one per `min_interval` frames, counted on the
//! loop's frame counter rather than wall time.

/// Frame-count rate limiter for crop emission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmissionPacer {
    min_interval: u64,
    /// `None` until the first emission; equivalent to a sentinel far enough in the past
    /// that the first qualifying frame always passes.
    last_emission: Option<u64>,
}

impl EmissionPacer {
    pub fn new(min_interval: u64) -> Self {
        Self {
            min_interval,
            last_emission: None,
        }
    }

    pub fn min_interval(&self) -> u64 {
        self.min_interval
    }

    pub fn last_emission(&self) -> Option<u64> {
        self.last_emission
    }

    /// True iff more than `min_interval` frames have elapsed since the last emission.
    pub fn should_emit(&self, current_frame: u64) -> bool {
        match self.last_emission {
            None => true,
            Some(last) => current_frame.saturating_sub(last) > self.min_interval,
        }
    }

    /// Record a successful emission at `current_frame`.
    ///
    /// The frame counter only moves forward, so a stale frame index is ignored.
    pub fn record_emission(&mut self, current_frame: u64) {
        if let Some(last) = self.last_emission {
            if current_frame < last {
                log::warn!(
                    "pacer: ignoring emission at frame {} older than last emission {}",
                    current_frame,
                    last
                );
                return;
            }
        }
        self.last_emission = Some(current_frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_always_passes() {
        let pacer = EmissionPacer::new(20);
        assert!(pacer.should_emit(0));
        assert!(pacer.should_emit(1));
    }

    #[test]
    fn pacing_scenario_interval_twenty() {
        let mut pacer = EmissionPacer::new(20);

        assert!(pacer.should_emit(1));
        pacer.record_emission(1);

        assert!(!pacer.should_emit(15));
        assert!(!pacer.should_emit(21));
        assert!(pacer.should_emit(22));
        assert!(pacer.should_emit(25));
        pacer.record_emission(25);
        assert_eq!(pacer.last_emission(), Some(25));
        assert!(!pacer.should_emit(45));
        assert!(pacer.should_emit(46));
    }

    #[test]
    fn zero_interval_blocks_only_same_frame() {
        let mut pacer = EmissionPacer::new(0);
        pacer.record_emission(5);
        assert!(!pacer.should_emit(5));
        assert!(pacer.should_emit(6));
    }

    #[test]
    fn emission_gap_always_exceeds_interval() {
        for interval in [0u64, 1, 3, 20] {
            let mut pacer = EmissionPacer::new(interval);
            let mut emitted = Vec::new();
            for frame in 1..=200u64 {
                if pacer.should_emit(frame) {
                    pacer.record_emission(frame);
                    emitted.push(frame);
                }
            }
            for pair in emitted.windows(2) {
                assert!(pair[1] - pair[0] > interval);
            }
            assert_eq!(emitted[0], 1);
        }
    }

    #[test]
    fn stale_emission_is_ignored() {
        let mut pacer = EmissionPacer::new(2);
        pacer.record_emission(10);
        pacer.record_emission(4);
        assert_eq!(pacer.last_emission(), Some(10));
    }
}
