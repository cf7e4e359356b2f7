use crate::config::ConvergenceConfig;
use crate::snapshot::Fingerprint;

/// What the scroll loop should do with the snapshot it just took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Fresh content: process it, then move on.
    Continue,
    /// Already-seen content: scroll without processing.
    Scroll,
    /// The page has stopped changing.
    Stop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceState {
    pub last_fingerprint: Option<Fingerprint>,
    /// Consecutive samples equal to `last_fingerprint` (the first sighting is 0).
    pub repeat_count: u32,
    /// Confirmation scrolls issued since the repeat threshold was reached.
    pub confirmations: u32,
    pub scrolls: u32,
}

/// Decides when scrolling has reached the end of the page by watching the
/// fingerprints of successive samples.
#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    config: ConvergenceConfig,
    state: ConvergenceState,
}

impl ConvergenceDetector {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self {
            config,
            state: ConvergenceState::default(),
        }
    }

    pub fn reset(&mut self) {
        self.state = ConvergenceState::default();
    }

    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }

    pub fn update(&mut self, fingerprint: &Fingerprint) -> Action {
        if self.state.last_fingerprint.as_ref() != Some(fingerprint) {
            if self.state.confirmations > 0 {
                tracing::info!("content changed during end-of-page confirmation, resuming");
            }
            self.state.last_fingerprint = Some(fingerprint.clone());
            self.state.repeat_count = 0;
            self.state.confirmations = 0;
            return Action::Continue;
        }

        self.state.repeat_count += 1;
        tracing::debug!(
            "content unchanged ({}/{})",
            self.state.repeat_count,
            self.config.repeat_threshold
        );

        if self.state.repeat_count < self.config.repeat_threshold {
            return Action::Scroll;
        }

        if self.state.confirmations < self.config.extra_confirmations {
            self.state.confirmations += 1;
            tracing::debug!(
                "confirmation scroll {}/{}",
                self.state.confirmations,
                self.config.extra_confirmations
            );
            return Action::Scroll;
        }

        tracing::info!(
            "content unchanged after {} repeat(s), end of page",
            self.state.repeat_count
        );
        Action::Stop
    }

    /// No snapshot could be taken: nothing more can be learned this run.
    pub fn sampling_failed(&mut self) -> Action {
        Action::Stop
    }

    pub fn record_scroll(&mut self) {
        self.state.scrolls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(tag: &str) -> Fingerprint {
        Fingerprint::of(tag.as_bytes())
    }

    fn detector(repeat_threshold: u32, extra_confirmations: u32) -> ConvergenceDetector {
        ConvergenceDetector::new(ConvergenceConfig {
            repeat_threshold,
            extra_confirmations,
        })
    }

    fn run(d: &mut ConvergenceDetector, tags: &[&str]) -> Vec<Action> {
        tags.iter().map(|t| d.update(&fp(t))).collect()
    }

    #[test]
    fn test_stops_on_third_identical_sample() {
        let mut d = detector(2, 0);
        assert_eq!(
            run(&mut d, &["A", "A", "A"]),
            vec![Action::Continue, Action::Scroll, Action::Stop]
        );
    }

    #[test]
    fn test_never_stops_before_threshold() {
        for threshold in 1..=4u32 {
            let mut d = detector(threshold, 0);
            assert_eq!(d.update(&fp("A")), Action::Continue);
            for _ in 1..threshold {
                assert_eq!(d.update(&fp("A")), Action::Scroll);
            }
            assert_eq!(d.update(&fp("A")), Action::Stop, "threshold {threshold}");
        }
    }

    #[test]
    fn test_new_content_resets_repeats() {
        let mut d = detector(2, 0);
        assert_eq!(
            run(&mut d, &["A", "A", "B", "B", "C", "C", "C"]),
            vec![
                Action::Continue,
                Action::Scroll,
                Action::Continue,
                Action::Scroll,
                Action::Continue,
                Action::Scroll,
                Action::Stop,
            ]
        );
    }

    #[test]
    fn test_stops_within_threshold_of_any_prefix() {
        let prefixes: [&[&str]; 3] = [&[], &["X", "Y", "Y"], &["A", "B", "A", "B"]];
        for prefix in prefixes {
            let mut d = detector(3, 0);
            run(&mut d, prefix);
            let tail: Vec<Action> = (0..=3).map(|_| d.update(&fp("Z"))).collect();
            assert_eq!(tail.last(), Some(&Action::Stop), "prefix {prefix:?}");
            assert!(!tail[..3].contains(&Action::Stop), "prefix {prefix:?}");
        }
    }

    #[test]
    fn test_extra_confirmations_delay_stop() {
        let mut d = detector(2, 3);
        assert_eq!(
            run(&mut d, &["A", "A", "A", "A", "A", "A"]),
            vec![
                Action::Continue,
                Action::Scroll,
                Action::Scroll,
                Action::Scroll,
                Action::Scroll,
                Action::Stop,
            ]
        );
    }

    #[test]
    fn test_change_during_confirmation_resumes() {
        let mut d = detector(2, 3);
        run(&mut d, &["A", "A", "A"]);
        assert_eq!(d.state().confirmations, 1);
        assert_eq!(d.update(&fp("B")), Action::Continue);
        assert_eq!(d.state().confirmations, 0);
        assert_eq!(d.state().repeat_count, 0);
    }

    #[test]
    fn test_sampling_failure_stops() {
        let mut d = detector(2, 3);
        assert_eq!(d.sampling_failed(), Action::Stop);
    }

    #[test]
    fn test_reset() {
        let mut d = detector(2, 0);
        run(&mut d, &["A", "A"]);
        d.record_scroll();
        d.reset();
        assert_eq!(d.state(), &ConvergenceState::default());
        assert_eq!(d.update(&fp("A")), Action::Continue);
    }
}
