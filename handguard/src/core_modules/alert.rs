// THEORY:
// Per-frame danger verdicts are noisy: a detector flickers, a hand passes
// through a zone for a single frame. The `AlertEngine` turns that noisy boolean
// stream into discrete alert-start / alert-end events.
//
// States:
// - **Idle**: no danger observed recently, counter at zero.
// - **Accumulating**: consecutive dangerous frames are being counted. Any clear
//   frame drops the engine straight back to Idle (hysteresis by frame count).
// - **Active**: the threshold was reached. The engine now ignores detections
//   entirely and only watches the clock; once the hold-down has elapsed it
//   returns to Idle. An alert is therefore visible for at least the hold-down,
//   and cannot re-fire inside it.
//
// The engine is owned by exactly one stream worker and is never shared, so it
// holds no lock. Time is passed in by the caller, which keeps it testable with
// synthetic instants.

use std::time::{Duration, Instant};

pub const DEFAULT_THRESHOLD: u32 = 10;
pub const DEFAULT_HOLD_DOWN: Duration = Duration::from_secs(5);

/// Tunables for one engine. Different streams may run different sensitivities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertConfig {
    /// Consecutive dangerous frames needed to raise an alert (>= 1).
    pub threshold: u32,
    /// Minimum time an alert stays active once raised.
    pub hold_down: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            hold_down: DEFAULT_HOLD_DOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    Accumulating,
    Active,
}

/// The discrete events the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    AlertStart,
    AlertEnd,
}

/// Debounce and hold-down state machine for one stream.
#[derive(Debug, Clone)]
pub struct AlertEngine {
    config: AlertConfig,
    consecutive: u32,
    activated_at: Option<Instant>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config: AlertConfig {
                threshold: config.threshold.max(1),
                ..config
            },
            consecutive: 0,
            activated_at: None,
        }
    }

    pub fn config(&self) -> AlertConfig {
        self.config
    }

    pub fn phase(&self) -> AlertPhase {
        if self.activated_at.is_some() {
            AlertPhase::Active
        } else if self.consecutive > 0 {
            AlertPhase::Accumulating
        } else {
            AlertPhase::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.activated_at.is_some()
    }

    /// The current run of consecutive dangerous frames.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// How long the current alert has been active.
    pub fn active_for(&self, now: Instant) -> Option<Duration> {
        self.activated_at
            .map(|since| now.saturating_duration_since(since))
    }

    /// Feeds one frame's verdict.
    ///
    /// While active the verdict is ignored and only the hold-down clock is checked.
    pub fn observe(&mut self, dangerous: bool, now: Instant) -> Option<AlertTransition> {
        if self.is_active() {
            return self.tick(now);
        }

        if !dangerous {
            self.consecutive = 0;
            return None;
        }

        self.consecutive += 1;
        if self.consecutive >= self.config.threshold {
            self.activated_at = Some(now);
            self.consecutive = 0;
            return Some(AlertTransition::AlertStart);
        }
        None
    }

    /// Checks the hold-down clock without a new verdict.
    pub fn tick(&mut self, now: Instant) -> Option<AlertTransition> {
        let since = self.activated_at?;
        if now.saturating_duration_since(since) >= self.config.hold_down {
            self.activated_at = None;
            self.consecutive = 0;
            return Some(AlertTransition::AlertEnd);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(threshold: u32, hold_down_secs: u64) -> AlertEngine {
        AlertEngine::new(AlertConfig {
            threshold,
            hold_down: Duration::from_secs(hold_down_secs),
        })
    }

    /// Feeds verdicts one per millisecond, returning the 1-based frame of each transition.
    fn run(engine: &mut AlertEngine, start: Instant, verdicts: &[bool]) -> Vec<(usize, AlertTransition)> {
        verdicts
            .iter()
            .enumerate()
            .filter_map(|(i, &dangerous)| {
                let now = start + Duration::from_millis(i as u64);
                engine.observe(dangerous, now).map(|t| (i + 1, t))
            })
            .collect()
    }

    #[test]
    fn fires_after_exactly_threshold_frames() {
        let start = Instant::now();
        let mut e = engine(10, 5);
        let events = run(&mut e, start, &[true; 10]);
        assert_eq!(events, vec![(10, AlertTransition::AlertStart)]);
        assert_eq!(e.phase(), AlertPhase::Active);
        assert_eq!(e.consecutive(), 0);
    }

    #[test]
    fn one_short_then_clear_resets() {
        let start = Instant::now();
        let mut e = engine(4, 5);
        let events = run(&mut e, start, &[true, true, true, false]);
        assert!(events.is_empty());
        assert_eq!(e.consecutive(), 0);
        assert_eq!(e.phase(), AlertPhase::Idle);
    }

    #[test]
    fn interrupted_run_restarts_counting() {
        let start = Instant::now();
        let mut e = engine(3, 5);
        let events = run(&mut e, start, &[true, true, false, true, true, true]);
        assert_eq!(events, vec![(6, AlertTransition::AlertStart)]);
    }

    #[test]
    fn accumulating_phase_is_reported() {
        let mut e = engine(3, 5);
        e.observe(true, Instant::now());
        assert_eq!(e.phase(), AlertPhase::Accumulating);
        assert_eq!(e.consecutive(), 1);
    }

    #[test]
    fn hold_down_blocks_refire_even_with_continuous_danger() {
        let start = Instant::now();
        let mut e = engine(2, 5);
        assert_eq!(e.observe(true, start), None);
        assert_eq!(e.observe(true, start), Some(AlertTransition::AlertStart));

        for ms in (0..5000).step_by(100) {
            let now = start + Duration::from_millis(ms);
            assert_eq!(e.observe(true, now), None, "at {ms}ms");
            assert!(e.is_active());
        }
    }

    #[test]
    fn alert_ends_once_hold_down_elapses() {
        let start = Instant::now();
        let mut e = engine(1, 5);
        assert_eq!(e.observe(true, start), Some(AlertTransition::AlertStart));
        assert_eq!(e.tick(start + Duration::from_millis(4999)), None);
        assert_eq!(
            e.observe(true, start + Duration::from_secs(5)),
            Some(AlertTransition::AlertEnd)
        );
        assert_eq!(e.phase(), AlertPhase::Idle);

        // Counting starts over after the alert ends.
        let later = start + Duration::from_secs(6);
        assert_eq!(e.observe(true, later), Some(AlertTransition::AlertStart));
    }

    #[test]
    fn active_frames_do_not_accumulate() {
        let start = Instant::now();
        let mut e = engine(2, 1);
        run(&mut e, start, &[true, true]);
        assert!(e.is_active());
        e.observe(true, start + Duration::from_millis(500));
        assert_eq!(e.consecutive(), 0);
        assert_eq!(
            e.tick(start + Duration::from_secs(2)),
            Some(AlertTransition::AlertEnd)
        );
        assert_eq!(e.consecutive(), 0);
    }

    #[test]
    fn active_for_tracks_elapsed_time() {
        let start = Instant::now();
        let mut e = engine(1, 10);
        assert_eq!(e.active_for(start), None);
        e.observe(true, start);
        assert_eq!(
            e.active_for(start + Duration::from_secs(3)),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn zero_threshold_is_treated_as_one() {
        let mut e = engine(0, 1);
        assert_eq!(e.observe(true, Instant::now()), Some(AlertTransition::AlertStart));
    }

    #[test]
    fn tick_without_alert_is_a_no_op() {
        let mut e = engine(3, 1);
        e.observe(true, Instant::now());
        assert_eq!(e.tick(Instant::now() + Duration::from_secs(10)), None);
        assert_eq!(e.consecutive(), 1);
    }
}
