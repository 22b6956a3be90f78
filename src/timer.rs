//! Countdown reconciliation between the local clock and the authority's clock

use crate::types::{to_millis, Millis};

/// Reference instant + duration pair from which remaining time is computed.
/// Replaced wholesale on every arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerAnchor {
    /// Start of the countdown, on the source clock
    pub reference_instant: Millis,
    pub duration_ms: u64,
    /// `source clock - local clock`, folded into every read
    pub source_offset: i64,
}

/// One observation of the authority's clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub server_time: Millis,
    pub local_receipt: Millis,
}

impl ClockSample {
    pub fn offset(&self) -> i64 {
        self.server_time.saturating_sub(self.local_receipt)
    }
}

#[derive(Debug, Default)]
pub struct TimerReconciler {
    anchor: Option<TimerAnchor>,
    generation: u64,
    /// Lowest value handed out for the current anchor; reads never go back up
    floor_ms: Option<u64>,
}

impl TimerReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the countdown. Returns false (and changes nothing) when the same
    /// `(reference_instant, duration_ms)` is already armed.
    pub fn arm(
        &mut self,
        reference_instant: Millis,
        duration_ms: u64,
        correction: Option<ClockSample>,
    ) -> bool {
        if let Some(anchor) = &self.anchor {
            if anchor.reference_instant == reference_instant && anchor.duration_ms == duration_ms
            {
                return false;
            }
        }

        let anchor = TimerAnchor {
            reference_instant,
            duration_ms,
            source_offset: correction.map(|c| c.offset()).unwrap_or(0),
        };
        tracing::debug!(
            "Timer armed: reference={} duration={}ms offset={}ms",
            anchor.reference_instant,
            anchor.duration_ms,
            anchor.source_offset
        );
        self.anchor = Some(anchor);
        self.generation += 1;
        self.floor_ms = None;
        true
    }

    /// Arm from a mid-round sample: `remaining_ms` left as of `server_time`
    pub fn arm_from_remaining(
        &mut self,
        duration_ms: u64,
        remaining_ms: u64,
        sample: ClockSample,
    ) -> bool {
        let remaining = remaining_ms.min(duration_ms);
        let reference = sample
            .server_time
            .saturating_add(to_millis(remaining))
            .saturating_sub(to_millis(duration_ms));
        self.arm(reference, duration_ms, Some(sample))
    }

    pub fn disarm(&mut self) {
        self.anchor = None;
        self.floor_ms = None;
    }

    pub fn anchor(&self) -> Option<TimerAnchor> {
        self.anchor
    }

    pub fn is_armed(&self) -> bool {
        self.anchor.is_some()
    }

    /// Number of effective arms so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Remaining milliseconds at local time `now`; 0 when disarmed
    pub fn remaining_ms(&mut self, now: Millis) -> u64 {
        let Some(anchor) = self.anchor else {
            return 0;
        };

        let duration = to_millis(anchor.duration_ms);
        let elapsed = now
            .saturating_add(anchor.source_offset)
            .saturating_sub(anchor.reference_instant);
        let raw = duration.saturating_sub(elapsed.max(0)).clamp(0, duration) as u64;

        let value = match self.floor_ms {
            Some(floor) => raw.min(floor),
            None => raw,
        };
        self.floor_ms = Some(value);
        value
    }

    pub fn remaining_seconds(&mut self, now: Millis) -> f64 {
        self.remaining_ms(now) as f64 / 1000.0
    }

    /// True once an armed countdown has reached zero
    pub fn is_expired(&mut self, now: Millis) -> bool {
        self.is_armed() && self.remaining_ms(now) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_countdown() {
        let mut timer = TimerReconciler::new();
        assert!(timer.arm(10_000, 5_000, None));

        assert_eq!(timer.remaining_ms(10_000), 5_000);
        assert_eq!(timer.remaining_ms(12_000), 3_000);
        assert!(!timer.is_expired(14_999));
        assert!(timer.is_expired(15_000));
        assert_eq!(timer.remaining_ms(99_000), 0);
    }

    #[test]
    fn test_rearm_same_anchor_is_noop() {
        let mut timer = TimerReconciler::new();
        assert!(timer.arm(1_000, 30_000, None));
        assert!(!timer.arm(1_000, 30_000, None));
        assert!(!timer.arm(
            1_000,
            30_000,
            Some(ClockSample {
                server_time: 5,
                local_receipt: 0
            })
        ));
        assert_eq!(timer.generation(), 1);
        assert_eq!(timer.anchor().unwrap().source_offset, 0);

        assert!(timer.arm(1_000, 20_000, None));
        assert_eq!(timer.generation(), 2);
    }

    #[test]
    fn test_mid_round_sample_tracks_remaining() {
        // Server clock runs 7.5s ahead of ours
        let t0 = 100_000;
        let sample = ClockSample {
            server_time: t0 + 7_500,
            local_receipt: t0,
        };
        let mut timer = TimerReconciler::new();
        timer.arm_from_remaining(30_000, 12_000, sample);

        for delta in [0_i64, 1, 999, 4_321, 11_999, 12_000, 20_000] {
            let expected = (12_000 - delta).max(0) as f64 / 1000.0;
            let actual = timer.remaining_seconds(t0 + delta);
            assert!(
                (actual - expected).abs() <= 0.150,
                "delta={} expected={} actual={}",
                delta,
                expected,
                actual
            );
        }
    }

    #[test]
    fn test_extreme_values_saturate() {
        let mut timer = TimerReconciler::new();
        timer.arm_from_remaining(
            u64::MAX,
            u64::MAX,
            ClockSample {
                server_time: i64::MAX,
                local_receipt: i64::MIN,
            },
        );
        assert!(timer.remaining_ms(i64::MIN) <= i64::MAX as u64);
        assert!(timer.remaining_ms(i64::MAX) <= i64::MAX as u64);

        let mut timer = TimerReconciler::new();
        timer.arm(i64::MIN, u64::MAX, None);
        assert_eq!(timer.remaining_ms(i64::MAX), 0);
    }

    #[test]
    fn test_reads_never_increase_when_clock_steps_back() {
        let mut timer = TimerReconciler::new();
        timer.arm(0, 10_000, None);
        assert_eq!(timer.remaining_ms(4_000), 6_000);
        assert_eq!(timer.remaining_ms(3_000), 6_000);
        assert_eq!(timer.remaining_ms(5_000), 5_000);
    }

    #[test]
    fn test_future_reference_does_not_exceed_duration() {
        let mut timer = TimerReconciler::new();
        timer.arm(50_000, 10_000, None);
        assert_eq!(timer.remaining_ms(40_000), 10_000);
    }

    #[test]
    fn test_disarmed_timer_is_not_expired() {
        let mut timer = TimerReconciler::new();
        assert!(!timer.is_expired(0));
        timer.arm(0, 1_000, None);
        timer.disarm();
        assert!(!timer.is_expired(5_000));
        assert_eq!(timer.remaining_ms(5_000), 0);
    }
}
