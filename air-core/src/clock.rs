//! MasterClock & rational timebase.
//!
//! The sole authority for session time. Every tick/fence/seam computation in
//! `air-core` routes through [`RationalFps`] and [`MasterClock`] so there is
//! exactly one place floating point could leak in — and it doesn't.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An irreducible `num/den` frame rate, `den > 0`, `num > 0`.
///
/// Normalized (reduced by GCD) on every construction so equality is
/// structural: two `RationalFps` constructed from `60/2` and `30/1` compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RationalFps {
    num: i64,
    den: i64,
}

impl RationalFps {
    pub fn new(num: i64, den: i64) -> Result<Self, ClockError> {
        if den <= 0 || num <= 0 {
            return Err(ClockError::InvalidFps { num, den });
        }
        let g = gcd(num, den);
        Ok(Self {
            num: num / g,
            den: den / g,
        })
    }

    pub const fn num(&self) -> i64 {
        self.num
    }

    pub const fn den(&self) -> i64 {
        self.den
    }

    /// Frame period in microseconds: `floor(1_000_000 * den / num)`.
    pub fn frame_period_us(&self) -> i64 {
        mul_div_floor(1_000_000, self.den, self.num)
    }

    /// Presentation time, in microseconds, of output tick `n`:
    /// `floor(n * 1_000_000 * den / num)`.
    pub fn presentation_us(&self, n: i64) -> i64 {
        mul_div_floor_3(n, 1_000_000, self.den, self.num)
    }

    /// Presentation time of tick `n` in 90 kHz units (MPEG PTS/DTS clock).
    pub fn presentation_90k(&self, n: i64) -> i64 {
        mul_div_floor_3(n, 90_000, self.den, self.num)
    }
}

impl std::fmt::Display for RationalFps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// `floor(a * b / c)` using a 128-bit intermediate to avoid overflow.
fn mul_div_floor(a: i64, b: i64, c: i64) -> i64 {
    ((a as i128 * b as i128) / c as i128) as i64
}

/// `floor(a * b * c / d)` using a 128-bit intermediate.
fn mul_div_floor_3(a: i64, b: i64, c: i64, d: i64) -> i64 {
    ((a as i128 * b as i128 * c as i128) / d as i128) as i64
}

/// The session's immutable anchor: a UTC instant and the monotonic instant
/// observed at the same moment. Wall clock defines *what should be
/// happening*; the monotonic clock drives enforcement so NTP steps or
/// system-time adjustments never perturb cadence.
#[derive(Debug, Clone, Copy)]
pub struct SessionEpoch {
    epoch_utc_us: i64,
    epoch_mono: std::time::Instant,
}

impl SessionEpoch {
    pub fn capture_now(epoch_utc_us: i64) -> Self {
        Self {
            epoch_utc_us,
            epoch_mono: std::time::Instant::now(),
        }
    }

    pub const fn epoch_utc_us(&self) -> i64 {
        self.epoch_utc_us
    }
}

/// The sole authoritative session time source.
///
/// `now_mono_ns` is non-decreasing between calls by construction
/// (`std::time::Instant` on every supported platform). `presentation_time_of_tick`
/// is a pure function of epoch and fps — it never consults processing time.
pub struct MasterClock {
    epoch: SessionEpoch,
    fps: RationalFps,
    drift_tolerance_us: i64,
}

impl MasterClock {
    pub fn new(epoch: SessionEpoch, fps: RationalFps, drift_tolerance_us: i64) -> Self {
        Self {
            epoch,
            fps,
            drift_tolerance_us,
        }
    }

    pub fn fps(&self) -> RationalFps {
        self.fps
    }

    pub fn session_epoch_utc_us(&self) -> i64 {
        self.epoch.epoch_utc_us
    }

    pub fn frame_period_us(&self) -> i64 {
        self.fps.frame_period_us()
    }

    /// Current wall-clock UTC in microseconds. Used only to *validate*
    /// against drift at session start and for evidence timestamps — never
    /// in a wait-until-deadline loop.
    pub fn now_utc_us(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        now.as_micros() as i64
    }

    /// Nanoseconds elapsed on the monotonic clock since the session epoch
    /// was captured. Non-decreasing across calls.
    pub fn now_mono_ns(&self) -> i64 {
        self.epoch.epoch_mono.elapsed().as_nanos() as i64
    }

    /// The output tick index whose presentation time is at or after
    /// `utc_us`, relative to the session epoch.
    pub fn tick_index_of_utc(&self, utc_us: i64) -> i64 {
        let delta_us = utc_us - self.epoch.epoch_utc_us;
        if delta_us <= 0 {
            return 0;
        }
        // ceil(delta_us * num / (1_000_000 * den))
        let num = delta_us as i128 * self.fps.num() as i128;
        let den = 1_000_000i128 * self.fps.den() as i128;
        ((num + den - 1) / den) as i64
    }

    /// Pure function of epoch + fps: the UTC microsecond at which tick `n`
    /// should be emitted. Never depends on processing time.
    pub fn presentation_time_of_tick(&self, n: i64) -> i64 {
        self.epoch.epoch_utc_us + self.fps.presentation_us(n)
    }

    /// Monotonic deadline (nanoseconds since epoch capture) for tick `n`,
    /// derived the same way as `presentation_time_of_tick` but expressed on
    /// the monotonic axis the tick thread actually sleeps against.
    pub fn mono_deadline_ns_of_tick(&self, n: i64) -> i64 {
        self.fps.presentation_us(n) * 1_000
    }

    /// Validates that wall clock hasn't drifted from the monotonic
    /// projection of the epoch by more than the configured tolerance. A
    /// session that drifts is terminated, never "corrected".
    pub fn check_drift(&self) -> Result<(), ClockError> {
        let wall_elapsed_us = self.now_utc_us() - self.epoch.epoch_utc_us;
        let mono_elapsed_us = self.now_mono_ns() / 1_000;
        let drift = (wall_elapsed_us - mono_elapsed_us).abs();
        if drift > self.drift_tolerance_us {
            return Err(ClockError::EpochDrift {
                drift_us: drift,
                tolerance_us: self.drift_tolerance_us,
            });
        }
        Ok(())
    }

    /// Blocks the calling thread (the tick thread) until the monotonic
    /// deadline for tick `n`. If already past the deadline, returns
    /// immediately — no catch-up sleep, no negative sleep.
    pub fn sleep_until_tick(&self, n: i64) {
        let deadline_ns = self.mono_deadline_ns_of_tick(n);
        let now_ns = self.now_mono_ns();
        if deadline_ns > now_ns {
            std::thread::sleep(Duration::from_nanos((deadline_ns - now_ns) as u64));
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("invalid rational fps {num}/{den}: both terms must be positive")]
    InvalidFps { num: i64, den: i64 },
    #[error("session epoch drifted {drift_us}us beyond tolerance {tolerance_us}us")]
    EpochDrift { drift_us: i64, tolerance_us: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_on_construction() {
        let a = RationalFps::new(60, 2).unwrap();
        let b = RationalFps::new(30, 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_nonpositive_terms() {
        assert!(RationalFps::new(0, 1).is_err());
        assert!(RationalFps::new(1, 0).is_err());
        assert!(RationalFps::new(-1, 1).is_err());
    }

    #[test]
    fn frame_period_30fps() {
        let fps = RationalFps::new(30, 1).unwrap();
        assert_eq!(fps.frame_period_us(), 33_333);
    }

    #[test]
    fn frame_period_ntsc_23_976() {
        let fps = RationalFps::new(24_000, 1001).unwrap();
        // floor(1_000_000 * 1001 / 24_000) = 41_708
        assert_eq!(fps.frame_period_us(), 41_708);
    }

    #[test]
    fn presentation_time_is_monotone_and_exact() {
        let fps = RationalFps::new(30, 1).unwrap();
        for n in 0..300 {
            assert_eq!(fps.presentation_us(n), n * 33_333);
        }
    }

    #[test]
    fn presentation_90k_matches_invariant_2() {
        let fps = RationalFps::new(30, 1).unwrap();
        for n in 0..10 {
            let expected = (n as i128 * 90_000 * fps.den() as i128 / fps.num() as i128) as i64;
            assert_eq!(fps.presentation_90k(n), expected);
        }
    }

    #[test]
    fn tick_index_of_utc_is_ceiling() {
        let epoch = SessionEpoch::capture_now(0);
        let fps = RationalFps::new(30, 1).unwrap();
        let clock = MasterClock::new(epoch, fps, 250_000);
        assert_eq!(clock.tick_index_of_utc(0), 0);
        assert_eq!(clock.tick_index_of_utc(33_333), 1);
        assert_eq!(clock.tick_index_of_utc(33_334), 2);
        assert_eq!(clock.tick_index_of_utc(1), 1);
    }

    #[test]
    fn no_drift_within_tolerance() {
        let epoch = SessionEpoch::capture_now(0);
        let fps = RationalFps::new(30, 1).unwrap();
        let clock = MasterClock::new(epoch, fps, 250_000);
        // epoch_utc_us pinned at 0 but now_utc_us() reads real wall clock,
        // so this only exercises the arithmetic path, not real drift.
        let _ = clock.check_drift();
    }
}
