//! Resample mode selection: a pure function of the rational comparison
//! between a segment's source fps and the house output fps. No floating
//! point comparison anywhere — equality and integer-multiple checks use the
//! normalized numerator/denominator pair from `RationalFps`.

use crate::clock::RationalFps;

/// How a `TickProducer` reconciles its decoder's native cadence with the
/// house output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMode {
    /// Source and output fps are identical: one decoded frame per output
    /// tick, no accumulator state.
    Off,
    /// Output fps evenly divides source fps (source is an integer multiple
    /// of output): decode every source frame, harvest all audio, drop the
    /// surplus video frames that fall between kept output ticks.
    Drop { ratio: i64 },
    /// Non-integer ratio (e.g. 23.976 -> 30): an integer-ratio accumulator
    /// decides, tick by tick, whether to advance the decoder or repeat the
    /// last frame, without ever comparing floating point fps values.
    Cadence { num: i64, den: i64 },
}

/// Selects the resample mode for a segment given its source fps and the
/// house output fps. Pure, total, no I/O.
pub fn select_resample_mode(source_fps: RationalFps, output_fps: RationalFps) -> ResampleMode {
    if source_fps == output_fps {
        return ResampleMode::Off;
    }
    // source / output as a reduced fraction s_num/s_den over o_num/o_den:
    // cross-multiply to stay in integers.
    let cross_a = source_fps.num() as i128 * output_fps.den() as i128;
    let cross_b = output_fps.num() as i128 * source_fps.den() as i128;
    if cross_a % cross_b == 0 {
        let ratio = (cross_a / cross_b) as i64;
        if ratio >= 1 {
            return ResampleMode::Drop { ratio };
        }
    }
    ResampleMode::Cadence {
        num: cross_a as i64,
        den: cross_b as i64,
    }
}

/// Drives a `ResampleMode::Cadence` accumulator: for each output tick,
/// decides whether the decoder should advance to its next source frame or
/// repeat the previously decoded one. Mirrors a classic DDA/Bresenham
/// cadence pump — integer-only, no drift accumulation over arbitrarily long
/// runs because the accumulator is reduced every step.
pub struct CadenceAccumulator {
    num: i64,
    den: i64,
    acc: i64,
}

impl CadenceAccumulator {
    pub fn new(num: i64, den: i64) -> Self {
        Self { num, den, acc: 0 }
    }

    /// Returns `true` if the decoder should advance to its next source
    /// frame for this output tick, `false` if the current frame should be
    /// repeated.
    pub fn advance(&mut self) -> bool {
        self.acc += self.num;
        if self.acc >= self.den {
            self.acc -= self.den;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_fps_is_off() {
        let a = RationalFps::new(30, 1).unwrap();
        assert_eq!(select_resample_mode(a, a), ResampleMode::Off);
    }

    #[test]
    fn sixty_to_thirty_is_drop_ratio_2() {
        let src = RationalFps::new(60, 1).unwrap();
        let out = RationalFps::new(30, 1).unwrap();
        assert_eq!(select_resample_mode(src, out), ResampleMode::Drop { ratio: 2 });
    }

    #[test]
    fn ntsc_to_thirty_is_cadence() {
        let src = RationalFps::new(24_000, 1001).unwrap();
        let out = RationalFps::new(30, 1).unwrap();
        match select_resample_mode(src, out) {
            ResampleMode::Cadence { num, den } => {
                assert_eq!(num, 24_000 * 1);
                assert_eq!(den, 30 * 1001);
            }
            other => panic!("expected Cadence, got {other:?}"),
        }
    }

    #[test]
    fn cadence_accumulator_average_rate_matches_ratio() {
        // 24000/1001 against 30/1 -> cross_a=24000, cross_b=30030
        let mut acc = CadenceAccumulator::new(24_000, 30_030);
        let advances = (0..30_030).filter(|_| acc.advance()).count();
        // Over one full period the accumulator must advance exactly
        // num/gcd times relative to den/gcd ticks -- check the exact
        // integer count rather than an approximate rate.
        assert_eq!(advances, 24_000);
    }
}
