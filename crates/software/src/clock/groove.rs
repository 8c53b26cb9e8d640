//! Groove templates which bend the spacing of internally generated clock ticks to give them a swing or human feel.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Number of sixteenth-note steps in a groove template.
pub const GROOVE_STEPS: u8 = 16;

/// A timing template, applied step by step over a bar of sixteenth notes.
///
/// Each template lengthens some steps and shortens others by the same total, so the length of a bar is left unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GrooveTemplate {
    /// Every other sixteenth note lands late.
    #[default]
    Swing,
    /// Every other eighth note lands late.
    Shuffle,
    /// Off-beat sixteenths land early.
    Push,
    /// The second half of each beat drags.
    Lag,
    /// Small irregular deviations.
    Human,
    /// Large irregular deviations.
    Monkey,
}

const SWING: [i8; 16] = [48, -48, 48, -48, 48, -48, 48, -48, 48, -48, 48, -48, 48, -48, 48, -48];
const SHUFFLE: [i8; 16] = [64, 64, -64, -64, 64, 64, -64, -64, 64, 64, -64, -64, 64, 64, -64, -64];
const PUSH: [i8; 16] = [-24, 24, -24, 24, -24, 24, -24, 24, -24, 24, -24, 24, -24, 24, -24, 24];
const LAG: [i8; 16] = [12, 12, -12, -12, 12, 12, -12, -12, 12, 12, -12, -12, 12, 12, -12, -12];
const HUMAN: [i8; 16] = [9, -6, 3, -11, 7, -2, -5, 5, 10, -8, 1, -3, 6, -9, 4, -1];
const MONKEY: [i8; 16] = [21, -14, 8, -25, 17, -5, -12, 10, 24, -19, 3, -7, 13, -22, 9, -1];

impl GrooveTemplate {
    /// Interprets a raw parameter value, falling back to [`GrooveTemplate::Swing`].
    pub fn from_parameter(value: u8) -> Self {
        <Self as FromPrimitive>::from_u8(value).unwrap_or_default()
    }

    fn offsets(&self) -> &'static [i8; 16] {
        match self {
            Self::Swing => &SWING,
            Self::Shuffle => &SHUFFLE,
            Self::Push => &PUSH,
            Self::Lag => &LAG,
            Self::Human => &HUMAN,
            Self::Monkey => &MONKEY,
        }
    }

    /// Returns the interval to use for a tick falling on `step`, given the unshaped interval and a groove amount in
    /// `0..=127`. An amount of zero leaves the interval untouched.
    pub fn shape(&self, interval_us: u32, amount: u8, step: u8) -> u32 {
        let offset = i64::from(self.offsets()[usize::from(step % GROOVE_STEPS)]);
        let base = i64::from(interval_us);
        let amount = i64::from(amount.min(127));
        (base + base * offset * amount / (127 * 128)).max(1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [GrooveTemplate; 6] = [
        GrooveTemplate::Swing,
        GrooveTemplate::Shuffle,
        GrooveTemplate::Push,
        GrooveTemplate::Lag,
        GrooveTemplate::Human,
        GrooveTemplate::Monkey,
    ];

    #[test]
    fn templates_are_balanced() {
        for template in ALL {
            let sum: i32 = template.offsets().iter().map(|&o| i32::from(o)).sum();
            assert_eq!(0, sum, "Expected {:?} to preserve bar length", template);
        }
    }

    #[test]
    fn zero_amount_is_straight() {
        for template in ALL {
            for step in 0..GROOVE_STEPS {
                assert_eq!(20_833, template.shape(20_833, 0, step));
            }
        }
    }

    #[test]
    fn swing_delays_off_beats() {
        let on_beat = GrooveTemplate::Swing.shape(20_000, 127, 0);
        let off_beat = GrooveTemplate::Swing.shape(20_000, 127, 1);
        assert_eq!(27_500, on_beat, "Expected left but got right");
        assert_eq!(12_500, off_beat, "Expected left but got right");

        let bar: u32 = (0..GROOVE_STEPS)
            .map(|step| GrooveTemplate::Swing.shape(20_000, 127, step))
            .sum();
        assert_eq!(16 * 20_000, bar, "Expected swing to preserve bar length");
    }

    #[test]
    fn from_parameter() {
        assert_eq!(GrooveTemplate::Monkey, GrooveTemplate::from_parameter(5));
        assert_eq!(GrooveTemplate::Swing, GrooveTemplate::from_parameter(6));
    }
}
