//! This module contains the building blocks of application settings: the fixed-size parameter arrays every application
//! persists, the musical divisions used to convert steps into clock ticks, and traits to make them easier to work with in code.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use wmidi::Channel;

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Sized,
    {
        let index = self
            .to_u8()
            .expect("enum variants should be castable to u8");
        match <Self as FromPrimitive>::from_u8(index + 1) {
            Some(new_selection) => new_selection,
            None => FromPrimitive::from_u8(0).expect("enum should not be empty"),
        }
    }
}

/// A fixed-size array of 8-bit parameter values, paired with the factory defaults it was created from.
///
/// Each application owns exactly one of these. Values are addressed by the application's parameter key (an enum cast to
/// `u8`); keys are guaranteed by contract to be less than `N`, but out-of-range keys are ignored on write and read as zero
/// rather than panicking.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings<const N: usize> {
    values: [u8; N],
    factory: &'static [u8; N],
}

impl<const N: usize> Settings<N> {
    /// Constructs [`Settings`] initialized to the factory defaults.
    pub const fn new(factory: &'static [u8; N]) -> Self {
        Self {
            values: *factory,
            factory,
        }
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: u8) -> u8 {
        self.values.get(usize::from(key)).copied().unwrap_or(0)
    }

    /// Stores `value` under `key`.
    pub fn set(&mut self, key: u8, value: u8) {
        if let Some(slot) = self.values.get_mut(usize::from(key)) {
            *slot = value;
        }
    }

    /// Returns `true` if the value stored under `key` is non-zero.
    pub fn is_set(&self, key: u8) -> bool {
        self.get(key) != 0
    }

    /// The values as they would be persisted.
    pub fn as_bytes(&self) -> &[u8] {
        &self.values
    }

    /// The values, for bulk loading from storage.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.values
    }

    /// The factory defaults, identical in size to [`as_bytes`](Self::as_bytes).
    pub fn factory(&self) -> &'static [u8] {
        self.factory
    }
}

/// Musical divisions, expressed as fractions of a whole note, which may be selected for delays and sequencer steps.
///
/// The variant order matches the order in which they are presented to the performer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Division {
    /// 2/1
    DoubleWhole,
    /// 1/1
    Whole,
    /// 1/2
    Half,
    /// 1/3
    HalfTriplet,
    /// 1/4
    Quarter,
    /// 1/6
    QuarterTriplet,
    /// 1/8
    Eighth,
    /// 1/12
    EighthTriplet,
    /// 1/16
    #[default]
    Sixteenth,
    /// 1/24
    SixteenthTriplet,
    /// 1/32
    ThirtySecond,
    /// 1/48
    ThirtySecondTriplet,
    /// 1/96, i.e., a single MIDI clock tick.
    SixtyFourthTriplet,
}

/// MIDI clock ticks (at 24 per quarter note) per [`Division`], indexed by variant.
const TICKS_PER_STEP: [u8; 13] = [192, 96, 48, 32, 24, 16, 12, 8, 6, 4, 3, 2, 1];

impl Division {
    /// Interprets a raw parameter value, clamping values past the end of the table to the shortest division.
    pub fn from_parameter(value: u8) -> Self {
        <Self as FromPrimitive>::from_u8(value).unwrap_or(Self::SixtyFourthTriplet)
    }

    /// Returns the number of MIDI clock ticks spanned by one step of this division.
    pub fn ticks(self) -> u8 {
        TICKS_PER_STEP[self as usize]
    }
}

impl CycleConfig for Division {}

/// Interprets a raw parameter value as a MIDI [`Channel`]; only the low nibble is significant.
pub fn channel_from_parameter(value: u8) -> Channel {
    Channel::from_index(value & 0x0f).unwrap_or(Channel::Ch1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq)]
    enum Alpha {
        A,
        B,
        C,
    }
    impl CycleConfig for Alpha {}

    #[test]
    fn cycle() {
        let config = Alpha::A.cycle();
        assert_eq!(
            Alpha::B,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            Alpha::C,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            Alpha::A,
            config,
            "Should wrap around to first variant; expected left but got right"
        );
    }

    static FACTORY: [u8; 3] = [0, 120, 8];

    #[test]
    fn settings_start_at_factory_defaults() {
        let settings = Settings::new(&FACTORY);
        assert_eq!(
            &FACTORY[..],
            settings.as_bytes(),
            "Expected left but got right"
        );
        assert_eq!(settings.factory(), settings.as_bytes());
    }

    #[test]
    fn settings_ignore_out_of_range_keys() {
        let mut settings = Settings::new(&FACTORY);
        settings.set(3, 99);
        assert_eq!(&FACTORY[..], settings.as_bytes(), "Expected no change");
        assert_eq!(0, settings.get(3), "Expected left but got right");
    }

    #[test]
    fn settings_set() {
        let mut settings = Settings::new(&FACTORY);
        assert!(!settings.is_set(0));
        settings.set(1, 90);
        assert_eq!(90, settings.get(1), "Expected left but got right");
        assert!(settings.is_set(1));
        assert_eq!(&FACTORY[..], settings.factory(), "Expected factory defaults to be untouched");
    }

    #[test]
    fn division_ticks() {
        assert_eq!(6, Division::Sixteenth.ticks(), "Expected left but got right");
        assert_eq!(24, Division::Quarter.ticks(), "Expected left but got right");
        assert_eq!(192, Division::DoubleWhole.ticks(), "Expected left but got right");
        assert_eq!(
            Division::Sixteenth,
            Division::from_parameter(8),
            "Expected left but got right"
        );
    }

    #[test]
    fn division_clamps_out_of_range_parameters() {
        assert_eq!(
            Division::SixtyFourthTriplet,
            Division::from_parameter(16),
            "Expected left but got right"
        );
        assert_eq!(1, Division::from_parameter(255).ticks());
    }

    #[test]
    fn channel_parameter_uses_low_nibble() {
        assert_eq!(Channel::Ch1, channel_from_parameter(0));
        assert_eq!(Channel::Ch16, channel_from_parameter(15));
        assert_eq!(Channel::Ch2, channel_from_parameter(17));
    }
}
