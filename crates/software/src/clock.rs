//! Provides [`Clock`], the tempo generator shared by the active application, along with the utilities it is built from.
//!
//! The clock is advanced by a hardware timer firing every [`TIMER_PERIOD_US`] microseconds. While started, it turns those
//! timer ticks into MIDI clock ticks (24 per quarter note) at the configured tempo, bent by the selected
//! [`GrooveTemplate`]. It does not decide who listens: each tick reaches the application tagged with its
//! [`ClockSource`], and the application compares that against its own configuration before reacting. Ticks from an
//! external MIDI clock or from note events do not pass through the generator at all.

use crate::configuration::{CycleConfig, Division};
use core::ops::RangeInclusive;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use wmidi::Channel;

mod groove;
pub use groove::*;

mod tap_tempo;
pub use tap_tempo::*;

/// Period of the hardware timer driving [`Clock::tick`], in microseconds.
pub const TIMER_PERIOD_US: u32 = 125;

/// MIDI clock ticks per quarter note.
pub const PULSES_PER_QUARTER: u8 = 24;

/// MIDI clock ticks per sixteenth note, i.e., per groove step.
const PULSES_PER_STEP: u8 = PULSES_PER_QUARTER / 4;

/// Tempos the internal generator can be set to, in beats per minute.
pub const TEMPO_RANGE: RangeInclusive<u8> = 40..=240;

/// The channel whose note-ons are clock ticks when the source is [`ClockSource::Note`].
pub const NOTE_CLOCK_CHANNEL: Channel = Channel::Ch16;

/// The stimulus a tick originates from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// Generated by [`Clock`] itself at the configured tempo.
    #[default]
    Internal,
    /// MIDI timing clock messages received from another device.
    External,
    /// Note-on messages received on the note clock channel.
    Note,
}

impl ClockSource {
    /// Interprets a raw parameter value, falling back to [`ClockSource::Internal`].
    pub fn from_parameter(value: u8) -> Self {
        <Self as FromPrimitive>::from_u8(value).unwrap_or_default()
    }
}

impl CycleConfig for ClockSource {}

/// The internal tick generator, along with the clock settings of the active application.
#[derive(Clone, Debug)]
pub struct Clock {
    source: ClockSource,
    tempo_bpm: u8,
    groove_template: GrooveTemplate,
    groove_amount: u8,
    prescaler: u8,
    running: bool,
    /// Unshaped interval between ticks at the current tempo.
    interval_us: u32,
    /// Time accumulated towards the next tick.
    elapsed_us: u32,
    /// Position within the groove template, in ticks.
    pulse: u8,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Constructs a stopped [`Clock`] at 120 BPM without groove.
    pub fn new() -> Self {
        let mut clock = Self {
            source: ClockSource::default(),
            tempo_bpm: 0,
            groove_template: GrooveTemplate::default(),
            groove_amount: 0,
            prescaler: Division::default().ticks(),
            running: false,
            interval_us: 0,
            elapsed_us: 0,
            pulse: 0,
        };
        clock.update(120, GrooveTemplate::default(), 0);
        clock
    }

    /// Reconfigures the generator. The tempo is clamped to [`TEMPO_RANGE`].
    ///
    /// Time already accumulated towards the next tick is kept (capped at one new interval), so the change takes effect
    /// from the next tick without any catch-up burst.
    pub fn update(&mut self, tempo_bpm: u8, groove_template: GrooveTemplate, groove_amount: u8) {
        self.tempo_bpm = tempo_bpm.clamp(*TEMPO_RANGE.start(), *TEMPO_RANGE.end());
        self.groove_template = groove_template;
        self.groove_amount = groove_amount.min(127);
        self.interval_us = 60_000_000 / (u32::from(self.tempo_bpm) * u32::from(PULSES_PER_QUARTER));
        self.elapsed_us = self.elapsed_us.min(self.interval_us);
        debug!(
            "Clock updated: {} BPM, groove amount {}",
            self.tempo_bpm, self.groove_amount
        );
    }

    /// Enables tick generation, restarting from the top of the groove template.
    pub fn start(&mut self) {
        self.running = true;
        self.elapsed_us = 0;
        self.pulse = 0;
    }

    /// Disables tick generation.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Returns `true` if the generator is enabled.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advances the clock by one hardware timer period. Returns `true` when an internal tick is due.
    pub fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.elapsed_us += TIMER_PERIOD_US;
        let interval = self.current_interval_us();
        if self.elapsed_us < interval {
            return false;
        }
        self.elapsed_us -= interval;
        self.pulse = (self.pulse + 1) % (PULSES_PER_STEP * GROOVE_STEPS);
        true
    }

    /// The interval until the next internal tick, with groove applied.
    pub fn current_interval_us(&self) -> u32 {
        self.groove_template.shape(
            self.interval_us,
            self.groove_amount,
            self.pulse / PULSES_PER_STEP,
        )
    }

    /// The tempo of the internal generator in beats per minute.
    pub fn tempo_bpm(&self) -> u8 {
        self.tempo_bpm
    }

    /// The selected groove template.
    pub fn groove_template(&self) -> GrooveTemplate {
        self.groove_template
    }

    /// The selected groove amount.
    pub fn groove_amount(&self) -> u8 {
        self.groove_amount
    }

    /// The clock source the active application listens to.
    pub fn source(&self) -> ClockSource {
        self.source
    }

    /// Records the clock source the active application listens to.
    pub fn set_source(&mut self, source: ClockSource) {
        if source != self.source {
            info!("Clock source changed to {}", source as u8);
        }
        self.source = source;
    }

    /// Clock ticks per sequencer step.
    pub fn prescaler(&self) -> u8 {
        self.prescaler
    }

    /// Derives the prescaler from a musical division.
    pub fn set_division(&mut self, division: Division) {
        self.prescaler = division.ticks();
    }

    /// Returns `true` if note events on `channel` are clock ticks rather than notes.
    pub fn is_note_trigger(&self, channel: Channel) -> bool {
        self.source == ClockSource::Note && channel == NOTE_CLOCK_CHANNEL
    }
}
