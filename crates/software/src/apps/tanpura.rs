//! Provides [`Tanpura`], a drone sequencer imitating the plucking pattern of the instrument it is named after.

use crate::{
    app::{App, Context},
    clock::{ClockSource, GrooveTemplate},
    configuration::{Division, Settings, channel_from_parameter},
    ops::fold_into,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7};

/// Keys of the [`Tanpura`] settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TanpuraParameter {
    /// Non-zero while the pattern plays.
    Running,
    /// Which [`ClockSource`] paces the pattern.
    ClockMode,
    /// Tempo of the internal clock.
    Bpm,
    /// The [`Division`] each step lasts.
    Division,
    /// The channel played on.
    Channel,
    /// The drone's root note, `36..=84`.
    Root,
    /// Selects the interval of the fifth step.
    Pattern,
    /// Rotates the pattern by this many steps.
    Shift,
}

const PARAMETER_COUNT: usize = 8;

static FACTORY_SETTINGS: [u8; PARAMETER_COUNT] = [0, 0, 120, 8, 0, 60, 0, 5];

/// Number of steps in the pattern.
pub const STEPS: u8 = 8;

/// Semitones from the root to the note of the fifth step, indexed by [`TanpuraParameter::Pattern`]. Zero leaves the
/// step silent.
const SHIFTS: [i8; 4] = [-5, -7, -1, 0];

/// How many steps each step's note sounds for.
const DURATIONS: [u8; STEPS as usize] = [5, 0, 0, 0, 0, 1, 1, 2];

/// Range the root is folded into when retuned from the keyboard.
const ROOT_LOW: u8 = 36;
const ROOT_HIGH: u8 = 84;

const ACCENT_VELOCITY: u8 = 127;
const VELOCITY: u8 = 80;

/// Plays an eight-step drone around a root note: the root an octave down, a rest, then the pattern's interval and the
/// root twice.
///
/// While the root page is being edited, notes played on the tanpura's channel retune it.
#[derive(Clone, Debug)]
pub struct Tanpura {
    settings: Settings<PARAMETER_COUNT>,
    /// Clock ticks since the last step.
    tick: u8,
    step: u8,
}

impl Default for Tanpura {
    fn default() -> Self {
        Self::new()
    }
}

impl Tanpura {
    /// Constructs a [`Tanpura`] with factory settings.
    pub fn new() -> Self {
        Self {
            settings: Settings::new(&FACTORY_SETTINGS),
            tick: 0,
            step: 0,
        }
    }

    fn get(&self, parameter: TanpuraParameter) -> u8 {
        self.settings.get(parameter as u8)
    }

    fn output_channel(&self) -> Channel {
        channel_from_parameter(self.get(TanpuraParameter::Channel))
    }

    /// Returns `true` while the pattern plays.
    pub fn is_running(&self) -> bool {
        self.settings.is_set(TanpuraParameter::Running as u8)
    }

    /// The next step to be played, before the shift is applied.
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Returns the note and velocity played on `actual_step` (after shifting), if any.
    pub fn step_note(&self, actual_step: u8) -> Option<(u8, u8)> {
        let root = self.get(TanpuraParameter::Root);
        match actual_step {
            0 => Some((root.saturating_sub(12), ACCENT_VELOCITY)),
            5 => {
                let shift = SHIFTS[usize::from(self.get(TanpuraParameter::Pattern) & 0x03)];
                (shift != 0).then(|| (root.saturating_add_signed(shift), VELOCITY))
            }
            6 | 7 => Some((root, VELOCITY)),
            _ => None,
        }
    }

    fn start(&mut self, ctx: &mut Context<'_>) {
        if self.is_running() {
            return;
        }
        if ctx.clock.source() == ClockSource::Internal {
            ctx.clock.start();
            ctx.send_now(&MidiMessage::Start);
        }
        self.tick = ctx.clock.prescaler().saturating_sub(1);
        self.step = 0;
        self.settings.set(TanpuraParameter::Running as u8, 1);
        info!("Tanpura started");
    }

    fn stop(&mut self, ctx: &mut Context<'_>) {
        if !self.is_running() {
            return;
        }
        let channel = self.output_channel();
        ctx.flush_queue(channel);
        ctx.send(&MidiMessage::ControlChange(
            channel,
            ControlFunction::ALL_NOTES_OFF,
            U7::from_u8_lossy(0),
        ));
        if ctx.clock.source() == ClockSource::Internal {
            ctx.send_now(&MidiMessage::Stop);
        }
        self.settings.set(TanpuraParameter::Running as u8, 0);
        info!("Tanpura stopped");
    }

    /// Advances by one clock tick, playing a step whenever a full division has elapsed.
    fn tick(&mut self, ctx: &mut Context<'_>) {
        self.tick = self.tick.saturating_add(1);
        if self.tick < ctx.clock.prescaler() {
            return;
        }
        self.tick = 0;

        let channel = self.output_channel();
        ctx.send_scheduled_notes(channel);

        let actual_step = self.step.wrapping_add(self.get(TanpuraParameter::Shift)) % STEPS;
        if let Some((note, velocity)) = self.step_note(actual_step) {
            trace!("Tanpura step {} plays {}", actual_step, note);
            ctx.send(&MidiMessage::NoteOn(
                channel,
                Note::from(U7::from_u8_lossy(note)),
                U7::from_u8_lossy(velocity),
            ));
            let duration = DURATIONS[usize::from(actual_step)].saturating_sub(1);
            // dropped note-offs are reported through the status indicator
            let _ = ctx.send_later(note, 0, duration, 0);
        }
        self.step = (self.step + 1) % STEPS;
    }
}

impl App for Tanpura {
    fn on_init(&mut self, ctx: &mut Context<'_>) {
        ctx.clock
            .set_source(ClockSource::from_parameter(self.get(TanpuraParameter::ClockMode)));
        ctx.clock
            .update(self.get(TanpuraParameter::Bpm), GrooveTemplate::default(), 0);
        ctx.clock
            .set_division(Division::from_parameter(self.get(TanpuraParameter::Division)));
        ctx.clock.start();
        self.settings.set(TanpuraParameter::Running as u8, 0);
    }

    fn on_start(&mut self, ctx: &mut Context<'_>) {
        if ctx.clock.source() != ClockSource::Internal {
            self.start(ctx);
        }
    }

    fn on_stop(&mut self, ctx: &mut Context<'_>) {
        if ctx.clock.source() != ClockSource::Internal {
            self.stop(ctx);
        }
    }

    fn on_continue(&mut self, ctx: &mut Context<'_>) {
        if ctx.clock.source() != ClockSource::Internal {
            self.settings.set(TanpuraParameter::Running as u8, 1);
        }
    }

    fn on_note_on(&mut self, ctx: &mut Context<'_>, channel: Channel, note: Note, _velocity: U7) {
        if channel == self.output_channel()
            && ctx.ui.editing
            && ctx.ui.page == TanpuraParameter::Root as u8
        {
            let root = fold_into(note as u8, ROOT_LOW, ROOT_HIGH);
            debug!("Tanpura root retuned to {}", root);
            self.settings.set(TanpuraParameter::Root as u8, root);
        }
    }

    fn on_clock(&mut self, ctx: &mut Context<'_>, source: ClockSource) {
        if source != ctx.clock.source() || !self.is_running() {
            return;
        }
        if source == ClockSource::Internal {
            ctx.send_now(&MidiMessage::TimingClock);
        }
        self.tick(ctx);
    }

    fn parameter(&self, key: u8) -> u8 {
        self.settings.get(key)
    }

    fn set_parameter(&mut self, ctx: &mut Context<'_>, key: u8, value: u8) {
        let parameter = TanpuraParameter::from_u8(key);
        if parameter == Some(TanpuraParameter::Running) {
            if value != 0 {
                self.start(ctx);
            } else {
                self.stop(ctx);
            }
        }
        self.settings.set(key, value);
        match parameter {
            Some(TanpuraParameter::Bpm) => ctx.clock.update(value, GrooveTemplate::default(), 0),
            Some(TanpuraParameter::ClockMode) => {
                ctx.clock.set_source(ClockSource::from_parameter(value))
            }
            _ => {}
        }
        ctx.clock
            .set_division(Division::from_parameter(self.get(TanpuraParameter::Division)));
    }

    fn settings(&self) -> &[u8] {
        self.settings.as_bytes()
    }

    fn settings_mut(&mut self) -> &mut [u8] {
        self.settings.as_bytes_mut()
    }

    fn factory_settings(&self) -> &'static [u8] {
        self.settings.factory()
    }

    fn settings_offset(&self) -> u16 {
        16
    }

    fn name(&self) -> &'static str {
        "tanpura"
    }

    fn channel(&self) -> Option<Channel> {
        Some(self.output_channel())
    }
}
