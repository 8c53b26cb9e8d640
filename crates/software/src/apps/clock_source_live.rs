//! Provides [`ClockSourceLive`], a MIDI clock generator meant for live use.

use crate::{
    app::{App, Context},
    clock::{ClockSource, GrooveTemplate, TEMPO_RANGE, TapTempo},
    configuration::Settings,
};
use embassy_time::Instant;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use wmidi::{Channel, MidiMessage, Note, U7};

/// Keys of the [`ClockSourceLive`] settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ClockSourceLiveParameter {
    /// Non-zero while the clock runs.
    Running,
    /// Base tempo, scaled by the multiplier and divider.
    Bpm,
    /// Multiplies the base tempo.
    Multiplier,
    /// Divides the base tempo.
    Divider,
    /// Non-zero to send Start and Stop along with the clock.
    SendStart,
    /// The note which taps the tempo; values past 127 disable tapping.
    ControlNote,
    /// The last tempo estimated from taps.
    TapBpm,
}

const PARAMETER_COUNT: usize = 7;

static FACTORY_SETTINGS: [u8; PARAMETER_COUNT] = [0, 120, 1, 1, 1, 128, 0];

/// Generates MIDI clock at a tempo set from the encoder or tapped in on a control note.
///
/// This application is the clock master: clock and transport messages arriving from elsewhere are not passed on, though
/// incoming transport messages still start and stop it. Everything else passes through untouched.
#[derive(Clone, Debug)]
pub struct ClockSourceLive {
    settings: Settings<PARAMETER_COUNT>,
    tap_tempo: TapTempo,
}

impl Default for ClockSourceLive {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSourceLive {
    /// Constructs a [`ClockSourceLive`] with factory settings.
    pub fn new() -> Self {
        Self {
            settings: Settings::new(&FACTORY_SETTINGS),
            tap_tempo: TapTempo::new(),
        }
    }

    fn get(&self, parameter: ClockSourceLiveParameter) -> u8 {
        self.settings.get(parameter as u8)
    }

    fn set(&mut self, parameter: ClockSourceLiveParameter, value: u8) {
        self.settings.set(parameter as u8, value);
    }

    /// Returns `true` while the clock runs.
    pub fn is_running(&self) -> bool {
        self.settings.is_set(ClockSourceLiveParameter::Running as u8)
    }

    /// The generated tempo: the base tempo scaled by the multiplier and divider, clamped to [`TEMPO_RANGE`].
    pub fn tempo(&self) -> u8 {
        let bpm = u16::from(self.get(ClockSourceLiveParameter::Bpm));
        let multiplier = u16::from(self.get(ClockSourceLiveParameter::Multiplier).max(1));
        let divider = u16::from(self.get(ClockSourceLiveParameter::Divider).max(1));
        (bpm * multiplier / divider).clamp(
            u16::from(*TEMPO_RANGE.start()),
            u16::from(*TEMPO_RANGE.end()),
        ) as u8
    }

    /// Returns the base tempo which, once scaled by the multiplier and divider, comes closest to `tempo`.
    fn base_tempo_for(&self, tempo: u8) -> u8 {
        let multiplier = u16::from(self.get(ClockSourceLiveParameter::Multiplier).max(1));
        let divider = u16::from(self.get(ClockSourceLiveParameter::Divider).max(1));
        ((u16::from(tempo) * divider + multiplier / 2) / multiplier).clamp(1, 255) as u8
    }

    fn is_control_note(&self, note: Note) -> bool {
        note as u8 == self.get(ClockSourceLiveParameter::ControlNote)
    }

    fn update_clock(&self, ctx: &mut Context<'_>) {
        ctx.clock.update(self.tempo(), GrooveTemplate::default(), 0);
    }

    fn start(&mut self, ctx: &mut Context<'_>) {
        if self.is_running() {
            return;
        }
        self.set(ClockSourceLiveParameter::Running, 1);
        ctx.clock.start();
        if self.settings.is_set(ClockSourceLiveParameter::SendStart as u8) {
            ctx.send_now(&MidiMessage::Start);
        }
        info!("Clock started at {} BPM", self.tempo());
    }

    fn stop(&mut self, ctx: &mut Context<'_>) {
        if !self.is_running() {
            return;
        }
        self.set(ClockSourceLiveParameter::Running, 0);
        ctx.clock.stop();
        if self.settings.is_set(ClockSourceLiveParameter::SendStart as u8) {
            ctx.send_now(&MidiMessage::Stop);
        }
        info!("Clock stopped");
    }

    /// Feeds a tap to the estimator. The clock runs at the tapped tempo itself, and the base tempo is set to match it.
    fn tap(&mut self, ctx: &mut Context<'_>) {
        if let Some(bpm) = self.tap_tempo.tap(Instant::now()) {
            info!("Tapped tempo: {} BPM", bpm);
            self.set(ClockSourceLiveParameter::TapBpm, bpm);
            self.set(ClockSourceLiveParameter::Bpm, self.base_tempo_for(bpm));
            ctx.clock.update(bpm, GrooveTemplate::default(), 0);
        }
    }
}

impl App for ClockSourceLive {
    fn on_init(&mut self, ctx: &mut Context<'_>) {
        ctx.clock.set_source(ClockSource::Internal);
        ctx.clock.stop();
        self.update_clock(ctx);
        self.tap_tempo.reset();
        self.set(ClockSourceLiveParameter::Running, 0);
    }

    fn on_raw_midi(&mut self, ctx: &mut Context<'_>, message: &MidiMessage<'_>) {
        match message {
            MidiMessage::TimingClock
            | MidiMessage::Start
            | MidiMessage::Stop
            | MidiMessage::Continue => {}
            MidiMessage::NoteOn(_, note, _) | MidiMessage::NoteOff(_, note, _)
                if self.is_control_note(*note) => {}
            _ => ctx.send(message),
        }
    }

    fn on_start(&mut self, ctx: &mut Context<'_>) {
        self.start(ctx);
    }

    fn on_stop(&mut self, ctx: &mut Context<'_>) {
        self.stop(ctx);
    }

    fn on_continue(&mut self, ctx: &mut Context<'_>) {
        if self.is_running() {
            return;
        }
        self.set(ClockSourceLiveParameter::Running, 1);
        ctx.clock.start();
        if self.settings.is_set(ClockSourceLiveParameter::SendStart as u8) {
            ctx.send_now(&MidiMessage::Continue);
        }
    }

    fn on_note_on(&mut self, ctx: &mut Context<'_>, _channel: Channel, note: Note, _velocity: U7) {
        if self.is_control_note(note) {
            self.tap(ctx);
        }
    }

    fn on_clock(&mut self, ctx: &mut Context<'_>, source: ClockSource) {
        if source == ClockSource::Internal && self.is_running() {
            ctx.send_now(&MidiMessage::TimingClock);
        }
    }

    fn on_click(&mut self, ctx: &mut Context<'_>) -> bool {
        if self.is_running() {
            self.stop(ctx);
        } else {
            self.start(ctx);
        }
        true
    }

    fn on_increment(&mut self, ctx: &mut Context<'_>, increment: i8) -> bool {
        let bpm = self
            .get(ClockSourceLiveParameter::Bpm)
            .saturating_add_signed(increment)
            .max(1);
        self.set(ClockSourceLiveParameter::Bpm, bpm);
        self.update_clock(ctx);
        true
    }

    fn parameter(&self, key: u8) -> u8 {
        self.settings.get(key)
    }

    fn set_parameter(&mut self, ctx: &mut Context<'_>, key: u8, value: u8) {
        let parameter = ClockSourceLiveParameter::from_u8(key);
        if parameter == Some(ClockSourceLiveParameter::Running) {
            if value != 0 {
                self.start(ctx);
            } else {
                self.stop(ctx);
            }
        }
        self.settings.set(key, value);
        match parameter {
            Some(
                ClockSourceLiveParameter::Bpm
                | ClockSourceLiveParameter::Multiplier
                | ClockSourceLiveParameter::Divider,
            ) => self.update_clock(ctx),
            Some(ClockSourceLiveParameter::ControlNote) => self.tap_tempo.reset(),
            _ => {}
        }
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
        32
    }

    fn name(&self) -> &'static str {
        "clock"
    }
}
