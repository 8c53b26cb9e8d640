//! Provides [`Delay`], a MIDI echo effect.

use crate::{
    app::{App, Context},
    clock::{ClockSource, GrooveTemplate},
    configuration::{Division, Settings, channel_from_parameter},
    ops::{mul_shift8, signed_mul_shift8, transpose},
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use wmidi::{Channel, MidiMessage, Note, U7};

/// Keys of the [`Delay`] settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DelayParameter {
    /// Which [`ClockSource`] paces the echoes.
    ClockMode,
    /// Tempo of the internal clock.
    Bpm,
    /// [`GrooveTemplate`] of the internal clock.
    GrooveTemplate,
    /// Groove amount of the internal clock, `0..=127`.
    GrooveAmount,
    /// The channel listened to and echoed on.
    Channel,
    /// The [`Division`] separating the note from its first echo.
    Delay,
    /// Number of echoes per note.
    Repeats,
    /// Index into the velocity decay table; higher values decay more slowly.
    VelocityFactor,
    /// Semitones added to each echo relative to the previous one (signed).
    Transposition,
    /// Compression (positive) or expansion (negative) of each successive echo delay (signed).
    Doppler,
}

const PARAMETER_COUNT: usize = 10;

static FACTORY_SETTINGS: [u8; PARAMETER_COUNT] = [0, 120, 0, 0, 0, 8, 4, 10, 0, 0];

/// Velocity multipliers, in 256ths, indexed by [`DelayParameter::VelocityFactor`].
const VELOCITY_FACTORS: [u8; 16] = [
    31, 60, 87, 112, 134, 155, 174, 191, 206, 219, 230, 239, 246, 251, 253, 255,
];

/// Scales a velocity by the decay factor at `factor_index`. A note-on never decays into a note-off.
pub fn decayed_velocity(velocity: u8, factor_index: u8) -> u8 {
    if velocity == 0 {
        return 0;
    }
    mul_shift8(velocity, VELOCITY_FACTORS[usize::from(factor_index & 0x0f)]).max(1)
}

/// Repeats every note played on its channel a configurable number of times, each echo quieter than the last.
///
/// Echoes are paced by MIDI clock ticks. The delay between echoes is a musical [`Division`], optionally compressed or
/// expanded from one echo to the next by the doppler setting, and each echo may be transposed relative to the one
/// before it. Note-offs are echoed the same way, so echoes keep the duration of the note they repeat.
#[derive(Clone, Debug)]
pub struct Delay {
    settings: Settings<PARAMETER_COUNT>,
    /// Whether an external transport has started; the internal clock always runs.
    running: bool,
    velocity_factor: u8,
    base_delay: u8,
}

impl Default for Delay {
    fn default() -> Self {
        Self::new()
    }
}

impl Delay {
    /// Constructs a [`Delay`] with factory settings.
    pub fn new() -> Self {
        Self {
            settings: Settings::new(&FACTORY_SETTINGS),
            running: false,
            velocity_factor: FACTORY_SETTINGS[DelayParameter::VelocityFactor as usize],
            base_delay: Division::from_parameter(FACTORY_SETTINGS[DelayParameter::Delay as usize])
                .ticks(),
        }
    }

    fn get(&self, parameter: DelayParameter) -> u8 {
        self.settings.get(parameter as u8)
    }

    fn output_channel(&self) -> Channel {
        channel_from_parameter(self.get(DelayParameter::Channel))
    }

    fn update_clock(&self, ctx: &mut Context<'_>) {
        ctx.clock.update(
            self.get(DelayParameter::Bpm),
            GrooveTemplate::from_parameter(self.get(DelayParameter::GrooveTemplate)),
            self.get(DelayParameter::GrooveAmount),
        );
    }

    /// Returns the delay, in clock ticks, before the echo which leaves `bounces_remaining` further echoes to go.
    ///
    /// The first echo waits the base delay; every echo after it applies the doppler factor once more.
    fn echo_delay(&self, bounces_remaining: u8) -> u8 {
        let doppler = self.get(DelayParameter::Doppler) as i8;
        let iterations = self.get(DelayParameter::Repeats).saturating_sub(bounces_remaining);
        let mut delay = i16::from(self.base_delay);
        if doppler != 0 {
            for _ in 0..iterations {
                delay -= signed_mul_shift8(delay, doppler.wrapping_mul(2));
                delay = delay.clamp(1, 255);
            }
        }
        delay.clamp(1, 255) as u8
    }

    /// Schedules the echo of a note, if any echoes remain.
    fn schedule_echoes(&self, ctx: &mut Context<'_>, note: u8, velocity: u8, bounces_remaining: u8) {
        if bounces_remaining == 0 {
            return;
        }
        let delay = self.echo_delay(bounces_remaining);
        let velocity = decayed_velocity(velocity, self.velocity_factor);
        let note = transpose(note, self.get(DelayParameter::Transposition) as i8);
        // dropped echoes are reported through the status indicator
        let _ = ctx.send_later(note, velocity, delay, bounces_remaining - 1);
    }

    /// Emits the echoes due on this tick, schedules the ones that follow them, then advances the scheduler.
    fn send_echoes(&self, ctx: &mut Context<'_>) {
        let channel = self.output_channel();
        for event in ctx.take_ready() {
            ctx.send(&event.to_message(channel));
            self.schedule_echoes(ctx, event.note, event.velocity, event.tag);
        }
        ctx.scheduler.tick();
    }
}

impl App for Delay {
    fn on_init(&mut self, ctx: &mut Context<'_>) {
        ctx.clock
            .set_source(ClockSource::from_parameter(self.get(DelayParameter::ClockMode)));
        self.update_clock(ctx);
        self.base_delay = Division::from_parameter(self.get(DelayParameter::Delay)).ticks();
        self.velocity_factor = self.get(DelayParameter::VelocityFactor);
        ctx.clock.start();
        self.running = false;
    }

    fn on_raw_midi(&mut self, ctx: &mut Context<'_>, message: &MidiMessage<'_>) {
        match message {
            MidiMessage::NoteOn(channel, ..) | MidiMessage::NoteOff(channel, ..)
                if ctx.clock.is_note_trigger(*channel) => {}
            _ => ctx.send(message),
        }
    }

    fn on_start(&mut self, ctx: &mut Context<'_>) {
        if ctx.clock.source() != ClockSource::Internal {
            self.running = true;
        }
    }

    fn on_continue(&mut self, ctx: &mut Context<'_>) {
        self.on_start(ctx);
    }

    fn on_stop(&mut self, ctx: &mut Context<'_>) {
        if ctx.clock.source() != ClockSource::Internal {
            self.running = false;
        }
    }

    fn on_note_on(&mut self, ctx: &mut Context<'_>, channel: Channel, note: Note, velocity: U7) {
        if channel == self.output_channel() {
            self.schedule_echoes(
                ctx,
                note as u8,
                u8::from(velocity),
                self.get(DelayParameter::Repeats),
            );
        }
    }

    fn on_note_off(&mut self, ctx: &mut Context<'_>, channel: Channel, note: Note, _velocity: U7) {
        if channel == self.output_channel() {
            self.schedule_echoes(ctx, note as u8, 0, self.get(DelayParameter::Repeats));
        }
    }

    fn on_clock(&mut self, ctx: &mut Context<'_>, source: ClockSource) {
        if source != ctx.clock.source() {
            return;
        }
        if source == ClockSource::Internal {
            ctx.send_now(&MidiMessage::TimingClock);
            self.send_echoes(ctx);
        } else if self.running {
            self.send_echoes(ctx);
        }
    }

    fn parameter(&self, key: u8) -> u8 {
        self.settings.get(key)
    }

    fn set_parameter(&mut self, ctx: &mut Context<'_>, key: u8, value: u8) {
        self.settings.set(key, value);
        match DelayParameter::from_u8(key) {
            Some(
                DelayParameter::Bpm | DelayParameter::GrooveTemplate | DelayParameter::GrooveAmount,
            ) => self.update_clock(ctx),
            Some(DelayParameter::ClockMode) => {
                let source = ClockSource::from_parameter(value);
                ctx.clock.set_source(source);
                if source == ClockSource::Internal {
                    ctx.send_now(&MidiMessage::Stop);
                }
            }
            Some(DelayParameter::Delay) => {
                self.base_delay = Division::from_parameter(value).ticks();
            }
            Some(DelayParameter::VelocityFactor) => self.velocity_factor = value,
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
        0
    }

    fn name(&self) -> &'static str {
        "delay"
    }

    fn channel(&self) -> Option<Channel> {
        Some(self.output_channel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::{AppKind, Application, Device, Status},
        scheduler::CAPACITY,
        testing::*,
    };
    use std::vec::Vec;

    fn device() -> Device<Recorder> {
        Device::new(AppKind::Delay.into(), Recorder::default())
    }

    fn delay(device: &Device<Recorder>) -> &Delay {
        match device.app() {
            Application::Delay(delay) => delay,
            _ => unreachable!("Expected the delay to be active"),
        }
    }

    fn note_ons(recorder: &Recorder) -> Vec<Vec<u8>> {
        recorder
            .queued()
            .into_iter()
            .filter(|bytes| bytes[0] & 0xf0 == 0x90)
            .collect()
    }

    /// Sends external clock ticks, returning the note-ons emitted on each tick that produced any.
    fn run_external_clock(device: &mut Device<Recorder>, ticks: u32) -> Vec<(u32, Vec<Vec<u8>>)> {
        let mut echoes = Vec::new();
        for tick in 1..=ticks {
            device.out_mut().clear();
            device.receive(&MidiMessage::TimingClock);
            let emitted = note_ons(device.out());
            if !emitted.is_empty() {
                echoes.push((tick, emitted));
            }
        }
        echoes
    }

    #[test]
    fn echoes_follow_the_external_clock() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::External as u8);
        device.set_parameter(DelayParameter::Repeats as u8, 3);
        device.receive(&MidiMessage::Start);

        device.receive(&note_on_message(Channel::Ch1, 60, 100));
        assert_eq!(
            std::vec![note_on(Channel::Ch1, 60, 100)],
            note_ons(device.out()),
            "Expected the dry note to pass through"
        );

        assert_eq!(
            std::vec![
                (7, std::vec![note_on(Channel::Ch1, 60, 89)]),
                (13, std::vec![note_on(Channel::Ch1, 60, 79)]),
                (19, std::vec![note_on(Channel::Ch1, 60, 70)]),
            ],
            run_external_clock(&mut device, 30),
            "Expected left but got right"
        );
        assert!(device.scheduler().is_empty());
    }

    #[test]
    fn stopped_transport_holds_echoes() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::External as u8);
        device.receive(&note_on_message(Channel::Ch1, 60, 100));

        assert!(run_external_clock(&mut device, 20).is_empty());

        device.receive(&MidiMessage::Start);
        let echoes = run_external_clock(&mut device, 7);
        assert_eq!(1, echoes.len(), "Expected left but got right");
        assert_eq!(7, echoes[0].0, "Expected left but got right");
    }

    #[test]
    fn continue_resumes_held_echoes() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::External as u8);
        device.receive(&MidiMessage::Start);
        device.receive(&note_on_message(Channel::Ch1, 60, 100));
        assert!(run_external_clock(&mut device, 3).is_empty());

        device.receive(&MidiMessage::Stop);
        assert!(run_external_clock(&mut device, 10).is_empty(), "Expected echoes to be held");

        device.receive(&MidiMessage::Continue);
        assert_eq!(
            std::vec![(4, std::vec![note_on(Channel::Ch1, 60, 89)])],
            run_external_clock(&mut device, 4),
            "Expected the echo to pick up where it left off"
        );
    }

    #[test]
    fn echo_overflow_raises_status() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::External as u8);
        device.set_parameter(DelayParameter::Repeats as u8, 1);
        device.receive(&MidiMessage::Start);
        for note in 0..=CAPACITY as u8 {
            device.receive(&note_on_message(Channel::Ch1, 30 + note, 100));
        }
        assert_eq!(Some(Status::Overflow), device.take_status(), "Expected left but got right");

        let echoes = run_external_clock(&mut device, 7);
        assert_eq!(1, echoes.len(), "Expected left but got right");
        let notes: Vec<u8> = echoes[0].1.iter().map(|bytes| bytes[1]).collect();
        assert_eq!(
            (30..30 + CAPACITY as u8).collect::<Vec<u8>>(),
            notes,
            "Expected only the newest echo to be dropped"
        );
    }

    #[test]
    fn internal_clock_sends_ticks_and_echoes() {
        let mut device = device();
        device.receive(&note_on_message(Channel::Ch1, 64, 100));
        device.out_mut().clear();

        // seven ticks at 120 BPM land just before the 1200th timer interrupt
        for _ in 0..1_200 {
            device.on_timer();
        }
        assert_eq!(
            std::vec![std::vec![TIMING_CLOCK]; 7],
            device.out().now(),
            "Expected left but got right"
        );
        assert_eq!(
            std::vec![note_on(Channel::Ch1, 64, 89)],
            device.out().queued(),
            "Expected left but got right"
        );
    }

    #[test]
    fn internal_ticks_are_ignored_with_an_external_clock() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::External as u8);
        device.receive(&MidiMessage::Start);
        device.receive(&note_on_message(Channel::Ch1, 60, 100));
        device.out_mut().clear();

        for _ in 0..2_000 {
            device.on_timer();
        }
        assert!(device.out().sent.is_empty(), "Expected no output");
    }

    #[test]
    fn note_clock_drives_echoes() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::Note as u8);
        device.receive(&MidiMessage::Start);
        device.receive(&note_on_message(Channel::Ch1, 60, 100));
        device.out_mut().clear();

        for _ in 0..7 {
            device.receive(&note_on_message(Channel::Ch16, 36, 100));
            device.receive(&note_off_message(Channel::Ch16, 36));
        }
        assert_eq!(
            std::vec![note_on(Channel::Ch1, 60, 89)],
            device.out().queued(),
            "Expected clock notes to be swallowed and one echo to be sent"
        );
    }

    #[test]
    fn other_channels_pass_through_without_echoes() {
        let mut device = device();
        device.receive(&note_on_message(Channel::Ch2, 60, 100));
        assert!(device.scheduler().is_empty());
        assert_eq!(std::vec![note_on(Channel::Ch2, 60, 100)], device.out().queued());
    }

    #[test]
    fn switching_to_internal_clock_sends_stop() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::External as u8);
        assert!(device.out().now().is_empty());
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::Internal as u8);
        assert_eq!(std::vec![std::vec![STOP]], device.out().now(), "Expected left but got right");
    }

    #[test]
    fn without_doppler_echoes_are_evenly_spaced() {
        let mut device = device();
        device.set_parameter(DelayParameter::Repeats as u8, 5);
        let delay = delay(&device);
        for bounces_remaining in 1..=5 {
            assert_eq!(6, delay.echo_delay(bounces_remaining), "Expected left but got right");
        }
    }

    #[test]
    fn positive_doppler_compresses() {
        let mut device = device();
        device.set_parameter(DelayParameter::Delay as u8, Division::Quarter as u8);
        device.set_parameter(DelayParameter::Doppler as u8, 32);
        let delay = delay(&device);
        let delays: Vec<u8> = (1..=4).rev().map(|b| delay.echo_delay(b)).collect();
        assert_eq!(std::vec![24, 18, 14, 11], delays, "Expected left but got right");
    }

    #[test]
    fn negative_doppler_expands() {
        let mut device = device();
        device.set_parameter(DelayParameter::Delay as u8, Division::Quarter as u8);
        device.set_parameter(DelayParameter::Doppler as u8, (-32_i8) as u8);
        let delay = delay(&device);
        assert_eq!(30, delay.echo_delay(3), "Expected left but got right");
        assert_eq!(38, delay.echo_delay(2), "Expected left but got right");
    }

    #[test]
    fn doppler_delays_stay_in_range() {
        let mut device = device();
        device.set_parameter(DelayParameter::Repeats as u8, 32);
        device.set_parameter(DelayParameter::Delay as u8, Division::DoubleWhole as u8);
        device.set_parameter(DelayParameter::Doppler as u8, (-63_i8) as u8);
        assert_eq!(255, delay(&device).echo_delay(1), "Expected delay to clamp at 255");

        device.set_parameter(DelayParameter::Delay as u8, Division::Quarter as u8);
        device.set_parameter(DelayParameter::Doppler as u8, 63);
        let delays: Vec<u8> = (1..=32).rev().map(|b| delay(&device).echo_delay(b)).collect();
        assert!(delays.windows(2).all(|w| w[0] >= w[1]), "Expected non-increasing delays");
        assert!(delays.iter().all(|&d| d >= 1), "Expected delays to clamp at 1");
    }

    #[test]
    fn velocity_decay() {
        assert_eq!(74, decayed_velocity(100, 7), "Expected left but got right");
        assert_eq!(1, decayed_velocity(1, 0), "Expected note-ons to stay note-ons");
        assert_eq!(0, decayed_velocity(0, 15), "Expected note-offs to stay note-offs");
        for velocity in 1..=127 {
            for index in 0..15 {
                let decayed = decayed_velocity(velocity, index);
                assert!(decayed >= 1);
                assert!(decayed <= decayed_velocity(velocity, index + 1));
                assert!(decayed <= velocity);
            }
        }
    }

    #[test]
    fn echoes_are_transposed_cumulatively() {
        let mut device = device();
        device.set_parameter(DelayParameter::ClockMode as u8, ClockSource::External as u8);
        device.set_parameter(DelayParameter::Repeats as u8, 2);
        device.set_parameter(DelayParameter::Transposition as u8, 7);
        device.receive(&MidiMessage::Start);
        device.receive(&note_on_message(Channel::Ch1, 60, 100));

        let notes: Vec<u8> = run_external_clock(&mut device, 20)
            .into_iter()
            .flat_map(|(_, emitted)| emitted)
            .map(|bytes| bytes[1])
            .collect();
        assert_eq!(std::vec![67, 74], notes, "Expected left but got right");
    }
}
