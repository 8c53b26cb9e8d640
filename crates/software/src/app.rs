//! The host side of the device: the [`App`] capability table every application implements, the [`Context`] through which
//! applications reach shared state, and the [`Device`] which owns that state and routes stimuli to the active [`Application`].

use crate::{
    apps::{ClockSourceLive, Delay, Tanpura},
    clock::{Clock, ClockSource},
    configuration::CycleConfig,
    scheduler::{EventScheduler, Overflow, ScheduledEvent, CAPACITY},
};
use enum_dispatch::enum_dispatch;
use num_derive::{FromPrimitive, ToPrimitive};
use tinyvec::ArrayVec;
use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7};

/// The transport MIDI leaves the device through.
pub trait MidiOut {
    /// Queues a message behind any traffic already waiting to be sent.
    fn send(&mut self, message: &MidiMessage<'_>);

    /// Sends a message ahead of queued traffic. Used for realtime messages such as clock ticks.
    fn send_now(&mut self, message: &MidiMessage<'_>);
}

/// The slice of user interface state applications may react to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UiState {
    /// `true` while the performer is editing the value on the current page.
    pub editing: bool,
    /// The parameter key shown on the current page.
    pub page: u8,
}

/// Conditions worth surfacing to the performer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// The event scheduler was full and at least one note was dropped.
    Overflow,
}

/// A view over the [`Device`] handed to application callbacks.
pub struct Context<'a> {
    /// The shared clock.
    pub clock: &'a mut Clock,
    /// The shared event scheduler.
    pub scheduler: &'a mut EventScheduler,
    /// A snapshot of the user interface state.
    pub ui: UiState,
    out: &'a mut dyn MidiOut,
    status: &'a mut Option<Status>,
}

impl Context<'_> {
    /// Queues a message for output.
    pub fn send(&mut self, message: &MidiMessage<'_>) {
        self.out.send(message);
    }

    /// Sends a message ahead of queued output.
    pub fn send_now(&mut self, message: &MidiMessage<'_>) {
        self.out.send_now(message);
    }

    /// Schedules a note to be emitted `when` scheduler ticks from now, raising [`Status::Overflow`] if it had to be dropped.
    pub fn send_later(&mut self, note: u8, velocity: u8, when: u8, tag: u8) -> Result<(), Overflow> {
        self.scheduler
            .schedule(note, velocity, when, tag)
            .inspect_err(|_| self.set_status(Status::Overflow))
    }

    /// Sends every pending note-off immediately on `channel` and cancels it in the scheduler.
    pub fn flush_queue(&mut self, channel: Channel) {
        for event in self.scheduler.cancel(|event| !event.is_note_on()) {
            self.out.send(&event.to_message(channel));
        }
    }

    /// Sends the notes due on the current tick on `channel`, then advances the scheduler by one tick.
    pub fn send_scheduled_notes(&mut self, channel: Channel) {
        for event in self.scheduler.ready() {
            self.out.send(&event.to_message(channel));
        }
        self.scheduler.tick();
    }

    /// Collects the notes due on the current tick without advancing the scheduler.
    pub fn take_ready(&self) -> ArrayVec<[ScheduledEvent; CAPACITY]> {
        self.scheduler.ready().collect()
    }

    /// Surfaces a condition to the performer.
    pub fn set_status(&mut self, status: Status) {
        *self.status = Some(status);
    }
}

/// The applications the device can run. Only one is active at a time.
#[enum_dispatch]
#[derive(Clone, Debug)]
pub enum Application {
    /// See [`Delay`].
    Delay(Delay),
    /// See [`Tanpura`].
    Tanpura(Tanpura),
    /// See [`ClockSourceLive`].
    ClockSourceLive(ClockSourceLive),
}

impl Default for Application {
    fn default() -> Self {
        AppKind::default().into()
    }
}

impl Application {
    /// Identifies the variant.
    pub fn kind(&self) -> AppKind {
        match self {
            Self::Delay(_) => AppKind::Delay,
            Self::Tanpura(_) => AppKind::Tanpura,
            Self::ClockSourceLive(_) => AppKind::ClockSourceLive,
        }
    }
}

/// The capability table shared by every application.
///
/// Callbacks run to completion and must not block. Every callback receiving MIDI is invoked after the message has been
/// offered to [`on_raw_midi`](App::on_raw_midi), which decides what is passed through.
#[enum_dispatch(Application)]
pub trait App {
    /// Called when the application becomes active, and again whenever its settings are reloaded.
    fn on_init(&mut self, ctx: &mut Context<'_>);

    /// Offered every incoming message before any typed callback. Forwards it unchanged by default.
    fn on_raw_midi(&mut self, ctx: &mut Context<'_>, message: &MidiMessage<'_>) {
        ctx.send(message);
    }

    /// Called on MIDI Start.
    fn on_start(&mut self, _ctx: &mut Context<'_>) {}

    /// Called on MIDI Stop.
    fn on_stop(&mut self, _ctx: &mut Context<'_>) {}

    /// Called on MIDI Continue.
    fn on_continue(&mut self, _ctx: &mut Context<'_>) {}

    /// Called on a note-on with non-zero velocity which is not a note clock tick.
    fn on_note_on(&mut self, _ctx: &mut Context<'_>, _channel: Channel, _note: Note, _velocity: U7) {}

    /// Called on a note-off (including a note-on with zero velocity) which is not part of the note clock.
    fn on_note_off(&mut self, _ctx: &mut Context<'_>, _channel: Channel, _note: Note, _velocity: U7) {}

    /// Called on a control change.
    fn on_control_change(
        &mut self,
        _ctx: &mut Context<'_>,
        _channel: Channel,
        _function: ControlFunction,
        _value: U7,
    ) {
    }

    /// Called on every clock tick regardless of where it came from; `source` tells which.
    fn on_clock(&mut self, _ctx: &mut Context<'_>, _source: ClockSource) {}

    /// Called when the performer clicks. Returns `true` if the click was consumed.
    fn on_click(&mut self, _ctx: &mut Context<'_>) -> bool {
        false
    }

    /// Called when the performer turns the encoder. Returns `true` if the increment was consumed.
    fn on_increment(&mut self, _ctx: &mut Context<'_>, _increment: i8) -> bool {
        false
    }

    /// Returns the value stored under `key`.
    fn parameter(&self, key: u8) -> u8;

    /// Stores `value` under `key` and recomputes whatever depends on it.
    fn set_parameter(&mut self, ctx: &mut Context<'_>, key: u8, value: u8);

    /// The persisted settings.
    fn settings(&self) -> &[u8];

    /// The persisted settings, for bulk loading.
    fn settings_mut(&mut self) -> &mut [u8];

    /// The factory defaults, the same size as [`settings`](App::settings).
    fn factory_settings(&self) -> &'static [u8];

    /// Where the settings live in persistent storage.
    fn settings_offset(&self) -> u16;

    /// A short display name.
    fn name(&self) -> &'static str;

    /// The channel the application plays on, if any; used to silence it when it is switched out.
    fn channel(&self) -> Option<Channel> {
        None
    }
}

/// Selects an [`Application`]; cycles in the order applications are offered to the performer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppKind {
    /// See [`Delay`].
    #[default]
    Delay,
    /// See [`Tanpura`].
    Tanpura,
    /// See [`ClockSourceLive`].
    ClockSourceLive,
}

impl CycleConfig for AppKind {}

impl From<AppKind> for Application {
    fn from(kind: AppKind) -> Self {
        match kind {
            AppKind::Delay => Delay::new().into(),
            AppKind::Tanpura => Tanpura::new().into(),
            AppKind::ClockSourceLive => ClockSourceLive::new().into(),
        }
    }
}

/// Owns the active [`Application`] along with the state it shares with the rest of the device, and routes every stimulus
/// (timer interrupts, incoming MIDI, user input) to it.
pub struct Device<O: MidiOut> {
    app: Application,
    clock: Clock,
    scheduler: EventScheduler,
    ui: UiState,
    status: Option<Status>,
    out: O,
}

impl<O: MidiOut> Device<O> {
    /// Constructs a [`Device`] running `app`, sending its output through `out`.
    pub fn new(app: Application, out: O) -> Self {
        let mut device = Self {
            app,
            clock: Clock::new(),
            scheduler: EventScheduler::new(),
            ui: UiState::default(),
            status: None,
            out,
        };
        info!("Starting {}", device.app.name());
        device.dispatch(|app, ctx| app.on_init(ctx));
        device
    }

    fn dispatch<R>(&mut self, f: impl FnOnce(&mut Application, &mut Context<'_>) -> R) -> R {
        let Self {
            app,
            clock,
            scheduler,
            ui,
            status,
            out,
        } = self;
        let mut ctx = Context {
            clock,
            scheduler,
            ui: *ui,
            out,
            status,
        };
        f(app, &mut ctx)
    }

    /// Replaces the active application. Notes the outgoing application still owes are released, and the clock, scheduler
    /// and user interface state start afresh for the incoming one.
    pub fn switch(&mut self, app: Application) {
        info!("Switching from {} to {}", self.app.name(), app.name());
        if let Some(channel) = self.app.channel() {
            self.dispatch(|_, ctx| ctx.flush_queue(channel));
        }
        self.clock = Clock::new();
        self.scheduler.clear();
        self.ui = UiState::default();
        self.status = None;
        self.app = app;
        self.dispatch(|app, ctx| app.on_init(ctx));
    }

    /// Handles one hardware timer interrupt.
    pub fn on_timer(&mut self) {
        if self.clock.tick() {
            self.dispatch(|app, ctx| app.on_clock(ctx, ClockSource::Internal));
        }
    }

    /// Handles one incoming message.
    pub fn receive(&mut self, message: &MidiMessage<'_>) {
        self.dispatch(|app, ctx| app.on_raw_midi(ctx, message));
        match *message {
            MidiMessage::TimingClock => {
                self.dispatch(|app, ctx| app.on_clock(ctx, ClockSource::External))
            }
            MidiMessage::Start => {
                info!("Received Start");
                self.dispatch(|app, ctx| app.on_start(ctx))
            }
            MidiMessage::Continue => {
                info!("Received Continue");
                self.dispatch(|app, ctx| app.on_continue(ctx))
            }
            MidiMessage::Stop => {
                info!("Received Stop");
                self.dispatch(|app, ctx| app.on_stop(ctx))
            }
            MidiMessage::NoteOn(channel, note, velocity) if u8::from(velocity) > 0 => {
                if self.clock.is_note_trigger(channel) {
                    self.dispatch(|app, ctx| app.on_clock(ctx, ClockSource::Note))
                } else {
                    self.dispatch(|app, ctx| app.on_note_on(ctx, channel, note, velocity))
                }
            }
            MidiMessage::NoteOn(channel, note, velocity)
            | MidiMessage::NoteOff(channel, note, velocity) => {
                if !self.clock.is_note_trigger(channel) {
                    self.dispatch(|app, ctx| app.on_note_off(ctx, channel, note, velocity))
                }
            }
            MidiMessage::ControlChange(channel, function, value) => {
                self.dispatch(|app, ctx| app.on_control_change(ctx, channel, function, value))
            }
            _ => {}
        }
    }

    /// Handles a click. Returns `true` if the application consumed it.
    pub fn click(&mut self) -> bool {
        self.dispatch(|app, ctx| app.on_click(ctx))
    }

    /// Handles an encoder increment. Returns `true` if the application consumed it.
    pub fn increment(&mut self, increment: i8) -> bool {
        self.dispatch(|app, ctx| app.on_increment(ctx, increment))
    }

    /// Sets a parameter of the active application.
    pub fn set_parameter(&mut self, key: u8, value: u8) {
        debug!("Parameter {} set to {}", key, value);
        self.dispatch(|app, ctx| app.set_parameter(ctx, key, value));
    }

    /// Reads a parameter of the active application.
    pub fn parameter(&self, key: u8) -> u8 {
        self.app.parameter(key)
    }

    /// Overwrites the active application's settings with previously persisted bytes and reinitializes it. Bytes beyond
    /// the size of the settings are ignored.
    pub fn load_settings(&mut self, bytes: &[u8]) {
        self.app
            .settings_mut()
            .iter_mut()
            .zip(bytes)
            .for_each(|(setting, &byte)| *setting = byte);
        self.dispatch(|app, ctx| app.on_init(ctx));
    }

    /// Restores the active application's factory defaults and reinitializes it.
    pub fn factory_reset(&mut self) {
        let factory = self.app.factory_settings();
        self.load_settings(factory);
    }

    /// The active application's settings, as they would be persisted at [`settings_offset`](Self::settings_offset).
    pub fn settings(&self) -> &[u8] {
        self.app.settings()
    }

    /// Where the active application's settings live in persistent storage.
    pub fn settings_offset(&self) -> u16 {
        self.app.settings_offset()
    }

    /// Returns the pending status, if any, and clears it.
    pub fn take_status(&mut self) -> Option<Status> {
        self.scheduler.take_overflow();
        self.status.take()
    }

    /// The user interface state applications see.
    pub fn ui_mut(&mut self) -> &mut UiState {
        &mut self.ui
    }

    /// The active application.
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// The shared clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The shared event scheduler.
    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// The output transport.
    pub fn out(&self) -> &O {
        &self.out
    }

    /// The output transport, mutably.
    pub fn out_mut(&mut self) -> &mut O {
        &mut self.out
    }
}
