//! Host-side helpers shared by the unit tests.

use crate::app::MidiOut;
use embassy_time::MockDriver;
use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    vec,
    vec::Vec,
};
use wmidi::{Channel, MidiMessage, Note, U7};

/// A message captured by [`Recorder`], as raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Queued(Vec<u8>),
    Now(Vec<u8>),
}

/// A [`MidiOut`] which remembers everything sent through it.
#[derive(Debug, Default)]
pub struct Recorder {
    pub sent: Vec<Sent>,
}

fn to_bytes(message: &MidiMessage<'_>) -> Vec<u8> {
    let mut bytes = vec![0; message.bytes_size()];
    let _ = message.copy_to_slice(&mut bytes);
    bytes
}

impl MidiOut for Recorder {
    fn send(&mut self, message: &MidiMessage<'_>) {
        self.sent.push(Sent::Queued(to_bytes(message)));
    }

    fn send_now(&mut self, message: &MidiMessage<'_>) {
        self.sent.push(Sent::Now(to_bytes(message)));
    }
}

impl Recorder {
    /// Messages sent through [`MidiOut::send`], in order.
    pub fn queued(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter_map(|sent| match sent {
                Sent::Queued(bytes) => Some(bytes.clone()),
                Sent::Now(_) => None,
            })
            .collect()
    }

    /// Messages sent through [`MidiOut::send_now`], in order.
    pub fn now(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter_map(|sent| match sent {
                Sent::Now(bytes) => Some(bytes.clone()),
                Sent::Queued(_) => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

pub const TIMING_CLOCK: u8 = 0xf8;
pub const START: u8 = 0xfa;
pub const CONTINUE: u8 = 0xfb;
pub const STOP: u8 = 0xfc;

pub fn note_on(channel: Channel, note: u8, velocity: u8) -> Vec<u8> {
    vec![0x90 | channel.index(), note, velocity]
}

pub fn note_off(channel: Channel, note: u8) -> Vec<u8> {
    vec![0x80 | channel.index(), note, 0]
}

pub fn note_on_message(channel: Channel, note: u8, velocity: u8) -> MidiMessage<'static> {
    MidiMessage::NoteOn(
        channel,
        Note::from(U7::from_u8_lossy(note)),
        U7::from_u8_lossy(velocity),
    )
}

pub fn note_off_message(channel: Channel, note: u8) -> MidiMessage<'static> {
    MidiMessage::NoteOff(
        channel,
        Note::from(U7::from_u8_lossy(note)),
        U7::from_u8_lossy(0),
    )
}

static MOCK_TIME: Mutex<()> = Mutex::new(());

/// Takes exclusive use of the global mock time driver and rewinds it to zero. Hold the guard for the whole test.
pub fn mock_time() -> MutexGuard<'static, ()> {
    let guard = MOCK_TIME.lock().unwrap_or_else(PoisonError::into_inner);
    MockDriver::get().reset();
    guard
}
