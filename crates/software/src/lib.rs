//! This crate contains the architecture-agnostic logic of Pulsebox, a MIDI processor which runs one of several swappable
//! applications (an echo effect, a drone sequencer, a clock generator) against incoming [MIDI](https://midi.org/midi-1-0)
//! traffic while keeping them in time with a shared musical clock.
//!
//! The timing core is made of the [`EventScheduler`](scheduler::EventScheduler), which defers notes by a number of clock
//! ticks without allocating, and the [`Clock`](clock::Clock), which generates ticks at a tempo (or relays them from an
//! external clock or from notes) and estimates tempo from taps. The [`Device`](app::Device) ties them to the active
//! [`Application`](app::Application).

#![deny(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

mod fmt;

pub mod app;
pub mod apps;
pub mod clock;
pub mod configuration;
pub mod ops;
pub mod scheduler;
pub mod usb_midi;

#[cfg(test)]
mod testing;
