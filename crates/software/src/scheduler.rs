//! Provides [`EventScheduler`], a fixed-capacity queue of notes whose emission is deferred by a number of clock ticks.
//!
//! Entries live in an arena of slots linked into a single list ordered by deadline. Each slot stores its countdown
//! relative to the slot before it, so advancing time only ever touches the head of the pending region, and every entry
//! due on a given tick sits in a contiguous run at the front of the list, in the order it was scheduled.

use core::fmt;
use tinyvec::ArrayVec;
use wmidi::{Channel, MidiMessage, Note, U7};

/// Number of slots in the scheduler's pool.
pub const CAPACITY: usize = 32;

/// Marks a slot which has been canceled but still occupies its position in the list. Valid MIDI notes are 7-bit, so
/// this can never collide with a real note.
const ZOMBIE_NOTE: u8 = 0xff;

/// Returned when the pool is exhausted and a request to schedule an event had to be dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Overflow;

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("event scheduler is full")
    }
}

/// A note awaiting (or ready for) emission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScheduledEvent {
    /// MIDI note number.
    pub note: u8,
    /// Zero for a note-off, anything else for a note-on.
    pub velocity: u8,
    /// Free for the caller's use; the delay effect stores the number of echoes still owed here.
    pub tag: u8,
}

impl ScheduledEvent {
    /// Returns `true` for a note-on, `false` for a note-off.
    pub fn is_note_on(&self) -> bool {
        self.velocity != 0
    }

    /// Renders the event as a message on the given channel.
    pub fn to_message(&self, channel: Channel) -> MidiMessage<'static> {
        let note = Note::from(U7::from_u8_lossy(self.note));
        if self.is_note_on() {
            MidiMessage::NoteOn(channel, note, U7::from_u8_lossy(self.velocity))
        } else {
            MidiMessage::NoteOff(channel, note, U7::from_u8_lossy(0))
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    note: u8,
    velocity: u8,
    tag: u8,
    /// Ticks remaining after the previous slot in the list fires.
    when: u8,
    next: Option<u8>,
}

impl Slot {
    fn is_zombie(&self) -> bool {
        self.note == ZOMBIE_NOTE
    }

    fn event(&self) -> ScheduledEvent {
        ScheduledEvent {
            note: self.note,
            velocity: self.velocity,
            tag: self.tag,
        }
    }
}

/// A bounded queue of deferred note events.
#[derive(Clone, Debug)]
pub struct EventScheduler {
    slots: [Slot; CAPACITY],
    /// First slot in deadline order.
    head: Option<u8>,
    /// First unused slot; unused slots are chained through `next`.
    free: Option<u8>,
    overflow: bool,
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventScheduler {
    /// Constructs an empty [`EventScheduler`].
    pub fn new() -> Self {
        let mut scheduler = Self {
            slots: [Slot::default(); CAPACITY],
            head: None,
            free: None,
            overflow: false,
        };
        scheduler.clear();
        scheduler
    }

    /// Drops every pending event and the overflow indicator.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            *slot = Slot {
                next: (index + 1 < CAPACITY).then_some(index as u8 + 1),
                ..Slot::default()
            };
        }
        self.head = None;
        self.free = Some(0);
        self.overflow = false;
    }

    /// Schedules a note to be emitted `when` ticks from now.
    ///
    /// Events sharing a deadline fire in the order they were scheduled. When the pool is exhausted the request is
    /// dropped, the overflow indicator is raised and [`Overflow`] is returned; existing entries are left untouched.
    pub fn schedule(&mut self, note: u8, velocity: u8, when: u8, tag: u8) -> Result<(), Overflow> {
        let Some(index) = self.free else {
            self.overflow = true;
            warn!("Event scheduler overflow; dropping note {}", note);
            return Err(Overflow);
        };
        self.free = self.slots[usize::from(index)].next;

        let mut remaining = when;
        let mut previous = None;
        let mut current = self.head;
        while let Some(i) = current {
            let slot = &self.slots[usize::from(i)];
            if remaining < slot.when {
                break;
            }
            remaining -= slot.when;
            previous = current;
            current = slot.next;
        }
        if let Some(i) = current {
            self.slots[usize::from(i)].when -= remaining;
        }

        self.slots[usize::from(index)] = Slot {
            note: note & 0x7f,
            velocity: velocity & 0x7f,
            tag,
            when: remaining,
            next: current,
        };
        match previous {
            Some(p) => self.slots[usize::from(p)].next = Some(index),
            None => self.head = Some(index),
        }
        Ok(())
    }

    /// Advances time by one tick: retires the events that were due and counts down the next pending one.
    pub fn tick(&mut self) {
        while let Some(index) = self.head {
            let slot = &mut self.slots[usize::from(index)];
            if slot.when > 0 {
                slot.when -= 1;
                break;
            }
            self.head = slot.next;
            slot.next = self.free;
            self.free = Some(index);
        }
    }

    /// Returns an [`Iterator`] over the events due on the current tick, in the order they were scheduled. Canceled
    /// events are skipped.
    pub fn ready(&self) -> impl Iterator<Item = ScheduledEvent> + '_ {
        let mut current = self.head;
        core::iter::from_fn(move || {
            loop {
                let slot = &self.slots[usize::from(current?)];
                if slot.when > 0 {
                    return None;
                }
                current = slot.next;
                if !slot.is_zombie() {
                    return Some(slot.event());
                }
            }
        })
    }

    /// Returns an [`Iterator`] over every live event paired with the number of ticks until it is due, in firing order.
    pub fn pending(&self) -> impl Iterator<Item = (u16, ScheduledEvent)> + '_ {
        let mut current = self.head;
        let mut deadline = 0_u16;
        core::iter::from_fn(move || {
            loop {
                let slot = &self.slots[usize::from(current?)];
                deadline += u16::from(slot.when);
                current = slot.next;
                if !slot.is_zombie() {
                    return Some((deadline, slot.event()));
                }
            }
        })
    }

    /// Cancels every live event matching `predicate`, returning the canceled events in firing order.
    ///
    /// Canceled slots keep their place in the list (preserving the deadlines of the events behind them) and are
    /// reclaimed once their own deadline passes.
    pub fn cancel(
        &mut self,
        mut predicate: impl FnMut(&ScheduledEvent) -> bool,
    ) -> ArrayVec<[ScheduledEvent; CAPACITY]> {
        let mut canceled = ArrayVec::new();
        let mut current = self.head;
        while let Some(index) = current {
            let slot = &mut self.slots[usize::from(index)];
            if !slot.is_zombie() && predicate(&slot.event()) {
                canceled.push(slot.event());
                slot.note = ZOMBIE_NOTE;
            }
            current = slot.next;
        }
        canceled
    }

    /// Number of slots currently linked into the list, canceled ones included.
    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut current = self.head;
        while let Some(index) = current {
            len += 1;
            current = self.slots[usize::from(index)].next;
        }
        len
    }

    /// Returns `true` if no slot is in use.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Returns `true` if a request has been dropped since the indicator was last taken.
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// Returns the overflow indicator and lowers it.
    pub fn take_overflow(&mut self) -> bool {
        core::mem::take(&mut self.overflow)
    }
}
