//! Conversion between [`MidiMessage`]s and USB-MIDI Event Packets, the 32-bit frames MIDI travels in over USB.
//!
//! Each packet starts with a header byte whose low nibble (the Code Index Number) tells how many of the three following
//! bytes belong to the message. System exclusive messages span several packets and are not supported.

use wmidi::MidiMessage;

/// Length of a USB-MIDI Event Packet.
pub const PACKET_SIZE: usize = 4;

/// Returns the number of MIDI bytes carried by a packet with the given Code Index Number, or `None` for reserved and
/// system exclusive packets.
fn message_len(code_index_number: u8) -> Option<usize> {
    match code_index_number {
        0x2 | 0xc | 0xd => Some(2),
        0x3 | 0x8..=0xb | 0xe => Some(3),
        0x5 | 0xf => Some(1),
        _ => None,
    }
}

/// Returns an [`Iterator`] over the messages in `data`, which may contain one or more packets. Malformed packets are
/// skipped.
pub fn messages(data: &[u8]) -> impl Iterator<Item = MidiMessage<'_>> {
    data.chunks(PACKET_SIZE).filter_map(|packet| {
        if packet.len() != PACKET_SIZE {
            warn!("USB-MIDI Event Packets must always be 32 bits long");
            return None;
        }
        // the cable number in the high nibble of the header is not of interest
        let Some(len) = message_len(packet[0] & 0x0f) else {
            trace!("Ignoring USB-MIDI Event Packet with header {}", packet[0]);
            return None;
        };
        MidiMessage::from_bytes(&packet[1..1 + len]).ok()
    })
}

/// Frames a message as a packet on cable 0. Returns `None` for messages which do not fit in a single packet.
pub fn packet(message: &MidiMessage<'_>) -> Option<[u8; PACKET_SIZE]> {
    let len = message.bytes_size();
    if matches!(message, MidiMessage::SysEx(_)) || len > PACKET_SIZE - 1 {
        return None;
    }
    let mut packet = [0; PACKET_SIZE];
    message.copy_to_slice(&mut packet[1..1 + len]).ok()?;
    let status = packet[1];
    packet[0] = match (status & 0xf0, len) {
        (0xf0, 1) if status >= 0xf8 => 0xf,
        (0xf0, 1) => 0x5,
        (0xf0, 2) => 0x2,
        (0xf0, _) => 0x3,
        (channel_message, _) => channel_message >> 4,
    };
    Some(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;
    use wmidi::{Channel, Note, U7};

    #[test]
    fn parses_packets() {
        let data = [
            0x09, 0x90, 60, 100, // note on
            0x0f, 0xf8, 0, 0, // timing clock
            0x0c, 0xc1, 3, 0, // program change
            0x04, 0xf0, 0x7e, 0x7f, // start of a system exclusive message
            0x08, 0x80, // truncated
        ];
        let messages: Vec<MidiMessage<'_>> = messages(&data).collect();
        assert_eq!(
            std::vec![
                MidiMessage::NoteOn(Channel::Ch1, Note::C4, U7::from_u8_lossy(100)),
                MidiMessage::TimingClock,
                MidiMessage::ProgramChange(Channel::Ch2, U7::from_u8_lossy(3)),
            ],
            messages,
            "Expected left but got right"
        );
    }

    #[test]
    fn frames_messages() {
        assert_eq!(
            Some([0x09, 0x92, 60, 90]),
            packet(&MidiMessage::NoteOn(
                Channel::Ch3,
                Note::C4,
                U7::from_u8_lossy(90)
            )),
            "Expected left but got right"
        );
        assert_eq!(Some([0x0f, 0xfc, 0, 0]), packet(&MidiMessage::Stop));
        assert_eq!(
            Some([0x0b, 0xb0, 123, 0]),
            packet(&MidiMessage::ControlChange(
                Channel::Ch1,
                wmidi::ControlFunction::ALL_NOTES_OFF,
                U7::from_u8_lossy(0)
            ))
        );
        assert_eq!(None, packet(&MidiMessage::SysEx(&[])));
    }
}
