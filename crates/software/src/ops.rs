//! Small fixed-point helpers shared by the applications.

/// Multiplies two unsigned bytes and keeps the high byte of the product, i.e. `floor(a * b / 256)`.
pub fn mul_shift8(a: u8, b: u8) -> u8 {
    ((u16::from(a) * u16::from(b)) >> 8) as u8
}

/// Multiplies a signed word by a signed byte and keeps the product shifted right by eight bits (rounding towards negative
/// infinity).
pub fn signed_mul_shift8(a: i16, b: i8) -> i16 {
    ((i32::from(a) * i32::from(b)) >> 8) as i16
}

/// Transposes a MIDI note by a number of semitones, folding the result back by octaves so it stays within `0..=127`.
pub fn transpose(note: u8, semitones: i8) -> u8 {
    let mut transposed = i16::from(note) + i16::from(semitones);
    while transposed < 0 {
        transposed += 12;
    }
    while transposed > 127 {
        transposed -= 12;
    }
    transposed as u8
}

/// Folds a MIDI note by octaves until it lands inside `low..=high`.
///
/// The range must span at least an octave.
pub fn fold_into(note: u8, low: u8, high: u8) -> u8 {
    let mut folded = note;
    while folded < low {
        folded += 12;
    }
    while folded > high {
        folded -= 12;
    }
    folded
}
