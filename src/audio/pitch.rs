const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Nearest equal-tempered MIDI note, A4 = 440 Hz = 69.
pub fn midi_note(frequency: f32) -> Option<i32> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    Some(69 + (12.0 * (frequency / 440.0).log2()).round() as i32)
}

/// Scientific pitch name such as `A4` or `C#3`.
pub fn note_name(frequency: f32) -> Option<String> {
    let midi = midi_note(frequency)?;
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    Some(format!("{}{}", name, octave))
}
