//! Variable-length quantities: 7 bits per byte, high bit set on all but the last.

use crate::error::{MidiError, Result};

/// Largest value a 4-byte quantity can hold.
pub const VARLEN_MAX: u32 = 0x0FFF_FFFF;

/// Number of bytes `value` takes when encoded (1 to 4).
pub fn varlen_size(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x001F_FFFF => 3,
        _ => 4,
    }
}

/// Append `value` to `out`.
pub fn write_varlen(value: u32, out: &mut Vec<u8>) -> Result<()> {
    if value > VARLEN_MAX {
        return Err(MidiError::VarlenOverflow(value));
    }
    let size = varlen_size(value);
    for i in (0..size).rev() {
        let mut byte = ((value >> (7 * i)) & 0x7F) as u8;
        if i > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    Ok(())
}

/// Decode a quantity starting at `offset`. Returns the value and bytes consumed.
pub fn read_varlen(bytes: &[u8], offset: usize) -> Result<(u32, usize)> {
    let mut value = 0u32;
    for i in 0..4 {
        let byte = *bytes
            .get(offset + i)
            .ok_or(MidiError::UnexpectedEof { offset: offset + i })?;
        value = (value << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(MidiError::VarlenTooLong { offset })
}
