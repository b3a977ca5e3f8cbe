//! Error types for MIDI decoding and file access.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while decoding or reading MIDI data.
#[derive(Debug, Error)]
pub enum MidiError {
    /// The input ended inside a message.
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEof {
        /// Byte offset where more data was expected.
        offset: usize,
    },

    /// A variable-length quantity used more than four bytes.
    #[error("variable-length quantity longer than 4 bytes at offset {offset}")]
    VarlenTooLong {
        /// Byte offset of the quantity.
        offset: usize,
    },

    /// A value does not fit in a 28-bit variable-length quantity.
    #[error("value {0:#x} does not fit in a variable-length quantity")]
    VarlenOverflow(u32),

    /// A status byte the codec does not know.
    #[error("invalid status byte {status:#04x} at offset {offset}")]
    InvalidStatus {
        /// The rejected byte.
        status: u8,
        /// Byte offset of the status.
        offset: usize,
    },

    /// A data byte arrived with no running status to apply.
    #[error("data byte without running status at offset {offset}")]
    MissingRunningStatus {
        /// Byte offset of the data byte.
        offset: usize,
    },

    /// A chunk had the wrong type tag.
    #[error("expected chunk '{expected}', found {found:?}")]
    BadChunk {
        /// Expected tag (`MThd` or `MTrk`).
        expected: &'static str,
        /// Tag found in the data.
        found: [u8; 4],
    },

    /// The header chunk length was not 6.
    #[error("invalid header length {0}")]
    InvalidHeaderLength(u32),

    /// Failed to read a file.
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl MidiError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MidiError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MidiError::WriteFile {
            path: path.into(),
            source,
        }
    }
}

/// Result type for MIDI operations.
pub type Result<T> = std::result::Result<T, MidiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_file_factory_keeps_path() {
        let err = MidiError::read_file("/tmp/x.mid", std::io::Error::other("mock"));
        assert!(err.to_string().contains("/tmp/x.mid"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn status_display_is_hex() {
        let err = MidiError::InvalidStatus {
            status: 0xf4,
            offset: 3,
        };
        assert_eq!(err.to_string(), "invalid status byte 0xf4 at offset 3");
    }
}
