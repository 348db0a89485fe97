// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

/// Error returned when a buffer cannot be decoded as the requested format.
///
/// Decoding is all-or-nothing: when this error is returned, no partial
/// value was produced.
#[derive(Debug, Clone)]
pub struct FormatError {
    /// Human-readable description of what failed to parse.
    pub message: String,
}

impl FormatError {
    pub(crate) fn new(message: impl Into<String>) -> FormatError {
        FormatError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "file parsing failed: {}", self.message)
    }
}

impl std::error::Error for FormatError {}

impl From<binrw::Error> for FormatError {
    fn from(err: binrw::Error) -> FormatError {
        FormatError::new(err.to_string())
    }
}

impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> FormatError {
        FormatError::new(err.to_string())
    }
}
