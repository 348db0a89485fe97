// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::Read;

use crate::error::FormatError;

// Sizes of the fixed-length opaque metadata records. These are only ever
// skipped, but skipping them record by record means a truncated array
// fails right here instead of desynchronizing every read after it.
pub(crate) const DUMMY_RECORD_SIZE: usize = 28;
pub(crate) const BSPLINE_VOLUME_RECORD_SIZE: usize = 156;
pub(crate) const CAMERA_RECORD_SIZE: usize = 172;
pub(crate) const LIGHT_RECORD_SIZE: usize = 28;
pub(crate) const GEOMETRY_UNKNOWN_RECORD_SIZE: usize = 28;

/// Consumes exactly `length` bytes, failing on a short read.
pub(crate) fn skip_exact<R: Read>(reader: &mut R, length: usize) -> Result<(), FormatError> {
    let copied = std::io::copy(&mut reader.by_ref().take(length as u64), &mut std::io::sink())?;
    if copied != length as u64 {
        return Err(FormatError::new("unexpected end of buffer"));
    }

    Ok(())
}

/// Consumes a count-prefixed array of fixed-size opaque records, one record
/// at a time so a short read names the offending array.
pub(crate) fn skip_records<R: Read>(
    reader: &mut R,
    count: u32,
    record_size: usize,
    label: &str,
) -> Result<(), FormatError> {
    for _ in 0..count {
        skip_exact(reader, record_size)
            .map_err(|_| FormatError::new(format!("short read in {label} array")))?;
    }

    Ok(())
}

/// Reads bytes up to (and consuming) the NUL terminator.
pub(crate) fn read_string_until_null<R: Read>(reader: &mut R) -> Result<String, FormatError> {
    let mut bytes = Vec::new();

    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }

    String::from_utf8(bytes).map_err(|_| FormatError::new("name is not valid UTF-8"))
}

/// Reads a string of a known byte length, without a terminator.
pub(crate) fn read_sized_string<R: Read>(
    reader: &mut R,
    length: usize,
) -> Result<String, FormatError> {
    let mut bytes = Vec::new();
    let copied = reader
        .by_ref()
        .take(length as u64)
        .read_to_end(&mut bytes)?;
    if copied != length {
        return Err(FormatError::new("unexpected end of buffer in name"));
    }

    String::from_utf8(bytes).map_err(|_| FormatError::new("name is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn skip_exact_checks_length() {
        let mut cursor = Cursor::new([0u8; 8].as_slice());
        assert!(skip_exact(&mut cursor, 8).is_ok());
        assert!(skip_exact(&mut cursor, 1).is_err());
    }

    #[test]
    fn skip_records_reports_short_arrays() {
        let data = vec![0u8; DUMMY_RECORD_SIZE * 2];

        let mut cursor = Cursor::new(data.as_slice());
        assert!(skip_records(&mut cursor, 2, DUMMY_RECORD_SIZE, "dummy marker").is_ok());

        let mut cursor = Cursor::new(data.as_slice());
        let err = skip_records(&mut cursor, 3, DUMMY_RECORD_SIZE, "dummy marker").unwrap_err();
        assert!(err.message.contains("dummy marker"));
    }

    // "FOO\0"
    const STRING_DATA: [u8; 4] = [0x46u8, 0x4Fu8, 0x4Fu8, 0x0u8];

    #[test]
    fn read_string() {
        let mut cursor = Cursor::new(STRING_DATA.as_slice());
        assert_eq!(read_string_until_null(&mut cursor).unwrap(), "FOO");

        // The terminator must be present.
        let mut cursor = Cursor::new(&STRING_DATA[..3]);
        assert!(read_string_until_null(&mut cursor).is_err());
    }

    #[test]
    fn read_sized_string_checks_length() {
        let mut cursor = Cursor::new(STRING_DATA.as_slice());
        assert_eq!(read_sized_string(&mut cursor, 3).unwrap(), "FOO");

        let mut cursor = Cursor::new(STRING_DATA.as_slice());
        assert!(read_sized_string(&mut cursor, 5).is_err());
    }
}
