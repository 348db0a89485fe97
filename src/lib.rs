// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use binrw::Endian;
use tracing::debug;

/// Decode errors.
pub mod error;

/// Common structures used by other modules.
pub mod common;

mod common_file_operations;

/// Random access over bit-packed buffers.
pub mod bit_array;

/// Reading model files: static and skinned geometry.
pub mod model;

/// Reading keyframed skeletal animation files, including the compressed
/// keyframe streams.
pub mod animation;

/// Reading character (skeleton) files.
pub mod character;

/// Reading shader and render-pass files.
pub mod shader;

use crate::common::Game;
use crate::error::FormatError;

/// Read-only slice of a file loaded into memory.
pub type ByteSpan<'a> = &'a [u8];

/// A file format that can be decoded once the title and byte order are
/// known. Model files are self-describing instead; see
/// [`model::Model::from_existing`].
pub trait ReadableFile: Sized {
    /// Decodes the entire buffer, which must be consumed exactly; trailing
    /// bytes are an error.
    fn from_existing(game: Game, endian: Endian, buffer: ByteSpan) -> Result<Self, FormatError>;
}

/// Trial-decodes `buffer` against every known (title, byte order) pair and
/// returns the first decode that consumes the buffer exactly.
///
/// Animation, character and shader files do not reliably identify their own
/// title, so this brute-force probe is how such a file is opened without
/// outside knowledge. The per-format decoders themselves never guess.
pub fn probe<T: ReadableFile>(buffer: ByteSpan) -> Result<(Game, Endian, T), FormatError> {
    for game in Game::ALL {
        for endian in [Endian::Little, Endian::Big] {
            match T::from_existing(game, endian, buffer) {
                Ok(value) => return Ok((game, endian, value)),
                Err(err) => debug!(?game, ?endian, "rejected candidate: {err}"),
            }
        }
    }

    Err(FormatError::new(
        "no known title and byte order combination matches",
    ))
}
