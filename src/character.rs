// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::Cursor;

use binrw::{BinReaderExt, Endian};
use glam::{Mat4, Quat, Vec3};

use crate::common::Game;
use crate::common_file_operations::{read_string_until_null, skip_exact};
use crate::error::FormatError;
use crate::{ByteSpan, ReadableFile};

/// A bone of a character's rest pose.
#[derive(Debug, Clone)]
pub struct Bone {
    /// Name of the bone.
    pub name: String,
    /// Indices of the child bones in the character's flat `bones` array.
    pub children: Vec<u32>,

    /// Translation relative to the parent bone.
    pub translation: Vec3,
    /// Rotation relative to the parent bone.
    pub rotation: Quat,

    /// Rest-pose local-to-model transform.
    pub matrix: Mat4,
    /// Precomputed inverse of `matrix`, stored in the file.
    pub matrix_inverse: Mat4,
}

/// Character file: a named, flat array of bones.
///
/// Parent/child structure is expressed through per-bone child index lists.
/// The wire format has no cycle guard of its own, so child indices that do
/// not point strictly forward in the array are rejected.
#[derive(Debug, Clone)]
pub struct Character {
    pub name: String,
    pub bones: Vec<Bone>,
}

fn read_bone(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    index: u32,
    bone_count: u32,
) -> Result<Bone, FormatError> {
    skip_exact(cursor, 4)?;

    let child_count: u32 = cursor.read_type(endian)?;
    let mut children = Vec::new();
    for _ in 0..child_count {
        let child: u32 = cursor.read_type(endian)?;
        if child <= index || child >= bone_count {
            return Err(FormatError::new(format!(
                "bone {index} has non-forward child index {child}"
            )));
        }
        children.push(child);
    }

    let translation: [f32; 3] = cursor.read_type(endian)?;

    // Stored (x, y, z, w).
    let rotation: [f32; 4] = cursor.read_type(endian)?;

    skip_exact(cursor, 1)?;

    let matrix: [f32; 16] = cursor.read_type(endian)?;
    let matrix_inverse: [f32; 16] = cursor.read_type(endian)?;

    let name = read_string_until_null(cursor)?;

    Ok(Bone {
        name,
        children,
        translation: Vec3::from_array(translation),
        rotation: Quat::from_xyzw(rotation[0], rotation[1], rotation[2], rotation[3]),
        matrix: Mat4::from_cols_array(&matrix).transpose(),
        matrix_inverse: Mat4::from_cols_array(&matrix_inverse).transpose(),
    })
}

impl ReadableFile for Character {
    fn from_existing(game: Game, endian: Endian, buffer: ByteSpan) -> Result<Character, FormatError> {
        let layout = game.layout();
        let mut cursor = Cursor::new(buffer);

        if layout.extended_character_header {
            skip_exact(&mut cursor, 16)?;
        }

        let name = read_string_until_null(&mut cursor)?;

        if layout.extended_character_header {
            skip_exact(&mut cursor, 4)?;
        }

        let bone_count: u32 = cursor.read_type(endian)?;

        let mut bones = Vec::new();
        for index in 0..bone_count {
            bones.push(read_bone(&mut cursor, endian, index, bone_count)?);
        }

        skip_exact(&mut cursor, 20)?;

        if cursor.position() != buffer.len() as u64 {
            return Err(FormatError::new("trailing bytes after character"));
        }

        Ok(Character { name, bones })
    }
}
