// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{Cursor, Seek, SeekFrom};

use binrw::{binread, BinRead, BinReaderExt, Endian};
use glam::{Quat, Vec3};

use crate::bit_array::BitArray;
use crate::common::Game;
use crate::common_file_operations::{read_string_until_null, skip_exact};
use crate::error::FormatError;
use crate::{ByteSpan, ReadableFile};

/// One decompressed `(frame, value)` pair of an animation channel.
///
/// The bias field rides along from the wire format; its consumer semantics
/// are unknown and it defaults to 1.0 when a channel does not store one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe<T> {
    /// 0-based frame index on a 60 Hz timeline.
    pub frame: u32,
    pub bias: f32,
    pub value: T,
}

/// The three channels of one bone. Static and defaulted channels decode to
/// a single keyframe at frame 0.
#[derive(Debug, Clone)]
pub struct BoneTrack {
    pub rotation: Vec<Keyframe<Quat>>,
    pub scale: Vec<Keyframe<Vec3>>,
    pub location: Vec<Keyframe<Vec3>>,
}

/// Animation file: keyframe tracks for every bone of a character, plus
/// scalar playback metadata that is preserved but not interpreted.
#[derive(Debug, Clone)]
pub struct Animation {
    pub name: String,
    /// Total frame count on a 60 Hz timeline. Titles that animate at half
    /// rate store half of this and are expanded on load.
    pub frame_count: u32,
    /// One track per bone, in the bone order of the matching character.
    pub tracks: Vec<BoneTrack>,

    pub intensity: f32,
    pub flags: u32,
    pub blend_type: u8,
    pub blend_m1: f32,
    pub blend_m2: f32,
    pub blend_duration: f32,
    pub blend_speed: f32,
    pub rotation_accumulator: u8,
    pub end_action: u8,

    /// Names of the sound events triggered during playback.
    pub sound_events: Vec<String>,
}

#[binread]
struct StreamMetadata {
    rate: f32,
    intensity: f32,
    flags: u32,
    blend_type: u8,
    blend_m1: f32,
    blend_m2: f32,
    blend_duration: f32,
    blend_speed: f32,
    rotation_accumulator: u8,
    end_action: u8,
}

/// Bounds-checked bit cursor over a compressed keyframe stream. The
/// underlying [`BitArray`] panics on out-of-range reads, so every read is
/// validated here first and turned into a decode error instead.
struct BitCursor<'a> {
    stream: &'a BitArray,
    position: usize,
}

impl<'a> BitCursor<'a> {
    fn new(stream: &'a BitArray, position: usize) -> BitCursor<'a> {
        BitCursor { stream, position }
    }

    fn take(&mut self, count: u32) -> Result<usize, FormatError> {
        let position = self.position;
        if position + count as usize > self.stream.bit_len() {
            return Err(FormatError::new(
                "compressed keyframe stream overruns its buffer",
            ));
        }
        self.position += count as usize;
        Ok(position)
    }

    fn unsigned(&mut self, count: u32) -> Result<u32, FormatError> {
        let position = self.take(count)?;
        Ok(self.stream.get_unsigned(position, count))
    }

    fn signed(&mut self, count: u32) -> Result<i32, FormatError> {
        let position = self.take(count)?;
        Ok(self.stream.get_signed(position, count))
    }

    fn bit(&mut self) -> Result<bool, FormatError> {
        let position = self.take(1)?;
        Ok(self.stream.get_bit(position))
    }

    fn float(&mut self) -> Result<f32, FormatError> {
        let position = self.take(32)?;
        Ok(self.stream.get_float(position))
    }
}

/// Scale factor for a signed quantized field of the given width.
fn signed_field_scale(width: u32) -> f32 {
    1.0 / ((1u32 << (width.wrapping_sub(1) & 0x1F)).wrapping_sub(1)) as f32
}

/// Scale factor for an unsigned quantized field of the given width.
fn unsigned_field_scale(width: u32) -> f32 {
    1.0 / ((1u32 << (width & 0x1F)).wrapping_sub(1)) as f32
}

fn push_keyframe<T>(
    keyframes: &mut Vec<Keyframe<T>>,
    frame: u32,
    bias: f32,
    value: T,
) -> Result<(), FormatError> {
    if let Some(last) = keyframes.last() {
        if frame <= last.frame {
            return Err(FormatError::new("keyframes are not strictly increasing"));
        }
    }

    keyframes.push(Keyframe { frame, bias, value });
    Ok(())
}

fn decompress_quaternion_keyframes(
    stream: &BitArray,
    start: usize,
    multiplier: u32,
) -> Result<Vec<Keyframe<Quat>>, FormatError> {
    let mut bits = BitCursor::new(stream, start);

    let keyframe_count = bits.unsigned(20)?;
    let delta_width = bits.unsigned(5)?;
    let bias_width = bits.unsigned(5)?;
    let bias_scale = signed_field_scale(bias_width);
    let value_width = bits.unsigned(5)?;
    let value_scale = signed_field_scale(value_width);

    let mut tick = 0u64;
    let mut keyframes = Vec::new();

    for _ in 0..keyframe_count {
        let delta = bits.unsigned(delta_width)?;
        let raw_bias = bits.unsigned(bias_width)?;
        let bias = if bias_width > 0 {
            bias_scale * raw_bias as f32
        } else {
            1.0
        };

        let x = value_scale * bits.signed(value_width)? as f32;
        let y = value_scale * bits.signed(value_width)? as f32;
        let z = value_scale * bits.signed(value_width)? as f32;

        // The real component is implied by unit length; only its sign is
        // stored.
        let square = 1.0 - (x * x + y * y + z * z);
        let negate = bits.bit()?;
        let w = if square > 0.0 {
            if negate {
                -square.sqrt()
            } else {
                square.sqrt()
            }
        } else {
            0.0
        };

        tick += u64::from(delta) + 1;
        let frame = (tick * u64::from(multiplier) - 1) as u32;

        push_keyframe(
            &mut keyframes,
            frame,
            bias,
            Quat::from_xyzw(x, y, z, w).normalize(),
        )?;
    }

    Ok(keyframes)
}

fn decompress_vector_keyframes(
    stream: &BitArray,
    start: usize,
    multiplier: u32,
) -> Result<Vec<Keyframe<Vec3>>, FormatError> {
    let mut bits = BitCursor::new(stream, start);

    let keyframe_count = bits.unsigned(20)?;
    let delta_width = bits.unsigned(5)?;
    let bias_width = bits.unsigned(5)?;
    let bias_scale = signed_field_scale(bias_width);
    let value_width = bits.unsigned(5)?;
    let value_scale = unsigned_field_scale(value_width);

    let mut scale = [0.0f32; 3];
    let mut offset = [0.0f32; 3];
    for axis in 0..3 {
        scale[axis] = value_scale * bits.float()?;
        offset[axis] = bits.float()?;
    }

    let mut tick = 0u64;
    let mut keyframes = Vec::new();

    for _ in 0..keyframe_count {
        let delta = bits.unsigned(delta_width)?;
        let raw_bias = bits.unsigned(bias_width)?;
        let bias = if bias_width > 0 {
            bias_scale * raw_bias as f32
        } else {
            1.0
        };

        let mut vector = [0.0f32; 3];
        for axis in 0..3 {
            let raw = bits.unsigned(value_width)?;
            // A raw field that is negative as a 32-bit signed integer
            // collapses to `raw & 1 | raw >> 2` before de-quantization.
            let value = if (raw as i32) < 0 {
                (raw & 1 | raw >> 2) as f32
            } else {
                raw as f32
            };
            vector[axis] = value * scale[axis] + offset[axis];
        }

        tick += u64::from(delta) + 1;
        let frame = (tick * u64::from(multiplier) - 1) as u32;

        push_keyframe(&mut keyframes, frame, bias, Vec3::from_array(vector))?;
    }

    Ok(keyframes)
}

/// Looks up a static quaternion, stored (x, y, z, w) in the float table.
fn static_quaternion(table: &[f32], index: usize) -> Result<Quat, FormatError> {
    let values = table
        .get(index..index + 4)
        .ok_or_else(|| FormatError::new("static rotation index out of range"))?;

    Ok(Quat::from_xyzw(values[0], values[1], values[2], values[3]))
}

fn static_vector(table: &[f32], index: usize) -> Result<Vec3, FormatError> {
    let values = table
        .get(index..index + 3)
        .ok_or_else(|| FormatError::new("static vector index out of range"))?;

    Ok(Vec3::new(values[0], values[1], values[2]))
}

fn quaternion_channel(
    index: i32,
    static_data: &[f32],
    stream: &BitArray,
    multiplier: u32,
) -> Result<Vec<Keyframe<Quat>>, FormatError> {
    if index > 0 {
        Ok(vec![Keyframe {
            frame: 0,
            bias: 1.0,
            value: static_quaternion(static_data, index as usize)?,
        }])
    } else if index < 0 {
        decompress_quaternion_keyframes(stream, index.unsigned_abs() as usize, multiplier)
    } else {
        Ok(vec![Keyframe {
            frame: 0,
            bias: 1.0,
            value: Quat::IDENTITY,
        }])
    }
}

fn vector_channel(
    index: i32,
    default: Vec3,
    static_data: &[f32],
    stream: &BitArray,
    multiplier: u32,
) -> Result<Vec<Keyframe<Vec3>>, FormatError> {
    if index > 0 {
        Ok(vec![Keyframe {
            frame: 0,
            bias: 1.0,
            value: static_vector(static_data, index as usize)?,
        }])
    } else if index < 0 {
        decompress_vector_keyframes(stream, index.unsigned_abs() as usize, multiplier)
    } else {
        Ok(vec![Keyframe {
            frame: 0,
            bias: 1.0,
            value: default,
        }])
    }
}

fn read_bone_track(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    tail_skip: usize,
    static_data: &[f32],
    stream: &BitArray,
    multiplier: u32,
) -> Result<BoneTrack, FormatError> {
    let rotation_index: i32 = cursor.read_type(endian)?;
    let scale_index: i32 = cursor.read_type(endian)?;
    let location_index: i32 = cursor.read_type(endian)?;
    skip_exact(cursor, tail_skip)?;

    Ok(BoneTrack {
        rotation: quaternion_channel(rotation_index, static_data, stream, multiplier)?,
        scale: vector_channel(scale_index, Vec3::ONE, static_data, stream, multiplier)?,
        location: vector_channel(location_index, Vec3::ZERO, static_data, stream, multiplier)?,
    })
}

impl ReadableFile for Animation {
    fn from_existing(game: Game, endian: Endian, buffer: ByteSpan) -> Result<Animation, FormatError> {
        let layout = game.layout();
        let mut cursor = Cursor::new(buffer);

        skip_exact(&mut cursor, layout.anim_pre_name_skip)?;
        let name = read_string_until_null(&mut cursor)?;
        skip_exact(&mut cursor, layout.anim_post_name_skip)?;

        let declared_frame_count: u32 = cursor.read_type(endian)?;
        skip_exact(&mut cursor, 24)?;

        let bone_count: u32 = cursor.read_type(endian)?;
        let bone_position = cursor.position();
        let bone_record_len = (12 + layout.anim_bone_tail_skip) as u64;

        // The channel indices of the bone records point into the float
        // table and compressed stream that follow the bone array, so those
        // are read first and the bones decoded in a second pass.
        cursor.seek(SeekFrom::Start(
            bone_position + u64::from(bone_count) * bone_record_len + 4,
        ))?;

        let static_float_count: u32 = cursor.read_type(endian)?;
        let mut static_data = Vec::new();
        for _ in 0..static_float_count {
            static_data.push(cursor.read_type::<f32>(endian)?);
        }

        let stream_bit_count: u32 = cursor.read_type(endian)?;
        let word_count = (u64::from(stream_bit_count) + 0x1F) >> 5;
        let mut words = Vec::new();
        for _ in 0..word_count {
            words.push(cursor.read_type::<u32>(endian)?);
        }
        let stream = BitArray::new(words);

        let metadata = StreamMetadata::read_options(&mut cursor, endian, ())?;
        let end_position = cursor.position();

        let multiplier: u32 = if metadata.rate == 60.0 { 1 } else { 2 };

        cursor.seek(SeekFrom::Start(bone_position))?;
        let mut tracks = Vec::new();
        for _ in 0..bone_count {
            tracks.push(read_bone_track(
                &mut cursor,
                endian,
                layout.anim_bone_tail_skip,
                &static_data,
                &stream,
                multiplier,
            )?);
        }

        cursor.seek(SeekFrom::Start(end_position))?;

        let mut sound_events = Vec::new();
        if layout.anim_has_sounds {
            let sound_count: u32 = cursor.read_type(endian)?;
            for _ in 0..sound_count {
                skip_exact(&mut cursor, 8)?;
                sound_events.push(read_string_until_null(&mut cursor)?);
            }
        }

        skip_exact(&mut cursor, 4)?;

        if cursor.position() != buffer.len() as u64 {
            return Err(FormatError::new("trailing bytes after animation"));
        }

        Ok(Animation {
            name,
            frame_count: declared_frame_count.saturating_mul(multiplier),
            tracks,
            intensity: metadata.intensity,
            flags: metadata.flags,
            blend_type: metadata.blend_type,
            blend_m1: metadata.blend_m1,
            blend_m2: metadata.blend_m2,
            blend_duration: metadata.blend_duration,
            blend_speed: metadata.blend_speed,
            rotation_accumulator: metadata.rotation_accumulator,
            end_action: metadata.end_action,
            sound_events,
        })
    }
}
