// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::Cursor;

use binrw::{binread, BinRead, BinReaderExt, Endian};
use glam::Vec3;

use crate::common::{Game, ShaderVariant};
use crate::common_file_operations::{read_string_until_null, skip_exact};
use crate::error::FormatError;
use crate::{ByteSpan, ReadableFile};

const SHADER_FILE_ID: u32 = 1397245010;

/// One render pass of a shader.
#[derive(Debug, Clone)]
pub struct RenderPass {
    /// Texture looked up by id in the title's texture banks. When the pass
    /// carries an indirection list, this is its first entry.
    pub texture_id: u32,
    pub raster_modes: u32,
    pub flags: u32,
    pub blends: [u8; 4],
    pub blend_fix: u8,
    pub combine: u8,
    pub texture_gen: u8,
    pub alpha_test_threshold: f32,

    /// Length of the trailing texture id list, when present.
    pub indirection_count: u8,
    pub indirection_tail: u16,
}

/// Shader file: named render state plus its render passes.
#[derive(Debug, Clone)]
pub struct Shader {
    pub name: String,
    pub render_passes: Vec<RenderPass>,
    pub geometry_modes: u32,
    pub sort_mode: u8,
    pub sort_value: u32,
    pub flags: u32,
    pub ambient_color: Vec3,
    pub diffuse_color: Vec3,
    pub surface_type: u32,
}

/// Shader file that only redirects to other shaders. The last id names the
/// effective shader.
#[derive(Debug, Clone)]
pub struct ShaderAlias {
    pub shader_ids: Vec<u32>,
}

impl ShaderAlias {
    /// The id of the shader this alias stands for.
    pub fn effective_id(&self) -> Option<u32> {
        self.shader_ids.last().copied()
    }

    /// Decodes the referenced shader's file. Aliases redirect exactly one
    /// level, so a target that is itself an alias is an error.
    pub fn resolve(
        &self,
        game: Game,
        endian: Endian,
        buffer: ByteSpan,
    ) -> Result<Shader, FormatError> {
        match ShaderRecord::from_existing(game, endian, buffer)? {
            ShaderRecord::Shader(shader) => Ok(shader),
            ShaderRecord::Alias(_) => {
                Err(FormatError::new("shader alias resolves to another alias"))
            }
        }
    }
}

/// Either record kind a shader file can hold.
#[derive(Debug, Clone)]
pub enum ShaderRecord {
    Shader(Shader),
    Alias(ShaderAlias),
}

#[binread]
struct SimsPass {
    texture_id: u32,
    raster_modes: u32,
    flags: u32,
    blends: [u8; 4],
    blend_fix: u8,
    combine: u8,
    texture_gen: u8,
    alpha_test_threshold: f32,
}

impl From<SimsPass> for RenderPass {
    fn from(pass: SimsPass) -> RenderPass {
        RenderPass {
            texture_id: pass.texture_id,
            raster_modes: pass.raster_modes,
            flags: pass.flags,
            blends: pass.blends,
            blend_fix: pass.blend_fix,
            combine: pass.combine,
            texture_gen: pass.texture_gen,
            alpha_test_threshold: pass.alpha_test_threshold,
            indirection_count: 0,
            indirection_tail: 0,
        }
    }
}

#[binread]
struct UrbzPass {
    texture_id: u32,
    #[br(pad_before = 8)]
    raster_modes: u32,
    flags: u32,
    alpha_test_threshold: f32,
    #[br(pad_before = 4)]
    blends: [u8; 4],
    blend_fix: u8,
    combine: u8,
    texture_gen: u8,
    #[br(pad_before = 1)]
    indirection_count: u8,
    #[br(pad_before = 1, pad_after = 24)]
    indirection_tail: u16,
}

impl From<UrbzPass> for RenderPass {
    fn from(pass: UrbzPass) -> RenderPass {
        RenderPass {
            texture_id: pass.texture_id,
            raster_modes: pass.raster_modes,
            flags: pass.flags,
            blends: pass.blends,
            blend_fix: pass.blend_fix,
            combine: pass.combine,
            texture_gen: pass.texture_gen,
            alpha_test_threshold: pass.alpha_test_threshold,
            indirection_count: pass.indirection_count,
            indirection_tail: pass.indirection_tail,
        }
    }
}

#[binread]
struct PetsPass {
    texture_id: u32,
    #[br(pad_before = 1)]
    raster_modes: u8,
    flags: u8,
    alpha_test_threshold: f32,
    blends: [u8; 4],
    blend_fix: u8,
    combine: u8,
    texture_gen: u8,
    #[br(pad_before = 2)]
    indirection_count: u8,
    #[br(pad_before = 2, pad_after = 24)]
    indirection_tail: u8,
}

impl From<PetsPass> for RenderPass {
    fn from(pass: PetsPass) -> RenderPass {
        RenderPass {
            texture_id: pass.texture_id,
            raster_modes: u32::from(pass.raster_modes),
            flags: u32::from(pass.flags),
            blends: pass.blends,
            blend_fix: pass.blend_fix,
            combine: pass.combine,
            texture_gen: pass.texture_gen,
            alpha_test_threshold: pass.alpha_test_threshold,
            indirection_count: pass.indirection_count,
            indirection_tail: u16::from(pass.indirection_tail),
        }
    }
}

/// Reads each pass's trailing texture id list and promotes the first entry
/// to the pass's effective texture id.
fn resolve_indirection(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    passes: &mut [RenderPass],
    only_unset_textures: bool,
) -> Result<(), FormatError> {
    for pass in passes {
        if only_unset_textures && pass.texture_id != 0 {
            continue;
        }
        if pass.indirection_count == 0 {
            continue;
        }

        let mut texture_ids = Vec::new();
        for _ in 0..pass.indirection_count {
            texture_ids.push(cursor.read_type::<u32>(endian)?);
        }
        pass.texture_id = texture_ids[0];

        skip_exact(cursor, pass.indirection_tail as usize)?;
    }

    Ok(())
}

fn read_shader_sims(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    bustin_out: bool,
) -> Result<Shader, FormatError> {
    if bustin_out {
        skip_exact(cursor, 16)?;
    }

    let name = read_string_until_null(cursor)?;

    let render_pass_count: u8 = cursor.read_type(endian)?;
    let geometry_modes: u32 = cursor.read_type(endian)?;
    let sort_mode: u8 = cursor.read_type(endian)?;
    let sort_value: u32 = cursor.read_type(endian)?;
    let flags: u32 = cursor.read_type(endian)?;

    skip_exact(cursor, 4)?;

    let ambient_color: [f32; 3] = cursor.read_type(endian)?;
    let diffuse_color: [f32; 3] = cursor.read_type(endian)?;

    if bustin_out {
        skip_exact(cursor, 12)?;
        skip_exact(cursor, 24)?;
    }

    let mut render_passes = Vec::new();
    for _ in 0..render_pass_count {
        render_passes.push(SimsPass::read_options(cursor, endian, ())?.into());
    }

    let surface_type: u32 = cursor.read_type(endian)?;

    skip_exact(cursor, 24)?;

    Ok(Shader {
        name,
        render_passes,
        geometry_modes,
        sort_mode,
        sort_value,
        flags,
        ambient_color: Vec3::from_array(ambient_color),
        diffuse_color: Vec3::from_array(diffuse_color),
        surface_type,
    })
}

fn read_shader_urbz(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    variant: ShaderVariant,
) -> Result<Shader, FormatError> {
    let name = if variant == ShaderVariant::TheUrbz {
        skip_exact(cursor, 12)?;
        read_string_until_null(cursor)?
    } else {
        skip_exact(cursor, 4)?;
        let name = read_string_until_null(cursor)?;
        skip_exact(cursor, 4)?;
        name
    };

    let render_pass_count: u8 = cursor.read_type(endian)?;
    skip_exact(cursor, 7)?;

    let sort_value: u32 = cursor.read_type(endian)?;
    skip_exact(cursor, 4)?;

    let diffuse_color: [f32; 3] = cursor.read_type(endian)?;
    skip_exact(cursor, 4)?;
    let ambient_color: [f32; 3] = cursor.read_type(endian)?;
    skip_exact(cursor, 4)?;
    skip_exact(cursor, 12)?;

    skip_exact(cursor, 4)?;
    skip_exact(cursor, 36)?;

    let mut render_passes: Vec<RenderPass> = Vec::new();
    for _ in 0..render_pass_count {
        render_passes.push(UrbzPass::read_options(cursor, endian, ())?.into());
    }

    // A single-pass shader stores a duplicate trailing pass.
    if render_pass_count == 1 {
        let _ = UrbzPass::read_options(cursor, endian, ())?;
    }

    resolve_indirection(
        cursor,
        endian,
        &mut render_passes,
        variant != ShaderVariant::TheUrbz,
    )?;

    Ok(Shader {
        name,
        render_passes,
        geometry_modes: 0,
        sort_mode: 0,
        sort_value,
        flags: 0,
        ambient_color: Vec3::from_array(ambient_color),
        diffuse_color: Vec3::from_array(diffuse_color),
        surface_type: 0,
    })
}

fn read_shader_pets(cursor: &mut Cursor<ByteSpan>, endian: Endian) -> Result<Shader, FormatError> {
    skip_exact(cursor, 4)?;
    let name = read_string_until_null(cursor)?;
    skip_exact(cursor, 4)?;

    let render_pass_count: u8 = cursor.read_type(endian)?;
    skip_exact(cursor, 6)?;

    let sort_value: u32 = cursor.read_type(endian)?;

    let diffuse_color: [f32; 3] = cursor.read_type(endian)?;
    skip_exact(cursor, 4)?;
    let ambient_color: [f32; 3] = cursor.read_type(endian)?;
    skip_exact(cursor, 4)?;

    skip_exact(cursor, 16)?;

    let mut render_passes: Vec<RenderPass> = Vec::new();
    for _ in 0..render_pass_count {
        render_passes.push(PetsPass::read_options(cursor, endian, ())?.into());
    }

    resolve_indirection(cursor, endian, &mut render_passes, true)?;

    Ok(Shader {
        name,
        render_passes,
        geometry_modes: 0,
        sort_mode: 0,
        sort_value,
        flags: 0,
        ambient_color: Vec3::from_array(ambient_color),
        diffuse_color: Vec3::from_array(diffuse_color),
        surface_type: 0,
    })
}

fn read_alias(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    variant: ShaderVariant,
) -> Result<ShaderAlias, FormatError> {
    if variant == ShaderVariant::TheUrbz {
        skip_exact(cursor, 12)?;
        let _ = read_string_until_null(cursor)?;
    } else {
        skip_exact(cursor, 4)?;
        let _ = read_string_until_null(cursor)?;
        skip_exact(cursor, 4)?;
    }

    skip_exact(cursor, 5)?;

    let id_count: u8 = cursor.read_type(endian)?;
    skip_exact(cursor, id_count as usize)?;

    let mut shader_ids = Vec::new();
    for _ in 0..id_count {
        shader_ids.push(cursor.read_type::<u32>(endian)?);
    }

    Ok(ShaderAlias { shader_ids })
}

impl ReadableFile for ShaderRecord {
    fn from_existing(
        game: Game,
        endian: Endian,
        buffer: ByteSpan,
    ) -> Result<ShaderRecord, FormatError> {
        let layout = game.layout();
        let mut cursor = Cursor::new(buffer);

        let record = match layout.shader_variant {
            ShaderVariant::TheSims => {
                ShaderRecord::Shader(read_shader_sims(&mut cursor, endian, false)?)
            }
            ShaderVariant::BustinOut => {
                ShaderRecord::Shader(read_shader_sims(&mut cursor, endian, true)?)
            }
            variant => {
                let version: u32 = cursor.read_type(endian)?;
                if !layout.shader_versions.contains(&version) {
                    return Err(FormatError::new(format!(
                        "unsupported shader version {version:#x}"
                    )));
                }

                if variant != ShaderVariant::TheUrbz {
                    let file_id: u32 = cursor.read_type(endian)?;
                    if file_id != SHADER_FILE_ID {
                        return Err(FormatError::new("bad shader file id"));
                    }
                }

                let record_type: u32 = cursor.read_type(endian)?;
                match record_type {
                    0 => match variant {
                        ShaderVariant::Pets => {
                            ShaderRecord::Shader(read_shader_pets(&mut cursor, endian)?)
                        }
                        _ => ShaderRecord::Shader(read_shader_urbz(&mut cursor, endian, variant)?),
                    },
                    1 => ShaderRecord::Alias(read_alias(&mut cursor, endian, variant)?),
                    _ => {
                        return Err(FormatError::new(format!(
                            "unknown shader record type {record_type}"
                        )))
                    }
                }
            }
        };

        if cursor.position() != buffer.len() as u64 {
            return Err(FormatError::new("trailing bytes after shader"));
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_f32s(buffer: &mut Vec<u8>, values: &[f32]) {
        for value in values {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn sims_shader_buffer() -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"wall\0");
        buffer.push(1); // render pass count
        buffer.extend_from_slice(&2u32.to_le_bytes()); // geometry modes
        buffer.push(1); // sort mode
        buffer.extend_from_slice(&5u32.to_le_bytes()); // sort value
        buffer.extend_from_slice(&3u32.to_le_bytes()); // flags
        buffer.extend_from_slice(&[0u8; 4]);
        push_f32s(&mut buffer, &[0.1, 0.2, 0.3]); // ambient
        push_f32s(&mut buffer, &[0.4, 0.5, 0.6]); // diffuse

        // render pass
        buffer.extend_from_slice(&7u32.to_le_bytes());
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.extend_from_slice(&2u32.to_le_bytes());
        buffer.extend_from_slice(&[1, 2, 3, 4]);
        buffer.push(5);
        buffer.push(6);
        buffer.push(7);
        push_f32s(&mut buffer, &[0.5]);

        buffer.extend_from_slice(&9u32.to_le_bytes()); // surface type
        buffer.extend_from_slice(&[0u8; 24]);
        buffer
    }

    #[test]
    fn sims_shader() {
        let buffer = sims_shader_buffer();
        let record =
            ShaderRecord::from_existing(Game::TheSims, Endian::Little, &buffer).unwrap();

        let ShaderRecord::Shader(shader) = record else {
            panic!("expected a full shader");
        };

        assert_eq!(shader.name, "wall");
        assert_eq!(shader.sort_value, 5);
        assert_eq!(shader.ambient_color, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(shader.surface_type, 9);

        assert_eq!(shader.render_passes.len(), 1);
        let pass = &shader.render_passes[0];
        assert_eq!(pass.texture_id, 7);
        assert_eq!(pass.blends, [1, 2, 3, 4]);
        assert_eq!(pass.alpha_test_threshold, 0.5);
    }

    #[test]
    fn sims_shader_consumption() {
        let mut buffer = sims_shader_buffer();

        buffer.push(0);
        assert!(ShaderRecord::from_existing(Game::TheSims, Endian::Little, &buffer).is_err());

        let truncated = &buffer[..buffer.len() - 2];
        assert!(ShaderRecord::from_existing(Game::TheSims, Endian::Little, truncated).is_err());
    }

    fn urbz_alias_buffer() -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0x14u32.to_le_bytes()); // version
        buffer.extend_from_slice(&1u32.to_le_bytes()); // alias record
        buffer.extend_from_slice(&[0u8; 12]);
        buffer.extend_from_slice(b"a\0");
        buffer.extend_from_slice(&[0u8; 5]);
        buffer.push(2); // id count
        buffer.extend_from_slice(&[0u8; 2]);
        buffer.extend_from_slice(&3u32.to_le_bytes());
        buffer.extend_from_slice(&9u32.to_le_bytes());
        buffer
    }

    fn push_urbz_pass(buffer: &mut Vec<u8>, texture_id: u32, indirection_count: u8) {
        buffer.extend_from_slice(&texture_id.to_le_bytes());
        buffer.extend_from_slice(&[0u8; 8]);
        buffer.extend_from_slice(&1u32.to_le_bytes()); // raster modes
        buffer.extend_from_slice(&2u32.to_le_bytes()); // flags
        push_f32s(buffer, &[0.25]); // alpha test
        buffer.extend_from_slice(&[0u8; 4]);
        buffer.extend_from_slice(&[1, 2, 3, 4]); // blends
        buffer.extend_from_slice(&[5, 6, 7]);
        buffer.push(0);
        buffer.push(indirection_count);
        buffer.push(0);
        buffer.extend_from_slice(&0u16.to_le_bytes()); // indirection tail
        buffer.extend_from_slice(&[0u8; 24]);
    }

    fn urbz_shader_buffer() -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0x14u32.to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes()); // full shader record
        buffer.extend_from_slice(&[0u8; 12]);
        buffer.extend_from_slice(b"glass\0");
        buffer.push(1); // render pass count
        buffer.extend_from_slice(&[0u8; 7]);
        buffer.extend_from_slice(&4u32.to_le_bytes()); // sort value
        buffer.extend_from_slice(&[0u8; 4]);
        push_f32s(&mut buffer, &[0.4, 0.5, 0.6]); // diffuse
        buffer.extend_from_slice(&[0u8; 4]);
        push_f32s(&mut buffer, &[0.1, 0.2, 0.3]); // ambient
        buffer.extend_from_slice(&[0u8; 4]);
        buffer.extend_from_slice(&[0u8; 12]);
        buffer.extend_from_slice(&[0u8; 4]);
        buffer.extend_from_slice(&[0u8; 36]);
        push_urbz_pass(&mut buffer, 7, 0);
        push_urbz_pass(&mut buffer, 7, 0); // duplicate trailing pass
        buffer
    }

    #[test]
    fn urbz_shader_and_alias() {
        let buffer = urbz_shader_buffer();
        let record = ShaderRecord::from_existing(Game::TheUrbz, Endian::Little, &buffer).unwrap();
        let ShaderRecord::Shader(shader) = record else {
            panic!("expected a full shader");
        };
        assert_eq!(shader.name, "glass");
        assert_eq!(shader.sort_value, 4);
        assert_eq!(shader.render_passes.len(), 1);
        assert_eq!(shader.render_passes[0].texture_id, 7);

        let alias_buffer = urbz_alias_buffer();
        let record =
            ShaderRecord::from_existing(Game::TheUrbz, Endian::Little, &alias_buffer).unwrap();
        let ShaderRecord::Alias(alias) = record else {
            panic!("expected an alias");
        };
        assert_eq!(alias.shader_ids, vec![3, 9]);
        assert_eq!(alias.effective_id(), Some(9));

        // One level of indirection is fine...
        let shader = alias
            .resolve(Game::TheUrbz, Endian::Little, &buffer)
            .unwrap();
        assert_eq!(shader.name, "glass");

        // ...an alias chaining to an alias is not.
        assert!(alias
            .resolve(Game::TheUrbz, Endian::Little, &alias_buffer)
            .is_err());
    }

    fn pets_shader_buffer() -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0x18u32.to_le_bytes());
        buffer.extend_from_slice(&SHADER_FILE_ID.to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes()); // full shader record
        buffer.extend_from_slice(&[0u8; 4]);
        buffer.extend_from_slice(b"fur\0");
        buffer.extend_from_slice(&[0u8; 4]);
        buffer.push(1); // render pass count
        buffer.extend_from_slice(&[0u8; 6]);
        buffer.extend_from_slice(&4u32.to_le_bytes()); // sort value
        push_f32s(&mut buffer, &[0.4, 0.5, 0.6]); // diffuse
        buffer.extend_from_slice(&[0u8; 4]);
        push_f32s(&mut buffer, &[0.1, 0.2, 0.3]); // ambient
        buffer.extend_from_slice(&[0u8; 4]);
        buffer.extend_from_slice(&[0u8; 16]);

        // pass with an unset texture id and a two-entry indirection list
        buffer.extend_from_slice(&0u32.to_le_bytes());
        buffer.push(0);
        buffer.push(1); // raster modes
        buffer.push(2); // flags
        push_f32s(&mut buffer, &[0.25]);
        buffer.extend_from_slice(&[1, 2, 3, 4]);
        buffer.extend_from_slice(&[5, 6, 7]);
        buffer.extend_from_slice(&[0u8; 2]);
        buffer.push(2); // indirection count
        buffer.extend_from_slice(&[0u8; 2]);
        buffer.push(3); // indirection tail length
        buffer.extend_from_slice(&[0u8; 24]);

        // indirection list and its tail
        buffer.extend_from_slice(&42u32.to_le_bytes());
        buffer.extend_from_slice(&43u32.to_le_bytes());
        buffer.extend_from_slice(&[0u8; 3]);
        buffer
    }

    #[test]
    fn pets_indirection() {
        let buffer = pets_shader_buffer();
        let record =
            ShaderRecord::from_existing(Game::TheSims2Pets, Endian::Little, &buffer).unwrap();

        let ShaderRecord::Shader(shader) = record else {
            panic!("expected a full shader");
        };

        // The pass's texture id is replaced by the list's first entry.
        assert_eq!(shader.render_passes[0].texture_id, 42);
        assert_eq!(shader.render_passes[0].indirection_count, 2);
    }

    #[test]
    fn rejects_unknown_versions() {
        let mut buffer = pets_shader_buffer();
        buffer[0] = 0x16;
        assert!(ShaderRecord::from_existing(Game::TheSims2Pets, Endian::Little, &buffer).is_err());

        // The same buffer is also not a valid Sims 2 shader: the version
        // matches there, but the layout after it does not.
        assert!(ShaderRecord::from_existing(Game::TheSims2, Endian::Little, &buffer).is_err());
    }
}
