// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use binrw::Endian;

/// The console titles whose binary dialects are understood.
///
/// Each title is a distinct layout of the same asset family; everything
/// that varies between them lives in one constant table keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Game {
    TheSims,
    TheSimsBustinOut,
    TheUrbz,
    TheSims2,
    TheSims2Pets,
    TheSims2Castaway,
}

impl Game {
    /// Every supported title, in release order. Animation, character and
    /// shader files do not carry a version tag, so callers that do not
    /// already know the title are expected to trial-decode against each
    /// entry in this list (see [`crate::probe`]).
    pub const ALL: [Game; 6] = [
        Game::TheSims,
        Game::TheSimsBustinOut,
        Game::TheUrbz,
        Game::TheSims2,
        Game::TheSims2Pets,
        Game::TheSims2Castaway,
    ];

    /// Looks up the leading tag of a model file. Two of the tags are the
    /// byte-swapped form of a little-endian tag, which is how the
    /// big-endian releases are told apart.
    pub(crate) fn from_model_tag(tag: u32) -> Option<(Game, Endian)> {
        match tag {
            0x00 => Some((Game::TheSims, Endian::Little)),
            0x01 => Some((Game::TheSimsBustinOut, Endian::Little)),
            0x35 => Some((Game::TheUrbz, Endian::Little)),
            0x3A => Some((Game::TheSims2, Endian::Little)),
            0x3E => Some((Game::TheSims2Pets, Endian::Little)),
            0x3E000000 => Some((Game::TheSims2Pets, Endian::Big)),
            0x45000000 => Some((Game::TheSims2Castaway, Endian::Big)),
            _ => None,
        }
    }

    pub(crate) fn layout(self) -> &'static Layout {
        &LAYOUTS[self as usize]
    }
}

/// The shape of the model header between the version tag and the scale
/// factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModelHeaderKind {
    TheSims,
    BustinOut,
    TheUrbz,
    /// Magic-checked header with a length-prefixed name. `extra_skip`
    /// bytes sit between the name and the shared metadata block.
    Sims2Family { extra_skip: usize },
}

/// Which of the three shader file layouts a title uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShaderVariant {
    TheSims,
    BustinOut,
    TheUrbz,
    TheSims2,
    Pets,
}

/// Per-title layout constants. One entry per [`Game`], in `Game::ALL`
/// order; the numbers come straight from the reverse-engineered formats.
pub(crate) struct Layout {
    pub model_header: ModelHeaderKind,
    /// Title-specific footer after the fixed 64-byte model trailer.
    pub model_footer_len: usize,
    /// Skipped bytes between the mesh strip list and the first record.
    pub mesh_header_skip: usize,
    /// Signed-byte channels per vertex normal; the 4th is discarded.
    pub normal_channels: usize,
    /// Explicit index buffers are a length-prefixed multi-stream block
    /// instead of a flat `u16` list.
    pub four_stream_indices: bool,
    /// Sub-models open with a count-prefixed geometry-unknown array.
    pub sub_model_geometry_unknowns: bool,

    pub anim_pre_name_skip: usize,
    pub anim_post_name_skip: usize,
    /// Unknown tail after the three channel indices of a bone record.
    pub anim_bone_tail_skip: usize,
    pub anim_has_sounds: bool,

    /// Character files open with a 16-byte prologue and 4 extra bytes
    /// after the name.
    pub extended_character_header: bool,

    pub shader_variant: ShaderVariant,
    /// Accepted values of the shader version word; empty when the layout
    /// has no version word at all.
    pub shader_versions: &'static [u32],
}

static LAYOUTS: [Layout; 6] = [
    // The Sims
    Layout {
        model_header: ModelHeaderKind::TheSims,
        model_footer_len: 8,
        mesh_header_skip: 0,
        normal_channels: 3,
        four_stream_indices: false,
        sub_model_geometry_unknowns: false,
        anim_pre_name_skip: 0,
        anim_post_name_skip: 0,
        anim_bone_tail_skip: 0,
        anim_has_sounds: false,
        extended_character_header: false,
        shader_variant: ShaderVariant::TheSims,
        shader_versions: &[],
    },
    // The Sims Bustin' Out
    Layout {
        model_header: ModelHeaderKind::BustinOut,
        model_footer_len: 8,
        mesh_header_skip: 4,
        normal_channels: 3,
        four_stream_indices: false,
        sub_model_geometry_unknowns: false,
        anim_pre_name_skip: 0,
        anim_post_name_skip: 0,
        anim_bone_tail_skip: 16,
        anim_has_sounds: false,
        extended_character_header: false,
        shader_variant: ShaderVariant::BustinOut,
        shader_versions: &[],
    },
    // The Urbz
    Layout {
        model_header: ModelHeaderKind::TheUrbz,
        model_footer_len: 8,
        mesh_header_skip: 4,
        normal_channels: 3,
        four_stream_indices: false,
        sub_model_geometry_unknowns: false,
        anim_pre_name_skip: 20,
        anim_post_name_skip: 0,
        anim_bone_tail_skip: 20,
        anim_has_sounds: false,
        extended_character_header: false,
        shader_variant: ShaderVariant::TheUrbz,
        shader_versions: &[0x14],
    },
    // The Sims 2
    Layout {
        model_header: ModelHeaderKind::Sims2Family { extra_skip: 0 },
        model_footer_len: 8,
        mesh_header_skip: 4,
        normal_channels: 4,
        four_stream_indices: false,
        sub_model_geometry_unknowns: false,
        anim_pre_name_skip: 16,
        anim_post_name_skip: 4,
        anim_bone_tail_skip: 20,
        anim_has_sounds: true,
        extended_character_header: true,
        shader_variant: ShaderVariant::TheSims2,
        shader_versions: &[0x16],
    },
    // The Sims 2 Pets
    Layout {
        model_header: ModelHeaderKind::Sims2Family { extra_skip: 61 },
        model_footer_len: 4,
        mesh_header_skip: 4,
        normal_channels: 4,
        four_stream_indices: true,
        sub_model_geometry_unknowns: false,
        anim_pre_name_skip: 16,
        anim_post_name_skip: 4,
        anim_bone_tail_skip: 20,
        anim_has_sounds: true,
        extended_character_header: true,
        shader_variant: ShaderVariant::Pets,
        shader_versions: &[0x18, 0x19, 0x1A],
    },
    // The Sims 2 Castaway
    Layout {
        model_header: ModelHeaderKind::Sims2Family { extra_skip: 61 },
        model_footer_len: 8,
        mesh_header_skip: 52,
        normal_channels: 4,
        four_stream_indices: true,
        sub_model_geometry_unknowns: true,
        anim_pre_name_skip: 16,
        anim_post_name_skip: 4,
        anim_bone_tail_skip: 20,
        anim_has_sounds: true,
        extended_character_header: true,
        shader_variant: ShaderVariant::Pets,
        shader_versions: &[0x18, 0x19, 0x1A],
    },
];
