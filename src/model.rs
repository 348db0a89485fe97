// SPDX-FileCopyrightText: 2025 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{Cursor, Seek, SeekFrom};

use binrw::{BinReaderExt, Endian};
use bitflags::bitflags;
use glam::{Vec2, Vec3};
use tracing::debug;

use crate::common::{Game, ModelHeaderKind};
use crate::common_file_operations::{
    read_sized_string, read_string_until_null, skip_exact, skip_records,
    BSPLINE_VOLUME_RECORD_SIZE, CAMERA_RECORD_SIZE, DUMMY_RECORD_SIZE,
    GEOMETRY_UNKNOWN_RECORD_SIZE, LIGHT_RECORD_SIZE,
};
use crate::error::FormatError;
use crate::ByteSpan;

const MODEL_MAGIC: u32 = 1297040460;
const HEADER_SENTINEL: u32 = 0xFFFFFFFF;

bitflags! {
    struct MeshFlags: u32 {
        const MORPHS = 0x01;
        const UVS = 0x02;
        const COLORS = 0x04;
        const NORMALS = 0x08;
        const SNORM = 0x10;
        const INDICES = 0x20;
        const SECONDARY_UVS = 0x40;
    }
}

/// One decoded vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Position, already de-quantized to world scale.
    pub position: Vec3,
    /// Opaque per-vertex field; only its hidden bit is understood.
    pub unknown: i32,
}

impl Vertex {
    /// Strip-implied triangulation skips triangles that end on a hidden
    /// vertex.
    pub fn hidden(&self) -> bool {
        self.unknown & 0x8000 != 0
    }
}

/// One mesh of a sub-model.
///
/// Attribute vectors are either empty or parallel to `positions`,
/// depending on the mesh's flags. Exactly one of `faces` and `strips` is
/// populated.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub positions: Vec<Vertex>,
    pub uvs: Vec<Vec2>,
    pub secondary_uvs: Vec<Vec2>,
    pub normals: Vec<Vec3>,
    /// RGBA bytes per vertex.
    pub colors: Vec<[u8; 4]>,

    /// Bone ids affecting each vertex, for skinned meshes.
    pub bone_ids: Vec<Vec<u8>>,
    /// Raw bone weights per vertex, one byte per slot, for skinned meshes.
    pub bone_weights: Vec<[u8; 4]>,

    /// Explicit triangle indices.
    pub faces: Vec<u16>,
    /// Implicit triangle-strip ranges over `positions`.
    pub strips: Vec<(u32, u32)>,

    pub shader_id: u32,
}

impl Mesh {
    /// Emits the triangle list. Explicit indices produce one reversed
    /// triangle per consecutive index triple; strip ranges do the same but
    /// additionally skip triangles ending on a hidden vertex and triangles
    /// with two coincident corners.
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        let mut triangles = Vec::new();

        if !self.faces.is_empty() {
            for window in self.faces.windows(3) {
                triangles.push([
                    u32::from(window[2]),
                    u32::from(window[1]),
                    u32::from(window[0]),
                ]);
            }

            return triangles;
        }

        for &(start, end) in &self.strips {
            for i in start..end.saturating_sub(2) {
                let a = &self.positions[i as usize];
                let b = &self.positions[i as usize + 1];
                let c = &self.positions[i as usize + 2];

                if c.hidden() {
                    continue;
                }

                if a.position == b.position
                    || a.position == c.position
                    || b.position == c.position
                {
                    continue;
                }

                triangles.push([i + 2, i + 1, i]);
            }
        }

        triangles
    }
}

/// A group of meshes sharing one de-quantization scale.
#[derive(Debug, Clone)]
pub struct SubModel {
    /// Shared vertex pool for sibling meshes that carry explicit indices
    /// but no vertex data of their own.
    pub main_mesh: Option<Mesh>,
    pub meshes: Vec<Mesh>,
}

/// Model file: named geometry, split into sub-models.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub game: Game,
    pub endian: Endian,
    pub sub_models: Vec<SubModel>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FloatKind {
    Float32,
    Snorm16,
}

/// Record kinds of the per-mesh command loop.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MeshRecord {
    VertexBlock,
    BoneRegistration,
    WeightToggleSkip,
    WeightToggle,
    SkinnedBlock,
    ShortMarker,
    End,
}

impl MeshRecord {
    fn from_byte(value: u8) -> Option<MeshRecord> {
        match value {
            0 => Some(MeshRecord::VertexBlock),
            1 => Some(MeshRecord::BoneRegistration),
            2 => Some(MeshRecord::WeightToggleSkip),
            3 => Some(MeshRecord::WeightToggle),
            4 => Some(MeshRecord::SkinnedBlock),
            5 => Some(MeshRecord::ShortMarker),
            6 => Some(MeshRecord::End),
            _ => None,
        }
    }
}

fn read_positions(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    count: u32,
    kind: FloatKind,
    scale: f32,
    positions: &mut Vec<Vertex>,
) -> Result<(), FormatError> {
    for _ in 0..count {
        match kind {
            FloatKind::Float32 => {
                let position: [f32; 3] = cursor.read_type(endian)?;
                let unknown: i32 = cursor.read_type(endian)?;

                positions.push(Vertex {
                    position: Vec3::from_array(position),
                    unknown,
                });
            }
            FloatKind::Snorm16 => {
                let position: [i16; 3] = cursor.read_type(endian)?;
                let unknown: i16 = cursor.read_type(endian)?;

                positions.push(Vertex {
                    position: Vec3::new(
                        f32::from(position[0]) / scale,
                        f32::from(position[1]) / scale,
                        f32::from(position[2]) / scale,
                    ),
                    unknown: i32::from(unknown),
                });
            }
        }
    }

    Ok(())
}

fn read_uv_pair(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    kind: FloatKind,
) -> Result<Vec2, FormatError> {
    Ok(match kind {
        FloatKind::Float32 => {
            let uv: [f32; 2] = cursor.read_type(endian)?;
            Vec2::from_array(uv)
        }
        FloatKind::Snorm16 => {
            let uv: [i16; 2] = cursor.read_type(endian)?;
            Vec2::new(f32::from(uv[0]) / 4095.0, f32::from(uv[1]) / 4095.0)
        }
    })
}

fn read_normals(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    count: u32,
    channels: usize,
    normals: &mut Vec<Vec3>,
) -> Result<(), FormatError> {
    for _ in 0..count {
        let normal = if channels == 4 {
            // The 4th channel is present on the wire but discarded.
            let raw: [i8; 4] = cursor.read_type(endian)?;
            Vec3::new(
                f32::from(raw[0]) / 127.0,
                f32::from(raw[1]) / 127.0,
                f32::from(raw[2]) / 127.0,
            )
        } else {
            let raw: [i8; 3] = cursor.read_type(endian)?;
            Vec3::new(
                (f32::from(raw[0]) + 0.5) / 127.5,
                (f32::from(raw[1]) + 0.5) / 127.5,
                (f32::from(raw[2]) + 0.5) / 127.5,
            )
        };

        normals.push(normal.normalize_or_zero());
    }

    Ok(())
}

fn read_index_buffer(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    game: Game,
    faces: &mut Vec<u16>,
) -> Result<(), FormatError> {
    if !game.layout().four_stream_indices {
        let index_count: u32 = cursor.read_type(endian)?;
        skip_exact(cursor, 1)?; // stride marker

        for _ in 0..index_count {
            faces.push(cursor.read_type::<u16>(endian)?);
        }

        return Ok(());
    }

    // Length-prefixed block holding several interleaved index streams
    // (position/normal/color/uv); only the position stream is kept.
    skip_exact(cursor, 4)?;
    skip_exact(cursor, 1)?;

    let block_start = cursor.position();
    let block_length: u32 = cursor.read_type(endian)?;
    skip_exact(cursor, 5)?;

    let index_count: u16 = cursor.read_type(endian)?;
    if index_count == 0 {
        return Err(FormatError::new("index block with no indices"));
    }

    let payload = block_length
        .checked_sub(4)
        .ok_or_else(|| FormatError::new("index block too short"))?;
    let element_count = u64::from(payload) / u64::from(index_count) / 2;
    if element_count == 0 {
        return Err(FormatError::new("index block with no element streams"));
    }

    for _ in 0..index_count {
        faces.push(cursor.read_type::<u16>(endian)?);
        skip_exact(cursor, (element_count as usize - 1) * 2)?;
    }

    cursor.seek(SeekFrom::Start(block_start + u64::from(block_length) + 8))?;

    if game == Game::TheSims2Castaway {
        skip_exact(cursor, usize::from(index_count) * 2)?;
    }

    Ok(())
}

struct MeshDecoder<'a, 'buf> {
    cursor: &'a mut Cursor<ByteSpan<'buf>>,
    endian: Endian,
    game: Game,
    flags: MeshFlags,
    float_kind: FloatKind,
    scale: f32,

    mesh: Mesh,
    strip_end: u32,
    weights_on: bool,
    registered_bones: Vec<u8>,
}

impl MeshDecoder<'_, '_> {
    fn run(&mut self, strip_count: u32) -> Result<(), FormatError> {
        loop {
            let kind: u8 = self.cursor.read_type(self.endian)?;
            let record = MeshRecord::from_byte(kind)
                .ok_or_else(|| FormatError::new(format!("unknown mesh record kind {kind}")))?;

            match record {
                MeshRecord::VertexBlock => self.vertex_block()?,
                MeshRecord::BoneRegistration => self.bone_registration()?,
                MeshRecord::WeightToggleSkip => {
                    skip_exact(self.cursor, 1)?;
                    self.weights_on = !self.weights_on;
                }
                MeshRecord::WeightToggle => self.weights_on = !self.weights_on,
                MeshRecord::SkinnedBlock => self.skinned_blocks(strip_count)?,
                MeshRecord::ShortMarker => skip_exact(self.cursor, 1)?,
                MeshRecord::End => return Ok(()),
            }
        }
    }

    /// Positions and the per-vertex attributes selected by the mesh flags.
    fn read_vertex_data(
        &mut self,
        vertex_count: u32,
        secondary_uvs: bool,
    ) -> Result<(), FormatError> {
        read_positions(
            self.cursor,
            self.endian,
            vertex_count,
            self.float_kind,
            self.scale,
            &mut self.mesh.positions,
        )?;

        if self.flags.contains(MeshFlags::UVS) {
            if secondary_uvs && self.flags.contains(MeshFlags::SECONDARY_UVS) {
                // Both channels are interleaved per vertex.
                for _ in 0..vertex_count {
                    let first = read_uv_pair(self.cursor, self.endian, self.float_kind)?;
                    let second = read_uv_pair(self.cursor, self.endian, self.float_kind)?;
                    self.mesh.uvs.push(first);
                    self.mesh.secondary_uvs.push(second);
                }
            } else {
                for _ in 0..vertex_count {
                    let uv = read_uv_pair(self.cursor, self.endian, self.float_kind)?;
                    self.mesh.uvs.push(uv);
                }
            }
        }

        if self.flags.contains(MeshFlags::COLORS) {
            for _ in 0..vertex_count {
                self.mesh
                    .colors
                    .push(self.cursor.read_type::<[u8; 4]>(self.endian)?);
            }
        }

        if self.flags.contains(MeshFlags::NORMALS) {
            read_normals(
                self.cursor,
                self.endian,
                vertex_count,
                self.game.layout().normal_channels,
                &mut self.mesh.normals,
            )?;
        }

        Ok(())
    }

    fn read_weights(&mut self, vertex_count: u32) -> Result<(), FormatError> {
        for _ in 0..vertex_count {
            self.mesh
                .bone_weights
                .push(self.cursor.read_type::<[u8; 4]>(self.endian)?);
            self.mesh.bone_ids.push(self.registered_bones.clone());
        }

        Ok(())
    }

    fn vertex_block(&mut self) -> Result<(), FormatError> {
        let vertex_count: u32 = self.cursor.read_type(self.endian)?;

        self.read_vertex_data(vertex_count, true)?;

        if self.flags.contains(MeshFlags::MORPHS) {
            skip_exact(self.cursor, vertex_count as usize * 4)?;
        }

        if self.flags.contains(MeshFlags::INDICES) {
            read_index_buffer(self.cursor, self.endian, self.game, &mut self.mesh.faces)?;
        } else {
            self.mesh
                .strips
                .push((self.strip_end, self.strip_end + vertex_count));
        }
        self.strip_end += vertex_count;

        if self.weights_on {
            self.read_weights(vertex_count)?;
        }

        Ok(())
    }

    /// Groups of (bone id, weight slot, unknown, continuation); a zero
    /// continuation byte terminates the list, which replaces the active
    /// registration.
    fn bone_registration(&mut self) -> Result<(), FormatError> {
        let mut bones = Vec::new();

        loop {
            let group: [u8; 4] = self.cursor.read_type(self.endian)?;
            if group[3] == 0 {
                break;
            }
            bones.push(group[0]);
        }

        self.registered_bones = bones;
        Ok(())
    }

    /// Vertex block variant for skinned meshes: always weighted, one block
    /// per declared strip.
    fn skinned_blocks(&mut self, strip_count: u32) -> Result<(), FormatError> {
        for _ in 0..strip_count {
            let marker: u8 = self.cursor.read_type(self.endian)?;
            if marker == 5 {
                skip_exact(self.cursor, 2)?;
            }

            let vertex_count: u32 = self.cursor.read_type(self.endian)?;

            self.read_vertex_data(vertex_count, false)?;
            self.read_weights(vertex_count)?;

            self.mesh
                .strips
                .push((self.strip_end, self.strip_end + vertex_count));
            self.strip_end += vertex_count;
        }

        Ok(())
    }
}

fn read_mesh(
    cursor: &mut Cursor<ByteSpan>,
    game: Game,
    endian: Endian,
    scale: f32,
) -> Result<Mesh, FormatError> {
    let raw_flags: u32 = cursor.read_type(endian)?;
    let flags = MeshFlags::from_bits_truncate(raw_flags);

    let shader_id: u32 = cursor.read_type(endian)?;

    let strip_count: u32 = cursor.read_type(endian)?;
    skip_exact(cursor, strip_count as usize)?;
    skip_exact(cursor, game.layout().mesh_header_skip)?;

    let float_kind = if flags.contains(MeshFlags::SNORM) {
        FloatKind::Snorm16
    } else {
        FloatKind::Float32
    };

    let mut decoder = MeshDecoder {
        cursor,
        endian,
        game,
        flags,
        float_kind,
        scale,
        mesh: Mesh {
            shader_id,
            ..Mesh::default()
        },
        strip_end: 0,
        weights_on: false,
        registered_bones: Vec::new(),
    };

    decoder.run(strip_count)?;

    Ok(decoder.mesh)
}

fn read_sub_model(
    cursor: &mut Cursor<ByteSpan>,
    game: Game,
    endian: Endian,
    scale: f32,
) -> Result<SubModel, FormatError> {
    skip_exact(cursor, 4)?;

    if game.layout().sub_model_geometry_unknowns {
        let count: u32 = cursor.read_type(endian)?;
        skip_records(cursor, count, GEOMETRY_UNKNOWN_RECORD_SIZE, "geometry unknown")?;
    }

    let mesh_count: u32 = cursor.read_type(endian)?;

    let mut meshes = Vec::new();
    for _ in 0..mesh_count {
        meshes.push(read_mesh(cursor, game, endian, scale)?);
    }

    // Meshes with explicit indices but no vertex data of their own index
    // into a shared pool: the first sibling with vertices and no indices.
    let mut main_mesh = None;
    if meshes
        .iter()
        .any(|mesh| !mesh.faces.is_empty() && mesh.positions.is_empty())
    {
        let pool = meshes
            .iter()
            .position(|mesh| !mesh.positions.is_empty() && mesh.faces.is_empty())
            .ok_or_else(|| FormatError::new("indexed mesh has no vertex pool"))?;
        main_mesh = Some(meshes.remove(pool));
    }

    for mesh in &meshes {
        let pool_len = if mesh.positions.is_empty() {
            main_mesh.as_ref().map_or(0, |pool| pool.positions.len())
        } else {
            mesh.positions.len()
        };

        if let Some(&index) = mesh
            .faces
            .iter()
            .find(|&&index| usize::from(index) >= pool_len)
        {
            return Err(FormatError::new(format!("face index {index} out of bounds")));
        }
    }

    Ok(SubModel { main_mesh, meshes })
}

/// Shared header metadata block. A nonzero leading count switches the
/// block to a byte-wise scan for the 0xFFFFFFFF sentinel; otherwise it is
/// three count-prefixed opaque arrays followed by one pad byte.
fn read_metadata_block(cursor: &mut Cursor<ByteSpan>, endian: Endian) -> Result<(), FormatError> {
    let leading: u32 = cursor.read_type(endian)?;

    if leading > 0 {
        loop {
            let word: u32 = cursor.read_type(endian)?;
            if word != HEADER_SENTINEL {
                cursor.seek(SeekFrom::Current(-3))?;
            } else {
                cursor.seek(SeekFrom::Current(-12))?;
                return Ok(());
            }
        }
    }

    let bspline_count: u32 = cursor.read_type(endian)?;
    skip_records(cursor, bspline_count, BSPLINE_VOLUME_RECORD_SIZE, "bspline volume")?;

    let camera_count: u32 = cursor.read_type(endian)?;
    skip_records(cursor, camera_count, CAMERA_RECORD_SIZE, "camera descriptor")?;

    let light_count: u32 = cursor.read_type(endian)?;
    skip_records(cursor, light_count, LIGHT_RECORD_SIZE, "light descriptor")?;

    skip_exact(cursor, 1)?;
    Ok(())
}

fn read_header(
    cursor: &mut Cursor<ByteSpan>,
    endian: Endian,
    kind: ModelHeaderKind,
) -> Result<String, FormatError> {
    match kind {
        ModelHeaderKind::TheSims => {
            skip_exact(cursor, 2)?;
            let name = read_string_until_null(cursor)?;
            skip_exact(cursor, 1)?;

            Ok(name)
        }
        ModelHeaderKind::BustinOut => {
            skip_exact(cursor, 2)?;
            let name = read_string_until_null(cursor)?;
            skip_exact(cursor, 16)?;

            let dummy_count: u32 = cursor.read_type(endian)?;
            skip_records(cursor, dummy_count, DUMMY_RECORD_SIZE, "dummy marker")?;

            skip_exact(cursor, 1)?;

            Ok(name)
        }
        ModelHeaderKind::TheUrbz => {
            skip_exact(cursor, 16)?;
            let name = read_string_until_null(cursor)?;
            skip_exact(cursor, 4)?;
            skip_exact(cursor, 53)?;

            read_metadata_block(cursor, endian)?;

            Ok(name)
        }
        ModelHeaderKind::Sims2Family { extra_skip } => {
            let magic: u32 = cursor.read_type(endian)?;
            if magic != MODEL_MAGIC {
                return Err(FormatError::new("bad model magic"));
            }

            let marker: i32 = cursor.read_type(endian)?;
            if marker != -1 {
                return Err(FormatError::new("bad model header marker"));
            }

            let name_length: u32 = cursor.read_type(endian)?;
            let length = name_length
                .checked_sub(1)
                .ok_or_else(|| FormatError::new("empty model name"))?;
            let name = read_sized_string(cursor, length as usize)?;
            skip_exact(cursor, 1)?;

            skip_exact(cursor, extra_skip)?;

            read_metadata_block(cursor, endian)?;

            Ok(name)
        }
    }
}

impl Model {
    /// Decodes a model file. Model files identify their own title and byte
    /// order through the leading tag, so no outside knowledge is needed.
    pub fn from_existing(buffer: ByteSpan) -> Result<Model, FormatError> {
        let mut cursor = Cursor::new(buffer);

        let tag: u32 = cursor.read_le()?;
        let (game, endian) = Game::from_model_tag(tag)
            .ok_or_else(|| FormatError::new(format!("unrecognized model tag {tag:#010x}")))?;
        let layout = game.layout();

        let name = read_header(&mut cursor, endian, layout.model_header)?;

        // Positions quantized to 16 bits divide by this on load.
        let stored_scale: f32 = cursor.read_type(endian)?;
        let scale = 1.0 / stored_scale;

        let sub_model_count: u32 = cursor.read_type(endian)?;
        let mut sub_models = Vec::new();
        for _ in 0..sub_model_count {
            sub_models.push(read_sub_model(&mut cursor, game, endian, scale)?);
        }

        skip_exact(&mut cursor, 64)?;
        skip_exact(&mut cursor, layout.model_footer_len)?;

        if cursor.position() != buffer.len() as u64 {
            return Err(FormatError::new("trailing bytes after model"));
        }

        debug!(name = name.as_str(), ?game, "decoded model");

        Ok(Model {
            name,
            game,
            endian,
            sub_models,
        })
    }
}
