//! # Scene Export
//!
//! Serializes a `MeshFrame` into a binary glTF 2.0 container (GLB) and
//! base64-encodes it for the JSON response. Each GLB is self-contained:
//! positions, vertex colors, triangle indices and a plain white material
//! all live in the one blob, so any glTF viewer can open it as-is.
//!
//! `parse_glb` reads back what `export_glb` writes. The server itself never
//! needs it; it backs the `inspect` command and the round-trip tests.

use crate::error::GenerationError;
use crate::mesh::MeshFrame;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
const CHUNK_BIN: u32 = 0x004E_4942; // "BIN\0"
const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

const COMPONENT_UNSIGNED_BYTE: u32 = 5121;
const COMPONENT_UNSIGNED_SHORT: u32 = 5123;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const COMPONENT_FLOAT: u32 = 5126;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u32 = 4;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("cannot export a mesh with no vertices")]
    EmptyMesh,

    #[error("cannot export a mesh with no faces")]
    NoFaces,

    #[error("face index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("malformed GLB: {0}")]
    Malformed(String),

    #[error("invalid glTF JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<SceneError> for GenerationError {
    fn from(err: SceneError) -> Self {
        GenerationError::Solver(err.to_string())
    }
}

// glTF JSON document, restricted to what a single colored triangle mesh needs.

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Gltf {
    asset: Asset,
    scene: usize,
    scenes: Vec<SceneNode>,
    nodes: Vec<Node>,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    buffers: Vec<Buffer>,
    buffer_views: Vec<BufferView>,
    accessors: Vec<Accessor>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Asset {
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generator: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SceneNode {
    nodes: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Node {
    mesh: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Mesh {
    primitives: Vec<Primitive>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Primitive {
    attributes: Attributes,
    indices: usize,
    #[serde(default)]
    material: Option<usize>,
    #[serde(default = "default_mode")]
    mode: u32,
}

fn default_mode() -> u32 {
    MODE_TRIANGLES
}

#[derive(Debug, Serialize, Deserialize)]
struct Attributes {
    #[serde(rename = "POSITION")]
    position: usize,
    #[serde(rename = "COLOR_0", default, skip_serializing_if = "Option::is_none")]
    color: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Material {
    pbr_metallic_roughness: PbrMetallicRoughness,
    double_sided: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PbrMetallicRoughness {
    base_color_factor: [f32; 4],
    metallic_factor: f32,
    roughness_factor: f32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Buffer {
    byte_length: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BufferView {
    buffer: usize,
    #[serde(default)]
    byte_offset: usize,
    byte_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Accessor {
    buffer_view: usize,
    #[serde(default)]
    byte_offset: usize,
    component_type: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    normalized: bool,
    count: usize,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<Vec<f32>>,
}

/// Geometry recovered from a GLB blob.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScene {
    pub positions: Array2<f32>,
    pub faces: Vec<[u32; 3]>,
    pub colors: Vec<[u8; 4]>,
}

/// Writes `mesh` as a GLB container.
///
/// Binary chunk layout: positions (f32 × 3 per vertex), then colors
/// (u8 × 4 per vertex), then indices (u32 × 3 per face). Every section is a
/// multiple of 4 bytes so no padding is needed between them.
pub fn export_glb(mesh: &MeshFrame) -> Result<Vec<u8>, SceneError> {
    let vertex_count = mesh.vertex_count();
    if vertex_count == 0 {
        return Err(SceneError::EmptyMesh);
    }
    let faces = mesh.faces();
    if faces.is_empty() {
        return Err(SceneError::NoFaces);
    }
    if let Some(&index) = faces.iter().flatten().find(|&&i| i as usize >= vertex_count) {
        return Err(SceneError::IndexOutOfRange { index, vertex_count });
    }

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    let positions_len = vertex_count * 12;
    let colors_len = vertex_count * 4;
    let indices_len = faces.len() * 12;
    let mut bin = Vec::with_capacity(positions_len + colors_len + indices_len);

    for row in mesh.vertices.rows() {
        for axis in 0..3 {
            let value = row[axis];
            min[axis] = min[axis].min(value);
            max[axis] = max[axis].max(value);
            bin.extend_from_slice(&value.to_le_bytes());
        }
    }
    for _ in 0..vertex_count {
        bin.extend_from_slice(&mesh.color);
    }
    for index in faces.iter().flatten() {
        bin.extend_from_slice(&index.to_le_bytes());
    }

    let document = Gltf {
        asset: Asset {
            version: "2.0".to_string(),
            generator: Some(format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        },
        scene: 0,
        scenes: vec![SceneNode { nodes: vec![0] }],
        nodes: vec![Node { mesh: 0 }],
        meshes: vec![Mesh {
            primitives: vec![Primitive {
                attributes: Attributes { position: 0, color: Some(1) },
                indices: 2,
                material: Some(0),
                mode: MODE_TRIANGLES,
            }],
        }],
        materials: vec![Material {
            pbr_metallic_roughness: PbrMetallicRoughness {
                base_color_factor: [1.0, 1.0, 1.0, 1.0],
                metallic_factor: 0.0,
                roughness_factor: 1.0,
            },
            double_sided: true,
        }],
        buffers: vec![Buffer { byte_length: bin.len() }],
        buffer_views: vec![
            BufferView { buffer: 0, byte_offset: 0, byte_length: positions_len, target: Some(TARGET_ARRAY_BUFFER) },
            BufferView { buffer: 0, byte_offset: positions_len, byte_length: colors_len, target: Some(TARGET_ARRAY_BUFFER) },
            BufferView {
                buffer: 0,
                byte_offset: positions_len + colors_len,
                byte_length: indices_len,
                target: Some(TARGET_ELEMENT_ARRAY_BUFFER),
            },
        ],
        accessors: vec![
            Accessor {
                buffer_view: 0,
                byte_offset: 0,
                component_type: COMPONENT_FLOAT,
                normalized: false,
                count: vertex_count,
                kind: "VEC3".to_string(),
                min: Some(min.to_vec()),
                max: Some(max.to_vec()),
            },
            Accessor {
                buffer_view: 1,
                byte_offset: 0,
                component_type: COMPONENT_UNSIGNED_BYTE,
                normalized: true,
                count: vertex_count,
                kind: "VEC4".to_string(),
                min: None,
                max: None,
            },
            Accessor {
                buffer_view: 2,
                byte_offset: 0,
                component_type: COMPONENT_UNSIGNED_INT,
                normalized: false,
                count: faces.len() * 3,
                kind: "SCALAR".to_string(),
                min: None,
                max: None,
            },
        ],
    };

    Ok(assemble_glb(serde_json::to_vec(&document)?, bin))
}

/// Pads both chunks to 4 bytes and wraps them in the GLB header.
fn assemble_glb(mut json: Vec<u8>, mut bin: Vec<u8>) -> Vec<u8> {
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let total_len = HEADER_LEN + CHUNK_HEADER_LEN + json.len() + CHUNK_HEADER_LEN + bin.len();
    let mut glb = Vec::with_capacity(total_len);
    glb.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    glb.extend_from_slice(&GLB_VERSION.to_le_bytes());
    glb.extend_from_slice(&(total_len as u32).to_le_bytes());
    glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    glb.extend_from_slice(&json);
    glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    glb.extend_from_slice(&bin);
    glb
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, SceneError> {
    Ok(STANDARD.decode(text)?)
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, SceneError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| SceneError::Malformed(format!("truncated at byte {}", offset)))
}

/// Reads the first primitive of the first mesh back out of a GLB blob.
pub fn parse_glb(glb: &[u8]) -> Result<ParsedScene, SceneError> {
    if read_u32(glb, 0)? != GLB_MAGIC {
        return Err(SceneError::Malformed("bad magic".to_string()));
    }
    let version = read_u32(glb, 4)?;
    if version != GLB_VERSION {
        return Err(SceneError::Malformed(format!("unsupported version {}", version)));
    }
    let declared_len = read_u32(glb, 8)? as usize;
    if declared_len != glb.len() {
        return Err(SceneError::Malformed(format!(
            "header declares {} bytes, blob has {}",
            declared_len,
            glb.len()
        )));
    }

    let json_len = read_u32(glb, HEADER_LEN)? as usize;
    if read_u32(glb, HEADER_LEN + 4)? != CHUNK_JSON {
        return Err(SceneError::Malformed("first chunk is not JSON".to_string()));
    }
    let json_start = HEADER_LEN + CHUNK_HEADER_LEN;
    let json = glb
        .get(json_start..json_start + json_len)
        .ok_or_else(|| SceneError::Malformed("JSON chunk overruns blob".to_string()))?;
    let document: Gltf = serde_json::from_slice(json)?;

    let bin_header = json_start + json_len;
    let bin_len = read_u32(glb, bin_header)? as usize;
    if read_u32(glb, bin_header + 4)? != CHUNK_BIN {
        return Err(SceneError::Malformed("second chunk is not BIN".to_string()));
    }
    let bin_start = bin_header + CHUNK_HEADER_LEN;
    let bin = glb
        .get(bin_start..bin_start + bin_len)
        .ok_or_else(|| SceneError::Malformed("BIN chunk overruns blob".to_string()))?;

    let primitive = document
        .meshes
        .first()
        .and_then(|mesh| mesh.primitives.first())
        .ok_or_else(|| SceneError::Malformed("no mesh primitive".to_string()))?;
    if primitive.mode != MODE_TRIANGLES {
        return Err(SceneError::Malformed(format!("primitive mode {} is not triangles", primitive.mode)));
    }

    let (position_accessor, position_bytes) = accessor_bytes(&document, bin, primitive.attributes.position, 12)?;
    expect_layout(position_accessor, COMPONENT_FLOAT, "VEC3")?;
    let values: Vec<f32> = position_bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let positions = Array2::from_shape_vec((position_accessor.count, 3), values)
        .map_err(|e| SceneError::Malformed(e.to_string()))?;

    let colors = match primitive.attributes.color {
        Some(index) => {
            let (accessor, bytes) = accessor_bytes(&document, bin, index, 4)?;
            expect_layout(accessor, COMPONENT_UNSIGNED_BYTE, "VEC4")?;
            bytes.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]).collect()
        }
        None => Vec::new(),
    };

    let index_accessor = document
        .accessors
        .get(primitive.indices)
        .ok_or_else(|| SceneError::Malformed("index accessor missing".to_string()))?;
    let index_size = match index_accessor.component_type {
        COMPONENT_UNSIGNED_INT => 4,
        COMPONENT_UNSIGNED_SHORT => 2,
        COMPONENT_UNSIGNED_BYTE => 1,
        other => return Err(SceneError::Malformed(format!("index component type {}", other))),
    };
    let (_, index_bytes) = accessor_bytes(&document, bin, primitive.indices, index_size)?;
    let indices: Vec<u32> = match index_size {
        4 => index_bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect(),
        2 => index_bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]) as u32).collect(),
        _ => index_bytes.iter().map(|&b| b as u32).collect(),
    };
    if indices.len() % 3 != 0 {
        return Err(SceneError::Malformed(format!("{} indices is not a triangle list", indices.len())));
    }
    let faces = indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();

    Ok(ParsedScene { positions, faces, colors })
}

fn accessor_bytes<'a>(
    document: &'a Gltf,
    bin: &'a [u8],
    index: usize,
    element_size: usize,
) -> Result<(&'a Accessor, &'a [u8]), SceneError> {
    let accessor = document
        .accessors
        .get(index)
        .ok_or_else(|| SceneError::Malformed(format!("accessor {} missing", index)))?;
    let view = document
        .buffer_views
        .get(accessor.buffer_view)
        .ok_or_else(|| SceneError::Malformed(format!("buffer view {} missing", accessor.buffer_view)))?;
    if view.buffer != 0 {
        return Err(SceneError::Malformed("only the embedded buffer is supported".to_string()));
    }

    // Counts and offsets come from the file, so every sum is checked.
    let overrun = || SceneError::Malformed(format!("accessor {} overruns its buffer view", index));
    let len = accessor.count.checked_mul(element_size).ok_or_else(overrun)?;
    let end_in_view = accessor.byte_offset.checked_add(len).ok_or_else(overrun)?;
    if end_in_view > view.byte_length {
        return Err(overrun());
    }
    let start = view.byte_offset.checked_add(accessor.byte_offset).ok_or_else(overrun)?;
    let end = start.checked_add(len).ok_or_else(overrun)?;
    let bytes = bin
        .get(start..end)
        .ok_or_else(|| SceneError::Malformed(format!("accessor {} overruns the BIN chunk", index)))?;
    Ok((accessor, bytes))
}

fn expect_layout(accessor: &Accessor, component_type: u32, kind: &str) -> Result<(), SceneError> {
    if accessor.component_type != component_type || accessor.kind != kind {
        return Err(SceneError::Malformed(format!(
            "expected {} of component {}, got {} of component {}",
            kind, component_type, accessor.kind, accessor.component_type
        )));
    }
    Ok(())
}
