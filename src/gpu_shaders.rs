use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const VERTEX_SHADER_FILE: &str = "tonemap.vert.wgsl";
pub const FRAGMENT_SHADER_FILE: &str = "tonemap.frag.wgsl";

const BUILTIN_VERTEX: &str = include_str!("../shaders/tonemap.vert.wgsl");
const BUILTIN_FRAGMENT: &str = include_str!("../shaders/tonemap.frag.wgsl");

/// Where a shader pair was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderOrigin {
    Builtin,
    Directory(PathBuf),
    Inline,
}

/// Vertex/fragment WGSL source pair consumed by the GPU pipeline.
///
/// Expected interface: vertex entry `vs_main` (locations 0 = position, 1 = uv),
/// fragment entry `fs_main`, `@group(0) @binding(0)` HDR texture and
/// `@binding(1)` uniform block `{ exposure, white_point, gamma, _pad0 }`.
#[derive(Debug, Clone)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
    pub origin: ShaderOrigin,
}

impl ShaderSources {
    /// Sources compiled into the binary.
    pub fn builtin() -> Self {
        Self {
            vertex: BUILTIN_VERTEX.to_string(),
            fragment: BUILTIN_FRAGMENT.to_string(),
            origin: ShaderOrigin::Builtin,
        }
    }

    pub fn inline(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
            origin: ShaderOrigin::Inline,
        }
    }

    /// Reads both files from `dir`. Nothing is compiled here.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let vertex_path = dir.join(VERTEX_SHADER_FILE);
        let fragment_path = dir.join(FRAGMENT_SHADER_FILE);

        let vertex = fs::read_to_string(&vertex_path)
            .with_context(|| format!("Failed to read vertex shader: {}", vertex_path.display()))?;
        let fragment = fs::read_to_string(&fragment_path)
            .with_context(|| format!("Failed to read fragment shader: {}", fragment_path.display()))?;

        Ok(Self {
            vertex,
            fragment,
            origin: ShaderOrigin::Directory(dir.to_path_buf()),
        })
    }
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self::builtin()
    }
}
