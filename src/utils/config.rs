/// Konfiguracja tone mappingu zapisywana jako JSON obok pliku .exe
/// Tworzona z wartościami domyślnymi jeśli plik nie istnieje

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gpu_shaders::ShaderSources;
use crate::processing::pipeline::Backend;
use crate::processing::tone_mapping::ToneMapParams;
use crate::utils::env_config::{env_var_path, SHADER_DIR_VAR};

pub const CONFIG_FILE_NAME: &str = "hdr_tonemap.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMapConfig {
    pub exposure: f32,
    pub white_point: f32,
    /// Linear pre-multiplier applied to the loaded image before mapping.
    pub boost: f32,
    pub backend: Backend,
    pub parallel_cpu: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shader_dir: Option<PathBuf>,
}

impl Default for ToneMapConfig {
    fn default() -> Self {
        let params = ToneMapParams::default();
        Self {
            exposure: params.exposure,
            white_point: params.white_point,
            boost: 1.0,
            backend: Backend::Cpu,
            parallel_cpu: false,
            shader_dir: None,
        }
    }
}

impl ToneMapConfig {
    pub fn params(&self) -> ToneMapParams {
        ToneMapParams::new(self.exposure, self.white_point)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse JSON config")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")
    }

    /// Reads `path`, creating it with defaults when absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Creating default config file: {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Config stored next to the executable.
    pub fn load() -> Result<Self> {
        Self::load_or_create(&config_path()?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Picks the shader pair: env override, configured directory,
    /// `<exe_dir>/shaders`, then the sources compiled into the binary.
    pub fn resolve_shader_sources(&self) -> ShaderSources {
        let exe_shaders = exe_dir().ok().map(|dir| dir.join("shaders"));
        let candidates = [env_var_path(SHADER_DIR_VAR), self.shader_dir.clone(), exe_shaders];
        resolve_from(candidates.into_iter().flatten())
    }
}

/// First directory holding a readable shader pair wins.
fn resolve_from(candidates: impl IntoIterator<Item = PathBuf>) -> ShaderSources {
    for dir in candidates {
        if !dir.is_dir() {
            tracing::debug!("shader directory {} not present", dir.display());
            continue;
        }
        match ShaderSources::load_from_dir(&dir) {
            Ok(sources) => {
                tracing::debug!("using shaders from {}", dir.display());
                return sources;
            }
            Err(e) => tracing::warn!("{:#}, trying next shader location", e),
        }
    }
    tracing::debug!("using built-in shaders");
    ShaderSources::builtin()
}

fn exe_dir() -> Result<PathBuf> {
    let exe_path = env::current_exe().context("Failed to get executable path")?;
    exe_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("Failed to get executable directory"))
}

/// Ścieżka do pliku konfiguracyjnego w katalogu .exe
pub fn config_path() -> Result<PathBuf> {
    Ok(exe_dir()?.join(CONFIG_FILE_NAME))
}
