//! Configuration Vault – reads/writes `./tsdf.toml`.
//!
//! The file is a serialised [`FusionConfig`]; any field may be omitted and
//! falls back to its default.

use std::fs;
use std::path::{Path, PathBuf};

use tsdf_types::{ConfigError, FusionConfig};

/// File name used when no path is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "tsdf.toml";

/// The path named on the command line, or `./tsdf.toml`.
pub fn config_path(arg: Option<&str>) -> PathBuf {
    PathBuf::from(arg.unwrap_or(DEFAULT_CONFIG_FILE))
}

/// Load the config from `path` and apply `TSDF_*` overrides.  Returns `None`
/// if the file does not exist.  The result is not validated.
pub fn load_from(path: &Path) -> Result<Option<FusionConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut cfg: FusionConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `TSDF_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TSDF_FRAME_ID` | `tsdf_frame_id` |
/// | `TSDF_VOXEL_RESOLUTION` | `volume_resolution` |
/// | `TSDF_COLS` | `cols` |
/// | `TSDF_ROWS` | `rows` |
pub fn apply_env_overrides(cfg: &mut FusionConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with a custom variable lookup.  Values
/// that fail to parse are ignored.
pub(crate) fn apply_overrides(cfg: &mut FusionConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("TSDF_FRAME_ID")
        && !v.trim().is_empty()
    {
        cfg.tsdf_frame_id = v;
    }
    if let Some(v) = var("TSDF_VOXEL_RESOLUTION")
        && let Ok(res) = v.trim().parse::<f32>()
    {
        cfg.volume_resolution = res;
    }
    if let Some(v) = var("TSDF_COLS")
        && let Ok(cols) = v.trim().parse::<u32>()
    {
        cfg.cols = cols;
    }
    if let Some(v) = var("TSDF_ROWS")
        && let Ok(rows) = v.trim().parse::<u32>()
    {
        cfg.rows = rows;
    }
}

/// Write `cfg` to `path` as pretty TOML, creating parent directories.
pub fn save_to(cfg: &FusionConfig, path: &Path) -> Result<(), ConfigError> {
    let io_err = |e: std::io::Error| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| ConfigError::Parse(e.to_string()))?;
    fs::write(path, raw).map_err(io_err)
}
