//! Renderer configuration (JSON).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::SceneCapacity;
use crate::runtime::HostRuntimeConfig;
use crate::scene::{FractalMode, SceneInfo};
use crate::{Error, Result};

/// Procedural scene settings for the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Seed for fractal parameters and per-pixel random values
    pub seed: u64,
    pub fractal_iterations: u32,
    pub fractal_model: usize,
    pub fractal_mode: FractalMode,
    /// Primitives per bounding box after compaction
    pub box_size: usize,
    /// Rotate the movable primitives each frame
    pub animate: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            fractal_iterations: 3,
            fractal_model: 2,
            fractal_mode: FractalMode::Spheres,
            box_size: 16,
            animate: false,
        }
    }
}

/// Everything needed to bring up a render session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub device_index: u32,
    /// Launch tile replacing the 8x8x1 default
    pub tile: Option<[u32; 3]>,
    pub width: u32,
    pub height: u32,
    /// Samples accumulated before the image is final
    pub max_iterations: u32,
    pub capacity: SceneCapacity,
    /// Software device settings
    pub host: HostRuntimeConfig,
    pub scene: SceneConfig,
    /// `EnvFilter` directive, e.g. `info` or `raytrace_host=debug`
    pub log_filter: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            tile: None,
            width: 640,
            height: 480,
            max_iterations: 64,
            capacity: SceneCapacity::default(),
            host: HostRuntimeConfig::default(),
            scene: SceneConfig::default(),
            log_filter: None,
        }
    }
}

impl RendererConfig {
    /// Per-user config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("raytrace-host");
            p.push("config.json");
            p
        })
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Config from the per-user file, or defaults when it is missing or broken.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path().filter(|p| p.exists()) else {
            return Self::default();
        };
        Self::load(&path).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            Self::default()
        })
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid(format!(
                "image size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::invalid("max_iterations must be at least 1"));
        }
        if let Some(tile) = self.tile {
            if tile.contains(&0) {
                return Err(Error::invalid(format!("tile {tile:?} has a zero axis")));
            }
        }
        if self.scene.box_size == 0 {
            return Err(Error::invalid("scene.box_size must be at least 1"));
        }
        self.session_capacity().validate()
    }

    /// Capacity sized to the configured image.
    pub fn session_capacity(&self) -> SceneCapacity {
        self.capacity.for_image(self.width, self.height)
    }

    /// Initial per-frame parameters.
    pub fn scene_info(&self) -> SceneInfo {
        SceneInfo::new(self.width, self.height, self.max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RendererConfig::default();
        config.validate().unwrap();
        assert_eq!(config.session_capacity().pixel_count(), 640 * 480);
        assert_eq!(config.scene_info().max_path_tracing_iterations, 64);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = RendererConfig::from_json(r#"{"width": 32, "height": 16, "tile": [4, 4, 1]}"#).unwrap();
        assert_eq!((config.width, config.height), (32, 16));
        assert_eq!(config.tile, Some([4, 4, 1]));
        assert_eq!(config.capacity, SceneCapacity::default());
        assert_eq!(config.scene.fractal_mode, FractalMode::Spheres);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            RendererConfig::from_json(r#"{"width": 0}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            RendererConfig::from_json(r#"{"tile": [8, 0, 1]}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            RendererConfig::from_json(r#"{"max_iterations": 0}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(RendererConfig::from_json("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = RendererConfig::load("/nonexistent/raytrace.json").unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
