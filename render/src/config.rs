//! Renderer configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! missing) file is valid:
//!
//! ```toml
//! [render]
//! failure_policy = "abort_on_failure"
//! clear_darkness = 0.5
//! present_mode = "mailbox"
//! shader_dir = "assets/shaders"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::PresentMode;
use crate::error::GraphicsError;
use crate::graph_builder::FailurePolicy;
use crate::types::{ClearValue, Extent2d, Format};

/// Number of presentable images. Frames in flight match it.
pub const SWAPCHAIN_IMAGE_COUNT: u32 = 2;

/// Render system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of swapchain images. Only [`SWAPCHAIN_IMAGE_COUNT`] is accepted.
    pub swapchain_image_count: u32,
    /// What a frame's action list does after a failed action.
    pub failure_policy: FailurePolicy,
    /// Base clear color, before darkening.
    pub clear_color: [f32; 3],
    /// Multiplier applied to [`Self::clear_color`].
    pub clear_darkness: f32,
    /// Depth clear value.
    pub clear_depth: f32,
    /// Directory relative shader paths are resolved against.
    pub shader_dir: PathBuf,
    /// Enable API validation layers when the backend supports them.
    pub validation: bool,
    /// Preferred present mode.
    pub present_mode: PresentMode,
    /// Surface extent used before the window reports one.
    pub initial_extent: Extent2d,
    /// Format of the presentable color images.
    pub color_format: Format,
    /// Format of the per-image depth targets.
    pub depth_format: Format,
    /// Draw the floor grid pass after the opaque pass.
    pub enable_floor_grid: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            swapchain_image_count: SWAPCHAIN_IMAGE_COUNT,
            failure_policy: FailurePolicy::default(),
            clear_color: [0.071435, 0.079988, 0.084369],
            clear_darkness: 0.28,
            clear_depth: 1.0,
            shader_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders")),
            validation: cfg!(debug_assertions),
            present_mode: PresentMode::Fifo,
            initial_extent: Extent2d::new(1280, 720),
            color_format: Format::Bgra8Unorm,
            depth_format: Format::D32Sfloat,
            enable_floor_grid: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    render: RendererConfig,
}

impl RendererConfig {
    /// Parse a configuration from TOML text with a `[render]` table.
    pub fn from_toml_str(source: &str) -> Result<Self, GraphicsError> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| GraphicsError::Config(e.to_string()))?;
        file.render.validate()?;
        Ok(file.render)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GraphicsError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_toml_str(&source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check values the render system cannot work with.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.swapchain_image_count != SWAPCHAIN_IMAGE_COUNT {
            return Err(GraphicsError::Config(format!(
                "swapchain_image_count must be {SWAPCHAIN_IMAGE_COUNT}, got {}",
                self.swapchain_image_count
            )));
        }
        if !self.color_format.is_color() {
            return Err(GraphicsError::Config(format!(
                "color_format {:?} is not a color format",
                self.color_format
            )));
        }
        if !self.depth_format.is_depth_stencil() {
            return Err(GraphicsError::Config(format!(
                "depth_format {:?} is not a depth format",
                self.depth_format
            )));
        }
        Ok(())
    }

    /// Clear value of the color attachment: darkened clear color, opaque.
    pub fn color_clear_value(&self) -> ClearValue {
        let [r, g, b] = self.clear_color;
        let k = self.clear_darkness;
        ClearValue::color(r * k, g * k, b * k, 1.0)
    }

    /// Clear value of the depth attachment.
    pub fn depth_clear_value(&self) -> ClearValue {
        ClearValue::depth_stencil(self.clear_depth, 0)
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the shader directory.
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Set the initial surface extent.
    pub fn with_initial_extent(mut self, width: u32, height: u32) -> Self {
        self.initial_extent = Extent2d::new(width, height);
        self
    }

    /// Enable or disable the floor grid pass.
    pub fn with_floor_grid(mut self, enabled: bool) -> Self {
        self.enable_floor_grid = enabled;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.swapchain_image_count, 2);
        assert_eq!(config.failure_policy, FailurePolicy::ContinueOnFailure);
    }

    #[test]
    fn test_default_clear_value() {
        let ClearValue::Color { r, g, b, a } = RendererConfig::default().color_clear_value()
        else {
            panic!("expected a color clear value");
        };
        assert!((r - 0.071435 * 0.28).abs() < 1e-6);
        assert!((g - 0.079988 * 0.28).abs() < 1e-6);
        assert!((b - 0.084369 * 0.28).abs() < 1e-6);
        assert_eq!(a, 1.0);
    }

    #[test]
    fn test_partial_toml() {
        let config = RendererConfig::from_toml_str(
            r#"
            [render]
            failure_policy = "abort_on_failure"
            present_mode = "mailbox"
            clear_darkness = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::AbortOnFailure);
        assert_eq!(config.present_mode, PresentMode::Mailbox);
        assert_eq!(config.clear_darkness, 0.5);
        assert_eq!(config.clear_depth, 1.0);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            RendererConfig::from_toml_str("").unwrap(),
            RendererConfig::default()
        );
    }

    #[test]
    fn test_rejects_other_image_counts() {
        let err = RendererConfig::from_toml_str("[render]\nswapchain_image_count = 3").unwrap_err();
        assert!(matches!(err, GraphicsError::Config(_)));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = RendererConfig::from_toml_str("[render]\nnear_plane = 0.0\nfar_plane = 0.0")
            .unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_rejects_bad_syntax() {
        assert!(RendererConfig::from_toml_str("[render\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let config = RendererConfig::load("/definitely/not/here/render.toml").unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
