//! Engine configuration
//!
//! A `Config` is read once when the renderer is initialized. The backend choice
//! in particular cannot be changed afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use glam::Vec4;

/// Graphics backend variant selected at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Immediate-context backend (device context, clear/present/draw calls)
    Immediate,
    /// Explicit backend (command lists, fences, descriptor heaps)
    Explicit,
}

impl BackendKind {
    /// Short name used in logs and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Immediate => "dx11",
            BackendKind::Explicit => "dx12",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dx11" | "immediate" | "v1" => Ok(BackendKind::Immediate),
            "dx12" | "explicit" | "v2" => Ok(BackendKind::Explicit),
            other => Err(format!("unknown backend '{}' (expected dx11 or dx12)", other)),
        }
    }
}

/// Fixed capacity of each descriptor heap category (explicit backend only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorCapacities {
    pub render_target: u32,
    pub depth_stencil: u32,
    pub shader_resource: u32,
    pub unordered_access: u32,
}

impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            render_target: 512,
            depth_stencil: 512,
            shader_resource: 4096,
            unordered_access: 512,
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend variant, read once at `Renderer::init`
    pub backend: BackendKind,
    /// Application name
    pub app_name: String,
    /// Back buffer width in pixels
    pub width: u32,
    /// Back buffer height in pixels
    pub height: u32,
    /// Present with vertical sync
    pub vsync: bool,
    /// Enable debug layers and break-on-error reporting
    pub enable_validation: bool,
    /// Color the frame target is cleared to
    pub clear_color: Vec4,
    /// Descriptor heap capacities
    pub descriptor_capacities: DescriptorCapacities,
    /// Turn a fence wait longer than this into a device-lost error (`None` waits forever)
    pub fence_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Immediate,
            app_name: "PicoGine Application".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            enable_validation: cfg!(debug_assertions),
            clear_color: Vec4::new(0.5, 0.5, 0.5, 1.0),
            descriptor_capacities: DescriptorCapacities::default(),
            fence_timeout: None,
        }
    }
}

impl Config {
    /// Same configuration with another backend
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Width divided by height
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_game_settings() {
        let config = Config::default();
        assert_eq!(config.backend, BackendKind::Immediate);
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(config.vsync);
        assert_eq!(config.clear_color, Vec4::new(0.5, 0.5, 0.5, 1.0));
        assert!(config.fence_timeout.is_none());
        assert!((config.aspect_ratio() - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("dx11".parse::<BackendKind>(), Ok(BackendKind::Immediate));
        assert_eq!("DX12".parse::<BackendKind>(), Ok(BackendKind::Explicit));
        assert_eq!("explicit".parse::<BackendKind>(), Ok(BackendKind::Explicit));
        assert_eq!("v1".parse::<BackendKind>(), Ok(BackendKind::Immediate));
        assert!("vulkan".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_with_backend() {
        let config = Config::default().with_backend(BackendKind::Explicit);
        assert_eq!(config.backend, BackendKind::Explicit);
        assert_eq!(config.backend.to_string(), "dx12");
    }
}
